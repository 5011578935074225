//! Fixed-width byte identifiers: addresses, digests and signatures
//!
//! All three encode as a single `bin` value on the wire. Addresses have a
//! human readable form: base32 (no padding) of the 32 bytes followed by the
//! last four bytes of their SHA-512/256 checksum.

use crate::error::{Error, Result};
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
const CHECKSUM_LEN: usize = 4;

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Byte length
            pub const LEN: usize = $len;

            /// All-zero value
            pub const ZERO: Self = Self([0u8; $len]);

            /// Create from raw bytes
            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Create from a slice, failing on length mismatch
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                let arr: [u8; $len] = bytes.try_into().ok()?;
                Some(Self(arr))
            }

            /// Raw bytes
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// True when every byte is zero
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::ZERO
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_bytes(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                struct FixedVisitor;

                impl<'de> Visitor<'de> for FixedVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        write!(f, "{} bytes", $len)
                    }

                    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<$name, E> {
                        $name::from_slice(v).ok_or_else(|| E::invalid_length(v.len(), &self))
                    }

                    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<$name, A::Error> {
                        let mut out = [0u8; $len];
                        for (i, slot) in out.iter_mut().enumerate() {
                            *slot = seq
                                .next_element()?
                                .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                        }
                        Ok($name(out))
                    }
                }

                deserializer.deserialize_bytes(FixedVisitor)
            }
        }
    };
}

fixed_bytes!(
    /// 32-byte account address (public key, program hash, multisig or application account)
    Address,
    32
);

fixed_bytes!(
    /// 32-byte SHA-512/256 digest
    Digest,
    32
);

fixed_bytes!(
    /// 64-byte Ed25519 signature
    Signature,
    64
);

impl Address {
    /// Checksum suffix appended to the text form
    fn checksum(&self) -> [u8; CHECKSUM_LEN] {
        let digest = crate::crypto::sha512_256(&self.0);
        let mut out = [0u8; CHECKSUM_LEN];
        out.copy_from_slice(&digest.0[Digest::LEN - CHECKSUM_LEN..]);
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut raw = Vec::with_capacity(Self::LEN + CHECKSUM_LEN);
        raw.extend_from_slice(&self.0);
        raw.extend_from_slice(&self.checksum());
        f.write_str(&base32_encode(&raw))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw = base32_decode(s)
            .ok_or_else(|| Error::InvalidAddress(format!("{} is not base32", s)))?;
        if raw.len() != Self::LEN + CHECKSUM_LEN {
            return Err(Error::InvalidAddress(format!(
                "{} decodes to {} bytes",
                s,
                raw.len()
            )));
        }
        let addr = Address::from_slice(&raw[..Self::LEN])
            .ok_or_else(|| Error::InvalidAddress(s.to_string()))?;
        if addr.checksum()[..] != raw[Self::LEN..] {
            return Err(Error::InvalidAddress(format!("{} has a bad checksum", s)));
        }
        Ok(addr)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base32_encode(&self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

impl From<Digest> for Address {
    fn from(d: Digest) -> Self {
        Address(d.0)
    }
}

/// RFC 4648 base32 without padding
pub fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8 + 4) / 5);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

/// Inverse of [`base32_encode`]; trailing `=` padding is tolerated
pub fn base32_decode(s: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for c in s.trim_end_matches('=').bytes() {
        let v = BASE32_ALPHABET.iter().position(|a| *a == c)? as u32;
        buffer = (buffer << 5) | v;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEE_SINK: &str = "XRBWO7FUJ7NOB6TOLBNEMLPHGEN7PWOSNNTUIG274DOAFWZ4533OR677SM";

    #[test]
    fn test_address_text_roundtrip() {
        let addr: Address = FEE_SINK.parse().unwrap();
        assert_eq!(
            hex::encode(addr.0),
            "bc43677cb44fdae0fa6e585a462de7311bf7d9d26b67441b5fe0dc02db3ceef6"
        );
        assert_eq!(addr.to_string(), FEE_SINK);
    }

    #[test]
    fn test_address_bad_checksum() {
        let mut s = FEE_SINK.to_string();
        s.replace_range(57..58, "A");
        assert!(s.parse::<Address>().is_err());
    }

    #[test]
    fn test_zero_address() {
        assert!(Address::ZERO.is_zero());
        assert!(Address::default().is_zero());
        assert_eq!(Address::ZERO.to_string().len(), 58);
    }

    #[test]
    fn test_base32() {
        assert_eq!(base32_encode(b"foobar"), "MZXW6YTBOI");
        assert_eq!(base32_decode("MZXW6YTBOI======").unwrap(), b"foobar");
        assert!(base32_decode("mzxw").is_none());
    }

    proptest::proptest! {
        #[test]
        fn prop_address_text_is_reversible(bytes in proptest::prelude::any::<[u8; 32]>()) {
            let addr = Address(bytes);
            let text = addr.to_string();
            proptest::prop_assert_eq!(text.len(), 58);
            proptest::prop_assert_eq!(text.parse::<Address>().unwrap(), addr);
        }
    }
}
