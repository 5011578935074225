//! Canonical MessagePack encoding
//!
//! Structs encode as maps keyed by field name (`to_vec_named`). Field order in
//! every wire struct follows the sorted key order, and zero values are skipped
//! with the `is_zero` family of helpers, so a plain serde derive yields the
//! canonical form.

use crate::error::Result;
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::Read;

/// Encode a value canonically
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode a single canonically encoded value
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Decode the next value from a stream of concatenated encodings
pub fn decode_next<R: Read, T: DeserializeOwned>(reader: R) -> Result<T> {
    Ok(rmp_serde::from_read(reader)?)
}

/// Canonical bytes for hashing
pub(crate) fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    encode(value)
}

/// Skip predicate for zero/empty values
pub fn is_zero<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// Skip predicate for `false`
pub fn is_false(value: &bool) -> bool {
    !*value
}

/// Key of a key-value store entry (application state or box storage).
///
/// Keys are arbitrary bytes. They encode as a MessagePack `str` when they are
/// valid UTF-8 and as `bin` otherwise; both forms decode.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct KvKey(pub Vec<u8>);

impl KvKey {
    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for KvKey {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for KvKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for KvKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for KvKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "0x{}", hex::encode(&self.0)),
        }
    }
}

impl Serialize for KvKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match std::str::from_utf8(&self.0) {
            Ok(s) => serializer.serialize_str(s),
            Err(_) => serializer.serialize_bytes(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for KvKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct KeyVisitor;

        impl<'de> Visitor<'de> for KeyVisitor {
            type Value = KvKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or byte string key")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<KvKey, E> {
                Ok(KvKey(v.as_bytes().to_vec()))
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<KvKey, E> {
                Ok(KvKey(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<KvKey, E> {
                Ok(KvKey(v))
            }
        }

        deserializer.deserialize_any(KeyVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_kv_key_text_encodes_as_str() {
        let bytes = encode(&KvKey::from("count")).unwrap();
        // fixstr of length 5
        assert_eq!(bytes[0], 0xa5);
        assert_eq!(&bytes[1..], b"count");
    }

    #[test]
    fn test_kv_key_binary_encodes_as_bin() {
        let key = KvKey(vec![0xff, 0x00, 0x10]);
        let bytes = encode(&key).unwrap();
        assert_eq!(bytes, vec![0xc4, 0x03, 0xff, 0x00, 0x10]);
        let back: KvKey = decode(&bytes).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_map_keys_sorted_bytewise() {
        let mut map = BTreeMap::new();
        map.insert(KvKey::from("b"), 1u64);
        map.insert(KvKey::from("a"), 2u64);
        map.insert(KvKey(vec![0x80]), 3u64);
        let keys: Vec<_> = map.keys().map(|k| k.0.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), vec![0x80]]);
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("no canonical form"))
        }
    }

    #[test]
    fn test_canonical_bytes_reports_encode_failure() {
        let err = canonical_bytes(&Unencodable).unwrap_err();
        assert!(matches!(err, crate::Error::Encode(_)));
        assert!(err.to_string().contains("no canonical form"));
    }

    #[test]
    fn test_decode_next_reads_sequence() {
        let mut buf = encode(&1u64).unwrap();
        buf.extend(encode(&"two").unwrap());
        let mut cursor = std::io::Cursor::new(buf);
        let a: u64 = decode_next(&mut cursor).unwrap();
        let b: String = decode_next(&mut cursor).unwrap();
        assert_eq!((a, b.as_str()), (1, "two"));
    }
}
