//! Cryptographic primitives
//!
//! This module provides:
//! - Ed25519 key pairs, signing and verification
//! - Domain-separated SHA-512/256 hashing
//! - Derived account addresses (programs, applications, multisig)
//! - Merkle roots over digests

use crate::address::{Address, Digest, Signature};
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest as _, Sha512_256};

/// Domain separation prefixes
pub mod prefix {
    /// Transaction id
    pub const TRANSACTION: &[u8] = b"TX";
    /// Transaction group id
    pub const TX_GROUP: &[u8] = b"TG";
    /// Block header hash
    pub const BLOCK_HEADER: &[u8] = b"BH";
    /// Logic signature program account
    pub const PROGRAM: &[u8] = b"Program";
    /// Data signed by a delegated program key
    pub const PROGRAM_DATA: &[u8] = b"ProgData";
    /// Multisig account
    pub const MULTISIG: &[u8] = b"MultisigAddr";
    /// Application account
    pub const APP_ID: &[u8] = b"appID";
    /// Payset leaf
    pub const PAYSET_LEAF: &[u8] = b"TL";
    /// Signed transaction in block
    pub const SIGNED_TXN_IN_BLOCK: &[u8] = b"STIB";
    /// Merkle interior node
    pub const MERKLE_NODE: &[u8] = b"MA";
}

/// SHA-512/256 of arbitrary bytes
pub fn sha512_256(data: &[u8]) -> Digest {
    let mut hasher = Sha512_256::new();
    hasher.update(data);
    Digest(hasher.finalize().into())
}

/// SHA-512/256 of `prefix || data`
pub fn hash_with_prefix(prefix: &[u8], data: &[u8]) -> Digest {
    let mut hasher = Sha512_256::new();
    hasher.update(prefix);
    hasher.update(data);
    Digest(hasher.finalize().into())
}

/// Ed25519 key pair for signing
#[derive(Debug)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_seed(&rand::random::<[u8; 32]>())
    }

    /// Create from seed (32 bytes), deterministic
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Account address (the public key)
    pub fn address(&self) -> Address {
        Address(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign raw bytes
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }

    /// Sign `prefix || message`
    pub fn sign_with_prefix(&self, prefix: &[u8], message: &[u8]) -> Signature {
        let mut buf = Vec::with_capacity(prefix.len() + message.len());
        buf.extend_from_slice(prefix);
        buf.extend_from_slice(message);
        self.sign(&buf)
    }
}

/// Verify an Ed25519 signature over raw bytes
pub fn verify(public_key: &Address, message: &[u8], signature: &Signature) -> bool {
    let verifying_key = match VerifyingKey::from_bytes(&public_key.0) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let sig = DalekSignature::from_bytes(&signature.0);
    verifying_key.verify(message, &sig).is_ok()
}

/// Verify an Ed25519 signature over `prefix || message`
pub fn verify_with_prefix(
    public_key: &Address,
    prefix: &[u8],
    message: &[u8],
    signature: &Signature,
) -> bool {
    let mut buf = Vec::with_capacity(prefix.len() + message.len());
    buf.extend_from_slice(prefix);
    buf.extend_from_slice(message);
    verify(public_key, &buf, signature)
}

/// Escrow address of a logic signature program
pub fn program_address(program: &[u8]) -> Address {
    hash_with_prefix(prefix::PROGRAM, program).into()
}

/// Account address controlled by an application
pub fn app_address(app_id: u64) -> Address {
    hash_with_prefix(prefix::APP_ID, &app_id.to_be_bytes()).into()
}

/// Address of a multisig account
pub fn multisig_address(version: u8, threshold: u8, keys: &[Address]) -> Address {
    let mut buf = Vec::with_capacity(2 + keys.len() * Address::LEN);
    buf.push(version);
    buf.push(threshold);
    for key in keys {
        buf.extend_from_slice(&key.0);
    }
    hash_with_prefix(prefix::MULTISIG, &buf).into()
}

/// Merkle root over leaf digests
///
/// Odd levels duplicate their last node. An empty list yields the zero digest.
pub fn merkle_root(leaves: &[Digest]) -> Digest {
    if leaves.is_empty() {
        return Digest::ZERO;
    }

    let mut level: Vec<Digest> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            if let Some(last) = level.last().copied() {
                level.push(last);
            }
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(&pair[0].0);
                buf[32..].copy_from_slice(&pair[1].0);
                hash_with_prefix(prefix::MERKLE_NODE, &buf)
            })
            .collect();
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::from_seed(&[7u8; 32]);
        let sig = kp.sign(b"hello");
        assert!(verify(&kp.address(), b"hello", &sig));
        assert!(!verify(&kp.address(), b"hellO", &sig));
    }

    #[test]
    fn test_prefixed_signature_is_domain_separated() {
        let kp = KeyPair::generate();
        let sig = kp.sign_with_prefix(prefix::TRANSACTION, b"payload");
        assert!(verify_with_prefix(&kp.address(), prefix::TRANSACTION, b"payload", &sig));
        assert!(!verify_with_prefix(&kp.address(), prefix::PROGRAM_DATA, b"payload", &sig));
    }

    #[test]
    fn test_program_address() {
        let addr = program_address(&[0x06, 0x81, 0x01]);
        assert_eq!(
            addr.to_string(),
            "ZG2RRCHBZ4K2QKP3NGMYVF2MVG7YW2TSNJPVFVLEGX7KGQ46QVPJGOFTK4"
        );
    }

    #[test]
    fn test_app_addresses_differ() {
        assert_ne!(app_address(1), app_address(2));
    }

    #[test]
    fn test_merkle_root() {
        assert_eq!(merkle_root(&[]), Digest::ZERO);

        let a = sha512_256(b"a");
        assert_eq!(merkle_root(&[a]), a);

        let b = sha512_256(b"b");
        let c = sha512_256(b"c");
        // Odd count duplicates the last leaf
        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&[a, b, c, c]));
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }
}
