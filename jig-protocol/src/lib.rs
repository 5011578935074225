//! Algojig protocol types
//!
//! Wire-level data model shared by the assembler, the VM and the ledger
//! harness.
//!
//! # Encoding
//!
//! Every type in this crate encodes to canonical MessagePack:
//!
//! - Map keys appear in sorted order (struct fields are declared in key order)
//! - Empty and zero-valued fields are omitted
//! - Byte strings use the `bin` family, integers use the smallest width
//!
//! Identifiers (transaction ids, group ids, block hashes, program and
//! application addresses) are domain-separated SHA-512/256 digests over
//! that encoding.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod account;
pub mod address;
pub mod block;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod params;
pub mod transaction;

// Re-exports
pub use account::{
    AccountData, AppLocalState, AppParams, AssetHolding, Status, TealKeyValue, TealType,
    TealValue,
};
pub use address::{Address, Digest, Signature};
pub use block::{ApplyData, Block, BlockHeader, EvalDelta, SignedTxnWithAd, ValueDelta};
pub use crypto::KeyPair;
pub use encoding::KvKey;
pub use error::{Error, Result};
pub use params::ConsensusParams;
pub use transaction::{
    AssetParams, BoxRef, LogicSig, MultisigSig, MultisigSubsig, OnCompletion, SignedTxn,
    StateSchema, Transaction, TxType,
};
