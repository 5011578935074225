//! Algojig ledger harness
//!
//! Evaluates a batch of signed transactions against a freshly bootstrapped
//! single-node ledger and reports the exact resulting state.
//!
//! # Architecture
//!
//! - **Linear pipeline**: bootstrap, read, verify, evaluate, commit, extract,
//!   encode
//! - **Single Writer**: one commit actor owns every store write
//! - **Atomic groups**: a group applies completely or the run aborts
//! - **Canonical output**: identical inputs give byte-identical results
//!
//! # Invariants
//!
//! - Rounds advance by exactly one per committed block
//! - Balances move only by transfers and rewards (money conservation)
//! - Every reported account was reached by the batch

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod commit;
pub mod config;
pub mod encoder;
pub mod error;
pub mod eval;
pub mod genesis;
pub mod harness;
pub mod ledger;
pub mod metrics;
pub mod reader;
pub mod snapshot;
pub mod storage;
pub mod types;
pub mod verify;

// Re-exports
pub use config::Config;
pub use encoder::EvaluationResult;
pub use error::{Error, Result};
pub use eval::{BlockEvaluator, EvalState};
pub use genesis::{bootstrap, GenesisState};
pub use ledger::Ledger;
pub use storage::Storage;
pub use types::{CreatableKind, CreatableLocator, BOX_PREFIX};
