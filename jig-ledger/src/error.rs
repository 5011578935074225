//! Error types for the ledger harness

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Genesis could not be created
    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    /// Input stream could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// A group failed verification
    #[error("Verification error: {0}")]
    Verification(String),

    /// A group failed to apply
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// A block could not be committed
    #[error("Commit error: {0}")]
    Commit(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Index record (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Wire encoding or protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] jig_protocol::Error),

    /// Assembler error
    #[error("Assembly error: {0}")]
    Avm(#[from] jig_avm::Error),

    /// Operation not allowed in the evaluator's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Requested round is not the latest
    #[error("Round {0} not available")]
    RoundNotAvailable(u64),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
