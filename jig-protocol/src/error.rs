//! Error types for protocol encoding and hashing

use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol errors
#[derive(Error, Debug)]
pub enum Error {
    /// Address text form could not be parsed
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Canonical encoding failed
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Canonical decoding failed
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Signature verification failed
    #[error("Signature verification failed: {0}")]
    SignatureError(String),

    /// Consensus protocol is not known
    #[error("Unknown protocol version: {0}")]
    UnknownProtocol(String),
}
