//! Error types for assembly and evaluation

use thiserror::Error;

/// Result type for AVM operations
pub type Result<T> = std::result::Result<T, Error>;

/// AVM errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Assembly failed at a source line (1-based)
    #[error("{line}: {message}")]
    Assemble {
        /// Source line
        line: usize,
        /// Description
        message: String,
    },

    /// Evaluation failed at a program counter
    #[error("{message} pc={pc}")]
    Eval {
        /// Program counter of the failing opcode
        pc: usize,
        /// Description
        message: String,
    },

    /// State access through the ledger failed
    #[error("{0}")]
    Ledger(String),
}

impl Error {
    /// Evaluation error at `pc`
    pub fn eval(pc: usize, message: impl Into<String>) -> Self {
        Error::Eval {
            pc,
            message: message.into(),
        }
    }

    /// Program counter of an evaluation error
    pub fn pc(&self) -> Option<usize> {
        match self {
            Error::Eval { pc, .. } => Some(*pc),
            _ => None,
        }
    }
}
