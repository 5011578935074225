//! Algojig AVM
//!
//! Bytecode tooling for the programs that authorize transactions (logic
//! signatures) and implement applications.
//!
//! - [`assembler`]: text to bytecode, with a pc to line map
//! - [`sourcemap`]: the pc to line map rendered as a v3 source map
//! - [`eval`]: the stack machine, in signature and application mode
//! - [`ledger`]: the state access seam applications run against

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod assembler;
pub mod error;
pub mod eval;
pub mod fields;
pub mod ledger;
pub mod opcodes;
pub mod sourcemap;
pub mod value;

// Re-exports
pub use assembler::{assemble, Program};
pub use error::{Error, Result};
pub use eval::{eval_application, eval_signature, AppOutcome, GroupView};
pub use ledger::LogicLedger;
pub use sourcemap::SourceMap;
pub use value::StackValue;
