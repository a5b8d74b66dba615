//! VM error taxonomy. One sum type over the kinds spec.md section 7 names,
//! in the style of `fuel-vm`'s `error.rs`/`panic_reason.rs`: a flat enum,
//! `thiserror`-derived, with no stringly-typed variants.

use thiserror::Error;

/// Everything that can fail during compilation or execution.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VmError {
    #[error("syntax error at {pos}: {detail}")]
    Syntax { pos: usize, detail: String },

    #[error("unclosed construct at end of input: {what}")]
    Unclosed { what: String },

    #[error("stack underflow: {op} needs {needed} cell(s)")]
    StackUnderflow { op: String, needed: usize },

    #[error("return-stack underflow: {op}")]
    ReturnStackUnderflow { op: String },

    #[error("invalid opcode byte 0x{0:02x}")]
    InvalidOpcode(u8),

    #[error("type error: {detail}")]
    Type { detail: String },

    #[error("bounds error: {detail}")]
    Bounds { detail: String },

    #[error("invariant violated: {detail}")]
    Invariant { detail: String },
}

/// Convenience alias used throughout the interpreter and compiler.
pub type VmResult<T> = Result<T, VmError>;
