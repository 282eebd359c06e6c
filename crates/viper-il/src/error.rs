//! Failure modes for textual I/O (§4.3) and the builder (§4.6).

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("bad version header: {0:?}")]
    BadVersion(String),

    #[error("unknown opcode: opcode#{token}")]
    UnknownOpcode { token: String },

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("arity mismatch: expected {expected}, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("undefined label: {0}")]
    UndefinedLabel(String),

    #[error("undefined symbol: {0}")]
    UndefinedSymbol(String),

    #[error("duplicate definition: {0}")]
    DuplicateDefinition(String),

    #[error("malformed literal: {0}")]
    MalformedLiteral(String),

    #[error("unexpected token at line {line}: {message}")]
    Syntax { line: u32, message: String },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BuilderError {
    #[error("conflicting extern declaration for {name}")]
    DuplicateDefinition { name: String },

    #[error("block label {label} already exists in function {function}")]
    DuplicateLabel { function: String, label: String },

    #[error("cannot emit into {block}: terminator already written")]
    BlockAlreadyTerminated { block: String },

    #[error("cannot emit a terminator where a value instruction was expected")]
    NotATerminator,

    #[error("no active insertion point")]
    NoInsertPoint,
}
