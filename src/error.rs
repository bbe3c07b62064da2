use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Address out of bounds: {address} (+{len} bytes)")]
    OutOfBounds { address: i64, len: usize },
    #[error("Stack overflow: {needed} bytes needed, {available} available")]
    StackOverflow { needed: usize, available: usize },
    #[error("Could not find null terminator for string at {0}")]
    UnterminatedString(usize),
    #[error("Not a valid register \"{0}\"")]
    InvalidRegister(String),
    #[error("Register \"{0}\" is read-only")]
    ReadOnlyRegister(String),
    #[error("Value {0} is outside the 32-bit signed integer range")]
    RegisterOverflow(i64),
    #[error("Unrecognized operand: {0}")]
    InvalidOperand(String),
    #[error("Numeric operand is not an integer: {0}")]
    NotAnInteger(String),
    #[error("String contains a null byte")]
    InteriorNul,
    #[error("Cannot pass register name {0} as a value")]
    CannotUseRegisterNameAsValue(String),
    #[error("Unrecognized instruction \"{0}\"")]
    UnknownInstruction(String),
    #[error("Instruction {instruction} expects {expected} arguments, got {actual}")]
    ArityMismatch {
        instruction: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Instruction {instruction} expected {expected} but got {actual}")]
    TypeMismatch {
        instruction: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,
    #[error("line {line}: {source}")]
    AtLine { line: usize, source: Box<Error> },
}
