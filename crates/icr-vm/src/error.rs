//! Interpreter errors.
//!
//! Only recoverable, caller-facing failures are represented here. Invariant
//! violations (stack underflow, negative clear widths, invalid RMW widths,
//! exceeding the FFI argument cap) abort the interpreter instance with a
//! `BUG:` panic, and non-widenable local-var migrations abort with both
//! type names; callers may start a fresh interpreter against the same
//! context afterwards. The dispatch loop itself never catches — only the
//! pry REPL does.

use thiserror::Error;

use icr_core::CompileError;

#[derive(Debug, Error)]
pub enum InterpretError {
    #[error(transparent)]
    Compile(#[from] CompileError),
}
