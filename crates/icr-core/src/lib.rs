//! Core types for the icr interpreter.
//!
//! This crate provides foundational types used throughout the interpreter
//! and its collaborators:
//! - Static types and type IDs
//! - Source locations and AST node handles
//! - Bytecode-offset to node mapping
//! - Meta-vars (the semantic analyzer's view of local variables)
//! - Compile diagnostics

pub mod error;
pub mod meta;
pub mod node;
pub mod types;

// Re-export commonly used types at crate root
pub use error::CompileError;
pub use meta::MetaVars;
pub use node::{Loc, Node, NodeMap};
pub use types::{Type, TypeId, TypeList};
