//! icr virtual machine
//!
//! The bytecode interpreter core for the icr REPL. It executes a linear
//! stream of typed instructions against a raw, byte-addressable value
//! stack, supports calls with blocks (including non-local `return` and
//! `break`), bridges out to native C functions and back in through closure
//! callbacks, migrates persisted REPL locals across re-entries, and hosts
//! the pry debugger.
//!
//! # Architecture
//!
//! The interpreter handles:
//! - Stack management (aligned push/pop over a fixed byte buffer)
//! - The dispatch loop over the closed opcode table
//! - Call frames for plain calls, calls with blocks, and yielded blocks
//! - Local-variable layouts and REPL re-entry migration
//! - Constants and class-vars pools with once-only initialization
//! - The FFI out-call bridge and inbound closure callbacks
//! - Pry re-entry over the live stack
//!
//! Compilation is delegated to the `Compiler` trait; the front end (or a
//! test) supplies compiled bodies, and the interpreter owns execution.
//!
//! # Example
//!
//! ```ignore
//! use icr_vm::{Context, Interpreter};
//!
//! let context = Arc::new(Context::new());
//! let mut interpreter = Interpreter::new(context);
//!
//! // Compile and run one REPL line against the persisted locals.
//! let value = interpreter.interpret(&node, meta_vars, &compiler)?;
//! ```

mod atomics;
mod callable;
mod compiler;
mod context;
mod error;
mod ffi;
mod frame;
mod interpreter;
mod local_vars;
mod migration;
mod op;
mod pry;
mod stack;
mod value;

// Re-export public types
pub use atomics::{atomic_cmpxchg, atomic_rmw, RmwOp};
pub use callable::{BlockId, CompiledBlock, CompiledDef, DefId};
pub use compiler::Compiler;
pub use context::{Context, Pool, OFFSET_FROM_INITIALIZED, TYPE_ID_HEADER_BYTESIZE};
pub use error::InterpretError;
pub use ffi::{LibFnId, LibFunction, NativeCall, NativeFn, ProcCallInterface, MAX_LIB_ARGS};
pub use frame::CallFrame;
pub use interpreter::{Interpreter, PROGRAM_NAME};
pub use local_vars::{LocalVar, LocalVarLayout};
pub use op::{disassemble, Instructions, InstructionsBuilder, Op, OperandKind, Patch};
pub use pry::PryIo;
pub use stack::{align, ValueStack, ALIGNMENT, DEFAULT_CAPACITY};
pub use value::Value;
