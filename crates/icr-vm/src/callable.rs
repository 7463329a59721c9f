//! Compiled callables: defs and blocks.
//!
//! A compiled callable pairs an instruction stream with the layout of the
//! locals it executes over. Callables are registered in the [`Context`] and
//! addressed by dense integer ids; the id is also the wire representation
//! of a procedure value on the stack.
//!
//! [`Context`]: crate::context::Context

use std::fmt;
use std::sync::Arc;

use icr_core::{NodeMap, Type, TypeId};

use crate::local_vars::LocalVarLayout;
use crate::op::Instructions;

/// Registry id of a [`CompiledDef`]. The `u64` form is the on-stack wire
/// representation of the procedure (paired with a closure-data word).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct DefId(pub u64);

/// Registry id of a [`CompiledBlock`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct BlockId(pub u64);

impl fmt::Display for DefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "def#{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

/// A compiled def (or a top-level body, which is compiled as one).
#[derive(Debug)]
pub struct CompiledDef {
    /// Enclosing type, when the def is a method.
    pub owner: Option<TypeId>,
    pub name: String,
    /// Total bytes of argument data the caller leaves on the stack.
    pub args_bytesize: usize,
    pub local_vars: LocalVarLayout,
    pub instructions: Instructions,
    pub nodes: Arc<NodeMap>,
    pub return_type: Type,
}

impl CompiledDef {
    /// Bytes reserved past `stack_bottom` (args included).
    pub fn max_bytesize(&self) -> usize {
        self.local_vars.max_bytesize()
    }
}

/// A compiled block body. Executes in its owner def's frame; its own
/// locals occupy the `[locals_bytesize_start, locals_bytesize_end)`
/// sub-range of that frame's locals region.
#[derive(Debug)]
pub struct CompiledBlock {
    pub args_bytesize: usize,
    pub locals_bytesize_start: usize,
    pub locals_bytesize_end: usize,
    pub instructions: Instructions,
    pub nodes: Arc<NodeMap>,
}
