//! The compiler collaborator seam.
//!
//! The interpreter never lowers an AST itself; it is generic over a
//! [`Compiler`] that turns a node (or a pry expression string) into a
//! compiled body against a given local-variable layout. Production wires
//! the real front end in here; tests hand-assemble instruction streams.

use std::sync::Arc;

use icr_core::{CompileError, Loc, MetaVars, Node};

use crate::callable::CompiledDef;
use crate::context::Context;
use crate::local_vars::LocalVarLayout;

pub trait Compiler {
    /// Lower `node` into a compiled top-level body. `local_vars` already
    /// holds the declared REPL locals; the compiler may declare more.
    fn compile(
        &self,
        context: &Arc<Context>,
        local_vars: &mut LocalVarLayout,
        node: &Node,
        block_level: usize,
    ) -> Result<Arc<CompiledDef>, CompileError>;

    /// Lower a pry expression against the locals visible at the stop
    /// location. The returned body executes in place over the suspended
    /// frame's locals.
    fn compile_pry(
        &self,
        context: &Arc<Context>,
        local_vars: &LocalVarLayout,
        expr: &str,
        block_level: usize,
    ) -> Result<Arc<CompiledDef>, CompileError>;

    /// Gather the locals visible at `loc` for a pry session. `None` means
    /// no semantic information is available and pry falls back to the
    /// suspended frame's own layout.
    fn gather_locals(&self, _loc: &Loc) -> Option<(MetaVars, usize)> {
        None
    }
}
