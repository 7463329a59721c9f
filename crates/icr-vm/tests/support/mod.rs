//! Shared helpers for the end-to-end interpreter tests.
//!
//! The tests stand in for the external compiler: bodies are hand-assembled
//! with `InstructionsBuilder` and handed to the interpreter through a
//! closure-backed `Compiler` implementation.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use icr_core::{CompileError, MetaVars, Node, NodeMap, Type};
use icr_vm::{
    Compiler, CompiledBlock, CompiledDef, Context, InstructionsBuilder, Interpreter,
    LocalVarLayout, Value,
};

type CompileFn =
    dyn Fn(&Arc<Context>, &mut LocalVarLayout, &Node, usize) -> Result<Arc<CompiledDef>, CompileError>;
type PryFn =
    dyn Fn(&Arc<Context>, &LocalVarLayout, &str, usize) -> Result<Arc<CompiledDef>, CompileError>;

/// A `Compiler` built from closures.
pub struct TestCompiler {
    compile: Box<CompileFn>,
    pry: Option<Box<PryFn>>,
}

impl TestCompiler {
    pub fn new(
        compile: impl Fn(&Arc<Context>, &mut LocalVarLayout, &Node, usize) -> Result<Arc<CompiledDef>, CompileError>
            + 'static,
    ) -> Self {
        Self {
            compile: Box::new(compile),
            pry: None,
        }
    }

    pub fn with_pry(
        mut self,
        pry: impl Fn(&Arc<Context>, &LocalVarLayout, &str, usize) -> Result<Arc<CompiledDef>, CompileError>
            + 'static,
    ) -> Self {
        self.pry = Some(Box::new(pry));
        self
    }
}

impl Compiler for TestCompiler {
    fn compile(
        &self,
        context: &Arc<Context>,
        local_vars: &mut LocalVarLayout,
        node: &Node,
        block_level: usize,
    ) -> Result<Arc<CompiledDef>, CompileError> {
        (self.compile)(context, local_vars, node, block_level)
    }

    fn compile_pry(
        &self,
        context: &Arc<Context>,
        local_vars: &LocalVarLayout,
        expr: &str,
        block_level: usize,
    ) -> Result<Arc<CompiledDef>, CompileError> {
        match &self.pry {
            Some(pry) => pry(context, local_vars, expr, block_level),
            None => Err(CompileError::syntax(format!("unexpected token '{}'", expr))),
        }
    }
}

/// Assemble a def.
pub fn build_def(
    name: &str,
    args_bytesize: usize,
    local_vars: LocalVarLayout,
    return_type: Type,
    build: impl FnOnce(&mut InstructionsBuilder),
) -> CompiledDef {
    let mut builder = InstructionsBuilder::new();
    build(&mut builder);
    let (instructions, nodes) = builder.finish();
    CompiledDef {
        owner: None,
        name: name.into(),
        args_bytesize,
        local_vars,
        instructions,
        nodes: Arc::new(nodes),
        return_type,
    }
}

/// Assemble a block body.
pub fn build_block(
    args_bytesize: usize,
    locals_bytesize_start: usize,
    locals_bytesize_end: usize,
    build: impl FnOnce(&mut InstructionsBuilder),
) -> CompiledBlock {
    let mut builder = InstructionsBuilder::new();
    build(&mut builder);
    let (instructions, nodes) = builder.finish();
    CompiledBlock {
        args_bytesize,
        locals_bytesize_start,
        locals_bytesize_end,
        instructions,
        nodes: Arc::new(nodes),
    }
}

/// Run a single pre-assembled body as one top-level invocation.
pub fn run_body(
    interpreter: &mut Interpreter,
    meta_vars: MetaVars,
    body: Arc<CompiledDef>,
) -> Value {
    let compiler = TestCompiler::new(move |_, _, _, _| Ok(body.clone()));
    interpreter
        .interpret(&Node::new("test body", None), meta_vars, &compiler)
        .expect("compilation cannot fail in tests")
}

/// Empty node map helper for defs assembled without nodes.
#[allow(dead_code)]
pub fn no_nodes() -> Arc<NodeMap> {
    Arc::new(NodeMap::new())
}
