//! Call frames.
//!
//! Frames live in an index-addressable vector; every cross-frame reference
//! is an integer index, never a pointer, so the vector may grow freely. A
//! frame executing yielded block code is a value copy of the def frame that
//! owns the block, with the block's instructions, nodes, and ip swapped in;
//! both share the same `stack_bottom`, so block writes to locals are
//! observable in the enclosing def.

use std::sync::Arc;

use icr_core::NodeMap;

use crate::callable::CompiledDef;
use crate::op::Instructions;

#[derive(Clone, Debug)]
pub struct CallFrame {
    /// The def this frame belongs to (a block frame keeps its owner def).
    pub def: Arc<CompiledDef>,
    /// Executing instructions; overridden with the block's on yield.
    pub instructions: Instructions,
    pub nodes: Arc<NodeMap>,
    /// Instruction pointer, current only while the frame is suspended.
    pub ip: usize,
    /// Stack top, current only while the frame is suspended.
    pub stack: usize,
    /// Where this frame's locals begin.
    pub stack_bottom: usize,
    /// Index of the def frame that supplied the block being called, when
    /// this frame's def received one; `None` otherwise.
    pub block_caller_frame_index: Option<usize>,
    /// Index of the original (non-yield-copied) frame of the executing def.
    /// Non-local return unwinds to this index.
    pub real_frame_index: usize,
}

impl CallFrame {
    /// Frame for entering `def` at instruction 0.
    pub fn enter(
        def: Arc<CompiledDef>,
        stack_bottom: usize,
        real_frame_index: usize,
        block_caller_frame_index: Option<usize>,
    ) -> Self {
        let stack = stack_bottom + def.max_bytesize();
        Self {
            instructions: def.instructions.clone(),
            nodes: def.nodes.clone(),
            def,
            ip: 0,
            stack,
            stack_bottom,
            block_caller_frame_index,
            real_frame_index,
        }
    }
}
