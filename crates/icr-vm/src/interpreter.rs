//! The interpreter: dispatch loop, call-frame protocol, and driver.
//!
//! One interpreter instance is single-threaded and owns its value stack and
//! frame stack. The loop keeps the executing frame's `ip`, instructions,
//! nodes, and `stack_bottom` in pinned local copies; frames only see
//! up-to-date values when they are suspended by a call or restored by a
//! leave.

use std::ptr;
use std::sync::Arc;

use smallvec::SmallVec;

use icr_core::{MetaVars, Node, NodeMap};

use crate::atomics::{atomic_cmpxchg, atomic_rmw, RmwOp};
use crate::callable::{BlockId, CompiledBlock, CompiledDef, DefId};
use crate::compiler::Compiler;
use crate::context::Context;
use crate::error::InterpretError;
use crate::ffi::{FfiClosureContext, LibFnId, ProcCallInterface, MAX_LIB_ARGS};
use crate::frame::CallFrame;
use crate::local_vars::LocalVarLayout;
use crate::migration;
use crate::op::{disassemble, Instructions, Op};
use crate::pry::{self, PryIo};
use crate::stack::{align, ValueStack};
use crate::value::Value;

/// argv[0] of the interpreted program.
pub const PROGRAM_NAME: &str = "icr";

/// Pinned copies of the executing frame's fields. Handlers must go through
/// these; the frame record itself is stale while the frame runs.
pub(crate) struct Cached {
    pub(crate) ip: usize,
    pub(crate) instructions: Instructions,
    pub(crate) nodes: Arc<NodeMap>,
    pub(crate) stack_bottom: usize,
}

impl Cached {
    fn from_frame(frame: &CallFrame) -> Self {
        Self {
            ip: frame.ip,
            instructions: frame.instructions.clone(),
            nodes: frame.nodes.clone(),
            stack_bottom: frame.stack_bottom,
        }
    }

    fn u32(&mut self) -> u32 {
        let v = self.instructions.read_u32(self.ip);
        self.ip += 4;
        v
    }

    fn u64(&mut self) -> u64 {
        let v = self.instructions.read_u64(self.ip);
        self.ip += 8;
        v
    }

    fn i32(&mut self) -> i32 {
        let v = self.instructions.read_i32(self.ip);
        self.ip += 4;
        v
    }

    fn i64(&mut self) -> i64 {
        let v = self.instructions.read_i64(self.ip);
        self.ip += 8;
        v
    }

    fn f64(&mut self) -> f64 {
        let v = self.instructions.read_f64(self.ip);
        self.ip += 8;
        v
    }
}

pub struct Interpreter {
    pub(crate) context: Arc<Context>,
    pub(crate) stack: ValueStack,
    pub(crate) call_stack: Vec<CallFrame>,
    /// Layout of the persisted top-level locals (survives across REPL runs).
    pub(crate) local_vars: LocalVarLayout,
    pub(crate) block_level: usize,

    /// Stack snapshot taken at each FFI out-call; inbound callbacks build
    /// their frames above it.
    pub(crate) stack_top: usize,

    /// Print each dispatch step with a stack hex dump.
    pub tracing: bool,
    /// Dump the disassembly of each compiled body before running it.
    pub decompile: bool,
    /// Count executed instructions and calls.
    pub stats: bool,
    stats_instructions: u64,
    stats_calls: u64,

    pub(crate) pry: bool,
    pub(crate) pry_node: Option<Node>,
    pub(crate) pry_max_target_frame: Option<i64>,
    pub(crate) pry_io: Option<PryIo>,

    argv: Vec<String>,
    argv_pointers: Vec<*const u8>,
    argv_storage: Vec<Box<[u8]>>,
}

impl Interpreter {
    pub fn new(context: Arc<Context>) -> Self {
        Self::with_stack(context, ValueStack::new(), 0)
    }

    pub(crate) fn with_stack(context: Arc<Context>, stack: ValueStack, block_level: usize) -> Self {
        Self {
            context,
            stack,
            call_stack: Vec::new(),
            local_vars: LocalVarLayout::new(),
            block_level,
            stack_top: 0,
            tracing: false,
            decompile: false,
            stats: false,
            stats_instructions: 0,
            stats_calls: 0,
            pry: false,
            pry_node: None,
            pry_max_target_frame: None,
            pry_io: None,
            argv: Vec::new(),
            argv_pointers: Vec::new(),
            argv_storage: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Arguments exposed to the interpreted program (after the implicit
    /// program name).
    pub fn set_argv(&mut self, argv: Vec<String>) {
        self.argv = argv;
        self.argv_pointers.clear();
        self.argv_storage.clear();
    }

    /// Arm the pry debugger as if a `pry` instruction had executed.
    pub fn arm_pry(&mut self) {
        self.pry = true;
    }

    /// Replace pry's terminal with scripted input/output.
    pub fn set_pry_io(&mut self, io: PryIo) {
        self.pry_io = Some(io);
    }

    pub fn instructions_executed(&self) -> u64 {
        self.stats_instructions
    }

    /// Number of live call frames. Zero between top-level invocations.
    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// Bytes currently occupied on the value stack. Between invocations
    /// this is exactly the persisted locals region.
    pub fn stack_bytes_in_use(&self) -> usize {
        self.stack.top()
    }

    pub fn calls_executed(&self) -> u64 {
        self.stats_calls
    }

    /// Layout of the persisted top-level locals.
    pub fn local_vars(&self) -> &LocalVarLayout {
        &self.local_vars
    }

    /// Bytes of a persisted local, for inspection after a run.
    pub fn local_bytes(&self, name: &str) -> Option<&[u8]> {
        let var = self.local_vars.get(name)?;
        let size = self.context.aligned_sizeof_type(&var.typ);
        Some(self.stack.read_bytes(var.offset, size))
    }

    // ========================================================================
    // Driver
    // ========================================================================

    /// Compile and execute one top-level invocation, preserving the locals
    /// of previous invocations on the stack.
    pub fn interpret(
        &mut self,
        node: &Node,
        meta_vars: MetaVars,
        compiler: &dyn Compiler,
    ) -> Result<Value, InterpretError> {
        self.context.prepare_pools();
        migration::migrate_local_vars(self, &meta_vars);

        let mut local_vars = LocalVarLayout::from_meta_vars(&meta_vars, &self.context);
        let def = compiler.compile(&self.context, &mut local_vars, node, self.block_level)?;
        self.local_vars = def.local_vars.clone();

        Ok(self.run_compiled(def, compiler))
    }

    /// Execute an already-compiled body over the current locals. The pry
    /// REPL drives its child interpreter through this.
    pub(crate) fn run_compiled(&mut self, def: Arc<CompiledDef>, compiler: &dyn Compiler) -> Value {
        if self.decompile {
            eprintln!("{}", disassemble(&def.instructions, &def.nodes));
        }

        let base = self.call_stack.len();
        let frame = CallFrame::enter(def.clone(), 0, base, None);
        self.stack.set_top(frame.stack);
        self.call_stack.push(frame);

        let returned = self.run(base, Some(compiler));
        Value::decode(&returned, &def.return_type, &self.context)
    }

    // ========================================================================
    // Dispatch loop
    // ========================================================================

    fn run(&mut self, base: usize, compiler: Option<&dyn Compiler>) -> Box<[u8]> {
        let top_frame = match self.call_stack.last() {
            Some(frame) => frame,
            None => panic!("BUG: run with an empty frame stack"),
        };
        let mut cached = Cached::from_frame(top_frame);

        loop {
            if self.tracing {
                self.trace(&cached);
            }
            if self.pry {
                if let Some(compiler) = compiler {
                    pry::check(self, &cached, compiler);
                }
            }
            if self.stats {
                self.stats_instructions += 1;
            }

            let op = Op::from_byte(cached.instructions.read_u8(cached.ip));
            cached.ip += 1;

            match op {
                // ------------------------------------------------ literals
                Op::PutNil => {}
                Op::PutFalse => self.stack.push(false),
                Op::PutTrue => self.stack.push(true),
                Op::PutI32 => {
                    let v = cached.i32();
                    self.stack.push(v);
                }
                Op::PutI64 => {
                    let v = cached.i64();
                    self.stack.push(v);
                }
                Op::PutF64 => {
                    let v = cached.f64();
                    self.stack.push(v);
                }
                Op::PutPtr => {
                    let v = cached.u64();
                    self.stack.push(v);
                }

                // ------------------------------------------------ shuffling
                Op::Pop => {
                    let size = cached.u32() as usize;
                    self.stack.shrink_by(size);
                }
                Op::Dup => {
                    let size = cached.u32() as usize;
                    let src = self.stack.top() - align(size);
                    let src = self.stack.pointer_at(src);
                    self.stack.move_from(src, size);
                }

                // ------------------------------------------------ locals
                Op::GetLocal => {
                    let index = cached.u32() as usize;
                    let size = cached.u32() as usize;
                    let src = self.stack.pointer_at(cached.stack_bottom + index);
                    self.stack.move_from(src, size);
                }
                Op::SetLocal => {
                    let index = cached.u32() as usize;
                    let size = cached.u32() as usize;
                    let dst = self.stack.pointer_at(cached.stack_bottom + index);
                    self.stack.move_to(dst, size);
                }
                Op::GetLocalPointer => {
                    let index = cached.u32() as usize;
                    let pointer = self.stack.pointer_at(cached.stack_bottom + index);
                    self.stack.push(pointer as u64);
                }

                // ------------------------------------------------ ivars
                Op::GetIvarPointer => {
                    let offset = cached.u32() as u64;
                    // self is the local at index 0
                    let bytes = self.stack.read_bytes(cached.stack_bottom, 8);
                    let self_pointer = u64::from_le_bytes(bytes.try_into().unwrap());
                    self.stack.push(self_pointer + offset);
                }

                // ------------------------------------------------ constants
                Op::ConstInitialized => {
                    let index = cached.u32() as usize;
                    let was = self.context.constants().test_and_set_initialized(index);
                    self.stack.push(was);
                }
                Op::GetConst => {
                    let index = cached.u32() as usize;
                    let size = cached.u32() as usize;
                    let src = self.context.constants().pointer_at(index);
                    self.stack.move_from(src, size);
                }
                Op::SetConst => {
                    let index = cached.u32() as usize;
                    let size = cached.u32() as usize;
                    let dst = self.context.constants().pointer_at(index);
                    self.stack.move_to(dst, size);
                }
                Op::GetConstPointer => {
                    let index = cached.u32() as usize;
                    let pointer = self.context.constants().pointer_at(index);
                    self.stack.push(pointer as u64);
                }

                // ------------------------------------------------ class vars
                Op::ClassVarInitialized => {
                    let index = cached.u32() as usize;
                    let was = self.context.class_vars().test_and_set_initialized(index);
                    self.stack.push(was);
                }
                Op::GetClassVar => {
                    let index = cached.u32() as usize;
                    let size = cached.u32() as usize;
                    let src = self.context.class_vars().pointer_at(index);
                    self.stack.move_from(src, size);
                }
                Op::SetClassVar => {
                    let index = cached.u32() as usize;
                    let size = cached.u32() as usize;
                    let dst = self.context.class_vars().pointer_at(index);
                    self.stack.move_to(dst, size);
                }
                Op::GetClassVarPointer => {
                    let index = cached.u32() as usize;
                    let pointer = self.context.class_vars().pointer_at(index);
                    self.stack.push(pointer as u64);
                }

                // ------------------------------------------------ pointers
                Op::PointerGet => {
                    let size = cached.u32() as usize;
                    let pointer = self.stack.pop::<u64>();
                    self.stack.move_from(pointer as *const u8, size);
                }
                Op::PointerSet => {
                    let size = cached.u32() as usize;
                    let value = self.stack.pop_bytes(size);
                    let pointer = self.stack.pop::<u64>();
                    unsafe {
                        ptr::copy_nonoverlapping(value.as_ptr(), pointer as *mut u8, size);
                    }
                }

                // ------------------------------------------------ control flow
                Op::SetIp => {
                    cached.ip = cached.u32() as usize;
                }
                Op::BranchIf => {
                    let target = cached.u32() as usize;
                    if self.stack.pop::<bool>() {
                        cached.ip = target;
                    }
                }
                Op::BranchUnless => {
                    let target = cached.u32() as usize;
                    if !self.stack.pop::<bool>() {
                        cached.ip = target;
                    }
                }

                // ------------------------------------------------ arithmetic
                Op::AddI32 => self.binary_i32(|a, b| a.wrapping_add(b)),
                Op::SubI32 => self.binary_i32(|a, b| a.wrapping_sub(b)),
                Op::MulI32 => self.binary_i32(|a, b| a.wrapping_mul(b)),
                Op::LtI32 => self.compare_i32(|a, b| a < b),
                Op::LeI32 => self.compare_i32(|a, b| a <= b),
                Op::EqI32 => self.compare_i32(|a, b| a == b),
                Op::AddI64 => {
                    let b = self.stack.pop::<i64>();
                    let a = self.stack.pop::<i64>();
                    self.stack.push(a.wrapping_add(b));
                }
                Op::EqI64 => {
                    let b = self.stack.pop::<i64>();
                    let a = self.stack.pop::<i64>();
                    self.stack.push(a == b);
                }
                Op::AddF64 => {
                    let b = self.stack.pop::<f64>();
                    let a = self.stack.pop::<f64>();
                    self.stack.push(a + b);
                }
                Op::MulF64 => {
                    let b = self.stack.pop::<f64>();
                    let a = self.stack.pop::<f64>();
                    self.stack.push(a * b);
                }
                Op::I32ToF64 => {
                    let v = self.stack.pop::<i32>();
                    self.stack.push(v as f64);
                }

                // ------------------------------------------------ calls
                Op::Call => {
                    let def = self.context.def(DefId(cached.u64()));
                    self.begin_call(def, false, &mut cached);
                }
                Op::CallWithBlock => {
                    let def = self.context.def(DefId(cached.u64()));
                    self.begin_call(def, true, &mut cached);
                }
                Op::CallBlock => {
                    let block = self.context.block(BlockId(cached.u64()));
                    self.begin_call_block(block, &mut cached);
                }
                Op::LibCall => {
                    let id = LibFnId(cached.u64());
                    self.lib_call(id);
                }
                Op::Leave => {
                    let size = cached.u32() as usize;
                    if self.call_stack.pop().is_none() {
                        panic!("BUG: leave with an empty frame stack");
                    }
                    if let Some(value) = self.finish_leave(size, base, &mut cached) {
                        return value;
                    }
                }
                Op::LeaveDef => {
                    let size = cached.u32() as usize;
                    let frame = match self.call_stack.pop() {
                        Some(frame) => frame,
                        None => panic!("BUG: leave_def with an empty frame stack"),
                    };
                    self.unwind_to(frame.real_frame_index, base);
                    if let Some(value) = self.finish_leave(size, base, &mut cached) {
                        return value;
                    }
                }
                Op::BreakBlock => {
                    let size = cached.u32() as usize;
                    let frame = match self.call_stack.pop() {
                        Some(frame) => frame,
                        None => panic!("BUG: break_block with an empty frame stack"),
                    };
                    self.unwind_to(frame.real_frame_index + 1, base);
                    if let Some(value) = self.finish_leave(size, base, &mut cached) {
                        return value;
                    }
                }

                // ------------------------------------------------ atomics
                Op::AtomicAdd => self.atomic(RmwOp::Add, &mut cached),
                Op::AtomicSub => self.atomic(RmwOp::Sub, &mut cached),
                Op::AtomicAnd => self.atomic(RmwOp::And, &mut cached),
                Op::AtomicOr => self.atomic(RmwOp::Or, &mut cached),
                Op::AtomicXor => self.atomic(RmwOp::Xor, &mut cached),
                Op::AtomicMin => self.atomic(RmwOp::Min, &mut cached),
                Op::AtomicMax => self.atomic(RmwOp::Max, &mut cached),
                Op::AtomicXchg => self.atomic(RmwOp::Xchg, &mut cached),
                Op::AtomicCmpxchg => {
                    let size = cached.u32() as usize;
                    let desired = self.pop_scalar(size);
                    let expected = self.pop_scalar(size);
                    let pointer = self.stack.pop::<u64>();
                    let previous =
                        unsafe { atomic_cmpxchg(pointer as *mut u8, expected, desired, size) };
                    self.push_scalar(previous, size);
                }

                // ------------------------------------------------ argv shim
                Op::PutArgc => {
                    let argc = (self.argv.len() + 1) as i32;
                    self.stack.push(argc);
                }
                Op::PutArgv => {
                    let pointer = self.argv_pointer();
                    self.stack.push(pointer);
                }

                // ------------------------------------------------ debugger
                Op::Pry => {
                    self.pry = true;
                }
            }
        }
    }

    // ========================================================================
    // Call protocol
    // ========================================================================

    fn begin_call(&mut self, def: Arc<CompiledDef>, with_block: bool, cached: &mut Cached) {
        let stack_before_args = self.stack.top() - def.args_bytesize;

        // Reserve and clear the callee's locals beyond the args. A clear
        // region with negative width aborts inside zero_range.
        self.stack.zero_range(
            stack_before_args + def.args_bytesize,
            stack_before_args + def.max_bytesize(),
        );

        let caller_index = self.call_stack.len() - 1;
        {
            let caller = &mut self.call_stack[caller_index];
            caller.ip = cached.ip;
            caller.stack = stack_before_args;
        }

        let real_frame_index = self.call_stack.len();
        let block_caller = if with_block { Some(caller_index) } else { None };
        let frame = CallFrame::enter(def, stack_before_args, real_frame_index, block_caller);
        self.stack.set_top(frame.stack);
        *cached = Cached::from_frame(&frame);
        self.call_stack.push(frame);

        if self.stats {
            self.stats_calls += 1;
        }
    }

    fn begin_call_block(&mut self, block: Arc<CompiledBlock>, cached: &mut Cached) {
        let stack_before_args = self.stack.top() - block.args_bytesize;

        let yielding_index = self.call_stack.len() - 1;
        let block_caller = match self.call_stack[yielding_index].block_caller_frame_index {
            Some(index) => index,
            None => panic!("BUG: call_block in a frame that was not given a block"),
        };

        {
            let yielding = &mut self.call_stack[yielding_index];
            yielding.ip = cached.ip;
            yielding.stack = stack_before_args;
        }

        // The block executes in a copy of the frame that owns it: same
        // stack_bottom (so it reads and writes the owner's locals), same
        // real_frame_index (so non-local return still targets the owner),
        // but the block's code.
        let mut frame = self.call_stack[block_caller].clone();
        frame.instructions = block.instructions.clone();
        frame.nodes = block.nodes.clone();
        frame.ip = 0;

        // The yielded expressions become the block's arguments.
        if block.args_bytesize > 0 {
            let args_dst = frame.stack_bottom + block.locals_bytesize_start;
            let args_dst = self.stack.pointer_at(args_dst);
            self.stack.move_to(args_dst, block.args_bytesize);
        }
        frame.stack = self.stack.top();

        self.stack.zero_range(
            frame.stack_bottom + block.locals_bytesize_start + block.args_bytesize,
            frame.stack_bottom + block.locals_bytesize_end,
        );

        *cached = Cached::from_frame(&frame);
        self.call_stack.push(frame);
    }

    /// Pop frames down to `target` after the initial pop of a non-local
    /// leave.
    fn unwind_to(&mut self, target: usize, base: usize) {
        if target < base {
            panic!("BUG: non-local return unwound past the run's entry frame");
        }
        self.call_stack.truncate(target);
    }

    /// Shared tail of the three leave flavors. The leaving frame(s) have
    /// already been popped; the return value sits on the abandoned top.
    /// Returns `Some(buffer)` when the run's base depth was reached.
    fn finish_leave(&mut self, size: usize, base: usize, cached: &mut Cached) -> Option<Box<[u8]>> {
        let value = self.stack.pop_bytes(size);

        if self.call_stack.len() == base {
            return Some(value);
        }

        let abandoned_top = self.stack.top();
        let frame = self.call_stack.last().unwrap();
        let caller_stack = frame.stack;
        *cached = Cached::from_frame(frame);

        self.stack.zero_range(caller_stack, abandoned_top);
        self.stack.set_top(caller_stack);
        self.stack.push_bytes(&value);
        None
    }

    // ========================================================================
    // FFI out-call bridge
    // ========================================================================

    fn lib_call(&mut self, id: LibFnId) {
        let interpreter_ptr = self as *mut Interpreter;
        let function = self.context.lib_function(id);
        let count = function.arg_bytesizes.len();
        if count > MAX_LIB_ARGS {
            panic!(
                "BUG: lib call with {} arguments exceeds the cap of {}",
                count, MAX_LIB_ARGS
            );
        }

        let top = self.stack.top();
        let mut arg_pointers: SmallVec<[*mut u8; 16]> =
            SmallVec::from_elem(ptr::null_mut(), count);
        let mut offset = 0;
        for i in (0..count).rev() {
            offset += align(function.arg_bytesizes[i]);
            arg_pointers[i] = self.stack.pointer_at(top - offset);
        }

        // Procedure arguments become native callback handles, exactly here.
        for (i, proc_arg) in function.proc_args.iter().enumerate() {
            let interface = match proc_arg {
                Some(interface) => interface,
                None => continue,
            };
            let slot = arg_pointers[i];
            let def_id = unsafe { ptr::read(slot as *const u64) };
            let closure_data = unsafe { ptr::read(slot.add(8) as *const u64) };
            if closure_data != 0 {
                panic!("passing closures to C is not supported");
            }
            let handle = self.context.ffi_closures().acquire_comparator(FfiClosureContext {
                interpreter: interpreter_ptr,
                def_id: DefId(def_id),
                interface: interface.clone(),
            });
            unsafe {
                ptr::write(slot as *mut u64, handle as usize as u64);
            }
        }

        // Inbound callbacks continue the stack from here.
        self.stack_top = top;

        let ret = self.stack.pointer_at(top);
        unsafe {
            function.call.invoke(function.fn_ptr, &arg_pointers, ret);
        }
        self.stack.set_top(self.stack_top);

        // Compact: the raw return bytes replace the argument region.
        let return_bytesize = function.return_bytesize;
        let value: SmallVec<[u8; 16]> =
            SmallVec::from_slice(self.stack.read_bytes(top, return_bytesize));
        self.stack
            .zero_range(top - offset, top + align(return_bytesize));
        self.stack.set_top(top - offset);
        self.stack.push_bytes(&value);
    }

    /// Inbound closure entry: native code invoked a wrapped procedure.
    /// Builds a fresh call above the `stack_top` snapshot, runs it to its
    /// matching leave, and hands the returned bytes to the native caller.
    pub(crate) fn enter_closure(
        &mut self,
        def_id: DefId,
        interface: &ProcCallInterface,
        args: &[*const u8],
        ret: *mut u8,
    ) {
        let def = self.context.def(def_id);
        let base = self.call_stack.len();
        let entry_top = self.stack_top;

        self.stack.set_top(entry_top);
        for (&arg, &size) in args.iter().zip(interface.arg_bytesizes.iter()) {
            self.stack.move_from(arg, size);
        }

        let stack_before_args = self.stack.top() - def.args_bytesize;
        self.stack.zero_range(
            stack_before_args + def.args_bytesize,
            stack_before_args + def.max_bytesize(),
        );

        let frame = CallFrame::enter(def, stack_before_args, base, None);
        self.stack.set_top(frame.stack);
        self.call_stack.push(frame);

        let value = self.run(base, None);
        unsafe {
            ptr::copy_nonoverlapping(
                value.as_ptr(),
                ret,
                interface.return_bytesize.min(value.len()),
            );
        }

        // Wipe the scratch region the callback used above the snapshot.
        let dirty_top = self.stack.top();
        self.stack.zero_range(entry_top, dirty_top);
        self.stack.set_top(entry_top);
        self.stack_top = entry_top;
    }

    // ========================================================================
    // Small helpers
    // ========================================================================

    fn binary_i32(&mut self, f: impl FnOnce(i32, i32) -> i32) {
        let b = self.stack.pop::<i32>();
        let a = self.stack.pop::<i32>();
        self.stack.push(f(a, b));
    }

    fn compare_i32(&mut self, f: impl FnOnce(i32, i32) -> bool) {
        let b = self.stack.pop::<i32>();
        let a = self.stack.pop::<i32>();
        self.stack.push(f(a, b));
    }

    fn atomic(&mut self, op: RmwOp, cached: &mut Cached) {
        let size = cached.u32() as usize;
        let operand = self.pop_scalar(size);
        let pointer = self.stack.pop::<u64>();
        let previous = unsafe { atomic_rmw(op, pointer as *mut u8, operand, size) };
        self.push_scalar(previous, size);
    }

    fn pop_scalar(&mut self, size: usize) -> u64 {
        match size {
            1 => self.stack.pop::<u8>() as u64,
            2 => self.stack.pop::<u16>() as u64,
            4 => self.stack.pop::<u32>() as u64,
            8 => self.stack.pop::<u64>(),
            _ => panic!("BUG: atomicrmw with invalid operand width {}", size),
        }
    }

    fn push_scalar(&mut self, value: u64, size: usize) {
        match size {
            1 => self.stack.push(value as u8),
            2 => self.stack.push(value as u16),
            4 => self.stack.push(value as u32),
            8 => self.stack.push(value),
            _ => panic!("BUG: atomicrmw with invalid operand width {}", size),
        }
    }

    fn argv_pointer(&mut self) -> u64 {
        if self.argv_pointers.is_empty() {
            let mut storage = Vec::with_capacity(self.argv.len() + 1);
            let mut pointers = Vec::with_capacity(self.argv.len() + 1);
            let names = std::iter::once(PROGRAM_NAME).chain(self.argv.iter().map(String::as_str));
            for name in names {
                let mut bytes = Vec::with_capacity(name.len() + 1);
                bytes.extend_from_slice(name.as_bytes());
                bytes.push(0);
                let boxed = bytes.into_boxed_slice();
                pointers.push(boxed.as_ptr());
                storage.push(boxed);
            }
            self.argv_storage = storage;
            self.argv_pointers = pointers;
        }
        self.argv_pointers.as_ptr() as u64
    }

    fn trace(&self, cached: &Cached) {
        let frame_index = self.call_stack.len() - 1;
        let op = Op::from_byte(cached.instructions.read_u8(cached.ip));
        let live = self
            .stack
            .read_bytes(cached.stack_bottom, self.stack.top() - cached.stack_bottom);
        let mut dump = String::with_capacity(live.len() * 3);
        for (i, byte) in live.iter().enumerate() {
            if i > 0 && i % 8 == 0 {
                dump.push(' ');
            }
            dump.push_str(&format!("{:02x}", byte));
        }
        eprintln!(
            "[{}] {:6} {:20} stack {}",
            frame_index,
            cached.ip,
            op.name(),
            dump
        );
    }
}
