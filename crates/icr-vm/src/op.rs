//! The instruction set.
//!
//! Each instruction is one opcode byte followed by its operands in
//! little-endian encoding. The opcode table is closed: the schema below
//! (operand kinds and mnemonic per opcode) drives both the disassembler and
//! operand decoding, and the dispatch loop materializes the effects as a
//! dense match.

use std::fmt::Write as _;
use std::sync::Arc;

use icr_core::{Loc, Node, NodeMap};

/// Operand kinds an opcode can declare.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OperandKind {
    /// Unsigned 32-bit offset, index, or bytesize.
    U32,
    /// Unsigned 64-bit id or pointer literal.
    U64,
    /// Signed 32-bit literal.
    I32,
    /// Signed 64-bit literal.
    I64,
    /// 64-bit float literal.
    F64,
}

impl OperandKind {
    pub fn bytesize(self) -> usize {
        match self {
            OperandKind::U32 | OperandKind::I32 => 4,
            OperandKind::U64 | OperandKind::I64 | OperandKind::F64 => 8,
        }
    }
}

/// Opcodes. The discriminant is the wire byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    // Literals
    PutNil = 0,
    PutFalse,
    PutTrue,
    PutI32,
    PutI64,
    PutF64,
    PutPtr,

    // Stack shuffling
    Pop,
    Dup,

    // Local variables
    GetLocal,
    SetLocal,
    GetLocalPointer,

    // Instance variables
    GetIvarPointer,

    // Constants pool
    ConstInitialized,
    GetConst,
    SetConst,
    GetConstPointer,

    // Class vars pool
    ClassVarInitialized,
    GetClassVar,
    SetClassVar,
    GetClassVarPointer,

    // Pointers
    PointerGet,
    PointerSet,

    // Control flow
    SetIp,
    BranchIf,
    BranchUnless,

    // Arithmetic / comparison
    AddI32,
    SubI32,
    MulI32,
    LtI32,
    LeI32,
    EqI32,
    AddI64,
    EqI64,
    AddF64,
    MulF64,
    I32ToF64,

    // Calls
    Call,
    CallWithBlock,
    CallBlock,
    LibCall,
    Leave,
    LeaveDef,
    BreakBlock,

    // Atomic read-modify-write
    AtomicAdd,
    AtomicSub,
    AtomicAnd,
    AtomicOr,
    AtomicXor,
    AtomicMin,
    AtomicMax,
    AtomicXchg,
    AtomicCmpxchg,

    // Process shim
    PutArgc,
    PutArgv,

    // Debugger
    Pry,
}

impl Op {
    /// Decode a wire byte. Unknown bytes are an invariant violation in the
    /// instruction stream.
    pub fn from_byte(byte: u8) -> Op {
        if byte > Op::Pry as u8 {
            panic!("BUG: unknown opcode byte {:#x}", byte);
        }
        // The enum is repr(u8) and dense from 0..=Pry.
        unsafe { std::mem::transmute::<u8, Op>(byte) }
    }

    /// Declared operand kinds, in wire order.
    pub fn operands(self) -> &'static [OperandKind] {
        use OperandKind::*;
        match self {
            Op::PutNil | Op::PutFalse | Op::PutTrue => &[],
            Op::PutI32 => &[I32],
            Op::PutI64 => &[I64],
            Op::PutF64 => &[F64],
            Op::PutPtr => &[U64],

            Op::Pop | Op::Dup => &[U32],

            Op::GetLocal | Op::SetLocal => &[U32, U32],
            Op::GetLocalPointer => &[U32],
            Op::GetIvarPointer => &[U32],

            Op::ConstInitialized | Op::GetConstPointer => &[U32],
            Op::GetConst | Op::SetConst => &[U32, U32],
            Op::ClassVarInitialized | Op::GetClassVarPointer => &[U32],
            Op::GetClassVar | Op::SetClassVar => &[U32, U32],

            Op::PointerGet | Op::PointerSet => &[U32],

            Op::SetIp | Op::BranchIf | Op::BranchUnless => &[U32],

            Op::AddI32
            | Op::SubI32
            | Op::MulI32
            | Op::LtI32
            | Op::LeI32
            | Op::EqI32
            | Op::AddI64
            | Op::EqI64
            | Op::AddF64
            | Op::MulF64
            | Op::I32ToF64 => &[],

            Op::Call | Op::CallWithBlock | Op::CallBlock | Op::LibCall => &[U64],
            Op::Leave | Op::LeaveDef | Op::BreakBlock => &[U32],

            Op::AtomicAdd
            | Op::AtomicSub
            | Op::AtomicAnd
            | Op::AtomicOr
            | Op::AtomicXor
            | Op::AtomicMin
            | Op::AtomicMax
            | Op::AtomicXchg => &[U32],
            Op::AtomicCmpxchg => &[U32],

            Op::PutArgc | Op::PutArgv | Op::Pry => &[],
        }
    }

    /// Mnemonic used in traces and disassembly.
    pub fn name(self) -> &'static str {
        match self {
            Op::PutNil => "put_nil",
            Op::PutFalse => "put_false",
            Op::PutTrue => "put_true",
            Op::PutI32 => "put_i32",
            Op::PutI64 => "put_i64",
            Op::PutF64 => "put_f64",
            Op::PutPtr => "put_ptr",
            Op::Pop => "pop",
            Op::Dup => "dup",
            Op::GetLocal => "get_local",
            Op::SetLocal => "set_local",
            Op::GetLocalPointer => "get_local_pointer",
            Op::GetIvarPointer => "get_ivar_pointer",
            Op::ConstInitialized => "const_initialized",
            Op::GetConst => "get_const",
            Op::SetConst => "set_const",
            Op::GetConstPointer => "get_const_pointer",
            Op::ClassVarInitialized => "class_var_initialized",
            Op::GetClassVar => "get_class_var",
            Op::SetClassVar => "set_class_var",
            Op::GetClassVarPointer => "get_class_var_pointer",
            Op::PointerGet => "pointer_get",
            Op::PointerSet => "pointer_set",
            Op::SetIp => "set_ip",
            Op::BranchIf => "branch_if",
            Op::BranchUnless => "branch_unless",
            Op::AddI32 => "add_i32",
            Op::SubI32 => "sub_i32",
            Op::MulI32 => "mul_i32",
            Op::LtI32 => "lt_i32",
            Op::LeI32 => "le_i32",
            Op::EqI32 => "eq_i32",
            Op::AddI64 => "add_i64",
            Op::EqI64 => "eq_i64",
            Op::AddF64 => "add_f64",
            Op::MulF64 => "mul_f64",
            Op::I32ToF64 => "i32_to_f64",
            Op::Call => "call",
            Op::CallWithBlock => "call_with_block",
            Op::CallBlock => "call_block",
            Op::LibCall => "lib_call",
            Op::Leave => "leave",
            Op::LeaveDef => "leave_def",
            Op::BreakBlock => "break_block",
            Op::AtomicAdd => "atomicrmw_add",
            Op::AtomicSub => "atomicrmw_sub",
            Op::AtomicAnd => "atomicrmw_and",
            Op::AtomicOr => "atomicrmw_or",
            Op::AtomicXor => "atomicrmw_xor",
            Op::AtomicMin => "atomicrmw_min",
            Op::AtomicMax => "atomicrmw_max",
            Op::AtomicXchg => "atomicrmw_xchg",
            Op::AtomicCmpxchg => "atomicrmw_cmpxchg",
            Op::PutArgc => "put_argc",
            Op::PutArgv => "put_argv",
            Op::Pry => "pry",
        }
    }
}

/// An immutable instruction stream. Cheap to clone and share between
/// frames.
#[derive(Clone, Debug)]
pub struct Instructions {
    bytes: Arc<[u8]>,
}

impl Instructions {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn read_u8(&self, ip: usize) -> u8 {
        match self.bytes.get(ip) {
            Some(b) => *b,
            None => panic!("BUG: instruction read past end of stream at {}", ip),
        }
    }

    pub fn read_u32(&self, ip: usize) -> u32 {
        u32::from_le_bytes(self.read_array(ip))
    }

    pub fn read_u64(&self, ip: usize) -> u64 {
        u64::from_le_bytes(self.read_array(ip))
    }

    pub fn read_i32(&self, ip: usize) -> i32 {
        i32::from_le_bytes(self.read_array(ip))
    }

    pub fn read_i64(&self, ip: usize) -> i64 {
        i64::from_le_bytes(self.read_array(ip))
    }

    pub fn read_f64(&self, ip: usize) -> f64 {
        f64::from_le_bytes(self.read_array(ip))
    }

    fn read_array<const N: usize>(&self, ip: usize) -> [u8; N] {
        match self.bytes.get(ip..ip + N) {
            Some(slice) => slice.try_into().unwrap(),
            None => panic!("BUG: instruction read past end of stream at {}", ip),
        }
    }
}

impl Default for Instructions {
    fn default() -> Self {
        Self {
            bytes: Arc::from([]),
        }
    }
}

/// Forward-reference handle returned by [`InstructionsBuilder::reserve_u32`].
#[derive(Copy, Clone, Debug)]
pub struct Patch(usize);

/// Builder for instruction streams, used by compiler collaborators and
/// tests. Also records the sparse node map as instructions are emitted.
#[derive(Debug, Default)]
pub struct InstructionsBuilder {
    bytes: Vec<u8>,
    nodes: NodeMap,
}

impl InstructionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current offset (the address of the next emitted instruction).
    pub fn here(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Attach a node to the next emitted instruction.
    pub fn node(&mut self, expr: impl Into<String>, loc: Option<Loc>) -> &mut Self {
        let offset = self.here();
        self.nodes.insert(offset, Node::new(expr, loc));
        self
    }

    pub fn op(&mut self, op: Op) -> &mut Self {
        self.bytes.push(op as u8);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Emit a placeholder u32 operand to be patched later (forward jumps).
    pub fn reserve_u32(&mut self) -> Patch {
        let at = self.bytes.len();
        self.bytes.extend_from_slice(&[0; 4]);
        Patch(at)
    }

    pub fn patch_u32(&mut self, patch: Patch, v: u32) {
        self.bytes[patch.0..patch.0 + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn finish(self) -> (Instructions, NodeMap) {
        (
            Instructions {
                bytes: Arc::from(self.bytes),
            },
            self.nodes,
        )
    }
}

/// Render a human-readable disassembly, one instruction per line, with the
/// originating expression where the node map has one.
pub fn disassemble(instructions: &Instructions, nodes: &NodeMap) -> String {
    let mut out = String::new();
    let mut ip = 0;
    while ip < instructions.len() {
        let op = Op::from_byte(instructions.read_u8(ip));
        let _ = write!(out, "{:6}  {}", ip, op.name());
        let mut operand_ip = ip + 1;
        for kind in op.operands() {
            match kind {
                OperandKind::U32 => {
                    let _ = write!(out, " {}", instructions.read_u32(operand_ip));
                }
                OperandKind::U64 => {
                    let _ = write!(out, " {}", instructions.read_u64(operand_ip));
                }
                OperandKind::I32 => {
                    let _ = write!(out, " {}", instructions.read_i32(operand_ip));
                }
                OperandKind::I64 => {
                    let _ = write!(out, " {}", instructions.read_i64(operand_ip));
                }
                OperandKind::F64 => {
                    let _ = write!(out, " {}", instructions.read_f64(operand_ip));
                }
            }
            operand_ip += kind.bytesize();
        }
        if let Some(node) = nodes.find(ip as u32) {
            let _ = write!(out, "    ; {}", node.expr());
        }
        out.push('\n');
        ip = operand_ip;
    }
    out
}
