//! The shared execution context.
//!
//! A `Context` owns everything that outlives a single interpreter run: the
//! type table, the constants and class-vars byte pools, the callable and
//! lib-function registries, interned string literals, and the FFI closure
//! pool. One immutable `Context` may be shared by several interpreters on
//! separate threads; the only execution-time mutation is the per-slot pool
//! init flag, which uses a sequentially-consistent test-and-set.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use icr_core::{Type, TypeId};

use crate::callable::{BlockId, CompiledBlock, CompiledDef, DefId};
use crate::ffi::{ClosurePool, LibFnId, LibFunction};
use crate::stack::{align, ALIGNMENT};

/// Distance from a pool slot's init flag to its value bytes.
pub const OFFSET_FROM_INITIALIZED: usize = 8;

/// Size of the type-id header at the start of every heap referent, and of
/// a mixed union's tag.
pub const TYPE_ID_HEADER_BYTESIZE: usize = 8;

/// A lazily-sized byte pool with per-slot init flags (constants and class
/// vars). Each slot is `[1-byte flag + padding][value]`; the value begins
/// `OFFSET_FROM_INITIALIZED` bytes after the flag.
pub struct Pool {
    // u64 backing so slot values are 8-aligned.
    bytes: UnsafeCell<Box<[u64]>>,
    bytesize: AtomicUsize,
}

// Safety: slot values are written only by the initializing interpreter,
// gated by the atomic flag protocol; `resize` runs only between top-level
// invocations, when no pointers into the pool are live.
unsafe impl Sync for Pool {}
unsafe impl Send for Pool {}

impl Pool {
    fn new() -> Self {
        Self {
            bytes: UnsafeCell::new(Box::from([])),
            bytesize: AtomicUsize::new(0),
        }
    }

    pub fn bytesize(&self) -> usize {
        self.bytesize.load(Ordering::SeqCst)
    }

    /// Grow the pool to `total` bytes, preserving existing contents and
    /// zero-filling the extension. Shrinking never happens; a smaller
    /// `total` is a no-op.
    pub fn resize(&self, total: usize) {
        let total = align(total);
        if total <= self.bytesize() {
            return;
        }
        let mut grown = vec![0u64; total / ALIGNMENT].into_boxed_slice();
        unsafe {
            let old = &*self.bytes.get();
            grown[..old.len()].copy_from_slice(old);
            *self.bytes.get() = grown;
        }
        self.bytesize.store(total, Ordering::SeqCst);
    }

    pub fn pointer_at(&self, offset: usize) -> *mut u8 {
        if offset > self.bytesize() {
            panic!("BUG: pool offset {} out of bounds", offset);
        }
        unsafe { ((*self.bytes.get()).as_mut_ptr() as *mut u8).add(offset) }
    }

    /// Atomically set the init flag at `offset`, returning whether the slot
    /// was already initialized. The flag transitions 0 → 1 exactly once.
    pub fn test_and_set_initialized(&self, offset: usize) -> bool {
        let flag = unsafe { AtomicU8::from_ptr(self.pointer_at(offset)) };
        flag.swap(1, Ordering::SeqCst) != 0
    }

    pub fn initialized(&self, offset: usize) -> bool {
        let flag = unsafe { AtomicU8::from_ptr(self.pointer_at(offset)) };
        flag.load(Ordering::SeqCst) != 0
    }
}

#[derive(Default)]
struct TypeTable {
    types: Vec<Type>,
    ids: HashMap<Type, i32>,
}

/// Shared state consumed by interpreters. See module docs.
pub struct Context {
    types: RwLock<TypeTable>,
    constants: Pool,
    class_vars: Pool,
    declared_const_bytesize: AtomicUsize,
    declared_class_var_bytesize: AtomicUsize,
    defs: RwLock<Vec<Arc<CompiledDef>>>,
    blocks: RwLock<Vec<Arc<CompiledBlock>>>,
    lib_functions: RwLock<Vec<Arc<LibFunction>>>,
    strings: Mutex<HashMap<String, Box<[u8]>>>,
    closures: ClosurePool,
}

impl Context {
    pub fn new() -> Self {
        // Nil is always type id 0, so a zeroed union slot decodes as nil.
        let mut table = TypeTable::default();
        table.types.push(Type::Nil);
        table.ids.insert(Type::Nil, 0);
        Self {
            types: RwLock::new(table),
            constants: Pool::new(),
            class_vars: Pool::new(),
            declared_const_bytesize: AtomicUsize::new(0),
            declared_class_var_bytesize: AtomicUsize::new(0),
            defs: RwLock::new(Vec::new()),
            blocks: RwLock::new(Vec::new()),
            lib_functions: RwLock::new(Vec::new()),
            strings: Mutex::new(HashMap::new()),
            closures: ClosurePool::new(),
        }
    }

    // ========================================================================
    // Sizes and alignment
    // ========================================================================

    pub fn align(&self, size: usize) -> usize {
        align(size)
    }

    /// Natural size of a value of `typ`.
    pub fn sizeof_type(&self, typ: &Type) -> usize {
        match typ {
            Type::Nil => 0,
            Type::Bool | Type::Int8 | Type::UInt8 => 1,
            Type::Int16 | Type::UInt16 => 2,
            Type::Int32 | Type::UInt32 | Type::Float32 => 4,
            Type::Int64 | Type::UInt64 | Type::Float64 => 8,
            Type::Pointer => 8,
            Type::Proc => 16,
            Type::Reference(_)
            | Type::ReferenceUnion(_)
            | Type::NilableReference(_)
            | Type::Virtual(_) => 8,
            Type::MixedUnion(_) => TYPE_ID_HEADER_BYTESIZE + self.union_payload_bytesize(typ),
        }
    }

    /// Natural size rounded up to the stack alignment.
    pub fn aligned_sizeof_type(&self, typ: &Type) -> usize {
        align(self.sizeof_type(typ))
    }

    /// Size of the value as stored inside a union payload: references
    /// collapse to one pointer, everything else keeps its natural size.
    pub fn inner_sizeof_type(&self, typ: &Type) -> usize {
        if typ.is_reference_like() {
            8
        } else {
            self.sizeof_type(typ)
        }
    }

    /// Payload bytes of a mixed union (the widest member's aligned size,
    /// excluding the tag). Zero for non-unions.
    pub fn union_payload_bytesize(&self, typ: &Type) -> usize {
        match typ.union_members() {
            Some(members) => members
                .iter()
                .map(|m| align(self.inner_sizeof_type(m)))
                .max()
                .unwrap_or(0),
            None => 0,
        }
    }

    // ========================================================================
    // Type ids
    // ========================================================================

    /// Id of `typ`, assigning one on first sight. Assignment is
    /// initialization-time only; ids are stable for the Context's lifetime.
    pub fn type_id(&self, typ: &Type) -> TypeId {
        if let Some(id) = self.types.read().unwrap().ids.get(typ) {
            return TypeId::new(*id);
        }
        let mut table = self.types.write().unwrap();
        if let Some(id) = table.ids.get(typ) {
            return TypeId::new(*id);
        }
        let id = table.types.len() as i32;
        table.types.push(typ.clone());
        table.ids.insert(typ.clone(), id);
        TypeId::new(id)
    }

    pub fn type_from_id(&self, id: TypeId) -> Type {
        let table = self.types.read().unwrap();
        match table.types.get(id.as_i32() as usize) {
            Some(typ) => typ.clone(),
            None => panic!("BUG: unknown type id {}", id),
        }
    }

    // ========================================================================
    // Constants and class vars memory
    // ========================================================================

    pub fn constants(&self) -> &Pool {
        &self.constants
    }

    pub fn class_vars(&self) -> &Pool {
        &self.class_vars
    }

    /// Record the total constants bytesize the compiled program declares.
    pub fn declare_const_bytesize(&self, total: usize) {
        self.declared_const_bytesize
            .fetch_max(total, Ordering::SeqCst);
    }

    /// Record the total class-vars bytesize the compiled program declares.
    pub fn declare_class_var_bytesize(&self, total: usize) {
        self.declared_class_var_bytesize
            .fetch_max(total, Ordering::SeqCst);
    }

    /// Lazily resize both pools to the declared totals. Called by the
    /// driver before each top-level invocation.
    pub fn prepare_pools(&self) {
        self.constants
            .resize(self.declared_const_bytesize.load(Ordering::SeqCst));
        self.class_vars
            .resize(self.declared_class_var_bytesize.load(Ordering::SeqCst));
    }

    // ========================================================================
    // Callable registries
    // ========================================================================

    pub fn register_def(&self, def: CompiledDef) -> DefId {
        let mut defs = self.defs.write().unwrap();
        defs.push(Arc::new(def));
        DefId(defs.len() as u64 - 1)
    }

    pub fn def(&self, id: DefId) -> Arc<CompiledDef> {
        match self.defs.read().unwrap().get(id.0 as usize) {
            Some(def) => def.clone(),
            None => panic!("BUG: unknown {}", id),
        }
    }

    pub fn register_block(&self, block: CompiledBlock) -> BlockId {
        let mut blocks = self.blocks.write().unwrap();
        blocks.push(Arc::new(block));
        BlockId(blocks.len() as u64 - 1)
    }

    pub fn block(&self, id: BlockId) -> Arc<CompiledBlock> {
        match self.blocks.read().unwrap().get(id.0 as usize) {
            Some(block) => block.clone(),
            None => panic!("BUG: unknown {}", id),
        }
    }

    pub fn register_lib_function(&self, function: LibFunction) -> LibFnId {
        let mut functions = self.lib_functions.write().unwrap();
        functions.push(Arc::new(function));
        LibFnId(functions.len() as u64 - 1)
    }

    pub fn lib_function(&self, id: LibFnId) -> Arc<LibFunction> {
        match self.lib_functions.read().unwrap().get(id.0 as usize) {
            Some(function) => function.clone(),
            None => panic!("BUG: unknown {}", id),
        }
    }

    // ========================================================================
    // String literals
    // ========================================================================

    /// Intern a string literal, returning a stable pointer to its
    /// nul-terminated bytes.
    pub fn intern_string(&self, s: &str) -> *const u8 {
        let mut strings = self.strings.lock().unwrap();
        if let Some(bytes) = strings.get(s) {
            return bytes.as_ptr();
        }
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        let bytes = bytes.into_boxed_slice();
        let ptr = bytes.as_ptr();
        strings.insert(s.to_string(), bytes);
        ptr
    }

    // ========================================================================
    // FFI closures
    // ========================================================================

    pub fn ffi_closures(&self) -> &ClosurePool {
        &self.closures
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        let context = Context::new();
        assert_eq!(context.sizeof_type(&Type::Nil), 0);
        assert_eq!(context.sizeof_type(&Type::Bool), 1);
        assert_eq!(context.sizeof_type(&Type::Int32), 4);
        assert_eq!(context.aligned_sizeof_type(&Type::Int32), 8);
        assert_eq!(context.sizeof_type(&Type::Proc), 16);

        let union = Type::mixed_union([Type::Int32, Type::Float64]);
        assert_eq!(context.union_payload_bytesize(&union), 8);
        assert_eq!(context.sizeof_type(&union), 16);
        assert_eq!(context.aligned_sizeof_type(&union), 16);
    }

    #[test]
    fn inner_size_collapses_references() {
        let context = Context::new();
        let reference = Type::Reference("Foo".into());
        assert_eq!(context.inner_sizeof_type(&reference), 8);
        assert_eq!(context.inner_sizeof_type(&Type::Int16), 2);
    }

    #[test]
    fn type_ids_are_stable() {
        let context = Context::new();
        let a = context.type_id(&Type::Int32);
        let b = context.type_id(&Type::Float64);
        let a_again = context.type_id(&Type::Int32);

        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert_eq!(context.type_from_id(a), Type::Int32);
        assert_eq!(context.type_from_id(b), Type::Float64);
    }

    #[test]
    fn nil_is_type_id_zero() {
        let context = Context::new();
        assert_eq!(context.type_id(&Type::Nil).as_i32(), 0);
        assert_eq!(context.type_from_id(TypeId::new(0)), Type::Nil);
    }

    #[test]
    fn pool_resize_preserves_contents() {
        let pool = Pool::new();
        pool.resize(16);
        unsafe { *pool.pointer_at(OFFSET_FROM_INITIALIZED) = 0xAB };
        pool.resize(64);
        assert_eq!(pool.bytesize(), 64);
        assert_eq!(unsafe { *pool.pointer_at(OFFSET_FROM_INITIALIZED) }, 0xAB);
        // Shrinking is a no-op.
        pool.resize(8);
        assert_eq!(pool.bytesize(), 64);
    }

    #[test]
    fn init_flag_transitions_once() {
        let pool = Pool::new();
        pool.resize(16);
        assert!(!pool.initialized(0));
        assert!(!pool.test_and_set_initialized(0));
        assert!(pool.initialized(0));
        assert!(pool.test_and_set_initialized(0));
        assert!(pool.initialized(0));
    }

    #[test]
    fn intern_string_dedupes() {
        let context = Context::new();
        let a = context.intern_string("hello");
        let b = context.intern_string("hello");
        let c = context.intern_string("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        let bytes = unsafe { std::slice::from_raw_parts(a, 6) };
        assert_eq!(bytes, b"hello\0");
    }

    #[test]
    fn prepare_pools_uses_declared_totals() {
        let context = Context::new();
        context.declare_const_bytesize(24);
        context.declare_class_var_bytesize(40);
        context.prepare_pools();
        assert_eq!(context.constants().bytesize(), 24);
        assert_eq!(context.class_vars().bytesize(), 40);
    }
}
