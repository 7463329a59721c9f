//! The foreign-function bridge.
//!
//! Outbound: a [`LibFunction`] pairs a native function pointer with a
//! prepared [`NativeCall`] invoker that knows how to hand an argument
//! pointer vector and a return slot to the native ABI. The interpreter's
//! `lib_call` marshals stack-resident arguments into that shape.
//!
//! Inbound: a procedure value passed to a native function is replaced, at
//! the FFI boundary only, by an `extern "C"` trampoline drawn from a
//! bounded process-wide pool. Each trampoline is bound to one
//! [`FfiClosureContext`] slot capturing the interpreter and the callable;
//! invoking it re-enters the interpreter above its `stack_top` snapshot.
//! Slots are reclaimed when the owning context's pool is dropped.

use std::fmt;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Mutex;

use libc::{c_int, c_void};

use crate::callable::DefId;
use crate::interpreter::Interpreter;

/// Maximum number of arguments a lib call can marshal.
pub const MAX_LIB_ARGS: usize = 100;

/// Registry id of a [`LibFunction`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct LibFnId(pub u64);

impl fmt::Display for LibFnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lib_fn#{}", self.0)
    }
}

/// A native function pointer, opaque to the interpreter.
pub type NativeFn = *const c_void;

/// Prepared call-interface handle: marshals an argument pointer vector and
/// a return destination into one native ABI signature.
pub struct NativeCall {
    invoke: Box<dyn Fn(NativeFn, &[*mut u8], *mut u8) + Send + Sync>,
}

impl NativeCall {
    pub fn new(invoke: impl Fn(NativeFn, &[*mut u8], *mut u8) + Send + Sync + 'static) -> Self {
        Self {
            invoke: Box::new(invoke),
        }
    }

    /// # Safety
    /// `args` must point at live argument values matching the prepared
    /// signature and `ret` at a writable return slot of the declared size.
    pub unsafe fn invoke(&self, function: NativeFn, args: &[*mut u8], ret: *mut u8) {
        (self.invoke)(function, args, ret)
    }
}

impl fmt::Debug for NativeCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NativeCall")
    }
}

/// How native code will call back into a wrapped procedure: the byte sizes
/// of the interpreter-level arguments and return value.
#[derive(Clone, Debug)]
pub struct ProcCallInterface {
    pub arg_bytesizes: Vec<usize>,
    pub return_bytesize: usize,
}

/// A registered native function.
#[derive(Debug)]
pub struct LibFunction {
    pub name: String,
    pub fn_ptr: NativeFn,
    /// Outbound call interface.
    pub call: NativeCall,
    /// Raw bytesize of each argument, in declaration order.
    pub arg_bytesizes: Vec<usize>,
    /// Entry `i` is `Some` when argument `i` is a procedure that must be
    /// wrapped as a native callback with the given inbound interface.
    pub proc_args: Vec<Option<ProcCallInterface>>,
    pub return_bytesize: usize,
}

// Safety: the function pointer is immutable after registration and the
// native function is required to be callable from any thread that runs an
// interpreter against this context.
unsafe impl Send for LibFunction {}
unsafe impl Sync for LibFunction {}

/// Closure context captured for one wrapped procedure.
pub struct FfiClosureContext {
    pub(crate) interpreter: *mut Interpreter,
    pub(crate) def_id: DefId,
    pub(crate) interface: ProcCallInterface,
}

/// Generic inbound dispatcher: re-enter the captured interpreter with
/// native-provided argument pointers and a native-observed return slot.
pub(crate) unsafe fn closure_dispatch(
    context: &FfiClosureContext,
    args: &[*const u8],
    ret: *mut u8,
) {
    let interpreter = unsafe { &mut *context.interpreter };
    interpreter.enter_closure(context.def_id, &context.interface, args, ret);
}

const MAX_FFI_CLOSURES: usize = 8;

// Process-wide trampoline binding slots. Trampolines are compiled code and
// therefore process-wide; contexts borrow slots through their ClosurePool.
static CLOSURE_SLOTS: [AtomicPtr<FfiClosureContext>; MAX_FFI_CLOSURES] =
    [const { AtomicPtr::new(std::ptr::null_mut()) }; MAX_FFI_CLOSURES];

/// Comparator-shaped native callback: `fn(*const void, *const void) -> int`
/// (the `qsort` family). Other native callback shapes get their own
/// trampoline family bound to the same slots.
pub type ComparatorFn = unsafe extern "C" fn(*const c_void, *const c_void) -> c_int;

unsafe extern "C" fn comparator_trampoline<const SLOT: usize>(
    a: *const c_void,
    b: *const c_void,
) -> c_int {
    let context = CLOSURE_SLOTS[SLOT].load(Ordering::SeqCst);
    if context.is_null() {
        panic!("BUG: FFI closure invoked after its slot was released");
    }
    let args = [a as *const u8, b as *const u8];
    let mut ret = [0u8; 8];
    unsafe {
        closure_dispatch(&*context, &args, ret.as_mut_ptr());
    }
    i32::from_le_bytes(ret[0..4].try_into().unwrap())
}

const COMPARATOR_TRAMPOLINES: [ComparatorFn; MAX_FFI_CLOSURES] = [
    comparator_trampoline::<0>,
    comparator_trampoline::<1>,
    comparator_trampoline::<2>,
    comparator_trampoline::<3>,
    comparator_trampoline::<4>,
    comparator_trampoline::<5>,
    comparator_trampoline::<6>,
    comparator_trampoline::<7>,
];

/// Bounded pool of closure-context slots owned by one context. Acquired
/// slots are released when the pool (and so the context) is dropped.
pub struct ClosurePool {
    acquired: Mutex<Vec<(usize, *mut FfiClosureContext)>>,
}

// Safety: the slot table is atomic and the acquired list is mutex-guarded;
// contexts boxed here are only dereferenced by trampolines while the
// owning interpreter is suspended in the native call.
unsafe impl Send for ClosurePool {}
unsafe impl Sync for ClosurePool {}

impl ClosurePool {
    pub fn new() -> Self {
        Self {
            acquired: Mutex::new(Vec::new()),
        }
    }

    /// Bind `context` to a free trampoline slot and return the native
    /// callback handle (a comparator-shaped function pointer).
    pub(crate) fn acquire_comparator(&self, context: FfiClosureContext) -> ComparatorFn {
        let boxed = Box::into_raw(Box::new(context));
        for (slot, cell) in CLOSURE_SLOTS.iter().enumerate() {
            if cell
                .compare_exchange(
                    std::ptr::null_mut(),
                    boxed,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                self.acquired.lock().unwrap().push((slot, boxed));
                return COMPARATOR_TRAMPOLINES[slot];
            }
        }
        // Reclaim the box before aborting.
        drop(unsafe { Box::from_raw(boxed) });
        panic!("BUG: FFI closure pool exhausted ({} slots)", MAX_FFI_CLOSURES);
    }
}

impl Default for ClosurePool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ClosurePool {
    fn drop(&mut self) {
        let mut acquired = self.acquired.lock().unwrap();
        for (slot, context) in acquired.drain(..) {
            CLOSURE_SLOTS[slot].store(std::ptr::null_mut(), Ordering::SeqCst);
            drop(unsafe { Box::from_raw(context) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_call_invokes_adapter() {
        unsafe extern "C" fn double(x: i32) -> i32 {
            x * 2
        }
        let call = NativeCall::new(|function, args, ret| unsafe {
            let f: unsafe extern "C" fn(i32) -> i32 = std::mem::transmute(function);
            let x = *(args[0] as *const i32);
            *(ret as *mut i32) = f(x);
        });

        let mut arg = 21i32;
        let mut ret = 0i32;
        unsafe {
            call.invoke(
                double as *const c_void,
                &[&mut arg as *mut i32 as *mut u8],
                &mut ret as *mut i32 as *mut u8,
            );
        }
        assert_eq!(ret, 42);
    }

    #[test]
    fn closure_pool_slot_lifecycle() {
        let pool = ClosurePool::new();
        let before_free = CLOSURE_SLOTS
            .iter()
            .filter(|s| s.load(Ordering::SeqCst).is_null())
            .count();

        let context = FfiClosureContext {
            interpreter: std::ptr::null_mut(),
            def_id: DefId(0),
            interface: ProcCallInterface {
                arg_bytesizes: vec![8, 8],
                return_bytesize: 4,
            },
        };
        let _handle = pool.acquire_comparator(context);

        let during_free = CLOSURE_SLOTS
            .iter()
            .filter(|s| s.load(Ordering::SeqCst).is_null())
            .count();
        assert_eq!(during_free, before_free - 1);

        drop(pool);
        let after_free = CLOSURE_SLOTS
            .iter()
            .filter(|s| s.load(Ordering::SeqCst).is_null())
            .count();
        assert_eq!(after_free, before_free);
    }
}
