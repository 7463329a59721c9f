//! The FFI bridge: out-calls, stack compaction, and inbound closure
//! callbacks re-entering the interpreter.

mod support;

use std::sync::Arc;

use libc::{c_int, c_void, size_t};

use icr_core::{MetaVars, Type};
use icr_vm::{
    Context, Interpreter, LibFunction, LocalVarLayout, NativeCall, Op, ProcCallInterface, Value,
};

use support::{build_def, run_body};

unsafe extern "C" fn add2(a: i32, b: i32) -> i32 {
    a + b
}

type QsortCompar = unsafe extern "C" fn(*const c_void, *const c_void) -> c_int;

#[test]
fn plain_out_call_compacts_the_stack() {
    let context = Arc::new(Context::new());
    let mut interpreter = Interpreter::new(context.clone());

    let add2_id = context.register_lib_function(LibFunction {
        name: "add2".into(),
        fn_ptr: add2 as *const c_void,
        call: NativeCall::new(|function, args, ret| unsafe {
            let function: unsafe extern "C" fn(i32, i32) -> i32 = std::mem::transmute(function);
            let a = *(args[0] as *const i32);
            let b = *(args[1] as *const i32);
            *(ret as *mut i32) = function(a, b);
        }),
        arg_bytesizes: vec![4, 4],
        proc_args: vec![None, None],
        return_bytesize: 4,
    });

    let main = build_def("main", 0, LocalVarLayout::new(), Type::Int32, |b| {
        b.op(Op::PutI32).i32(20);
        b.op(Op::PutI32).i32(22);
        b.op(Op::LibCall).u64(add2_id.0);
        b.op(Op::Leave).u32(4);
    });

    let value = run_body(&mut interpreter, MetaVars::new(), Arc::new(main));
    assert_eq!(value, Value::Int32(42));
    assert_eq!(interpreter.stack_bytes_in_use(), 0);
}

#[test]
fn qsort_with_interpreted_comparator() {
    let context = Arc::new(Context::new());
    let mut interpreter = Interpreter::new(context.clone());

    // cmp(a : Pointer, b : Pointer) : Int32 = *a - *b
    let mut cmp_locals = LocalVarLayout::new();
    cmp_locals.declare("a", 0, Type::Pointer, &context);
    cmp_locals.declare("b", 0, Type::Pointer, &context);
    let cmp = build_def("cmp", 16, cmp_locals, Type::Int32, |b| {
        b.op(Op::GetLocal).u32(0).u32(8);
        b.op(Op::PointerGet).u32(4);
        b.op(Op::GetLocal).u32(8).u32(8);
        b.op(Op::PointerGet).u32(4);
        b.op(Op::SubI32);
        b.op(Op::LeaveDef).u32(4);
    });
    let cmp_id = context.register_def(cmp);

    let qsort_id = context.register_lib_function(LibFunction {
        name: "qsort".into(),
        fn_ptr: libc::qsort as *const c_void,
        call: NativeCall::new(|function, args, _ret| unsafe {
            let function: unsafe extern "C" fn(*mut c_void, size_t, size_t, Option<QsortCompar>) =
                std::mem::transmute(function);
            let base = *(args[0] as *const u64) as *mut c_void;
            let count = *(args[1] as *const u64) as size_t;
            let size = *(args[2] as *const u64) as size_t;
            let compar: QsortCompar = std::mem::transmute(*(args[3] as *const u64));
            function(base, count, size, Some(compar));
        }),
        arg_bytesizes: vec![8, 8, 8, 16],
        proc_args: vec![
            None,
            None,
            None,
            Some(ProcCallInterface {
                arg_bytesizes: vec![8, 8],
                return_bytesize: 4,
            }),
        ],
        return_bytesize: 0,
    });

    let mut values = [3i32, 1, 2];
    let base = values.as_mut_ptr() as u64;

    // main keeps a live local across the call; the callback must not
    // disturb it.
    let mut meta = MetaVars::new();
    meta.declare("x", Type::Int32);
    let locals = LocalVarLayout::from_meta_vars(&meta, &context);

    let main = build_def("main", 0, locals, Type::Int32, |b| {
        b.op(Op::PutI32).i32(77);
        b.op(Op::SetLocal).u32(0).u32(4);
        b.op(Op::PutPtr).u64(base);
        b.op(Op::PutI64).i64(3);
        b.op(Op::PutI64).i64(4);
        b.op(Op::PutI64).i64(cmp_id.0 as i64); // proc: {def_id, closure_data}
        b.op(Op::PutI64).i64(0);
        b.op(Op::LibCall).u64(qsort_id.0);
        b.op(Op::GetLocal).u32(0).u32(4);
        b.op(Op::Leave).u32(4);
    });

    let value = run_body(&mut interpreter, meta, Arc::new(main));
    assert_eq!(value, Value::Int32(77));
    assert_eq!(values, [1, 2, 3]);
    assert_eq!(interpreter.call_depth(), 0);
    assert_eq!(interpreter.stack_bytes_in_use(), 8);
}

#[test]
#[should_panic(expected = "passing closures to C is not supported")]
fn closures_cannot_cross_the_boundary() {
    let context = Arc::new(Context::new());
    let mut interpreter = Interpreter::new(context.clone());

    let cmp = build_def("cmp", 16, LocalVarLayout::new(), Type::Int32, |b| {
        b.op(Op::PutI32).i32(0);
        b.op(Op::LeaveDef).u32(4);
    });
    let cmp_id = context.register_def(cmp);

    let take_proc_id = context.register_lib_function(LibFunction {
        name: "take_proc".into(),
        fn_ptr: std::ptr::null(),
        call: NativeCall::new(|_, _, _| {}),
        arg_bytesizes: vec![16],
        proc_args: vec![Some(ProcCallInterface {
            arg_bytesizes: vec![],
            return_bytesize: 4,
        })],
        return_bytesize: 0,
    });

    let main = build_def("main", 0, LocalVarLayout::new(), Type::Nil, |b| {
        b.op(Op::PutI64).i64(cmp_id.0 as i64);
        b.op(Op::PutI64).i64(0xDEAD); // non-null closure data
        b.op(Op::LibCall).u64(take_proc_id.0);
        b.op(Op::Leave).u32(0);
    });

    run_body(&mut interpreter, MetaVars::new(), Arc::new(main));
}
