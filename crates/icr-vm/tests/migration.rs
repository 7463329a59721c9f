//! REPL re-entry: persisted locals survive, unions widen in place.

mod support;

use std::sync::Arc;

use icr_core::{MetaVars, Type};
use icr_vm::{Context, Interpreter, LocalVarLayout, Op, Value};

use support::{build_def, run_body};

fn int_float_union() -> Type {
    Type::mixed_union([Type::Int32, Type::Float64])
}

#[test]
fn union_widening_across_reentries() {
    let context = Arc::new(Context::new());
    let mut interpreter = Interpreter::new(context.clone());
    let int_id = context.type_id(&Type::Int32).as_i32() as i64;
    let float_id = context.type_id(&Type::Float64).as_i32() as i64;

    // Run 1: x = 1 (Int32), y = 9 (Int64).
    let mut meta1 = MetaVars::new();
    meta1.declare("x", Type::Int32);
    meta1.declare("y", Type::Int64);
    let locals1 = LocalVarLayout::from_meta_vars(&meta1, &context);
    let run1 = build_def("main", 0, locals1, Type::Int32, |b| {
        b.op(Op::PutI32).i32(1);
        b.op(Op::SetLocal).u32(0).u32(4);
        b.op(Op::PutI64).i64(9);
        b.op(Op::SetLocal).u32(8).u32(8);
        b.op(Op::GetLocal).u32(0).u32(4);
        b.op(Op::Leave).u32(4);
    });
    assert_eq!(
        run_body(&mut interpreter, meta1, Arc::new(run1)),
        Value::Int32(1)
    );

    // Run 2: x is now Int32 | Float64. Reading x without assigning proves
    // migration tagged the persisted Int32.
    let mut meta2 = MetaVars::new();
    meta2.declare("x", int_float_union());
    meta2.declare("y", Type::Int64);
    let locals2 = LocalVarLayout::from_meta_vars(&meta2, &context);
    let run2 = build_def("main", 0, locals2.clone(), int_float_union(), |b| {
        b.op(Op::GetLocal).u32(0).u32(16);
        b.op(Op::Leave).u32(16);
    });
    assert_eq!(
        run_body(&mut interpreter, meta2.clone(), Arc::new(run2)),
        Value::Int32(1)
    );

    // The widened slot carries the Int32 tag; y moved outward unchanged.
    let x = interpreter.local_bytes("x").unwrap();
    assert_eq!(i64::from_le_bytes(x[0..8].try_into().unwrap()), int_id);
    assert_eq!(i32::from_le_bytes(x[8..12].try_into().unwrap()), 1);
    let y = interpreter.local_bytes("y").unwrap();
    assert_eq!(i64::from_le_bytes(y[0..8].try_into().unwrap()), 9);

    // Run 3: x = 1.5; x + 0.5 == 2.0.
    let run3 = build_def("main", 0, locals2, Type::Float64, |b| {
        // x = 1.5
        b.op(Op::PutF64).f64(1.5);
        b.op(Op::SetLocal).u32(8).u32(8);
        b.op(Op::PutI64).i64(float_id);
        b.op(Op::SetLocal).u32(0).u32(8);
        // x + 0.5, branching on the union tag
        b.op(Op::GetLocal).u32(0).u32(8);
        b.op(Op::PutI64).i64(float_id);
        b.op(Op::EqI64);
        b.op(Op::BranchUnless);
        let int_case = b.reserve_u32();
        b.op(Op::GetLocal).u32(8).u32(8);
        b.op(Op::SetIp);
        let add = b.reserve_u32();
        let int_offset = b.here();
        b.patch_u32(int_case, int_offset);
        b.op(Op::GetLocal).u32(8).u32(4);
        b.op(Op::I32ToF64);
        let add_offset = b.here();
        b.patch_u32(add, add_offset);
        b.op(Op::PutF64).f64(0.5);
        b.op(Op::AddF64);
        b.op(Op::Leave).u32(8);
    });
    assert_eq!(
        run_body(&mut interpreter, meta2, Arc::new(run3)),
        Value::Float64(2.0)
    );

    // Slot now tagged Float64 with payload 1.5.
    let x = interpreter.local_bytes("x").unwrap();
    assert_eq!(i64::from_le_bytes(x[0..8].try_into().unwrap()), float_id);
    assert_eq!(f64::from_le_bytes(x[8..16].try_into().unwrap()), 1.5);
    let y = interpreter.local_bytes("y").unwrap();
    assert_eq!(i64::from_le_bytes(y[0..8].try_into().unwrap()), 9);
}

#[test]
fn same_size_reentry_keeps_bytes_untouched() {
    let context = Arc::new(Context::new());
    let mut interpreter = Interpreter::new(context.clone());

    let mut meta = MetaVars::new();
    meta.declare("x", Type::Int64);
    let locals = LocalVarLayout::from_meta_vars(&meta, &context);

    let run1 = build_def("main", 0, locals.clone(), Type::Int64, |b| {
        b.op(Op::PutI64).i64(0x0123_4567_89AB_CDEF);
        b.op(Op::SetLocal).u32(0).u32(8);
        b.op(Op::GetLocal).u32(0).u32(8);
        b.op(Op::Leave).u32(8);
    });
    run_body(&mut interpreter, meta.clone(), Arc::new(run1));
    let before = interpreter.local_bytes("x").unwrap().to_vec();

    let run2 = build_def("main", 0, locals, Type::Int64, |b| {
        b.op(Op::GetLocal).u32(0).u32(8);
        b.op(Op::Leave).u32(8);
    });
    let value = run_body(&mut interpreter, meta, Arc::new(run2));

    assert_eq!(value, Value::Int64(0x0123_4567_89AB_CDEF));
    assert_eq!(interpreter.local_bytes("x").unwrap(), before.as_slice());
}
