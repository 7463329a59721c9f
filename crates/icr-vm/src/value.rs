//! Decoded runtime values.
//!
//! The stack holds raw bytes; a `Value` is what the driver hands back to
//! the caller after decoding the return buffer against the compiled body's
//! static return type.

use std::fmt;

use icr_core::{Type, TypeId};

use crate::context::{Context, TYPE_ID_HEADER_BYTESIZE};

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    /// A raw pointer (references, strings, pointer arithmetic results).
    Pointer(u64),
    /// A procedure value.
    Proc { def_id: u64, closure_data: u64 },
}

impl Value {
    /// Decode `bytes` (a raw return buffer) as a value of `typ`.
    pub fn decode(bytes: &[u8], typ: &Type, context: &Context) -> Value {
        match typ {
            Type::Nil => Value::Nil,
            Type::Bool => Value::Bool(bytes[0] != 0),
            Type::Int8 => Value::Int8(bytes[0] as i8),
            Type::Int16 => Value::Int16(i16::from_le_bytes(read(bytes))),
            Type::Int32 => Value::Int32(i32::from_le_bytes(read(bytes))),
            Type::Int64 => Value::Int64(i64::from_le_bytes(read(bytes))),
            Type::UInt8 => Value::UInt8(bytes[0]),
            Type::UInt16 => Value::UInt16(u16::from_le_bytes(read(bytes))),
            Type::UInt32 => Value::UInt32(u32::from_le_bytes(read(bytes))),
            Type::UInt64 => Value::UInt64(u64::from_le_bytes(read(bytes))),
            Type::Float32 => Value::Float32(f32::from_le_bytes(read(bytes))),
            Type::Float64 => Value::Float64(f64::from_le_bytes(read(bytes))),
            Type::Pointer
            | Type::Reference(_)
            | Type::ReferenceUnion(_)
            | Type::NilableReference(_)
            | Type::Virtual(_) => Value::Pointer(u64::from_le_bytes(read(bytes))),
            Type::Proc => Value::Proc {
                def_id: u64::from_le_bytes(read(bytes)),
                closure_data: u64::from_le_bytes(read(&bytes[8..])),
            },
            Type::MixedUnion(_) => {
                let tag = i64::from_le_bytes(read(bytes));
                let member = context.type_from_id(TypeId::new(tag as i32));
                Value::decode(&bytes[TYPE_ID_HEADER_BYTESIZE..], &member, context)
            }
        }
    }
}

fn read<const N: usize>(bytes: &[u8]) -> [u8; N] {
    match bytes.get(..N) {
        Some(slice) => slice.try_into().unwrap(),
        None => panic!("BUG: return buffer too small ({} < {})", bytes.len(), N),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt8(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Pointer(v) => write!(f, "0x{:x}", v),
            Value::Proc { def_id, .. } => write!(f, "#<Proc def#{}>", def_id),
        }
    }
}
