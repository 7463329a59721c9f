//! Static types as the interpreter sees them.
//!
//! The semantic analyzer owns the full type system; the interpreter only
//! needs enough structure to size stack slots, tag mixed unions, and decide
//! how a persisted local can be widened on REPL re-entry.

use std::fmt;

use smallvec::SmallVec;

/// Identifier assigned to a registered type by the `Context`.
///
/// The id doubles as the tag word of a mixed-union value and as the header
/// word of heap referents, so it is fixed at 32 bits.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct TypeId(i32);

impl TypeId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A list of member types, inline up to four entries.
pub type TypeList = SmallVec<[Type; 4]>;

/// A static type.
///
/// Reference-like variants occupy one pointer on the stack; the referent
/// carries an 8-byte type-id header. A mixed union is an 8-byte tag followed
/// by the widest member's payload.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Type {
    Nil,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Raw pointer (also the representation of string literals).
    Pointer,
    /// Procedure value: `{def_id, closure_data}`.
    Proc,
    /// Reference to a class instance, by type name.
    Reference(String),
    /// Union of reference types only.
    ReferenceUnion(Box<TypeList>),
    /// A reference or nil, still one pointer wide (nil is the null pointer).
    NilableReference(Box<Type>),
    /// Virtual type over a reference hierarchy.
    Virtual(Box<Type>),
    /// Tagged union: 8-byte type-id tag, then the widest member's payload.
    MixedUnion(Box<TypeList>),
}

impl Type {
    /// Whether this type is represented as a single (possibly null) pointer
    /// to a referent with a type-id header.
    pub fn is_reference_like(&self) -> bool {
        matches!(
            self,
            Type::Reference(_)
                | Type::ReferenceUnion(_)
                | Type::NilableReference(_)
                | Type::Virtual(_)
        )
    }

    pub fn is_mixed_union(&self) -> bool {
        matches!(self, Type::MixedUnion(_))
    }

    /// Members of a mixed union, if this is one.
    pub fn union_members(&self) -> Option<&TypeList> {
        match self {
            Type::MixedUnion(members) => Some(members),
            _ => None,
        }
    }

    /// Build a mixed union from members.
    pub fn mixed_union(members: impl IntoIterator<Item = Type>) -> Type {
        Type::MixedUnion(Box::new(members.into_iter().collect()))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Nil => write!(f, "Nil"),
            Type::Bool => write!(f, "Bool"),
            Type::Int8 => write!(f, "Int8"),
            Type::Int16 => write!(f, "Int16"),
            Type::Int32 => write!(f, "Int32"),
            Type::Int64 => write!(f, "Int64"),
            Type::UInt8 => write!(f, "UInt8"),
            Type::UInt16 => write!(f, "UInt16"),
            Type::UInt32 => write!(f, "UInt32"),
            Type::UInt64 => write!(f, "UInt64"),
            Type::Float32 => write!(f, "Float32"),
            Type::Float64 => write!(f, "Float64"),
            Type::Pointer => write!(f, "Pointer"),
            Type::Proc => write!(f, "Proc"),
            Type::Reference(name) => write!(f, "{}", name),
            Type::ReferenceUnion(members) | Type::MixedUnion(members) => {
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", m)?;
                }
                Ok(())
            }
            Type::NilableReference(inner) => write!(f, "{} | Nil", inner),
            Type::Virtual(base) => write!(f, "{}+", base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_like() {
        assert!(Type::Reference("Foo".into()).is_reference_like());
        assert!(Type::NilableReference(Box::new(Type::Reference("Foo".into()))).is_reference_like());
        assert!(Type::Virtual(Box::new(Type::Reference("Foo".into()))).is_reference_like());
        assert!(!Type::Int32.is_reference_like());
        assert!(!Type::mixed_union([Type::Int32, Type::Float64]).is_reference_like());
    }

    #[test]
    fn union_members() {
        let union = Type::mixed_union([Type::Int32, Type::Float64]);
        let members = union.union_members().unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0], Type::Int32);
        assert!(Type::Int32.union_members().is_none());
    }

    #[test]
    fn display() {
        assert_eq!(Type::Int32.to_string(), "Int32");
        assert_eq!(
            Type::mixed_union([Type::Int32, Type::Float64]).to_string(),
            "Int32 | Float64"
        );
        assert_eq!(
            Type::NilableReference(Box::new(Type::Reference("Foo".into()))).to_string(),
            "Foo | Nil"
        );
    }

    #[test]
    fn type_id_roundtrip() {
        let id = TypeId::new(42);
        assert_eq!(id.as_i32(), 42);
        assert_eq!(id, TypeId::new(42));
    }
}
