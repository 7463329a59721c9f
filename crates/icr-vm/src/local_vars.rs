//! Local-variable layouts.
//!
//! A layout maps each name, at a given block-nesting level, to a byte
//! offset from the frame's `stack_bottom` and a static type. Offsets are
//! assigned in declaration order at aligned sizes; `max_bytesize` is the
//! region a frame reserves past its `stack_bottom`.

use icr_core::{MetaVars, Type};

use crate::context::Context;

#[derive(Clone, Debug)]
pub struct LocalVar {
    pub name: String,
    pub block_level: usize,
    pub offset: usize,
    pub typ: Type,
}

#[derive(Clone, Debug, Default)]
pub struct LocalVarLayout {
    vars: Vec<LocalVar>,
    bytesize: usize,
    max_bytesize: usize,
}

impl LocalVarLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a level-0 layout from the semantic analyzer's meta-vars.
    pub fn from_meta_vars(meta_vars: &MetaVars, context: &Context) -> Self {
        let mut layout = Self::new();
        for (name, typ) in meta_vars.iter() {
            layout.declare(name, 0, typ.clone(), context);
        }
        layout
    }

    /// Declare a variable, returning its byte offset.
    ///
    /// Re-declaring an existing `(name, block_level)` with the same type
    /// returns the existing offset. The static type of a persisted local
    /// cannot change here; widenings are the migration pass's job, so a
    /// type conflict at this point is fatal.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        block_level: usize,
        typ: Type,
        context: &Context,
    ) -> usize {
        let name = name.into();
        if let Some(var) = self
            .vars
            .iter()
            .find(|v| v.name == name && v.block_level == block_level)
        {
            if var.typ != typ {
                panic!(
                    "can't change type of local variable {} from {} to {}",
                    name, var.typ, typ
                );
            }
            return var.offset;
        }

        let offset = self.bytesize;
        self.bytesize += context.aligned_sizeof_type(&typ);
        if self.bytesize > self.max_bytesize {
            self.max_bytesize = self.bytesize;
        }
        self.vars.push(LocalVar {
            name,
            block_level,
            offset,
            typ,
        });
        offset
    }

    /// Innermost declaration of `name`, if any.
    pub fn get(&self, name: &str) -> Option<&LocalVar> {
        self.vars.iter().rev().find(|v| v.name == name)
    }

    /// Bytes reserved past `stack_bottom` for this layout.
    pub fn max_bytesize(&self) -> usize {
        self.max_bytesize
    }

    /// Bytes currently occupied by declared variables.
    pub fn current_bytesize(&self) -> usize {
        self.bytesize
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// All variables, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &LocalVar> {
        self.vars.iter()
    }

    /// Variables declared at block level 0, in declaration order.
    pub fn level0(&self) -> impl Iterator<Item = &LocalVar> {
        self.vars.iter().filter(|v| v.block_level == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icr_core::Type;

    #[test]
    fn offsets_are_aligned_and_ordered() {
        let context = Context::new();
        let mut layout = LocalVarLayout::new();
        let a = layout.declare("a", 0, Type::Bool, &context);
        let b = layout.declare("b", 0, Type::Int32, &context);
        let c = layout.declare("c", 0, Type::Float64, &context);

        assert_eq!(a, 0);
        assert_eq!(b, 8);
        assert_eq!(c, 16);
        assert_eq!(layout.max_bytesize(), 24);
    }

    #[test]
    fn redeclare_same_type_returns_offset() {
        let context = Context::new();
        let mut layout = LocalVarLayout::new();
        let first = layout.declare("x", 0, Type::Int32, &context);
        let again = layout.declare("x", 0, Type::Int32, &context);
        assert_eq!(first, again);
        assert_eq!(layout.max_bytesize(), 8);
    }

    #[test]
    #[should_panic(expected = "can't change type of local variable x")]
    fn redeclare_new_type_is_fatal() {
        let context = Context::new();
        let mut layout = LocalVarLayout::new();
        layout.declare("x", 0, Type::Int32, &context);
        layout.declare("x", 0, Type::Float64, &context);
    }

    #[test]
    fn block_levels_do_not_collide() {
        let context = Context::new();
        let mut layout = LocalVarLayout::new();
        layout.declare("i", 0, Type::Int32, &context);
        let inner = layout.declare("i", 1, Type::Int32, &context);
        assert_eq!(inner, 8);
        // Innermost wins on lookup.
        assert_eq!(layout.get("i").unwrap().block_level, 1);
        assert_eq!(layout.level0().count(), 1);
    }

    #[test]
    fn from_meta_vars_preserves_order() {
        let context = Context::new();
        let mut meta = MetaVars::new();
        meta.declare("x", Type::Int32);
        meta.declare("y", Type::mixed_union([Type::Int32, Type::Float64]));
        let layout = LocalVarLayout::from_meta_vars(&meta, &context);

        assert_eq!(layout.get("x").unwrap().offset, 0);
        // Mixed union: 8-byte tag + widest member payload (8) = 16.
        assert_eq!(layout.get("y").unwrap().offset, 8);
        assert_eq!(layout.max_bytesize(), 24);
    }
}
