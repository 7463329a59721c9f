//! Local-variable migration across REPL re-entries.
//!
//! When a new top-level invocation begins, the previous invocation's locals
//! still occupy the base of the stack. If the semantic analyzer widened a
//! variable's type (a union grew), the persisted bytes must be rewritten to
//! the new representation before the fresh layout is installed. Only
//! widenings into a mixed union are defined; any other representation
//! change of a persisted local is fatal.

use std::ptr;

use icr_core::{MetaVars, Type};

use crate::context::{Context, TYPE_ID_HEADER_BYTESIZE};
use crate::interpreter::Interpreter;
use crate::local_vars::LocalVarLayout;

pub(crate) fn migrate_local_vars(interpreter: &mut Interpreter, meta_vars: &MetaVars) {
    let old_layout = std::mem::take(&mut interpreter.local_vars);
    if old_layout.is_empty() {
        return;
    }
    let context = interpreter.context.clone();

    let old_total = old_layout.current_bytesize();
    let new_total = LocalVarLayout::from_meta_vars(meta_vars, &context).current_bytesize();

    let any_resized = old_layout.level0().any(|var| match meta_vars.get(&var.name) {
        Some(new_typ) => {
            context.aligned_sizeof_type(new_typ) != context.aligned_sizeof_type(&var.typ)
        }
        None => false,
    });

    if any_resized {
        // Copy the whole locals region out, then rebuild it variable by
        // variable from the base of the stack.
        let scratch = interpreter.stack.read_bytes(0, old_total).to_vec();
        let mut rebuilt = vec![0u8; new_total.max(old_total)];
        let mut dst_offset = 0;

        for var in old_layout.level0() {
            let new_typ = match meta_vars.get(&var.name) {
                Some(new_typ) => new_typ,
                // The variable is gone from this run; its bytes are dropped.
                None => continue,
            };
            let old_size = context.aligned_sizeof_type(&var.typ);
            let new_size = context.aligned_sizeof_type(new_typ);
            let src = &scratch[var.offset..var.offset + old_size];
            let dst = &mut rebuilt[dst_offset..dst_offset + new_size];

            if new_size == old_size {
                dst.copy_from_slice(src);
            } else {
                widen(&context, &var.name, &var.typ, new_typ, src, dst);
            }
            dst_offset += new_size;
        }

        unsafe {
            ptr::copy_nonoverlapping(
                rebuilt.as_ptr(),
                interpreter.stack.pointer_at(0),
                rebuilt.len(),
            );
        }
    }

    // Whatever the new layout no longer covers must read as zero again.
    if new_total < old_total {
        interpreter.stack.zero_range(new_total, old_total);
    }
}

/// Rewrite one variable's bytes for a representation change. Only
/// widenings into a mixed union are defined.
fn widen(context: &Context, name: &str, old_typ: &Type, new_typ: &Type, src: &[u8], dst: &mut [u8]) {
    if !new_typ.is_mixed_union() {
        panic!(
            "can't migrate local variable {} from {} to {}",
            name, old_typ, new_typ
        );
    }
    let tag_size = TYPE_ID_HEADER_BYTESIZE;

    if old_typ.is_mixed_union() {
        // Mixed union to a larger mixed union: tag verbatim, payload at its
        // old size.
        let old_payload = context.union_payload_bytesize(old_typ);
        let new_payload = context.union_payload_bytesize(new_typ);
        if new_payload < old_payload {
            panic!(
                "can't migrate local variable {} from {} to {}",
                name, old_typ, new_typ
            );
        }
        dst[..tag_size].copy_from_slice(&src[..tag_size]);
        dst[tag_size..tag_size + old_payload].copy_from_slice(&src[tag_size..tag_size + old_payload]);
    } else if old_typ.is_reference_like() {
        // The referent's header holds its type id; a null pointer becomes
        // a zeroed (nil) slot.
        let pointer = u64::from_le_bytes(src[..8].try_into().unwrap());
        if pointer != 0 {
            let referent_tag = unsafe { ptr::read(pointer as *const i64) };
            dst[..tag_size].copy_from_slice(&referent_tag.to_le_bytes());
            dst[tag_size..tag_size + 8].copy_from_slice(&pointer.to_le_bytes());
        }
    } else {
        // Non-union value: tag with its type id, value becomes the payload.
        let tag = context.type_id(old_typ).as_i32() as i64;
        let inner = context.inner_sizeof_type(old_typ);
        dst[..tag_size].copy_from_slice(&tag.to_le_bytes());
        dst[tag_size..tag_size + inner].copy_from_slice(&src[..inner]);
    }
}
