// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Member compatibility matrix.
//!
//! Decides how a source member is carried into the target member of the same
//! name. [`classify_kinds`] is the pure matrix over member classes;
//! [`classify`] feeds it with facts looked up in both contexts.

use crate::context::SchemaContext;
use crate::types::{AtomKind, MemberDesc, PtrSize, StorageKind, TypeClass, TypeId};

/// How one member is migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberPatch {
    /// Bytes (or the bit range, for bitfields) are copied verbatim.
    ExactCopy,
    /// Nested struct whose layout evolved: patched recursively.
    NestedPatch,
    /// Scalar converted through its text form.
    ScalarCoerce,
    /// No automatic migration exists.
    Incompatible,
}

/// Compatibility matrix over member classes.
///
/// `same_layout` states that both members occupy the same number of bytes and,
/// for struct members, that the nested types are laid out identically.
pub fn classify_kinds(
    source: TypeClass,
    target: TypeClass,
    same_type_id: bool,
    same_layout: bool,
) -> MemberPatch {
    let nested = TypeClass::pod(StorageKind::Struct);
    if source == nested && target == nested {
        return if same_type_id && same_layout {
            MemberPatch::ExactCopy
        } else {
            MemberPatch::NestedPatch
        };
    }
    if source == target && same_type_id && same_layout {
        return MemberPatch::ExactCopy;
    }
    if source.atom == AtomKind::Pod
        && target.atom == AtomKind::Pod
        && source.storage.is_scalar()
        && target.storage.is_scalar()
    {
        return MemberPatch::ScalarCoerce;
    }
    MemberPatch::Incompatible
}

/// Classify `source` (in `src_ctx`) against `target` (in `tgt_ctx`).
pub fn classify(
    src_ctx: &SchemaContext,
    source: &MemberDesc,
    tgt_ctx: &SchemaContext,
    target: &MemberDesc,
    ptr: PtrSize,
) -> MemberPatch {
    let same_type_id = source.type_id == target.type_id;
    let same_layout = match target.atom() {
        // the bit range moves, whatever the width
        AtomKind::Bitfield => true,
        _ if source.size(ptr) != target.size(ptr) || source.count != target.count => false,
        // out-of-line data is carried as is, so pointees must match too
        _ if refers_to_type(target.storage()) => {
            same_type_layout(src_ctx, source.type_id, tgt_ctx, target.type_id, ptr)
        }
        _ => true,
    };
    classify_kinds(source.class, target.class, same_type_id, same_layout)
}

fn refers_to_type(storage: StorageKind) -> bool {
    matches!(storage, StorageKind::Struct | StorageKind::Ptr)
}

/// Whether two struct types have identical layouts, member for member,
/// including the types reached through pointers and dynamic arrays.
pub fn same_type_layout(
    src_ctx: &SchemaContext,
    source: TypeId,
    tgt_ctx: &SchemaContext,
    target: TypeId,
    ptr: PtrSize,
) -> bool {
    layouts_match(src_ctx, source, tgt_ctx, target, ptr, &mut Vec::new())
}

fn layouts_match(
    src_ctx: &SchemaContext,
    source: TypeId,
    tgt_ctx: &SchemaContext,
    target: TypeId,
    ptr: PtrSize,
    visiting: &mut Vec<(TypeId, TypeId)>,
) -> bool {
    // a pair already under comparison is assumed equal (pointer cycles)
    if visiting.contains(&(source, target)) {
        return true;
    }
    let (Some(a), Some(b)) = (src_ctx.find_type(source), tgt_ctx.find_type(target)) else {
        return false;
    };
    if a.size(ptr) != b.size(ptr)
        || a.alignment(ptr) != b.alignment(ptr)
        || a.members.len() != b.members.len()
    {
        return false;
    }
    visiting.push((source, target));
    let matched = a.members.iter().zip(&b.members).all(|(x, y)| {
        x.name == y.name
            && x.class == y.class
            && x.type_id == y.type_id
            && x.offset(ptr) == y.offset(ptr)
            && x.size(ptr) == y.size(ptr)
            && x.count == y.count
            && x.bitfield == y.bitfield
            && (!refers_to_type(x.storage())
                || layouts_match(src_ctx, x.type_id, tgt_ctx, y.type_id, ptr, visiting))
    });
    visiting.pop();
    matched
}
