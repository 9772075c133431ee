// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::compat::{classify, MemberPatch};
use crate::context::SchemaContext;
use crate::patch::DEFAULT_MAX_DEPTH;
use crate::types::{AtomKind, MemberDesc, PtrSize, StorageKind, TypeDesc};

// ---------------------------------------------------------------------------
// Compatibility level
// ---------------------------------------------------------------------------

/// Describes how two schema versions relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    /// Instances patch automatically in both directions.
    Full,
    /// Instances of the old schema patch into the new one.
    Backward,
    /// Instances of the new schema patch into the old one.
    Forward,
    /// Neither direction patches without a hand-written migration.
    Breaking,
}

// ---------------------------------------------------------------------------
// CompatibilityResult
// ---------------------------------------------------------------------------

/// Detailed result of a compatibility check between two schemas.
#[derive(Debug, Clone)]
pub struct CompatibilityResult {
    /// Overall compatibility level.
    pub compatibility: Compatibility,
    /// Human-readable details about what changed.
    pub details: Vec<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Check how type `type_name` evolved from `old` to `new`.
///
/// Uses the same member classification as the patch engine, at both pointer
/// widths, so `Backward` means an automatic patch of any old instance into the
/// new layout succeeds.
pub fn check_compatibility(
    old: &SchemaContext,
    new: &SchemaContext,
    type_name: &str,
) -> CompatibilityResult {
    let (Some(old_ty), Some(new_ty)) = (
        old.find_type_by_name(type_name),
        new.find_type_by_name(type_name),
    ) else {
        return CompatibilityResult {
            compatibility: Compatibility::Breaking,
            details: vec![format!("type '{}' missing from one of the schemas", type_name)],
        };
    };

    let mut details = Vec::new();
    describe_changes(old_ty, new_ty, &mut details);

    let backward = PtrSize::ALL
        .iter()
        .all(|&ptr| patches_into(old, old_ty, new, new_ty, ptr, 0));
    let forward = PtrSize::ALL
        .iter()
        .all(|&ptr| patches_into(new, new_ty, old, old_ty, ptr, 0));

    let compatibility = match (backward, forward) {
        (true, true) => Compatibility::Full,
        (true, false) => Compatibility::Backward,
        (false, true) => Compatibility::Forward,
        (false, false) => Compatibility::Breaking,
    };
    log::debug!("'{}': {:?} ({} changes)", type_name, compatibility, details.len());

    CompatibilityResult {
        compatibility,
        details,
    }
}

// ---------------------------------------------------------------------------
// Member walk
// ---------------------------------------------------------------------------

fn describe_changes(old: &TypeDesc, new: &TypeDesc, details: &mut Vec<String>) {
    for m in &new.members {
        match old.find_member(&m.name) {
            None if m.has_default() => {
                details.push(format!("Added member '{}' with default", m.name))
            }
            None => details.push(format!("Added member '{}' without default", m.name)),
            Some(o) if o.class != m.class || o.type_id != m.type_id || o.count != m.count => {
                details.push(format!(
                    "Changed member '{}' from {} to {}",
                    m.name, o.class, m.class
                ))
            }
            Some(_) => {}
        }
    }
    for o in &old.members {
        if new.find_member(&o.name).is_none() {
            details.push(format!("Removed member '{}'", o.name));
        }
    }
}

/// Whether every instance of `src_ty` patches into `dst_ty`.
fn patches_into(
    src: &SchemaContext,
    src_ty: &TypeDesc,
    dst: &SchemaContext,
    dst_ty: &TypeDesc,
    ptr: PtrSize,
    depth: usize,
) -> bool {
    if depth > DEFAULT_MAX_DEPTH {
        return false;
    }
    dst_ty.members.iter().all(|m| match src_ty.find_member(&m.name) {
        Some(s) => member_patches(src, s, dst, m, ptr, depth),
        None => backfills(m, ptr),
    })
}

fn member_patches(
    src: &SchemaContext,
    s: &MemberDesc,
    dst: &SchemaContext,
    m: &MemberDesc,
    ptr: PtrSize,
    depth: usize,
) -> bool {
    match classify(src, s, dst, m, ptr) {
        MemberPatch::ExactCopy => true,
        MemberPatch::NestedPatch => match (src.find_type(s.type_id), dst.find_type(m.type_id)) {
            (Some(a), Some(b)) => patches_into(src, a, dst, b, ptr, depth + 1),
            _ => false,
        },
        // text is parsed at patch time; only string targets fail up front
        MemberPatch::ScalarCoerce => m.storage() != StorageKind::Str,
        MemberPatch::Incompatible => false,
    }
}

fn backfills(m: &MemberDesc, ptr: PtrSize) -> bool {
    m.atom() != AtomKind::Bitfield && m.default(ptr).is_some_and(|d| d.size <= m.size(ptr))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
