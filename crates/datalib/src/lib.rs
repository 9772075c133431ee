// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed binary instances with schema evolution.
//!
//! A [`SchemaContext`] holds one version of a type system: type descriptors
//! laid out for 32- and 64-bit pointers plus a blob of encoded default values.
//! Instances are plain byte buffers in that layout, optionally prefixed with an
//! [`InstanceHeader`] ("packed").
//!
//! # Features
//!
//! - **Type libraries**: load contexts from JSON or build them with [`ContextBuilder`]
//! - **Text round-trip**: [`TxtPacker`] / [`TxtUnpacker`] between JSON text and packed instances
//! - **Instance patching**: [`instance_patch`] migrates an instance written with an
//!   older schema into the current layout, member by member
//! - **Schema registry**: versioned contexts, patch chains and compatibility reports
//!
//! # Architecture
//!
//! ```text
//!   JSON type library ──> ContextBuilder ──> SchemaContext (v1, v2, ...)
//!                                                 |
//!   text ──TxtPacker──> packed instance (vN) ─────+
//!                                                 v
//!                          instance_patch(target, PatchChain[v(N-1), ...])
//!                                                 |
//!                                                 v
//!                                   instance in the target layout
//! ```

pub mod builder;
mod coerce;
pub mod compat;
pub mod compatibility;
pub mod context;
mod encode;
pub mod error;
pub mod header;
pub mod patch;
pub mod registry;
pub mod txt;
pub mod typelib;
pub mod types;
pub mod view;

pub use builder::{ContextBuilder, EnumBuilder, MemberType, TypeBuilder};
pub use coerce::write_general;
pub use compat::{classify, classify_kinds, MemberPatch};
pub use compatibility::{check_compatibility, Compatibility, CompatibilityResult};
pub use context::{ErrorHandler, SchemaContext};
pub use error::{DlError, ErrorCode, Result};
pub use header::{instance_info, Endian, InstanceHeader, InstanceInfo};
pub use patch::{
    instance_patch, instance_patch_to_vec, patch, MemberwisePatch, PatchChain, PatchConfig,
    PatchEntry, PatchFunc, PatchRequest,
};
pub use registry::{RegistryError, SchemaEntry, SchemaRegistry};
pub use txt::{
    txt_pack, txt_pack_calc_size, txt_unpack, txt_unpack_calc_size, TxtPacker, TxtUnpacker,
};
pub use typelib::TypeLibrary;
pub use types::{
    AtomKind, Bitfield, DefaultRange, EnumDesc, EnumValue, MemberDesc, PtrSize, StorageKind,
    TypeClass, TypeDesc, TypeId,
};
