// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Schema context: one loaded version of a type system.

use crate::builder::ContextBuilder;
use crate::error::Result;
use crate::patch::{MemberwisePatch, PatchEntry};
use crate::types::{DefaultRange, EnumDesc, MemberDesc, PtrSize, TypeDesc, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

/// Receives human-readable diagnostics reported against a context.
pub type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Immutable set of type descriptors plus the default-value blob they reference.
///
/// Contexts are built once (see [`ContextBuilder`]) and shared read-only,
/// typically as `Arc<SchemaContext>`.
pub struct SchemaContext {
    pub(crate) types: HashMap<TypeId, TypeDesc>,
    pub(crate) enums: HashMap<TypeId, EnumDesc>,
    pub(crate) defaults: Vec<u8>,
    pub(crate) error_handler: Option<ErrorHandler>,
}

impl SchemaContext {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// Build a context from a JSON type library.
    pub fn from_json_str(json: &str) -> Result<Self> {
        ContextBuilder::new().load_type_library_str(json)?.build()
    }

    /// Build a context from a JSON type library file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        ContextBuilder::new().load_type_library_file(path)?.build()
    }

    pub fn find_type(&self, id: TypeId) -> Option<&TypeDesc> {
        self.types.get(&id)
    }

    pub fn find_type_by_name(&self, name: &str) -> Option<&TypeDesc> {
        self.find_type(TypeId::from_name(name))
            .filter(|t| t.name == name)
    }

    pub fn find_enum(&self, id: TypeId) -> Option<&EnumDesc> {
        self.enums.get(&id)
    }

    pub fn find_enum_by_name(&self, name: &str) -> Option<&EnumDesc> {
        self.find_enum(TypeId::from_name(name))
            .filter(|e| e.name == name)
    }

    /// Member `index` of type `id`.
    pub fn member(&self, id: TypeId, index: usize) -> Option<&MemberDesc> {
        self.find_type(id)?.member(index)
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Composite types sorted by name.
    pub fn types(&self) -> Vec<&TypeDesc> {
        let mut types: Vec<&TypeDesc> = self.types.values().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        types
    }

    /// Bytes of a default value, `None` if the range lies outside the blob.
    pub fn default_bytes(&self, range: DefaultRange) -> Option<&[u8]> {
        let end = range.offset.checked_add(range.size)?;
        self.defaults.get(range.offset..end)
    }

    pub fn default_blob(&self) -> &[u8] {
        &self.defaults
    }

    /// Report a diagnostic through the context's error handler (and the log).
    pub fn report_error(&self, msg: &str) {
        log::warn!("{}", msg);
        if let Some(handler) = &self.error_handler {
            handler(msg);
        }
    }

    /// Chain entry patching instances of this context member by member.
    pub fn patch_entry(self: &Arc<Self>) -> PatchEntry {
        PatchEntry::new(Arc::clone(self), MemberwisePatch)
    }

    /// Hash of every layout in the context, for duplicate detection.
    pub(crate) fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for ty in self.types() {
            ty.name.hash(&mut hasher);
            for ptr in PtrSize::ALL {
                ty.size(ptr).hash(&mut hasher);
            }
            for m in &ty.members {
                m.name.hash(&mut hasher);
                m.class.hash(&mut hasher);
                m.type_id.hash(&mut hasher);
                m.count.hash(&mut hasher);
                m.bitfield.hash(&mut hasher);
                if let Some(bytes) = m.default(PtrSize::HOST).and_then(|r| self.default_bytes(r)) {
                    bytes.hash(&mut hasher);
                }
            }
        }
        let mut enums: Vec<&EnumDesc> = self.enums.values().collect();
        enums.sort_by(|a, b| a.name.cmp(&b.name));
        for e in enums {
            e.name.hash(&mut hasher);
            e.storage.hash(&mut hasher);
            for v in &e.values {
                v.name.hash(&mut hasher);
                v.value.hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

impl fmt::Debug for SchemaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaContext")
            .field("types", &self.types.len())
            .field("enums", &self.enums.len())
            .field("defaults", &self.defaults.len())
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}
