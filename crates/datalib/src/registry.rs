// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;

use crate::context::SchemaContext;
use crate::error::DlError;
use crate::patch::{instance_patch_to_vec, PatchChain, PatchConfig};
use crate::types::TypeId;

// ---------------------------------------------------------------------------
// SchemaEntry
// ---------------------------------------------------------------------------

/// A single versioned schema context stored in the registry.
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    /// Schema name (usually the module of the type library).
    pub name: String,
    /// Monotonically increasing version number starting at 1.
    pub version: u32,
    /// The loaded context.
    pub context: Arc<SchemaContext>,
    /// Layout fingerprint, equal for contexts that lay out identically.
    pub fingerprint: u64,
    /// Timestamp of registration.
    pub registered_at: SystemTime,
}

// ---------------------------------------------------------------------------
// RegistryError
// ---------------------------------------------------------------------------

/// Errors produced by the schema registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The context declares no types.
    #[error("schema context declares no types")]
    EmptyContext,
    /// A context with the same layout is already registered under that name.
    #[error("identical schema already registered as version {0}")]
    DuplicateContent(u32),
    /// Schema with the given name was not found.
    #[error("schema not found: {0}")]
    NotFound(String),
    /// Loading or patching failed.
    #[error(transparent)]
    Dl(#[from] DlError),
}

// ---------------------------------------------------------------------------
// SchemaRegistry
// ---------------------------------------------------------------------------

/// In-memory store of versioned schema contexts keyed by schema name.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    /// Map from schema name to an ordered list of versions (index 0 = v1).
    schemas: HashMap<String, Vec<SchemaEntry>>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new version of `name`.
    ///
    /// Returns the assigned version number. A context laid out exactly like an
    /// existing version of the same name is rejected with `DuplicateContent`.
    pub fn register(
        &mut self,
        name: &str,
        context: Arc<SchemaContext>,
    ) -> Result<u32, RegistryError> {
        if context.type_count() == 0 {
            return Err(RegistryError::EmptyContext);
        }

        let fingerprint = context.fingerprint();
        if let Some(versions) = self.schemas.get(name) {
            if let Some(existing) = versions.iter().find(|e| e.fingerprint == fingerprint) {
                return Err(RegistryError::DuplicateContent(existing.version));
            }
        }

        let versions = self.schemas.entry(name.to_string()).or_default();
        let version = (versions.len() as u32) + 1;
        versions.push(SchemaEntry {
            name: name.to_string(),
            version,
            context,
            fingerprint,
            registered_at: SystemTime::now(),
        });
        log::debug!("registered schema '{}' v{}", name, version);
        Ok(version)
    }

    /// Load a JSON type library and register it as a new version of `name`.
    pub fn register_json(&mut self, name: &str, json: &str) -> Result<u32, RegistryError> {
        let context = SchemaContext::from_json_str(json)?;
        self.register(name, Arc::new(context))
    }

    /// Return the latest version of a schema, or `None` if not found.
    pub fn get_latest(&self, name: &str) -> Option<&SchemaEntry> {
        self.schemas.get(name).and_then(|v| v.last())
    }

    /// Return a specific version of a schema (1-indexed).
    pub fn get_version(&self, name: &str, version: u32) -> Option<&SchemaEntry> {
        if version == 0 {
            return None;
        }
        self.schemas
            .get(name)
            .and_then(|v| v.get((version - 1) as usize))
    }

    /// List all registered schema names (sorted for determinism).
    pub fn list_schemas(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.keys().cloned().collect();
        names.sort();
        names
    }

    /// List all version numbers for a given schema name.
    pub fn list_versions(&self, name: &str) -> Vec<u32> {
        match self.schemas.get(name) {
            Some(versions) => versions.iter().map(|e| e.version).collect(),
            None => Vec::new(),
        }
    }

    /// Total number of distinct schema names.
    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }

    /// Chain of every version prior to the latest, newest first.
    pub fn patch_chain(&self, name: &str) -> Result<PatchChain, RegistryError> {
        let versions = self
            .schemas
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let prior = versions.len().saturating_sub(1);
        Ok(versions[..prior]
            .iter()
            .rev()
            .map(|e| e.context.patch_entry())
            .collect())
    }

    /// Migrate an instance written with version `from` of `name` into the
    /// latest version.
    pub fn upgrade(
        &self,
        name: &str,
        from: u32,
        instance: &[u8],
        type_id: TypeId,
        packed: bool,
    ) -> Result<Vec<u8>, RegistryError> {
        let source = self
            .get_version(name, from)
            .ok_or_else(|| RegistryError::NotFound(format!("{} v{}", name, from)))?;
        let latest = self
            .get_latest(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let chain = PatchChain::new().with(source.context.patch_entry());
        log::debug!(
            "upgrading {} of '{}' from v{} to v{}",
            type_id,
            name,
            from,
            latest.version
        );
        Ok(instance_patch_to_vec(
            &latest.context,
            &chain,
            instance,
            type_id,
            packed,
            PatchConfig::default(),
        )?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const V1: &str = r#"{ "types": { "Sensor": { "members": [
        { "name": "id", "type": "int32" }
    ] } } }"#;

    const V2: &str = r#"{ "types": { "Sensor": { "members": [
        { "name": "id", "type": "int64" },
        { "name": "rate", "type": "uint16", "default": 50 }
    ] } } }"#;

    const V3: &str = r#"{ "types": { "Sensor": { "members": [
        { "name": "id", "type": "int64" },
        { "name": "rate", "type": "uint16", "default": 50 },
        { "name": "gain", "type": "fp32", "default": 1.0 }
    ] } } }"#;

    fn registry() -> SchemaRegistry {
        let mut reg = SchemaRegistry::new();
        reg.register_json("sensors", V1).unwrap();
        reg.register_json("sensors", V2).unwrap();
        reg
    }

    #[test]
    fn register_same_name_increments_version() {
        let mut reg = registry();
        let v3 = reg.register_json("sensors", V3).unwrap();
        assert_eq!(v3, 3);
        assert_eq!(reg.schema_count(), 1);
        assert_eq!(reg.list_versions("sensors"), vec![1, 2, 3]);
        assert!(reg.list_versions("Missing").is_empty());
    }

    #[test]
    fn get_latest_and_specific_version() {
        let reg = registry();
        let latest = reg.get_latest("sensors").unwrap();
        assert_eq!(latest.version, 2);
        assert!(latest.context.find_type_by_name("Sensor").unwrap().find_member("rate").is_some());

        let v1 = reg.get_version("sensors", 1).unwrap();
        assert!(v1.context.find_type_by_name("Sensor").unwrap().find_member("rate").is_none());
        assert!(reg.get_version("sensors", 0).is_none());
        assert!(reg.get_version("sensors", 3).is_none());
    }

    #[test]
    fn list_schemas_sorted() {
        let mut reg = registry();
        reg.register_json("audio", V3).unwrap();
        assert_eq!(reg.list_schemas(), vec!["audio", "sensors"]);
    }

    #[test]
    fn duplicate_content_rejected() {
        let mut reg = registry();
        let err = reg.register_json("sensors", V1).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateContent(1)));
    }

    #[test]
    fn empty_context_rejected() {
        let mut reg = SchemaRegistry::new();
        let err = reg.register_json("empty", "{}").unwrap_err();
        assert!(matches!(err, RegistryError::EmptyContext));
    }

    #[test]
    fn patch_chain_lists_prior_versions_newest_first() {
        let mut reg = registry();
        reg.register_json("sensors", V3).unwrap();
        let chain = reg.patch_chain("sensors").unwrap();
        assert_eq!(chain.len(), 2);
        let v2 = &reg.get_version("sensors", 2).unwrap().context;
        assert!(Arc::ptr_eq(&chain.entries()[0].context, v2));
        assert!(matches!(
            reg.patch_chain("missing"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn upgrade_from_first_version() {
        let reg = registry();
        let out = reg
            .upgrade("sensors", 1, &(-7i32).to_ne_bytes(), TypeId::from_name("Sensor"), false)
            .unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(i64::from_ne_bytes(out[..8].try_into().unwrap()), -7);
        assert_eq!(u16::from_ne_bytes(out[8..10].try_into().unwrap()), 50);
    }
}
