// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! JSON type library format.
//!
//! ```json
//! {
//!   "module": "game",
//!   "enums": { "Team": { "type": "uint8", "values": { "red": 0, "blue": 1 } } },
//!   "types": {
//!     "Player": { "members": [
//!       { "name": "name", "type": "string" },
//!       { "name": "team", "type": "Team", "default": "red" },
//!       { "name": "pos",  "type": "fp32[3]" }
//!     ] }
//!   }
//! }
//! ```

use crate::error::{DlError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// A parsed type library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeLibrary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default)]
    pub enums: BTreeMap<String, EnumDecl>,
    #[serde(default)]
    pub types: BTreeMap<String, TypeDecl>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumDecl {
    /// Integer storage (`uint32` when absent).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    pub values: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub members: Vec<MemberDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl TypeLibrary {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DlError::type_library(e.to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text).map_err(|e| {
            DlError::type_library(format!("{}: {}", path.display(), e))
        })
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ContextBuilder;
    use crate::context::SchemaContext;
    use crate::error::ErrorCode;
    use crate::types::{PtrSize, StorageKind};
    use tempfile::tempdir;

    const LIBRARY: &str = r#"{
        "module": "game",
        "enums": { "Team": { "type": "uint8", "values": { "red": 0, "blue": 1 } } },
        "types": {
            "Player": { "members": [
                { "name": "name", "type": "string" },
                { "name": "team", "type": "Team", "default": "blue" },
                { "name": "pos", "type": "fp32[3]" }
            ] }
        }
    }"#;

    #[test]
    fn test_parse_library() {
        let lib = TypeLibrary::from_json_str(LIBRARY).expect("parse");
        assert_eq!(lib.module.as_deref(), Some("game"));
        assert_eq!(lib.enums["Team"].values["blue"], 1);
        assert_eq!(lib.types["Player"].members.len(), 3);
        assert!(lib.types["Player"].members[1].default.is_some());
    }

    #[test]
    fn test_context_from_library() {
        let ctx = SchemaContext::from_json_str(LIBRARY).expect("context");
        let player = ctx.find_type_by_name("Player").expect("Player");
        let team = player.find_member("team").expect("team");
        assert_eq!(team.storage(), StorageKind::EnumUint8);
        let range = team.default(PtrSize::HOST).expect("default");
        assert_eq!(ctx.default_bytes(range).expect("bytes"), &[1]);
        assert_eq!(player.size(PtrSize::Ptr64), 24);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("game.json");
        let lib = TypeLibrary::from_json_str(LIBRARY).expect("parse");
        lib.save(&path).expect("save");

        let back = TypeLibrary::from_file(&path).expect("load");
        assert_eq!(back, lib);
        let ctx = ContextBuilder::new()
            .load_type_library_file(&path)
            .expect("load")
            .build()
            .expect("build");
        assert!(ctx.find_enum_by_name("Team").is_some());
    }

    #[test]
    fn test_errors_are_type_library_errors() {
        let err = TypeLibrary::from_json_str("{ not json").unwrap_err();
        assert_eq!(err.code(), ErrorCode::TypeLibrary);

        let err = TypeLibrary::from_file("/nonexistent/dir/lib.json").unwrap_err();
        assert_eq!(err.code(), ErrorCode::TypeLibrary);

        let err = SchemaContext::from_json_str(
            r#"{ "types": { "A": { "members": [ { "name": "x", "type": "Nope" } ] } } }"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TypeLibrary);
    }
}
