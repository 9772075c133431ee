// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every datalib operation.
//!
//! Detailed variants carry type and member names for diagnosis; [`DlError::code`]
//! folds them into the small, stable set of [`ErrorCode`]s callers branch on.

use crate::types::TypeId;
use thiserror::Error;

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No type, chain entry or member mapping could account for the data.
    TypeNotFound,
    /// Header magic unrecognised or instance bytes inconsistent with descriptors.
    MalformedData,
    /// Header format version unrecognised.
    VersionMismatch,
    /// Packed instance is not in host endianness.
    EndianMismatch,
    /// Packed instance uses another pointer width than requested.
    PtrSizeMismatch,
    /// Caller-supplied buffer cannot hold the result.
    BufferTooSmall,
    /// A value cannot be converted between the two member kinds.
    UnsupportedConversion,
    /// A default value cannot be injected into its member.
    InvalidDefault,
    /// Composite nesting exceeds the configured bound.
    DepthExceeded,
    /// Type library is inconsistent (unknown reference, cycle, bad declaration).
    TypeLibrary,
    /// Text instance could not be parsed or does not match its schema.
    TxtParse,
}

/// Errors produced by datalib.
#[derive(Debug, Error)]
pub enum DlError {
    #[error("type {0} not found")]
    TypeNotFound(TypeId),

    #[error("no registered schema could patch instance of type {type_id} ({attempts} entries tried)")]
    NoMatchingSchema { type_id: TypeId, attempts: usize },

    #[error("member '{member}' was added to '{type_name}' without a default value")]
    MemberWithoutDefault { type_name: String, member: String },

    #[error("member '{member}' of '{type_name}' changed type in a way that needs a hand-written migration")]
    IncompatibleMember { type_name: String, member: String },

    #[error("bitfield member '{member}' of '{type_name}' has no source counterpart")]
    BitfieldWithoutSource { type_name: String, member: String },

    #[error("default of member '{member}' is {size} bytes but the member holds {capacity}")]
    DefaultTooLarge {
        member: String,
        size: usize,
        capacity: usize,
    },

    #[error("member '{member}' cannot be converted into a string")]
    StringTarget { member: String },

    #[error("cannot convert '{text}' into member '{member}'")]
    Conversion { member: String, text: String },

    #[error("malformed data: {0}")]
    MalformedData(String),

    #[error("access of {len} bytes at offset {offset} exceeds buffer of {capacity} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("unsupported instance version {found:#010x}")]
    VersionMismatch { found: u32 },

    #[error("packed instance is not in host endianness")]
    EndianMismatch,

    #[error("packed instance uses {found}-byte pointers, expected {expected}")]
    PtrSizeMismatch { expected: usize, found: usize },

    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("composite nesting deeper than {0}")]
    DepthExceeded(usize),

    #[error("type library: {0}")]
    TypeLibrary(String),

    #[error("text instance: {0}")]
    Txt(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DlError {
    /// Stable classification of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TypeNotFound(_)
            | Self::NoMatchingSchema { .. }
            | Self::MemberWithoutDefault { .. }
            | Self::IncompatibleMember { .. }
            | Self::BitfieldWithoutSource { .. } => ErrorCode::TypeNotFound,
            Self::DefaultTooLarge { .. } => ErrorCode::InvalidDefault,
            Self::StringTarget { .. } | Self::Conversion { .. } => {
                ErrorCode::UnsupportedConversion
            }
            Self::MalformedData(_) | Self::OutOfBounds { .. } => ErrorCode::MalformedData,
            Self::VersionMismatch { .. } => ErrorCode::VersionMismatch,
            Self::EndianMismatch => ErrorCode::EndianMismatch,
            Self::PtrSizeMismatch { .. } => ErrorCode::PtrSizeMismatch,
            Self::BufferTooSmall { .. } => ErrorCode::BufferTooSmall,
            Self::DepthExceeded(_) => ErrorCode::DepthExceeded,
            Self::TypeLibrary(_) | Self::Io(_) => ErrorCode::TypeLibrary,
            Self::Txt(_) | Self::Json(_) => ErrorCode::TxtParse,
        }
    }

    pub(crate) fn type_library(msg: impl Into<String>) -> Self {
        Self::TypeLibrary(msg.into())
    }

    pub(crate) fn txt(msg: impl Into<String>) -> Self {
        Self::Txt(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_added_member_reports_type_not_found() {
        let err = DlError::MemberWithoutDefault {
            type_name: "Player".into(),
            member: "stamina".into(),
        };
        assert_eq!(err.code(), ErrorCode::TypeNotFound);
        assert!(err.to_string().contains("stamina"));
    }

    #[test]
    fn test_bounds_errors_are_malformed_data() {
        let err = DlError::OutOfBounds {
            offset: 12,
            len: 8,
            capacity: 16,
        };
        assert_eq!(err.code(), ErrorCode::MalformedData);
    }

    #[test]
    fn test_version_message_is_hex() {
        let err = DlError::VersionMismatch { found: 0x99 };
        assert_eq!(err.to_string(), "unsupported instance version 0x00000099");
    }
}
