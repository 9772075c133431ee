// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Type and member descriptors.
//!
//! Descriptors describe the byte layout of composite records for both
//! supported pointer widths. They are produced by [`ContextBuilder`] and are
//! immutable once owned by a [`SchemaContext`].
//!
//! [`ContextBuilder`]: crate::ContextBuilder
//! [`SchemaContext`]: crate::SchemaContext

use std::fmt;

/// Identifier of a named type, derived from the type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    /// Marks members that reference no named type.
    pub const NONE: TypeId = TypeId(0);

    /// Derive the id of a type from its name (MD5, first four bytes, little-endian).
    pub fn from_name(name: &str) -> Self {
        use md5::{Digest, Md5};

        let mut hasher = Md5::new();
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&digest[..4]);
        // 0 is reserved for NONE
        TypeId(u32::from_le_bytes(bytes).max(1))
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Pointer width a layout is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PtrSize {
    Ptr32,
    Ptr64,
}

impl PtrSize {
    #[cfg(target_pointer_width = "64")]
    pub const HOST: PtrSize = PtrSize::Ptr64;
    #[cfg(not(target_pointer_width = "64"))]
    pub const HOST: PtrSize = PtrSize::Ptr32;

    pub const ALL: [PtrSize; 2] = [PtrSize::Ptr32, PtrSize::Ptr64];

    /// Size of a pointer in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            Self::Ptr32 => 4,
            Self::Ptr64 => 8,
        }
    }

    /// Index into per-width layout tables.
    pub const fn index(self) -> usize {
        match self {
            Self::Ptr32 => 0,
            Self::Ptr64 => 1,
        }
    }

    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            4 => Some(Self::Ptr32),
            8 => Some(Self::Ptr64),
            _ => None,
        }
    }

    /// All-ones pointer value marking null at this width.
    pub const fn null(self) -> u64 {
        match self {
            Self::Ptr32 => u32::MAX as u64,
            Self::Ptr64 => u64::MAX,
        }
    }
}

/// How a member is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomKind {
    /// A single value of its storage kind.
    Pod,
    /// A bit range inside a shared unsigned storage unit.
    Bitfield,
    /// A fixed number of consecutive elements.
    InlineArray,
    /// Pointer + u32 count referencing out-of-line elements.
    Array,
}

/// Storage representation of a member (or of array elements).
///
/// The declaration order matters: `Int8..=Str` is the range of kinds that can
/// be coerced into one another through their text form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageKind {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Fp32,
    Fp64,
    EnumInt8,
    EnumInt16,
    EnumInt32,
    EnumInt64,
    EnumUint8,
    EnumUint16,
    EnumUint32,
    EnumUint64,
    Str,
    Ptr,
    Struct,
}

impl StorageKind {
    /// Kinds convertible through text (integers, floats, enums, strings).
    pub fn is_scalar(self) -> bool {
        self <= Self::Str
    }

    pub fn is_enum(self) -> bool {
        (Self::EnumInt8..=Self::EnumUint64).contains(&self)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Fp32 | Self::Fp64)
    }

    /// Integer kind an enum is represented with (identity for other kinds).
    pub fn underlying(self) -> Self {
        match self {
            Self::EnumInt8 => Self::Int8,
            Self::EnumInt16 => Self::Int16,
            Self::EnumInt32 => Self::Int32,
            Self::EnumInt64 => Self::Int64,
            Self::EnumUint8 => Self::Uint8,
            Self::EnumUint16 => Self::Uint16,
            Self::EnumUint32 => Self::Uint32,
            Self::EnumUint64 => Self::Uint64,
            other => other,
        }
    }

    /// Enum kind backed by this integer kind.
    pub fn as_enum(self) -> Option<Self> {
        match self {
            Self::Int8 => Some(Self::EnumInt8),
            Self::Int16 => Some(Self::EnumInt16),
            Self::Int32 => Some(Self::EnumInt32),
            Self::Int64 => Some(Self::EnumInt64),
            Self::Uint8 => Some(Self::EnumUint8),
            Self::Uint16 => Some(Self::EnumUint16),
            Self::Uint32 => Some(Self::EnumUint32),
            Self::Uint64 => Some(Self::EnumUint64),
            _ => None,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self.underlying(),
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64
        )
    }

    pub fn is_integer(self) -> bool {
        (Self::Int8..=Self::Uint64).contains(&self.underlying())
    }

    /// Fixed size in bytes, `None` for pointer-sized and composite kinds.
    pub fn fixed_size(self) -> Option<usize> {
        match self.underlying() {
            Self::Int8 | Self::Uint8 => Some(1),
            Self::Int16 | Self::Uint16 => Some(2),
            Self::Int32 | Self::Uint32 | Self::Fp32 => Some(4),
            Self::Int64 | Self::Uint64 | Self::Fp64 => Some(8),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Fp32 => "fp32",
            Self::Fp64 => "fp64",
            Self::EnumInt8 => "enum_int8",
            Self::EnumInt16 => "enum_int16",
            Self::EnumInt32 => "enum_int32",
            Self::EnumInt64 => "enum_int64",
            Self::EnumUint8 => "enum_uint8",
            Self::EnumUint16 => "enum_uint16",
            Self::EnumUint32 => "enum_uint32",
            Self::EnumUint64 => "enum_uint64",
            Self::Str => "string",
            Self::Ptr => "ptr",
            Self::Struct => "struct",
        }
    }

    /// Parse a builtin scalar name as used in type libraries.
    pub fn from_builtin(name: &str) -> Option<Self> {
        let kind = match name {
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint8" => Self::Uint8,
            "uint16" => Self::Uint16,
            "uint32" => Self::Uint32,
            "uint64" => Self::Uint64,
            "fp32" => Self::Fp32,
            "fp64" => Self::Fp64,
            "string" => Self::Str,
            _ => return None,
        };
        Some(kind)
    }
}

/// Atom and storage kind of a member, the unit the compatibility matrix works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeClass {
    pub atom: AtomKind,
    pub storage: StorageKind,
}

impl TypeClass {
    pub const fn new(atom: AtomKind, storage: StorageKind) -> Self {
        Self { atom, storage }
    }

    pub const fn pod(storage: StorageKind) -> Self {
        Self::new(AtomKind::Pod, storage)
    }
}

impl fmt::Display for TypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.atom {
            AtomKind::Pod => write!(f, "{}", self.storage.name()),
            AtomKind::Bitfield => write!(f, "bitfield<{}>", self.storage.name()),
            AtomKind::InlineArray => write!(f, "{}[N]", self.storage.name()),
            AtomKind::Array => write!(f, "{}[]", self.storage.name()),
        }
    }
}

/// Bit range of a bitfield member inside its storage unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bitfield {
    pub bit_offset: u32,
    pub bits: u32,
}

impl Bitfield {
    pub fn mask(&self) -> u64 {
        if self.bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.bits) - 1
        }
    }

    pub fn extract(&self, unit: u64) -> u64 {
        (unit >> self.bit_offset) & self.mask()
    }

    pub fn insert(&self, unit: u64, value: u64) -> u64 {
        let mask = self.mask() << self.bit_offset;
        (unit & !mask) | ((value << self.bit_offset) & mask)
    }
}

/// Location of a default value inside the owning context's default blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefaultRange {
    pub offset: usize,
    pub size: usize,
}

/// Reflection data for one named member of a composite type.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberDesc {
    pub name: String,
    pub class: TypeClass,
    /// Referenced struct/enum type, [`TypeId::NONE`] for builtin scalars.
    pub type_id: TypeId,
    pub(crate) offset: [usize; 2],
    pub(crate) size: [usize; 2],
    pub(crate) alignment: [usize; 2],
    /// Element count of inline arrays, 1 otherwise.
    pub count: usize,
    pub bitfield: Option<Bitfield>,
    pub(crate) default: Option<[DefaultRange; 2]>,
}

impl MemberDesc {
    pub fn atom(&self) -> AtomKind {
        self.class.atom
    }

    pub fn storage(&self) -> StorageKind {
        self.class.storage
    }

    pub fn offset(&self, ptr: PtrSize) -> usize {
        self.offset[ptr.index()]
    }

    pub fn size(&self, ptr: PtrSize) -> usize {
        self.size[ptr.index()]
    }

    pub fn alignment(&self, ptr: PtrSize) -> usize {
        self.alignment[ptr.index()]
    }

    /// Default value location for this pointer width, if one is declared.
    pub fn default(&self, ptr: PtrSize) -> Option<DefaultRange> {
        self.default.map(|d| d[ptr.index()])
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Plain composite member (neither array nor pointer).
    pub fn is_nested_struct(&self) -> bool {
        self.class == TypeClass::pod(StorageKind::Struct)
    }
}

/// Reflection data for one composite record type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDesc {
    pub id: TypeId,
    pub name: String,
    pub members: Vec<MemberDesc>,
    pub(crate) size: [usize; 2],
    pub(crate) alignment: [usize; 2],
}

impl TypeDesc {
    pub fn size(&self, ptr: PtrSize) -> usize {
        self.size[ptr.index()]
    }

    pub fn alignment(&self, ptr: PtrSize) -> usize {
        self.alignment[ptr.index()]
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn member(&self, index: usize) -> Option<&MemberDesc> {
        self.members.get(index)
    }

    /// First member with this exact name.
    pub fn find_member(&self, name: &str) -> Option<&MemberDesc> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// Named value of an enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub name: String,
    pub value: i64,
}

/// Reflection data for an enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDesc {
    pub id: TypeId,
    pub name: String,
    /// One of the `Enum*` storage kinds.
    pub storage: StorageKind,
    pub values: Vec<EnumValue>,
}

impl EnumDesc {
    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.values.iter().find(|v| v.name == name).map(|v| v.value)
    }

    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.value == value)
            .map(|v| v.name.as_str())
    }
}

/// Round `value` up to a multiple of `alignment` (a power of two, or 0/1).
pub(crate) fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}
