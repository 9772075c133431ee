// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packed instance header.
//!
//! # Layout
//!
//! ```text
//! +----------------------------------------------------------+
//! | id (4) | version (4) | root_type (4) | instance_size (4) |
//! | is_64_bit_ptr (1) | pad (3) | first_pointer_to_patch (4) |
//! +----------------------------------------------------------+
//! | padding up to the root type's alignment                  |
//! +----------------------------------------------------------+
//! | root instance data | out-of-line data (strings, arrays)  |
//! +----------------------------------------------------------+
//! ```
//!
//! All fields are written in host byte order. A reader on a host of the other
//! endianness sees the byte-swapped id and version.

use crate::error::{DlError, Result};
use crate::types::{align_up, PtrSize, TypeId};
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Header id: "DLDL".
pub const INSTANCE_ID: u32 = 0x444C_444C;

/// Header id as read on a host of the other endianness.
pub const INSTANCE_ID_SWAPPED: u32 = 0x4C44_4C44;

/// Current binary format version.
pub const INSTANCE_VERSION: u32 = 4;

/// Format version as read on a host of the other endianness.
pub const INSTANCE_VERSION_SWAPPED: u32 = 0x0400_0000;

/// Marks "no pointer to patch" in `first_pointer_to_patch`.
pub const NO_POINTER: u32 = u32::MAX;

/// Byte order of a packed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    #[cfg(target_endian = "little")]
    pub const HOST: Endian = Endian::Little;
    #[cfg(target_endian = "big")]
    pub const HOST: Endian = Endian::Big;

    pub fn swapped(self) -> Self {
        match self {
            Self::Little => Self::Big,
            Self::Big => Self::Little,
        }
    }
}

/// Instance header (24 bytes, fixed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceHeader {
    /// Raw id as read; [`INSTANCE_ID`] or [`INSTANCE_ID_SWAPPED`] when valid.
    pub id: u32,
    /// Raw format version as read.
    pub version: u32,
    /// Root type (decoded to host order).
    pub root_type: TypeId,
    /// Size of the payload following the aligned header (decoded).
    pub instance_size: u32,
    pub is_64_bit_ptr: bool,
    /// Pointer relocation chain head (decoded), [`NO_POINTER`] if none.
    pub first_pointer_to_patch: u32,
}

impl InstanceHeader {
    pub const SIZE: usize = 24;

    const INSTANCE_SIZE_OFFSET: usize = 12;

    /// Header for a host-endian instance of `root_type`, size still unset.
    pub fn new(root_type: TypeId, ptr: PtrSize) -> Self {
        Self {
            id: INSTANCE_ID,
            version: INSTANCE_VERSION,
            root_type,
            instance_size: 0,
            is_64_bit_ptr: ptr == PtrSize::Ptr64,
            first_pointer_to_patch: NO_POINTER,
        }
    }

    /// Header size rounded up so the payload meets `alignment`.
    pub fn aligned_size(alignment: usize) -> usize {
        align_up(Self::SIZE, alignment)
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<NativeEndian>(self.id)?;
        w.write_u32::<NativeEndian>(self.version)?;
        w.write_u32::<NativeEndian>(self.root_type.as_u32())?;
        w.write_u32::<NativeEndian>(self.instance_size)?;
        w.write_u8(u8::from(self.is_64_bit_ptr))?;
        w.write_all(&[0u8; 3])?;
        w.write_u32::<NativeEndian>(self.first_pointer_to_patch)?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        let id = r.read_u32::<NativeEndian>()?;
        let version = r.read_u32::<NativeEndian>()?;
        let root_type = r.read_u32::<NativeEndian>()?;
        let instance_size = r.read_u32::<NativeEndian>()?;
        let is_64_bit_ptr = r.read_u8()? != 0;
        let mut pad = [0u8; 3];
        r.read_exact(&mut pad)?;
        let first_pointer_to_patch = r.read_u32::<NativeEndian>()?;

        let decode = |v: u32| {
            if id == INSTANCE_ID_SWAPPED {
                v.swap_bytes()
            } else {
                v
            }
        };

        Ok(Self {
            id,
            version,
            root_type: TypeId(decode(root_type)),
            instance_size: decode(instance_size),
            is_64_bit_ptr,
            first_pointer_to_patch: decode(first_pointer_to_patch),
        })
    }

    /// Write into the start of `out`.
    pub fn write_to(&self, out: &mut [u8]) -> Result<()> {
        if out.len() < Self::SIZE {
            return Err(DlError::BufferTooSmall {
                need: Self::SIZE,
                have: out.len(),
            });
        }
        let mut slot = &mut out[..Self::SIZE];
        self.write(&mut slot)?;
        Ok(())
    }

    /// Read from the start of `bytes`; a short buffer is malformed data.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(DlError::MalformedData(format!(
                "instance of {} bytes cannot hold a {}-byte header",
                bytes.len(),
                Self::SIZE
            )));
        }
        let mut r = &bytes[..Self::SIZE];
        Ok(Self::read(&mut r)?)
    }

    /// Check id then version, accepting both byte orders.
    pub fn validate(&self) -> Result<()> {
        if self.id != INSTANCE_ID && self.id != INSTANCE_ID_SWAPPED {
            return Err(DlError::MalformedData(format!(
                "unrecognised instance id {:#010x}",
                self.id
            )));
        }
        if self.version != INSTANCE_VERSION && self.version != INSTANCE_VERSION_SWAPPED {
            return Err(DlError::VersionMismatch {
                found: self.version,
            });
        }
        Ok(())
    }

    pub fn is_swapped(&self) -> bool {
        self.id == INSTANCE_ID_SWAPPED
    }

    pub fn endian(&self) -> Endian {
        if self.is_swapped() {
            Endian::HOST.swapped()
        } else {
            Endian::HOST
        }
    }

    pub fn ptr_size(&self) -> PtrSize {
        if self.is_64_bit_ptr {
            PtrSize::Ptr64
        } else {
            PtrSize::Ptr32
        }
    }

    /// Overwrite the `instance_size` field of a header already written to `out`.
    pub(crate) fn set_instance_size(out: &mut [u8], size: u32) -> Result<()> {
        let end = Self::INSTANCE_SIZE_OFFSET + 4;
        let len = out.len();
        let mut slot = out
            .get_mut(Self::INSTANCE_SIZE_OFFSET..end)
            .ok_or(DlError::BufferTooSmall {
                need: end,
                have: len,
            })?;
        slot.write_u32::<NativeEndian>(size)?;
        Ok(())
    }
}

/// Summary of a packed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceInfo {
    pub root_type: TypeId,
    pub ptr_size: PtrSize,
    pub endian: Endian,
    /// Payload size in bytes, excluding the header.
    pub instance_size: usize,
}

/// Inspect the header of a packed instance.
pub fn instance_info(packed: &[u8]) -> Result<InstanceInfo> {
    let header = InstanceHeader::read_from(packed)?;
    header.validate()?;
    Ok(InstanceInfo {
        root_type: header.root_type,
        ptr_size: header.ptr_size(),
        endian: header.endian(),
        instance_size: header.instance_size as usize,
    })
}
