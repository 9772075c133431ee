// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounds-checked views over instance buffers.
//!
//! Every access is addressed by an absolute offset taken from a descriptor and
//! checked against the buffer length, so a descriptor that disagrees with the
//! data yields [`DlError::OutOfBounds`] instead of a panic.

use crate::error::{DlError, Result};
use crate::types::PtrSize;

/// Generate native-endian read methods at an absolute offset.
macro_rules! impl_read_ne {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&self, offset: usize) -> Result<$type> {
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(self.bytes(offset, $size)?);
            Ok(<$type>::from_ne_bytes(bytes))
        }
    };
}

/// Generate native-endian write methods at an absolute offset.
macro_rules! impl_write_ne {
    ($name:ident, $type:ty) => {
        pub fn $name(&mut self, offset: usize, value: $type) -> Result<()> {
            self.write_bytes(offset, &value.to_ne_bytes())
        }
    };
}

fn out_of_bounds(offset: usize, len: usize, capacity: usize) -> DlError {
    DlError::OutOfBounds {
        offset,
        len,
        capacity,
    }
}

/// Read-only view of an instance buffer.
#[derive(Debug, Clone, Copy)]
pub struct ByteView<'a> {
    buffer: &'a [u8],
}

impl<'a> ByteView<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// `len` bytes starting at `offset`.
    pub fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.buffer.get(offset..end))
            .ok_or_else(|| out_of_bounds(offset, len, self.buffer.len()))
    }

    impl_read_ne!(read_u8, u8, 1);
    impl_read_ne!(read_u16, u16, 2);
    impl_read_ne!(read_u32, u32, 4);
    impl_read_ne!(read_u64, u64, 8);
    impl_read_ne!(read_i8, i8, 1);
    impl_read_ne!(read_i16, i16, 2);
    impl_read_ne!(read_i32, i32, 4);
    impl_read_ne!(read_i64, i64, 8);
    impl_read_ne!(read_f32, f32, 4);
    impl_read_ne!(read_f64, f64, 8);

    /// Unsigned value of 1, 2, 4 or 8 bytes, zero-extended.
    pub fn read_uint(&self, offset: usize, size: usize) -> Result<u64> {
        match size {
            1 => self.read_u8(offset).map(u64::from),
            2 => self.read_u16(offset).map(u64::from),
            4 => self.read_u32(offset).map(u64::from),
            8 => self.read_u64(offset),
            _ => Err(DlError::MalformedData(format!(
                "unsupported integer width {}",
                size
            ))),
        }
    }

    /// Pointer slot; the all-ones value is returned as `None`.
    pub fn read_ptr(&self, offset: usize, ptr: PtrSize) -> Result<Option<u64>> {
        let raw = self.read_uint(offset, ptr.bytes())?;
        Ok((raw != ptr.null()).then_some(raw))
    }

    /// NUL-terminated bytes at `offset`, at most `limit` of them (terminator excluded).
    pub fn read_cstr(&self, offset: usize, limit: usize) -> Result<&'a [u8]> {
        let tail = self
            .buffer
            .get(offset..)
            .ok_or_else(|| out_of_bounds(offset, 1, self.buffer.len()))?;
        match tail.iter().take(limit).position(|&b| b == 0) {
            Some(end) => Ok(&tail[..end]),
            None if tail.len() > limit => Ok(&tail[..limit]),
            None => Err(DlError::MalformedData(format!(
                "unterminated string at offset {}",
                offset
            ))),
        }
    }
}

/// Mutable view of an output buffer.
#[derive(Debug)]
pub struct ByteViewMut<'a> {
    buffer: &'a mut [u8],
}

impl<'a> ByteViewMut<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_view(&self) -> ByteView<'_> {
        ByteView::new(self.buffer)
    }

    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let capacity = self.buffer.len();
        offset
            .checked_add(data.len())
            .and_then(|end| self.buffer.get_mut(offset..end))
            .ok_or_else(|| out_of_bounds(offset, data.len(), capacity))?
            .copy_from_slice(data);
        Ok(())
    }

    impl_write_ne!(write_u8, u8);
    impl_write_ne!(write_u16, u16);
    impl_write_ne!(write_u32, u32);
    impl_write_ne!(write_u64, u64);

    /// Low `size` bytes of `bits` (1, 2, 4 or 8).
    pub fn write_uint(&mut self, offset: usize, size: usize, bits: u64) -> Result<()> {
        match size {
            1 => self.write_u8(offset, bits as u8),
            2 => self.write_u16(offset, bits as u16),
            4 => self.write_u32(offset, bits as u32),
            8 => self.write_u64(offset, bits),
            _ => Err(DlError::MalformedData(format!(
                "unsupported integer width {}",
                size
            ))),
        }
    }

    /// Pointer slot; `None` writes the null marker.
    pub fn write_ptr(&mut self, offset: usize, ptr: PtrSize, target: Option<u64>) -> Result<()> {
        self.write_uint(offset, ptr.bytes(), target.unwrap_or(ptr.null()))
    }
}
