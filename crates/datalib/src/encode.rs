// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! JSON value to instance encoder.
//!
//! Shared by default-value encoding in [`ContextBuilder`](crate::ContextBuilder)
//! and by the text packer. The writer owns a growing buffer: fixed-size data is
//! reserved in place, out-of-line data (strings, dynamic arrays, pointed-to
//! structs) is appended at the end. Pointers are stored relative to `origin`.

use crate::context::SchemaContext;
use crate::error::{DlError, Result};
use crate::types::{align_up, AtomKind, MemberDesc, PtrSize, StorageKind, TypeDesc, TypeId};
use crate::view::{ByteView, ByteViewMut};
use serde_json::Value;

/// Inclusive value range of an integer kind.
pub(crate) fn int_range(kind: StorageKind) -> (i128, i128) {
    let bits = kind.fixed_size().unwrap_or(8) as u32 * 8;
    if kind.is_signed() {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    }
}

/// Size and alignment of one element of `storage`.
pub(crate) fn element_layout(
    ctx: &SchemaContext,
    storage: StorageKind,
    type_id: TypeId,
    ptr: PtrSize,
) -> Result<(usize, usize)> {
    match storage {
        StorageKind::Struct => {
            let ty = ctx
                .find_type(type_id)
                .ok_or(DlError::TypeNotFound(type_id))?;
            Ok((ty.size(ptr), ty.alignment(ptr)))
        }
        StorageKind::Str | StorageKind::Ptr => Ok((ptr.bytes(), ptr.bytes())),
        other => {
            let size = other.fixed_size().ok_or_else(|| {
                DlError::MalformedData(format!("{} has no fixed size", other.name()))
            })?;
            Ok((size, size))
        }
    }
}

pub(crate) struct InstanceWriter<'c> {
    ctx: &'c SchemaContext,
    ptr: PtrSize,
    buf: Vec<u8>,
    origin: usize,
}

impl<'c> InstanceWriter<'c> {
    pub(crate) fn new(ctx: &'c SchemaContext, ptr: PtrSize) -> Self {
        Self::with_prefix(ctx, ptr, 0)
    }

    /// Writer whose instance data starts after `prefix` zeroed bytes.
    pub(crate) fn with_prefix(ctx: &'c SchemaContext, ptr: PtrSize, prefix: usize) -> Self {
        Self {
            ctx,
            ptr,
            buf: vec![0u8; prefix],
            origin: prefix,
        }
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Append a zeroed region of `size` bytes aligned to `align`.
    pub(crate) fn reserve(&mut self, size: usize, align: usize) -> usize {
        let at = align_up(self.buf.len(), align);
        self.buf.resize(at + size, 0);
        at
    }

    fn out(&mut self) -> ByteViewMut<'_> {
        ByteViewMut::new(&mut self.buf)
    }

    fn relative(&self, at: usize) -> u64 {
        (at - self.origin) as u64
    }

    fn append_str(&mut self, bytes: &[u8]) -> usize {
        let at = self.buf.len();
        self.buf.extend_from_slice(bytes);
        self.buf.push(0);
        at
    }

    /// Encode a JSON object as an instance of `ty` at `at`.
    pub(crate) fn write_struct(&mut self, ty: &TypeDesc, at: usize, value: &Value) -> Result<()> {
        let obj = value.as_object().ok_or_else(|| {
            DlError::txt(format!("expected an object for type '{}'", ty.name))
        })?;
        if let Some(unknown) = obj.keys().find(|k| ty.find_member(k).is_none()) {
            return Err(DlError::txt(format!(
                "type '{}' has no member '{}'",
                ty.name, unknown
            )));
        }
        for m in &ty.members {
            self.write_member(ty, m, at + m.offset(self.ptr), obj.get(&m.name))?;
        }
        Ok(())
    }

    /// Encode one member at `at`; `None` falls back to the member default.
    pub(crate) fn write_member(
        &mut self,
        owner: &TypeDesc,
        m: &MemberDesc,
        at: usize,
        value: Option<&Value>,
    ) -> Result<()> {
        let Some(value) = value else {
            return self.write_default(owner, m, at);
        };
        let ptr = self.ptr;

        match m.atom() {
            AtomKind::Pod => self.write_element(&m.name, m.storage(), m.type_id, at, value),
            AtomKind::Bitfield => {
                let field = m.bitfield.ok_or_else(|| {
                    DlError::MalformedData(format!("bitfield '{}' has no bit range", m.name))
                })?;
                let v = value
                    .as_u64()
                    .filter(|v| *v <= field.mask())
                    .ok_or_else(|| {
                        DlError::txt(format!(
                            "'{}' needs an integer of at most {} bits, got {}",
                            m.name, field.bits, value
                        ))
                    })?;
                let size = m.size(ptr);
                let unit = self.out().as_view().read_uint(at, size)?;
                self.out().write_uint(at, size, field.insert(unit, v))
            }
            AtomKind::InlineArray => {
                let items = value
                    .as_array()
                    .filter(|items| items.len() == m.count)
                    .ok_or_else(|| {
                        DlError::txt(format!("'{}' needs an array of {} items", m.name, m.count))
                    })?;
                let stride = m.size(ptr) / m.count.max(1);
                for (i, item) in items.iter().enumerate() {
                    self.write_element(&m.name, m.storage(), m.type_id, at + i * stride, item)?;
                }
                Ok(())
            }
            AtomKind::Array => {
                let items = value
                    .as_array()
                    .ok_or_else(|| DlError::txt(format!("'{}' needs an array", m.name)))?;
                let count = u32::try_from(items.len())
                    .map_err(|_| DlError::txt(format!("'{}' has too many items", m.name)))?;
                let target = if items.is_empty() {
                    None
                } else {
                    let (size, align) = element_layout(self.ctx, m.storage(), m.type_id, ptr)?;
                    let data = self.reserve(size * items.len(), align);
                    for (i, item) in items.iter().enumerate() {
                        self.write_element(&m.name, m.storage(), m.type_id, data + i * size, item)?;
                    }
                    Some(self.relative(data))
                };
                self.out().write_ptr(at, ptr, target)?;
                self.out().write_u32(at + ptr.bytes(), count)
            }
        }
    }

    fn write_element(
        &mut self,
        member: &str,
        storage: StorageKind,
        type_id: TypeId,
        at: usize,
        value: &Value,
    ) -> Result<()> {
        let ctx = self.ctx;
        let ptr = self.ptr;

        match storage {
            StorageKind::Struct => {
                let ty = ctx.find_type(type_id).ok_or(DlError::TypeNotFound(type_id))?;
                self.write_struct(ty, at, value)
            }
            StorageKind::Ptr => {
                let target = if value.is_null() {
                    None
                } else {
                    let ty = ctx.find_type(type_id).ok_or(DlError::TypeNotFound(type_id))?;
                    let data = self.reserve(ty.size(ptr), ty.alignment(ptr));
                    self.write_struct(ty, data, value)?;
                    Some(self.relative(data))
                };
                self.out().write_ptr(at, ptr, target)
            }
            StorageKind::Str => {
                let target = match value {
                    Value::Null => None,
                    Value::String(s) if !s.as_bytes().contains(&0) => {
                        let data = self.append_str(s.as_bytes());
                        Some(self.relative(data))
                    }
                    other => {
                        return Err(DlError::txt(format!(
                            "'{}' needs a string without NUL bytes, got {}",
                            member, other
                        )))
                    }
                };
                self.out().write_ptr(at, ptr, target)
            }
            kind => {
                let bits = scalar_bits(ctx, member, kind, type_id, value)?;
                let size = kind.fixed_size().unwrap_or(0);
                self.out().write_uint(at, size, bits)
            }
        }
    }

    fn write_default(&mut self, owner: &TypeDesc, m: &MemberDesc, at: usize) -> Result<()> {
        let ctx = self.ctx;
        let ptr = self.ptr;
        let range = m.default(ptr).ok_or_else(|| DlError::MemberWithoutDefault {
            type_name: owner.name.clone(),
            member: m.name.clone(),
        })?;
        let bytes = ctx.default_bytes(range).ok_or_else(|| {
            DlError::MalformedData(format!("default of '{}' lies outside the blob", m.name))
        })?;
        let src = ByteView::new(bytes);
        let size = m.size(ptr);

        if let (AtomKind::Bitfield, Some(field)) = (m.atom(), m.bitfield) {
            let value = field.extract(src.read_uint(0, size)?);
            let unit = self.out().as_view().read_uint(at, size)?;
            return self.out().write_uint(at, size, field.insert(unit, value));
        }

        self.out().write_bytes(at, src.bytes(0, size)?)?;
        if bytes.len() > size {
            // pointer-bearing default: re-home its out-of-line data
            self.relocate_member(m, at, src, 0)?;
        }
        Ok(())
    }

    fn relocate_member(
        &mut self,
        m: &MemberDesc,
        at: usize,
        src: ByteView<'c>,
        src_at: usize,
    ) -> Result<()> {
        match m.atom() {
            AtomKind::Pod => self.relocate_element(m.storage(), m.type_id, at, src, src_at),
            AtomKind::InlineArray => {
                let stride = m.size(self.ptr) / m.count.max(1);
                for i in 0..m.count {
                    let off = i * stride;
                    self.relocate_element(m.storage(), m.type_id, at + off, src, src_at + off)?;
                }
                Ok(())
            }
            AtomKind::Bitfield | AtomKind::Array => Ok(()),
        }
    }

    fn relocate_element(
        &mut self,
        storage: StorageKind,
        type_id: TypeId,
        at: usize,
        src: ByteView<'c>,
        src_at: usize,
    ) -> Result<()> {
        let ctx = self.ctx;
        let ptr = self.ptr;
        match storage {
            StorageKind::Str => {
                let target = match src.read_ptr(src_at, ptr)? {
                    Some(rel) => {
                        let text = src.read_cstr(rel as usize, usize::MAX)?;
                        let data = self.append_str(text);
                        Some(self.relative(data))
                    }
                    None => None,
                };
                self.out().write_ptr(at, ptr, target)
            }
            StorageKind::Struct => {
                let ty = ctx.find_type(type_id).ok_or(DlError::TypeNotFound(type_id))?;
                for m in &ty.members {
                    let off = m.offset(ptr);
                    self.relocate_member(m, at + off, src, src_at + off)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Raw bits of a JSON number (or enum value name) for scalar kind `kind`.
pub(crate) fn scalar_bits(
    ctx: &SchemaContext,
    member: &str,
    kind: StorageKind,
    type_id: TypeId,
    value: &Value,
) -> Result<u64> {
    let mismatch = || {
        DlError::txt(format!(
            "'{}' cannot hold {} as {}",
            member,
            value,
            kind.name()
        ))
    };

    match kind {
        StorageKind::Fp32 => {
            let v = value.as_f64().ok_or_else(mismatch)?;
            Ok(u64::from((v as f32).to_bits()))
        }
        StorageKind::Fp64 => value.as_f64().map(f64::to_bits).ok_or_else(mismatch),
        k if k.is_integer() => {
            let v: i128 = match value {
                Value::String(name) if k.is_enum() => ctx
                    .find_enum(type_id)
                    .and_then(|e| e.value_of(name))
                    .map(i128::from)
                    .ok_or_else(mismatch)?,
                _ => value
                    .as_i64()
                    .map(i128::from)
                    .or_else(|| value.as_u64().map(i128::from))
                    .ok_or_else(mismatch)?,
            };
            let (lo, hi) = int_range(k);
            if v < lo || v > hi {
                return Err(mismatch());
            }
            Ok(v as u64)
        }
        _ => Err(mismatch()),
    }
}
