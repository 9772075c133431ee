// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Text instance pack/unpack.
//!
//! The text form is a JSON object with a single key naming the root type:
//!
//! ```json
//! { "Player": { "name": "scout", "team": "blue", "pos": [0.0, 1.5, 0.0] } }
//! ```
//!
//! Packing produces a packed instance (header, root data, out-of-line data) in
//! host byte order. Unpacking reverses it; members are emitted in declaration
//! order.

use crate::context::SchemaContext;
use crate::encode::{element_layout, InstanceWriter};
use crate::error::{DlError, Result};
use crate::header::InstanceHeader;
use crate::patch::DEFAULT_MAX_DEPTH;
use crate::types::{AtomKind, MemberDesc, PtrSize, StorageKind, TypeDesc, TypeId};
use crate::view::ByteView;
use serde_json::{Map, Number, Value};

/// Text to packed instance.
#[derive(Debug, Clone, Copy)]
pub struct TxtPacker<'c> {
    ctx: &'c SchemaContext,
    ptr: PtrSize,
}

impl<'c> TxtPacker<'c> {
    pub fn new(ctx: &'c SchemaContext) -> Self {
        Self {
            ctx,
            ptr: PtrSize::HOST,
        }
    }

    pub fn with_ptr_size(mut self, ptr: PtrSize) -> Self {
        self.ptr = ptr;
        self
    }

    /// Bytes [`pack`](Self::pack) will write for `text`.
    pub fn calc_size(&self, text: &str) -> Result<usize> {
        Ok(self.encode(text)?.len())
    }

    /// Pack `text` into `out`, returning the number of bytes written.
    pub fn pack(&self, text: &str, out: &mut [u8]) -> Result<usize> {
        let bytes = self.encode(text)?;
        let have = out.len();
        let dst = out.get_mut(..bytes.len()).ok_or(DlError::BufferTooSmall {
            need: bytes.len(),
            have,
        })?;
        dst.copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    pub fn pack_to_vec(&self, text: &str) -> Result<Vec<u8>> {
        self.encode(text)
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let doc: Value = serde_json::from_str(text)?;
        let (name, body) = doc
            .as_object()
            .filter(|root| root.len() == 1)
            .and_then(|root| root.iter().next())
            .ok_or_else(|| DlError::txt("expected an object with exactly one root type key"))?;
        let ty = self
            .ctx
            .find_type_by_name(name)
            .ok_or_else(|| DlError::txt(format!("unknown root type '{}'", name)))?;

        let ptr = self.ptr;
        let header_size = InstanceHeader::aligned_size(ty.alignment(ptr));
        let mut writer = InstanceWriter::with_prefix(self.ctx, ptr, header_size);
        let root = writer.reserve(ty.size(ptr), ty.alignment(ptr));
        writer.write_struct(ty, root, body)?;
        let mut bytes = writer.into_bytes();

        let payload = bytes.len() - header_size;
        let mut header = InstanceHeader::new(ty.id, ptr);
        header.instance_size = u32::try_from(payload)
            .map_err(|_| DlError::txt(format!("instance of {} bytes is too large", payload)))?;
        header.write_to(&mut bytes)?;

        log::debug!("packed '{}' ({} bytes)", ty.name, bytes.len());
        Ok(bytes)
    }
}

/// Packed instance to text.
#[derive(Debug, Clone, Copy)]
pub struct TxtUnpacker<'c> {
    ctx: &'c SchemaContext,
    ptr: PtrSize,
}

impl<'c> TxtUnpacker<'c> {
    pub fn new(ctx: &'c SchemaContext) -> Self {
        Self {
            ctx,
            ptr: PtrSize::HOST,
        }
    }

    pub fn with_ptr_size(mut self, ptr: PtrSize) -> Self {
        self.ptr = ptr;
        self
    }

    /// Bytes of UTF-8 text [`unpack`](Self::unpack) will write for `packed`.
    pub fn calc_size(&self, packed: &[u8]) -> Result<usize> {
        Ok(self.decode(packed)?.len())
    }

    /// Unpack into `out`, returning the number of bytes written.
    pub fn unpack(&self, packed: &[u8], out: &mut [u8]) -> Result<usize> {
        let text = self.decode(packed)?;
        let have = out.len();
        let dst = out.get_mut(..text.len()).ok_or(DlError::BufferTooSmall {
            need: text.len(),
            have,
        })?;
        dst.copy_from_slice(text.as_bytes());
        Ok(text.len())
    }

    pub fn unpack_to_string(&self, packed: &[u8]) -> Result<String> {
        self.decode(packed)
    }

    /// Unpack to a JSON value of the form `{"<RootType>": {...}}`.
    pub fn unpack_to_value(&self, packed: &[u8]) -> Result<Value> {
        let header = InstanceHeader::read_from(packed)?;
        header.validate()?;
        if header.is_swapped() {
            return Err(DlError::EndianMismatch);
        }
        if header.ptr_size() != self.ptr {
            return Err(DlError::PtrSizeMismatch {
                expected: self.ptr.bytes(),
                found: header.ptr_size().bytes(),
            });
        }
        let ty = self
            .ctx
            .find_type(header.root_type)
            .ok_or(DlError::TypeNotFound(header.root_type))?;

        let origin = InstanceHeader::aligned_size(ty.alignment(self.ptr));
        let reader = InstanceReader {
            ctx: self.ctx,
            ptr: self.ptr,
            view: ByteView::new(packed),
            origin,
        };
        let body = reader.read_struct(ty, origin, 0)?;

        let mut root = Map::new();
        root.insert(ty.name.clone(), body);
        Ok(Value::Object(root))
    }

    fn decode(&self, packed: &[u8]) -> Result<String> {
        let value = self.unpack_to_value(packed)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

/// Decodes instance data back into JSON values.
struct InstanceReader<'c, 'b> {
    ctx: &'c SchemaContext,
    ptr: PtrSize,
    view: ByteView<'b>,
    origin: usize,
}

impl InstanceReader<'_, '_> {
    fn read_struct(&self, ty: &TypeDesc, at: usize, depth: usize) -> Result<Value> {
        if depth > DEFAULT_MAX_DEPTH {
            return Err(DlError::DepthExceeded(DEFAULT_MAX_DEPTH));
        }
        let mut obj = Map::new();
        for m in &ty.members {
            let value = self.read_member(m, at + m.offset(self.ptr), depth)?;
            obj.insert(m.name.clone(), value);
        }
        Ok(Value::Object(obj))
    }

    fn read_member(&self, m: &MemberDesc, at: usize, depth: usize) -> Result<Value> {
        let ptr = self.ptr;
        match m.atom() {
            AtomKind::Pod => self.read_element(m.storage(), m.type_id, at, depth),
            AtomKind::Bitfield => {
                let field = m.bitfield.ok_or_else(|| {
                    DlError::MalformedData(format!("bitfield '{}' has no bit range", m.name))
                })?;
                let unit = self.view.read_uint(at, m.size(ptr))?;
                Ok(Value::from(field.extract(unit)))
            }
            AtomKind::InlineArray => {
                let stride = m.size(ptr) / m.count.max(1);
                (0..m.count)
                    .map(|i| self.read_element(m.storage(), m.type_id, at + i * stride, depth))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array)
            }
            AtomKind::Array => {
                let count = self.view.read_u32(at + ptr.bytes())? as usize;
                let Some(rel) = self.view.read_ptr(at, ptr)? else {
                    return Ok(Value::Array(Vec::new()));
                };
                let data = self.locate(rel)?;
                let (size, _) = element_layout(self.ctx, m.storage(), m.type_id, ptr)?;
                // the whole run must exist before decoding any of it
                self.view.bytes(data, size.saturating_mul(count))?;
                (0..count)
                    .map(|i| self.read_element(m.storage(), m.type_id, data + i * size, depth))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array)
            }
        }
    }

    fn read_element(
        &self,
        storage: StorageKind,
        type_id: TypeId,
        at: usize,
        depth: usize,
    ) -> Result<Value> {
        let view = &self.view;
        let value = match storage {
            StorageKind::Struct => {
                let ty = self
                    .ctx
                    .find_type(type_id)
                    .ok_or(DlError::TypeNotFound(type_id))?;
                return self.read_struct(ty, at, depth + 1);
            }
            StorageKind::Ptr => match view.read_ptr(at, self.ptr)? {
                None => Value::Null,
                Some(rel) => {
                    let ty = self
                        .ctx
                        .find_type(type_id)
                        .ok_or(DlError::TypeNotFound(type_id))?;
                    return self.read_struct(ty, self.locate(rel)?, depth + 1);
                }
            },
            StorageKind::Str => match view.read_ptr(at, self.ptr)? {
                None => Value::Null,
                Some(rel) => {
                    let bytes = view.read_cstr(self.locate(rel)?, usize::MAX)?;
                    Value::String(String::from_utf8_lossy(bytes).into_owned())
                }
            },
            StorageKind::Fp32 => {
                // shortest text that reads back as the same f32
                let v = view.read_f32(at)?;
                float_value(v.to_string().parse().unwrap_or(f64::from(v)))?
            }
            StorageKind::Fp64 => float_value(view.read_f64(at)?)?,
            kind if kind.is_enum() => {
                let raw = signed_value(view, kind.underlying(), at)?;
                let name = self
                    .ctx
                    .find_enum(type_id)
                    .and_then(|e| e.name_of(raw));
                match name {
                    Some(name) => Value::String(name.to_owned()),
                    None => integer_value(view, kind.underlying(), at)?,
                }
            }
            kind => integer_value(view, kind, at)?,
        };
        Ok(value)
    }

    /// Absolute offset of a stored relative pointer.
    fn locate(&self, rel: u64) -> Result<usize> {
        usize::try_from(rel)
            .ok()
            .and_then(|rel| self.origin.checked_add(rel))
            .filter(|at| *at < self.view.len())
            .ok_or_else(|| {
                DlError::MalformedData(format!("pointer {:#x} leaves the instance", rel))
            })
    }
}

fn float_value(v: f64) -> Result<Value> {
    Number::from_f64(v)
        .map(Value::Number)
        .ok_or_else(|| DlError::txt(format!("{} has no text form", v)))
}

/// Integer at `at` widened to i64 (u64 values above i64::MAX wrap).
fn signed_value(view: &ByteView<'_>, kind: StorageKind, at: usize) -> Result<i64> {
    Ok(match kind {
        StorageKind::Int8 => i64::from(view.read_i8(at)?),
        StorageKind::Int16 => i64::from(view.read_i16(at)?),
        StorageKind::Int32 => i64::from(view.read_i32(at)?),
        StorageKind::Int64 => view.read_i64(at)?,
        StorageKind::Uint8 => i64::from(view.read_u8(at)?),
        StorageKind::Uint16 => i64::from(view.read_u16(at)?),
        StorageKind::Uint32 => i64::from(view.read_u32(at)?),
        StorageKind::Uint64 => view.read_u64(at)? as i64,
        other => {
            return Err(DlError::MalformedData(format!(
                "{} is not an integer kind",
                other.name()
            )))
        }
    })
}

fn integer_value(view: &ByteView<'_>, kind: StorageKind, at: usize) -> Result<Value> {
    match kind {
        StorageKind::Uint64 => Ok(Value::from(view.read_u64(at)?)),
        other => signed_value(view, other, at).map(Value::from),
    }
}

/// Pack `text` at host pointer width.
pub fn txt_pack(ctx: &SchemaContext, text: &str) -> Result<Vec<u8>> {
    TxtPacker::new(ctx).pack_to_vec(text)
}

pub fn txt_pack_calc_size(ctx: &SchemaContext, text: &str) -> Result<usize> {
    TxtPacker::new(ctx).calc_size(text)
}

/// Unpack a host-width packed instance to text.
pub fn txt_unpack(ctx: &SchemaContext, packed: &[u8]) -> Result<String> {
    TxtUnpacker::new(ctx).unpack_to_string(packed)
}

pub fn txt_unpack_calc_size(ctx: &SchemaContext, packed: &[u8]) -> Result<usize> {
    TxtUnpacker::new(ctx).calc_size(packed)
}
