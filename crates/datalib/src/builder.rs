// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fluent builder API for schema contexts.
//!
//! Member types use the type-library syntax (see [`MemberType`]). Layouts are
//! computed for both pointer widths when the context is built, in dependency
//! order, and declared defaults are encoded into the context's default blob.

use crate::context::{ErrorHandler, SchemaContext};
use crate::encode::{int_range, InstanceWriter};
use crate::error::{DlError, Result};
use crate::typelib::TypeLibrary;
use crate::types::{
    align_up, AtomKind, Bitfield, DefaultRange, EnumDesc, EnumValue, MemberDesc, PtrSize,
    StorageKind, TypeClass, TypeDesc, TypeId,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Parsed member type.
///
/// | syntax             | meaning                                   |
/// |--------------------|-------------------------------------------|
/// | `int8` .. `fp64`   | builtin scalar                            |
/// | `string`           | pointer to NUL-terminated bytes           |
/// | `Name`             | nested struct or enum                     |
/// | `Name*`            | pointer to a struct                       |
/// | `elem[N]`          | inline array                              |
/// | `elem[]`           | dynamic array (pointer + u32 count)       |
/// | `bitfield:B[:u]`   | B bits of a shared unsigned unit (uint32) |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberType {
    Builtin(StorageKind),
    Named(String),
    Pointer(String),
    InlineArray(Box<MemberType>, usize),
    Array(Box<MemberType>),
    Bitfield { bits: u32, storage: StorageKind },
}

fn is_type_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

impl MemberType {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let bad = || DlError::type_library(format!("invalid member type '{}'", s));

        if let Some(rest) = s.strip_prefix("bitfield:") {
            let (bits, storage) = match rest.split_once(':') {
                Some((bits, unit)) => (bits, StorageKind::from_builtin(unit).ok_or_else(bad)?),
                None => (rest, StorageKind::Uint32),
            };
            if !storage.is_integer() || storage.is_signed() {
                return Err(bad());
            }
            let bits = bits.parse::<u32>().map_err(|_| bad())?;
            return Ok(Self::Bitfield { bits, storage });
        }
        if let Some(elem) = s.strip_suffix("[]") {
            return Ok(Self::Array(Box::new(Self::element(elem)?)));
        }
        if let Some(body) = s.strip_suffix(']') {
            let (elem, count) = body.rsplit_once('[').ok_or_else(bad)?;
            let count = count
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(bad)?;
            return Ok(Self::InlineArray(Box::new(Self::element(elem)?), count));
        }
        if let Some(target) = s.strip_suffix('*') {
            let target = target.trim();
            return if is_type_name(target) && StorageKind::from_builtin(target).is_none() {
                Ok(Self::Pointer(target.to_string()))
            } else {
                Err(bad())
            };
        }
        if let Some(kind) = StorageKind::from_builtin(s) {
            return Ok(Self::Builtin(kind));
        }
        if is_type_name(s) {
            return Ok(Self::Named(s.to_string()));
        }
        Err(bad())
    }

    /// Array element: no nested arrays or bitfields.
    fn element(s: &str) -> Result<Self> {
        match Self::parse(s)? {
            ty @ (Self::Builtin(_) | Self::Named(_) | Self::Pointer(_)) => Ok(ty),
            _ => Err(DlError::type_library(format!(
                "'{}' cannot be an array element",
                s.trim()
            ))),
        }
    }
}

impl FromStr for MemberType {
    type Err = DlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for MemberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin(kind) => f.write_str(kind.name()),
            Self::Named(name) => f.write_str(name),
            Self::Pointer(name) => write!(f, "{}*", name),
            Self::InlineArray(elem, n) => write!(f, "{}[{}]", elem, n),
            Self::Array(elem) => write!(f, "{}[]", elem),
            Self::Bitfield { bits, storage } if *storage == StorageKind::Uint32 => {
                write!(f, "bitfield:{}", bits)
            }
            Self::Bitfield { bits, storage } => write!(f, "bitfield:{}:{}", bits, storage.name()),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingMember {
    name: String,
    ty: String,
    default: Option<Value>,
}

/// Builder for one composite type.
#[derive(Debug, Clone)]
pub struct TypeBuilder {
    name: String,
    members: Vec<PendingMember>,
}

impl TypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a member using the type-library syntax (`"uint8"`, `"Vec3[4]"`, ...).
    pub fn member(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.members.push(PendingMember {
            name: name.into(),
            ty: ty.into(),
            default: None,
        });
        self
    }

    /// Add a member with a default value, used when data lacks the member.
    pub fn member_with_default(
        mut self,
        name: impl Into<String>,
        ty: impl Into<String>,
        default: impl Into<Value>,
    ) -> Self {
        self.members.push(PendingMember {
            name: name.into(),
            ty: ty.into(),
            default: Some(default.into()),
        });
        self
    }

    pub fn scalar(self, name: impl Into<String>, kind: StorageKind) -> Self {
        self.member(name, kind.name())
    }

    pub fn scalar_with_default(
        self,
        name: impl Into<String>,
        kind: StorageKind,
        default: impl Into<Value>,
    ) -> Self {
        self.member_with_default(name, kind.name(), default)
    }

    pub fn string(self, name: impl Into<String>) -> Self {
        self.member(name, "string")
    }

    /// Nested struct or enum member.
    pub fn nested(self, name: impl Into<String>, type_name: &str) -> Self {
        self.member(name, type_name)
    }

    pub fn pointer(self, name: impl Into<String>, type_name: &str) -> Self {
        self.member(name, format!("{}*", type_name))
    }

    pub fn inline_array(self, name: impl Into<String>, element: &str, count: usize) -> Self {
        self.member(name, format!("{}[{}]", element, count))
    }

    pub fn array(self, name: impl Into<String>, element: &str) -> Self {
        self.member(name, format!("{}[]", element))
    }

    /// Bitfield in a shared uint32 unit.
    pub fn bitfield(self, name: impl Into<String>, bits: u32) -> Self {
        self.member(name, format!("bitfield:{}", bits))
    }
}

/// Builder for enum types.
#[derive(Debug, Clone)]
pub struct EnumBuilder {
    name: String,
    storage: StorageKind,
    values: Vec<EnumValue>,
    next_value: i64,
}

impl EnumBuilder {
    /// New enum stored as uint32.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: StorageKind::Uint32,
            values: Vec::new(),
            next_value: 0,
        }
    }

    /// Integer kind the enum is stored as.
    pub fn storage(mut self, kind: StorageKind) -> Self {
        self.storage = kind;
        self
    }

    /// Add a value numbered one past the previous one.
    pub fn value(self, name: impl Into<String>) -> Self {
        let next = self.next_value;
        self.value_with(name, next)
    }

    pub fn value_with(mut self, name: impl Into<String>, value: i64) -> Self {
        self.values.push(EnumValue {
            name: name.into(),
            value,
        });
        self.next_value = value.wrapping_add(1);
        self
    }

    fn build(self) -> Result<EnumDesc> {
        let storage = self.storage.as_enum().ok_or_else(|| {
            DlError::type_library(format!(
                "enum '{}' cannot be stored as {}",
                self.name,
                self.storage.name()
            ))
        })?;
        let (lo, hi) = int_range(storage);
        let mut seen = HashSet::new();
        for v in &self.values {
            if !seen.insert(v.name.as_str()) {
                return Err(DlError::type_library(format!(
                    "enum '{}' declares '{}' twice",
                    self.name, v.name
                )));
            }
            if i128::from(v.value) < lo || i128::from(v.value) > hi {
                return Err(DlError::type_library(format!(
                    "value {} of '{}.{}' does not fit {}",
                    v.value,
                    self.name,
                    v.name,
                    self.storage.name()
                )));
            }
        }
        Ok(EnumDesc {
            id: TypeId::from_name(&self.name),
            name: self.name,
            storage,
            values: self.values,
        })
    }
}

/// Builder for a [`SchemaContext`].
#[derive(Default)]
pub struct ContextBuilder {
    types: Vec<TypeBuilder>,
    enums: Vec<EnumBuilder>,
    error_handler: Option<ErrorHandler>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_type(mut self, ty: TypeBuilder) -> Self {
        self.types.push(ty);
        self
    }

    pub fn add_enum(mut self, e: EnumBuilder) -> Self {
        self.enums.push(e);
        self
    }

    /// Hook receiving diagnostics reported against the built context.
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Add every enum and type declared by `lib`.
    pub fn load_type_library(mut self, lib: &TypeLibrary) -> Result<Self> {
        for (name, decl) in &lib.enums {
            let storage = match &decl.storage {
                Some(s) => StorageKind::from_builtin(s).ok_or_else(|| {
                    DlError::type_library(format!("enum '{}' has unknown storage '{}'", name, s))
                })?,
                None => StorageKind::Uint32,
            };
            let mut e = EnumBuilder::new(name.as_str()).storage(storage);
            for (value_name, value) in &decl.values {
                e = e.value_with(value_name.as_str(), *value);
            }
            self.enums.push(e);
        }
        for (name, decl) in &lib.types {
            let mut ty = TypeBuilder::new(name.as_str());
            for m in &decl.members {
                ty = match &m.default {
                    Some(default) => {
                        ty.member_with_default(m.name.as_str(), m.ty.as_str(), default.clone())
                    }
                    None => ty.member(m.name.as_str(), m.ty.as_str()),
                };
            }
            self.types.push(ty);
        }
        log::debug!(
            "loaded type library '{}': {} types, {} enums",
            lib.module.as_deref().unwrap_or("<unnamed>"),
            lib.types.len(),
            lib.enums.len()
        );
        Ok(self)
    }

    pub fn load_type_library_str(self, json: &str) -> Result<Self> {
        let lib = TypeLibrary::from_json_str(json)?;
        self.load_type_library(&lib)
    }

    pub fn load_type_library_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        let lib = TypeLibrary::from_file(path)?;
        self.load_type_library(&lib)
    }

    /// Resolve layouts, encode defaults and produce the context.
    pub fn build(self) -> Result<SchemaContext> {
        let mut enums = HashMap::new();
        let mut enum_names = HashMap::new();
        for e in self.enums {
            let desc = e.build()?;
            if enum_names.insert(desc.name.clone(), desc.id).is_some() {
                return Err(DlError::type_library(format!(
                    "enum '{}' declared twice",
                    desc.name
                )));
            }
            enums.insert(desc.id, desc);
        }

        let mut decls: HashMap<&str, &TypeBuilder> = HashMap::new();
        for ty in &self.types {
            if enum_names.contains_key(&ty.name) || decls.insert(ty.name.as_str(), ty).is_some() {
                return Err(DlError::type_library(format!(
                    "type '{}' declared twice",
                    ty.name
                )));
            }
        }

        let mut ids: HashMap<TypeId, &str> = HashMap::new();
        for name in enum_names.keys().map(String::as_str).chain(decls.keys().copied()) {
            if let Some(other) = ids.insert(TypeId::from_name(name), name) {
                return Err(DlError::type_library(format!(
                    "types '{}' and '{}' hash to the same id",
                    other, name
                )));
            }
        }

        let mut layouter = Layouter {
            decls: &decls,
            enums: &enums,
            done: HashMap::new(),
            visiting: Vec::new(),
            order: Vec::new(),
        };
        for ty in &self.types {
            layouter.resolve(&ty.name)?;
        }
        let Layouter { done, order, .. } = layouter;

        let mut ctx = SchemaContext {
            types: done.into_values().map(|t| (t.id, t)).collect(),
            enums,
            defaults: Vec::new(),
            error_handler: self.error_handler,
        };

        // dependencies come first, so nested defaults exist when an outer one is encoded
        for name in &order {
            let decl = decls
                .get(name.as_str())
                .ok_or_else(|| DlError::type_library(format!("type '{}' vanished", name)))?;
            let encoded = encode_defaults(&ctx, TypeId::from_name(name), decl)?;
            install_defaults(&mut ctx, TypeId::from_name(name), encoded)?;
        }

        log::debug!(
            "built context: {} types, {} enums, {} default bytes",
            ctx.types.len(),
            ctx.enums.len(),
            ctx.defaults.len()
        );
        Ok(ctx)
    }
}

type EncodedDefault = (usize, [Vec<u8>; 2]);

fn encode_defaults(
    ctx: &SchemaContext,
    id: TypeId,
    decl: &TypeBuilder,
) -> Result<Vec<EncodedDefault>> {
    let ty = ctx.find_type(id).ok_or(DlError::TypeNotFound(id))?;
    let mut encoded = Vec::new();
    for (index, (m, declared)) in ty.members.iter().zip(&decl.members).enumerate() {
        let Some(value) = &declared.default else {
            continue;
        };
        let mut per_width: [Vec<u8>; 2] = [Vec::new(), Vec::new()];
        for ptr in PtrSize::ALL {
            let mut w = InstanceWriter::new(ctx, ptr);
            let at = w.reserve(m.size(ptr), m.alignment(ptr));
            w.write_member(ty, m, at, Some(value)).map_err(|e| {
                DlError::type_library(format!("default of '{}.{}': {}", ty.name, m.name, e))
            })?;
            per_width[ptr.index()] = w.into_bytes();
        }
        encoded.push((index, per_width));
    }
    Ok(encoded)
}

fn install_defaults(ctx: &mut SchemaContext, id: TypeId, encoded: Vec<EncodedDefault>) -> Result<()> {
    for (index, per_width) in encoded {
        let mut ranges = [DefaultRange { offset: 0, size: 0 }; 2];
        for (range, bytes) in ranges.iter_mut().zip(&per_width) {
            *range = DefaultRange {
                offset: ctx.defaults.len(),
                size: bytes.len(),
            };
            ctx.defaults.extend_from_slice(bytes);
        }
        let member = ctx
            .types
            .get_mut(&id)
            .and_then(|t| t.members.get_mut(index))
            .ok_or(DlError::TypeNotFound(id))?;
        member.default = Some(ranges);
    }
    Ok(())
}

/// Resolved element of a member: storage, referenced type and per-width layout.
struct Element {
    storage: StorageKind,
    type_id: TypeId,
    size: [usize; 2],
    align: [usize; 2],
}

impl Element {
    fn fixed(storage: StorageKind, type_id: TypeId, size: usize) -> Self {
        Self {
            storage,
            type_id,
            size: [size; 2],
            align: [size; 2],
        }
    }

    fn pointer(storage: StorageKind, type_id: TypeId) -> Self {
        let p = PtrSize::ALL.map(PtrSize::bytes);
        Self {
            storage,
            type_id,
            size: p,
            align: p,
        }
    }
}

struct OpenUnit {
    offset: [usize; 2],
    storage: StorageKind,
    used: u32,
}

struct Layouter<'b> {
    decls: &'b HashMap<&'b str, &'b TypeBuilder>,
    enums: &'b HashMap<TypeId, EnumDesc>,
    done: HashMap<String, TypeDesc>,
    visiting: Vec<String>,
    order: Vec<String>,
}

impl Layouter<'_> {
    /// Size and alignment of `name`, laying it out first if needed.
    fn resolve(&mut self, name: &str) -> Result<([usize; 2], [usize; 2])> {
        if let Some(t) = self.done.get(name) {
            return Ok((t.size, t.alignment));
        }
        if let Some(start) = self.visiting.iter().position(|v| v == name) {
            let mut path = self.visiting[start..].to_vec();
            path.push(name.to_string());
            return Err(DlError::type_library(format!(
                "types contain each other by value: {}",
                path.join(" -> ")
            )));
        }
        let decls = self.decls;
        let decl = *decls
            .get(name)
            .ok_or_else(|| DlError::type_library(format!("unknown type '{}'", name)))?;

        self.visiting.push(name.to_string());
        let desc = self.layout(decl)?;
        self.visiting.pop();

        let result = (desc.size, desc.alignment);
        log::trace!(
            "laid out '{}': {:?} bytes, {} members",
            name,
            desc.size,
            desc.members.len()
        );
        self.order.push(name.to_string());
        self.done.insert(name.to_string(), desc);
        Ok(result)
    }

    fn element(&mut self, owner: &str, member: &str, ty: &MemberType, by_value: bool) -> Result<Element> {
        match ty {
            MemberType::Builtin(StorageKind::Str) => {
                Ok(Element::pointer(StorageKind::Str, TypeId::NONE))
            }
            MemberType::Builtin(kind) => {
                let size = kind.fixed_size().ok_or_else(|| {
                    DlError::type_library(format!("'{}' is not a builtin scalar", kind.name()))
                })?;
                Ok(Element::fixed(*kind, TypeId::NONE, size))
            }
            MemberType::Named(name) => {
                let id = TypeId::from_name(name);
                if let Some(e) = self.enums.get(&id) {
                    let size = e.storage.fixed_size().unwrap_or(4);
                    return Ok(Element::fixed(e.storage, id, size));
                }
                if !self.decls.contains_key(name.as_str()) {
                    return Err(DlError::type_library(format!(
                        "member '{}.{}' references unknown type '{}'",
                        owner, member, name
                    )));
                }
                if !by_value {
                    // out-of-line elements: layout is not needed here
                    return Ok(Element::pointer(StorageKind::Struct, id));
                }
                let (size, align) = self.resolve(name)?;
                Ok(Element {
                    storage: StorageKind::Struct,
                    type_id: id,
                    size,
                    align,
                })
            }
            MemberType::Pointer(name) => {
                if !self.decls.contains_key(name.as_str()) {
                    return Err(DlError::type_library(format!(
                        "member '{}.{}' points to unknown type '{}'",
                        owner, member, name
                    )));
                }
                Ok(Element::pointer(StorageKind::Ptr, TypeId::from_name(name)))
            }
            other => Err(DlError::type_library(format!(
                "member '{}.{}': '{}' cannot be used here",
                owner, member, other
            ))),
        }
    }

    fn layout(&mut self, decl: &TypeBuilder) -> Result<TypeDesc> {
        let mut members = Vec::with_capacity(decl.members.len());
        let mut names = HashSet::new();
        let mut offset = [0usize; 2];
        let mut align = [1usize; 2];
        let mut unit: Option<OpenUnit> = None;

        for declared in &decl.members {
            if !names.insert(declared.name.as_str()) {
                return Err(DlError::type_library(format!(
                    "type '{}' declares member '{}' twice",
                    decl.name, declared.name
                )));
            }
            let ty = MemberType::parse(&declared.ty).map_err(|e| {
                DlError::type_library(format!("member '{}.{}': {}", decl.name, declared.name, e))
            })?;
            if declared.default.is_some() && matches!(ty, MemberType::Array(_) | MemberType::Pointer(_)) {
                return Err(DlError::type_library(format!(
                    "member '{}.{}': pointer and array members cannot have defaults",
                    decl.name, declared.name
                )));
            }

            if let MemberType::Bitfield { bits, storage } = ty {
                let unit_size = storage.fixed_size().unwrap_or(4);
                let capacity = unit_size as u32 * 8;
                if bits == 0 || bits > capacity {
                    return Err(DlError::type_library(format!(
                        "bitfield '{}.{}' of {} bits does not fit {}",
                        decl.name,
                        declared.name,
                        bits,
                        storage.name()
                    )));
                }
                let (unit_offset, bit_offset) = match unit.as_mut() {
                    Some(open) if open.storage == storage && open.used + bits <= capacity => {
                        let bit_offset = open.used;
                        open.used += bits;
                        (open.offset, bit_offset)
                    }
                    _ => {
                        let mut at = [0usize; 2];
                        for w in 0..2 {
                            offset[w] = align_up(offset[w], unit_size);
                            at[w] = offset[w];
                            offset[w] += unit_size;
                            align[w] = align[w].max(unit_size);
                        }
                        unit = Some(OpenUnit {
                            offset: at,
                            storage,
                            used: bits,
                        });
                        (at, 0)
                    }
                };
                members.push(MemberDesc {
                    name: declared.name.clone(),
                    class: TypeClass::new(AtomKind::Bitfield, storage),
                    type_id: TypeId::NONE,
                    offset: unit_offset,
                    size: [unit_size; 2],
                    alignment: [unit_size; 2],
                    count: 1,
                    bitfield: Some(Bitfield { bit_offset, bits }),
                    default: None,
                });
                continue;
            }
            unit = None;

            let (class, elem, size, malign, count) = match &ty {
                MemberType::InlineArray(elem, n) => {
                    let e = self.element(&decl.name, &declared.name, elem, true)?;
                    let size = e.size.map(|s| s * n);
                    let malign = e.align;
                    (TypeClass::new(AtomKind::InlineArray, e.storage), e, size, malign, *n)
                }
                MemberType::Array(elem) => {
                    let e = self.element(&decl.name, &declared.name, elem, false)?;
                    let p = PtrSize::ALL.map(PtrSize::bytes);
                    let size = [align_up(p[0] + 4, p[0]), align_up(p[1] + 4, p[1])];
                    (TypeClass::new(AtomKind::Array, e.storage), e, size, p, 1)
                }
                scalar => {
                    let e = self.element(&decl.name, &declared.name, scalar, true)?;
                    let (size, malign) = (e.size, e.align);
                    (TypeClass::pod(e.storage), e, size, malign, 1)
                }
            };

            let mut at = [0usize; 2];
            for w in 0..2 {
                offset[w] = align_up(offset[w], malign[w]);
                at[w] = offset[w];
                offset[w] += size[w];
                align[w] = align[w].max(malign[w]);
            }
            members.push(MemberDesc {
                name: declared.name.clone(),
                class,
                type_id: elem.type_id,
                offset: at,
                size,
                alignment: malign,
                count,
                bitfield: None,
                default: None,
            });
        }

        Ok(TypeDesc {
            id: TypeId::from_name(&decl.name),
            name: decl.name.clone(),
            members,
            size: [align_up(offset[0], align[0]), align_up(offset[1], align[1])],
            alignment: align,
        })
    }
}
