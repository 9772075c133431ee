// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Instance patch engine.
//!
//! Rewrites an instance built against one schema context into the layout of
//! another. A [`PatchChain`] lists the known prior contexts, each paired with a
//! [`PatchFunc`]; [`instance_patch`] tries them in order.
//!
//! # Two-phase use
//!
//! Every call computes the exact output size. Writes only happen when the
//! output buffer is at least that large, so a call without a buffer (or with
//! a short one) is a size probe:
//!
//! ```ignore
//! let mut probe = PatchRequest::new(&chain, &packed, wanted).packed(true);
//! let size = instance_patch(&target, &mut probe)?;
//! let mut out = vec![0u8; size];
//! let mut req = PatchRequest::new(&chain, &packed, wanted).packed(true).output(&mut out);
//! instance_patch(&target, &mut req)?;
//! ```
//!
//! Strings, pointed-to structs and dynamic arrays of exactly copied members
//! are carried along: their data is appended after the fixed region of the
//! output and the pointers are rebased onto it.

use crate::coerce::{parse_scalar, render_scalar, ScratchBuffer};
use crate::compat::{classify, MemberPatch};
use crate::context::SchemaContext;
use crate::encode::element_layout;
use crate::error::{DlError, Result};
use crate::header::InstanceHeader;
use crate::types::{align_up, AtomKind, MemberDesc, PtrSize, StorageKind, TypeDesc, TypeId};
use crate::view::{ByteView, ByteViewMut};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

/// Default bound on composite nesting.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Patch configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchConfig {
    /// Layout variant of source and target instances.
    pub ptr_size: PtrSize,
    /// Maximum nesting of composite members.
    pub max_depth: usize,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            ptr_size: PtrSize::HOST,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl PatchConfig {
    pub fn with_ptr_size(mut self, ptr_size: PtrSize) -> Self {
        self.ptr_size = ptr_size;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// One unit of patch work.
pub struct PatchRequest<'a> {
    /// Source type; replaced by the header's root type for packed input.
    pub input_type: TypeId,
    /// Target type.
    pub wanted_type: TypeId,
    /// Source buffer (header included when packed).
    pub instance: &'a [u8],
    /// Output buffer; `None` probes the required size.
    pub output: Option<&'a mut [u8]>,
    pub packed_input: bool,
    pub packed_output: bool,
    /// Bytes needed for the output, set on success.
    pub used_size: Option<usize>,
    pub chain: &'a PatchChain,
    pub config: PatchConfig,
    /// Offset of the instance being patched inside `instance`.
    source_base: usize,
    /// Offset pointers in `instance` are relative to.
    source_origin: usize,
    /// Offset of `output` inside the outermost output buffer.
    target_base: usize,
    /// Out-of-line data of the outermost member-wise pass.
    tail: Option<&'a RefCell<Tail>>,
    depth: usize,
}

impl<'a> PatchRequest<'a> {
    /// Request patching `instance` into `wanted_type`; the source type defaults
    /// to the wanted type and is overridden by the header for packed input.
    pub fn new(chain: &'a PatchChain, instance: &'a [u8], wanted_type: TypeId) -> Self {
        Self {
            input_type: wanted_type,
            wanted_type,
            instance,
            output: None,
            packed_input: false,
            packed_output: false,
            used_size: None,
            chain,
            config: PatchConfig::default(),
            source_base: 0,
            source_origin: 0,
            target_base: 0,
            tail: None,
            depth: 0,
        }
    }

    pub fn input_type(mut self, input_type: TypeId) -> Self {
        self.input_type = input_type;
        self
    }

    pub fn output(mut self, output: &'a mut [u8]) -> Self {
        self.output = Some(output);
        self
    }

    pub fn packed_input(mut self, packed: bool) -> Self {
        self.packed_input = packed;
        self
    }

    pub fn packed_output(mut self, packed: bool) -> Self {
        self.packed_output = packed;
        self
    }

    /// Both input and output packed.
    pub fn packed(self, packed: bool) -> Self {
        self.packed_input(packed).packed_output(packed)
    }

    pub fn config(mut self, config: PatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Offset of the instance being patched inside `instance`.
    ///
    /// Zero at the top level, where packed input still starts with its header.
    pub fn source_base(&self) -> usize {
        self.source_base
    }

    /// Offset the pointers stored in `instance` are relative to.
    pub fn source_origin(&self) -> usize {
        self.source_origin
    }
}

impl fmt::Debug for PatchRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchRequest")
            .field("input_type", &self.input_type)
            .field("wanted_type", &self.wanted_type)
            .field("instance", &self.instance.len())
            .field("output", &self.output.as_ref().map(|o| o.len()))
            .field("packed_input", &self.packed_input)
            .field("packed_output", &self.packed_output)
            .field("used_size", &self.used_size)
            .field("config", &self.config)
            .field("depth", &self.depth)
            .finish()
    }
}

/// A conversion routine migrating instances of `source` into `target`.
///
/// Returns the number of output bytes needed. Implementations must only write
/// when `req.output` holds at least that many bytes.
pub trait PatchFunc: Send + Sync {
    fn patch(
        &self,
        target: &SchemaContext,
        source: &SchemaContext,
        req: &mut PatchRequest<'_>,
    ) -> Result<usize>;
}

impl<F> PatchFunc for F
where
    F: Fn(&SchemaContext, &SchemaContext, &mut PatchRequest<'_>) -> Result<usize> + Send + Sync,
{
    fn patch(
        &self,
        target: &SchemaContext,
        source: &SchemaContext,
        req: &mut PatchRequest<'_>,
    ) -> Result<usize> {
        self(target, source, req)
    }
}

/// Automatic member-by-member migration.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemberwisePatch;

impl PatchFunc for MemberwisePatch {
    fn patch(
        &self,
        target: &SchemaContext,
        source: &SchemaContext,
        req: &mut PatchRequest<'_>,
    ) -> Result<usize> {
        patch(target, source, req)
    }
}

/// A known source context and the routine migrating its instances.
#[derive(Clone)]
pub struct PatchEntry {
    pub context: Arc<SchemaContext>,
    pub func: Arc<dyn PatchFunc>,
}

impl PatchEntry {
    pub fn new<P: PatchFunc + 'static>(context: Arc<SchemaContext>, func: P) -> Self {
        Self {
            context,
            func: Arc::new(func),
        }
    }

    /// Entry running a hand-written migration closure.
    pub fn from_fn<F>(context: Arc<SchemaContext>, func: F) -> Self
    where
        F: Fn(&SchemaContext, &SchemaContext, &mut PatchRequest<'_>) -> Result<usize>
            + Send
            + Sync
            + 'static,
    {
        Self::new(context, func)
    }
}

impl fmt::Debug for PatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchEntry")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Ordered list of patch entries, tried first to last.
#[derive(Debug, Clone, Default)]
pub struct PatchChain {
    entries: Vec<PatchEntry>,
}

impl PatchChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: PatchEntry) {
        self.entries.push(entry);
    }

    pub fn with(mut self, entry: PatchEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn entries(&self) -> &[PatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<PatchEntry> for PatchChain {
    fn from_iter<I: IntoIterator<Item = PatchEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Patch `req.instance` into `req.wanted_type` of `target`, trying every chain
/// entry in order. Returns the used size, also stored in `req.used_size`.
pub fn instance_patch(target: &SchemaContext, req: &mut PatchRequest<'_>) -> Result<usize> {
    if req.packed_input {
        let header = InstanceHeader::read_from(req.instance)?;
        header.validate()?;
        if header.is_swapped() {
            return Err(DlError::EndianMismatch);
        }
        if header.ptr_size() != req.config.ptr_size {
            return Err(DlError::PtrSizeMismatch {
                expected: req.config.ptr_size.bytes(),
                found: header.ptr_size().bytes(),
            });
        }
        req.input_type = header.root_type;
    }

    let used = run_chain(target, req, None)?;
    if req.packed_output {
        finalize_header(target, req, used)?;
    }
    Ok(used)
}

/// Try the chain entries in order, those built on `preferred` first.
///
/// On exhaustion the failure of an entry that declares the source type is
/// returned, a detailed one taking precedence over a plain lookup miss.
fn run_chain(
    target: &SchemaContext,
    req: &mut PatchRequest<'_>,
    preferred: Option<&SchemaContext>,
) -> Result<usize> {
    let chain = req.chain;
    let entries = chain.entries();
    let is_preferred =
        |e: &PatchEntry| preferred.is_some_and(|p| std::ptr::eq(Arc::as_ptr(&e.context), p));
    let mut order: Vec<usize> = (0..entries.len())
        .filter(|&i| is_preferred(&entries[i]))
        .collect();
    order.extend((0..entries.len()).filter(|&i| !is_preferred(&entries[i])));

    let mut failure: Option<DlError> = None;
    for index in order {
        let entry = &entries[index];
        log::debug!(
            "patch {} -> {}: trying chain entry {}",
            req.input_type,
            req.wanted_type,
            index
        );
        let mark = req.tail.map(|tail| tail.borrow().mark());
        match entry.func.patch(target, &entry.context, req) {
            Ok(used) => {
                req.used_size = Some(used);
                return Ok(used);
            }
            Err(err) => {
                log::debug!("chain entry {} failed: {}", index, err);
                if let (Some(tail), Some(mark)) = (req.tail, mark) {
                    tail.borrow_mut().rewind(mark);
                }
                let recognised = entry.context.find_type(req.input_type).is_some();
                let better = failure
                    .as_ref()
                    .map_or(true, |held| is_lookup_miss(held) && !is_lookup_miss(&err));
                if recognised && better {
                    failure = Some(err);
                }
            }
        }
    }

    Err(failure.unwrap_or(DlError::NoMatchingSchema {
        type_id: req.input_type,
        attempts: entries.len(),
    }))
}

fn is_lookup_miss(err: &DlError) -> bool {
    matches!(err, DlError::TypeNotFound(_) | DlError::NoMatchingSchema { .. })
}

/// Record the payload size in a fully written packed output.
fn finalize_header(target: &SchemaContext, req: &mut PatchRequest<'_>, used: usize) -> Result<()> {
    let Some(ty) = target.find_type(req.wanted_type) else {
        return Ok(());
    };
    let header = InstanceHeader::aligned_size(ty.alignment(req.config.ptr_size));
    let Some(out) = req.output.as_deref_mut() else {
        return Ok(());
    };
    if out.len() < used {
        return Ok(());
    }
    let payload = used.saturating_sub(header);
    let size = u32::try_from(payload)
        .map_err(|_| DlError::MalformedData(format!("instance of {} bytes", payload)))?;
    InstanceHeader::set_instance_size(out, size)
}

/// Automatic member-wise migration of one instance of `req.input_type` (in
/// `source`) into `req.wanted_type` (in `target`).
pub fn patch(
    target: &SchemaContext,
    source: &SchemaContext,
    req: &mut PatchRequest<'_>,
) -> Result<usize> {
    if req.depth > req.config.max_depth {
        return Err(DlError::DepthExceeded(req.config.max_depth));
    }
    let ptr = req.config.ptr_size;
    let src_ty = source
        .find_type(req.input_type)
        .ok_or(DlError::TypeNotFound(req.input_type))?;
    let tgt_ty = target
        .find_type(req.wanted_type)
        .ok_or(DlError::TypeNotFound(req.wanted_type))?;

    let (base, origin) = if req.packed_input {
        let skip = InstanceHeader::aligned_size(src_ty.alignment(ptr));
        (skip, skip)
    } else {
        (req.source_base, req.source_origin)
    };
    let header_size = if req.packed_output {
        InstanceHeader::aligned_size(tgt_ty.alignment(ptr))
    } else {
        0
    };
    let fixed_size = header_size + tgt_ty.size(ptr);
    let capacity = req.output.as_deref().map_or(0, <[u8]>::len);
    let writable = capacity >= fixed_size;

    if req.packed_output && capacity >= header_size {
        if let Some(out) = req.output.as_deref_mut() {
            InstanceHeader::new(tgt_ty.id, ptr).write_to(out)?;
        }
    }

    // the outermost pass owns the out-of-line data, nested ones append to it
    let own_tail;
    let tail = match req.tail {
        Some(shared) => shared,
        None => {
            own_tail = RefCell::new(Tail::new(tgt_ty.size(ptr)));
            &own_tail
        }
    };

    let pass = MemberPass {
        target,
        source,
        src_ty,
        tgt_ty,
        ptr,
        instance: req.instance,
        base,
        origin,
        body: header_size,
        target_base: req.target_base,
        tail,
        chain: req.chain,
        config: req.config,
        depth: req.depth,
    };
    for member in &tgt_ty.members {
        let output = if writable {
            req.output.as_deref_mut()
        } else {
            None
        };
        pass.patch_member(member, output)?;
    }

    let used_size = if req.tail.is_some() {
        fixed_size
    } else {
        let tail = tail.borrow();
        let used = header_size + tail.end();
        if capacity >= used {
            if let Some(out) = req.output.as_deref_mut() {
                tail.flush(out, header_size, ptr)?;
            }
        }
        used
    };

    log::trace!(
        "patched '{}' ({} bytes{})",
        tgt_ty.name,
        used_size,
        if writable { "" } else { ", probe" }
    );
    req.used_size = Some(used_size);
    Ok(used_size)
}

/// Out-of-line data of a patched instance, laid out after its fixed region.
#[derive(Debug, Default)]
struct Tail {
    /// Position of the first tail byte relative to the output origin.
    start: usize,
    bytes: Vec<u8>,
    /// Pointer slots of the fixed region: output offset and stored value.
    fixups: Vec<(usize, Option<u64>)>,
}

impl Tail {
    fn new(start: usize) -> Self {
        Self {
            start,
            ..Self::default()
        }
    }

    /// Output size past the origin.
    fn end(&self) -> usize {
        self.start + self.bytes.len()
    }

    /// Append `data` aligned to `align`, returning its tail position.
    fn append(&mut self, data: &[u8], align: usize) -> usize {
        let at = align_up(self.end(), align) - self.start;
        self.bytes.resize(at, 0);
        self.bytes.extend_from_slice(data);
        at
    }

    fn append_str(&mut self, text: &[u8]) -> usize {
        let at = self.append(text, 1);
        self.bytes.push(0);
        at
    }

    fn relative(&self, at: usize) -> u64 {
        (self.start + at) as u64
    }

    fn mark(&self) -> (usize, usize) {
        (self.bytes.len(), self.fixups.len())
    }

    fn rewind(&mut self, (bytes, fixups): (usize, usize)) {
        self.bytes.truncate(bytes);
        self.fixups.truncate(fixups);
    }

    /// Rebase the fixed-region pointers and write the tail after it.
    fn flush(&self, out: &mut [u8], origin: usize, ptr: PtrSize) -> Result<()> {
        let mut out = ByteViewMut::new(out);
        for &(at, target) in &self.fixups {
            out.write_ptr(at, ptr, target)?;
        }
        if self.bytes.is_empty() {
            return Ok(());
        }
        out.write_bytes(origin + self.start, &self.bytes)
    }
}

/// Where a carried pointer is stored.
#[derive(Debug, Clone, Copy)]
enum Slot {
    /// Offset in the outermost output buffer.
    Fixed(usize),
    /// Position inside the tail.
    Tail(usize),
}

impl Slot {
    fn advance(self, by: usize) -> Self {
        match self {
            Self::Fixed(at) => Self::Fixed(at + by),
            Self::Tail(at) => Self::Tail(at + by),
        }
    }
}

/// Per-instance state of one member-wise pass.
struct MemberPass<'p> {
    target: &'p SchemaContext,
    source: &'p SchemaContext,
    src_ty: &'p TypeDesc,
    tgt_ty: &'p TypeDesc,
    ptr: PtrSize,
    instance: &'p [u8],
    base: usize,
    origin: usize,
    body: usize,
    target_base: usize,
    tail: &'p RefCell<Tail>,
    chain: &'p PatchChain,
    config: PatchConfig,
    depth: usize,
}

impl MemberPass<'_> {
    fn patch_member(&self, tm: &MemberDesc, output: Option<&mut [u8]>) -> Result<()> {
        let ptr = self.ptr;
        let src = ByteView::new(self.instance);
        let at = self.body + tm.offset(ptr);

        let Some(sm) = self.src_ty.find_member(&tm.name) else {
            return self.backfill(tm, at, output);
        };
        let from = self.base + sm.offset(ptr);

        match classify(self.source, sm, self.target, tm, ptr) {
            MemberPatch::ExactCopy if tm.atom() == AtomKind::Bitfield => {
                let (Some(sf), Some(tf)) = (sm.bitfield, tm.bitfield) else {
                    return Err(DlError::MalformedData(format!(
                        "bitfield '{}' has no bit range",
                        tm.name
                    )));
                };
                let value = sf.extract(src.read_uint(from, sm.size(ptr))?);
                if let Some(out) = output {
                    let mut out = ByteViewMut::new(out);
                    let size = tm.size(ptr);
                    let unit = out.as_view().read_uint(at, size)?;
                    out.write_uint(at, size, tf.insert(unit, value))?;
                }
                log::trace!("'{}': bit copy", tm.name);
                Ok(())
            }
            MemberPatch::ExactCopy => {
                let bytes = src.bytes(from, tm.size(ptr))?;
                if let Some(out) = output {
                    ByteViewMut::new(out).write_bytes(at, bytes)?;
                }
                self.carry_member(sm, from, Slot::Fixed(self.target_base + at), self.depth)?;
                log::trace!("'{}': copy {} bytes", tm.name, bytes.len());
                Ok(())
            }
            MemberPatch::NestedPatch => {
                let size = tm.size(ptr);
                let sub = match output {
                    Some(out) => {
                        let len = out.len();
                        Some(out.get_mut(at..at + size).ok_or(DlError::OutOfBounds {
                            offset: at,
                            len: size,
                            capacity: len,
                        })?)
                    }
                    None => None,
                };
                let mut nested = PatchRequest {
                    input_type: sm.type_id,
                    wanted_type: tm.type_id,
                    instance: self.instance,
                    output: sub,
                    packed_input: false,
                    packed_output: false,
                    used_size: None,
                    chain: self.chain,
                    config: self.config,
                    source_base: from,
                    source_origin: self.origin,
                    target_base: self.target_base + at,
                    tail: Some(self.tail),
                    depth: self.depth + 1,
                };
                log::debug!("'{}': nested patch at depth {}", tm.name, nested.depth);
                run_chain(self.target, &mut nested, Some(self.source))?;
                Ok(())
            }
            MemberPatch::ScalarCoerce => {
                if tm.storage() == StorageKind::Str {
                    self.target.report_error(&format!(
                        "member '{}.{}' cannot be converted into a string",
                        self.tgt_ty.name, tm.name
                    ));
                    return Err(DlError::StringTarget {
                        member: tm.name.clone(),
                    });
                }
                let mut text = ScratchBuffer::new();
                render_scalar(&src, from, sm.storage(), self.origin, ptr, &mut text)?;
                let parsed = text.as_str().and_then(|t| parse_scalar(t, tm.storage()));
                let Some(bits) = parsed else {
                    return Err(DlError::Conversion {
                        member: tm.name.clone(),
                        text: String::from_utf8_lossy(text.as_bytes()).into_owned(),
                    });
                };
                if let Some(out) = output {
                    ByteViewMut::new(out).write_uint(at, tm.size(ptr), bits)?;
                }
                log::trace!(
                    "'{}': {} -> {}",
                    tm.name,
                    sm.storage().name(),
                    tm.storage().name()
                );
                Ok(())
            }
            MemberPatch::Incompatible => {
                self.target.report_error(&format!(
                    "member '{}.{}' changed from {} to {} and needs a hand-written migration",
                    self.tgt_ty.name, tm.name, sm.class, tm.class
                ));
                Err(DlError::IncompatibleMember {
                    type_name: self.tgt_ty.name.clone(),
                    member: tm.name.clone(),
                })
            }
        }
    }

    /// Append the out-of-line data of source member `m` at `from` to the
    /// tail and point the copy of the member at `slot` to it.
    fn carry_member(&self, m: &MemberDesc, from: usize, slot: Slot, depth: usize) -> Result<()> {
        let ptr = self.ptr;
        match m.atom() {
            AtomKind::Pod => self.carry_element(m.storage(), m.type_id, from, slot, depth),
            AtomKind::InlineArray => {
                let stride = m.size(ptr) / m.count.max(1);
                for i in 0..m.count {
                    let off = i * stride;
                    self.carry_element(m.storage(), m.type_id, from + off, slot.advance(off), depth)?;
                }
                Ok(())
            }
            AtomKind::Array => {
                let src = ByteView::new(self.instance);
                let Some(rel) = src.read_ptr(from, ptr)? else {
                    return Ok(());
                };
                let count = src.read_u32(from + ptr.bytes())? as usize;
                if count == 0 {
                    return self.point(slot, None);
                }
                let (size, align) = element_layout(self.source, m.storage(), m.type_id, ptr)?;
                let data = self.locate(rel)?;
                let bytes = src.bytes(data, size.saturating_mul(count))?;
                let at = self.tail.borrow_mut().append(bytes, align);
                if matches!(m.storage(), StorageKind::Str | StorageKind::Ptr | StorageKind::Struct) {
                    for i in 0..count {
                        let off = i * size;
                        self.carry_element(
                            m.storage(),
                            m.type_id,
                            data + off,
                            Slot::Tail(at + off),
                            depth + 1,
                        )?;
                    }
                }
                self.point(slot, Some(at))
            }
            AtomKind::Bitfield => Ok(()),
        }
    }

    fn carry_element(
        &self,
        storage: StorageKind,
        type_id: TypeId,
        from: usize,
        slot: Slot,
        depth: usize,
    ) -> Result<()> {
        if depth > self.config.max_depth {
            return Err(DlError::DepthExceeded(self.config.max_depth));
        }
        let ptr = self.ptr;
        let src = ByteView::new(self.instance);
        match storage {
            StorageKind::Str => {
                let Some(rel) = src.read_ptr(from, ptr)? else {
                    return Ok(());
                };
                let text = src.read_cstr(self.locate(rel)?, usize::MAX)?;
                let at = self.tail.borrow_mut().append_str(text);
                self.point(slot, Some(at))
            }
            StorageKind::Ptr => {
                let Some(rel) = src.read_ptr(from, ptr)? else {
                    return Ok(());
                };
                let ty = self
                    .source
                    .find_type(type_id)
                    .ok_or(DlError::TypeNotFound(type_id))?;
                let data = self.locate(rel)?;
                let bytes = src.bytes(data, ty.size(ptr))?;
                let at = self.tail.borrow_mut().append(bytes, ty.alignment(ptr));
                self.carry_struct(ty, data, Slot::Tail(at), depth + 1)?;
                self.point(slot, Some(at))
            }
            StorageKind::Struct => {
                let ty = self
                    .source
                    .find_type(type_id)
                    .ok_or(DlError::TypeNotFound(type_id))?;
                self.carry_struct(ty, from, slot, depth + 1)
            }
            _ => Ok(()),
        }
    }

    fn carry_struct(&self, ty: &TypeDesc, from: usize, slot: Slot, depth: usize) -> Result<()> {
        for m in &ty.members {
            let off = m.offset(self.ptr);
            self.carry_member(m, from + off, slot.advance(off), depth)?;
        }
        Ok(())
    }

    /// Store a pointer to tail position `at` (or null) in `slot`.
    fn point(&self, slot: Slot, at: Option<usize>) -> Result<()> {
        let mut tail = self.tail.borrow_mut();
        let target = at.map(|at| tail.relative(at));
        match slot {
            Slot::Fixed(out) => tail.fixups.push((out, target)),
            Slot::Tail(pos) => ByteViewMut::new(&mut tail.bytes).write_ptr(pos, self.ptr, target)?,
        }
        Ok(())
    }

    /// Absolute offset in the source of a stored relative pointer.
    fn locate(&self, rel: u64) -> Result<usize> {
        usize::try_from(rel)
            .ok()
            .and_then(|rel| self.origin.checked_add(rel))
            .filter(|at| *at < self.instance.len())
            .ok_or_else(|| {
                DlError::MalformedData(format!("pointer {:#x} leaves the instance", rel))
            })
    }

    /// Fill a member the source type does not have.
    fn backfill(&self, tm: &MemberDesc, at: usize, output: Option<&mut [u8]>) -> Result<()> {
        let ptr = self.ptr;
        if tm.atom() == AtomKind::Bitfield {
            self.target.report_error(&format!(
                "bitfield '{}.{}' has no source member to migrate from",
                self.tgt_ty.name, tm.name
            ));
            return Err(DlError::BitfieldWithoutSource {
                type_name: self.tgt_ty.name.clone(),
                member: tm.name.clone(),
            });
        }
        let Some(range) = tm.default(ptr) else {
            self.target.report_error(&format!(
                "member '{}.{}' was added without a default value",
                self.tgt_ty.name, tm.name
            ));
            return Err(DlError::MemberWithoutDefault {
                type_name: self.tgt_ty.name.clone(),
                member: tm.name.clone(),
            });
        };
        let capacity = tm.size(ptr);
        if range.size > capacity {
            return Err(DlError::DefaultTooLarge {
                member: tm.name.clone(),
                size: range.size,
                capacity,
            });
        }
        let bytes = self.target.default_bytes(range).ok_or_else(|| {
            DlError::MalformedData(format!("default of '{}' lies outside the blob", tm.name))
        })?;
        if let Some(out) = output {
            ByteViewMut::new(out).write_bytes(at, bytes)?;
        }
        log::trace!("'{}': default ({} bytes)", tm.name, bytes.len());
        Ok(())
    }
}

/// Probe, allocate and patch in one go.
pub fn instance_patch_to_vec(
    target: &SchemaContext,
    chain: &PatchChain,
    instance: &[u8],
    wanted_type: TypeId,
    packed: bool,
    config: PatchConfig,
) -> Result<Vec<u8>> {
    let mut probe = PatchRequest::new(chain, instance, wanted_type)
        .packed(packed)
        .config(config);
    let size = instance_patch(target, &mut probe)?;

    let mut out = vec![0u8; size];
    let mut req = PatchRequest::new(chain, instance, wanted_type)
        .input_type(probe.input_type)
        .packed(packed)
        .config(config)
        .output(&mut out);
    instance_patch(target, &mut req)?;
    Ok(out)
}
