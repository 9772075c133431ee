// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scalar coercion through a canonical text form.
//!
//! A source scalar is rendered into a fixed-capacity scratch buffer (decimal
//! integers, `%.9g` for fp32, `%.17g` for fp64, raw bytes for strings) and the
//! text is parsed back as the target kind.
//!
//! Narrowing rules for integer targets:
//! - integer text wraps to the target width (two's complement truncation);
//! - other numeric text (`"2.5"`, `"1e+20"`) saturates, as Rust's `as` does;
//! - anything else is rejected.

use crate::error::{DlError, Result};
use crate::types::{PtrSize, StorageKind};
use crate::view::ByteView;
use std::fmt::{self, Write};

/// Capacity of the conversion scratch buffer, terminator included.
pub const SCRATCH_CAPACITY: usize = 1024;

/// Significant digits used to render fp32 values.
pub const FP32_DIGITS: usize = 9;

/// Significant digits used to render fp64 values.
pub const FP64_DIGITS: usize = 17;

/// Fixed-capacity text buffer; writes beyond capacity are truncated.
pub(crate) struct ScratchBuffer {
    buf: [u8; SCRATCH_CAPACITY],
    len: usize,
}

impl ScratchBuffer {
    pub(crate) fn new() -> Self {
        Self {
            buf: [0u8; SCRATCH_CAPACITY],
            len: 0,
        }
    }

    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) {
        // one byte stays reserved for the terminator
        let room = SCRATCH_CAPACITY - 1 - self.len;
        let n = bytes.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub(crate) fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()).ok()
    }
}

impl Write for ScratchBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_bytes(s.as_bytes());
        Ok(())
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Write `value` the way C's `%.<precision>g` does.
pub fn write_general<W: Write>(out: &mut W, value: f64, precision: usize) -> fmt::Result {
    if value.is_nan() {
        return out.write_str("nan");
    }
    if value.is_infinite() {
        return out.write_str(if value < 0.0 { "-inf" } else { "inf" });
    }
    if value == 0.0 {
        return out.write_str(if value.is_sign_negative() { "-0" } else { "0" });
    }

    let p = precision.max(1);
    let sci = format!("{:.*e}", p - 1, value);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= p as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        write!(out, "{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        let fixed = format!("{:.*}", decimals, value);
        out.write_str(trim_fraction(&fixed))
    }
}

/// Render the scalar of kind `kind` stored at `offset` into `out`.
///
/// String slots hold a pointer relative to `origin`; the referenced bytes are
/// copied up to the terminator or the scratch capacity.
pub(crate) fn render_scalar(
    view: &ByteView<'_>,
    offset: usize,
    kind: StorageKind,
    origin: usize,
    ptr: PtrSize,
    out: &mut ScratchBuffer,
) -> Result<()> {
    // ScratchBuffer writes are infallible.
    let _ = match kind.underlying() {
        StorageKind::Int8 => write!(out, "{}", view.read_i8(offset)?),
        StorageKind::Int16 => write!(out, "{}", view.read_i16(offset)?),
        StorageKind::Int32 => write!(out, "{}", view.read_i32(offset)?),
        StorageKind::Int64 => write!(out, "{}", view.read_i64(offset)?),
        StorageKind::Uint8 => write!(out, "{}", view.read_u8(offset)?),
        StorageKind::Uint16 => write!(out, "{}", view.read_u16(offset)?),
        StorageKind::Uint32 => write!(out, "{}", view.read_u32(offset)?),
        StorageKind::Uint64 => write!(out, "{}", view.read_u64(offset)?),
        StorageKind::Fp32 => write_general(out, f64::from(view.read_f32(offset)?), FP32_DIGITS),
        StorageKind::Fp64 => write_general(out, view.read_f64(offset)?, FP64_DIGITS),
        StorageKind::Str => {
            if let Some(rel) = view.read_ptr(offset, ptr)? {
                let at = usize::try_from(rel)
                    .ok()
                    .and_then(|rel| origin.checked_add(rel))
                    .unwrap_or(usize::MAX);
                out.push_bytes(view.read_cstr(at, SCRATCH_CAPACITY - 1)?);
            }
            Ok(())
        }
        other => {
            return Err(DlError::MalformedData(format!(
                "{} is not a scalar kind",
                other.name()
            )))
        }
    };
    Ok(())
}

/// Saturating conversion of a float into integer kind `kind`, as raw bits.
fn saturate(value: f64, kind: StorageKind) -> Option<u64> {
    let bits = match kind.underlying() {
        StorageKind::Int8 => value as i8 as u64,
        StorageKind::Int16 => value as i16 as u64,
        StorageKind::Int32 => value as i32 as u64,
        StorageKind::Int64 => value as i64 as u64,
        StorageKind::Uint8 => u64::from(value as u8),
        StorageKind::Uint16 => u64::from(value as u16),
        StorageKind::Uint32 => u64::from(value as u32),
        StorageKind::Uint64 => value as u64,
        _ => return None,
    };
    Some(bits)
}

/// Parse `text` as target kind `kind`.
///
/// Returns the value as raw bits ready for a write of the kind's width, or
/// `None` when the text is not a number (string targets are never parsed).
pub(crate) fn parse_scalar(text: &str, kind: StorageKind) -> Option<u64> {
    let text = text.trim();
    match kind.underlying() {
        StorageKind::Fp32 => text.parse::<f32>().ok().map(|v| u64::from(v.to_bits())),
        StorageKind::Fp64 => text.parse::<f64>().ok().map(f64::to_bits),
        k if k.is_integer() => match text.parse::<i128>() {
            // wraps: the write keeps the low bytes
            Ok(v) => Some(v as u64),
            Err(_) => text.parse::<f64>().ok().and_then(|v| saturate(v, k)),
        },
        _ => None,
    }
}
