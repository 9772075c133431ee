// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::cast_sign_loss)] // Test data conversions
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::float_cmp)] // Test assertions with constants
#![allow(clippy::unreadable_literal)] // Large test constants
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::too_many_lines)] // Example/test code
#![allow(clippy::similar_names)] // Test variable naming
#![allow(clippy::cast_possible_wrap)] // Test conversions

//! Instance patch engine end to end: identity, probe/write agreement,
//! defaults, numeric coercion, nested evolution, out-of-line data, header
//! checks and chain dispatch.

use datalib::header::{INSTANCE_ID_SWAPPED, INSTANCE_VERSION};
use datalib::view::ByteView;
use datalib::{
    instance_patch, instance_patch_to_vec, patch, txt_pack, txt_unpack, ContextBuilder, DlError,
    ErrorCode,
    InstanceHeader, PatchChain, PatchConfig, PatchEntry, PatchRequest, PtrSize, SchemaContext,
    StorageKind, TypeBuilder, TypeId,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const HOST: PtrSize = PtrSize::HOST;

fn build(types: Vec<TypeBuilder>) -> Arc<SchemaContext> {
    let builder = types
        .into_iter()
        .fold(ContextBuilder::new(), ContextBuilder::add_type);
    Arc::new(builder.build().expect("build context"))
}

fn reading_v1() -> Arc<SchemaContext> {
    build(vec![
        TypeBuilder::new("Point")
            .scalar("x", StorageKind::Int16)
            .scalar("y", StorageKind::Int16),
        TypeBuilder::new("Reading")
            .scalar("id", StorageKind::Int32)
            .scalar("value", StorageKind::Fp32)
            .scalar("count", StorageKind::Uint16)
            .bitfield("flags", 3)
            .bitfield("mode", 2)
            .inline_array("pos", "fp32", 3)
            .nested("origin", "Point")
            .string("name"),
    ])
}

fn reading_v2() -> Arc<SchemaContext> {
    build(vec![
        TypeBuilder::new("Point")
            .scalar("x", StorageKind::Int16)
            .scalar("y", StorageKind::Int16)
            .scalar_with_default("z", StorageKind::Int16, 0),
        TypeBuilder::new("Reading")
            .nested("origin", "Point")
            .string("name")
            .bitfield("flags", 3)
            .inline_array("pos", "fp32", 3)
            .scalar("id", StorageKind::Int64)
            .scalar("value", StorageKind::Fp64)
            .scalar("count", StorageKind::Uint32)
            .bitfield("mode", 2)
            .scalar_with_default("extra", StorageKind::Uint8, 9),
    ])
}

fn member_offset(ctx: &SchemaContext, ty: &str, member: &str) -> usize {
    ctx.find_type_by_name(ty)
        .and_then(|t| t.find_member(member))
        .map(|m| m.offset(HOST))
        .expect("member")
}

/// Instance bytes of `text` without the header.
fn raw_instance(ctx: &SchemaContext, root: &str, text: &serde_json::Value) -> Vec<u8> {
    let packed = txt_pack(ctx, &json!({ root: text }).to_string()).expect("pack");
    let align = ctx.find_type_by_name(root).expect("root").alignment(HOST);
    packed[InstanceHeader::aligned_size(align)..].to_vec()
}

fn random_reading(rng: &mut fastrand::Rng) -> serde_json::Value {
    json!({
        "id": rng.i32(..),
        "value": rng.f32() * 1000.0,
        "count": rng.u16(..),
        "flags": rng.u8(..8),
        "mode": rng.u8(..4),
        "pos": [rng.f32(), rng.f32() * -10.0, rng.f32() * 3.0],
        "origin": { "x": rng.i16(..), "y": rng.i16(..) },
        "name": if rng.bool() { json!("sensor") } else { json!(null) },
    })
}

#[test]
fn identity_patch_copies_every_byte() {
    let ctx = reading_v1();
    let chain = PatchChain::new().with(ctx.patch_entry());
    let id = TypeId::from_name("Reading");
    let size = ctx.find_type(id).expect("Reading").size(HOST);

    let mut rng = fastrand::Rng::with_seed(7);
    let input = raw_instance(&ctx, "Reading", &random_reading(&mut rng));
    let out = instance_patch_to_vec(&ctx, &chain, &input, id, false, PatchConfig::default())
        .expect("patch");
    assert!(out.len() >= size);
    assert_eq!(out, input);

    let packed = txt_pack(&ctx, &json!({ "Reading": random_reading(&mut rng) }).to_string())
        .expect("pack");
    let mut req = PatchRequest::new(&chain, &packed, TypeId::NONE).packed(true);
    req.wanted_type = id;
    let used = instance_patch(&ctx, &mut req).expect("size");
    assert_eq!(used, packed.len());
    assert_eq!(req.input_type, id);
}

#[test]
fn probe_then_write_matches_single_write() {
    let v1 = reading_v1();
    let v2 = reading_v2();
    let chain = PatchChain::new().with(v1.patch_entry());
    let id = TypeId::from_name("Reading");
    let mut rng = fastrand::Rng::with_seed(0x5eed);

    let reading = v2.find_type(id).expect("Reading");
    let header = InstanceHeader::aligned_size(reading.alignment(HOST));
    let fixed = header + reading.size(HOST);

    for _ in 0..64 {
        let sample = random_reading(&mut rng);
        let packed = txt_pack(&v1, &json!({ "Reading": sample }).to_string()).expect("pack");

        let mut sizing = PatchRequest::new(&chain, &packed, id).packed(true);
        let used = instance_patch(&v2, &mut sizing).expect("size");
        assert!(used >= fixed);

        // only the header fits in an undersized buffer
        let mut short = vec![0u8; fixed - 1];
        let mut req = PatchRequest::new(&chain, &packed, id)
            .packed(true)
            .output(&mut short);
        assert_eq!(instance_patch(&v2, &mut req).expect("short"), used);
        assert!(short[header..].iter().all(|b| *b == 0), "undersized buffer was written");

        let mut exact = vec![0u8; used];
        let mut req = PatchRequest::new(&chain, &packed, id)
            .packed(true)
            .output(&mut exact);
        instance_patch(&v2, &mut req).expect("exact");

        let mut roomy = vec![0u8; used + 32];
        let mut req = PatchRequest::new(&chain, &packed, id)
            .packed(true)
            .output(&mut roomy);
        assert_eq!(instance_patch(&v2, &mut req).expect("roomy"), used);
        assert_eq!(req.used_size, Some(used));

        assert_eq!(exact, roomy[..used]);

        let text = txt_unpack(&v2, &exact).expect("unpack");
        let value: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["Reading"]["name"], sample["name"]);
    }
}

#[test]
fn evolved_members_carry_values() {
    let v1 = reading_v1();
    let v2 = reading_v2();
    let chain = PatchChain::new().with(v1.patch_entry());
    let id = TypeId::from_name("Reading");
    let input = raw_instance(
        &v1,
        "Reading",
        &json!({
            "id": -77, "value": 2.25, "count": 600, "flags": 6, "mode": 1,
            "pos": [1.0, 2.0, 3.0], "origin": {"x": -3, "y": 4}, "name": null
        }),
    );
    let out = instance_patch_to_vec(&v2, &chain, &input, id, false, PatchConfig::default())
        .expect("patch");
    let view = ByteView::new(&out);
    let at = |m: &str| member_offset(&v2, "Reading", m);

    assert_eq!(view.read_i64(at("id")).expect("id"), -77);
    assert_eq!(view.read_f64(at("value")).expect("value"), 2.25);
    assert_eq!(view.read_u32(at("count")).expect("count"), 600);
    assert_eq!(view.read_u8(at("extra")).expect("extra"), 9);
    assert_eq!(view.read_f32(at("pos") + 8).expect("pos[2]"), 3.0);
    assert_eq!(view.read_ptr(at("name"), HOST).expect("name"), None);

    let origin = at("origin");
    assert_eq!(view.read_i16(origin).expect("x"), -3);
    assert_eq!(view.read_i16(origin + 2).expect("y"), 4);
    assert_eq!(view.read_i16(origin + 4).expect("z"), 0);

    let ty = v2.find_type(id).expect("Reading");
    let flags = ty.find_member("flags").expect("flags");
    let mode = ty.find_member("mode").expect("mode");
    let unit = |m: &datalib::MemberDesc| view.read_uint(m.offset(HOST), m.size(HOST)).expect("unit");
    assert_eq!(flags.bitfield.expect("bits").extract(unit(flags)), 6);
    assert_eq!(mode.bitfield.expect("bits").extract(unit(mode)), 1);
}

#[test]
fn added_member_takes_its_default() {
    let old = build(vec![TypeBuilder::new("Config")
        .scalar("width", StorageKind::Uint32)
        .scalar("height", StorageKind::Uint32)]);
    let new = build(vec![TypeBuilder::new("Config")
        .scalar("width", StorageKind::Uint32)
        .scalar("height", StorageKind::Uint32)
        .scalar_with_default("depth", StorageKind::Uint32, 24)]);
    let chain = PatchChain::new().with(old.patch_entry());
    let input: Vec<u8> = [640u32, 480].iter().flat_map(|v| v.to_ne_bytes()).collect();

    let out = instance_patch_to_vec(
        &new,
        &chain,
        &input,
        TypeId::from_name("Config"),
        false,
        PatchConfig::default(),
    )
    .expect("patch");
    assert_eq!(&out[..8], &input[..]);

    let depth = new
        .find_type_by_name("Config")
        .and_then(|t| t.find_member("depth"))
        .and_then(|m| m.default(HOST))
        .expect("default");
    assert_eq!(&out[8..12], new.default_bytes(depth).expect("bytes"));
    assert_eq!(&out[8..12], &24u32.to_ne_bytes());
}

#[test]
fn added_member_without_default_fails_during_probe() {
    let reports = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&reports);
    let old = build(vec![TypeBuilder::new("Config").scalar("width", StorageKind::Uint32)]);
    let new = Arc::new(
        ContextBuilder::new()
            .error_handler(move |msg| sink.lock().expect("lock").push(msg.to_string()))
            .add_type(
                TypeBuilder::new("Config")
                    .scalar("width", StorageKind::Uint32)
                    .scalar("stride", StorageKind::Uint32),
            )
            .build()
            .expect("build"),
    );
    let chain = PatchChain::new().with(old.patch_entry());
    let input = 640u32.to_ne_bytes();

    let mut req = PatchRequest::new(&chain, &input, TypeId::from_name("Config"));
    let err = instance_patch(&new, &mut req).unwrap_err();
    assert_eq!(err.code(), ErrorCode::TypeNotFound);
    assert!(matches!(&err, DlError::MemberWithoutDefault { member, .. } if member == "stride"));
    assert_eq!(req.used_size, None);

    let reports = reports.lock().expect("lock");
    assert!(reports.iter().any(|r| r.contains("stride")));
}

#[test]
fn removed_member_is_dropped() {
    let old = build(vec![TypeBuilder::new("Sample")
        .scalar("a", StorageKind::Uint16)
        .scalar("gone", StorageKind::Fp64)
        .scalar("b", StorageKind::Uint16)]);
    let new = build(vec![TypeBuilder::new("Sample")
        .scalar("a", StorageKind::Uint16)
        .scalar("b", StorageKind::Uint16)]);
    let chain = PatchChain::new().with(old.patch_entry());
    let mut input = vec![0u8; 24];
    input[..2].copy_from_slice(&11u16.to_ne_bytes());
    input[8..16].copy_from_slice(&9.5f64.to_ne_bytes());
    input[16..18].copy_from_slice(&22u16.to_ne_bytes());

    let out = instance_patch_to_vec(
        &new,
        &chain,
        &input,
        TypeId::from_name("Sample"),
        false,
        PatchConfig::default(),
    )
    .expect("patch");
    assert_eq!(out, [11u16.to_ne_bytes(), 22u16.to_ne_bytes()].concat());
}

fn coerce(from: StorageKind, to: StorageKind, input: &[u8]) -> Vec<u8> {
    let old = build(vec![TypeBuilder::new("N").scalar("v", from)]);
    let new = build(vec![TypeBuilder::new("N").scalar("v", to)]);
    let chain = PatchChain::new().with(old.patch_entry());
    instance_patch_to_vec(&new, &chain, input, TypeId::from_name("N"), false, PatchConfig::default())
        .expect("coerce")
}

#[test]
fn numeric_widening_is_exact() {
    let out = coerce(StorageKind::Int32, StorageKind::Int64, &(-12345i32).to_ne_bytes());
    assert_eq!(i64::from_ne_bytes(out.try_into().expect("8 bytes")), -12345);

    let out = coerce(StorageKind::Fp32, StorageKind::Fp64, &3.5f32.to_ne_bytes());
    assert_eq!(f64::from_ne_bytes(out.try_into().expect("8 bytes")), 3.5);

    let out = coerce(StorageKind::Fp64, StorageKind::Fp32, &0.1f64.to_ne_bytes());
    assert_eq!(f32::from_ne_bytes(out.try_into().expect("4 bytes")), 0.1f32);

    let out = coerce(StorageKind::Uint8, StorageKind::Fp64, &200u8.to_ne_bytes());
    assert_eq!(f64::from_ne_bytes(out.try_into().expect("8 bytes")), 200.0);
}

#[test]
fn integer_narrowing_keeps_low_bytes() {
    let out = coerce(StorageKind::Uint64, StorageKind::Uint8, &u64::MAX.to_ne_bytes());
    assert_eq!(out, [255]);

    let out = coerce(StorageKind::Int32, StorageKind::Uint8, &300i32.to_ne_bytes());
    assert_eq!(out, [44]);

    let out = coerce(StorageKind::Int16, StorageKind::Uint32, &(-1i16).to_ne_bytes());
    assert_eq!(u32::from_ne_bytes(out.try_into().expect("4 bytes")), u32::MAX);
}

#[test]
fn float_to_integer_saturates() {
    let out = coerce(StorageKind::Fp64, StorageKind::Int8, &1_000_000.5f64.to_ne_bytes());
    assert_eq!(out, [127]);

    let out = coerce(StorageKind::Fp32, StorageKind::Int32, &(-2.75f32).to_ne_bytes());
    assert_eq!(i32::from_ne_bytes(out.try_into().expect("4 bytes")), -2);
}

#[test]
fn nested_record_gains_defaulted_field() {
    let old = build(vec![
        TypeBuilder::new("Inner")
            .scalar("a", StorageKind::Uint8)
            .scalar("b", StorageKind::Uint8),
        TypeBuilder::new("Outer")
            .scalar("head", StorageKind::Uint32)
            .nested("inner", "Inner")
            .scalar("tail", StorageKind::Uint16),
    ]);
    let new = build(vec![
        TypeBuilder::new("Inner")
            .scalar("a", StorageKind::Uint8)
            .scalar("b", StorageKind::Uint8)
            .scalar_with_default("c", StorageKind::Uint16, 0xBEEF),
        TypeBuilder::new("Outer")
            .scalar("head", StorageKind::Uint32)
            .nested("inner", "Inner")
            .scalar("tail", StorageKind::Uint16),
    ]);
    let chain = PatchChain::new().with(old.patch_entry());
    let input = raw_instance(
        &old,
        "Outer",
        &json!({"head": 0xDEAD_0001u32, "inner": {"a": 1, "b": 2}, "tail": 7}),
    );
    let out = instance_patch_to_vec(
        &new,
        &chain,
        &input,
        TypeId::from_name("Outer"),
        false,
        PatchConfig::default(),
    )
    .expect("patch");

    let view = ByteView::new(&out);
    let inner = member_offset(&new, "Outer", "inner");
    assert_eq!(out.len(), new.find_type_by_name("Outer").expect("Outer").size(HOST));
    assert_eq!(view.read_u32(0).expect("head"), 0xDEAD_0001);
    assert_eq!(view.read_u8(inner).expect("a"), 1);
    assert_eq!(view.read_u8(inner + 1).expect("b"), 2);
    assert_eq!(view.read_u16(inner + 2).expect("c"), 0xBEEF);
    assert_eq!(view.read_u16(member_offset(&new, "Outer", "tail")).expect("tail"), 7);
}

fn packed_sample() -> (Arc<SchemaContext>, Vec<u8>) {
    let ctx = build(vec![TypeBuilder::new("P").scalar("v", StorageKind::Uint32)]);
    let packed = txt_pack(&ctx, r#"{"P": {"v": 3}}"#).expect("pack");
    (ctx, packed)
}

fn patch_packed(ctx: &Arc<SchemaContext>, packed: &[u8]) -> datalib::Result<usize> {
    let chain = PatchChain::new().with(ctx.patch_entry());
    let mut req = PatchRequest::new(&chain, packed, TypeId::from_name("P")).packed(true);
    instance_patch(ctx, &mut req)
}

#[test]
fn packed_header_checks() {
    let (ctx, packed) = packed_sample();
    assert_eq!(
        patch_packed(&ctx, &packed).expect("valid"),
        InstanceHeader::SIZE + 4
    );

    let mut bad_magic = packed.clone();
    bad_magic[..4].copy_from_slice(&0x1234_5678u32.to_ne_bytes());
    assert_eq!(
        patch_packed(&ctx, &bad_magic).unwrap_err().code(),
        ErrorCode::MalformedData
    );

    let mut swapped = packed.clone();
    swapped[..4].copy_from_slice(&INSTANCE_ID_SWAPPED.to_ne_bytes());
    let err = patch_packed(&ctx, &swapped).unwrap_err();
    assert_ne!(err.code(), ErrorCode::MalformedData);
    assert_eq!(err.code(), ErrorCode::EndianMismatch);

    let mut bad_version = packed.clone();
    bad_version[4..8].copy_from_slice(&(INSTANCE_VERSION + 1).to_ne_bytes());
    assert_eq!(
        patch_packed(&ctx, &bad_version).unwrap_err().code(),
        ErrorCode::VersionMismatch
    );

    assert_eq!(
        patch_packed(&ctx, &packed[..10]).unwrap_err().code(),
        ErrorCode::MalformedData
    );
}

#[test]
fn packed_input_of_other_width_is_rejected() {
    let (ctx, packed) = packed_sample();
    let chain = PatchChain::new().with(ctx.patch_entry());
    let other = match HOST {
        PtrSize::Ptr32 => PtrSize::Ptr64,
        PtrSize::Ptr64 => PtrSize::Ptr32,
    };
    let mut req = PatchRequest::new(&chain, &packed, TypeId::from_name("P"))
        .packed(true)
        .config(PatchConfig::default().with_ptr_size(other));
    let err = instance_patch(&ctx, &mut req).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PtrSizeMismatch);
}

#[test]
fn chain_is_exhausted_before_failing() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let unrelated = build(vec![TypeBuilder::new("Other").scalar("x", StorageKind::Int8)]);
    let chain: PatchChain = (0..4)
        .map(|_| {
            let attempts = Arc::clone(&attempts);
            PatchEntry::from_fn(Arc::clone(&unrelated), move |target, source, req| {
                attempts.fetch_add(1, Ordering::SeqCst);
                patch(target, source, req)
            })
        })
        .collect();
    let target = build(vec![TypeBuilder::new("Wanted").scalar("x", StorageKind::Int8)]);

    let mut req = PatchRequest::new(&chain, &[1u8], TypeId::from_name("Wanted"));
    let err = instance_patch(&target, &mut req).unwrap_err();
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(err.code(), ErrorCode::TypeNotFound);
    assert!(matches!(err, DlError::NoMatchingSchema { attempts: 4, .. }));
}

#[test]
fn chain_falls_through_to_a_matching_entry() {
    let old = build(vec![TypeBuilder::new("T").scalar("v", StorageKind::Int16)]);
    let new = build(vec![TypeBuilder::new("T").scalar("v", StorageKind::Int32)]);
    let unrelated = build(vec![TypeBuilder::new("U").scalar("v", StorageKind::Int16)]);
    let hits = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&hits);

    let chain = PatchChain::new()
        .with(unrelated.patch_entry())
        .with(PatchEntry::from_fn(Arc::clone(&old), move |target, source, req| {
            counted.fetch_add(1, Ordering::SeqCst);
            patch(target, source, req)
        }));
    let out = instance_patch_to_vec(
        &new,
        &chain,
        &(-5i16).to_ne_bytes(),
        TypeId::from_name("T"),
        false,
        PatchConfig::default(),
    )
    .expect("patch");
    assert_eq!(i32::from_ne_bytes(out.try_into().expect("4 bytes")), -5);
    // probe and write
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn hand_written_migration_replaces_memberwise() {
    let old = build(vec![TypeBuilder::new("Temp").scalar("fahrenheit", StorageKind::Fp32)]);
    let new = build(vec![TypeBuilder::new("Temp").scalar("celsius", StorageKind::Fp32)]);
    let chain = PatchChain::new().with(PatchEntry::from_fn(
        Arc::clone(&old),
        |target, _source, req| {
            let size = target
                .find_type(req.wanted_type)
                .ok_or(DlError::TypeNotFound(req.wanted_type))?
                .size(PtrSize::HOST);
            let f = ByteView::new(req.instance).read_f32(0)?;
            if let Some(out) = req.output.as_deref_mut().filter(|o| o.len() >= size) {
                out[..4].copy_from_slice(&((f - 32.0) * 5.0 / 9.0).to_ne_bytes());
            }
            Ok(size)
        },
    ));
    let out = instance_patch_to_vec(
        &new,
        &chain,
        &212.0f32.to_ne_bytes(),
        TypeId::from_name("Temp"),
        false,
        PatchConfig::default(),
    )
    .expect("patch");
    assert_eq!(f32::from_ne_bytes(out.try_into().expect("4 bytes")), 100.0);

    // without the hand-written entry the rename has no default to fall back on
    let auto = PatchChain::new().with(old.patch_entry());
    let mut req = PatchRequest::new(&auto, &[0u8; 4], TypeId::from_name("Temp"));
    assert!(instance_patch(&new, &mut req).is_err());
}

fn track_ctx(tag_weight: &str) -> Arc<SchemaContext> {
    build(vec![
        TypeBuilder::new("Tag")
            .string("label")
            .member("weight", tag_weight),
        TypeBuilder::new("Track")
            .scalar("a", StorageKind::Int32)
            .string("name")
            .array("tags", "Tag")
            .pointer("best", "Tag")
            .array("samples", "int16"),
    ])
}

fn track_text() -> Value {
    json!({ "Track": {
        "a": -9,
        "name": "hello",
        "tags": [{ "label": "x", "weight": 1 }, { "label": "a longer label", "weight": 2 }],
        "best": { "label": "gold", "weight": 3 },
        "samples": [1, -2, 3]
    } })
}

#[test]
fn out_of_line_data_survives_a_patch() {
    let v1 = track_ctx("uint8");
    let id = TypeId::from_name("Track");
    let packed = txt_pack(&v1, &track_text().to_string()).expect("pack");

    let chain = PatchChain::new().with(v1.patch_entry());
    let same = instance_patch_to_vec(&v1, &chain, &packed, id, true, PatchConfig::default())
        .expect("identity");
    assert_eq!(same.len(), packed.len());
    let value: Value = serde_json::from_str(&txt_unpack(&v1, &same).expect("unpack")).expect("json");
    assert_eq!(value, track_text());

    let v2 = build(vec![
        TypeBuilder::new("Tag")
            .string("label")
            .scalar("weight", StorageKind::Uint8),
        TypeBuilder::new("Track")
            .string("name")
            .scalar("a", StorageKind::Int64)
            .array("samples", "int16")
            .pointer("best", "Tag")
            .array("tags", "Tag")
            .scalar_with_default("rev", StorageKind::Uint16, 2),
    ]);
    let evolved = instance_patch_to_vec(&v2, &chain, &packed, id, true, PatchConfig::default())
        .expect("evolved");
    let value: Value =
        serde_json::from_str(&txt_unpack(&v2, &evolved).expect("unpack")).expect("json");
    assert_eq!(
        value,
        json!({ "Track": {
            "name": "hello",
            "a": -9,
            "samples": [1, -2, 3],
            "best": { "label": "gold", "weight": 3 },
            "tags": [{ "label": "x", "weight": 1 }, { "label": "a longer label", "weight": 2 }],
            "rev": 2
        } })
    );

    // pointed-to data is carried as is, so its type must not have changed
    let wider = track_ctx("uint32");
    let err = instance_patch_to_vec(&wider, &chain, &packed, id, true, PatchConfig::default())
        .unwrap_err();
    assert!(matches!(err, DlError::IncompatibleMember { .. }));
}

#[test]
fn nested_member_is_dispatched_through_the_chain() {
    let old = build(vec![
        TypeBuilder::new("Gauge").scalar("raw", StorageKind::Int32),
        TypeBuilder::new("Panel")
            .scalar("id", StorageKind::Uint8)
            .nested("gauge", "Gauge"),
    ]);
    let new = build(vec![
        TypeBuilder::new("Gauge").scalar("scaled", StorageKind::Fp64),
        TypeBuilder::new("Panel")
            .scalar("id", StorageKind::Uint8)
            .nested("gauge", "Gauge"),
    ]);
    let gauge = TypeId::from_name("Gauge");
    let panel = TypeId::from_name("Panel");
    let rescale = PatchEntry::from_fn(Arc::clone(&old), move |target, _source, req| {
        if req.wanted_type != gauge {
            return Err(DlError::TypeNotFound(req.wanted_type));
        }
        let size = target
            .find_type(gauge)
            .ok_or(DlError::TypeNotFound(gauge))?
            .size(HOST);
        let raw = ByteView::new(req.instance).read_i32(req.source_base())?;
        if let Some(out) = req.output.as_deref_mut().filter(|o| o.len() >= size) {
            out[..8].copy_from_slice(&(f64::from(raw) / 4.0).to_ne_bytes());
        }
        Ok(size)
    });
    let chain = PatchChain::new().with(rescale).with(old.patch_entry());
    let input = raw_instance(&old, "Panel", &json!({ "id": 3, "gauge": { "raw": 10 } }));

    let out = instance_patch_to_vec(&new, &chain, &input, panel, false, PatchConfig::default())
        .expect("patch");
    let view = ByteView::new(&out);
    assert_eq!(view.read_u8(member_offset(&new, "Panel", "id")).expect("id"), 3);
    assert_eq!(
        view.read_f64(member_offset(&new, "Panel", "gauge")).expect("scaled"),
        2.5
    );

    // a detailed failure wins over an entry that does not handle the type
    let chain = PatchChain::new()
        .with(PatchEntry::from_fn(Arc::clone(&old), |_, _, req| {
            Err(DlError::TypeNotFound(req.wanted_type))
        }))
        .with(old.patch_entry());
    let mut req = PatchRequest::new(&chain, &input, panel);
    let err = instance_patch(&new, &mut req).unwrap_err();
    assert!(matches!(&err, DlError::MemberWithoutDefault { member, .. } if member == "scaled"));
}
