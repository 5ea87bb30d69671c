//! Criterion benchmarks for hot paths in the secure channel.
//!
//! Run with:
//!   cargo bench
//!
//! Covers:
//!   - encrypt_then_mac / decrypt_and_verify on a typical unit-state frame
//!   - raw AES-CTR keystream XOR and AES-CMAC tagging
//!   - OperationBuilder.prepare on the outbound command path
//!   - unit-state decode/encode (bit-packed control fields)

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use lumimesh::crypto::cipher::{cmac_tag, ctr_xor, KEY_LEN, NONCE_LEN};
use lumimesh::crypto::encryptor::{frame_nonce, Encryptor, DEFAULT_HEADER_LEN};
use lumimesh::operation::{OpCode, OperationBuilder, Target};
use lumimesh::unit::{UnitControl, UnitControlKind, UnitType};
use lumimesh::inbound::unit_state::{decode_state, encode_state, parse_unit_state_records};

// ─── Framing: encrypt_then_mac / decrypt_and_verify ─────────────────────────

fn sample_frame(header: [u8; DEFAULT_HEADER_LEN], body_len: usize) -> Vec<u8> {
    let mut packet = header.to_vec();
    packet.extend(std::iter::repeat(0xa5u8).take(body_len));
    packet
}

fn bench_framing(c: &mut Criterion) {
    let enc = Encryptor::new([0x7a; KEY_LEN]);
    let device_nonce = [0x11; NONCE_LEN];
    let nonce = frame_nonce(&device_nonce, 2);
    let header = [0x02, 0x00, 0x00, 0x00];

    let small = sample_frame(header, 16);
    let large = sample_frame(header, 256);

    c.bench_function("encrypt_then_mac_16b_body", |b| {
        b.iter(|| {
            let out = enc.encrypt_then_mac(black_box(&small), black_box(&nonce), DEFAULT_HEADER_LEN);
            black_box(out);
        });
    });

    c.bench_function("encrypt_then_mac_256b_body", |b| {
        b.iter(|| {
            let out = enc.encrypt_then_mac(black_box(&large), black_box(&nonce), DEFAULT_HEADER_LEN);
            black_box(out);
        });
    });

    let encrypted_small = enc.encrypt_then_mac(&small, &nonce, DEFAULT_HEADER_LEN);
    c.bench_function("decrypt_and_verify_16b_body", |b| {
        b.iter(|| {
            let out = enc
                .decrypt_and_verify(black_box(&encrypted_small), black_box(&nonce), DEFAULT_HEADER_LEN)
                .unwrap();
            black_box(out);
        });
    });
}

// ─── Raw primitives: CTR keystream, CMAC ────────────────────────────────────

fn bench_primitives(c: &mut Criterion) {
    let key = [0x2b; KEY_LEN];
    let nonce = [0x11; NONCE_LEN];
    let body = vec![0x5au8; 256];

    c.bench_function("ctr_xor_256b", |b| {
        b.iter_with_setup(
            || body.clone(),
            |mut buf| {
                ctr_xor(black_box(&key), black_box(&nonce), black_box(&mut buf));
                black_box(buf);
            },
        );
    });

    c.bench_function("cmac_tag_256b", |b| {
        b.iter(|| {
            let tag = cmac_tag(black_box(&key), black_box(&body));
            black_box(tag);
        });
    });
}

// ─── Outbound command packing ───────────────────────────────────────────────

fn bench_operation_builder(c: &mut Criterion) {
    c.bench_function("operation_builder_prepare_set_level", |b| {
        let mut ctx = OperationBuilder::new();
        b.iter(|| {
            let packet = ctx
                .prepare(
                    black_box(OpCode::SetLevel),
                    black_box(Target::Unit(7)),
                    black_box(&[0xff, 0x05]),
                )
                .unwrap();
            black_box(packet);
        });
    });
}

// ─── Unit-state record splitting and control decode/encode ─────────────────

fn dimmer_rgb_unit_type() -> UnitType {
    UnitType {
        id: 1,
        model: "bench".to_string(),
        manufacturer: "bench".to_string(),
        mode: "bench".to_string(),
        state_length: 4,
        controls: vec![
            UnitControl {
                kind: UnitControlKind::Dimmer,
                offset_bits: 0,
                length_bits: 8,
                default: 0,
                readonly: false,
                min: None,
                max: None,
            },
            UnitControl {
                kind: UnitControlKind::Rgb,
                offset_bits: 8,
                length_bits: 18,
                default: 0,
                readonly: false,
                min: None,
                max: None,
            },
        ],
    }
}

fn bench_unit_state(c: &mut Criterion) {
    let unit_type = dimmer_rgb_unit_type();
    let mut state = lumimesh::unit::UnitState::new();
    state.dimmer = Some(200);
    state.set_hs(0.4, 0.6);
    let packed = encode_state(&unit_type, &state);

    let mut broadcast = Vec::new();
    for id in 0..8u8 {
        broadcast.push(id);
        broadcast.push(0x03); // on + online
        broadcast.push(0x30); // state_len=4, priority=0
        broadcast.extend_from_slice(&packed);
    }

    c.bench_function("parse_unit_state_records_8_units", |b| {
        b.iter(|| {
            let records = parse_unit_state_records(black_box(&broadcast));
            black_box(records);
        });
    });

    c.bench_function("decode_state_dimmer_rgb", |b| {
        b.iter(|| {
            let state = decode_state(black_box(&unit_type), black_box(&packed));
            black_box(state);
        });
    });

    c.bench_function("encode_state_dimmer_rgb", |b| {
        b.iter(|| {
            let bytes = encode_state(black_box(&unit_type), black_box(&state));
            black_box(bytes);
        });
    });
}

criterion_group!(
    benches,
    bench_framing,
    bench_primitives,
    bench_operation_builder,
    bench_unit_state
);
criterion_main!(benches);
