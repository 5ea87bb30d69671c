//! Unit-state broadcast parser (spec §4.7, inner message type `0x06`).
//!
//! Two layers: [`parse_unit_state_records`] splits the broadcast body
//! into per-unit records without knowing anything about any particular
//! unit's fixture catalogue, and [`decode_state`]/[`encode_state`]
//! translate one record's raw state bytes to and from a [`UnitState`]
//! given the owning unit's [`UnitType`].

use tracing::trace;

use crate::unit::{ColorSource, UnitControlKind, UnitState, UnitType};

/// One per-unit record out of a unit-state broadcast body, before its
/// `state_bytes` have been interpreted against a `UnitType`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStateRecord {
    pub id: u8,
    pub on: bool,
    pub online: bool,
    pub priority: u8,
    pub con: Option<u8>,
    pub sid: Option<u8>,
    pub unknown: Option<u8>,
    pub state_bytes: Vec<u8>,
}

/// Split a unit-state broadcast body into its per-unit records.
///
/// A record truncated at the end of the buffer is dropped silently;
/// every complete record parsed before it is still returned.
pub fn parse_unit_state_records(data: &[u8]) -> Vec<UnitStateRecord> {
    let mut records = Vec::new();
    let mut pos = 0usize;

    while data.len() >= 4 && pos <= data.len() - 4 {
        let id = data[pos];
        let flags = data[pos + 1];
        let header = data[pos + 2];
        let state_len = (((header >> 4) & 0x0f) + 1) as usize;
        let priority = header & 0x0f;
        pos += 3;

        let on = flags & 0x01 != 0;
        let online = flags & 0x02 != 0;

        let mut con = None;
        let mut sid = None;
        let mut unknown = None;

        if flags & 0x04 != 0 {
            match data.get(pos) {
                Some(&b) => {
                    con = Some(b);
                    pos += 1;
                }
                None => break,
            }
        }
        if flags & 0x08 != 0 {
            match data.get(pos) {
                Some(&b) => {
                    sid = Some(b);
                    pos += 1;
                }
                None => break,
            }
        }
        if flags & 0x10 != 0 {
            match data.get(pos) {
                Some(&b) => {
                    unknown = Some(b);
                    pos += 1;
                }
                None => break,
            }
        }

        if pos + state_len > data.len() {
            trace!(id, "truncated unit-state record, abandoning remainder");
            break;
        }
        let state_bytes = data[pos..pos + state_len].to_vec();
        pos += state_len;

        let padding = ((flags >> 6) & 0x03) as usize;
        pos += padding;

        records.push(UnitStateRecord {
            id,
            on,
            online,
            priority,
            con,
            sid,
            unknown,
            state_bytes,
        });
    }

    records
}

/// Read `length_bits` bits starting at `offset_bits` out of `bytes`,
/// little-endian within the covering byte span. Returns `None` if the
/// span runs past the end of `bytes`.
fn read_bits(bytes: &[u8], offset_bits: usize, length_bits: usize) -> Option<u64> {
    let sub_offset = offset_bits % 8;
    let byte_len = (length_bits + sub_offset + 7) / 8;
    let start_byte = offset_bits / 8;
    if start_byte + byte_len > bytes.len() {
        return None;
    }

    let mut val: u64 = 0;
    for (i, b) in bytes[start_byte..start_byte + byte_len].iter().enumerate() {
        val |= (*b as u64) << (8 * i);
    }
    val >>= sub_offset as u64;
    let mask = if length_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << length_bits) - 1
    };
    Some(val & mask)
}

/// Set `length_bits` bits of `value` starting at `offset_bits` in
/// `buf`, OR-ed in bit by bit so byte alignment never matters.
fn write_bits(buf: &mut [u8], offset_bits: usize, length_bits: usize, value: u64) {
    for i in 0..length_bits {
        if (value >> i) & 1 != 0 {
            let bit_pos = offset_bits + i;
            buf[bit_pos / 8] |= 1 << (bit_pos % 8);
        }
    }
}

fn to_8bit_resolution(raw: u64, length_bits: usize) -> u8 {
    let shift = (8usize).saturating_sub(length_bits);
    ((raw << shift) & 0xff) as u8
}

fn from_8bit_resolution(value: u8, length_bits: usize) -> u64 {
    let shift = (8usize).saturating_sub(length_bits);
    (value as u64) >> shift
}

/// Decode `state_bytes` against `unit_type`'s controls into a `UnitState`.
/// Unsupported or absent fields are left `None`; the `Unknown`/`Sensor`/
/// `OnOff` control kinds are not part of the bit-packed state and are
/// only logged.
pub fn decode_state(unit_type: &UnitType, state_bytes: &[u8]) -> UnitState {
    let mut state = UnitState::new();

    for control in &unit_type.controls {
        let offset = control.offset_bits as usize;
        let length = control.length_bits as usize;

        match control.kind {
            UnitControlKind::Dimmer => {
                if let Some(raw) = read_bits(state_bytes, offset, length) {
                    state.dimmer = Some(to_8bit_resolution(raw, length));
                }
            }
            UnitControlKind::White => {
                if let Some(raw) = read_bits(state_bytes, offset, length) {
                    state.white = Some(to_8bit_resolution(raw, length));
                }
            }
            UnitControlKind::Vertical => {
                if let Some(raw) = read_bits(state_bytes, offset, length) {
                    state.vertical = Some(to_8bit_resolution(raw, length));
                }
            }
            UnitControlKind::Slider => {
                if let Some(raw) = read_bits(state_bytes, offset, length) {
                    state.slider = Some(to_8bit_resolution(raw, length));
                }
            }
            UnitControlKind::Rgb => {
                if let Some(raw) = read_bits(state_bytes, offset, length) {
                    let hue_bits = (length * 10) / 18;
                    let sat_bits = length - hue_bits;
                    let hue_mask = (1u64 << hue_bits) - 1;
                    let sat_mask = (1u64 << sat_bits) - 1;

                    let hue_raw = (raw >> sat_bits) & hue_mask;
                    let sat_raw = raw & sat_mask;

                    let h = hue_raw as f64 / hue_mask as f64;
                    let s = sat_raw as f64 / sat_mask as f64;
                    state.set_hs(h, s);
                }
            }
            UnitControlKind::Temperature => {
                if let (Some(raw), Some(min), Some(max)) = (
                    read_bits(state_bytes, offset, length),
                    control.min,
                    control.max,
                ) {
                    let max_raw = (1u64 << length) - 1;
                    let kelvin = min as f64
                        + (raw as f64 / max_raw as f64) * (max - min) as f64;
                    state.temperature = Some(kelvin.round() as u32);
                }
            }
            UnitControlKind::ColorSource => {
                if let Some(raw) = read_bits(state_bytes, offset, length) {
                    state.colorsource = Some(ColorSource::from_tag(raw as u32));
                }
            }
            UnitControlKind::Xy => {
                if let Some(raw) = read_bits(state_bytes, offset, length) {
                    let half = length / 2;
                    let mask = (1u64 << half) - 1;
                    let x_raw = (raw >> half) & mask;
                    let y_raw = raw & mask;
                    state.xy = Some((x_raw as f64 / mask as f64, y_raw as f64 / mask as f64));
                }
            }
            UnitControlKind::OnOff | UnitControlKind::Sensor | UnitControlKind::Unknown { .. } => {
                if let Some(raw) = read_bits(state_bytes, offset, length) {
                    trace!(?control.kind, raw, "control not part of decoded state");
                }
            }
        }
    }

    state
}

/// Pack `state` into `unit_type.state_length` bytes, the exact inverse
/// of [`decode_state`]. Any control whose value is unset in `state`
/// falls back to that control's `default`.
pub fn encode_state(unit_type: &UnitType, state: &UnitState) -> Vec<u8> {
    let mut buf = vec![0u8; unit_type.state_length];

    for control in &unit_type.controls {
        let offset = control.offset_bits as usize;
        let length = control.length_bits as usize;

        let raw: u64 = match control.kind {
            UnitControlKind::Dimmer => state
                .dimmer
                .map(|v| from_8bit_resolution(v, length))
                .unwrap_or(control.default as u64),
            UnitControlKind::White => state
                .white
                .map(|v| from_8bit_resolution(v, length))
                .unwrap_or(control.default as u64),
            UnitControlKind::Vertical => state
                .vertical
                .map(|v| from_8bit_resolution(v, length))
                .unwrap_or(control.default as u64),
            UnitControlKind::Slider => state
                .slider
                .map(|v| from_8bit_resolution(v, length))
                .unwrap_or(control.default as u64),
            UnitControlKind::Rgb => match state.hs() {
                Some((h, s)) => {
                    let hue_bits = (length * 10) / 18;
                    let sat_bits = length - hue_bits;
                    let hue_mask = (1u64 << hue_bits) - 1;
                    let sat_mask = (1u64 << sat_bits) - 1;
                    let hue_raw = (h * hue_mask as f64).round() as u64 & hue_mask;
                    let sat_raw = (s * sat_mask as f64).round() as u64 & sat_mask;
                    (hue_raw << sat_bits) | sat_raw
                }
                None => control.default as u64,
            },
            UnitControlKind::Temperature => match (state.temperature, control.min, control.max) {
                (Some(kelvin), Some(min), Some(max)) if max != min => {
                    let max_raw = (1u64 << length) - 1;
                    let frac = (kelvin as f64 - min as f64) / (max - min) as f64;
                    (frac * max_raw as f64).round() as u64
                }
                _ => control.default as u64,
            },
            UnitControlKind::ColorSource => state
                .colorsource
                .map(|c| c.as_tag() as u64)
                .unwrap_or(control.default as u64),
            UnitControlKind::Xy => match state.xy {
                Some((x, y)) => {
                    let half = length / 2;
                    let mask = (1u64 << half) - 1;
                    let x_raw = (x * mask as f64).round() as u64 & mask;
                    let y_raw = (y * mask as f64).round() as u64 & mask;
                    (x_raw << half) | y_raw
                }
                None => control.default as u64,
            },
            UnitControlKind::OnOff | UnitControlKind::Sensor | UnitControlKind::Unknown { .. } => {
                control.default as u64
            }
        };

        write_bits(&mut buf, offset, length, raw);
    }

    buf
}
