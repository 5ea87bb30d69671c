//! Static and runtime unit model (spec §3): the catalogue types that
//! describe what a unit can do (`UnitType`/`UnitControl`), the decoded
//! value of those controls (`UnitState`), and the owning containers
//! (`Unit`, `Group`, `Scene`).
//!
//! The wire codec for `UnitState` — the bit-packed decode/encode that
//! turns raw state bytes into these types and back — lives in
//! `inbound::unit_state`, not here; this module is the data model only.

use serde::{Deserialize, Serialize};

/// The kinds of control a unit's fixture catalogue entry may expose.
/// `Unknown` carries the raw type tag instead of silently dropping it,
/// so a never-seen control can still be inspected for debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UnitControlKind {
    Dimmer,
    White,
    Rgb,
    OnOff,
    Temperature,
    Vertical,
    ColorSource,
    Xy,
    Slider,
    Sensor,
    Unknown { raw_tag: u8 },
}

/// One addressable attribute within a unit's state bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitControl {
    pub kind: UnitControlKind,
    pub offset_bits: u16,
    pub length_bits: u16,
    pub default: u32,
    pub readonly: bool,
    /// Only meaningful for `Temperature`: the Kelvin range the raw
    /// field is normalised against.
    pub min: Option<i32>,
    pub max: Option<i32>,
}

/// Fixture-catalogue entry shared by every unit of the same model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitType {
    pub id: u32,
    pub model: String,
    pub manufacturer: String,
    pub mode: String,
    pub state_length: usize,
    pub controls: Vec<UnitControl>,
}

impl UnitType {
    pub fn get_control(&self, kind: UnitControlKind) -> Option<&UnitControl> {
        self.controls.iter().find(|c| c.kind == kind)
    }
}

/// Which colour model a `ColorSource` control currently selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSource {
    Temperature,
    Rgb,
    Xy,
}

impl ColorSource {
    pub fn from_tag(tag: u32) -> Self {
        match tag {
            0 => ColorSource::Temperature,
            2 => ColorSource::Xy,
            _ => ColorSource::Rgb,
        }
    }

    pub fn as_tag(self) -> u32 {
        match self {
            ColorSource::Temperature => 0,
            ColorSource::Rgb => 1,
            ColorSource::Xy => 2,
        }
    }
}

/// A decoded snapshot of a unit's controllable attributes. Every field
/// is `None` until the corresponding control has been seen in a
/// decoded state record or explicitly set by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UnitState {
    pub dimmer: Option<u8>,
    pub white: Option<u8>,
    pub rgb: Option<(u8, u8, u8)>,
    pub vertical: Option<u8>,
    pub slider: Option<u8>,
    pub temperature: Option<u32>,
    pub colorsource: Option<ColorSource>,
    pub xy: Option<(f64, f64)>,
}

impl UnitState {
    pub const RESOLUTION: u32 = 8;
    pub const MAX_8BIT: u8 = u8::MAX;

    pub fn new() -> Self {
        Self::default()
    }

    /// Hue/saturation derived from `rgb`, matching the unit-state wire
    /// format's internal (hue, sat) representation for the RGB control.
    /// `h` and `s` are both normalised to `[0, 1]`.
    pub fn hs(&self) -> Option<(f64, f64)> {
        let (r, g, b) = self.rgb?;
        let (h, s, _v) = rgb_to_hsv(
            r as f64 / Self::MAX_8BIT as f64,
            g as f64 / Self::MAX_8BIT as f64,
            b as f64 / Self::MAX_8BIT as f64,
        );
        let h = h.rem_euclid(1.0);
        let h = if h == 0.0 && s == 0.0 { 0.5 } else { h };
        Some((h, s))
    }

    pub fn set_hs(&mut self, h: f64, s: f64) {
        let (r, g, b) = hsv_to_rgb(h, s, 1.0);
        self.rgb = Some((
            (r * Self::MAX_8BIT as f64).round() as u8,
            (g * Self::MAX_8BIT as f64).round() as u8,
            (b * Self::MAX_8BIT as f64).round() as u8,
        ));
    }
}

fn rgb_to_hsv(r: f64, g: f64, b: f64) -> (f64, f64, f64) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let v = max;
    let delta = max - min;
    if delta == 0.0 {
        return (0.0, 0.0, v);
    }
    let s = delta / max;
    let h = if max == r {
        (g - b) / delta
    } else if max == g {
        2.0 + (b - r) / delta
    } else {
        4.0 + (r - g) / delta
    };
    let h = (h / 6.0).rem_euclid(1.0);
    (h, s, v)
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (f64, f64, f64) {
    if s == 0.0 {
        return (v, v, v);
    }
    let h = h.rem_euclid(1.0) * 6.0;
    let i = h.floor();
    let f = h - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match i as i64 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

/// One addressable unit in a network.
#[derive(Debug, Clone)]
pub struct Unit {
    pub device_id: u8,
    pub uuid: String,
    pub address: String,
    pub name: String,
    pub firmware_version: String,
    pub unit_type: UnitType,
    pub state: Option<UnitState>,
    pub on: bool,
    pub online: bool,
}

impl Unit {
    /// Whether the unit is effectively producing light: off units are
    /// never "on", and for dimmable units a zero dimmer level also
    /// counts as off even if the on-flag is set.
    pub fn is_on(&self) -> bool {
        if self.unit_type.get_control(UnitControlKind::Dimmer).is_some() {
            self.on && self.state.and_then(|s| s.dimmer).unwrap_or(0) > 0
        } else {
            self.on
        }
    }
}

/// A scene in a network: a named preset addressable with `Target::Scene`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub scene_id: u8,
    pub name: String,
}

/// A named collection of units, addressable with `Target::Group`.
#[derive(Debug, Clone)]
pub struct Group {
    pub group_id: u8,
    pub name: String,
    pub unit_ids: Vec<u8>,
}
