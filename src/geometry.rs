//! Unit conversion and plane geometry shared by the encoders.
//!
//! EasyEDA stores lengths in tenths of a mil-ish "pixel" unit: one unit is
//! `10 * 0.0254` mm. All conversions here are total functions; garbage input
//! turns into `0.0` rather than an error because the source payloads are
//! frequently sloppy about empty fields.

use glam::DVec2;
use std::f64::consts::PI;

const EASYEDA_UNIT_MM: f64 = 10.0 * 0.0254;

/// Anything the decoder may hand over as a raw numeric field.
pub trait RawNumber {
    fn raw_f64(&self) -> Option<f64>;
}

impl RawNumber for f64 {
    fn raw_f64(&self) -> Option<f64> {
        Some(*self)
    }
}

impl RawNumber for f32 {
    fn raw_f64(&self) -> Option<f64> {
        Some(*self as f64)
    }
}

impl RawNumber for &str {
    fn raw_f64(&self) -> Option<f64> {
        self.trim().parse::<f64>().ok()
    }
}

impl RawNumber for &String {
    fn raw_f64(&self) -> Option<f64> {
        self.as_str().raw_f64()
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// EasyEDA unit to millimeters, rounded to 2 decimals.
pub fn easyeda_to_mm<V: RawNumber>(value: V) -> f64 {
    match value.raw_f64() {
        Some(v) if v.is_finite() => round2(v * EASYEDA_UNIT_MM),
        _ => 0.0,
    }
}

/// Inverse of [`easyeda_to_mm`] without rounding.
pub fn mm_to_easyeda(mm: f64) -> f64 {
    mm / EASYEDA_UNIT_MM
}

/// EasyEDA unit to mils, the unit of the legacy KiCad 5 library format.
pub fn easyeda_to_mil<V: RawNumber>(value: V) -> f64 {
    match value.raw_f64() {
        Some(v) if v.is_finite() => (v * 10.0).round(),
        _ => 0.0,
    }
}

/// Maps a 0..360 source angle onto KiCad's signed convention.
pub fn angle_normalize_kicad(angle: f64) -> f64 {
    if angle.is_nan() {
        0.0
    } else if angle > 180.0 {
        angle - 360.0
    } else {
        angle
    }
}

pub fn rotate_point(p: DVec2, degrees: f64) -> DVec2 {
    DVec2::from_angle(degrees.to_radians()).rotate(p)
}

/// W3C endpoint-to-center conversion for an SVG elliptical arc.
///
/// Returns the center and the angular extent in degrees, using KiCad's sign
/// convention (the SVG extent negated). Colinear direction vectors produce a
/// degenerate 359 degree extent.
pub fn svg_arc_to_center(
    start: DVec2,
    radii: DVec2,
    x_axis_rotation: f64,
    large_arc_flag: bool,
    sweep_flag: bool,
    end: DVec2,
) -> (DVec2, f64) {
    let half = (start - end) / 2.0;

    let phi = (x_axis_rotation % 360.0).to_radians();
    let (sin_phi, cos_phi) = phi.sin_cos();

    // Step 1: the start point in the rotated frame
    let x1 = cos_phi * half.x + sin_phi * half.y;
    let y1 = -sin_phi * half.x + cos_phi * half.y;

    let mut rx = radii.x.abs();
    let mut ry = radii.y.abs();
    let mut prx = rx * rx;
    let mut pry = ry * ry;
    let px1 = x1 * x1;
    let py1 = y1 * y1;

    let radii_check = if prx != 0.0 && pry != 0.0 {
        px1 / prx + py1 / pry
    } else {
        0.0
    };
    if radii_check > 1.0 {
        rx *= radii_check.sqrt();
        ry *= radii_check.sqrt();
        prx = rx * rx;
        pry = ry * ry;
    }

    // Step 2: center in the rotated frame
    let sign = if large_arc_flag == sweep_flag { -1.0 } else { 1.0 };
    let denom = prx * py1 + pry * px1;
    let sq = if denom > 0.0 {
        ((prx * pry - prx * py1 - pry * px1) / denom).max(0.0)
    } else {
        0.0
    };
    let coef = sign * sq.sqrt();
    let cx1 = if ry != 0.0 { coef * (rx * y1 / ry) } else { 0.0 };
    let cy1 = if rx != 0.0 { coef * -(ry * x1 / rx) } else { 0.0 };

    // Step 3: back to the original frame
    let mid = (start + end) / 2.0;
    let center = DVec2::new(
        mid.x + (cos_phi * cx1 - sin_phi * cy1),
        mid.y + (sin_phi * cx1 + cos_phi * cy1),
    );

    // Step 4: angular extent
    let ratio = |n: f64, r: f64| if r != 0.0 { n / r } else { 0.0 };
    let u = DVec2::new(ratio(x1 - cx1, rx), ratio(y1 - cy1, ry));
    let v = DVec2::new(ratio(-x1 - cx1, rx), ratio(-y1 - cy1, ry));

    let n = (u.length_squared() * v.length_squared()).sqrt();
    let p = u.dot(v);
    let dir = if u.perp_dot(v) < 0.0 { -1.0 } else { 1.0 };
    let mut extent = if n != 0.0 {
        (dir * (p / n).clamp(-1.0, 1.0).acos()) * 180.0 / PI
    } else {
        360.0 + 359.0
    };
    if !sweep_flag && extent > 0.0 {
        extent -= 360.0;
    } else if sweep_flag && extent < 0.0 {
        extent += 360.0;
    }

    let kicad_sign = if extent < 0.0 { 1.0 } else { -1.0 };
    (center, (extent.abs() % 360.0) * kicad_sign)
}

/// Point halfway along an arc given by its center, start point and KiCad extent.
pub fn arc_mid_point(center: DVec2, start: DVec2, kicad_extent: f64) -> DVec2 {
    let offset = start - center;
    let half_sweep = -kicad_extent / 2.0;
    center + rotate_point(offset, half_sweep)
}

/// Drill clause of a pad, in millimeters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrillSpec {
    None,
    Circle(f64),
    Oval { width: f64, height: f64 },
}

impl DrillSpec {
    pub fn to_kicad(&self) -> String {
        match self {
            DrillSpec::None => String::new(),
            DrillSpec::Circle(d) => format!(" (drill {})", fmt_num(*d)),
            DrillSpec::Oval { width, height } => {
                format!(" (drill oval {} {})", fmt_num(*width), fmt_num(*height))
            }
        }
    }
}

pub fn drill_spec(
    hole_radius: f64,
    hole_length: Option<f64>,
    pad_height: f64,
    pad_width: f64,
) -> DrillSpec {
    if hole_radius <= 0.0 {
        return DrillSpec::None;
    }
    match hole_length {
        Some(length) if length != 0.0 => {
            let max_distance_hole = (hole_radius * 2.0).max(length);
            let pos_0 = pad_height - max_distance_hole;
            let pos_90 = pad_width - max_distance_hole;
            if pos_0 >= pos_90 {
                DrillSpec::Oval {
                    width: hole_radius * 2.0,
                    height: length,
                }
            } else {
                DrillSpec::Oval {
                    width: length,
                    height: hole_radius * 2.0,
                }
            }
        }
        _ => DrillSpec::Circle(hole_radius * 2.0),
    }
}

/// Stable number rendering: at most 4 decimals, trailing zeros trimmed, no `-0`.
pub fn fmt_num(value: f64) -> String {
    let v = if value.is_finite() { value } else { 0.0 };
    let s = format!("{:.4}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" || s.is_empty() {
        "0".to_string()
    } else {
        s.to_string()
    }
}
