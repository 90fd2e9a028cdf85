// src/converter.rs

use crate::config::KicadVersion;
use crate::error::{Error, Result};
use crate::geometry::{
    angle_normalize_kicad, arc_mid_point, drill_spec, easyeda_to_mm, round2, svg_arc_to_center,
};
use crate::importer::parse_points;
use crate::model3d::{compute_placement, sanitize_name};
use crate::{easyeda_models::*, kicad_models::*};
use glam::{DVec2, DVec3};
use regex::Regex;
use std::sync::LazyLock;

/// One conversion step from a decoded EasyEDA record to its KiCad counterpart.
pub trait Encoder {
    type Input;
    type Output;

    fn encode(&self, input: &Self::Input) -> Result<Self::Output>;
}

/// Name usable both as a library item and as a file stem.
pub fn library_item_name(name: &str) -> String {
    sanitize_name(name.trim()).replace([' ', '(', ')'], "_")
}

// --- SVG path helpers ---

#[derive(Debug, Clone, Copy, PartialEq)]
enum PathToken {
    Command(char),
    Number(f64),
}

static PATH_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[MmLlHhVvZzAaCcQqSsTt]|[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?")
        .expect("path token pattern is valid")
});

fn tokenize_path(path: &str) -> Vec<PathToken> {
    PATH_TOKEN
        .find_iter(path)
        .filter_map(|m| {
            let s = m.as_str();
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => Some(PathToken::Command(c)),
                _ => s.parse().ok().map(PathToken::Number),
            }
        })
        .collect()
}

fn numbers(tokens: &[PathToken]) -> Option<Vec<f64>> {
    tokens
        .iter()
        .map(|t| match t {
            PathToken::Number(n) => Some(*n),
            PathToken::Command(_) => None,
        })
        .collect()
}

/// Flattens an SVG path into polylines. Curves and arcs are reduced to their
/// end points.
fn path_to_polylines(path: &str) -> Vec<Vec<DVec2>> {
    let tokens = tokenize_path(path);
    let mut subpaths = Vec::new();
    let mut current: Vec<DVec2> = Vec::new();
    let mut cursor = DVec2::ZERO;
    let mut start = DVec2::ZERO;
    let mut cmd = 'M';
    let mut i = 0;

    while i < tokens.len() {
        if let PathToken::Command(c) = tokens[i] {
            cmd = c;
            i += 1;
            if c.eq_ignore_ascii_case(&'z') {
                if !current.is_empty() {
                    current.push(start);
                    subpaths.push(std::mem::take(&mut current));
                }
                cursor = start;
            }
            continue;
        }

        let upper = cmd.to_ascii_uppercase();
        let arity = match upper {
            'M' | 'L' | 'T' => 2,
            'H' | 'V' => 1,
            'A' => 7,
            'C' => 6,
            'Q' | 'S' => 4,
            _ => {
                i += 1;
                continue;
            }
        };
        let Some(args) = tokens.get(i..i + arity).and_then(numbers) else {
            break;
        };
        i += arity;

        let relative = cmd.is_ascii_lowercase();
        let base = if relative { cursor } else { DVec2::ZERO };
        let next = match upper {
            'M' => {
                if current.len() > 1 {
                    subpaths.push(std::mem::take(&mut current));
                }
                current.clear();
                let p = base + DVec2::new(args[0], args[1]);
                start = p;
                cursor = p;
                current.push(p);
                // Extra coordinate pairs after a move are implicit line-tos
                cmd = if relative { 'l' } else { 'L' };
                continue;
            }
            'L' | 'T' => base + DVec2::new(args[0], args[1]),
            'H' => DVec2::new(if relative { cursor.x + args[0] } else { args[0] }, cursor.y),
            'V' => DVec2::new(cursor.x, if relative { cursor.y + args[0] } else { args[0] }),
            'A' => base + DVec2::new(args[5], args[6]),
            'C' => base + DVec2::new(args[4], args[5]),
            _ => base + DVec2::new(args[2], args[3]),
        };
        if current.is_empty() {
            current.push(cursor);
        }
        current.push(next);
        cursor = next;
    }

    if current.len() > 1 {
        subpaths.push(current);
    }
    subpaths
}

/// `M sx sy A rx ry rot large sweep ex ey`
struct ArcPath {
    start: DVec2,
    radii: DVec2,
    rotation: f64,
    large_arc: bool,
    sweep: bool,
    end: DVec2,
}

fn parse_arc_path(path: &str) -> Option<ArcPath> {
    let tokens = tokenize_path(path);
    let move_at = tokens
        .iter()
        .position(|t| matches!(t, PathToken::Command('M' | 'm')))?;
    let start = numbers(tokens.get(move_at + 1..move_at + 3)?)?;
    let arc_cmd = match tokens.get(move_at + 3)? {
        PathToken::Command(c @ ('A' | 'a')) => *c,
        _ => return None,
    };
    let a = numbers(tokens.get(move_at + 4..move_at + 11)?)?;
    let start = DVec2::new(start[0], start[1]);
    let mut end = DVec2::new(a[5], a[6]);
    if arc_cmd == 'a' {
        end += start;
    }
    Some(ArcPath {
        start,
        radii: DVec2::new(a[0], a[1]),
        rotation: a[2],
        large_arc: a[3] != 0.0,
        sweep: a[4] != 0.0,
        end,
    })
}

/// Pin length from the pin line path: the last `h`/`v` run, or the distance
/// covered by an explicit line-to.
fn pin_length(path: &str) -> f64 {
    let tokens = tokenize_path(path);
    let mut length = None;
    for (idx, token) in tokens.iter().enumerate() {
        if let PathToken::Command('h' | 'H' | 'v' | 'V') = token {
            if let Some(PathToken::Number(n)) = tokens.get(idx + 1) {
                length = Some(n.abs());
            }
        }
    }
    length.unwrap_or_else(|| {
        path_to_polylines(path)
            .first()
            .and_then(|pts| Some(pts.first()?.distance(*pts.last()?)))
            .unwrap_or(0.0)
    })
}

// --- Symbol ---

pub struct SymbolEncoder {
    pub version: KicadVersion,
    /// Library nickname used in the `Footprint` property.
    pub footprint_lib: String,
}

impl SymbolEncoder {
    pub fn new(version: KicadVersion, footprint_lib: impl Into<String>) -> Self {
        SymbolEncoder {
            version,
            footprint_lib: footprint_lib.into(),
        }
    }

    /// Encodes and renders the library block in the configured format.
    pub fn render(&self, symbol: &EeSymbol) -> Result<(KiSymbol, String)> {
        let ki = self.encode(symbol)?;
        let block = ki.to_kicad_lib_entry(self.version);
        Ok((ki, block))
    }
}

struct SymbolFrame {
    bbox: DVec2,
}

impl SymbolFrame {
    /// EasyEDA canvas point to KiCad symbol space: bbox relative, y up.
    fn point(&self, p: DVec2) -> DVec2 {
        DVec2::new(
            easyeda_to_mm(p.x - self.bbox.x),
            -easyeda_to_mm(p.y - self.bbox.y),
        )
    }
}

fn map_pin_type(pin_type: EePinType) -> KiPinType {
    match pin_type {
        EePinType::Input => KiPinType::Input,
        EePinType::Output => KiPinType::Output,
        EePinType::Bidirectional => KiPinType::Bidirectional,
        EePinType::Power => KiPinType::PowerIn,
        EePinType::Unspecified => KiPinType::Unspecified,
    }
}

fn pin_style(pin: &EeSymbolPin) -> KiPinStyle {
    match (pin.dot_bis, pin.clock) {
        (true, true) => KiPinStyle::InvertedClock,
        (true, false) => KiPinStyle::Inverted,
        (false, true) => KiPinStyle::Clock,
        (false, false) => KiPinStyle::Line,
    }
}

impl Encoder for SymbolEncoder {
    type Input = EeSymbol;
    type Output = KiSymbol;

    fn encode(&self, ee_symbol: &EeSymbol) -> Result<KiSymbol> {
        let name = library_item_name(&ee_symbol.info.name);
        if name.is_empty() {
            return Err(Error::Format("symbol has no name".to_string()));
        }
        let frame = SymbolFrame {
            bbox: ee_symbol.bbox,
        };

        let pins = ee_symbol
            .pins
            .iter()
            .map(|pin| KiSymbolPin {
                name: pin.name.text.trim().to_string(),
                number: pin.settings.spice_pin_number.trim().to_string(),
                pin_type: map_pin_type(pin.settings.pin_type),
                style: pin_style(pin),
                length: easyeda_to_mm(pin_length(&pin.path)),
                pos: frame.point(pin.settings.pos),
                rotation: (180 + pin.settings.rotation.round() as i32).rem_euclid(360),
            })
            .collect();

        let rectangles = ee_symbol
            .rectangles
            .iter()
            .map(|rect| KiSymbolRect {
                start: frame.point(rect.pos),
                end: frame.point(rect.pos + DVec2::new(rect.width, rect.height)),
                stroke_width: easyeda_to_mm(rect.stroke_width),
                fill: rect.fill,
            })
            .collect();

        let mut circles: Vec<KiSymbolCircle> = ee_symbol
            .circles
            .iter()
            .map(|c| KiSymbolCircle {
                center: frame.point(c.center),
                radius: easyeda_to_mm(c.radius),
                stroke_width: easyeda_to_mm(c.stroke_width),
                fill: c.fill,
            })
            .collect();

        let mut polylines: Vec<KiSymbolPolyline> = Vec::new();

        for ellipse in &ee_symbol.ellipses {
            if ellipse.radius_x == ellipse.radius_y {
                circles.push(KiSymbolCircle {
                    center: frame.point(ellipse.center),
                    radius: easyeda_to_mm(ellipse.radius_x),
                    stroke_width: easyeda_to_mm(ellipse.stroke_width),
                    fill: ellipse.fill,
                });
            } else {
                const SEGMENTS: usize = 36;
                let points = (0..=SEGMENTS)
                    .map(|i| {
                        let t = (i % SEGMENTS) as f64 / SEGMENTS as f64 * std::f64::consts::TAU;
                        frame.point(
                            ellipse.center
                                + DVec2::new(ellipse.radius_x * t.cos(), ellipse.radius_y * t.sin()),
                        )
                    })
                    .collect();
                polylines.push(KiSymbolPolyline {
                    points,
                    stroke_width: easyeda_to_mm(ellipse.stroke_width),
                    fill: ellipse.fill,
                });
            }
        }

        let mut arcs = Vec::new();
        for arc in &ee_symbol.arcs {
            let Some(parsed) = parse_arc_path(&arc.path) else {
                log::warn!("Skipping symbol arc with unreadable path {:?}", arc.path);
                continue;
            };
            if parsed.radii.x == 0.0 || parsed.radii.y == 0.0 {
                polylines.push(KiSymbolPolyline {
                    points: vec![frame.point(parsed.start), frame.point(parsed.end)],
                    stroke_width: easyeda_to_mm(arc.stroke_width),
                    fill: false,
                });
                continue;
            }
            let (center, extent) = svg_arc_to_center(
                parsed.start,
                parsed.radii,
                parsed.rotation,
                parsed.large_arc,
                parsed.sweep,
                parsed.end,
            );
            let mid = arc_mid_point(center, parsed.start, extent);
            let ki_center = frame.point(center);
            let ki_start = frame.point(parsed.start);
            arcs.push(KiSymbolArc {
                start: ki_start,
                mid: frame.point(mid),
                end: frame.point(parsed.end),
                center: ki_center,
                radius: round2(ki_center.distance(ki_start)),
                stroke_width: easyeda_to_mm(arc.stroke_width),
                fill: arc.fill,
            });
        }

        for poly in &ee_symbol.polylines {
            polylines.push(KiSymbolPolyline {
                points: poly.points.iter().map(|p| frame.point(*p)).collect(),
                stroke_width: easyeda_to_mm(poly.stroke_width),
                fill: poly.fill,
            });
        }

        for poly in &ee_symbol.polygons {
            let mut points: Vec<DVec2> = poly.points.iter().map(|p| frame.point(*p)).collect();
            if let (Some(first), Some(last)) = (points.first().copied(), points.last().copied()) {
                if first != last {
                    points.push(first);
                }
            }
            polylines.push(KiSymbolPolyline {
                points,
                stroke_width: easyeda_to_mm(poly.stroke_width),
                fill: poly.fill,
            });
        }

        for path in &ee_symbol.paths {
            for points in path_to_polylines(&path.path) {
                polylines.push(KiSymbolPolyline {
                    points: points.into_iter().map(|p| frame.point(p)).collect(),
                    stroke_width: easyeda_to_mm(path.stroke_width),
                    fill: path.fill,
                });
            }
        }

        let info = &ee_symbol.info;
        let footprint = info
            .package
            .as_deref()
            .map(|pkg| format!("{}:{}", self.footprint_lib, library_item_name(pkg)))
            .unwrap_or_default();

        Ok(KiSymbol {
            value: name.clone(),
            name,
            reference: if info.prefix.is_empty() {
                "U".to_string()
            } else {
                info.prefix.clone()
            },
            footprint,
            datasheet: info.datasheet.clone().unwrap_or_default(),
            manufacturer: info.manufacturer.clone(),
            lcsc_part: info.lcsc_id.clone(),
            jlc_part_class: info.jlc_part_class.clone(),
            pins,
            rectangles,
            circles,
            arcs,
            polylines,
        })
    }
}

// --- Footprint ---

/// Maps EasyEDA layer IDs to the layer list of an SMD pad.
fn pad_layers(layer_id: i32) -> &'static str {
    match layer_id {
        1 => "F.Cu F.Paste F.Mask",
        2 => "B.Cu B.Paste B.Mask",
        3 => "F.SilkS",
        11 => "*.Cu *.Paste *.Mask",
        13 => "F.Fab",
        15 => "Dwgs.User",
        _ => "F.Fab",
    }
}

/// Same as [`pad_layers`] for plated through-hole pads, which carry no paste.
fn tht_pad_layers(layer_id: i32) -> &'static str {
    match layer_id {
        1 => "F.Cu F.Mask",
        2 => "B.Cu B.Mask",
        3 => "F.SilkS",
        11 => "*.Cu *.Mask",
        13 => "F.Fab",
        15 => "Dwgs.User",
        _ => "F.Fab",
    }
}

/// Maps EasyEDA layer IDs to a single KiCad layer name.
fn layer_name(layer_id: i32) -> &'static str {
    match layer_id {
        1 => "F.Cu",
        2 => "B.Cu",
        3 => "F.SilkS",
        4 => "B.SilkS",
        5 => "F.Paste",
        6 => "B.Paste",
        7 => "F.Mask",
        8 => "B.Mask",
        10 | 11 => "Edge.Cuts",
        12 => "Cmts.User",
        13 => "F.Fab",
        14 => "B.Fab",
        15 => "Dwgs.User",
        101 => "F.Fab",
        _ => "F.Fab",
    }
}

/// `X(12)` style pad numbers keep only the inner number.
fn clean_pad_number(number: &str) -> String {
    match number.split_once('(').and_then(|(_, rest)| rest.split_once(')')) {
        Some((inner, _)) => inner.to_string(),
        None => number.to_string(),
    }
}

pub struct FootprintEncoder {
    pub lib_name: String,
    /// Prefix of the `.3dshapes` directory used in the model clause.
    pub model_path_prefix: String,
}

impl FootprintEncoder {
    pub fn new(lib_name: impl Into<String>, model_path_prefix: impl Into<String>) -> Self {
        FootprintEncoder {
            lib_name: lib_name.into(),
            model_path_prefix: model_path_prefix.into(),
        }
    }
}

struct FootprintFrame {
    bbox_mm: DVec2,
}

impl FootprintFrame {
    fn point(&self, p: DVec2) -> DVec2 {
        DVec2::new(
            round2(easyeda_to_mm(p.x) - self.bbox_mm.x),
            round2(easyeda_to_mm(p.y) - self.bbox_mm.y),
        )
    }
}

impl Encoder for FootprintEncoder {
    type Input = EeFootprint;
    type Output = KiFootprint;

    fn encode(&self, ee_footprint: &EeFootprint) -> Result<KiFootprint> {
        let name = library_item_name(&ee_footprint.info.name);
        if name.is_empty() {
            return Err(Error::Format("footprint has no name".to_string()));
        }
        let is_smd = ee_footprint.info.is_smd;
        let frame = FootprintFrame {
            bbox_mm: DVec2::new(
                easyeda_to_mm(ee_footprint.bbox.x),
                easyeda_to_mm(ee_footprint.bbox.y),
            ),
        };

        // --- Pads ---
        let mut pads = Vec::new();
        for ee_pad in &ee_footprint.pads {
            let pos = frame.point(ee_pad.center);
            let width = easyeda_to_mm(ee_pad.width).max(0.01);
            let height = easyeda_to_mm(ee_pad.height).max(0.01);
            let hole_radius = easyeda_to_mm(ee_pad.hole_radius);
            let through_hole = hole_radius > 0.0;

            let mut shape = FpShape::from_easyeda(&ee_pad.shape);
            let mut size = DVec2::new(width, height);
            let mut rotation = angle_normalize_kicad(ee_pad.rotation);
            let mut polygon = None;

            if shape == FpShape::Custom {
                let points = parse_points(&ee_pad.points);
                if points.is_empty() {
                    log::warn!(
                        "Pad {} is a polygon without outline, falling back to rect",
                        ee_pad.number
                    );
                    shape = FpShape::Rect;
                } else {
                    size = DVec2::splat(0.005);
                    rotation = 0.0;
                    polygon = Some(
                        points
                            .iter()
                            .map(|p| frame.point(*p) - pos)
                            .map(|p| DVec2::new(round2(p.x), round2(p.y)))
                            .collect(),
                    );
                }
            }

            pads.push(FpPad {
                number: clean_pad_number(&ee_pad.number),
                pad_type: if through_hole { "thru_hole" } else { "smd" }.to_string(),
                shape,
                pos,
                size,
                layers: if through_hole {
                    tht_pad_layers(ee_pad.layer_id)
                } else {
                    pad_layers(ee_pad.layer_id)
                }
                .to_string(),
                rotation,
                drill: drill_spec(
                    hole_radius,
                    ee_pad.hole_length.map(easyeda_to_mm),
                    height,
                    width,
                ),
                polygon,
            });
        }

        // --- Tracks ---
        let mut lines = Vec::new();
        for track in &ee_footprint.tracks {
            let points: Vec<DVec2> = parse_points(&track.points)
                .into_iter()
                .map(|p| frame.point(p))
                .collect();
            if points.len() < 2 {
                log::warn!("Dropping track with fewer than two points: {:?}", track.points);
                continue;
            }
            let width = easyeda_to_mm(track.stroke_width).max(0.01);
            for pair in points.windows(2) {
                lines.push(FpLine {
                    start: pair[0],
                    end: pair[1],
                    layer: layer_name(track.layer_id).to_string(),
                    width,
                });
            }
        }

        for rect in &ee_footprint.rectangles {
            let p0 = frame.point(rect.pos);
            let p2 = frame.point(rect.pos + DVec2::new(rect.width, rect.height));
            let p1 = DVec2::new(p2.x, p0.y);
            let p3 = DVec2::new(p0.x, p2.y);
            let width = easyeda_to_mm(rect.stroke_width).max(0.01);
            for (start, end) in [(p0, p1), (p1, p2), (p2, p3), (p3, p0)] {
                lines.push(FpLine {
                    start,
                    end,
                    layer: layer_name(rect.layer_id).to_string(),
                    width,
                });
            }
        }

        let holes = ee_footprint
            .holes
            .iter()
            .map(|hole| FpHole {
                pos: frame.point(hole.center),
                size: easyeda_to_mm(hole.radius) * 2.0,
            })
            .collect();

        let vias = ee_footprint
            .vias
            .iter()
            .map(|via| FpVia {
                pos: frame.point(via.center),
                diameter: easyeda_to_mm(via.diameter),
                drill: easyeda_to_mm(via.radius) * 2.0,
            })
            .collect();

        let circles = ee_footprint
            .circles
            .iter()
            .map(|circle| {
                let center = frame.point(circle.center);
                FpCircle {
                    center,
                    end: center + DVec2::new(easyeda_to_mm(circle.radius), 0.0),
                    layer: layer_name(circle.layer_id).to_string(),
                    width: easyeda_to_mm(circle.stroke_width).max(0.01),
                }
            })
            .collect();

        let mut arcs = Vec::new();
        for arc in &ee_footprint.arcs {
            let Some(parsed) = parse_arc_path(&arc.path) else {
                log::warn!("Skipping footprint arc with unreadable path {:?}", arc.path);
                continue;
            };
            let start = frame.point(parsed.start);
            let end = frame.point(parsed.end);
            let radii = DVec2::new(easyeda_to_mm(parsed.radii.x), easyeda_to_mm(parsed.radii.y));
            let (center, angle) = if radii.y == 0.0 {
                (end, 0.0)
            } else {
                svg_arc_to_center(start, radii, parsed.rotation, parsed.large_arc, parsed.sweep, end)
            };
            arcs.push(FpArc {
                start: DVec2::new(round2(center.x), round2(center.y)),
                end,
                angle,
                layer: layer_name(arc.layer_id).to_string(),
                width: easyeda_to_mm(arc.stroke_width).max(0.01),
            });
        }

        let texts = ee_footprint
            .texts
            .iter()
            .map(|text| {
                let mut layer = layer_name(text.layer_id).to_string();
                if text.text_type == "N" {
                    layer = layer.replace(".SilkS", ".Fab");
                }
                FpText {
                    text: text.text.clone(),
                    pos: frame.point(text.center),
                    rotation: angle_normalize_kicad(text.rotation),
                    mirror: layer.starts_with('B'),
                    layer,
                    font_size: easyeda_to_mm(text.font_size).max(1.0),
                    thickness: easyeda_to_mm(text.stroke_width).max(0.01),
                    hidden: !text.is_displayed,
                }
            })
            .collect();

        let model_3d = ee_footprint.model_3d.as_ref().map(|model| {
            let translation = DVec3::new(
                easyeda_to_mm(model.translation.x),
                easyeda_to_mm(model.translation.y),
                easyeda_to_mm(model.translation.z),
            );
            let (offset, rotate) =
                compute_placement(translation, model.rotation, frame.bbox_mm, is_smd);
            Ki3dModel {
                name: sanitize_name(&model.name),
                wrl_data: None,
                step_data: None,
                offset,
                scale: DVec3::ONE,
                rotate,
            }
        });

        Ok(KiFootprint {
            name,
            lib_name: self.lib_name.clone(),
            is_smd,
            pads,
            lines,
            holes,
            vias,
            circles,
            arcs,
            texts,
            model_3d,
            model_path_prefix: self.model_path_prefix.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_with_implicit_lines_and_close() {
        let lines = path_to_polylines("M 0 0 10 0 v 10 Z");
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0],
            vec![
                DVec2::new(0.0, 0.0),
                DVec2::new(10.0, 0.0),
                DVec2::new(10.0, 10.0),
                DVec2::new(0.0, 0.0)
            ]
        );
    }

    #[test]
    fn pin_length_from_path() {
        assert_eq!(pin_length("M 420 310 h 10"), 10.0);
        assert_eq!(pin_length("M 360 300 h -20"), 20.0);
        assert_eq!(pin_length("M 400 300 v 15"), 15.0);
        assert_eq!(pin_length("M 0 0 L 0 30"), 30.0);
    }

    #[test]
    fn arc_path_with_commas() {
        let arc = parse_arc_path("M 0,0 A 5,5 0 0 1 10,0").unwrap();
        assert_eq!(arc.start, DVec2::ZERO);
        assert_eq!(arc.end, DVec2::new(10.0, 0.0));
        assert!(arc.sweep && !arc.large_arc);
    }

    #[test]
    fn pad_number_cleanup() {
        assert_eq!(clean_pad_number("X(12)"), "12");
        assert_eq!(clean_pad_number("A1"), "A1");
    }

    #[test]
    fn item_names_are_path_safe() {
        assert_eq!(library_item_name("SOT-23 3/L"), "SOT-23_3_L");
        assert_eq!(library_item_name("CONN_1/4\"_JACK"), "CONN_1_4__JACK");
        assert_eq!(library_item_name("SW(A:B)\\X"), "SW_A_B__X");
    }
}
