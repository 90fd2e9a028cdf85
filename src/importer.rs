// src/importer.rs

use crate::easyeda_models::*;
use crate::error::{Error, Result};
use crate::geometry::RawNumber;
use glam::{DVec2, DVec3};
use serde::Deserialize;
use serde_json::Value;

/// One `~` delimited shape record, tag stripped.
struct Record<'a> {
    tag: &'a str,
    fields: Vec<&'a str>,
}

impl<'a> Record<'a> {
    fn parse(line: &'a str) -> Self {
        let mut parts = line.split('~');
        let tag = parts.next().unwrap_or("");
        Record {
            tag,
            fields: parts.collect(),
        }
    }

    /// Rejects records shorter than the fields we actually read.
    fn require(&self, arity: usize) -> Result<()> {
        if self.fields.len() < arity {
            return Err(Error::Decode(format!(
                "{} record has {} fields, expected at least {}",
                self.tag,
                self.fields.len(),
                arity
            )));
        }
        Ok(())
    }

    fn str(&self, idx: usize) -> &'a str {
        self.fields.get(idx).copied().unwrap_or("")
    }

    fn num(&self, idx: usize) -> f64 {
        self.str(idx).raw_f64().filter(|v| v.is_finite()).unwrap_or(0.0)
    }

    fn int(&self, idx: usize) -> i32 {
        self.num(idx) as i32
    }

    fn point(&self, x: usize, y: usize) -> DVec2 {
        DVec2::new(self.num(x), self.num(y))
    }

    fn fill(&self, idx: usize) -> bool {
        is_filled(self.str(idx))
    }
}

fn is_filled(color: &str) -> bool {
    let color = color.trim();
    !color.is_empty() && !color.eq_ignore_ascii_case("none")
}

fn is_shown(flag: &str) -> bool {
    matches!(flag.trim(), "1" | "show" | "Y" | "true")
}

/// Parses a whitespace and/or comma separated coordinate list into points.
pub fn parse_points(raw: &str) -> Vec<DVec2> {
    let values: Vec<f64> = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f64>().ok())
        .collect();
    values
        .chunks_exact(2)
        .map(|pair| DVec2::new(pair[0], pair[1]))
        .collect()
}

fn value_f64(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.as_str().raw_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn opt_string(v: &Value) -> Option<String> {
    v.as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn shape_lines(data_str: &Value) -> impl Iterator<Item = &str> {
    data_str["shape"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

// --- Symbol records ---

enum SymbolRecord {
    Pin(EeSymbolPin),
    Rectangle(EeSymbolRectangle),
    Ellipse(EeSymbolEllipse),
    Circle(EeSymbolCircle),
    Arc(EeSymbolArc),
    Polyline(EeSymbolPolyline),
    Polygon(EeSymbolPolyline),
    Path(EeSymbolPath),
    Text,
}

impl SymbolRecord {
    /// `Ok(None)` for tags this decoder does not know.
    fn parse(line: &str) -> Result<Option<Self>> {
        let record = Record::parse(line);
        let parsed = match record.tag {
            "P" => SymbolRecord::Pin(parse_pin(line)?),
            "R" => {
                // R~x~y~rx~ry~width~height~stroke_color~stroke_width~stroke_style~fill_color~id~locked
                record.require(6)?;
                SymbolRecord::Rectangle(EeSymbolRectangle {
                    pos: record.point(0, 1),
                    width: record.num(4),
                    height: record.num(5),
                    stroke_width: record.num(7),
                    fill: record.fill(9),
                })
            }
            "E" => {
                // E~cx~cy~rx~ry~stroke_color~stroke_width~stroke_style~fill_color~id~locked
                record.require(4)?;
                SymbolRecord::Ellipse(EeSymbolEllipse {
                    center: record.point(0, 1),
                    radius_x: record.num(2),
                    radius_y: record.num(3),
                    stroke_width: record.num(5),
                    fill: record.fill(7),
                })
            }
            "C" => {
                // C~cx~cy~r~stroke_color~stroke_width~stroke_style~fill_color~id~locked
                record.require(3)?;
                SymbolRecord::Circle(EeSymbolCircle {
                    center: record.point(0, 1),
                    radius: record.num(2),
                    stroke_width: record.num(4),
                    fill: record.fill(6),
                })
            }
            "A" => {
                // A~path~helper_dots~stroke_color~stroke_width~stroke_style~fill_color~id~locked
                record.require(1)?;
                SymbolRecord::Arc(EeSymbolArc {
                    path: record.str(0).to_string(),
                    stroke_width: record.num(3),
                    fill: record.fill(5),
                })
            }
            "PL" | "PG" => {
                // PL~points~stroke_color~stroke_width~stroke_style~fill_color~id~locked
                record.require(1)?;
                let poly = EeSymbolPolyline {
                    points: parse_points(record.str(0)),
                    stroke_width: record.num(2),
                    fill: record.fill(4),
                };
                if record.tag == "PL" {
                    SymbolRecord::Polyline(poly)
                } else {
                    SymbolRecord::Polygon(poly)
                }
            }
            "PT" => {
                // PT~path~stroke_color~stroke_width~stroke_style~fill_color~id~locked
                record.require(1)?;
                SymbolRecord::Path(EeSymbolPath {
                    path: record.str(0).to_string(),
                    stroke_width: record.num(2),
                    fill: record.fill(4),
                })
            }
            "T" => SymbolRecord::Text,
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }
}

/// Pins are `^^` separated segments: settings, dot, path, name, number, dot-bis, clock.
fn parse_pin(line: &str) -> Result<EeSymbolPin> {
    let segments: Vec<Record> = line.split("^^").map(Record::parse).collect();
    if segments.len() < 4 {
        return Err(Error::Decode(format!(
            "pin record has {} segments, expected at least 4",
            segments.len()
        )));
    }

    // P~show~electric~spice_number~x~y~rotation~id~locked
    let settings = &segments[0];
    settings.require(5)?;

    // Segments after the first carry no tag, so the "tag" slot is field 0.
    let whole = |r: &Record<'_>, idx: usize| -> String {
        if idx == 0 {
            r.tag.to_string()
        } else {
            r.str(idx - 1).to_string()
        }
    };
    let whole_num = |r: &Record<'_>, idx: usize| -> f64 {
        whole(r, idx).as_str().raw_f64().unwrap_or(0.0)
    };

    let dot = DVec2::new(whole_num(&segments[1], 0), whole_num(&segments[1], 1));
    let path = whole(&segments[2], 0);
    let name_seg = &segments[3];
    let name = EeSymbolPinName {
        is_displayed: is_shown(&whole(name_seg, 0)),
        pos: DVec2::new(whole_num(name_seg, 1), whole_num(name_seg, 2)),
        rotation: whole_num(name_seg, 3),
        text: whole(name_seg, 4),
        font_size: whole(name_seg, 7)
            .trim_end_matches("pt")
            .parse::<f64>()
            .ok(),
    };
    let dot_bis = segments
        .get(5)
        .map(|s| is_shown(&whole(s, 0)))
        .unwrap_or(false);
    let clock = segments
        .get(6)
        .map(|s| is_shown(&whole(s, 0)))
        .unwrap_or(false);

    Ok(EeSymbolPin {
        settings: EeSymbolPinSettings {
            is_displayed: is_shown(settings.str(0)),
            pin_type: EePinType::from_code(settings.str(1)),
            spice_pin_number: settings.str(2).to_string(),
            pos: settings.point(3, 4),
            rotation: settings.num(5),
            id: settings.str(6).to_string(),
        },
        dot,
        path,
        name,
        dot_bis,
        clock,
    })
}

/// Parses the symbol part of the component payload.
///
/// Returns `Ok(None)` when the payload carries no symbol shapes or no symbol name.
pub fn import_symbol(data: &Value) -> Result<Option<EeSymbol>> {
    let data_str = &data["dataStr"];
    let head = &data_str["head"];
    if head.is_null() {
        return Err(Error::Decode("dataStr.head is missing".to_string()));
    }
    if !data_str["shape"].is_array() {
        return Ok(None);
    }
    let c_para = &head["c_para"];
    let Some(name) = opt_string(&c_para["name"]) else {
        log::warn!("Symbol has no name in dataStr.head.c_para; skipping symbol");
        return Ok(None);
    };

    let info = EeSymbolInfo {
        name,
        prefix: c_para["pre"]
            .as_str()
            .unwrap_or("U")
            .replace('?', ""),
        package: opt_string(&c_para["package"]),
        manufacturer: opt_string(&c_para["BOM_Manufacturer"]),
        datasheet: opt_string(&data["lcsc"]["url"]),
        lcsc_id: opt_string(&data["lcsc"]["number"]),
        jlc_part_class: opt_string(&c_para["BOM_JLCPCB Part Class"]),
    };

    let mut symbol = EeSymbol {
        info,
        bbox: DVec2::new(value_f64(&head["x"]), value_f64(&head["y"])),
        ..Default::default()
    };

    for line in shape_lines(data_str) {
        match SymbolRecord::parse(line) {
            Ok(Some(record)) => match record {
                SymbolRecord::Pin(pin) => symbol.pins.push(pin),
                SymbolRecord::Rectangle(rect) => symbol.rectangles.push(rect),
                SymbolRecord::Ellipse(ellipse) => symbol.ellipses.push(ellipse),
                SymbolRecord::Circle(circle) => symbol.circles.push(circle),
                SymbolRecord::Arc(arc) => symbol.arcs.push(arc),
                SymbolRecord::Polyline(poly) => symbol.polylines.push(poly),
                SymbolRecord::Polygon(poly) => symbol.polygons.push(poly),
                SymbolRecord::Path(path) => symbol.paths.push(path),
                SymbolRecord::Text => log::debug!("Skipping symbol text element"),
            },
            Ok(None) => {
                log::warn!(
                    "Unknown symbol designator: {}",
                    line.split('~').next().unwrap_or("")
                );
            }
            Err(e) => log::warn!("Dropping malformed symbol record: {}", e),
        }
    }

    Ok(Some(symbol))
}

// --- Footprint records ---

enum FootprintRecord {
    Pad(EeFootprintPad),
    Track(EeFootprintTrack),
    Hole(EeFootprintHole),
    Via(EeFootprintVia),
    Circle(EeFootprintCircle),
    Arc(EeFootprintArc),
    Rectangle(EeFootprintRectangle),
    Text(EeFootprintText),
    SvgNode(Option<Ee3dModel>),
    Ignored,
}

impl FootprintRecord {
    fn parse(line: &str) -> Result<Option<Self>> {
        let record = Record::parse(line);
        let parsed = match record.tag {
            "PAD" => {
                // PAD~shape~x~y~w~h~layer~net~number~hole_radius~points~rotation~id~hole_length~...
                record.require(11)?;
                let hole_length = record
                    .str(12)
                    .raw_f64()
                    .filter(|v| v.is_finite() && *v != 0.0);
                FootprintRecord::Pad(EeFootprintPad {
                    shape: record.str(0).to_string(),
                    center: record.point(1, 2),
                    width: record.num(3),
                    height: record.num(4),
                    layer_id: record.int(5),
                    number: record.str(7).to_string(),
                    hole_radius: record.num(8),
                    points: record.str(9).to_string(),
                    rotation: record.num(10),
                    hole_length,
                })
            }
            "TRACK" => {
                // TRACK~stroke_width~layer~net~points~id~locked
                record.require(4)?;
                FootprintRecord::Track(EeFootprintTrack {
                    stroke_width: record.num(0),
                    layer_id: record.int(1),
                    points: record.str(3).to_string(),
                })
            }
            "HOLE" => {
                // HOLE~x~y~radius~id~locked
                record.require(3)?;
                FootprintRecord::Hole(EeFootprintHole {
                    center: record.point(0, 1),
                    radius: record.num(2),
                })
            }
            "VIA" => {
                // VIA~x~y~diameter~net~radius~id~locked
                record.require(5)?;
                FootprintRecord::Via(EeFootprintVia {
                    center: record.point(0, 1),
                    diameter: record.num(2),
                    radius: record.num(4),
                })
            }
            "CIRCLE" => {
                // CIRCLE~cx~cy~radius~stroke_width~layer~id~locked
                record.require(5)?;
                FootprintRecord::Circle(EeFootprintCircle {
                    center: record.point(0, 1),
                    radius: record.num(2),
                    stroke_width: record.num(3),
                    layer_id: record.int(4),
                })
            }
            "ARC" => {
                // ARC~stroke_width~layer~net~path~helper_dots~id~locked
                record.require(4)?;
                FootprintRecord::Arc(EeFootprintArc {
                    stroke_width: record.num(0),
                    layer_id: record.int(1),
                    path: record.str(3).to_string(),
                })
            }
            "RECT" => {
                // RECT~x~y~width~height~stroke_width~id~layer~locked
                record.require(7)?;
                FootprintRecord::Rectangle(EeFootprintRectangle {
                    pos: record.point(0, 1),
                    width: record.num(2),
                    height: record.num(3),
                    stroke_width: record.num(4),
                    layer_id: record.int(6),
                })
            }
            "TEXT" => {
                // TEXT~type~x~y~stroke_width~rotation~mirror~layer~net~font_size~text~text_path~display~id~locked
                record.require(10)?;
                FootprintRecord::Text(EeFootprintText {
                    text_type: record.str(0).to_string(),
                    center: record.point(1, 2),
                    stroke_width: record.num(3),
                    rotation: record.num(4),
                    layer_id: record.int(6),
                    font_size: record.num(8),
                    text: record.str(9).to_string(),
                    is_displayed: record.str(11).trim() != "none",
                })
            }
            "SVGNODE" => FootprintRecord::SvgNode(parse_svg_node(line)?),
            "SOLIDREGION" => FootprintRecord::Ignored,
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }
}

/// Parses the footprint part of the component payload.
pub fn import_footprint(data: &Value) -> Result<Option<EeFootprint>> {
    let package = &data["packageDetail"];
    let data_str = &package["dataStr"];
    if !data_str.is_object() || !data_str["shape"].is_array() {
        return Ok(None);
    }

    let title = package["title"].as_str().unwrap_or("");
    let c_para = &data_str["head"]["c_para"];
    let name = opt_string(&c_para["package"])
        .or_else(|| opt_string(&package["title"]))
        .unwrap_or_default();
    let smt = match &data["SMT"] {
        Value::Bool(b) => *b,
        Value::Null => false,
        other => value_f64(other) != 0.0 || other.as_str().is_some_and(|s| s == "true"),
    };

    let mut footprint = EeFootprint {
        info: EeFootprintInfo {
            name,
            is_smd: smt && !title.contains("-TH_"),
            model_3d_name: opt_string(&c_para["3DModel"]),
        },
        bbox: DVec2::new(
            value_f64(&data_str["head"]["x"]),
            value_f64(&data_str["head"]["y"]),
        ),
        ..Default::default()
    };

    for line in shape_lines(data_str) {
        match FootprintRecord::parse(line) {
            Ok(Some(record)) => match record {
                FootprintRecord::Pad(pad) => footprint.pads.push(pad),
                FootprintRecord::Track(track) => footprint.tracks.push(track),
                FootprintRecord::Hole(hole) => footprint.holes.push(hole),
                FootprintRecord::Via(via) => footprint.vias.push(via),
                FootprintRecord::Circle(circle) => footprint.circles.push(circle),
                FootprintRecord::Arc(arc) => footprint.arcs.push(arc),
                FootprintRecord::Rectangle(rect) => footprint.rectangles.push(rect),
                FootprintRecord::Text(text) => footprint.texts.push(text),
                FootprintRecord::SvgNode(model) => {
                    if footprint.model_3d.is_none() {
                        footprint.model_3d = model;
                    }
                }
                FootprintRecord::Ignored => {}
            },
            Ok(None) => log::warn!(
                "Unknown footprint designator: {}",
                line.split('~').next().unwrap_or("")
            ),
            Err(e) => log::warn!("Dropping malformed footprint record: {}", e),
        }
    }

    Ok(Some(footprint))
}

// Helper structs for deserializing the nested JSON inside the SVGNODE string.
#[derive(Deserialize, Debug)]
struct SvgNode {
    attrs: SvgNodeAttrs,
}

#[derive(Deserialize, Debug)]
struct SvgNodeAttrs {
    uuid: Option<String>,
    title: Option<String>,
    c_etype: Option<String>,
    c_origin: Option<String>,
    z: Option<Value>,
    c_rotation: Option<String>,
}

fn parse_triplet(raw: &str) -> DVec3 {
    let mut v = raw.split(',').map(|s| s.raw_f64().unwrap_or(0.0));
    DVec3::new(
        v.next().unwrap_or(0.0),
        v.next().unwrap_or(0.0),
        v.next().unwrap_or(0.0),
    )
}

/// Decodes the 3D model reference embedded in an `SVGNODE~{json}` record.
fn parse_svg_node(line: &str) -> Result<Option<Ee3dModel>> {
    let Some((_, json_part)) = line.split_once('~') else {
        return Ok(None);
    };
    let node: SvgNode = serde_json::from_str(json_part)
        .map_err(|e| Error::Decode(format!("SVGNODE payload is not valid JSON: {}", e)))?;
    let attrs = node.attrs;

    if attrs.c_etype.as_deref().is_some_and(|t| t != "outline3D") {
        return Ok(None);
    }
    let (Some(uuid), Some(title)) = (attrs.uuid, attrs.title) else {
        log::warn!("SVGNODE without uuid/title, ignoring 3D model");
        return Ok(None);
    };

    let origin = parse_triplet(attrs.c_origin.as_deref().unwrap_or("0,0"));
    let z = attrs.z.as_ref().map(value_f64).unwrap_or(0.0);

    Ok(Some(Ee3dModel {
        name: title,
        uuid,
        translation: DVec3::new(origin.x, origin.y, z),
        rotation: parse_triplet(attrs.c_rotation.as_deref().unwrap_or("0,0,0")),
        raw_obj: None,
        step: None,
    }))
}

/// Extracts the 3D model reference from the footprint shape data, if any.
pub fn import_3d_model_info(data: &Value) -> Result<Option<Ee3dModel>> {
    for line in shape_lines(&data["packageDetail"]["dataStr"]) {
        if line.starts_with("SVGNODE~") {
            match parse_svg_node(line) {
                Ok(Some(model)) => return Ok(Some(model)),
                Ok(None) => continue,
                Err(e) => log::warn!("{}", e),
            }
        }
    }
    Ok(None)
}

/// Decodes a whole component payload.
///
/// Only the mandatory top-level keys (`dataStr.head`, `lcsc`) are fatal;
/// absent symbol, footprint or 3D model sections decode to `None`.
pub fn import_component(lcsc_id: &str, data: &Value) -> Result<EeComponent> {
    if data["dataStr"]["head"].is_null() {
        return Err(Error::Decode(format!("{}: dataStr.head is missing", lcsc_id)));
    }
    if data["lcsc"].is_null() {
        return Err(Error::Decode(format!("{}: lcsc section is missing", lcsc_id)));
    }

    let symbol = import_symbol(data)?;
    let footprint = import_footprint(data)?;
    let model_3d = match &footprint {
        Some(fp) => fp.model_3d.clone(),
        None => import_3d_model_info(data)?,
    };

    Ok(EeComponent {
        lcsc_id: lcsc_id.to_string(),
        symbol,
        footprint,
        model_3d,
    })
}
