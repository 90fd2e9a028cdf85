// src/kicad_models.rs

use crate::config::KicadVersion;
use crate::geometry::{fmt_num, DrillSpec};
use bytes::Bytes;
use glam::{DVec2, DVec3};
use std::fmt::Write;

// --- 3D Model Structs ---

/// Represents a 3D model in KiCad format.
///
/// Carries the VRML/STEP payloads (when downloaded) and the placement used by
/// the footprint's `(model ...)` clause.
#[derive(Debug, Clone)]
pub struct Ki3dModel {
    pub name: String,
    pub wrl_data: Option<String>,
    pub step_data: Option<Bytes>,
    // KiCad placement info
    pub offset: DVec3,
    pub scale: DVec3,
    pub rotate: DVec3,
}

// --- Footprint Structs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpShape {
    Circle,
    Rect,
    Oval,
    Custom,
}

impl FpShape {
    pub fn from_easyeda(shape: &str) -> Self {
        match shape {
            "ELLIPSE" => FpShape::Circle,
            "RECT" => FpShape::Rect,
            "OVAL" => FpShape::Oval,
            _ => FpShape::Custom,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            FpShape::Circle => "circle",
            FpShape::Rect => "rect",
            FpShape::Oval => "oval",
            FpShape::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FpPad {
    pub number: String,
    pub pad_type: String, // "smd" or "thru_hole"
    pub shape: FpShape,
    pub pos: DVec2,
    pub size: DVec2,
    pub layers: String,
    pub rotation: f64, // in degrees
    pub drill: DrillSpec,
    /// Custom pad outline, relative to `pos`.
    pub polygon: Option<Vec<DVec2>>,
}

#[derive(Debug, Clone)]
pub struct FpLine {
    pub start: DVec2,
    pub end: DVec2,
    pub layer: String,
    pub width: f64,
}

#[derive(Debug, Clone)]
pub struct FpHole {
    pub pos: DVec2,
    pub size: f64,
}

#[derive(Debug, Clone)]
pub struct FpVia {
    pub pos: DVec2,
    pub diameter: f64,
    pub drill: f64,
}

#[derive(Debug, Clone)]
pub struct FpCircle {
    pub center: DVec2,
    pub end: DVec2,
    pub layer: String,
    pub width: f64,
}

/// Legacy arc: `start` is the center, `end` a point on the arc.
#[derive(Debug, Clone)]
pub struct FpArc {
    pub start: DVec2,
    pub end: DVec2,
    pub angle: f64,
    pub layer: String,
    pub width: f64,
}

#[derive(Debug, Clone)]
pub struct FpText {
    pub text: String,
    pub pos: DVec2,
    pub rotation: f64,
    pub layer: String,
    pub font_size: f64,
    pub thickness: f64,
    pub hidden: bool,
    pub mirror: bool,
}

#[derive(Debug, Clone)]
pub struct KiFootprint {
    pub name: String,
    pub lib_name: String,
    pub is_smd: bool,
    pub pads: Vec<FpPad>,
    pub lines: Vec<FpLine>,
    pub holes: Vec<FpHole>,
    pub vias: Vec<FpVia>,
    pub circles: Vec<FpCircle>,
    pub arcs: Vec<FpArc>,
    pub texts: Vec<FpText>,
    pub model_3d: Option<Ki3dModel>,
    /// `<dir>/<lib>` prefix of the `.3dshapes` directory as seen from KiCad.
    pub model_path_prefix: String,
}

// --- Symbol Structs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KiPinType {
    Input,
    Output,
    Bidirectional,
    PowerIn,
    Passive,
    Unspecified,
}

impl KiPinType {
    fn v6(self) -> &'static str {
        match self {
            KiPinType::Input => "input",
            KiPinType::Output => "output",
            KiPinType::Bidirectional => "bidirectional",
            KiPinType::PowerIn => "power_in",
            KiPinType::Passive => "passive",
            KiPinType::Unspecified => "unspecified",
        }
    }

    fn v5(self) -> &'static str {
        match self {
            KiPinType::Input => "I",
            KiPinType::Output => "O",
            KiPinType::Bidirectional => "B",
            KiPinType::PowerIn => "W",
            KiPinType::Passive => "P",
            KiPinType::Unspecified => "U",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KiPinStyle {
    Line,
    Inverted,
    Clock,
    InvertedClock,
}

impl KiPinStyle {
    fn v6(self) -> &'static str {
        match self {
            KiPinStyle::Line => "line",
            KiPinStyle::Inverted => "inverted",
            KiPinStyle::Clock => "clock",
            KiPinStyle::InvertedClock => "inverted_clock",
        }
    }

    fn v5(self) -> &'static str {
        match self {
            KiPinStyle::Line => "",
            KiPinStyle::Inverted => " I",
            KiPinStyle::Clock => " C",
            KiPinStyle::InvertedClock => " CI",
        }
    }
}

#[derive(Debug, Clone)]
pub struct KiSymbolPin {
    pub name: String,
    pub number: String,
    pub pin_type: KiPinType,
    pub style: KiPinStyle,
    pub length: f64,
    pub pos: DVec2,
    pub rotation: i32,
}

#[derive(Debug, Clone)]
pub struct KiSymbolRect {
    pub start: DVec2,
    pub end: DVec2,
    pub stroke_width: f64,
    pub fill: bool,
}

#[derive(Debug, Clone)]
pub struct KiSymbolCircle {
    pub center: DVec2,
    pub radius: f64,
    pub stroke_width: f64,
    pub fill: bool,
}

#[derive(Debug, Clone)]
pub struct KiSymbolArc {
    pub start: DVec2,
    pub mid: DVec2,
    pub end: DVec2,
    pub center: DVec2,
    pub radius: f64,
    pub stroke_width: f64,
    pub fill: bool,
}

#[derive(Debug, Clone)]
pub struct KiSymbolPolyline {
    pub points: Vec<DVec2>,
    pub stroke_width: f64,
    pub fill: bool,
}

/// Schematic symbol in millimeters, KiCad axis orientation (y up).
#[derive(Debug, Clone)]
pub struct KiSymbol {
    pub name: String,
    pub reference: String,
    pub value: String,
    pub footprint: String,
    pub datasheet: String,
    pub manufacturer: Option<String>,
    pub lcsc_part: Option<String>,
    pub jlc_part_class: Option<String>,
    pub pins: Vec<KiSymbolPin>,
    pub rectangles: Vec<KiSymbolRect>,
    pub circles: Vec<KiSymbolCircle>,
    pub arcs: Vec<KiSymbolArc>,
    pub polylines: Vec<KiSymbolPolyline>,
}

const FONT: &str = "(effects (font (size 1.27 1.27) ) )";
const FONT_HIDDEN: &str = "(effects (font (size 1.27 1.27) ) hide)";

/// Escapes `\` and `"` the way KiCad reads quoted S-expression strings.
pub fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn quote(s: &str) -> String {
    format!("\"{}\"", escape_quoted(s))
}

fn mm_to_mil(mm: f64) -> String {
    fmt_num((mm / 0.0254).round())
}

fn stroke(width: f64) -> String {
    format!("(stroke (width {}) (type default) (color 0 0 0 0))", fmt_num(width))
}

fn fill(filled: bool) -> &'static str {
    if filled {
        "(fill (type background))"
    } else {
        "(fill (type none))"
    }
}

impl KiSymbol {
    /// Vertical extent of the drawn graphics, used to park the
    /// reference/value fields above and below the body.
    fn y_extent(&self) -> (f64, f64) {
        let ys = self
            .pins
            .iter()
            .map(|p| p.pos.y)
            .chain(self.rectangles.iter().flat_map(|r| [r.start.y, r.end.y]))
            .chain(
                self.circles
                    .iter()
                    .flat_map(|c| [c.center.y - c.radius, c.center.y + c.radius]),
            )
            .chain(self.polylines.iter().flat_map(|p| p.points.iter().map(|pt| pt.y)));
        ys.fold(None, |acc: Option<(f64, f64)>, y| match acc {
            None => Some((y, y)),
            Some((lo, hi)) => Some((lo.min(y), hi.max(y))),
        })
        .unwrap_or((0.0, 0.0))
    }

    fn properties(&self) -> Vec<(&'static str, String, bool)> {
        let mut props = vec![
            ("Reference", self.reference.clone(), false),
            ("Value", self.value.clone(), false),
            ("Footprint", self.footprint.clone(), true),
            ("Datasheet", self.datasheet.clone(), true),
        ];
        if let Some(m) = &self.manufacturer {
            props.push(("Manufacturer", m.clone(), true));
        }
        if let Some(lcsc) = &self.lcsc_part {
            props.push(("LCSC Part", lcsc.clone(), true));
        }
        if let Some(class) = &self.jlc_part_class {
            props.push(("JLC Part Class", class.clone(), true));
        }
        props
    }

    pub fn to_kicad_lib_entry(&self, version: KicadVersion) -> String {
        match version {
            KicadVersion::V5 => self.to_v5(),
            KicadVersion::V6 => self.to_v6(),
        }
    }

    fn to_v6(&self) -> String {
        let mut out = String::new();
        let (y_low, y_high) = self.y_extent();

        let _ = writeln!(out, "  (symbol {}", quote(&self.name));
        let _ = writeln!(out, "    (in_bom yes)");
        let _ = writeln!(out, "    (on_board yes)");

        // --- Properties ---
        for (id, (key, value, hidden)) in self.properties().into_iter().enumerate() {
            let y = match key {
                "Reference" => y_high + 2.54,
                "Value" => y_low - 2.54,
                _ => 0.0,
            };
            let _ = writeln!(out, "    (property");
            let _ = writeln!(out, "      {}", quote(key));
            let _ = writeln!(out, "      {}", quote(&value));
            let _ = writeln!(out, "      (id {})", id);
            let _ = writeln!(out, "      (at 0 {} 0)", fmt_num(y));
            let _ = writeln!(out, "      {}", if hidden { FONT_HIDDEN } else { FONT });
            let _ = writeln!(out, "    )");
        }

        // --- Symbol Graphics ---
        let _ = writeln!(out, "    (symbol {}", quote(&format!("{}_0_1", self.name)));

        for rect in &self.rectangles {
            let _ = writeln!(out, "      (rectangle");
            let _ = writeln!(out, "        (start {} {})", fmt_num(rect.start.x), fmt_num(rect.start.y));
            let _ = writeln!(out, "        (end {} {})", fmt_num(rect.end.x), fmt_num(rect.end.y));
            let _ = writeln!(out, "        {}", stroke(rect.stroke_width));
            let _ = writeln!(out, "        {}", fill(rect.fill));
            let _ = writeln!(out, "      )");
        }

        for circle in &self.circles {
            let _ = writeln!(out, "      (circle");
            let _ = writeln!(out, "        (center {} {})", fmt_num(circle.center.x), fmt_num(circle.center.y));
            let _ = writeln!(out, "        (radius {})", fmt_num(circle.radius));
            let _ = writeln!(out, "        {}", stroke(circle.stroke_width));
            let _ = writeln!(out, "        {}", fill(circle.fill));
            let _ = writeln!(out, "      )");
        }

        for arc in &self.arcs {
            let _ = writeln!(out, "      (arc");
            let _ = writeln!(out, "        (start {} {})", fmt_num(arc.start.x), fmt_num(arc.start.y));
            let _ = writeln!(out, "        (mid {} {})", fmt_num(arc.mid.x), fmt_num(arc.mid.y));
            let _ = writeln!(out, "        (end {} {})", fmt_num(arc.end.x), fmt_num(arc.end.y));
            let _ = writeln!(out, "        {}", stroke(arc.stroke_width));
            let _ = writeln!(out, "        {}", fill(arc.fill));
            let _ = writeln!(out, "      )");
        }

        for poly in &self.polylines {
            let pts = poly
                .points
                .iter()
                .map(|p| format!("(xy {} {})", fmt_num(p.x), fmt_num(p.y)))
                .collect::<Vec<_>>()
                .join(" ");
            let _ = writeln!(out, "      (polyline");
            let _ = writeln!(out, "        (pts");
            let _ = writeln!(out, "          {}", pts);
            let _ = writeln!(out, "        )");
            let _ = writeln!(out, "        {}", stroke(poly.stroke_width));
            let _ = writeln!(out, "        {}", fill(poly.fill));
            let _ = writeln!(out, "      )");
        }

        for pin in &self.pins {
            let pin_name = if pin.name.is_empty() {
                "\"~\"".to_string()
            } else if let Some(stripped) = pin.name.strip_prefix('~') {
                quote(&format!("~{{{}}}", stripped))
            } else {
                quote(&pin.name)
            };
            let _ = writeln!(out, "      (pin {} {}", pin.pin_type.v6(), pin.style.v6());
            let _ = writeln!(
                out,
                "        (at {} {} {})",
                fmt_num(pin.pos.x),
                fmt_num(pin.pos.y),
                pin.rotation
            );
            let _ = writeln!(out, "        (length {})", fmt_num(pin.length));
            let _ = writeln!(out, "        (name {} (effects (font (size 1.27 1.27))))", pin_name);
            let _ = writeln!(
                out,
                "        (number {} (effects (font (size 1.27 1.27))))",
                quote(&pin.number)
            );
            let _ = writeln!(out, "      )");
        }

        // Close "{name}_0_1" and the main symbol
        let _ = writeln!(out, "    )");
        let _ = write!(out, "  )");
        out
    }

    fn to_v5(&self) -> String {
        let mut out = String::new();
        let (y_low, y_high) = self.y_extent();
        let v5_name = self.name.replace(' ', "_");
        let field = |s: &str| if s.is_empty() { "~".to_string() } else { quote(s) };

        let _ = writeln!(out, "#\n# {}\n#", v5_name);
        let _ = writeln!(out, "DEF {} {} 0 40 Y Y 1 F N", v5_name, self.reference);
        let _ = writeln!(
            out,
            "F0 {} 0 {} 50 H V C CNN",
            quote(&self.reference),
            mm_to_mil(y_high + 2.54)
        );
        let _ = writeln!(out, "F1 {} 0 {} 50 H V C CNN", quote(&self.value), mm_to_mil(y_low - 2.54));
        let _ = writeln!(out, "F2 {} 0 0 50 H I C CNN", field(&self.footprint));
        let _ = writeln!(out, "F3 {} 0 0 50 H I C CNN", field(&self.datasheet));
        for (idx, (key, value, _)) in self.properties().into_iter().skip(4).enumerate() {
            let _ = writeln!(out, "F{} {} 0 0 50 H I C CNN {}", idx + 4, quote(&value), quote(key));
        }
        let _ = writeln!(out, "DRAW");

        let fill_flag = |f: bool| if f { "f" } else { "N" };
        for rect in &self.rectangles {
            let _ = writeln!(
                out,
                "S {} {} {} {} 0 1 {} {}",
                mm_to_mil(rect.start.x),
                mm_to_mil(rect.start.y),
                mm_to_mil(rect.end.x),
                mm_to_mil(rect.end.y),
                mm_to_mil(rect.stroke_width),
                fill_flag(rect.fill)
            );
        }
        for circle in &self.circles {
            let _ = writeln!(
                out,
                "C {} {} {} 0 1 {} {}",
                mm_to_mil(circle.center.x),
                mm_to_mil(circle.center.y),
                mm_to_mil(circle.radius),
                mm_to_mil(circle.stroke_width),
                fill_flag(circle.fill)
            );
        }
        for arc in &self.arcs {
            let angle = |p: DVec2| {
                let d = p - arc.center;
                (d.y.atan2(d.x).to_degrees() * 10.0).round()
            };
            let _ = writeln!(
                out,
                "A {} {} {} {} {} 0 1 {} {} {} {} {} {}",
                mm_to_mil(arc.center.x),
                mm_to_mil(arc.center.y),
                mm_to_mil(arc.radius),
                fmt_num(angle(arc.start)),
                fmt_num(angle(arc.end)),
                mm_to_mil(arc.stroke_width),
                fill_flag(arc.fill),
                mm_to_mil(arc.start.x),
                mm_to_mil(arc.start.y),
                mm_to_mil(arc.end.x),
                mm_to_mil(arc.end.y)
            );
        }
        for poly in &self.polylines {
            let pts = poly
                .points
                .iter()
                .map(|p| format!("{} {}", mm_to_mil(p.x), mm_to_mil(p.y)))
                .collect::<Vec<_>>()
                .join(" ");
            let _ = writeln!(
                out,
                "P {} 0 1 {} {} {}",
                poly.points.len(),
                mm_to_mil(poly.stroke_width),
                pts,
                fill_flag(poly.fill)
            );
        }
        for pin in &self.pins {
            let orientation = match pin.rotation {
                90 => "U",
                180 => "L",
                270 => "D",
                _ => "R",
            };
            let name = if pin.name.is_empty() {
                "~".to_string()
            } else {
                pin.name.replace(' ', "_")
            };
            let _ = writeln!(
                out,
                "X {} {} {} {} {} {} 50 50 1 1 {}{}",
                name,
                pin.number.replace(' ', "_"),
                mm_to_mil(pin.pos.x),
                mm_to_mil(pin.pos.y),
                mm_to_mil(pin.length),
                orientation,
                pin.pin_type.v5(),
                pin.style.v5()
            );
        }

        let _ = writeln!(out, "ENDDRAW");
        let _ = writeln!(out, "ENDDEF");
        out
    }
}

impl KiFootprint {
    /// Generates the full S-expression string for a .kicad_mod file.
    pub fn to_kicad_mod_entry(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "(module {} (layer F.Cu) (tedit 5DC5F6A4)",
            quote(&format!("{}:{}", self.lib_name, self.name))
        );
        let _ = writeln!(
            out,
            "\t(attr {})",
            if self.is_smd { "smd" } else { "through_hole" }
        );

        let y_low = self.pads.iter().map(|p| p.pos.y).fold(f64::INFINITY, f64::min);
        let y_high = self.pads.iter().map(|p| p.pos.y).fold(f64::NEG_INFINITY, f64::max);
        let (y_low, y_high) = if self.pads.is_empty() { (0.0, 0.0) } else { (y_low, y_high) };

        let _ = writeln!(
            out,
            "\t(fp_text reference REF** (at 0 {}) (layer F.SilkS)\n\t\t(effects (font (size 1 1) (thickness 0.15)))\n\t)",
            fmt_num(y_low - 4.0)
        );
        let _ = writeln!(
            out,
            "\t(fp_text value {} (at 0 {}) (layer F.Fab)\n\t\t(effects (font (size 1 1) (thickness 0.15)))\n\t)",
            quote(&self.name),
            fmt_num(y_high + 4.0)
        );
        let _ = writeln!(
            out,
            "\t(fp_text user %R (at 0 0) (layer F.Fab)\n\t\t(effects (font (size 1 1) (thickness 0.15)))\n\t)"
        );

        for line in &self.lines {
            let _ = writeln!(
                out,
                "\t(fp_line (start {} {}) (end {} {}) (layer {}) (width {}))",
                fmt_num(line.start.x),
                fmt_num(line.start.y),
                fmt_num(line.end.x),
                fmt_num(line.end.y),
                line.layer,
                fmt_num(line.width)
            );
        }

        for pad in &self.pads {
            let polygon = match &pad.polygon {
                Some(points) => {
                    let path = points
                        .iter()
                        .map(|p| format!("(xy {} {})", fmt_num(p.x), fmt_num(p.y)))
                        .collect::<String>();
                    format!(
                        "\n\t\t(primitives \n\t\t\t(gr_poly \n\t\t\t\t(pts {}\n\t\t\t\t) \n\t\t\t\t(width 0.1) \n\t\t\t)\n\t\t)\n\t",
                        path
                    )
                }
                None => String::new(),
            };
            let _ = writeln!(
                out,
                "\t(pad {} {} {} (at {} {} {}) (size {} {}) (layers {}){}{})",
                quote(&pad.number),
                pad.pad_type,
                pad.shape.as_str(),
                fmt_num(pad.pos.x),
                fmt_num(pad.pos.y),
                fmt_num(pad.rotation),
                fmt_num(pad.size.x),
                fmt_num(pad.size.y),
                pad.layers,
                pad.drill.to_kicad(),
                polygon
            );
        }

        for hole in &self.holes {
            let size = fmt_num(hole.size);
            let _ = writeln!(
                out,
                "\t(pad \"\" np_thru_hole circle (at {} {}) (size {} {}) (drill {}) (layers *.Cu *.Mask))",
                fmt_num(hole.pos.x),
                fmt_num(hole.pos.y),
                size,
                size,
                size
            );
        }

        for via in &self.vias {
            let _ = writeln!(
                out,
                "\t(pad \"\" thru_hole circle (at {} {}) (size {} {}) (drill {}) (layers *.Cu *.Paste *.Mask))",
                fmt_num(via.pos.x),
                fmt_num(via.pos.y),
                fmt_num(via.diameter),
                fmt_num(via.diameter),
                fmt_num(via.drill)
            );
        }

        for circle in &self.circles {
            let _ = writeln!(
                out,
                "\t(fp_circle (center {} {}) (end {} {}) (layer {}) (width {}))",
                fmt_num(circle.center.x),
                fmt_num(circle.center.y),
                fmt_num(circle.end.x),
                fmt_num(circle.end.y),
                circle.layer,
                fmt_num(circle.width)
            );
        }

        for arc in &self.arcs {
            let _ = writeln!(
                out,
                "\t(fp_arc (start {} {}) (end {} {}) (angle {}) (layer {}) (width {}))",
                fmt_num(arc.start.x),
                fmt_num(arc.start.y),
                fmt_num(arc.end.x),
                fmt_num(arc.end.y),
                fmt_num(arc.angle),
                arc.layer,
                fmt_num(arc.width)
            );
        }

        for text in &self.texts {
            let _ = writeln!(
                out,
                "\t(fp_text user {} (at {} {} {}) (layer {}){}\n\t\t(effects (font (size {} {}) (thickness {})) (justify left{}))\n\t)",
                quote(&text.text),
                fmt_num(text.pos.x),
                fmt_num(text.pos.y),
                fmt_num(text.rotation),
                text.layer,
                if text.hidden { " hide" } else { "" },
                fmt_num(text.font_size),
                fmt_num(text.font_size),
                fmt_num(text.thickness),
                if text.mirror { " mirror" } else { "" }
            );
        }

        // Add 3D model path
        if let Some(model) = &self.model_3d {
            let _ = writeln!(
                out,
                "\t(model \"{}.3dshapes/{}.wrl\"\n\t\t(offset (xyz {} {} {}))\n\t\t(scale (xyz {} {} {}))\n\t\t(rotate (xyz {} {} {}))\n\t)",
                self.model_path_prefix,
                model.name,
                fmt_num(model.offset.x),
                fmt_num(model.offset.y),
                fmt_num(model.offset.z),
                fmt_num(model.scale.x),
                fmt_num(model.scale.y),
                fmt_num(model.scale.z),
                fmt_num(model.rotate.x),
                fmt_num(model.rotate.y),
                fmt_num(model.rotate.z)
            );
        }

        let _ = write!(out, ")");
        out
    }
}
