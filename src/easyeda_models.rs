// Decoded EasyEDA records. All lengths are in EasyEDA's native unit and all
// positions are absolute canvas coordinates; the encoders subtract the bbox.

use bytes::Bytes;
use glam::{DVec2, DVec3};

#[derive(Debug, Clone, Default)]
pub struct EeSymbolInfo {
    pub name: String,
    pub prefix: String,
    pub package: Option<String>,
    pub manufacturer: Option<String>,
    pub datasheet: Option<String>,
    pub lcsc_id: Option<String>,
    pub jlc_part_class: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EeSymbol {
    pub info: EeSymbolInfo,
    /// Bounding box origin (x, y)
    pub bbox: DVec2,
    pub pins: Vec<EeSymbolPin>,
    pub rectangles: Vec<EeSymbolRectangle>,
    pub circles: Vec<EeSymbolCircle>,
    pub arcs: Vec<EeSymbolArc>,
    pub polygons: Vec<EeSymbolPolyline>,
    pub polylines: Vec<EeSymbolPolyline>,
    pub paths: Vec<EeSymbolPath>,
    pub ellipses: Vec<EeSymbolEllipse>,
}

/// Electrical type code carried in the pin settings segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EePinType {
    #[default]
    Unspecified,
    Input,
    Output,
    Bidirectional,
    Power,
}

impl EePinType {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "1" => EePinType::Input,
            "2" => EePinType::Output,
            "3" => EePinType::Bidirectional,
            "4" => EePinType::Power,
            _ => EePinType::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EeSymbolPinSettings {
    pub is_displayed: bool,
    pub pin_type: EePinType,
    pub spice_pin_number: String,
    pub pos: DVec2,
    pub rotation: f64,
    pub id: String,
}

#[derive(Debug, Clone, Default)]
pub struct EeSymbolPinName {
    pub is_displayed: bool,
    pub pos: DVec2,
    pub rotation: f64,
    pub text: String,
    pub font_size: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct EeSymbolPin {
    pub settings: EeSymbolPinSettings,
    pub dot: DVec2,
    /// SVG path of the pin line, e.g. `M 420 310 h 10`.
    pub path: String,
    pub name: EeSymbolPinName,
    /// Inversion bubble.
    pub dot_bis: bool,
    pub clock: bool,
}

#[derive(Debug, Clone)]
pub struct EeSymbolRectangle {
    pub pos: DVec2,
    pub width: f64,
    pub height: f64,
    pub stroke_width: f64,
    pub fill: bool,
}

#[derive(Debug, Clone)]
pub struct EeSymbolCircle {
    pub center: DVec2,
    pub radius: f64,
    pub stroke_width: f64,
    pub fill: bool,
}

#[derive(Debug, Clone)]
pub struct EeSymbolEllipse {
    pub center: DVec2,
    pub radius_x: f64,
    pub radius_y: f64,
    pub stroke_width: f64,
    pub fill: bool,
}

#[derive(Debug, Clone)]
pub struct EeSymbolArc {
    pub path: String,
    pub stroke_width: f64,
    pub fill: bool,
}

/// Shared by `PL` (open) and `PG` (closed) records.
#[derive(Debug, Clone)]
pub struct EeSymbolPolyline {
    pub points: Vec<DVec2>,
    pub stroke_width: f64,
    pub fill: bool,
}

#[derive(Debug, Clone)]
pub struct EeSymbolPath {
    pub path: String,
    pub stroke_width: f64,
    pub fill: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EeFootprintInfo {
    pub name: String,
    pub is_smd: bool,
    pub model_3d_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EeFootprint {
    pub info: EeFootprintInfo,
    /// Bounding box origin (x, y)
    pub bbox: DVec2,
    pub pads: Vec<EeFootprintPad>,
    pub tracks: Vec<EeFootprintTrack>,
    pub holes: Vec<EeFootprintHole>,
    pub vias: Vec<EeFootprintVia>,
    pub circles: Vec<EeFootprintCircle>,
    pub arcs: Vec<EeFootprintArc>,
    pub rectangles: Vec<EeFootprintRectangle>,
    pub texts: Vec<EeFootprintText>,
    pub model_3d: Option<Ee3dModel>,
}

#[derive(Debug, Clone)]
pub struct EeFootprintPad {
    pub shape: String,
    pub center: DVec2,
    pub width: f64,
    pub height: f64,
    pub layer_id: i32,
    pub number: String,
    pub hole_radius: f64,
    /// Space separated polygon outline for `POLYGON` pads.
    pub points: String,
    pub rotation: f64,
    pub hole_length: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct EeFootprintTrack {
    pub stroke_width: f64,
    pub layer_id: i32,
    pub points: String,
}

#[derive(Debug, Clone)]
pub struct EeFootprintHole {
    pub center: DVec2,
    pub radius: f64,
}

#[derive(Debug, Clone)]
pub struct EeFootprintVia {
    pub center: DVec2,
    pub diameter: f64,
    pub radius: f64,
}

#[derive(Debug, Clone)]
pub struct EeFootprintCircle {
    pub center: DVec2,
    pub radius: f64,
    pub stroke_width: f64,
    pub layer_id: i32,
}

#[derive(Debug, Clone)]
pub struct EeFootprintArc {
    pub stroke_width: f64,
    pub layer_id: i32,
    /// `M sx sy A rx ry rot large sweep ex ey`
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct EeFootprintRectangle {
    pub pos: DVec2,
    pub width: f64,
    pub height: f64,
    pub stroke_width: f64,
    pub layer_id: i32,
}

#[derive(Debug, Clone)]
pub struct EeFootprintText {
    /// "P" for value, "N" for reference, anything else is user text
    pub text_type: String,
    pub center: DVec2,
    pub stroke_width: f64,
    pub rotation: f64,
    pub layer_id: i32,
    pub font_size: f64,
    pub text: String,
    pub is_displayed: bool,
}

#[derive(Debug, Clone)]
pub struct Ee3dModel {
    pub name: String,
    pub uuid: String,
    pub translation: DVec3,
    /// Degrees, per axis
    pub rotation: DVec3,
    pub raw_obj: Option<String>,
    pub step: Option<Bytes>,
}

/// Everything decoded from one component payload.
#[derive(Debug, Clone)]
pub struct EeComponent {
    pub lcsc_id: String,
    pub symbol: Option<EeSymbol>,
    pub footprint: Option<EeFootprint>,
    pub model_3d: Option<Ee3dModel>,
}
