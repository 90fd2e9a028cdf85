mod common;

use common::component_payload;
use easyeda_convertlib::{
    KicadVersion,
    converter::{Encoder, FootprintEncoder, SymbolEncoder},
    easyeda_models::{EeFootprint, EeFootprintInfo, EeFootprintPad},
    error::Error,
    importer::{import_component, import_footprint},
    kicad_models::FpShape,
};
use glam::{DVec2, DVec3};
use serde_json::json;

#[tokio::test]
async fn test_component_decoding() {
    let data = component_payload("C7593", "NE555");
    let component = import_component("C7593", &data).expect("payload decodes");

    let symbol = component.symbol.expect("symbol present");
    assert_eq!(symbol.info.name, "NE555");
    assert_eq!(symbol.info.prefix, "U");
    assert_eq!(symbol.info.lcsc_id.as_deref(), Some("C7593"));
    assert_eq!(symbol.pins.len(), 2);
    assert_eq!(symbol.rectangles.len(), 1);
    assert_eq!(symbol.arcs.len(), 1);

    let footprint = component.footprint.expect("footprint present");
    assert_eq!(footprint.info.name, "SOT-23-5");
    assert!(footprint.info.is_smd);
    assert_eq!(footprint.pads.len(), 2);
    assert_eq!(footprint.tracks.len(), 1);

    let model = component.model_3d.expect("3D model reference present");
    assert_eq!(model.uuid, "0a1b2c3d");
}

#[tokio::test]
async fn test_missing_mandatory_keys_fail_decoding() {
    let no_head = json!({ "lcsc": { "number": "C1" }, "dataStr": {} });
    assert!(matches!(import_component("C1", &no_head), Err(Error::Decode(_))));

    let mut no_lcsc = component_payload("C1", "X");
    no_lcsc.as_object_mut().unwrap().remove("lcsc");
    assert!(matches!(import_component("C1", &no_lcsc), Err(Error::Decode(_))));
}

#[tokio::test]
async fn test_optional_sections_decode_to_none() {
    let mut data = component_payload("C1", "X");
    data.as_object_mut().unwrap().remove("packageDetail");
    let component = import_component("C1", &data).unwrap();
    assert!(component.symbol.is_some());
    assert!(component.footprint.is_none());
    assert!(component.model_3d.is_none());
}

#[tokio::test]
async fn test_unknown_and_malformed_records_are_skipped() {
    let mut data = component_payload("C1", "X");
    let shapes = data["packageDetail"]["dataStr"]["shape"]
        .as_array_mut()
        .unwrap();
    shapes.push(json!("WIDGET~1~2~3"));
    shapes.push(json!("PAD~RECT~1"));
    shapes.push(json!("TRACK~1~3~~3985~gge11~0"));

    let footprint = import_footprint(&data).unwrap().unwrap();
    assert_eq!(footprint.pads.len(), 2);
    assert_eq!(footprint.tracks.len(), 2);

    // The single-coordinate track is dropped at encode time
    let ki = FootprintEncoder::new("lib", "/lib").encode(&footprint).unwrap();
    assert_eq!(ki.lines.len(), 1);
}

#[tokio::test]
async fn test_symbol_conversion() {
    let data = component_payload("C7593", "NE555");
    let symbol = import_component("C7593", &data).unwrap().symbol.unwrap();
    let encoder = SymbolEncoder::new(KicadVersion::V6, "easyeda_convertlib");

    let (ki_symbol, block) = encoder.render(&symbol).unwrap();
    assert_eq!(ki_symbol.pins.len(), 2);
    assert_eq!(ki_symbol.pins[0].pos, DVec2::new(-5.08, 0.0));
    assert_eq!(ki_symbol.pins[0].rotation, 0);
    assert_eq!(ki_symbol.pins[1].rotation, 180);
    assert_eq!(ki_symbol.footprint, "easyeda_convertlib:SOT-23-5");

    assert!(block.starts_with("  (symbol \"NE555\"\n"));
    assert!(block.ends_with("\n  )"));
    assert!(block.contains("(pin input line"));
    assert!(block.contains("(pin output line"));
    assert!(block.contains("(at -5.08 0 0)"));
    assert!(block.contains("(length 2.54)"));
    assert!(block.contains("(start -2.54 2.54)"));
    assert!(block.contains("(end 2.54 -2.54)"));
    assert!(block.contains("\"LCSC Part\""));
    assert_eq!(block.matches('(').count(), block.matches(')').count());
    assert!(!block.lines().any(|l| l.trim().is_empty()));

    // Identical input renders byte-identical output
    let (_, again) = encoder.render(&symbol).unwrap();
    assert_eq!(block, again);
}

#[tokio::test]
async fn test_symbol_conversion_v5() {
    let data = component_payload("C7593", "NE555");
    let symbol = import_component("C7593", &data).unwrap().symbol.unwrap();
    let (_, block) = SymbolEncoder::new(KicadVersion::V5, "lib")
        .render(&symbol)
        .unwrap();

    assert!(block.starts_with("#\n# NE555\n#\nDEF NE555 U 0 40 Y Y 1 F N\n"));
    assert!(block.ends_with("ENDDRAW\nENDDEF\n"));
    assert!(block.contains("X IN 1 -200 0 100 R 50 50 1 1 I\n"));
    assert!(block.contains("X OUT 2 200 0 100 L 50 50 1 1 O\n"));
    assert!(block.contains("S -100 100 100 -100 0 1 10 N\n"));
}

#[tokio::test]
async fn test_footprint_conversion() {
    let data = component_payload("C7593", "NE555");
    let footprint = import_footprint(&data).unwrap().unwrap();
    let encoder = FootprintEncoder::new("easyeda_convertlib", "/libs/easyeda_convertlib");
    let ki = encoder.encode(&footprint).unwrap();

    assert_eq!(ki.pads.len(), 2);
    assert_eq!(ki.pads[0].pos, DVec2::new(-2.54, 2.54));
    assert_eq!(ki.pads[0].shape, FpShape::Rect);

    let text = ki.to_kicad_mod_entry();
    assert!(text.starts_with("(module \"easyeda_convertlib:SOT-23-5\" (layer F.Cu)"));
    assert!(text.contains("(attr smd)"));
    assert!(text.contains(
        "(pad \"1\" smd rect (at -2.54 2.54 0) (size 0.6 1.1) (layers F.Cu F.Paste F.Mask))"
    ));
    assert!(text.contains("(fp_line (start -3.81 -1.27) (end 3.81 -1.27) (layer F.SilkS) (width 0.25))"));
    assert!(text.contains("(fp_text reference REF** (at 0 -1.46)"));
    assert!(text.contains(
        "(model \"/libs/easyeda_convertlib.3dshapes/SOT-23-5_L3.0-W1.7-H1.1.wrl\""
    ));
    // A 1016 x 762 mm origin is past the reliable range, so XY is dropped
    assert!(text.contains("(offset (xyz 0 0 0))"));
    assert!(text.contains("(rotate (xyz 0 0 270))"));
    assert_eq!(text.matches('(').count(), text.matches(')').count());
}

#[tokio::test]
async fn test_footprint_model_offset_within_reliable_bbox() {
    let mut data = component_payload("C7593", "NE555");
    let package = &mut data["packageDetail"]["dataStr"];
    package["head"]["x"] = json!(400);
    package["head"]["y"] = json!(300);
    let shapes = package["shape"].as_array_mut().unwrap();
    let node = shapes.last_mut().unwrap();
    let moved = node
        .as_str()
        .unwrap()
        .replace(r#""c_origin":"4010,3020","z":"0""#, r#""c_origin":"410,320","z":"4""#);
    *node = json!(moved);

    let footprint = import_footprint(&data).unwrap().unwrap();
    let ki = FootprintEncoder::new("lib", "/lib").encode(&footprint).unwrap();
    let model = ki.model_3d.as_ref().unwrap();
    assert_eq!(model.offset, DVec3::new(2.54, -5.08, -1.02));

    let text = ki.to_kicad_mod_entry();
    assert!(text.contains("(offset (xyz 2.54 -5.08 -1.02))"));
    assert!(text.contains("(rotate (xyz 0 0 270))"));
}

#[tokio::test]
async fn test_footprint_header_is_quoted() {
    let mut data = component_payload("C1", "X");
    data["packageDetail"]["dataStr"]["head"]["c_para"]["package"] = json!("DIP(8):W\"300");

    let footprint = import_footprint(&data).unwrap().unwrap();
    let ki = FootprintEncoder::new("lib", "/lib").encode(&footprint).unwrap();
    assert_eq!(ki.name, "DIP_8__W_300");

    let text = ki.to_kicad_mod_entry();
    assert!(text.starts_with("(module \"lib:DIP_8__W_300\" (layer F.Cu)"));
}

#[tokio::test]
async fn test_polygon_pad_and_degenerate_arc() {
    let mut data = component_payload("C1", "X");
    let shapes = data["packageDetail"]["dataStr"]["shape"]
        .as_array_mut()
        .unwrap();
    shapes.push(json!(
        "PAD~POLYGON~4000~3000~2~2~1~~3~0~3995 2995 4005 2995 4005 3005 3995 3005~45~gge9~0"
    ));
    shapes.push(json!("ARC~1~3~~M 3990 3000 A 10 0 0 0 1 4010 3000~~gge10~0"));

    let footprint = import_footprint(&data).unwrap().unwrap();
    let ki = FootprintEncoder::new("lib", "/lib").encode(&footprint).unwrap();

    let custom = ki.pads.iter().find(|p| p.number == "3").unwrap();
    assert_eq!(custom.shape, FpShape::Custom);
    assert_eq!(custom.rotation, 0.0);
    assert_eq!(custom.polygon.as_ref().map(Vec::len), Some(4));

    let text = ki.to_kicad_mod_entry();
    assert!(text.contains("(pad \"3\" smd custom (at 0 0 0) (size 0.005 0.005)"));
    assert!(text.contains("(xy -1.27 -1.27)(xy 1.27 -1.27)"));
    assert!(text.contains("(fp_arc (start 2.54 0) (end 2.54 0) (angle 0)"));
}

#[tokio::test]
async fn test_footprint_without_name_is_rejected() {
    let footprint = EeFootprint {
        info: EeFootprintInfo {
            name: "  ".to_string(),
            ..Default::default()
        },
        pads: vec![EeFootprintPad {
            shape: "RECT".to_string(),
            center: DVec2::ZERO,
            width: 1.0,
            height: 1.0,
            layer_id: 1,
            number: "1".to_string(),
            hole_radius: 0.0,
            points: String::new(),
            rotation: 0.0,
            hole_length: None,
        }],
        ..Default::default()
    };
    let result = FootprintEncoder::new("lib", "/lib").encode(&footprint);
    assert!(matches!(result, Err(Error::Format(_))));
}

#[tokio::test]
async fn test_through_hole_pad_gets_drill() {
    let footprint = EeFootprint {
        info: EeFootprintInfo {
            name: "DIP-8".to_string(),
            ..Default::default()
        },
        pads: vec![EeFootprintPad {
            shape: "OVAL".to_string(),
            center: DVec2::new(10.0, 0.0),
            width: 6.0,
            height: 6.0,
            layer_id: 11,
            number: "1".to_string(),
            hole_radius: 2.0,
            points: String::new(),
            rotation: 270.0,
            hole_length: None,
        }],
        ..Default::default()
    };
    let ki = FootprintEncoder::new("lib", "/lib").encode(&footprint).unwrap();
    let text = ki.to_kicad_mod_entry();
    assert!(text.contains("(attr through_hole)"));
    assert!(text.contains(
        "(pad \"1\" thru_hole oval (at 2.54 0 -90) (size 1.52 1.52) (layers *.Cu *.Mask) (drill 1.02))"
    ));
}

#[tokio::test]
async fn test_jlc_part_class_property() {
    let mut data = component_payload("C7593", "NE555");
    data["dataStr"]["head"]["c_para"]["BOM_JLCPCB Part Class"] = json!("Basic Part");

    let symbol = import_component("C7593", &data).unwrap().symbol.unwrap();
    assert_eq!(symbol.info.jlc_part_class.as_deref(), Some("Basic Part"));

    let (_, block) = SymbolEncoder::new(KicadVersion::V6, "lib")
        .render(&symbol)
        .unwrap();
    assert!(block.contains("      \"JLC Part Class\"\n      \"Basic Part\"\n"));
}
