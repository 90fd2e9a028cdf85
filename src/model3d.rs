//! 3D model placement and OBJ to VRML conversion.

use crate::converter::Encoder;
use crate::easyeda_models::Ee3dModel;
use crate::error::Result;
use crate::geometry::round2;
use crate::kicad_models::Ki3dModel;
use glam::{DVec2, DVec3};
use std::collections::HashMap;
use std::fmt::Write;

/// Above this footprint bbox size (mm) the origin is not trusted for placement.
pub const MAX_RELIABLE_BBOX_MM: f64 = 500.0;
/// Per-axis offsets beyond this (mm) are treated as bogus and zeroed.
pub const MAX_REASONABLE_OFFSET_MM: f64 = 100.0;

const OBJ_UNIT_PER_INCH_TENTH: f64 = 2.54;

/// Computes the `(offset, rotate)` pair of a footprint's model clause.
///
/// `translation_mm` and `bbox_mm` are already in millimeters. The result is
/// rounded to 2 decimals.
pub fn compute_placement(
    translation_mm: DVec3,
    rotation: DVec3,
    bbox_mm: DVec2,
    is_smd: bool,
) -> (DVec3, DVec3) {
    let unreliable =
        bbox_mm.x.abs() > MAX_RELIABLE_BBOX_MM || bbox_mm.y.abs() > MAX_RELIABLE_BBOX_MM;

    let mut offset = if unreliable {
        log::debug!("Footprint bbox {bbox_mm:?} too large, dropping XY model offset");
        DVec3::new(0.0, 0.0, translation_mm.z)
    } else {
        let raw = DVec3::new(
            translation_mm.x - bbox_mm.x,
            translation_mm.y - bbox_mm.y,
            translation_mm.z,
        );
        let clamp = |v: f64| if v.abs() > MAX_REASONABLE_OFFSET_MM { 0.0 } else { v };
        DVec3::new(clamp(raw.x), clamp(raw.y), clamp(raw.z))
    };

    offset.y = -offset.y;
    if is_smd {
        offset.z = -offset.z;
    }

    let offset = DVec3::new(
        round2(offset.x) + 0.0,
        round2(offset.y) + 0.0,
        round2(offset.z) + 0.0,
    );
    let flip = |a: f64| (360.0 - a).rem_euclid(360.0);
    let rotate = DVec3::new(flip(rotation.x), flip(rotation.y), flip(rotation.z));
    (offset, rotate)
}

/// Replaces characters that are invalid in file names on common platforms.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Material {
    diffuse: DVec3,
    specular: DVec3,
    transparency: f64,
}

impl Default for Material {
    fn default() -> Self {
        Material {
            diffuse: DVec3::splat(0.8),
            specular: DVec3::ZERO,
            transparency: 0.0,
        }
    }
}

fn parse_vec3(fields: &[&str]) -> Option<DVec3> {
    let mut it = fields.iter().map(|f| f.parse::<f64>().ok());
    Some(DVec3::new(it.next()??, it.next()??, it.next()??))
}

fn vec3_str(v: DVec3) -> String {
    format!("{:.4} {:.4} {:.4}", v.x, v.y, v.z)
}

/// Converts the EasyEDA OBJ dialect (inline `newmtl` blocks) to VRML 2.0.
///
/// Vertices are scaled from EasyEDA's 0.1 inch-ish units to VRML units of
/// 2.54 mm. Faces are grouped into one `Shape` per material.
pub fn obj_to_wrl(obj: &str) -> String {
    let mut materials: HashMap<String, Material> = HashMap::new();
    let mut vertices: Vec<DVec3> = Vec::new();
    let mut groups: Vec<(String, Vec<Vec<usize>>)> = Vec::new();
    let mut current_material: Option<String> = None;
    let mut active = String::new();

    for line in obj.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some((&kind, rest)) = fields.split_first() else {
            continue;
        };
        match kind {
            "newmtl" => {
                let name = rest.join(" ");
                materials.entry(name.clone()).or_default();
                current_material = Some(name);
            }
            "Kd" | "Ks" | "d" => {
                let Some(mat) = current_material.as_ref().and_then(|n| materials.get_mut(n)) else {
                    continue;
                };
                match kind {
                    "Kd" => {
                        if let Some(v) = parse_vec3(rest) {
                            mat.diffuse = v;
                        }
                    }
                    "Ks" => {
                        if let Some(v) = parse_vec3(rest) {
                            mat.specular = v;
                        }
                    }
                    _ => {
                        if let Some(d) = rest.first().and_then(|s| s.parse::<f64>().ok()) {
                            mat.transparency = 1.0 - d;
                        }
                    }
                }
            }
            "endmtl" => current_material = None,
            "v" => {
                if let Some(v) = parse_vec3(rest) {
                    vertices.push(v / OBJ_UNIT_PER_INCH_TENTH);
                }
            }
            "usemtl" => active = rest.join(" "),
            "f" => {
                let face: Option<Vec<usize>> = rest
                    .iter()
                    .map(|f| {
                        let idx = f.split('/').next()?.parse::<i64>().ok()?;
                        // OBJ indices are 1-based, negatives count from the end
                        let resolved = if idx < 0 {
                            vertices.len() as i64 + idx
                        } else {
                            idx - 1
                        };
                        usize::try_from(resolved).ok().filter(|i| *i < vertices.len())
                    })
                    .collect();
                let Some(face) = face.filter(|f| f.len() >= 3) else {
                    log::debug!("Skipping malformed OBJ face: {line}");
                    continue;
                };
                match groups.last_mut() {
                    Some((name, faces)) if *name == active => faces.push(face),
                    _ => groups.push((active.clone(), vec![face])),
                }
            }
            _ => {}
        }
    }

    let mut out = String::from("#VRML V2.0 utf8\n# Converted by easyeda_convertlib\n");
    for (material_name, faces) in &groups {
        let material = materials.get(material_name).copied().unwrap_or_default();

        // Re-index so each shape only carries the vertices it uses
        let mut remap: HashMap<usize, usize> = HashMap::new();
        let mut points: Vec<DVec3> = Vec::new();
        let mut indices = String::new();
        for face in faces {
            for idx in face {
                let local = *remap.entry(*idx).or_insert_with(|| {
                    points.push(vertices[*idx]);
                    points.len() - 1
                });
                let _ = write!(indices, "{},", local);
            }
            indices.push_str("-1,");
        }

        let coords = points
            .iter()
            .map(|p| vec3_str(*p))
            .collect::<Vec<_>>()
            .join(",\n        ");

        let _ = write!(
            out,
            "Shape {{\n  appearance Appearance {{\n    material Material {{\n      diffuseColor {}\n      specularColor {}\n      ambientIntensity 0.2\n      transparency {:.4}\n      shininess 0.5\n    }}\n  }}\n  geometry IndexedFaceSet {{\n    ccw TRUE\n    solid FALSE\n    coord DEF co Coordinate {{\n      point [\n        {}\n      ]\n    }}\n    coordIndex [{}]\n  }}\n}}\n",
            vec3_str(material.diffuse),
            vec3_str(material.specular),
            material.transparency,
            coords,
            indices.trim_end_matches(',')
        );
    }
    out
}

/// Turns downloaded model payloads into the files written next to a footprint.
pub struct ModelEncoder;

impl Encoder for ModelEncoder {
    type Input = Ee3dModel;
    type Output = Ki3dModel;

    fn encode(&self, model: &Ee3dModel) -> Result<Ki3dModel> {
        Ok(Ki3dModel {
            name: sanitize_name(&model.name),
            wrl_data: model.raw_obj.as_deref().map(obj_to_wrl),
            step_data: model.step.clone(),
            offset: DVec3::ZERO,
            scale: DVec3::ONE,
            rotate: DVec3::ZERO,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_bbox_drops_xy_offset() {
        let (offset, rotate) = compute_placement(
            DVec3::new(5.0, 5.0, 2.0),
            DVec3::ZERO,
            DVec2::new(1000.0, 1000.0),
            true,
        );
        assert_eq!(offset, DVec3::new(0.0, 0.0, -2.0));
        assert_eq!(rotate, DVec3::ZERO);
    }

    #[test]
    fn small_bbox_uses_relative_offset() {
        let (offset, _) = compute_placement(
            DVec3::new(5.0, 8.0, 2.0),
            DVec3::ZERO,
            DVec2::new(2.0, 3.0),
            true,
        );
        assert_eq!(offset, DVec3::new(3.0, -5.0, -2.0));
    }

    #[test]
    fn through_hole_keeps_z_and_clamps_outliers() {
        let (offset, _) = compute_placement(
            DVec3::new(250.0, 8.0, 1.5),
            DVec3::ZERO,
            DVec2::new(2.0, 3.0),
            false,
        );
        assert_eq!(offset, DVec3::new(0.0, -5.0, 1.5));
    }

    #[test]
    fn rotation_is_mirrored() {
        let (_, rotate) = compute_placement(
            DVec3::ZERO,
            DVec3::new(90.0, 0.0, 270.0),
            DVec2::ZERO,
            true,
        );
        assert_eq!(rotate, DVec3::new(270.0, 0.0, 90.0));
    }

    #[test]
    fn names_are_file_safe() {
        assert_eq!(sanitize_name("SOT-23/3 <v2>?"), "SOT-23_3 _v2__");
    }

    #[test]
    fn obj_faces_are_grouped_by_material() {
        let obj = "newmtl red\nKd 1 0 0\nd 1\nendmtl\nv 0 0 0\nv 2.54 0 0\nv 0 2.54 0\nusemtl red\nf 1 2 3\n";
        let wrl = obj_to_wrl(obj);
        assert!(wrl.starts_with("#VRML V2.0 utf8"));
        assert!(wrl.contains("diffuseColor 1.0000 0.0000 0.0000"));
        assert!(wrl.contains("1.0000 0.0000 0.0000,"));
        assert!(wrl.contains("coordIndex [0,1,2,-1]"));
        assert_eq!(wrl.matches("Shape {").count(), 1);
    }
}
