use crate::config::KicadVersion;
use crate::error::Result;
use crate::kicad_models::*;
use std::fs;
use std::path::{Path, PathBuf};

/// Manages the output library structure:
///
/// ```text
/// <path>/<prefix>.kicad_sym | <prefix>.lib
/// <path>/<prefix>.pretty/<footprint>.kicad_mod
/// <path>/<prefix>.3dshapes/<model>.wrl, <model>.step
/// <path>/datasheet/<lcsc_id>.pdf
/// ```
#[derive(Debug, Clone)]
pub struct KicadLibrary {
    pub path: PathBuf,
    pub prefix: String,
}

impl KicadLibrary {
    pub fn new(path: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        KicadLibrary {
            path: path.into(),
            prefix: prefix.into(),
        }
    }

    pub fn symbol_lib_path(&self, version: KicadVersion) -> PathBuf {
        self.path
            .join(format!("{}.{}", self.prefix, version.symbol_lib_extension()))
    }

    pub fn footprint_dir(&self) -> PathBuf {
        self.path.join(format!("{}.pretty", self.prefix))
    }

    pub fn model_dir(&self) -> PathBuf {
        self.path.join(format!("{}.3dshapes", self.prefix))
    }

    pub fn datasheet_dir(&self) -> PathBuf {
        self.path.join("datasheet")
    }

    /// Prefix of the `.3dshapes` directory as written into footprints.
    pub fn model_path_prefix(&self, project_relative: bool) -> String {
        if project_relative {
            format!("${{KIPRJMOD}}/{}", self.prefix)
        } else {
            let root = std::path::absolute(&self.path).unwrap_or_else(|_| self.path.clone());
            root.join(&self.prefix).to_string_lossy().replace('\\', "/")
        }
    }

    /// Creates the necessary directories for symbols, footprints, and 3D models.
    pub fn setup_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.path)?;
        fs::create_dir_all(self.footprint_dir())?;
        fs::create_dir_all(self.model_dir())?;
        Ok(())
    }

    /// Writes a footprint to its own .kicad_mod file.
    pub fn add_footprint(&self, footprint: &KiFootprint) -> Result<PathBuf> {
        let fp_path = self
            .footprint_dir()
            .join(format!("{}.kicad_mod", footprint.name));
        fs::write(&fp_path, footprint.to_kicad_mod_entry())?;
        log::debug!("Wrote footprint {}", fp_path.display());
        Ok(fp_path)
    }

    /// Writes the 3D model files (.wrl, .step) that are present.
    pub fn add_3d_model(&self, model: &Ki3dModel) -> Result<Vec<PathBuf>> {
        let base_path = self.model_dir().join(&model.name);
        let mut written = Vec::new();
        if let Some(wrl_data) = &model.wrl_data {
            let path = with_suffix(&base_path, "wrl");
            fs::write(&path, wrl_data)?;
            written.push(path);
        }
        if let Some(step_data) = &model.step_data {
            let path = with_suffix(&base_path, "step");
            fs::write(&path, step_data)?;
            written.push(path);
        }
        Ok(written)
    }

    /// Stores a downloaded datasheet, picking the extension from its content.
    pub fn add_datasheet(&self, lcsc_id: &str, content: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(self.datasheet_dir())?;
        let ext = if content.starts_with(b"%PDF") { "pdf" } else { "html" };
        let path = self.datasheet_dir().join(format!("{lcsc_id}.{ext}"));
        fs::write(&path, content)?;
        Ok(path)
    }
}

/// `Path::with_extension` would eat anything after a dot in model names
/// such as `R0603_0.8mm`.
fn with_suffix(base: &Path, ext: &str) -> PathBuf {
    let mut os = base.as_os_str().to_owned();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_prefix() {
        let lib = KicadLibrary::new("/tmp/out", "parts");
        assert_eq!(lib.symbol_lib_path(KicadVersion::V6), Path::new("/tmp/out/parts.kicad_sym"));
        assert_eq!(lib.symbol_lib_path(KicadVersion::V5), Path::new("/tmp/out/parts.lib"));
        assert_eq!(lib.footprint_dir(), Path::new("/tmp/out/parts.pretty"));
        assert_eq!(lib.model_path_prefix(true), "${KIPRJMOD}/parts");
        assert_eq!(lib.model_path_prefix(false), "/tmp/out/parts");
    }

    #[test]
    fn dotted_model_names_keep_their_stem() {
        assert_eq!(
            with_suffix(Path::new("m/R0603_0.8mm"), "wrl"),
            Path::new("m/R0603_0.8mm.wrl")
        );
    }
}
