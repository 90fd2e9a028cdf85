//! In-place editing of KiCad symbol library files.
//!
//! Every mutation of a library file happens while holding the lock returned by
//! [`lock_for`] for that file, so concurrent exports into the same library
//! never interleave a read-modify-write cycle.

use crate::config::{KicadVersion, TOOL_IDENTITY};
use crate::error::{Error, Result};
use crate::kicad_models::escape_quoted;
use regex::{NoExpand, Regex};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

static FILE_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static GENERATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\(generator\s+(?:"[^"]*"|[^\s)]+)\s*\)"#).expect("generator pattern is valid")
});

static GENERATOR_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*\(generator_version[^\n]*\n?").expect("generator_version pattern is valid")
});

/// Absolute form of `path` used as the lock key. The parent directory is
/// canonicalized when it exists so that `a/../a/x.kicad_sym` and `a/x.kicad_sym`
/// share a lock.
pub fn canonical_lib_path(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match (parent.canonicalize(), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// Returns the process-wide lock guarding `path`, creating it on first use.
pub fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    let key = canonical_lib_path(path);
    let mut locks = FILE_LOCKS.lock().unwrap_or_else(|e| e.into_inner());
    locks.entry(key).or_default().clone()
}

fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    // A panicking writer leaves the file as it was before its fs::write
    lock.lock().unwrap_or_else(|e| e.into_inner())
}

fn block_pattern(name: &str, version: KicadVersion) -> Result<Regex> {
    let pattern = match version {
        KicadVersion::V5 => format!(r"(?s)#\n# {}\n#\n.*?ENDDEF\n", regex::escape(name)),
        // v6 names are written as quoted strings
        KicadVersion::V6 => format!(
            r#"(?s)\n  \(symbol "{}".*?\n  \)"#,
            regex::escape(&escape_quoted(name))
        ),
    };
    Ok(Regex::new(&pattern)?)
}

fn without_blank_lines(block: &str) -> String {
    block
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn stamp_generator(text: &str) -> String {
    let replacement = format!("(generator \"{}\")", TOOL_IDENTITY);
    let text = GENERATOR.replace(text, NoExpand(&replacement));
    GENERATOR_VERSION.replace_all(&text, "").into_owned()
}

fn read_or_create(lib_path: &Path, version: KicadVersion) -> Result<String> {
    match fs::read_to_string(lib_path) {
        Ok(text) if !text.trim().is_empty() => Ok(text),
        Ok(_) => Ok(version.symbol_lib_header()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(version.symbol_lib_header()),
        Err(e) => Err(e.into()),
    }
}

fn contains(text: &str, name: &str, version: KicadVersion) -> Result<bool> {
    Ok(block_pattern(name, version)?.is_match(text))
}

fn append(text: &str, block: &str, version: KicadVersion) -> Result<String> {
    match version {
        KicadVersion::V5 => {
            let mut out = text.to_string();
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(block);
            if !out.ends_with('\n') {
                out.push('\n');
            }
            Ok(out)
        }
        KicadVersion::V6 => {
            let body = text
                .trim_end()
                .strip_suffix(')')
                .ok_or_else(|| Error::Format("symbol library is not closed by ')'".to_string()))?
                .trim_end();
            let appended = format!("{}\n{}\n)", body, without_blank_lines(block));
            Ok(stamp_generator(&appended))
        }
    }
}

fn replace(text: &str, name: &str, block: &str, version: KicadVersion) -> Result<Option<String>> {
    let re = block_pattern(name, version)?;
    if !re.is_match(text) {
        return Ok(None);
    }
    let updated = match version {
        KicadVersion::V5 => {
            let mut block = block.to_string();
            if !block.ends_with('\n') {
                block.push('\n');
            }
            re.replace(text, NoExpand(&block)).into_owned()
        }
        KicadVersion::V6 => {
            let block = format!("\n{}", without_blank_lines(block));
            stamp_generator(&re.replace(text, NoExpand(&block)))
        }
    };
    Ok(Some(updated))
}

/// Creates `lib_path` with an empty library when it does not exist yet.
pub fn ensure_library(lib_path: &Path, version: KicadVersion) -> Result<()> {
    let lock = lock_for(lib_path);
    let _guard = acquire(&lock);
    if !lib_path.exists() {
        log::debug!("Creating symbol library {}", lib_path.display());
        fs::write(lib_path, version.symbol_lib_header())?;
    }
    Ok(())
}

/// Whether a symbol called `name` is already defined in the library.
/// A missing file contains nothing.
pub fn component_exists(lib_path: &Path, name: &str, version: KicadVersion) -> Result<bool> {
    let lock = lock_for(lib_path);
    let _guard = acquire(&lock);
    match fs::read_to_string(lib_path) {
        Ok(text) => contains(&text, name, version),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Appends a rendered symbol block, creating the library if needed.
pub fn add_component(lib_path: &Path, block: &str, version: KicadVersion) -> Result<()> {
    let lock = lock_for(lib_path);
    let _guard = acquire(&lock);
    let text = read_or_create(lib_path, version)?;
    fs::write(lib_path, append(&text, block, version)?)?;
    Ok(())
}

/// Replaces the block of symbol `name`. Returns `false` when it was not found.
pub fn update_component(
    lib_path: &Path,
    name: &str,
    block: &str,
    version: KicadVersion,
) -> Result<bool> {
    let lock = lock_for(lib_path);
    let _guard = acquire(&lock);
    let text = read_or_create(lib_path, version)?;
    match replace(&text, name, block, version)? {
        Some(updated) => {
            fs::write(lib_path, updated)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolWrite {
    Added,
    Updated,
    AlreadyPresent,
}

/// Check-and-write in one critical section: adds `block`, replaces an existing
/// definition when `overwrite` is set, or leaves the file untouched.
pub fn write_symbol(
    lib_path: &Path,
    name: &str,
    block: &str,
    version: KicadVersion,
    overwrite: bool,
) -> Result<SymbolWrite> {
    let lock = lock_for(lib_path);
    let _guard = acquire(&lock);
    let text = read_or_create(lib_path, version)?;

    if contains(&text, name, version)? {
        if !overwrite {
            return Ok(SymbolWrite::AlreadyPresent);
        }
        if let Some(updated) = replace(&text, name, block, version)? {
            fs::write(lib_path, updated)?;
            return Ok(SymbolWrite::Updated);
        }
    }

    fs::write(lib_path, append(&text, block, version)?)?;
    Ok(SymbolWrite::Added)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v6_block(name: &str, body: &str) -> String {
        format!(
            "  (symbol \"{name}\"\n    (in_bom yes)\n    (symbol \"{name}_0_1\"\n      {body}\n    )\n  )"
        )
    }

    #[test]
    fn v6_append_keeps_library_closed() {
        let text = KicadVersion::V6.symbol_lib_header();
        let out = append(&text, &v6_block("R1", "(x)"), KicadVersion::V6).unwrap();
        assert!(out.ends_with("\n  )\n)"));
        assert!(contains(&out, "R1", KicadVersion::V6).unwrap());
        assert!(!contains(&out, "R", KicadVersion::V6).unwrap());
    }

    #[test]
    fn v6_generator_is_rewritten() {
        let text = "(kicad_symbol_lib (version 20231120) (generator \"kicad_symbol_editor\")\n  (generator_version \"8.0\")\n)";
        let out = append(text, &v6_block("U1", "(x)"), KicadVersion::V6).unwrap();
        assert!(out.contains("(generator \"easyeda_convertlib\")"));
        assert!(!out.contains("generator_version"));
    }

    #[test]
    fn v6_replace_touches_only_named_block() {
        let text = KicadVersion::V6.symbol_lib_header();
        let text = append(&text, &v6_block("A", "(old)"), KicadVersion::V6).unwrap();
        let text = append(&text, &v6_block("B", "(keep)"), KicadVersion::V6).unwrap();
        let out = replace(&text, "A", &v6_block("A", "(new)"), KicadVersion::V6)
            .unwrap()
            .unwrap();
        assert!(out.contains("(new)") && !out.contains("(old)") && out.contains("(keep)"));
        assert_eq!(out.matches("(symbol \"A\"").count(), 1);
    }

    #[test]
    fn v5_round_trip() {
        let block = "#\n# LM358\n#\nDEF LM358 U 0 40 Y Y 1 F N\nENDDEF\n";
        let text = KicadVersion::V5.symbol_lib_header();
        let out = append(&text, block, KicadVersion::V5).unwrap();
        assert!(contains(&out, "LM358", KicadVersion::V5).unwrap());
        let updated = replace(&out, "LM358", &block.replace("U 0", "IC 0"), KicadVersion::V5)
            .unwrap()
            .unwrap();
        assert!(updated.contains("DEF LM358 IC 0"));
        assert!(replace(&out, "LM35", block, KicadVersion::V5).unwrap().is_none());
    }

    #[test]
    fn quoted_names_are_found_again() {
        let text = KicadVersion::V6.symbol_lib_header();
        let block = "  (symbol \"J\\\"1\"\n    (in_bom yes)\n  )";
        let out = append(&text, block, KicadVersion::V6).unwrap();
        assert!(contains(&out, "J\"1", KicadVersion::V6).unwrap());
    }

    #[test]
    fn names_are_matched_literally() {
        let text = KicadVersion::V6.symbol_lib_header();
        let out = append(&text, &v6_block("R.1", "(x)"), KicadVersion::V6).unwrap();
        assert!(contains(&out, "R.1", KicadVersion::V6).unwrap());
        assert!(!contains(&out, "RX1", KicadVersion::V6).unwrap());
    }
}
