//! Filesystem edges of the CLI: reading config trees and bundle roots,
//! writing generated output. The engine itself never touches disk.

use crate::bundles::{AddonBundle, BundleSource, LearnedBundles};
use crate::model::normalize_path;
use crate::synthesis::SynthesisOutput;
use anyhow::{Context, Result, bail};
use regex_lite::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

static PRINTER_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\[printer\]\s*(?:[#;].*)?$").expect("printer header pattern")
});

/// Every `*.cfg` under `dir`, keyed by forward-slash path relative to `dir`.
pub fn read_config_dir(dir: &Path) -> Result<BTreeMap<String, String>> {
    if !dir.is_dir() {
        bail!("'{}' is not a directory", dir.display());
    }
    let mut files = BTreeMap::new();
    walk(dir, dir, &mut |relative, path| {
        if relative.to_lowercase().ends_with(".cfg") {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            files.insert(relative, text);
        }
        Ok(())
    })?;
    debug!(dir = %dir.display(), files = files.len(), "Read config directory");
    Ok(files)
}

fn walk(
    base: &Path,
    dir: &Path,
    visit: &mut dyn FnMut(String, &Path) -> Result<()>,
) -> Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();
    for path in entries {
        if path.is_dir() {
            walk(base, &path, visit)?;
        } else {
            let relative = path.strip_prefix(base).unwrap_or(&path);
            let relative = normalize_path(&relative.to_string_lossy());
            visit(relative, &path)?;
        }
    }
    Ok(())
}

/// Pick the root of an imported tree: `config/printer.cfg`, `printer.cfg`,
/// the first file with a `[printer]` section, the first file with an
/// include, then the first file.
pub fn detect_root(files: &BTreeMap<String, String>) -> Option<String> {
    for preferred in ["config/printer.cfg", "printer.cfg"] {
        if files.contains_key(preferred) {
            return Some(preferred.to_string());
        }
    }
    files
        .iter()
        .find(|(_, text)| PRINTER_HEADER.is_match(text))
        .or_else(|| {
            files
                .iter()
                .find(|(_, text)| text.to_lowercase().contains("[include "))
        })
        .or_else(|| files.iter().next())
        .map(|(path, _)| path.clone())
}

fn read_json_records(dir: &Path) -> Vec<Value> {
    let Ok(listing) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = listing
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut records = Vec::new();
    for path in paths {
        let parsed = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()));
        match parsed {
            Ok(value) => records.push(value),
            Err(error) => warn!(path = %path.display(), %error, "Skipping unreadable bundle file"),
        }
    }
    records
}

/// Read a bundle root: `boards/*.json`, `toolhead_boards/*.json`,
/// `addons/*.json`, and every file under `templates/` keyed by its
/// relative path.
pub fn read_bundle_root(root: &Path) -> Result<BundleSource> {
    if !root.is_dir() {
        bail!("bundle root '{}' is not a directory", root.display());
    }
    let mut source = BundleSource::new(root.display().to_string());
    source.boards = read_json_records(&root.join("boards"));
    source.toolhead_boards = read_json_records(&root.join("toolhead_boards"));
    source.addons = read_json_records(&root.join("addons"));

    let templates = root.join("templates");
    if templates.is_dir() {
        walk(&templates, &templates, &mut |relative, path| {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading template {}", path.display()))?;
            source.templates.insert(relative, text);
            Ok(())
        })?;
    }
    Ok(source)
}

/// Write learned bundles into a bundle root so later runs pick them up.
pub fn write_learned(root: &Path, learned: &LearnedBundles) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for addon in &learned.addons {
        written.push(write_addon_record(root, addon)?);
    }
    for (reference, text) in &learned.templates {
        let path = root.join("templates").join(reference);
        write_file(&path, text)?;
        written.push(path);
    }
    Ok(written)
}

fn write_addon_record(root: &Path, addon: &AddonBundle) -> Result<PathBuf> {
    let path = root.join("addons").join(format!("{}.json", addon.id));
    let mut text = serde_json::to_string_pretty(addon)?;
    text.push('\n');
    write_file(&path, &text)?;
    Ok(path)
}

/// Write every generated file under `out`.
pub fn write_output(out: &Path, output: &SynthesisOutput) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for file in &output.files {
        let path = out.join(&file.path);
        write_file(&path, &file.content)?;
        written.push(path);
    }
    Ok(written)
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("writing {}", path.display()))
}
