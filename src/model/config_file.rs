//! Canonical configuration file shape.
//!
//! Generated output, imported trees and overrides all normalize into
//! [`ConfigFile`]; the graph builder and validator only ever see this shape.

use serde::{Deserialize, Serialize};

/// Where a section came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    #[default]
    Generated,
    Imported,
    Override,
}

/// One `key: value` (or `key = value`) line plus its indented continuation
/// lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub separator: char,
    #[serde(default)]
    pub continuations: Vec<String>,
    #[serde(default)]
    pub line: usize,
}

impl ConfigEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            separator: ':',
            continuations: Vec::new(),
            line: 0,
        }
    }

    /// Entry whose value is a list of indented lines (e.g. `aliases:` or `gcode:`).
    pub fn multiline(key: impl Into<String>, lines: impl IntoIterator<Item = String>) -> Self {
        let mut entry = Self::new(key, "");
        entry.continuations = lines.into_iter().map(|l| format!("    {}", l)).collect();
        entry
    }

    pub fn normalized_key(&self) -> String {
        self.key.trim().to_lowercase()
    }

    /// The value with continuation lines joined by newlines.
    pub fn full_value(&self) -> String {
        if self.continuations.is_empty() {
            return self.value.clone();
        }
        let mut out = self.value.clone();
        for line in &self.continuations {
            out.push('\n');
            out.push_str(line);
        }
        out
    }

    /// Value used for comparisons: inline comments stripped, blank lines
    /// dropped, each line trimmed.
    pub fn comparable_value(&self) -> String {
        normalize_value(&self.full_value())
    }
}

/// Strip inline `#`/`;` comments and surrounding whitespace, line by line.
pub fn normalize_value(value: &str) -> String {
    value
        .lines()
        .map(|line| {
            let mut text = line;
            for marker in [" #", " ;"] {
                if let Some(idx) = text.find(marker) {
                    text = &text[..idx];
                }
            }
            text.trim()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// A `[name]` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSection {
    pub name: String,
    #[serde(default)]
    pub line: usize,
    #[serde(default)]
    pub entries: Vec<ConfigEntry>,
    #[serde(default)]
    pub provenance: Provenance,
}

impl ConfigSection {
    pub fn new(name: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            name: name.into(),
            line: 0,
            entries: Vec::new(),
            provenance,
        }
    }

    pub fn generated(name: impl Into<String>) -> Self {
        Self::new(name, Provenance::Generated)
    }

    pub fn include(target: &str) -> Self {
        Self::generated(format!("include {}", target))
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push(ConfigEntry::new(key, value));
        self
    }

    pub fn with_entry(mut self, entry: ConfigEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Lowercased, trimmed section name used as the section id.
    pub fn id(&self) -> String {
        self.name.trim().to_lowercase()
    }

    /// Target of an `[include …]` section, if this is one.
    pub fn include_target(&self) -> Option<&str> {
        let name = self.name.trim();
        let (head, rest) = name.split_once(char::is_whitespace)?;
        if !head.eq_ignore_ascii_case("include") {
            return None;
        }
        let target = rest.trim().trim_matches(|c| c == '"' || c == '\'');
        if target.is_empty() { None } else { Some(target) }
    }

    pub fn is_include(&self) -> bool {
        self.include_target().is_some()
    }

    /// Last definition of `key` in this section (case-insensitive).
    pub fn get(&self, key: &str) -> Option<&ConfigEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key.trim().eq_ignore_ascii_case(key))
    }

    /// Replace the value of `key`, or append it.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|e| e.key.trim().eq_ignore_ascii_case(key))
        {
            Some(entry) => {
                entry.value = value;
                entry.continuations.clear();
            }
            None => self.entries.push(ConfigEntry::new(key, value)),
        }
    }
}

/// A logical configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub path: String,
    #[serde(default)]
    pub sections: Vec<ConfigSection>,
}

impl ConfigFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: normalize_path(&path.into()),
            sections: Vec::new(),
        }
    }

    /// Include targets declared in this file, with the line of each directive.
    pub fn include_directives(&self) -> Vec<(&str, usize)> {
        self.sections
            .iter()
            .filter_map(|s| s.include_target().map(|t| (t, s.line)))
            .collect()
    }

    /// Non-include sections.
    pub fn content_sections(&self) -> impl Iterator<Item = &ConfigSection> {
        self.sections.iter().filter(|s| !s.is_include())
    }

    pub fn section(&self, name: &str) -> Option<&ConfigSection> {
        let wanted = name.trim().to_lowercase();
        self.sections.iter().find(|s| s.id() == wanted)
    }
}

/// Normalize a logical path: forward slashes, no `.` segments, `..` folded,
/// no leading `./`. Absolute paths stay absolute.
pub fn normalize_path(path: &str) -> String {
    let raw = path.trim().replace('\\', "/");
    let absolute = raw.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute { format!("/{}", joined) } else { joined }
}

/// Resolve an include target relative to the directory of `base_file`.
pub fn resolve_relative(base_file: &str, target: &str) -> String {
    let target = target.trim().trim_matches(|c| c == '"' || c == '\'').replace('\\', "/");
    if target.starts_with('/') {
        return normalize_path(&target);
    }
    let base = normalize_path(base_file);
    match base.rfind('/') {
        Some(idx) => normalize_path(&format!("{}/{}", &base[..idx], target)),
        None => normalize_path(&target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("config\\printer.cfg"), "config/printer.cfg");
        assert_eq!(normalize_path("./a/./b/../c.cfg"), "a/c.cfg");
        assert_eq!(normalize_path("/home/pi/../x.cfg"), "/home/x.cfg");
        assert_eq!(normalize_path("../shared.cfg"), "../shared.cfg");
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(resolve_relative("printer.cfg", "mcu.cfg"), "mcu.cfg");
        assert_eq!(resolve_relative("config/printer.cfg", "macros/*.cfg"), "config/macros/*.cfg");
        assert_eq!(resolve_relative("config/sub/a.cfg", "../b.cfg"), "config/b.cfg");
        assert_eq!(resolve_relative("config/a.cfg", "/abs/b.cfg"), "/abs/b.cfg");
    }

    #[test]
    fn test_include_target() {
        let section = ConfigSection::generated("include  macros/kamp.cfg ");
        assert_eq!(section.include_target(), Some("macros/kamp.cfg"));
        assert!(ConfigSection::generated("INCLUDE x.cfg").is_include());
        assert!(!ConfigSection::generated("include").is_include());
        assert!(!ConfigSection::generated("stepper_x").is_include());
    }

    #[test]
    fn test_normalize_value_strips_comments() {
        assert_eq!(normalize_value("PA1  # step"), "PA1");
        assert_eq!(normalize_value("a\n\n   b ; note\n"), "a\nb");
    }

    #[test]
    fn test_section_set_replaces_case_insensitively() {
        let mut section = ConfigSection::generated("printer").with("Max_Accel", "3000");
        section.set("max_accel", "5000");
        assert_eq!(section.entries.len(), 1);
        assert_eq!(section.get("MAX_ACCEL").unwrap().value, "5000");
        section.set("max_velocity", "300");
        assert_eq!(section.entries.len(), 2);
    }
}
