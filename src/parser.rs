//! Line-oriented Klipper configuration parser and writer.
//!
//! Parsing never fails: lines that do not decompose into a section header,
//! a key/value pair, a comment, or a continuation are collected as
//! [`SyntaxIssue`]s next to the partially parsed file so the validator can
//! report every broken line in one run.

use crate::model::{ConfigEntry, ConfigFile, ConfigSection, Provenance};
use regex_lite::Regex;
use std::sync::LazyLock;

static SECTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\[([^\]]+)\]\s*(?:[#;].*)?$").expect("section header pattern")
});

static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_.\-]+)\s*([:=])\s*(.*)$").expect("key/value pattern")
});

/// A line that could not be decomposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    pub line: usize,
    pub message: String,
}

/// Result of parsing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
    pub file: ConfigFile,
    pub issues: Vec<SyntaxIssue>,
}

/// Parse `text` into a [`ConfigFile`]. Line numbers are 1-based.
pub fn parse(path: &str, text: &str, provenance: Provenance) -> ParsedFile {
    let mut file = ConfigFile::new(path);
    let mut issues = Vec::new();
    // Index of the entry in the current section that continuation lines attach to.
    let mut open_entry: Option<usize> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let raw = raw.trim_end_matches('\r');
        let stripped = raw.trim();

        if let Some(caps) = SECTION_HEADER.captures(raw) {
            let mut section = ConfigSection::new(caps[1].trim(), provenance);
            section.line = line_no;
            file.sections.push(section);
            open_entry = None;
            continue;
        }

        // Blank lines and comments may sit inside multi-line values (gcode
        // blocks), so they do not close the open entry.
        if stripped.is_empty() || stripped.starts_with('#') || stripped.starts_with(';') {
            continue;
        }

        let indented = raw.starts_with(char::is_whitespace);
        if indented {
            match (file.sections.last_mut(), open_entry) {
                (Some(section), Some(entry_idx)) => {
                    section.entries[entry_idx].continuations.push(raw.to_string());
                }
                _ => issues.push(SyntaxIssue {
                    line: line_no,
                    message: "indented line does not continue a key".to_string(),
                }),
            }
            continue;
        }

        let Some(caps) = KEY_VALUE.captures(stripped) else {
            issues.push(SyntaxIssue {
                line: line_no,
                message: format!("malformed line: '{}'", stripped),
            });
            open_entry = None;
            continue;
        };

        let Some(section) = file.sections.last_mut() else {
            issues.push(SyntaxIssue {
                line: line_no,
                message: format!("key '{}' appears before any section header", &caps[1]),
            });
            continue;
        };

        section.entries.push(ConfigEntry {
            key: caps[1].to_string(),
            value: caps[3].trim().to_string(),
            separator: caps[2].chars().next().unwrap_or(':'),
            continuations: Vec::new(),
            line: line_no,
        });
        open_entry = Some(section.entries.len() - 1);
    }

    ParsedFile { file, issues }
}

/// Render sections back to text.
///
/// Output is byte-stable: one blank line between sections, none between
/// consecutive include directives, `key: value` with the recorded separator,
/// continuation lines verbatim, a single trailing newline.
pub fn write(file: &ConfigFile) -> String {
    write_sections(&file.sections)
}

pub fn write_sections(sections: &[ConfigSection]) -> String {
    let mut out = String::new();
    let mut previous_was_include = false;

    for (idx, section) in sections.iter().enumerate() {
        let is_include = section.is_include();
        if idx > 0 && !(is_include && previous_was_include) {
            out.push('\n');
        }
        out.push('[');
        out.push_str(section.name.trim());
        out.push_str("]\n");
        for entry in &section.entries {
            out.push_str(&entry.key);
            out.push(entry.separator);
            if !entry.value.is_empty() {
                out.push(' ');
                out.push_str(&entry.value);
            }
            out.push('\n');
            for continuation in &entry.continuations {
                out.push_str(continuation);
                out.push('\n');
            }
        }
        previous_was_include = is_include;
    }

    out
}
