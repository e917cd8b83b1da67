//! Section role rules and numeric range checks.

use crate::model::{Category, ConfigFile, ConfigSection, ValidationFinding};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inclusive numeric bounds for one key. `exclusive_min` turns the lower
/// bound into a strict one (`rotation_distance > 0`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub exclusive_min: bool,
}

impl NumericRange {
    pub const fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            exclusive_min: false,
        }
    }

    pub const fn positive() -> Self {
        Self {
            min: Some(0.0),
            max: None,
            exclusive_min: true,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        let above = match self.min {
            Some(min) if self.exclusive_min => value > min,
            Some(min) => value >= min,
            None => true,
        };
        above && self.max.is_none_or(|max| value <= max)
    }

    fn describe(&self) -> String {
        let lower = self.min.map(|m| {
            if self.exclusive_min {
                format!("> {}", m)
            } else {
                format!(">= {}", m)
            }
        });
        let upper = self.max.map(|m| format!("<= {}", m));
        match (lower, upper) {
            (Some(l), Some(u)) => format!("{} and {}", l, u),
            (Some(l), None) => l,
            (None, Some(u)) => u,
            (None, None) => "any value".to_string(),
        }
    }
}

/// Default ranges, keyed by lowercase key name.
pub fn default_ranges() -> BTreeMap<String, NumericRange> {
    [
        ("microsteps", NumericRange::between(1.0, 256.0)),
        ("max_velocity", NumericRange::between(1.0, 2000.0)),
        ("max_accel", NumericRange::between(1.0, 100_000.0)),
        ("chain_count", NumericRange::between(1.0, 256.0)),
        ("run_current", NumericRange::between(0.0, 5.0)),
        ("rotation_distance", NumericRange::positive()),
        ("max_temp", NumericRange::between(0.0, 500.0)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

type Requirements = &'static [&'static [&'static str]];

const STEPPER_KEYS: Requirements = &[&["step_pin"], &["dir_pin"], &["enable_pin"]];
const HEATER_KEYS: Requirements = &[&["sensor_type"], &["heater_pin"]];
const MCU_KEYS: Requirements = &[&["serial", "canbus_uuid"]];
const PRINTER_KEYS: Requirements = &[&["kinematics"]];

/// Keys a section must define; each inner slice is satisfied by any one of
/// its keys.
pub fn required_keys(section_id: &str) -> Requirements {
    let head = section_id.split_whitespace().next().unwrap_or_default();
    if head.starts_with("stepper_") {
        STEPPER_KEYS
    } else if is_heater(head) {
        HEATER_KEYS
    } else if head == "mcu" {
        MCU_KEYS
    } else if section_id == "printer" {
        PRINTER_KEYS
    } else {
        &[]
    }
}

/// `extruder`, `extruder1`, …, `heater_bed`, `heater_generic <name>`.
/// `extruder_stepper` is a stepper, not a heater.
fn is_heater(head: &str) -> bool {
    let extruder = head
        .strip_prefix("extruder")
        .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()));
    extruder || head == "heater_bed" || head == "heater_generic"
}

/// Every occurrence of one section id, in tree order.
#[derive(Debug)]
pub struct MergedSection<'a> {
    pub id: String,
    pub occurrences: Vec<(&'a str, &'a ConfigSection)>,
}

impl<'a> MergedSection<'a> {
    fn defines(&self, key: &str) -> bool {
        self.occurrences
            .iter()
            .any(|(_, section)| section.get(key).is_some())
    }
}

/// Group content sections of `files` by id, preserving first-seen order.
pub fn merge_sections<'a>(files: impl IntoIterator<Item = &'a ConfigFile>) -> Vec<MergedSection<'a>> {
    let mut merged: Vec<MergedSection<'a>> = Vec::new();
    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    for file in files {
        for section in file.content_sections() {
            let id = section.id();
            let slot = *index.entry(id.clone()).or_insert_with(|| {
                merged.push(MergedSection {
                    id,
                    occurrences: Vec::new(),
                });
                merged.len() - 1
            });
            merged[slot].occurrences.push((file.path.as_str(), section));
        }
    }
    merged
}

/// Role pass over the merged view.
pub fn check_roles(merged: &[MergedSection<'_>]) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    for section in merged {
        let Some(&(file, first)) = section.occurrences.first() else {
            continue;
        };
        for alternatives in required_keys(&section.id) {
            if alternatives.iter().any(|key| section.defines(key)) {
                continue;
            }
            let wanted = alternatives.join("' or '");
            findings.push(
                ValidationFinding::blocking(
                    Category::Role,
                    file,
                    format!("[{}] requires '{}'", first.name, wanted),
                )
                .with_line(first.line)
                .with_section(section.id.clone())
                .with_key(alternatives[0]),
            );
        }
    }
    findings
}

/// Numeric pass: a value outside its key's range is a Warning; a value that
/// does not parse as a number is Blocking.
pub fn check_ranges(file: &ConfigFile, ranges: &BTreeMap<String, NumericRange>) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    for section in file.content_sections() {
        for entry in &section.entries {
            let key = entry.normalized_key();
            let Some(range) = ranges.get(&key) else {
                continue;
            };
            let value = entry.comparable_value();
            let finding = match value.parse::<f64>() {
                Ok(number) if number.is_finite() && range.contains(number) => continue,
                Ok(_) => ValidationFinding::warning(
                    Category::NumericRange,
                    file.path.as_str(),
                    format!(
                        "[{}] {} = {} is out of range (expected {})",
                        section.name,
                        key,
                        value,
                        range.describe()
                    ),
                ),
                Err(_) => ValidationFinding::blocking(
                    Category::NumericRange,
                    file.path.as_str(),
                    format!("[{}] {} = '{}' is not a number", section.name, key, value),
                ),
            };
            findings.push(
                finding
                    .with_line(entry.line)
                    .with_section(section.id())
                    .with_key(key),
            );
        }
    }
    findings
}

/// Duplicate-key pass: a key defined twice within one section occurrence.
pub fn check_duplicate_keys(file: &ConfigFile) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    for section in file.content_sections() {
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        for entry in &section.entries {
            let key = entry.normalized_key();
            if let Some(first_line) = seen.get(&key) {
                findings.push(
                    ValidationFinding::blocking(
                        Category::DuplicateKey,
                        file.path.as_str(),
                        format!(
                            "[{}] defines '{}' again (first at line {})",
                            section.name, key, first_line
                        ),
                    )
                    .with_line(entry.line)
                    .with_section(section.id())
                    .with_key(key),
                );
            } else {
                seen.insert(key, entry.line);
            }
        }
    }
    findings
}
