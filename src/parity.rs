//! Parity between generated output and an imported reference tree.
//!
//! Used after re-synthesizing an imported machine in source-tree layout:
//! every section and key of the imported files must come back with the same
//! normalized value. Machine-specific identifiers (`serial`, `canbus_uuid`)
//! are ignored by default.

use crate::graph::flatten_recorded;
use crate::model::{Category, ConfigFile, ConfigTree, ValidationFinding, ValidationReport, normalize_path};
use crate::validation::ConflictPolicy;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Keys ignored unless the caller replaces the policy.
pub const DEFAULT_IGNORED_KEYS: [&str; 2] = ["serial", "canbus_uuid"];

#[derive(Debug, Clone, PartialEq)]
pub struct ParityOptions {
    pub ignored: ConflictPolicy,
}

impl Default for ParityOptions {
    fn default() -> Self {
        Self {
            ignored: ConflictPolicy::new(DEFAULT_IGNORED_KEYS),
        }
    }
}

impl ParityOptions {
    /// Default ignores plus `keys`.
    pub fn with_allowlist<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let ignored = ConflictPolicy::new(DEFAULT_IGNORED_KEYS.into_iter().chain(keys));
        Self { ignored }
    }
}

/// One key's final value and the line that set it.
struct KeyValue {
    value: String,
    line: usize,
}

/// Section id → (header line, key → value). Later definitions win, as in
/// Klipper.
fn flatten_file(file: &ConfigFile) -> BTreeMap<String, (usize, BTreeMap<String, KeyValue>)> {
    let mut out: BTreeMap<String, (usize, BTreeMap<String, KeyValue>)> = BTreeMap::new();
    for section in &file.sections {
        let slot = out
            .entry(section.id())
            .or_insert_with(|| (section.line, BTreeMap::new()));
        for entry in &section.entries {
            slot.1.insert(
                entry.normalized_key(),
                KeyValue {
                    value: entry.comparable_value(),
                    line: entry.line,
                },
            );
        }
    }
    out
}

/// Compare `generated` against `imported`.
///
/// With `include_graph`, only imported files reachable from `root` through
/// the recorded graph take part.
pub fn compare(
    generated: &ConfigTree,
    imported: &ConfigTree,
    root: &str,
    include_graph: Option<&BTreeMap<String, Vec<String>>>,
    options: &ParityOptions,
) -> ValidationReport {
    let root = normalize_path(root);
    let mut report = ValidationReport::new();

    let scope: BTreeSet<String> = match include_graph {
        Some(graph) if !graph.is_empty() => flatten_recorded(graph, &root)
            .into_iter()
            .filter(|p| imported.contains(p))
            .collect(),
        _ => imported.paths().map(str::to_string).collect(),
    };

    if !generated.contains(&root) {
        report.push(ValidationFinding::blocking(
            Category::Parity,
            root.as_str(),
            format!("generated output does not contain root file '{}'", root),
        ));
        return report;
    }

    for path in &scope {
        let Some(reference) = imported.file(path) else {
            continue;
        };
        let Some(candidate) = generated.file(path) else {
            report.push(ValidationFinding::blocking(
                Category::Parity,
                path.as_str(),
                format!("generated output is missing '{}'", path),
            ));
            continue;
        };

        let expected = flatten_file(reference);
        let actual = flatten_file(candidate);
        for (section, (header_line, keys)) in &expected {
            let Some((_, produced)) = actual.get(section) else {
                report.push(
                    ValidationFinding::blocking(
                        Category::Parity,
                        path.as_str(),
                        format!("missing section [{}]", section),
                    )
                    .with_line(*header_line)
                    .with_section(section.clone()),
                );
                continue;
            };
            for (key, wanted) in keys {
                if options.ignored.is_allowlisted(key) {
                    continue;
                }
                let message = match produced.get(key) {
                    None => format!("missing key '{}' in [{}]", key, section),
                    Some(got) if got.value != wanted.value => format!(
                        "value mismatch for '{}' in [{}]: expected '{}', generated '{}'",
                        key, section, wanted.value, got.value
                    ),
                    Some(_) => continue,
                };
                report.push(
                    ValidationFinding::blocking(Category::Parity, path.as_str(), message)
                        .with_line(wanted.line)
                        .with_section(section.clone())
                        .with_key(key.clone()),
                );
            }
        }
    }

    for path in generated.paths().filter(|p| !scope.contains(*p)) {
        report.push(ValidationFinding::warning(
            Category::Parity,
            path,
            format!("generated file '{}' is not in the imported tree", path),
        ));
    }

    report.sort();
    info!(
        files = scope.len(),
        blocking = report.blocking_count(),
        "Parity comparison finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;

    fn tree(files: &[(&str, &str)]) -> ConfigTree {
        let map: BTreeMap<String, String> = files
            .iter()
            .map(|(p, t)| (p.to_string(), t.to_string()))
            .collect();
        ConfigTree::from_imported(&map)
    }

    #[test]
    fn test_serial_and_uuid_ignored() {
        let generated = tree(&[
            ("config/printer.cfg", "[include nhk.cfg]\n[printer]\nkinematics: corexy\n"),
            ("config/nhk.cfg", "[mcu nhk]\nserial: /dev/serial/by-id/usb-OTHER\ncanbus_uuid: deadbeef\n"),
        ]);
        let imported = tree(&[
            ("config/printer.cfg", "[include nhk.cfg]\n[printer]\nkinematics: corexy\n"),
            ("config/nhk.cfg", "[mcu nhk]\nserial: /dev/serial/by-id/usb-ORIGINAL\ncanbus_uuid: abcdef12\n"),
        ]);
        let report = compare(&generated, &imported, "config/printer.cfg", None, &ParityOptions::default());
        assert!(report.is_empty(), "{:?}", report);
    }

    #[test]
    fn test_value_mismatch_blocks() {
        let generated = tree(&[("printer.cfg", "[printer]\nkinematics: corexy\nmax_velocity: 300\n")]);
        let imported = tree(&[("printer.cfg", "[printer]\nkinematics: corexy\nmax_velocity: 400 # fast\n")]);
        let report = compare(&generated, &imported, "printer.cfg", None, &ParityOptions::default());
        assert_eq!(report.blocking_count(), 1);
        assert_eq!(report.findings[0].line, Some(3));
        assert!(report.findings[0].message.contains("value mismatch"));
    }

    #[test]
    fn test_missing_root_short_circuits() {
        let generated = tree(&[("other.cfg", "[printer]\n")]);
        let imported = tree(&[("printer.cfg", "[printer]\n")]);
        let report = compare(&generated, &imported, "printer.cfg", None, &ParityOptions::default());
        assert_eq!(report.len(), 1);
        assert!(report.findings[0].message.contains("root file"));
    }

    #[test]
    fn test_graph_restricts_scope_and_extra_files_warn() {
        let generated = tree(&[
            ("printer.cfg", "[include mcu.cfg]\n[printer]\nkinematics: corexy\n"),
            ("mcu.cfg", "[mcu]\nserial: /dev/x\n"),
            ("leds.cfg", "[neopixel status_leds]\npin: PB0\n"),
        ]);
        let imported = tree(&[
            ("printer.cfg", "[include mcu.cfg]\n[printer]\nkinematics: corexy\n"),
            ("mcu.cfg", "[mcu]\nserial: /dev/y\nrestart_method: command\n"),
            ("backup/old.cfg", "[printer]\nkinematics: cartesian\n"),
        ]);
        let graph = BTreeMap::from([("printer.cfg".to_string(), vec!["mcu.cfg".to_string()])]);
        let report = compare(&generated, &imported, "printer.cfg", Some(&graph), &ParityOptions::default());

        let blocking: Vec<_> = report.findings.iter().filter(|f| f.is_blocking()).collect();
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].key.as_deref(), Some("restart_method"));
        let warnings: Vec<_> = report
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .map(|f| f.file.as_str())
            .collect();
        assert_eq!(warnings, vec!["leds.cfg"]);
    }
}
