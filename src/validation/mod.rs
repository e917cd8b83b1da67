//! Multi-pass validator.
//!
//! Passes run in a fixed order: syntax, duplicate keys, roles and numeric
//! ranges, include graph, then cross-occurrence conflicts. Each pass
//! boundary is a cancellation point. Findings come back sorted by
//! (file, line, category).

pub mod conflicts;
pub mod rules;

pub use conflicts::{ConflictPolicy, KeyDivergence, KeySite, classify, divergences};
pub use rules::{NumericRange, default_ranges, merge_sections, required_keys};

use crate::cancel::{CancellationToken, Cancelled};
use crate::graph::{GraphOptions, IncludeGraph};
use crate::model::{Category, ConfigFile, ConfigTree, ValidationFinding, ValidationReport};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Knobs for a validation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    pub policy: ConflictPolicy,
    pub ranges: BTreeMap<String, NumericRange>,
    pub orphan_warnings: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            policy: ConflictPolicy::default(),
            ranges: default_ranges(),
            orphan_warnings: true,
        }
    }
}

impl ValidationConfig {
    pub fn with_allowlist<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.policy = ConflictPolicy::new(keys);
        self
    }

    fn graph_options(&self) -> GraphOptions {
        GraphOptions {
            orphan_warnings: self.orphan_warnings,
        }
    }
}

/// What is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationScope<'a> {
    /// A generated or edited tree rooted at `root`.
    Tree { root: &'a str },
    /// An imported machine: semantic passes only run once every literal
    /// include resolves.
    ImportedMachine { root: &'a str },
    /// One open file on its own: syntax, duplicate keys, roles and ranges.
    SingleFile { path: &'a str },
}

/// Validate `tree` in `scope`.
pub fn validate(
    tree: &ConfigTree,
    scope: ValidationScope<'_>,
    config: &ValidationConfig,
    cancel: &CancellationToken,
) -> Result<ValidationReport, Cancelled> {
    let mut report = ValidationReport::new();

    let files: Vec<&ConfigFile> = match scope {
        ValidationScope::SingleFile { path } => tree.file(path).into_iter().collect(),
        _ => tree.iter().map(|(_, parsed)| &parsed.file).collect(),
    };
    if let ValidationScope::SingleFile { path } = scope
        && files.is_empty()
    {
        report.push(ValidationFinding::blocking(
            Category::UnresolvedInclude,
            path,
            format!("file '{}' is not in the configuration tree", path),
        ));
        return Ok(report);
    }

    // Pass 1: syntax.
    cancel.check()?;
    for file in &files {
        if let Some(parsed) = tree.get(&file.path) {
            report.extend(parsed.issues.iter().map(|issue| {
                ValidationFinding::blocking(Category::Syntax, file.path.as_str(), issue.message.clone())
                    .with_line(issue.line)
            }));
        }
    }

    // Pass 2: duplicate keys.
    cancel.check()?;
    for file in &files {
        report.extend(rules::check_duplicate_keys(file));
    }

    let (graph, semantic_files) = match scope {
        ValidationScope::SingleFile { .. } => (None, files.clone()),
        ValidationScope::Tree { root } | ValidationScope::ImportedMachine { root } => {
            cancel.check()?;
            let graph = IncludeGraph::build(tree, root, config.graph_options(), cancel)?;
            let reachable: Vec<&ConfigFile> =
                graph.flatten().iter().filter_map(|p| tree.file(p)).collect();
            (Some(graph), reachable)
        }
    };

    let semantic = match (scope, &graph) {
        (ValidationScope::ImportedMachine { root }, Some(graph)) if graph.has_blocking_unresolved() => {
            info!(root, "Includes unresolved, skipping semantic checks");
            false
        }
        _ => true,
    };

    // Pass 3: roles (merged view) and numeric ranges.
    cancel.check()?;
    let merged = merge_sections(semantic_files.iter().copied());
    if semantic {
        report.extend(rules::check_roles(&merged));
        for file in &semantic_files {
            report.extend(rules::check_ranges(file, &config.ranges));
        }
    }

    // Pass 4: include graph.
    cancel.check()?;
    if let Some(graph) = graph {
        report.extend(graph.into_findings());

        // Pass 5: conflicts.
        cancel.check()?;
        if semantic {
            report.extend(classify(&merged, &config.policy));
        }
    }

    report.sort();
    debug!(
        files = files.len(),
        findings = report.len(),
        blocking = report.blocking_count(),
        "Validation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Provenance, Severity};
    use std::collections::BTreeMap;

    fn tree(files: &[(&str, &str)]) -> ConfigTree {
        let map: BTreeMap<String, String> = files
            .iter()
            .map(|(p, t)| (p.to_string(), t.to_string()))
            .collect();
        ConfigTree::from_imported(&map)
    }

    const PRINTER: &str = "[include mcu.cfg]\n[printer]\nkinematics: corexy\nmax_velocity: 300\nmax_accel: 3000\n";
    const MCU: &str = "[mcu]\nserial: /dev/serial/by-id/usb-Klipper\n";

    #[test]
    fn test_clean_tree() {
        let t = tree(&[("printer.cfg", PRINTER), ("mcu.cfg", MCU)]);
        let report = validate(
            &t,
            ValidationScope::Tree { root: "printer.cfg" },
            &ValidationConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(report.is_empty(), "{:?}", report);
    }

    #[test]
    fn test_findings_sorted() {
        let t = tree(&[
            ("printer.cfg", "[include mcu.cfg]\n[include missing.cfg]\n[printer]\nmax_velocity: 9000\n"),
            ("mcu.cfg", "[mcu]\nserial: a\nserial: b\n"),
        ]);
        let report = validate(
            &t,
            ValidationScope::Tree { root: "printer.cfg" },
            &ValidationConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        let summary: Vec<(&str, Option<usize>, Category)> = report
            .findings
            .iter()
            .map(|f| (f.file.as_str(), f.line, f.category))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("mcu.cfg", Some(3), Category::DuplicateKey),
                ("printer.cfg", Some(2), Category::UnresolvedInclude),
                ("printer.cfg", Some(3), Category::Role),
                ("printer.cfg", Some(4), Category::NumericRange),
            ]
        );
        assert_eq!(report.findings[3].severity, Severity::Warning);
    }

    #[test]
    fn test_imported_machine_requires_resolution() {
        let t = tree(&[("printer.cfg", "[include gone.cfg]\n[printer]\n")]);
        let cancel = CancellationToken::new();
        let config = ValidationConfig::default();

        let imported = validate(&t, ValidationScope::ImportedMachine { root: "printer.cfg" }, &config, &cancel).unwrap();
        assert_eq!(imported.by_category(Category::Role).count(), 0);
        assert_eq!(imported.by_category(Category::UnresolvedInclude).count(), 1);

        let generated = validate(&t, ValidationScope::Tree { root: "printer.cfg" }, &config, &cancel).unwrap();
        assert_eq!(generated.by_category(Category::Role).count(), 1);
    }

    #[test]
    fn test_single_file_skips_graph() {
        let t = tree(&[("printer.cfg", "[include nowhere.cfg]\n[stepper_x]\nstep_pin: PF13\n")]);
        let report = validate(
            &t,
            ValidationScope::SingleFile { path: "printer.cfg" },
            &ValidationConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(report.by_category(Category::UnresolvedInclude).count(), 0);
        assert_eq!(report.by_category(Category::Role).count(), 2);
    }

    #[test]
    fn test_conflicts_with_allowlist() {
        let t = tree(&[
            ("printer.cfg", "[include tuning.cfg]\n[printer]\nkinematics: corexy\nmax_accel: 3000\n"),
            ("tuning.cfg", "[printer]\nmax_accel: 5000\n"),
        ]);
        let cancel = CancellationToken::new();
        let scope = ValidationScope::Tree { root: "printer.cfg" };

        let strict = validate(&t, scope, &ValidationConfig::default(), &cancel).unwrap();
        assert_eq!(strict.blocking_count(), 1);

        let relaxed = validate(&t, scope, &ValidationConfig::default().with_allowlist(["max_accel"]), &cancel).unwrap();
        assert_eq!(relaxed.blocking_count(), 0);
        assert_eq!(relaxed.count(Severity::Info), 1);
    }

    #[test]
    fn test_cancelled_run_returns_no_findings() {
        let mut t = ConfigTree::new();
        t.insert_text("printer.cfg", "[printer]\nmax_velocity: oops\n", Provenance::Imported);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = validate(&t, ValidationScope::Tree { root: "printer.cfg" }, &ValidationConfig::default(), &cancel);
        assert_eq!(result, Err(Cancelled));
    }
}
