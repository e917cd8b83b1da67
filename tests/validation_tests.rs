//! Validation of imported configuration trees.

use klipper_forge::cancel::{CancellationToken, Cancelled};
use klipper_forge::model::{Category, ConfigTree, Severity};
use klipper_forge::validation::{ValidationConfig, ValidationScope, validate};
use std::collections::BTreeMap;

fn tree(files: &[(&str, &str)]) -> ConfigTree {
    let map: BTreeMap<String, String> = files
        .iter()
        .map(|(p, t)| (p.to_string(), t.to_string()))
        .collect();
    ConfigTree::from_imported(&map)
}

fn run(tree: &ConfigTree, scope: ValidationScope<'_>, config: &ValidationConfig) -> klipper_forge::model::ValidationReport {
    validate(tree, scope, config, &CancellationToken::new()).expect("not cancelled")
}

const PRINTER: &str = "[include mcu.cfg]\n[include macros/*.cfg]\n[printer]\nkinematics: corexy\nmax_velocity: 300\nmax_accel: 3000\n";
const MCU: &str = "[mcu]\nserial: /dev/serial/by-id/usb-Klipper\n";

#[test]
fn well_formed_machine_has_no_findings() {
    let machine = tree(&[
        ("config/printer.cfg", PRINTER),
        ("config/mcu.cfg", MCU),
        ("config/macros/start.cfg", "[gcode_macro START]\ngcode:\n  G28\n"),
    ]);
    let report = run(
        &machine,
        ValidationScope::ImportedMachine { root: "config/printer.cfg" },
        &ValidationConfig::default(),
    );
    assert!(report.is_empty(), "unexpected findings: {:?}", report.findings);
}

#[test]
fn include_cycle_is_reported_once() {
    let machine = tree(&[
        ("printer.cfg", "[include a.cfg]\n[printer]\nkinematics: corexy\n"),
        ("a.cfg", "[include b.cfg]\n"),
        ("b.cfg", "[include a.cfg]\n[mcu]\nserial: /dev/ttyACM0\n"),
    ]);
    let report = run(
        &machine,
        ValidationScope::Tree { root: "printer.cfg" },
        &ValidationConfig::default(),
    );
    let cycles: Vec<_> = report.by_category(Category::Cycle).collect();
    assert_eq!(cycles.len(), 1);
    assert!(cycles[0].message.contains("a.cfg -> b.cfg -> a.cfg"));
    assert!(cycles[0].is_blocking());
}

#[test]
fn unresolved_literal_include_skips_semantic_checks_for_imports() {
    // [stepper_x] lacks every pin; with a dangling include that is not reported.
    let machine = tree(&[
        ("printer.cfg", "[include missing.cfg]\n[printer]\nkinematics: corexy\n[stepper_x]\nmicrosteps: 16\n"),
    ]);
    let imported = run(
        &machine,
        ValidationScope::ImportedMachine { root: "printer.cfg" },
        &ValidationConfig::default(),
    );
    assert_eq!(imported.by_category(Category::UnresolvedInclude).count(), 1);
    assert_eq!(imported.by_category(Category::Role).count(), 0);

    let generated = run(
        &machine,
        ValidationScope::Tree { root: "printer.cfg" },
        &ValidationConfig::default(),
    );
    assert!(generated.by_category(Category::Role).count() > 0);
}

#[test]
fn empty_wildcard_is_a_warning() {
    let machine = tree(&[("printer.cfg", PRINTER), ("mcu.cfg", MCU)]);
    let report = run(
        &machine,
        ValidationScope::Tree { root: "printer.cfg" },
        &ValidationConfig::default(),
    );
    assert!(!report.has_blocking(), "{:?}", report.findings);
    let unresolved: Vec<_> = report.by_category(Category::UnresolvedInclude).collect();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].severity, Severity::Warning);
}

#[test]
fn conflicting_values_block_unless_allowlisted() {
    let machine = tree(&[
        ("printer.cfg", "[include overrides.cfg]\n[printer]\nkinematics: corexy\nmax_accel: 3000\n"),
        ("overrides.cfg", "[printer]\nmax_accel: 5000\n[mcu]\nserial: /dev/ttyACM0\n"),
    ]);
    let scope = ValidationScope::Tree { root: "printer.cfg" };

    let strict = run(&machine, scope, &ValidationConfig::default());
    let conflicts: Vec<_> = strict.by_category(Category::Conflict).collect();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].key.as_deref(), Some("max_accel"));
    assert!(conflicts[0].is_blocking());

    let relaxed = run(
        &machine,
        scope,
        &ValidationConfig::default().with_allowlist(["MAX_ACCEL"]),
    );
    assert!(!relaxed.has_blocking(), "{:?}", relaxed.findings);
    let allowlisted: Vec<_> = relaxed.by_category(Category::Conflict).collect();
    assert_eq!(allowlisted.len(), 1);
    assert!(allowlisted[0].allowlisted);
}

#[test]
fn orphan_files_warn_only_when_enabled() {
    let machine = tree(&[
        ("printer.cfg", "[include mcu.cfg]\n[printer]\nkinematics: corexy\n"),
        ("mcu.cfg", MCU),
        ("old/backup.cfg", "[printer]\nkinematics: cartesian\n"),
    ]);
    let scope = ValidationScope::Tree { root: "printer.cfg" };

    let report = run(&machine, scope, &ValidationConfig::default());
    let orphans: Vec<_> = report.by_category(Category::Orphan).collect();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].file, "old/backup.cfg");
    // unreachable files do not take part in conflict detection
    assert_eq!(report.by_category(Category::Conflict).count(), 0);

    let quiet = ValidationConfig {
        orphan_warnings: false,
        ..ValidationConfig::default()
    };
    assert_eq!(run(&machine, scope, &quiet).by_category(Category::Orphan).count(), 0);
}

#[test]
fn unreachable_files_are_not_range_checked() {
    let machine = tree(&[
        ("printer.cfg", "[include mcu.cfg]\n[printer]\nkinematics: corexy\nmax_velocity: 300\nmax_accel: 3000\n"),
        ("mcu.cfg", MCU),
        ("old/backup.cfg", "[printer]\nmax_velocity: 9000\n"),
    ]);
    let report = run(
        &machine,
        ValidationScope::Tree { root: "printer.cfg" },
        &ValidationConfig::default(),
    );
    let orphans: Vec<_> = report.by_category(Category::Orphan).collect();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].severity, Severity::Warning);
    assert_eq!(report.by_category(Category::NumericRange).count(), 0);
    assert!(!report.has_blocking());
}

#[test]
fn single_file_scope_checks_ranges_without_graph() {
    let machine = tree(&[(
        "steppers.cfg",
        "[include nowhere.cfg]\n[stepper_x]\nstep_pin: PF13\ndir_pin: PF12\nenable_pin: !PF14\nmicrosteps: 512\nrotation_distance: 0\n",
    )]);
    let report = run(
        &machine,
        ValidationScope::SingleFile { path: "steppers.cfg" },
        &ValidationConfig::default(),
    );
    assert_eq!(report.by_category(Category::UnresolvedInclude).count(), 0);
    let keys: Vec<_> = report
        .by_category(Category::NumericRange)
        .filter_map(|f| f.key.as_deref())
        .collect();
    assert_eq!(keys, vec!["microsteps", "rotation_distance"]);
    assert!(
        report
            .by_category(Category::NumericRange)
            .all(|f| f.severity == Severity::Warning)
    );
    assert!(!report.has_blocking());

    let missing = run(
        &machine,
        ValidationScope::SingleFile { path: "absent.cfg" },
        &ValidationConfig::default(),
    );
    assert_eq!(missing.blocking_count(), 1);
}

#[test]
fn cancelled_validation_returns_no_report() {
    let machine = tree(&[("printer.cfg", PRINTER), ("mcu.cfg", MCU)]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = validate(
        &machine,
        ValidationScope::Tree { root: "printer.cfg" },
        &ValidationConfig::default(),
        &cancel,
    );
    assert_eq!(result, Err(Cancelled));
}
