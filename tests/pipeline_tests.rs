//! End-to-end tests: project record → synthesis → validation → parity.

use klipper_forge::bundles::{AddonBundle, BoardBundle, BundleRegistry, RegistryBuilder};
use klipper_forge::cancel::CancellationToken;
use klipper_forge::model::{AttributeModel, Category, ConfigTree};
use klipper_forge::parity::{ParityOptions, compare};
use klipper_forge::project::Project;
use klipper_forge::synthesis::{OutputLayout, SynthesisRequest, synthesize};
use klipper_forge::validation::{ValidationConfig, ValidationScope, validate};
use serde_json::json;

fn registry() -> BundleRegistry {
    let octopus = BoardBundle::new("octopus", "BTT Octopus", "stm32f446xx")
        .with_pin("x_step", "PF13")
        .with_pin("x_dir", "PF12")
        .with_pin("x_en", "PF14")
        .with_pin("x_uart", "PC4")
        .with_pin("led", "PB0");
    RegistryBuilder::new()
        .with_board(octopus)
        .with_addon(AddonBundle::new("exclude", "Exclude object", "addons/exclude.cfg.j2"))
        .with_template("addons/exclude.cfg.j2", "[exclude_object]\n")
        .build()
}

fn project_record() -> serde_json::Value {
    json!({
        "schema_version": 3,
        "output_layout": "modular",
        "machine_attributes": {
            "board": "octopus",
            "mcu": {"serial": "/dev/serial/by-id/usb-Klipper_stm32f446xx-if00"},
            "steppers": {
                "stepper_x": {
                    "step": "x_step",
                    "dir": "!x_dir",
                    "enable": "!x_en",
                    "driver": {"kind": "tmc2209", "uart": "x_uart", "run_current": 0.8}
                }
            },
            "leds": {"enabled": true, "pin": "PB0", "chain_count": 3},
            "addons": ["exclude"]
        }
    })
}

fn synthesized_tree(layout: OutputLayout) -> (ConfigTree, String) {
    let project = Project::load_value(&project_record())
        .expect("project loads")
        .project;
    let mut request = project.synthesis_request();
    request.layout = layout;
    let output = synthesize(&project.machine_attributes, &registry(), &request).expect("synthesis");
    assert!(output.is_complete(), "render failures: {:?}", output.failures);
    (output.tree(), output.root)
}

#[test]
fn modular_output_validates_clean() {
    let (tree, root) = synthesized_tree(OutputLayout::Modular);

    let report = validate(
        &tree,
        ValidationScope::Tree { root: &root },
        &ValidationConfig::default(),
        &CancellationToken::new(),
    )
    .unwrap();

    assert!(!report.has_blocking(), "unexpected findings: {:?}", report.findings);
    let stepper = tree
        .file("board_octopus.cfg")
        .and_then(|f| f.section("stepper_x"))
        .expect("stepper_x generated into the board file");
    assert_eq!(stepper.get("step_pin").unwrap().value, "PF13");
    assert_eq!(stepper.get("dir_pin").unwrap().value, "!PF12");
}

#[test]
fn minimal_board_and_led_addon_validate_without_findings() {
    let registry = RegistryBuilder::new()
        .with_board(BoardBundle::new("x", "Board X", "stm32f446xx").with_pin("step", "PA0"))
        .with_addon(AddonBundle::new("led_strip", "LED strip", "addons/led_strip.cfg.j2"))
        .with_template("addons/led_strip.cfg.j2", "[led strip]\npin: {{pin}}")
        .build();
    let mut attrs = AttributeModel::new("x").with_addon("led_strip");
    attrs.mcu.serial = Some("/dev/ttyACM0".into());
    attrs
        .addon_settings
        .entry("led_strip".into())
        .or_default()
        .insert("pin".into(), json!("PB1"));

    let output = synthesize(&attrs, &registry, &SynthesisRequest::new(OutputLayout::Modular)).unwrap();
    let paths: Vec<&str> = output.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["printer.cfg", "board_x.cfg", "led_strip.cfg"]);

    let tree = output.tree();
    let report = validate(
        &tree,
        ValidationScope::Tree { root: &output.root },
        &ValidationConfig::default(),
        &CancellationToken::new(),
    )
    .unwrap();
    assert!(report.findings.is_empty(), "unexpected findings: {:?}", report.findings);
}

#[test]
fn validation_is_deterministic() {
    let files: std::collections::BTreeMap<String, String> = [
        ("printer.cfg", "[include a.cfg]\n[include c.cfg]\n[printer]\nkinematics: corexy\nmax_velocity: 9000\n"),
        ("a.cfg", "[include b.cfg]\n[mcu]\nserial: /dev/ttyACM0\n"),
        ("b.cfg", "[include a.cfg]\n[stepper_x]\nstep_pin: PF13\n"),
        ("c.cfg", "[printer]\nmax_velocity: 300\n[mcu]\nserial: /dev/ttyACM1\n"),
        ("old/unused.cfg", "[printer]\nmax_velocity: abc\n"),
    ]
    .into_iter()
    .map(|(p, t)| (p.to_string(), t.to_string()))
    .collect();
    let scope = ValidationScope::Tree { root: "printer.cfg" };
    let config = ValidationConfig::default();

    let first = validate(&ConfigTree::from_imported(&files), scope, &config, &CancellationToken::new()).unwrap();
    let second = validate(&ConfigTree::from_imported(&files), scope, &config, &CancellationToken::new()).unwrap();

    for category in [
        Category::Cycle,
        Category::Conflict,
        Category::NumericRange,
        Category::Role,
        Category::Orphan,
    ] {
        assert!(first.by_category(category).count() > 0, "no {category:?} finding");
    }
    assert_eq!(first, second);
}

#[test]
fn generated_tree_has_parity_with_itself() {
    let (tree, root) = synthesized_tree(OutputLayout::Modular);
    let report = compare(&tree, &tree, &root, None, &ParityOptions::default());
    assert!(report.is_empty(), "unexpected findings: {:?}", report.findings);
}

#[test]
fn parity_reports_drift_from_imported_machine() {
    let (generated, root) = synthesized_tree(OutputLayout::Modular);

    let mut files = std::collections::BTreeMap::new();
    for path in generated.paths() {
        let text = klipper_forge::parser::write_sections(&generated.file(path).unwrap().sections);
        files.insert(path.to_string(), text);
    }
    let printer = files.get_mut("printer.cfg").unwrap();
    *printer = printer.replace("max_accel: 3000", "max_accel: 5000");
    let imported = ConfigTree::from_imported(&files);

    let report = compare(&generated, &imported, &root, None, &ParityOptions::default());
    let drift: Vec<_> = report.by_category(Category::Parity).collect();
    assert_eq!(drift.len(), 1);
    assert_eq!(drift[0].key.as_deref(), Some("max_accel"));
    assert!(drift[0].is_blocking());
}

#[test]
fn legacy_project_synthesizes_after_migration() {
    let legacy = json!({
        "board": "octopus",
        "kinematics": "corexy",
        "addons": ["exclude"],
        "advanced_overrides": {"mcu.serial": "/dev/ttyACM0", "motion.max_accel": 4000}
    });
    let loaded = Project::load_value(&legacy).unwrap();
    assert_eq!(loaded.outcome.from, 1);
    assert!(loaded.outcome.migrated());

    let project = loaded.project;
    assert_eq!(project.machine_attributes.mcu.serial.as_deref(), Some("/dev/ttyACM0"));
    assert_eq!(project.machine_attributes.motion.max_accel, 4000.0);

    let request = SynthesisRequest::new(OutputLayout::Modular);
    let output = synthesize(&project.machine_attributes, &registry(), &request).unwrap();
    let root = &output.file("printer.cfg").unwrap().content;
    assert!(root.contains("max_accel: 4000\n"));
    assert!(output.file("exclude.cfg").is_some());
}
