//! Derive add-on bundles from an imported machine's files.
//!
//! Recognizes KAMP, Stealthburner LED and timelapse packages and turns each
//! into a multi-file add-on whose templates are the imported texts verbatim.
//! Nothing is written to disk; the caller decides where learned bundles live.

use super::records::AddonBundle;
use super::registry::RegistryBuilder;
use heck::ToTitleCase;
use std::collections::BTreeMap;
use tracing::info;

pub const LEARNABLE_ADDONS: [&str; 3] = ["kamp", "stealthburner_leds", "timelapse"];

/// Learned records plus the template texts they reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearnedBundles {
    pub addons: Vec<AddonBundle>,
    pub templates: BTreeMap<String, String>,
}

impl LearnedBundles {
    pub fn is_empty(&self) -> bool {
        self.addons.is_empty()
    }

    /// Register everything with a builder, after whatever it already holds.
    pub fn apply(self, mut builder: RegistryBuilder) -> RegistryBuilder {
        for (reference, text) in self.templates {
            builder = builder.with_template(reference, text);
        }
        for addon in self.addons {
            builder = builder.with_addon(addon);
        }
        builder
    }
}

fn clean(path: &str) -> String {
    path.replace('\\', "/").trim().trim_start_matches('/').to_string()
}

/// Output path for an imported file: the `config/` prefix is dropped.
fn output_path(path: &str) -> String {
    let cleaned = clean(path);
    match cleaned.split_once('/') {
        Some((head, rest)) if head.eq_ignore_ascii_case("config") => rest.to_string(),
        _ => cleaned,
    }
}

fn classify(path: &str) -> Option<&'static str> {
    let lowered = clean(path).to_lowercase();
    if lowered.contains("/kamp/") || lowered.starts_with("kamp/") || lowered.ends_with("kamp_settings.cfg") {
        Some("kamp")
    } else if lowered.ends_with("stealthburner_leds.cfg") {
        Some("stealthburner_leds")
    } else if lowered.ends_with("timelapse.cfg") {
        Some("timelapse")
    } else {
        None
    }
}

fn canonical_file(addon_id: &str) -> &'static str {
    match addon_id {
        "kamp" => "kamp_settings.cfg",
        "stealthburner_leds" => "stealthburner_leds.cfg",
        _ => "timelapse.cfg",
    }
}

/// Learn add-on bundles from `files` (path → text). `origin` names the
/// imported machine in each bundle's description.
pub fn learn_from_import(files: &BTreeMap<String, String>, origin: &str) -> LearnedBundles {
    let mut grouped: BTreeMap<&'static str, BTreeMap<String, &str>> = BTreeMap::new();
    for (path, text) in files {
        if let Some(addon_id) = classify(path) {
            grouped
                .entry(addon_id)
                .or_default()
                .insert(output_path(path), text.as_str());
        }
    }

    let mut learned = LearnedBundles::default();
    for addon_id in LEARNABLE_ADDONS {
        let Some(outputs) = grouped.remove(addon_id) else {
            continue;
        };

        let mut addon = AddonBundle::new(
            addon_id,
            format!("{} (Learned)", addon_id.to_title_case()),
            "",
        );
        addon.description = format!("Learned from imported machine profile '{}'.", origin);
        addon.learned = true;

        for (output, text) in &outputs {
            let reference = format!("addons/learned/{}/{}.j2", addon_id, output);
            learned.templates.insert(reference.clone(), (*text).to_string());
            addon.package_templates.insert(output.clone(), reference);
            addon.output_files.push(output.clone());
        }

        let canonical = canonical_file(addon_id);
        let include = outputs
            .keys()
            .find(|p| p.eq_ignore_ascii_case(canonical))
            .or_else(|| outputs.keys().next())
            .cloned();
        if let Some(include) = include {
            if let Some(reference) = addon.package_templates.get(&include) {
                addon.template = reference.clone();
            }
            addon.include_files.push(include);
        }

        info!(addon = addon_id, files = outputs.len(), "Learned add-on bundle");
        learned.addons.push(addon);
    }
    learned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(p, t)| (p.to_string(), t.to_string()))
            .collect()
    }

    #[test]
    fn test_detects_kamp_package() {
        let imported = files(&[
            ("config/KAMP/Adaptive_Meshing.cfg", "[gcode_macro BED_MESH_CALIBRATE]\n"),
            ("config/KAMP_Settings.cfg", "[include ./KAMP/Adaptive_Meshing.cfg]\n"),
            ("config/printer.cfg", "[printer]\n"),
        ]);
        let learned = learn_from_import(&imported, "trident");
        assert_eq!(learned.addons.len(), 1);

        let kamp = &learned.addons[0];
        assert_eq!(kamp.id, "kamp");
        assert_eq!(kamp.label, "Kamp (Learned)");
        assert!(kamp.learned);
        assert_eq!(kamp.include_files, vec!["KAMP_Settings.cfg"]);
        assert_eq!(
            kamp.package_templates["KAMP/Adaptive_Meshing.cfg"],
            "addons/learned/kamp/KAMP/Adaptive_Meshing.cfg.j2"
        );
        assert_eq!(kamp.template, "addons/learned/kamp/KAMP_Settings.cfg.j2");
        assert_eq!(
            learned.templates["addons/learned/kamp/KAMP_Settings.cfg.j2"],
            "[include ./KAMP/Adaptive_Meshing.cfg]\n"
        );
    }

    #[test]
    fn test_label_title_case_and_order() {
        let imported = files(&[
            ("timelapse.cfg", "[timelapse]\n"),
            ("stealthburner_leds.cfg", "[neopixel sb_leds]\n"),
        ]);
        let learned = learn_from_import(&imported, "v2");
        let labels: Vec<&str> = learned.addons.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(labels, vec!["Stealthburner Leds (Learned)", "Timelapse (Learned)"]);
    }

    #[test]
    fn test_nothing_learned_from_plain_tree() {
        let learned = learn_from_import(&files(&[("printer.cfg", "[printer]\n")]), "x");
        assert!(learned.is_empty());
    }

    #[test]
    fn test_apply_registers_addons_and_templates() {
        let learned = learn_from_import(&files(&[("timelapse.cfg", "[timelapse]\n")]), "x");
        let registry = learned.apply(RegistryBuilder::new()).build();
        let addon = registry.addon("timelapse").unwrap();
        assert_eq!(registry.template(&addon.template), Some("[timelapse]\n"));
    }
}
