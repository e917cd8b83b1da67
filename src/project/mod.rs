//! Persisted project records.
//!
//! A project is the attribute model plus everything that shapes synthesis:
//! output layout, per-add-on configs, and (for imported machines) where each
//! section came from. Records are JSON with a `schema_version`; older
//! records are migrated on load, see [`migrations`].

pub mod migrations;

pub use migrations::{
    CURRENT_SCHEMA_VERSION, LEGACY_SCHEMA_VERSION, Migration, MigrationOutcome, MigrationRegistry,
    SchemaVersion, build_default_registry, detect_version, upgrade,
};

use crate::error::SchemaMigrationError;
use crate::graph::IncludeGraph;
use crate::model::{AttributeModel, ConfigTree};
use crate::synthesis::{OutputLayout, SynthesisRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

fn default_root_file() -> String {
    "printer.cfg".to_string()
}

fn default_schema_version() -> SchemaVersion {
    CURRENT_SCHEMA_VERSION
}

/// Per-add-on configuration stored with the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonConfig {
    pub id: String,
    /// `false` skips the add-on even if the attribute model enables it.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Files the add-on's generated config pulls in.
    #[serde(default)]
    pub include_files: Vec<String>,
    /// Section id → key → value, applied on top of the add-on's output.
    #[serde(default)]
    pub sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl AddonConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            include_files: Vec::new(),
            sections: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default = "default_schema_version")]
    pub schema_version: SchemaVersion,
    #[serde(default)]
    pub output_layout: OutputLayout,
    #[serde(default)]
    pub machine_attributes: AttributeModel,
    #[serde(default)]
    pub addon_configs: Vec<AddonConfig>,
    /// Section id → file it came from (imported machines).
    #[serde(default)]
    pub section_map: BTreeMap<String, String>,
    #[serde(default = "default_root_file")]
    pub root_file: String,
    /// Recorded include graph: file → files it includes.
    #[serde(default)]
    pub include_graph: BTreeMap<String, Vec<String>>,
    /// Data with no typed home, kept so saves never lose it.
    #[serde(default)]
    pub passthrough: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A project and what the load did to get it.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedProject {
    pub project: Project,
    pub outcome: MigrationOutcome,
}

impl Project {
    pub fn new(machine_attributes: AttributeModel) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            output_layout: OutputLayout::default(),
            machine_attributes,
            addon_configs: Vec::new(),
            section_map: BTreeMap::new(),
            root_file: default_root_file(),
            include_graph: BTreeMap::new(),
            passthrough: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Parse and migrate a JSON project record.
    pub fn load_str(text: &str) -> Result<LoadedProject, SchemaMigrationError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| SchemaMigrationError::Parse(e.to_string()))?;
        Self::load_value(&value)
    }

    /// Migrate a decoded record. All or nothing: on error no partially
    /// migrated project is produced.
    pub fn load_value(value: &Value) -> Result<LoadedProject, SchemaMigrationError> {
        let registry = build_default_registry();
        let (migrated, outcome) = upgrade(&registry, value)?;
        let project: Project = serde_json::from_value(migrated)
            .map_err(|e| SchemaMigrationError::InvalidRecord(e.to_string()))?;
        Ok(LoadedProject { project, outcome })
    }

    /// Pretty JSON with sorted keys, always at the current schema version.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "schema_version".to_string(),
                Value::from(CURRENT_SCHEMA_VERSION),
            );
        }
        let mut text = serde_json::to_string_pretty(&value)?;
        text.push('\n');
        Ok(text)
    }

    pub fn addon_config(&self, id: &str) -> Option<&AddonConfig> {
        self.addon_configs.iter().find(|c| c.id == id)
    }

    /// Config for `id`, created (enabled, empty) if absent.
    pub fn addon_config_mut(&mut self, id: &str) -> &mut AddonConfig {
        let index = match self.addon_configs.iter().position(|c| c.id == id) {
            Some(index) => index,
            None => {
                self.addon_configs.push(AddonConfig::new(id));
                self.addon_configs.len() - 1
            }
        };
        &mut self.addon_configs[index]
    }

    /// Record an imported tree's structure: root, include graph, and the
    /// file each section id first appears in (walk order, then the rest
    /// sorted). Switches the project to the source-tree layout.
    pub fn record_import(&mut self, tree: &ConfigTree, graph: &IncludeGraph) {
        self.root_file = graph.root().to_string();
        self.include_graph = graph.recorded();
        self.output_layout = OutputLayout::SourceTree;
        self.section_map.clear();

        let walked = graph.flatten().iter().map(String::as_str);
        let rest = tree.paths().filter(|p| !graph.flatten().iter().any(|w| w == p));
        for path in walked.chain(rest) {
            let Some(file) = tree.file(path) else {
                continue;
            };
            for section in file.content_sections() {
                self.section_map
                    .entry(section.id())
                    .or_insert_with(|| path.to_string());
            }
        }
    }

    /// Synthesis request for this project, using its stored layout.
    pub fn synthesis_request(&self) -> SynthesisRequest {
        let mut request =
            SynthesisRequest::new(self.output_layout).with_root_file(self.root_file.clone());
        request.addon_configs = self.addon_configs.clone();
        request.section_map = self.section_map.clone();
        request.include_graph = self.include_graph.clone();
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_save_load_current() {
        let mut project = Project::new(AttributeModel::new("octopus").with_addon("kamp"));
        project.addon_config_mut("kamp").include_files.push("KAMP/Adaptive_Meshing.cfg".into());
        project.passthrough.insert("notes".into(), json!({"owner": "shop"}));

        let text = project.to_json_pretty().unwrap();
        assert!(text.find("\"addon_configs\"").unwrap() < text.find("\"machine_attributes\"").unwrap());

        let loaded = Project::load_str(&text).unwrap();
        assert!(!loaded.outcome.migrated());
        assert_eq!(loaded.project, project);
    }

    #[test]
    fn test_unknown_top_level_keys_survive() {
        let record = json!({"schema_version": 3, "machine_attributes": {"board": "octopus"}, "workspace": "bench"});
        let loaded = Project::load_value(&record).unwrap();
        assert_eq!(loaded.project.extra["workspace"], "bench");
        let text = loaded.project.to_json_pretty().unwrap();
        assert!(text.contains("\"workspace\": \"bench\""));
    }

    #[test]
    fn test_legacy_load() {
        let record = json!({
            "board": "octopus",
            "addons": ["kamp"],
            "leds": {"enabled": true, "pin": "PB0", "chain_count": 3}
        });
        let loaded = Project::load_value(&record).unwrap();
        assert_eq!(loaded.outcome.from, 1);
        let project = loaded.project;
        assert_eq!(project.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(project.machine_attributes.board, "octopus");
        assert_eq!(project.machine_attributes.leds.chain_count, 3);
        assert_eq!(project.output_layout, OutputLayout::SourceTree);
        // learnable add-ons are listed but stay disabled
        assert_eq!(project.addon_configs[0].id, "kamp");
        assert!(!project.addon_configs[0].enabled);
    }

    #[test]
    fn test_invalid_record_rejected() {
        assert!(matches!(
            Project::load_str("{not json"),
            Err(SchemaMigrationError::Parse(_))
        ));
        let record = json!({"schema_version": 3, "machine_attributes": {"dimensions": {"x": "wide"}}});
        assert!(matches!(
            Project::load_value(&record),
            Err(SchemaMigrationError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_record_import() {
        use crate::cancel::CancellationToken;
        use crate::graph::GraphOptions;

        let files: BTreeMap<String, String> = [
            ("config/printer.cfg", "[include mcu.cfg]\n[printer]\nkinematics: corexy\n"),
            ("config/mcu.cfg", "[mcu]\nserial: /dev/x\n[printer]\nmax_accel: 3000\n"),
            ("config/spare.cfg", "[fan]\npin: PA8\n"),
        ]
        .into_iter()
        .map(|(p, t)| (p.to_string(), t.to_string()))
        .collect();
        let tree = ConfigTree::from_imported(&files);
        let graph = IncludeGraph::build(&tree, "config/printer.cfg", GraphOptions::default(), &CancellationToken::new()).unwrap();

        let mut project = Project::new(AttributeModel::new("octopus"));
        project.output_layout = OutputLayout::Modular;
        project.record_import(&tree, &graph);

        assert_eq!(project.root_file, "config/printer.cfg");
        assert_eq!(project.output_layout, OutputLayout::SourceTree);
        assert_eq!(project.include_graph["config/printer.cfg"], vec!["config/mcu.cfg"]);
        assert_eq!(project.section_map["printer"], "config/printer.cfg");
        assert_eq!(project.section_map["mcu"], "config/mcu.cfg");
        assert_eq!(project.section_map["fan"], "config/spare.cfg");
    }

    #[test]
    fn test_synthesis_request_carries_project_state() {
        let mut project = Project::new(AttributeModel::new("octopus"));
        project.output_layout = OutputLayout::Modular;
        project.root_file = "config/printer.cfg".into();
        project.section_map.insert("mcu".into(), "config/mcu.cfg".into());
        let request = project.synthesis_request();
        assert_eq!(request.layout, OutputLayout::Modular);
        assert_eq!(request.root_file, "config/printer.cfg");
        assert_eq!(request.section_map["mcu"], "config/mcu.cfg");
    }
}
