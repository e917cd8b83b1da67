//! Layout planning: which files exist, in what order, and who includes whom.
//!
//! The planner only decides structure. Content is filled in by the
//! synthesizer once the plan is fixed, so two runs over identical inputs
//! produce identical file lists and identical include text.

use crate::bundles::{AddonBundle, BoardBundle};
use crate::graph::flatten_recorded;
use crate::model::normalize_path;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Physical decomposition of generated files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    /// Mirror the file boundaries recorded from an imported tree.
    #[default]
    SourceTree,
    /// One file per concern under a synthesized root.
    Modular,
}

impl std::str::FromStr for OutputLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "source_tree" => Ok(OutputLayout::SourceTree),
            "modular" => Ok(OutputLayout::Modular),
            _ => Err(format!(
                "Invalid layout '{}'. Valid options: source_tree, modular",
                s
            )),
        }
    }
}

impl std::fmt::Display for OutputLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputLayout::SourceTree => write!(f, "source_tree"),
            OutputLayout::Modular => write!(f, "modular"),
        }
    }
}

/// What fills a planned file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubSource {
    Root,
    Board(String),
    Toolhead(String),
    /// One rendered add-on template.
    Addon { id: String, template: String },
    Leds,
    /// Source-tree file receiving routed sections.
    Routed,
}

/// A planned file: its path, what fills it, and the include directives it
/// opens with (paths relative to the file itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStub {
    pub path: String,
    pub source: StubSource,
    pub includes: Vec<String>,
}

impl FileStub {
    fn new(path: String, source: StubSource) -> Self {
        Self {
            path,
            source,
            includes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPlan {
    pub layout: OutputLayout,
    pub root: String,
    /// Root first.
    pub files: Vec<FileStub>,
}

impl LayoutPlan {
    pub fn root_stub(&self) -> &FileStub {
        &self.files[0]
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }
}

/// An enabled add-on and the files the root should include for it.
#[derive(Debug, Clone, Copy)]
pub struct ActiveAddon<'a> {
    pub bundle: &'a AddonBundle,
    /// Overrides the bundle's own `include_files` when non-empty.
    pub include_files: &'a [String],
}

/// Resolved inputs of a modular plan.
#[derive(Debug, Clone)]
pub struct ModularInput<'a> {
    pub root: &'a str,
    pub board: &'a BoardBundle,
    pub toolhead: Option<&'a BoardBundle>,
    pub addons: Vec<ActiveAddon<'a>>,
    pub leds: bool,
}

fn sibling(root: &str, name: &str) -> String {
    match root.rfind('/') {
        Some(idx) => normalize_path(&format!("{}/{}", &root[..idx], name)),
        None => normalize_path(name),
    }
}

/// Board first, toolhead second, add-ons in enabling order, LEDs last.
pub fn plan_modular(input: &ModularInput<'_>) -> LayoutPlan {
    let root = normalize_path(input.root);
    let mut files = vec![FileStub::new(root.clone(), StubSource::Root)];
    let mut includes: Vec<String> = Vec::new();
    let mut planned: BTreeSet<String> = BTreeSet::from([root.clone()]);

    let mut add = |files: &mut Vec<FileStub>, name: String, source: StubSource| -> bool {
        let path = sibling(&root, &name);
        if planned.insert(path.clone()) {
            files.push(FileStub::new(path, source));
            true
        } else {
            false
        }
    };

    let board_file = format!("board_{}.cfg", input.board.id);
    if add(&mut files, board_file.clone(), StubSource::Board(input.board.id.clone())) {
        includes.push(board_file);
    }

    if let Some(toolhead) = input.toolhead {
        let name = format!("toolhead_{}.cfg", toolhead.id);
        if add(&mut files, name.clone(), StubSource::Toolhead(toolhead.id.clone())) {
            includes.push(name);
        }
    }

    for addon in &input.addons {
        let bundle = addon.bundle;
        if !bundle.is_package() {
            let name = format!("{}.cfg", bundle.id);
            let source = StubSource::Addon {
                id: bundle.id.clone(),
                template: bundle.template_ref(),
            };
            if add(&mut files, name.clone(), source) {
                includes.push(name);
            }
            continue;
        }

        let mut outputs = Vec::new();
        for (output, template) in &bundle.package_templates {
            let source = StubSource::Addon {
                id: bundle.id.clone(),
                template: template.clone(),
            };
            if add(&mut files, output.clone(), source) {
                outputs.push(normalize_path(output));
            }
        }
        let wanted: Vec<String> = if !addon.include_files.is_empty() {
            addon.include_files.iter().map(|p| normalize_path(p)).collect()
        } else if !bundle.include_files.is_empty() {
            bundle.include_files.iter().map(|p| normalize_path(p)).collect()
        } else {
            outputs
        };
        for include in wanted {
            if !includes.contains(&include) {
                includes.push(include);
            }
        }
    }

    if input.leds && add(&mut files, "leds.cfg".to_string(), StubSource::Leds) {
        includes.push("leds.cfg".to_string());
    }

    files[0].includes = includes;
    LayoutPlan {
        layout: OutputLayout::Modular,
        root,
        files,
    }
}

/// Recorded source-tree provenance.
#[derive(Debug, Clone, Copy)]
pub struct SourceTreeInput<'a> {
    pub root: &'a str,
    /// Section id → file path.
    pub section_map: &'a BTreeMap<String, String>,
    /// File → ordered include targets.
    pub include_graph: &'a BTreeMap<String, Vec<String>>,
    /// Where sections without a recorded origin go. Defaults to the root.
    pub default_file: Option<&'a str>,
}

impl SourceTreeInput<'_> {
    /// File a section is written to.
    pub fn route(&self, section_id: &str) -> String {
        let id = section_id.trim().to_lowercase();
        self.section_map
            .get(&id)
            .or_else(|| self.section_map.get(section_id))
            .map(|p| normalize_path(p))
            .or_else(|| self.default_file.map(normalize_path))
            .unwrap_or_else(|| normalize_path(self.root))
    }
}

/// Order `files` (plus the root) by a depth-first flatten of the recorded
/// include graph, then the rest sorted. Recorded includes between planned
/// files are kept; planned files the graph does not reach are included from
/// the root.
pub fn plan_source_tree(input: &SourceTreeInput<'_>, files: &BTreeSet<String>) -> LayoutPlan {
    let root = normalize_path(input.root);
    let mut planned: BTreeSet<String> = files.iter().map(|p| normalize_path(p)).collect();
    planned.insert(root.clone());

    let mut restricted: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (from, targets) in input.include_graph {
        let from = normalize_path(from);
        if !planned.contains(&from) {
            continue;
        }
        let kept = restricted.entry(from).or_default();
        for target in targets {
            let target = normalize_path(target);
            if planned.contains(&target) && !kept.contains(&target) {
                kept.push(target);
            }
        }
    }

    let reached = flatten_recorded(&restricted, &root);
    let reached_set: BTreeSet<&str> = reached.iter().map(String::as_str).collect();
    let unreached: Vec<String> = planned
        .iter()
        .filter(|p| !reached_set.contains(p.as_str()))
        .cloned()
        .collect();

    let mut stubs = Vec::new();
    for path in reached.iter().chain(unreached.iter()) {
        let source = if *path == root {
            StubSource::Root
        } else {
            StubSource::Routed
        };
        let mut stub = FileStub::new(path.clone(), source);
        stub.includes = restricted
            .get(path)
            .into_iter()
            .flatten()
            .map(|t| relative_include(path, t))
            .collect();
        if *path == root {
            stub.includes
                .extend(unreached.iter().map(|t| relative_include(&root, t)));
        }
        stubs.push(stub);
    }

    LayoutPlan {
        layout: OutputLayout::SourceTree,
        root,
        files: stubs,
    }
}

/// Include text that reaches `target` from `from_file`'s directory.
pub fn relative_include(from_file: &str, target: &str) -> String {
    if target.starts_with('/') {
        return target.to_string();
    }
    let from_dir: Vec<&str> = match from_file.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    let target_parts: Vec<&str> = target.split('/').collect();
    let target_dir = &target_parts[..target_parts.len().saturating_sub(1)];
    let common = from_dir
        .iter()
        .zip(target_dir)
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = vec![".."; from_dir.len() - common];
    parts.extend(&target_parts[common..]);
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addon(id: &str) -> AddonBundle {
        AddonBundle::new(id, id, "")
    }

    #[test]
    fn test_modular_order() {
        let board = BoardBundle::new("octopus", "Octopus", "stm32f446xx");
        let ebb = BoardBundle::new("ebb36", "EBB36", "stm32g0b1xx");
        let led = addon("led_effect");
        let mut kamp = addon("kamp");
        kamp.package_templates.insert("KAMP/Line_Purge.cfg".into(), "t/line.j2".into());
        kamp.package_templates.insert("KAMP_Settings.cfg".into(), "t/settings.j2".into());
        kamp.include_files = vec!["KAMP_Settings.cfg".into()];

        let input = ModularInput {
            root: "printer.cfg",
            board: &board,
            toolhead: Some(&ebb),
            addons: vec![
                ActiveAddon { bundle: &led, include_files: &[] },
                ActiveAddon { bundle: &kamp, include_files: &[] },
            ],
            leds: true,
        };
        let plan = plan_modular(&input);
        assert_eq!(
            plan.paths().collect::<Vec<_>>(),
            vec![
                "printer.cfg",
                "board_octopus.cfg",
                "toolhead_ebb36.cfg",
                "led_effect.cfg",
                "KAMP/Line_Purge.cfg",
                "KAMP_Settings.cfg",
                "leds.cfg",
            ]
        );
        assert_eq!(
            plan.root_stub().includes,
            vec![
                "board_octopus.cfg",
                "toolhead_ebb36.cfg",
                "led_effect.cfg",
                "KAMP_Settings.cfg",
                "leds.cfg",
            ]
        );
        assert_eq!(plan, plan_modular(&input));
    }

    #[test]
    fn test_modular_under_subdirectory_root() {
        let board = BoardBundle::new("skr", "SKR", "rp2040");
        let input = ModularInput {
            root: "config/printer.cfg",
            board: &board,
            toolhead: None,
            addons: Vec::new(),
            leds: false,
        };
        let plan = plan_modular(&input);
        assert_eq!(plan.files[1].path, "config/board_skr.cfg");
        assert_eq!(plan.root_stub().includes, vec!["board_skr.cfg"]);
    }

    #[test]
    fn test_source_tree_routing_and_order() {
        let mut section_map = BTreeMap::new();
        section_map.insert("stepper_x".to_string(), "config/motion.cfg".to_string());
        section_map.insert("mcu".to_string(), "config/mcu.cfg".to_string());
        section_map.insert("fan".to_string(), "config/extras/fans.cfg".to_string());
        let mut include_graph = BTreeMap::new();
        include_graph.insert(
            "config/printer.cfg".to_string(),
            vec!["config/mcu.cfg".to_string(), "config/motion.cfg".to_string()],
        );
        let input = SourceTreeInput {
            root: "config/printer.cfg",
            section_map: &section_map,
            include_graph: &include_graph,
            default_file: None,
        };

        assert_eq!(input.route("Stepper_X"), "config/motion.cfg");
        assert_eq!(input.route("printer"), "config/printer.cfg");

        let files: BTreeSet<String> = ["stepper_x", "mcu", "fan", "printer"]
            .iter()
            .map(|s| input.route(s))
            .collect();
        let plan = plan_source_tree(&input, &files);
        assert_eq!(
            plan.paths().collect::<Vec<_>>(),
            vec![
                "config/printer.cfg",
                "config/mcu.cfg",
                "config/motion.cfg",
                "config/extras/fans.cfg",
            ]
        );
        assert_eq!(
            plan.root_stub().includes,
            vec!["mcu.cfg", "motion.cfg", "extras/fans.cfg"]
        );
    }

    #[test]
    fn test_relative_include() {
        assert_eq!(relative_include("printer.cfg", "a.cfg"), "a.cfg");
        assert_eq!(relative_include("config/printer.cfg", "config/sub/a.cfg"), "sub/a.cfg");
        assert_eq!(relative_include("config/sub/a.cfg", "config/b.cfg"), "../b.cfg");
        assert_eq!(relative_include("a/b.cfg", "c/d.cfg"), "../c/d.cfg");
    }

    #[test]
    fn test_layout_from_str() {
        assert_eq!("source-tree".parse::<OutputLayout>(), Ok(OutputLayout::SourceTree));
        assert_eq!("MODULAR".parse::<OutputLayout>(), Ok(OutputLayout::Modular));
        assert!("flat".parse::<OutputLayout>().is_err());
    }
}
