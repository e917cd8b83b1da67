//! Synthesis: attribute model + bundle registry → generated file set.
//!
//! The planner fixes the file structure, then each stub is filled: code-built
//! sections for boards and LEDs, rendered templates for add-ons. A render
//! failure drops only its own file (the include pointing at it stays, so the
//! validator reports it as unresolved); sibling files are still produced.

pub mod planner;

pub use planner::{
    ActiveAddon, FileStub, LayoutPlan, ModularInput, OutputLayout, SourceTreeInput, StubSource,
    plan_modular, plan_source_tree,
};

use crate::bundles::{AddonBundle, BoardBundle, BundleRegistry};
use crate::error::{BundleKind, FieldErrorReason, SynthesisError, TemplateFieldError};
use crate::model::{AttributeModel, ConfigSection, ConfigTree, Provenance};
use crate::parser;
use crate::project::AddonConfig;
use crate::render::{self, RenderContext, sections};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Everything besides the attribute model that shapes the output.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub layout: OutputLayout,
    pub root_file: String,
    /// Source-tree target for sections without a recorded origin.
    pub default_section_file: Option<String>,
    pub addon_configs: Vec<AddonConfig>,
    pub section_map: BTreeMap<String, String>,
    pub include_graph: BTreeMap<String, Vec<String>>,
}

impl SynthesisRequest {
    pub fn new(layout: OutputLayout) -> Self {
        Self {
            layout,
            root_file: "printer.cfg".to_string(),
            default_section_file: None,
            addon_configs: Vec::new(),
            section_map: BTreeMap::new(),
            include_graph: BTreeMap::new(),
        }
    }

    pub fn with_root_file(mut self, root: impl Into<String>) -> Self {
        self.root_file = root.into();
        self
    }

    fn addon_config(&self, id: &str) -> Option<&AddonConfig> {
        self.addon_configs.iter().find(|c| c.id == id)
    }

    /// Section overrides in application order: per-add-on sections of
    /// enabled add-ons, then the model's own overrides.
    fn overrides<'a>(&'a self, attrs: &'a AttributeModel) -> Vec<(&'a str, &'a BTreeMap<String, String>)> {
        let mut out: Vec<(&str, &BTreeMap<String, String>)> = Vec::new();
        for config in self.addon_configs.iter().filter(|c| c.enabled) {
            out.extend(config.sections.iter().map(|(s, kv)| (s.as_str(), kv)));
        }
        out.extend(attrs.section_overrides.iter().map(|(s, kv)| (s.as_str(), kv)));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

/// A file that could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderFailure {
    pub path: String,
    pub error: TemplateFieldError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisOutput {
    /// Layout actually produced (source-tree without a section map falls
    /// back to modular).
    pub layout: OutputLayout,
    pub root: String,
    pub files: Vec<GeneratedFile>,
    pub failures: Vec<RenderFailure>,
}

impl SynthesisOutput {
    pub fn file(&self, path: &str) -> Option<&GeneratedFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// The output as a tree, ready for validation.
    pub fn tree(&self) -> ConfigTree {
        ConfigTree::from_generated(self.files.iter().map(|f| (f.path.as_str(), f.content.as_str())))
    }
}

/// Resolved bundles of one request.
struct Resolved<'a> {
    board: &'a BoardBundle,
    toolhead: Option<&'a BoardBundle>,
    addons: Vec<ActiveAddon<'a>>,
}

fn resolve<'a>(
    attrs: &AttributeModel,
    registry: &'a BundleRegistry,
    request: &'a SynthesisRequest,
) -> Result<Resolved<'a>, SynthesisError> {
    if attrs.board.trim().is_empty() {
        return Err(SynthesisError::NoBoard);
    }
    let board = registry
        .board(&attrs.board)
        .ok_or_else(|| SynthesisError::UnresolvedReference {
            kind: BundleKind::Board,
            id: attrs.board.clone(),
        })?;

    let toolhead = match attrs.active_toolhead() {
        Some(selection) => Some(registry.toolhead_board(&selection.board).ok_or_else(|| {
            SynthesisError::UnresolvedReference {
                kind: BundleKind::ToolheadBoard,
                id: selection.board.clone(),
            }
        })?),
        None => None,
    };

    let mut addons = Vec::new();
    for id in &attrs.addons {
        let config = request.addon_config(id);
        if config.is_some_and(|c| !c.enabled) {
            debug!(addon = %id, "Add-on disabled by project config");
            continue;
        }
        let bundle = registry
            .addon(id)
            .ok_or_else(|| SynthesisError::UnresolvedReference {
                kind: BundleKind::Addon,
                id: id.clone(),
            })?;
        addons.push(ActiveAddon {
            bundle,
            include_files: config.map(|c| c.include_files.as_slice()).unwrap_or(&[]),
        });
    }

    Ok(Resolved {
        board,
        toolhead,
        addons,
    })
}

enum Content {
    Sections(Vec<ConfigSection>),
    Text(String),
}

/// Render one add-on template.
fn render_addon(
    attrs: &AttributeModel,
    registry: &BundleRegistry,
    board: &BoardBundle,
    addon: &AddonBundle,
    template: &str,
) -> Result<String, TemplateFieldError> {
    let text = registry.template(template).ok_or_else(|| {
        TemplateFieldError::new(template, template, FieldErrorReason::MissingTemplate)
    })?;
    let ctx = RenderContext::new(attrs)
        .with_pins(&board.pins)
        .with_settings(attrs.addon_settings.get(&addon.id));
    render::render(template, text, &ctx)
}

/// Produce the content of one planned stub.
fn fill(
    stub: &FileStub,
    attrs: &AttributeModel,
    registry: &BundleRegistry,
    resolved: &Resolved<'_>,
) -> Result<Content, TemplateFieldError> {
    match &stub.source {
        StubSource::Root | StubSource::Routed => Ok(Content::Sections(Vec::new())),
        StubSource::Board(_) => {
            sections::board_sections(&stub.path, attrs, resolved.board).map(Content::Sections)
        }
        StubSource::Toolhead(_) => {
            let (Some(selection), Some(board)) = (attrs.active_toolhead(), resolved.toolhead) else {
                return Ok(Content::Sections(Vec::new()));
            };
            let transport = attrs.toolhead_transport(registry).unwrap_or_default();
            sections::toolhead_sections(&stub.path, attrs, selection, board, transport)
                .map(Content::Sections)
        }
        StubSource::Addon { id, template } => {
            let bundle = resolved
                .addons
                .iter()
                .find(|a| a.bundle.id == *id)
                .map(|a| a.bundle)
                .ok_or_else(|| TemplateFieldError::missing(template.as_str(), format!("addons.{}", id)))?;
            render_addon(attrs, registry, resolved.board, bundle, template).map(Content::Text)
        }
        StubSource::Leds => sections::led_sections(&stub.path, attrs).map(Content::Sections),
    }
}

fn include_sections(includes: &[String]) -> Vec<ConfigSection> {
    includes.iter().map(|t| ConfigSection::include(t)).collect()
}

fn apply_override(section: &mut ConfigSection, values: &BTreeMap<String, String>) {
    for (key, value) in values {
        section.set(key, value.as_str());
    }
    section.provenance = Provenance::Override;
}

/// Parse rendered add-on text into sections, or report where it broke.
fn parse_rendered(template: &str, text: &str) -> Result<Vec<ConfigSection>, TemplateFieldError> {
    let parsed = parser::parse(template, text, Provenance::Generated);
    match parsed.issues.first() {
        Some(issue) => Err(TemplateFieldError::new(
            template,
            template,
            FieldErrorReason::MalformedOutput { line: issue.line },
        )),
        None => Ok(parsed.file.sections),
    }
}

/// Build the generated file set.
pub fn synthesize(
    attrs: &AttributeModel,
    registry: &BundleRegistry,
    request: &SynthesisRequest,
) -> Result<SynthesisOutput, SynthesisError> {
    let resolved = resolve(attrs, registry, request)?;

    let output = match request.layout {
        OutputLayout::SourceTree if !request.section_map.is_empty() => {
            synthesize_source_tree(attrs, registry, request, &resolved)
        }
        layout => {
            if layout == OutputLayout::SourceTree {
                info!("No section map recorded; using the modular layout");
            }
            synthesize_modular(attrs, registry, request, &resolved)
        }
    };

    for failure in &output.failures {
        warn!(file = %failure.path, "Render failed: {}", failure.error);
    }
    info!(
        layout = %output.layout,
        files = output.files.len(),
        failures = output.failures.len(),
        "Synthesis complete"
    );
    Ok(output)
}

fn synthesize_modular(
    attrs: &AttributeModel,
    registry: &BundleRegistry,
    request: &SynthesisRequest,
    resolved: &Resolved<'_>,
) -> SynthesisOutput {
    let plan = plan_modular(&ModularInput {
        root: &request.root_file,
        board: resolved.board,
        toolhead: resolved.toolhead,
        addons: resolved.addons.clone(),
        leds: attrs.leds.enabled,
    });

    let mut failures = Vec::new();
    let mut contents: Vec<Option<Content>> = Vec::with_capacity(plan.files.len());
    for stub in &plan.files {
        match fill(stub, attrs, registry, resolved) {
            Ok(content) => contents.push(Some(content)),
            Err(error) => {
                failures.push(RenderFailure {
                    path: stub.path.clone(),
                    error,
                });
                contents.push(None);
            }
        }
    }

    let mut root_sections = include_sections(&plan.root_stub().includes);
    root_sections.push(sections::printer_section(attrs));
    contents[0] = Some(Content::Sections(root_sections));

    'overrides: for (name, values) in request.overrides(attrs) {
        let id = name.trim().to_lowercase();
        for (idx, content) in contents.iter_mut().enumerate() {
            match content {
                Some(Content::Sections(list)) => {
                    if let Some(section) = list.iter_mut().find(|s| s.id() == id) {
                        apply_override(section, values);
                        continue 'overrides;
                    }
                }
                Some(Content::Text(text)) => {
                    let parsed = parser::parse(&plan.files[idx].path, text, Provenance::Generated);
                    if parsed.issues.is_empty() && parsed.file.section(&id).is_some() {
                        let mut list = parsed.file.sections;
                        if let Some(section) = list.iter_mut().find(|s| s.id() == id) {
                            apply_override(section, values);
                        }
                        *content = Some(Content::Sections(list));
                        continue 'overrides;
                    }
                }
                None => {}
            }
        }
        let mut section = ConfigSection::new(name.trim(), Provenance::Override);
        apply_override(&mut section, values);
        if let Some(Content::Sections(root)) = contents[0].as_mut() {
            root.push(section);
        }
    }

    let files = plan
        .files
        .iter()
        .zip(contents)
        .filter_map(|(stub, content)| {
            let content = match content? {
                Content::Sections(list) => parser::write_sections(&list),
                Content::Text(text) => text,
            };
            Some(GeneratedFile {
                path: stub.path.clone(),
                content,
            })
        })
        .collect();

    SynthesisOutput {
        layout: OutputLayout::Modular,
        root: plan.root,
        files,
        failures,
    }
}

fn synthesize_source_tree(
    attrs: &AttributeModel,
    registry: &BundleRegistry,
    request: &SynthesisRequest,
    resolved: &Resolved<'_>,
) -> SynthesisOutput {
    // The modular plan enumerates every fragment; source-tree output only
    // reuses its contents, not its file boundaries.
    let fragments = plan_modular(&ModularInput {
        root: &request.root_file,
        board: resolved.board,
        toolhead: resolved.toolhead,
        addons: resolved.addons.clone(),
        leds: attrs.leds.enabled,
    });

    let mut failures = Vec::new();
    let mut collected: Vec<ConfigSection> = Vec::new();
    for stub in fragments.files.iter().skip(1) {
        let result = fill(stub, attrs, registry, resolved).and_then(|content| match content {
            Content::Sections(list) => Ok(list),
            Content::Text(text) => {
                let template = match &stub.source {
                    StubSource::Addon { template, .. } => template.as_str(),
                    _ => stub.path.as_str(),
                };
                parse_rendered(template, &text)
            }
        });
        match result {
            // Recorded include relationships replace any the fragment carried.
            Ok(list) => collected.extend(list.into_iter().filter(|s| !s.is_include())),
            Err(error) => failures.push(RenderFailure {
                path: stub.path.clone(),
                error,
            }),
        }
    }
    collected.push(sections::printer_section(attrs));

    for (name, values) in request.overrides(attrs) {
        let id = name.trim().to_lowercase();
        match collected.iter_mut().find(|s| s.id() == id) {
            Some(section) => apply_override(section, values),
            None => {
                let mut section = ConfigSection::new(name.trim(), Provenance::Override);
                apply_override(&mut section, values);
                collected.push(section);
            }
        }
    }

    let input = SourceTreeInput {
        root: &request.root_file,
        section_map: &request.section_map,
        include_graph: &request.include_graph,
        default_file: request.default_section_file.as_deref(),
    };
    let mut routed: BTreeMap<String, Vec<ConfigSection>> = BTreeMap::new();
    for section in collected {
        routed.entry(input.route(&section.id())).or_default().push(section);
    }
    let targets: BTreeSet<String> = routed.keys().cloned().collect();
    let plan = plan_source_tree(&input, &targets);

    let files = plan
        .files
        .iter()
        .map(|stub| {
            let mut list = include_sections(&stub.includes);
            list.extend(routed.remove(&stub.path).unwrap_or_default());
            GeneratedFile {
                path: stub.path.clone(),
                content: parser::write_sections(&list),
            }
        })
        .collect();

    SynthesisOutput {
        layout: OutputLayout::SourceTree,
        root: plan.root,
        files,
        failures,
    }
}
