//! `import`: record an existing machine's tree into a project.
//!
//! Reads the directory, validates it as an imported machine, records root,
//! include graph and section origins into the project, and learns add-on
//! bundles from recognizable packages. An existing project file is updated
//! in place; its attribute model is kept.

use super::{Outcome, io, parse_format, print_report};
use crate::bundles::learn_from_import;
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::graph::{GraphOptions, IncludeGraph};
use crate::model::{AttributeModel, ConfigTree, normalize_path};
use crate::project::Project;
use crate::validation::{ValidationScope, validate};
use anyhow::{Context, Result, anyhow};
use clap::Args;
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Arguments for the import subcommand
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Directory holding the machine's configuration tree
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Project file to create or update
    #[arg(long, value_name = "FILE")]
    pub project: PathBuf,

    /// Root file relative to DIR (default: detected)
    #[arg(long)]
    pub root: Option<String>,

    /// Board id for a new project
    #[arg(long)]
    pub board: Option<String>,

    /// Bundle root to write learned add-on bundles into
    #[arg(long, value_name = "DIR")]
    pub learn_into: Option<PathBuf>,

    /// Validate and report without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Findings format: text, json, markdown
    #[arg(long, default_value = "text")]
    pub format: String,
}

impl ImportArgs {
    /// Name used for the machine in learned bundle descriptions.
    fn origin(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.dir.display().to_string())
    }
}

fn load_or_create(args: &ImportArgs) -> Result<Project> {
    if args.project.exists() {
        let text = fs::read_to_string(&args.project)
            .with_context(|| format!("reading project {}", args.project.display()))?;
        let loaded = Project::load_str(&text)
            .with_context(|| format!("loading project {}", args.project.display()))?;
        let mut project = loaded.project;
        if let Some(board) = &args.board {
            project.machine_attributes.board = board.clone();
        }
        Ok(project)
    } else {
        let board = args.board.clone().unwrap_or_default();
        Ok(Project::new(AttributeModel::new(board)))
    }
}

pub fn run(args: &ImportArgs, config: &Config) -> Result<Outcome> {
    let format = parse_format(&args.format)?;
    let files = io::read_config_dir(&args.dir)?;
    let root = match &args.root {
        Some(root) => normalize_path(root),
        None => io::detect_root(&files)
            .ok_or_else(|| anyhow!("no .cfg files under {}", args.dir.display()))?,
    };
    let tree = ConfigTree::from_imported(&files);
    let cancel = CancellationToken::new();

    let report = validate(
        &tree,
        ValidationScope::ImportedMachine { root: &root },
        &config.validation_config(),
        &cancel,
    )?;
    print_report(&report, format);

    let graph = IncludeGraph::build(&tree, &root, GraphOptions::default(), &cancel)?;
    let mut project = load_or_create(args)?;
    project.record_import(&tree, &graph);

    let learned = learn_from_import(&files, &args.origin());
    for addon in &learned.addons {
        let entry = project.addon_config_mut(&addon.id);
        entry.enabled = true;
        entry.include_files = addon.include_files.clone();
        if !project.machine_attributes.addons.contains(&addon.id) {
            project.machine_attributes.addons.push(addon.id.clone());
        }
    }
    info!(
        root = %root,
        files = tree.len(),
        sections = project.section_map.len(),
        learned = learned.addons.len(),
        "Recorded imported machine"
    );

    if args.dry_run {
        return Ok(Outcome::from_report(&report));
    }

    if let Some(bundle_root) = &args.learn_into
        && !learned.is_empty()
    {
        let written = io::write_learned(bundle_root, &learned)?;
        info!(dir = %bundle_root.display(), files = written.len(), "Wrote learned bundles");
    }

    let rendered = project.to_json_pretty()?;
    if let Some(parent) = args.project.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(&args.project, rendered)
        .with_context(|| format!("writing {}", args.project.display()))?;
    eprintln!("Wrote {}", args.project.display());

    Ok(Outcome::from_report(&report))
}
