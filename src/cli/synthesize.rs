//! `synthesize`: project file + bundle roots → generated tree.

use super::{Outcome, io, load_registry, parse_format, print_report};
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::model::{Category, ValidationFinding, ValidationReport};
use crate::project::Project;
use crate::synthesis::{OutputLayout, synthesize};
use crate::validation::{ValidationScope, validate};
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

/// Arguments for the synthesize subcommand
#[derive(Args, Debug)]
pub struct SynthesizeArgs {
    /// Project record (JSON); older schema versions are migrated on load
    #[arg(long, value_name = "FILE")]
    pub project: PathBuf,

    /// Bundle roots, later roots override earlier ones (default: from config)
    #[arg(long = "bundles", value_name = "DIR")]
    pub bundles: Vec<PathBuf>,

    /// Output layout: source_tree or modular (default: the project's)
    #[arg(long)]
    pub layout: Option<OutputLayout>,

    /// Directory to write the generated files into
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Findings format: text, json, markdown
    #[arg(long, default_value = "text")]
    pub format: String,
}

pub fn run(args: &SynthesizeArgs, config: &Config) -> Result<Outcome> {
    let format = parse_format(&args.format)?;
    let text = std::fs::read_to_string(&args.project)
        .with_context(|| format!("reading project {}", args.project.display()))?;
    let loaded = Project::load_str(&text)
        .with_context(|| format!("loading project {}", args.project.display()))?;
    if loaded.outcome.migrated() {
        info!(
            from = loaded.outcome.from,
            to = loaded.outcome.to,
            "Project migrated in memory; run `migrate --write` to persist"
        );
    }
    let project = loaded.project;
    let registry = load_registry(&args.bundles, config)?;

    let mut report = ValidationReport::new();
    report.extend(
        project
            .machine_attributes
            .check(&registry, &config.preset_identity()),
    );

    let mut request = project.synthesis_request();
    if let Some(layout) = args.layout.or(config.synthesis.layout) {
        request.layout = layout;
    }
    if project.root_file == "printer.cfg" {
        request.root_file = config.synthesis.root_file.clone();
    }
    request.default_section_file = config.synthesis.default_section_file.clone();

    let output = synthesize(&project.machine_attributes, &registry, &request)?;
    for failure in &output.failures {
        report.push(
            ValidationFinding::blocking(
                Category::Resolution,
                failure.path.as_str(),
                failure.error.to_string(),
            )
            .with_key(failure.error.field.clone()),
        );
    }

    let tree = output.tree();
    report.extend(
        validate(
            &tree,
            ValidationScope::Tree { root: &output.root },
            &config.validation_config(),
            &CancellationToken::new(),
        )?
        .findings,
    );
    report.sort();

    if let Some(out) = &args.out {
        let written = io::write_output(out, &output)?;
        info!(dir = %out.display(), files = written.len(), "Wrote generated files");
    }

    print_report(&report, format);
    Ok(Outcome::from_report(&report))
}
