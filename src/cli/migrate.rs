//! `migrate`: upgrade a project record to the current schema.

use super::Outcome;
use crate::project::{CURRENT_SCHEMA_VERSION, Project, build_default_registry};
use anyhow::{Context, Result};
use clap::Args;
use std::fs;
use std::path::PathBuf;

/// Arguments for the migrate subcommand.
#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Project record (JSON)
    #[arg(value_name = "FILE")]
    pub project: PathBuf,

    /// Rewrite the file in place instead of printing the result.
    #[arg(long)]
    pub write: bool,

    /// Show the migration steps without producing output.
    #[arg(long, conflicts_with = "write")]
    pub dry_run: bool,
}

pub fn run(args: &MigrateArgs) -> Result<Outcome> {
    let text = fs::read_to_string(&args.project)
        .with_context(|| format!("reading project {}", args.project.display()))?;
    let loaded = Project::load_str(&text)
        .with_context(|| format!("migrating project {}", args.project.display()))?;

    if !loaded.outcome.migrated() {
        eprintln!(
            "{} is already at schema v{}.",
            args.project.display(),
            CURRENT_SCHEMA_VERSION
        );
    } else {
        eprintln!("Migration plan for {}:", args.project.display());
        for step in build_default_registry().describe_path(loaded.outcome.from, loaded.outcome.to)? {
            eprintln!("  {}", step);
        }
    }

    if args.dry_run {
        return Ok(Outcome::Clean);
    }

    let rendered = loaded.project.to_json_pretty()?;
    if args.write {
        fs::write(&args.project, rendered)
            .with_context(|| format!("writing {}", args.project.display()))?;
        eprintln!("Wrote {}", args.project.display());
    } else {
        print!("{}", rendered);
    }
    Ok(Outcome::Clean)
}
