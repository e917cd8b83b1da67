//! `parity`: compare a generated tree against the imported original.

use super::{Outcome, io, parse_format, print_report};
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::graph::{GraphOptions, IncludeGraph};
use crate::model::{ConfigTree, normalize_path};
use crate::parity::{ParityOptions, compare};
use anyhow::{Result, anyhow};
use clap::Args;
use std::path::PathBuf;

/// Arguments for the parity subcommand
#[derive(Args, Debug)]
pub struct ParityArgs {
    /// Directory with the generated tree
    #[arg(value_name = "GENERATED")]
    pub generated: PathBuf,

    /// Directory with the imported reference tree
    #[arg(value_name = "IMPORTED")]
    pub imported: PathBuf,

    /// Root file of the imported tree (default: detected)
    #[arg(long)]
    pub root: Option<String>,

    /// Compare every imported file, not only those reachable from the root
    #[arg(long)]
    pub all_files: bool,

    /// Findings format: text, json, markdown
    #[arg(long, default_value = "text")]
    pub format: String,
}

pub fn run(args: &ParityArgs, config: &Config) -> Result<Outcome> {
    let format = parse_format(&args.format)?;
    let generated_files = io::read_config_dir(&args.generated)?;
    let imported_files = io::read_config_dir(&args.imported)?;
    let generated = ConfigTree::from_imported(&generated_files);
    let imported = ConfigTree::from_imported(&imported_files);

    let root = match &args.root {
        Some(root) => normalize_path(root),
        None => io::detect_root(&imported_files)
            .ok_or_else(|| anyhow!("no .cfg files under {}", args.imported.display()))?,
    };

    let recorded = if args.all_files {
        None
    } else {
        let graph = IncludeGraph::build(
            &imported,
            &root,
            GraphOptions { orphan_warnings: false },
            &CancellationToken::new(),
        )?;
        Some(graph.recorded())
    };

    let options = ParityOptions::with_allowlist(config.validation.allowlist.iter().map(String::as_str));
    let report = compare(&generated, &imported, &root, recorded.as_ref(), &options);
    print_report(&report, format);
    Ok(Outcome::from_report(&report))
}
