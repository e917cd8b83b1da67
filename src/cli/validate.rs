//! `validate`: check a configuration directory.

use super::{Outcome, io, parse_format, print_report};
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::model::{ConfigTree, normalize_path};
use crate::validation::{ValidationScope, validate};
use anyhow::{Result, anyhow};
use clap::Args;
use std::path::PathBuf;

/// Arguments for the validate subcommand
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Directory holding the configuration tree
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Root file relative to DIR (default: detected)
    #[arg(long)]
    pub root: Option<String>,

    /// Validate one file on its own (syntax, duplicate keys, roles, ranges)
    #[arg(long, value_name = "FILE", conflicts_with = "root")]
    pub single: Option<String>,

    /// Findings format: text, json, markdown
    #[arg(long, default_value = "text")]
    pub format: String,
}

pub fn run(args: &ValidateArgs, config: &Config) -> Result<Outcome> {
    let format = parse_format(&args.format)?;
    let files = io::read_config_dir(&args.dir)?;
    let tree = ConfigTree::from_imported(&files);

    let single = args.single.as_deref().map(normalize_path);
    let root = match (&single, &args.root) {
        (Some(_), _) => None,
        (None, Some(root)) => Some(normalize_path(root)),
        (None, None) => Some(
            io::detect_root(&files)
                .ok_or_else(|| anyhow!("no .cfg files under {}", args.dir.display()))?,
        ),
    };

    let scope = match (&single, &root) {
        (Some(path), _) => ValidationScope::SingleFile { path },
        (None, Some(root)) => ValidationScope::ImportedMachine { root },
        (None, None) => return Err(anyhow!("no root file")),
    };

    let report = validate(&tree, scope, &config.validation_config(), &CancellationToken::new())?;
    print_report(&report, format);
    Ok(Outcome::from_report(&report))
}
