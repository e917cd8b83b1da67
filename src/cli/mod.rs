//! CLI command definitions for klipper-forge.
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod import;
pub mod io;
pub mod migrate;
pub mod parity;
pub mod synthesize;
pub mod validate;

use crate::bundles::{BundleRegistry, RegistryHandle, load_sources};
use crate::config::Config;
use crate::format::{OutputFormat, format_report};
use crate::model::ValidationReport;
use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use import::ImportArgs;
use migrate::MigrateArgs;
use parity::ParityArgs;
use std::path::PathBuf;
use std::sync::Arc;
use synthesize::SynthesizeArgs;
use tracing::warn;
use validate::ValidateArgs;

/// Klipper configuration synthesis and validation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (merged over the discovered tiers)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Synthesize a configuration tree from a project file
    Synthesize(SynthesizeArgs),

    /// Validate a configuration directory
    Validate(ValidateArgs),

    /// Upgrade a project record to the current schema
    Migrate(MigrateArgs),

    /// Compare generated output against an imported tree
    Parity(ParityArgs),

    /// Record an existing machine's tree into a project
    Import(ImportArgs),
}

/// Result of a command, mapped to the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Clean,
    /// Blocking findings were reported.
    Blocked,
}

impl Outcome {
    pub fn from_report(report: &ValidationReport) -> Self {
        if report.has_blocking() {
            Outcome::Blocked
        } else {
            Outcome::Clean
        }
    }
}

pub(crate) fn parse_format(value: &str) -> Result<OutputFormat> {
    OutputFormat::from_str(value).ok_or_else(|| anyhow!("unknown format '{}' (text, json, markdown)", value))
}

pub(crate) fn print_report(report: &ValidationReport, format: OutputFormat) {
    print!("{}", format_report(report, format));
}

/// Load bundle roots (command line first, config otherwise) into a registry
/// snapshot. Rejected records are logged and skipped.
pub(crate) fn load_registry(roots: &[PathBuf], config: &Config) -> Result<Arc<BundleRegistry>> {
    let roots: &[PathBuf] = if roots.is_empty() { &config.bundles.dirs } else { roots };
    let mut sources = Vec::new();
    for root in roots {
        sources.push(io::read_bundle_root(root)?);
    }
    let (registry, errors) = load_sources(sources);
    for error in &errors {
        warn!(%error, "Bundle record rejected");
    }
    Ok(RegistryHandle::new(registry).snapshot())
}

/// Dispatch a parsed command.
pub fn run(command: Command, config: &Config) -> Result<Outcome> {
    match command {
        Command::Synthesize(args) => synthesize::run(&args, config),
        Command::Validate(args) => validate::run(&args, config),
        Command::Migrate(args) => migrate::run(&args),
        Command::Parity(args) => parity::run(&args, config),
        Command::Import(args) => import::run(&args, config),
    }
}
