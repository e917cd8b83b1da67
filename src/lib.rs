//! klipper-forge: Klipper printer configuration synthesis and validation.
//!
//! The engine turns an [`model::AttributeModel`] plus a
//! [`bundles::BundleRegistry`] into a set of `.cfg` files
//! ([`synthesis::synthesize`]), checks configuration trees
//! ([`validation::validate`]), compares generated output with an imported
//! machine ([`parity::compare`]), and migrates persisted projects
//! ([`project`]). Nothing in the engine touches the filesystem; the
//! [`cli`] module owns all I/O.

pub mod bundles;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod graph;
pub mod logging;
pub mod model;
pub mod parity;
pub mod parser;
pub mod project;
pub mod render;
pub mod synthesis;
pub mod validation;
