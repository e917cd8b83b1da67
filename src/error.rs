//! Error taxonomy for the engine.
//!
//! Anything that can be expressed as a [`ValidationFinding`](crate::model::ValidationFinding)
//! is reported that way and never surfaces here. The types below cover the
//! failures that abort a single operation: a template render, a bundle
//! record, a project load, or a synthesis request that references unknown
//! bundles.

use serde::Serialize;
use thiserror::Error;

/// Why a template field could not be substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorReason {
    /// The field does not exist on the attribute model or add-on settings.
    Missing,
    /// The field exists but is not a scalar (object, list or null).
    NotScalar,
    /// `pins.<alias>` names an alias absent from the bundle's pin map.
    UnknownPinAlias,
    /// A `{{` without the matching `}}`.
    Unterminated,
    /// The referenced template text is not registered.
    MissingTemplate,
    /// Rendered output could not be decomposed into sections.
    MalformedOutput { line: usize },
}

impl std::fmt::Display for FieldErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldErrorReason::Missing => write!(f, "field is not defined"),
            FieldErrorReason::NotScalar => write!(f, "field is not a scalar value"),
            FieldErrorReason::UnknownPinAlias => write!(f, "pin alias is not in the bundle pin map"),
            FieldErrorReason::Unterminated => write!(f, "placeholder is not terminated"),
            FieldErrorReason::MissingTemplate => write!(f, "template is not registered"),
            FieldErrorReason::MalformedOutput { line } => {
                write!(f, "rendered output is malformed at line {}", line)
            }
        }
    }
}

/// A render-time failure. Fatal to the one render, never to its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("template '{template}': {field}: {reason}")]
pub struct TemplateFieldError {
    pub template: String,
    pub field: String,
    pub reason: FieldErrorReason,
}

impl TemplateFieldError {
    pub fn new(
        template: impl Into<String>,
        field: impl Into<String>,
        reason: FieldErrorReason,
    ) -> Self {
        Self {
            template: template.into(),
            field: field.into(),
            reason,
        }
    }

    pub fn missing(template: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(template, field, FieldErrorReason::Missing)
    }

    pub fn unknown_pin(template: impl Into<String>, alias: &str) -> Self {
        Self::new(
            template,
            format!("pins.{}", alias),
            FieldErrorReason::UnknownPinAlias,
        )
    }
}

/// Kind of bundle record, used to identify rejected records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleKind {
    Board,
    ToolheadBoard,
    Addon,
}

impl std::fmt::Display for BundleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BundleKind::Board => write!(f, "board"),
            BundleKind::ToolheadBoard => write!(f, "toolhead board"),
            BundleKind::Addon => write!(f, "add-on"),
        }
    }
}

/// A single bundle record that was rejected. Logged and skipped; the rest of
/// the registry still loads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BundleLoadError {
    #[error("{kind} record from '{source_label}' is not a JSON object")]
    NotAnObject {
        kind: BundleKind,
        source_label: String,
    },

    #[error("{kind} record '{id}' from '{source_label}' is invalid: {reason}")]
    Invalid {
        kind: BundleKind,
        id: String,
        source_label: String,
        reason: String,
    },

    #[error(
        "{kind} record '{id}' from '{source_label}' collides with an existing {existing} of the same id"
    )]
    IncompatibleOverride {
        kind: BundleKind,
        existing: BundleKind,
        id: String,
        source_label: String,
    },
}

/// Project load failure. The load aborts and no partially migrated record is
/// returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaMigrationError {
    #[error("project record is not valid JSON: {0}")]
    Parse(String),

    #[error("project record must be a JSON object")]
    NotAnObject,

    #[error("schema_version must be a positive integer, found {0}")]
    InvalidVersion(String),

    #[error("project schema v{found} is newer than supported schema v{current}")]
    NewerThanCurrent { found: u32, current: u32 },

    #[error("cannot migrate from schema v{from} to v{to}; supported steps: {available}")]
    NoPath { from: u32, to: u32, available: String },

    #[error("migration v{from}->v{to} failed: {reason}")]
    StepFailed { from: u32, to: u32, reason: String },

    #[error("migrated project record is invalid: {0}")]
    InvalidRecord(String),
}

/// Synthesis could not start because the attribute model references bundles
/// the registry does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("{kind} '{id}' is not in the bundle registry")]
    UnresolvedReference { kind: BundleKind, id: String },

    #[error("no board selected")]
    NoBoard,
}
