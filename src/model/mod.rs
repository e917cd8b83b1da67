//! Core data model.

pub mod attributes;
pub mod config_file;
pub mod finding;
pub mod tree;

pub use attributes::{
    AttributeModel, Dimensions, DriverAssignment, HeaterAssignment, LedSettings, McuSettings,
    MotionLimits, PresetIdentity, ProbeSettings, StepperAssignment, ToolheadSelection, Transport,
};
pub use config_file::{
    ConfigEntry, ConfigFile, ConfigSection, Provenance, normalize_path, normalize_value,
    resolve_relative,
};
pub use finding::{ATTRIBUTES_LOCATION, Category, Severity, ValidationFinding, ValidationReport};
pub use tree::ConfigTree;
