//! Board, toolhead board and add-on bundles.

pub mod learning;
pub mod records;
pub mod registry;

pub use learning::{LearnedBundles, learn_from_import};
pub use records::{AddonBundle, BoardBundle};
pub use registry::{
    BundleRegistry, BundleSource, RegistryBuilder, RegistryHandle, global, init_global,
    load_sources, reload_global,
};
