pub mod config;
pub mod manifest;
pub mod types;

pub use config::DeployerConfig;
pub use manifest::{BuildSettings, Manifest, ManifestError};
pub use types::*;
