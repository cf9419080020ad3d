//! hostdeck-versions — version lifecycle and traffic routing.
//!
//! A version moves `initiated → running → {complete | failed | timedOut}`.
//! Reaching `complete` either publishes the version as a draft (reachable
//! through a preview URL) or routes all traffic of the app's first
//! environment to it.
//!
//! # Components
//!
//! - **`traffic`** — pure routing decisions (draft vs live, pruning candidates)
//! - **`manager`** — `VersionManager`, which applies them through the
//!   database, storage, and app registry collaborators

pub mod error;
pub mod manager;
pub mod traffic;

pub use error::{VersionError, VersionResult};
pub use manager::{AppRegistry, VersionManager};
pub use traffic::{TrafficOptions, TrafficPlan};
