//! hostdeck-build — server-side builds of uploaded sources.
//!
//! A source tarball is unpacked into a per-version [`workspace`], the
//! manifest's engine ([`registry`]) runs its external tools through a
//! [`process::CommandRunner`], and the engine's output tree is deployed
//! through the same upload queue bundle deploys use. [`pipeline::Builder`]
//! drives the whole sequence and records the outcome on the version.

pub mod engine;
pub mod error;
pub mod npm_optimizer;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod workspace;

pub use engine::{BuildContext, BuildEngine, EngineKind, run_engine};
pub use error::{BuildError, BuildResult};
pub use npm_optimizer::LocalTarballs;
pub use pipeline::{BuildRequest, BuildSource, Builder};
pub use process::{CommandRunner, ProcessError, SpawnSpec, SystemRunner};
pub use workspace::BuildWorkspace;
