//! hostdeck-bundle — streaming bundle ingestion.
//!
//! An uploaded bundle is a gzip-compressed tar with one synthetic top-level
//! directory. It is decoded entry by entry on a blocking thread
//! ([`archive`]), each entry is mapped to its deploy path or skipped
//! ([`path_filter`]), and deployable files are uploaded by a bounded pool of
//! workers ([`queue`], [`deployer`]). [`pipeline::BundleDeployer`] ties this
//! to the version lifecycle.

pub mod archive;
pub mod deployer;
pub mod error;
pub mod path_filter;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod source;

pub use archive::{ArchiveEntry, ArchiveStream, EntryKind, unpack};
pub use deployer::{DeployFile, DeployOptions, FileContent, FileDeployer};
pub use error::{BundleError, BundleResult};
pub use path_filter::{PathFilter, Resolution, SkipReason};
pub use pipeline::{ArchiveOutcome, BundleDeployer, DeployFailure, SourceBundle, StopPredicate};
pub use queue::{DeployQueue, QueueReport};
pub use retry::RetryPolicy;
pub use source::{BundleSource, BytesBundle, FileBundle};
