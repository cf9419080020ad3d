//! hostdeck-state — version records and traffic rules.
//!
//! The [`Database`] trait is the narrow interface the deployment pipeline
//! consumes. [`StateStore`] implements it on top of
//! [redb](https://docs.rs/redb), persisting JSON-serialized records under
//! composite keys (`{app_id}/{version_id}`, `{app_id}/{environment}`) so that
//! everything belonging to one app can be found with a prefix scan.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod database;
pub mod error;
pub mod store;
pub mod tables;

pub use database::Database;
pub use error::{StateError, StateResult};
pub use store::StateStore;
