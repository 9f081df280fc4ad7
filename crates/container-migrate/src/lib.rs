//! # container-migrate
//!
//! Export/import engine that moves containers (tables and time series) and
//! view definitions between a live clustered database and an archive.
//!
//! - **Export** writes selected containers, optionally row-filtered, plus
//!   their views to a file archive or an external data source
//! - **Import** applies archive entries to the cluster in Normal, Append or
//!   Replace mode, or lists the archive without touching the cluster
//! - **Test mode** runs the same decisions and counts without side effects
//! - **Continue on error**: one bad container is a ledger failure, never an
//!   aborted batch; only structural errors stop a run
//!
//! ## Example
//!
//! ```rust,no_run
//! use container_migrate::{Config, Mode, Orchestrator, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> container_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let options = RunOptions::import(&config, Mode::Append)?;
//!     let result = Orchestrator::new(&config, options).await?.run().await?;
//!     println!("{}", result.counts);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod store;

// Re-exports for convenient access
pub use archive::{DataSourceArchive, FileArchive};
pub use config::{CommandKind, Config, FilterSet, Mode, RunOptions, Selection, TargetType};
pub use crate::core::{ArchiveTarget, ContainerKey, ContainerStore, ViewDefinition};
pub use engine::{ExportEngine, ImportEngine, Inventory, RunResult};
pub use error::{MigrateError, Result, Severity};
pub use ledger::{EntityKind, LedgerSnapshot, ProgressLedger};
pub use orchestrator::Orchestrator;
pub use store::{open_store, MemoryStore};
