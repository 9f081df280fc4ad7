//! Archive side of a run: a file archive or an external data source.
//!
//! - [`FileArchive`]: directory with an `archive.json` manifest
//! - [`DataSourceArchive`]: a live connection opened through the store catalog

mod datasource;
mod file;
pub mod manifest;

pub use datasource::DataSourceArchive;
pub use file::FileArchive;
pub use manifest::{ContainerMeta, Manifest, ManifestEntry, MANIFEST_FILE};

use std::path::Path;
use std::sync::Arc;

use crate::config::{CommandKind, Config, RunOptions, TargetType};
use crate::core::ArchiveTarget;
use crate::error::{MigrateError, Result};
use crate::store::open_store;

/// Open the counterpart selected by `options.target_type`. Called once per run.
pub async fn open_archive(
    config: &Config,
    options: &RunOptions,
    max_connections: u32,
) -> Result<Arc<dyn ArchiveTarget>> {
    match options.target_type {
        TargetType::ExportFile => Ok(Arc::new(open_file_archive(
            &config.archive.path,
            options.command,
        )?)),
        TargetType::DataSource => {
            let ds = config.datasource.as_ref().ok_or_else(|| {
                MigrateError::Config("a data source target needs a `datasource` section".into())
            })?;
            let store = open_store(&ds.url, max_connections).await?;
            Ok(Arc::new(DataSourceArchive::new(store)))
        }
    }
}

fn open_file_archive(path: &Path, command: CommandKind) -> Result<FileArchive> {
    match command {
        CommandKind::Export => Ok(FileArchive::for_export(path)),
        CommandKind::Import => FileArchive::for_import(path),
    }
}
