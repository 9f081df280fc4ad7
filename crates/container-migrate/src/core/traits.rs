//! Core traits for the export/import engines.
//!
//! - [`ContainerStore`]: the live side, a clustered database or an external data source
//! - [`ArchiveTarget`]: the counterpart an export writes to and an import reads from
//!
//! The engines only see these traits, so a run is wired once (file archive or
//! data-source connection) and the per-entity logic stays the same.

use async_trait::async_trait;

use crate::error::Result;

use super::identifier::ContainerKey;
use super::schema::{ContainerData, ContainerSchema};
use super::value::Row;
use super::view::ViewDefinition;

/// Live container storage.
///
/// `create_container` and `replace_container` must be atomic from a reader's
/// point of view: after a crash the container either fully exists or does not.
#[async_trait]
pub trait ContainerStore: Send + Sync {
    /// List containers, optionally restricted to one database.
    async fn list_containers(&self, database: Option<&str>) -> Result<Vec<ContainerKey>>;

    /// Check whether a container with an equal key exists.
    async fn container_exists(&self, key: &ContainerKey) -> Result<bool>;

    /// Load a container's schema.
    async fn get_schema(&self, key: &ContainerKey) -> Result<ContainerSchema>;

    /// Read every row of a container.
    async fn read_rows(&self, key: &ContainerKey) -> Result<Vec<Row>>;

    /// Create a container and load its rows in one step.
    async fn create_container(&self, key: &ContainerKey, data: &ContainerData) -> Result<()>;

    /// Append rows to an existing container without touching existing rows.
    ///
    /// Returns the number of rows appended.
    async fn append_rows(&self, key: &ContainerKey, rows: &[Row]) -> Result<u64>;

    /// Drop an existing container and recreate it from `data` in one step.
    async fn replace_container(&self, key: &ContainerKey, data: &ContainerData) -> Result<()>;

    /// Drop a container if it exists.
    async fn drop_container(&self, key: &ContainerKey) -> Result<()>;

    /// List view definitions, optionally restricted to one database.
    async fn list_views(&self, database: Option<&str>) -> Result<Vec<ViewDefinition>>;

    /// Find a view by exact database and view name.
    async fn get_view(&self, database: &str, view: &str) -> Result<Option<ViewDefinition>>;

    /// Create a view, overwriting any view with the same exact name.
    async fn put_view(&self, view: &ViewDefinition) -> Result<()>;

    /// Store type identifier (e.g., "memory", "sqlite").
    fn store_type(&self) -> &str;

    /// Release connections.
    async fn close(&self);
}

/// One container recorded in an archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Identity, carrying the archive's metadata file name.
    pub key: ContainerKey,
    /// Rows recorded for the container, when known without reading them.
    pub row_count: Option<u64>,
}

/// The archive side of a run: a file archive or an external data source.
#[async_trait]
pub trait ArchiveTarget: Send + Sync {
    /// Human-readable location for logs.
    fn describe(&self) -> String;

    /// Write one container's schema and rows.
    async fn write_container(
        &self,
        key: &ContainerKey,
        data: &ContainerData,
    ) -> Result<ArchiveEntry>;

    /// Record one view definition.
    async fn write_view(&self, view: &ViewDefinition) -> Result<()>;

    /// Complete an export (e.g., publish the manifest).
    async fn finish(&self) -> Result<()>;

    /// Enumerate archive entries. Failure here is structural.
    async fn read_entries(&self) -> Result<Vec<ArchiveEntry>>;

    /// Read one entry's schema and rows. Failure here is per-entity.
    async fn read_container(&self, entry: &ArchiveEntry) -> Result<ContainerData>;

    /// Read one entry's schema only, without touching row data.
    async fn read_schema(&self, entry: &ArchiveEntry) -> Result<ContainerSchema>;

    /// Enumerate recorded view definitions.
    async fn read_views(&self) -> Result<Vec<ViewDefinition>>;

    /// Release any connection held by the counterpart.
    async fn close(&self) {}
}
