//! A live external data source used as the archive side of a run.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{
    ArchiveEntry, ArchiveTarget, ContainerData, ContainerKey, ContainerSchema, ContainerStore,
    ViewDefinition,
};
use crate::error::Result;

/// Archive counterpart backed by another container store.
///
/// Export writes replace same-named containers in the data source. Import
/// enumerates the data source's containers and views as entries.
pub struct DataSourceArchive {
    store: Arc<dyn ContainerStore>,
}

impl DataSourceArchive {
    pub fn new(store: Arc<dyn ContainerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ArchiveTarget for DataSourceArchive {
    fn describe(&self) -> String {
        format!("{} data source", self.store.store_type())
    }

    async fn write_container(
        &self,
        key: &ContainerKey,
        data: &ContainerData,
    ) -> Result<ArchiveEntry> {
        self.store.replace_container(key, data).await?;
        Ok(ArchiveEntry {
            key: key.clone(),
            row_count: Some(data.row_count()),
        })
    }

    async fn write_view(&self, view: &ViewDefinition) -> Result<()> {
        self.store.put_view(view).await
    }

    async fn finish(&self) -> Result<()> {
        Ok(())
    }

    async fn read_entries(&self) -> Result<Vec<ArchiveEntry>> {
        Ok(self
            .store
            .list_containers(None)
            .await?
            .into_iter()
            .map(|key| ArchiveEntry {
                key,
                row_count: None,
            })
            .collect())
    }

    async fn read_container(&self, entry: &ArchiveEntry) -> Result<ContainerData> {
        let schema = self.store.get_schema(&entry.key).await?;
        let rows = self.store.read_rows(&entry.key).await?;
        Ok(ContainerData::new(schema, rows))
    }

    async fn read_schema(&self, entry: &ArchiveEntry) -> Result<ContainerSchema> {
        self.store.get_schema(&entry.key).await
    }

    async fn read_views(&self) -> Result<Vec<ViewDefinition>> {
        self.store.list_views(None).await
    }

    async fn close(&self) {
        self.store.close().await;
    }
}
