//! Export: cluster containers and views out to the archive side.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{record, EngineOutcome, Outcome, WorkerPool};
use crate::config::RunOptions;
use crate::core::{
    ArchiveTarget, ContainerData, ContainerKey, ContainerStore, RowFilter, ViewDefinition,
};
use crate::error::{MigrateError, Result};
use crate::ledger::{EntityKind, ProgressLedger};

/// Writes selected containers and views from a store to an archive target.
pub struct ExportEngine {
    store: Arc<dyn ContainerStore>,
    archive: Arc<dyn ArchiveTarget>,
    ledger: Arc<ProgressLedger>,
    cancel: CancellationToken,
}

/// Everything one export task needs.
struct ContainerJob {
    store: Arc<dyn ContainerStore>,
    archive: Arc<dyn ArchiveTarget>,
    key: ContainerKey,
    test_mode: bool,
    schema_only: bool,
}

impl ContainerJob {
    async fn execute(self) -> Result<Outcome> {
        let key = &self.key;
        let schema = self.store.get_schema(key).await?;
        let mut rows = if self.schema_only {
            Vec::new()
        } else {
            self.store.read_rows(key).await?
        };

        if let Some(condition) = key.filter_condition() {
            let filter = RowFilter::parse(condition, &schema).map_err(|e| {
                MigrateError::entity(key.to_string(), format!("filter {:?}: {}", condition, e))
            })?;
            let before = rows.len();
            rows = filter.apply(rows);
            debug!("{}: filter kept {} of {} rows", key, rows.len(), before);
        }

        let data = ContainerData::new(schema, rows);
        let row_count = data.row_count();

        if self.test_mode {
            info!("[test] {}: would export {} rows", key, row_count);
        } else {
            self.archive.write_container(key, &data).await?;
            info!("{}: exported {} rows", key, row_count);
        }

        Ok(Outcome::Done { rows: row_count })
    }
}

impl ExportEngine {
    pub fn new(
        store: Arc<dyn ContainerStore>,
        archive: Arc<dyn ArchiveTarget>,
        ledger: Arc<ProgressLedger>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            archive,
            ledger,
            cancel,
        }
    }

    /// Run the export. `success` is false when any container or view failed.
    pub async fn run(&self, options: &RunOptions) -> Result<EngineOutcome> {
        let keys = self.select_containers(options).await?;
        info!(
            "Exporting {} containers to {} with {} workers{}",
            keys.len(),
            self.archive.describe(),
            options.workers,
            if options.test_mode { " (test mode)" } else { "" }
        );

        let mut pool = WorkerPool::new(options.workers, self.cancel.clone());
        for key in keys {
            let name = key.to_string();
            let job = ContainerJob {
                store: self.store.clone(),
                archive: self.archive.clone(),
                key,
                test_mode: options.test_mode,
                schema_only: options.schema_only,
            };
            let ledger = self.ledger.clone();
            let cancel = self.cancel.clone();
            let entity = name.clone();

            let started = pool
                .spawn(name, async move {
                    let result = job.execute().await;
                    record(&ledger, &cancel, EntityKind::Container, &entity, result)
                })
                .await;
            if !started {
                info!("Cancellation requested, stopping new exports");
                break;
            }
        }
        pool.join().await?;

        if options.include_views {
            self.export_views(options).await?;
        }

        if !options.test_mode {
            self.archive.finish().await?;
        }

        Ok(EngineOutcome {
            success: !self.ledger.has_failures(),
            inventory: None,
        })
    }

    /// Enumerate, select and attach export filters.
    async fn select_containers(&self, options: &RunOptions) -> Result<Vec<ContainerKey>> {
        let mut keys: Vec<ContainerKey> = self
            .store
            .list_containers(options.selection.database())
            .await?
            .into_iter()
            .filter(|k| options.selection.matches(k))
            .collect();
        for key in &mut keys {
            options.filters.attach(key);
        }
        Ok(keys)
    }

    async fn export_views(&self, options: &RunOptions) -> Result<()> {
        let views: Vec<ViewDefinition> = self
            .store
            .list_views(options.selection.database())
            .await?
            .into_iter()
            .filter(|v| options.selection.matches_view(v))
            .collect();
        info!("Exporting {} views", views.len());

        for view in views {
            if self.cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            let result = if options.test_mode {
                info!("[test] {}: would export view", view.full_name());
                Ok(Outcome::Done { rows: 0 })
            } else {
                self.archive
                    .write_view(&view)
                    .await
                    .map(|_| Outcome::Done { rows: 0 })
            };
            record(
                &self.ledger,
                &self.cancel,
                EntityKind::View,
                &view.full_name(),
                result,
            )?;
        }
        Ok(())
    }
}
