//! Import: archive entries into the cluster, under a collision mode.
//!
//! | Mode | Existing container | Missing container |
//! |---|---|---|
//! | Normal | skip (warn) | create |
//! | Append | append if schemas are compatible | create |
//! | Replace | drop and recreate | create |
//! | List | never touches the cluster | |

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{record, EngineOutcome, Inventory, InventoryEntry, KeyLocks, Outcome, WorkerPool};
use crate::config::{Mode, RunOptions};
use crate::core::{
    ArchiveEntry, ArchiveTarget, ContainerData, ContainerKey, ContainerSchema, ContainerStore,
    ViewDefinition,
};
use crate::error::{MigrateError, Result};
use crate::ledger::{EntityKind, ProgressLedger};

/// Reads archive entries and applies them to a store.
pub struct ImportEngine {
    store: Arc<dyn ContainerStore>,
    archive: Arc<dyn ArchiveTarget>,
    ledger: Arc<ProgressLedger>,
    cancel: CancellationToken,
}

/// Containers a test-mode run has pretended to create, with their schemas.
#[derive(Debug, Default)]
struct Simulated {
    containers: Mutex<HashMap<ContainerKey, ContainerSchema>>,
    views: Mutex<HashSet<(String, String)>>,
}

impl Simulated {
    fn schema(&self, key: &ContainerKey) -> Option<ContainerSchema> {
        match self.containers.lock() {
            Ok(map) => map.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }

    fn create(&self, key: &ContainerKey, schema: &ContainerSchema) {
        match self.containers.lock() {
            Ok(mut map) => map.insert(key.clone(), schema.clone()),
            Err(poisoned) => poisoned.into_inner().insert(key.clone(), schema.clone()),
        };
    }

    fn has_view(&self, view: &ViewDefinition) -> bool {
        let name = (view.database().to_string(), view.view().to_string());
        match self.views.lock() {
            Ok(set) => set.contains(&name),
            Err(poisoned) => poisoned.into_inner().contains(&name),
        }
    }

    fn create_view(&self, view: &ViewDefinition) {
        let name = (view.database().to_string(), view.view().to_string());
        match self.views.lock() {
            Ok(mut set) => set.insert(name),
            Err(poisoned) => poisoned.into_inner().insert(name),
        };
    }
}

/// State shared by every import task of one run.
struct ImportContext {
    store: Arc<dyn ContainerStore>,
    archive: Arc<dyn ArchiveTarget>,
    locks: KeyLocks,
    simulated: Simulated,
    mode: Mode,
    test_mode: bool,
    schema_only: bool,
}

impl ImportContext {
    /// Schema of the destination container, if one with an equal key exists.
    async fn existing_schema(&self, key: &ContainerKey) -> Result<Option<ContainerSchema>> {
        if self.test_mode {
            if let Some(schema) = self.simulated.schema(key) {
                return Ok(Some(schema));
            }
        }
        if self.store.container_exists(key).await? {
            Ok(Some(self.store.get_schema(key).await?))
        } else {
            Ok(None)
        }
    }

    async fn load(&self, entry: &ArchiveEntry) -> Result<ContainerData> {
        if self.schema_only {
            Ok(ContainerData::schema_only(
                self.archive.read_schema(entry).await?,
            ))
        } else {
            self.archive.read_container(entry).await
        }
    }

    async fn import_entry(&self, entry: &ArchiveEntry) -> Result<Outcome> {
        let key = &entry.key;
        let lock = self.locks.lock_for(key);
        let _guard = lock.lock().await;

        let existing = self.existing_schema(key).await?;
        let prefix = if self.test_mode { "[test] " } else { "" };

        match (self.mode, existing) {
            (Mode::List, _) => Err(MigrateError::InternalFault(
                "list mode reached the transfer path".into(),
            )),
            (Mode::Normal, Some(_)) => {
                warn!("{}{}: already exists, skipping", prefix, key);
                Ok(Outcome::Skipped)
            }
            (Mode::Append, Some(current)) => {
                let data = self.load(entry).await?;
                if let Some(reason) = current.incompatibility(&data.schema) {
                    return Err(MigrateError::entity(
                        key.to_string(),
                        format!("cannot append, schema is incompatible: {}", reason),
                    ));
                }
                let rows = if self.test_mode {
                    data.row_count()
                } else {
                    self.store.append_rows(key, &data.rows).await?
                };
                info!("{}{}: appended {} rows", prefix, key, rows);
                Ok(Outcome::Done { rows })
            }
            (Mode::Replace, Some(_)) => {
                let data = self.load(entry).await?;
                if self.test_mode {
                    self.simulated.create(key, &data.schema);
                } else {
                    self.store.replace_container(key, &data).await?;
                }
                info!("{}{}: replaced ({} rows)", prefix, key, data.row_count());
                Ok(Outcome::Done {
                    rows: data.row_count(),
                })
            }
            (_, None) => {
                let data = self.load(entry).await?;
                if self.test_mode {
                    self.simulated.create(key, &data.schema);
                } else {
                    self.store.create_container(key, &data).await?;
                }
                info!("{}{}: created ({} rows)", prefix, key, data.row_count());
                Ok(Outcome::Done {
                    rows: data.row_count(),
                })
            }
        }
    }

    async fn import_view(&self, view: &ViewDefinition) -> Result<Outcome> {
        let exists = (self.test_mode && self.simulated.has_view(view))
            || self
                .store
                .get_view(view.database(), view.view())
                .await?
                .is_some();
        let prefix = if self.test_mode { "[test] " } else { "" };

        if exists && self.mode != Mode::Replace {
            warn!("{}{}: view already exists, skipping", prefix, view.full_name());
            return Ok(Outcome::Skipped);
        }

        if self.test_mode {
            self.simulated.create_view(view);
        } else {
            self.store.put_view(view).await?;
        }
        info!(
            "{}{}: view {}",
            prefix,
            view.full_name(),
            if exists { "replaced" } else { "created" }
        );
        Ok(Outcome::Done { rows: 0 })
    }
}

impl ImportEngine {
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

    /// Run the import. `success` is false when any entry or view failed;
    /// skips are not failures.
    pub async fn run(&self, options: &RunOptions) -> Result<EngineOutcome> {
        let entries: Vec<ArchiveEntry> = self
            .archive
            .read_entries()
            .await?
            .into_iter()
            .filter(|e| options.selection.matches(&e.key))
            .collect();

        if options.mode == Mode::List {
            return self.list(options, &entries).await;
        }

        info!(
            "Importing {} containers from {} ({}) with {} workers{}",
            entries.len(),
            self.archive.describe(),
            options.label(),
            options.workers,
            if options.test_mode { " (test mode)" } else { "" }
        );

        let ctx = Arc::new(ImportContext {
            store: self.store.clone(),
            archive: self.archive.clone(),
            locks: KeyLocks::default(),
            simulated: Simulated::default(),
            mode: options.mode,
            test_mode: options.test_mode,
            schema_only: options.schema_only,
        });

        let mut pool = WorkerPool::new(options.workers, self.cancel.clone());
        for entry in entries {
            let name = entry.key.to_string();
            let ctx = ctx.clone();
            let ledger = self.ledger.clone();
            let cancel = self.cancel.clone();
            let entity = name.clone();

            let started = pool
                .spawn(name, async move {
                    let result = ctx.import_entry(&entry).await;
                    record(&ledger, &cancel, EntityKind::Container, &entity, result)
                })
                .await;
            if !started {
                info!("Cancellation requested, stopping new imports");
                break;
            }
        }
        pool.join().await?;

        if options.include_views {
            let views: Vec<ViewDefinition> = self
                .archive
                .read_views()
                .await?
                .into_iter()
                .filter(|v| options.selection.matches_view(v))
                .collect();
            info!("Importing {} views", views.len());

            for view in views {
                if self.cancel.is_cancelled() {
                    return Err(MigrateError::Cancelled);
                }
                let result = ctx.import_view(&view).await;
                record(
                    &self.ledger,
                    &self.cancel,
                    EntityKind::View,
                    &view.full_name(),
                    result,
                )?;
            }
        }

        Ok(EngineOutcome {
            success: !self.ledger.has_failures(),
            inventory: None,
        })
    }

    /// Archive metadata only: no destination access, no row reads.
    async fn list(&self, options: &RunOptions, entries: &[ArchiveEntry]) -> Result<EngineOutcome> {
        let views = if options.include_views {
            self.archive
                .read_views()
                .await?
                .into_iter()
                .filter(|v| options.selection.matches_view(v))
                .collect()
        } else {
            Vec::new()
        };

        Ok(EngineOutcome {
            success: true,
            inventory: Some(Inventory {
                containers: entries.iter().map(InventoryEntry::from).collect(),
                views,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::DataSourceArchive;
    use crate::config::Config;
    use crate::core::{Column, ColumnType, ContainerKind, Value};
    use crate::store::MemoryStore;

    fn schema(extra: bool) -> ContainerSchema {
        let mut columns = vec![Column::new("id", ColumnType::Long).not_null()];
        if extra {
            columns.push(Column::new("note", ColumnType::String));
        }
        ContainerSchema::new(ContainerKind::Collection, columns, true)
    }

    fn data(n: i64) -> ContainerData {
        ContainerData::new(schema(false), (0..n).map(|i| vec![Value::Long(i)]).collect())
    }

    /// Archive side backed by an in-memory data source holding `names`.
    async fn source(names: &[&str]) -> Arc<DataSourceArchive> {
        let store = Arc::new(MemoryStore::new());
        for name in names {
            store
                .create_container(&ContainerKey::in_database("db", name), &data(3))
                .await
                .unwrap();
        }
        store
            .put_view(&ViewDefinition::new("db", "v", "SELECT 1"))
            .await
            .unwrap();
        Arc::new(DataSourceArchive::new(store))
    }

    fn options(mode: Mode) -> RunOptions {
        let config = Config::from_yaml("cluster:\n  url: memory://\n").unwrap();
        RunOptions::import(&config, mode).unwrap().with_workers(3)
    }

    async fn run(
        dest: Arc<MemoryStore>,
        archive: Arc<DataSourceArchive>,
        opts: &RunOptions,
    ) -> (EngineOutcome, crate::ledger::LedgerSnapshot) {
        let ledger = Arc::new(ProgressLedger::new());
        let engine = ImportEngine::new(dest, archive, ledger.clone(), CancellationToken::new());
        let outcome = engine.run(opts).await.unwrap();
        (outcome, ledger.snapshot())
    }

    #[tokio::test]
    async fn test_normal_creates_then_skips() {
        let dest = Arc::new(MemoryStore::new());
        let archive = source(&["a", "b"]).await;

        let (outcome, snap) = run(dest.clone(), archive.clone(), &options(Mode::Normal)).await;
        assert!(outcome.success);
        assert_eq!(snap.containers.succeeded, 2);
        assert_eq!(snap.views.succeeded, 1);

        let (outcome, snap) = run(dest, archive, &options(Mode::Normal)).await;
        assert!(outcome.success);
        assert_eq!(snap.containers.succeeded, 0);
        assert_eq!(snap.containers.skipped, 2);
        assert_eq!(snap.views.skipped, 1);
    }

    #[tokio::test]
    async fn test_append_rejects_incompatible_schema() {
        let dest = Arc::new(MemoryStore::new());
        dest.create_container(
            &ContainerKey::in_database("DB", "A"),
            &ContainerData::schema_only(schema(true)),
        )
        .await
        .unwrap();

        let (outcome, snap) = run(dest, source(&["a", "b"]).await, &options(Mode::Append)).await;
        assert!(!outcome.success);
        assert_eq!(snap.containers.failed, 1);
        assert_eq!(snap.containers.succeeded, 1);
    }

    #[tokio::test]
    async fn test_replace_overwrites_view_definition() {
        let dest = Arc::new(MemoryStore::new());
        dest.put_view(&ViewDefinition::new("db", "v", "SELECT old"))
            .await
            .unwrap();

        let (_, snap) = run(dest.clone(), source(&[]).await, &options(Mode::Replace)).await;
        assert_eq!(snap.views.succeeded, 1);
        assert_eq!(
            dest.get_view("db", "v").await.unwrap().unwrap().definition(),
            "SELECT 1"
        );
    }

    #[tokio::test]
    async fn test_list_returns_inventory_without_touching_destination() {
        let dest = Arc::new(MemoryStore::new());
        let (outcome, snap) = run(dest.clone(), source(&["a"]).await, &options(Mode::List)).await;

        let inventory = outcome.inventory.unwrap();
        assert_eq!(inventory.containers.len(), 1);
        assert_eq!(inventory.views.len(), 1);
        assert_eq!(snap, crate::ledger::LedgerSnapshot::default());
        assert!(dest.list_containers(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_test_mode_simulates_duplicates_like_a_real_run() {
        let archive = source(&["a"]).await;
        let dest = Arc::new(MemoryStore::new());

        let (_, dry) = run(
            dest.clone(),
            archive.clone(),
            &options(Mode::Normal).with_test_mode(true),
        )
        .await;
        assert!(dest.list_containers(None).await.unwrap().is_empty());
        assert!(dest.list_views(None).await.unwrap().is_empty());

        let (_, real) = run(dest, archive, &options(Mode::Normal)).await;
        assert_eq!(dry, real);
    }
}
