//! Run orchestrator - wires one invocation to an engine.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::archive::open_archive;
use crate::config::{CommandKind, Config, RunOptions};
use crate::core::{ArchiveTarget, ContainerStore};
use crate::engine::{ExportEngine, ImportEngine, RunResult};
use crate::error::Result;
use crate::ledger::ProgressLedger;
use crate::store::open_store;

/// Owns the store, the archive counterpart and the ledger of one run.
///
/// Both sides are opened once, in [`Orchestrator::new`]; whether the
/// counterpart is a file archive or a data source is never revisited per
/// entry.
pub struct Orchestrator {
    options: RunOptions,
    store: Arc<dyn ContainerStore>,
    archive: Arc<dyn ArchiveTarget>,
    ledger: Arc<ProgressLedger>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Validate `options` and open both sides of the run.
    pub async fn new(config: &Config, options: RunOptions) -> Result<Self> {
        options.validate()?;

        let max_connections = config
            .cluster
            .max_connections
            .unwrap_or(options.workers as u32);
        let store = open_store(&config.cluster.url, max_connections).await?;
        let archive = match open_archive(config, &options, max_connections).await {
            Ok(archive) => archive,
            Err(e) => {
                store.close().await;
                return Err(e);
            }
        };

        Ok(Self::from_parts(options, store, archive))
    }

    /// Build from already-open parts.
    pub fn from_parts(
        options: RunOptions,
        store: Arc<dyn ContainerStore>,
        archive: Arc<dyn ArchiveTarget>,
    ) -> Self {
        Self {
            options,
            store,
            archive,
            ledger: Arc::new(ProgressLedger::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token (e.g., wired to signals).
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The run's ledger, readable after a failed run.
    pub fn ledger(&self) -> Arc<ProgressLedger> {
        self.ledger.clone()
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Execute the run.
    ///
    /// Per-entity failures are reflected in `success`; configuration and
    /// structural failures are returned as errors.
    pub async fn run(self) -> Result<RunResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        info!("Starting {} run: {}", self.options.label(), run_id);
        info!(
            "Cluster: {} store, counterpart: {}",
            self.store.store_type(),
            self.archive.describe()
        );

        let outcome = match self.options.command {
            CommandKind::Export => {
                ExportEngine::new(
                    self.store.clone(),
                    self.archive.clone(),
                    self.ledger.clone(),
                    self.cancel.clone(),
                )
                .run(&self.options)
                .await
            }
            CommandKind::Import => {
                ImportEngine::new(
                    self.store.clone(),
                    self.archive.clone(),
                    self.ledger.clone(),
                    self.cancel.clone(),
                )
                .run(&self.options)
                .await
            }
        };

        self.archive.close().await;
        self.store.close().await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Run {} aborted: {}", run_id, e.describe());
                return Err(e);
            }
        };

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let counts = self.ledger.snapshot();

        info!(
            "Run {} {} in {:.1}s",
            run_id,
            if outcome.success { "completed" } else { "completed with failures" },
            duration
        );

        Ok(RunResult {
            run_id,
            command: self.options.command,
            mode: self.options.mode,
            test_mode: self.options.test_mode,
            target_type: self.options.target_type,
            success: outcome.success,
            failed_entities: counts.failed_entities.clone(),
            counts,
            started_at,
            completed_at,
            duration_seconds: duration,
            inventory: outcome.inventory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Mode, TargetType};
    use crate::error::MigrateError;
    use tempfile::TempDir;

    fn config(url: &str, archive: &std::path::Path) -> Config {
        let mut config = Config::from_yaml(&format!("cluster:\n  url: {}\n", url)).unwrap();
        config.archive.path = archive.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_export_of_empty_store_succeeds() {
        let dir = TempDir::new().unwrap();
        let config = config("memory://", dir.path());
        let options = RunOptions::export(&config).unwrap();

        let result = Orchestrator::new(&config, options)
            .await
            .unwrap()
            .run()
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.command, CommandKind::Export);
        assert_eq!(result.target_type, TargetType::ExportFile);
        assert!(result.to_json().unwrap().contains("\"run_id\""));
    }

    #[tokio::test]
    async fn test_missing_capability_surfaces_before_run() {
        let dir = TempDir::new().unwrap();
        let config = config("griddb://node1:10001/cluster", dir.path());
        let options = RunOptions::export(&config).unwrap();
        let err = Orchestrator::new(&config, options).await.err().unwrap();
        assert!(matches!(err, MigrateError::CapabilityMissing(_)));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let dir = TempDir::new().unwrap();
        let config = config("memory://", dir.path());
        let options = RunOptions::import(&config, Mode::List).unwrap().with_workers(0);
        let err = Orchestrator::new(&config, options).await.err().unwrap();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_structural() {
        let dir = TempDir::new().unwrap();
        let config = config("memory://", dir.path());
        let options = RunOptions::import(&config, Mode::Normal).unwrap();
        let orchestrator = Orchestrator::new(&config, options).await.unwrap();
        let ledger = orchestrator.ledger();

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, MigrateError::ArchiveCorrupt(_)));
        assert_eq!(ledger.snapshot().containers.total(), 0);
    }
}
