//! Export and import engines and the pieces they share.
//!
//! Both engines fan per-container work out to a bounded pool of tokio tasks.
//! Errors that belong to one container or view become ledger failures at the
//! task boundary; anything structural cancels the run's token, aborts the
//! remaining tasks and propagates.

mod export;
mod import;

pub use export::ExportEngine;
pub use import::ImportEngine;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::config::{CommandKind, Mode, TargetType};
use crate::core::{ArchiveEntry, ContainerKey, ViewDefinition};
use crate::error::{MigrateError, Result, Severity};
use crate::ledger::{EntityKind, LedgerSnapshot, ProgressLedger};

/// What happened to one container or view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Transferred (or, in test mode, would have been).
    Done { rows: u64 },
    /// Left alone because of a collision.
    Skipped,
}

/// Fold one entity's result into the ledger.
///
/// Entity-level errors are logged and counted; anything else cancels the run
/// and is returned.
pub(crate) fn record(
    ledger: &ProgressLedger,
    cancel: &CancellationToken,
    kind: EntityKind,
    entity: &str,
    result: Result<Outcome>,
) -> Result<()> {
    match result {
        Ok(Outcome::Done { rows }) => {
            ledger.record_success(kind);
            ledger.add_rows(rows);
            Ok(())
        }
        Ok(Outcome::Skipped) => {
            ledger.record_skip(kind);
            Ok(())
        }
        Err(e) if e.severity() == Severity::Entity => {
            error!("{}: failed - {}", entity, e);
            ledger.record_failure(kind, entity);
            Ok(())
        }
        Err(e) => {
            error!("{}: aborting run - {}", entity, e.describe());
            cancel.cancel();
            Err(e)
        }
    }
}

/// Bounded pool of per-container tasks sharing one cancellation token.
pub(crate) struct WorkerPool {
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    handles: Vec<(String, JoinHandle<Result<()>>)>,
}

impl WorkerPool {
    pub fn new(workers: usize, cancel: CancellationToken) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            cancel,
            handles: Vec::new(),
        }
    }

    /// Wait for a free worker and start `task` on it.
    ///
    /// Returns `false` without starting anything once the run is cancelled.
    pub async fn spawn<F>(&mut self, name: String, task: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return false;
        }
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            permit = self.semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };

        let handle = tokio::spawn(async move {
            let result = task.await;
            drop(permit);
            result
        });
        self.handles.push((name, handle));
        true
    }

    /// Wait for every task.
    ///
    /// The first failure (a structural error or a panicked task) aborts the
    /// tasks still running and is returned. A run cancelled from outside
    /// returns [`MigrateError::Cancelled`] once in-flight tasks finish.
    pub async fn join(self) -> Result<()> {
        let mut handles = self.handles.into_iter();

        while let Some((name, handle)) = handles.next() {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(MigrateError::Cancelled),
                Err(e) => {
                    error!("{}: task panicked - {}", name, e);
                    Err(MigrateError::InternalFault(format!(
                        "{}: task panicked: {}",
                        name, e
                    )))
                }
            };

            if let Err(e) = outcome {
                self.cancel.cancel();
                let rest: Vec<_> = handles.collect();
                for (_, handle) in &rest {
                    handle.abort();
                }
                for (_, handle) in rest {
                    let _ = handle.await;
                }
                return Err(e);
            }
        }

        if self.cancel.is_cancelled() {
            warn!("Run cancelled");
            return Err(MigrateError::Cancelled);
        }
        Ok(())
    }
}

/// Per-key async locks so that collision checks and writes for equal keys
/// never interleave.
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    locks: Mutex<HashMap<ContainerKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn lock_for(&self, key: &ContainerKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(key.clone()).or_default().clone()
    }
}

/// Engine-level result before the orchestrator stamps timing and identity.
#[derive(Debug, Clone, Default)]
pub struct EngineOutcome {
    /// No container or view failed.
    pub success: bool,
    /// Archive inventory, for list mode only.
    pub inventory: Option<Inventory>,
}

/// One container in an archive listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_file: Option<String>,
}

impl From<&ArchiveEntry> for InventoryEntry {
    fn from(entry: &ArchiveEntry) -> Self {
        Self {
            database: entry.key.database().map(str::to_string),
            container: entry.key.container().to_string(),
            row_count: entry.row_count,
            meta_file: entry.key.meta_file_name().map(str::to_string),
        }
    }
}

/// Containers and views recorded in an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub containers: Vec<InventoryEntry>,
    pub views: Vec<ViewDefinition>,
}

impl fmt::Display for Inventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Containers ({}):", self.containers.len())?;
        for c in &self.containers {
            let name = match &c.database {
                Some(db) => format!("{}.{}", db, c.container),
                None => c.container.clone(),
            };
            match c.row_count {
                Some(rows) => writeln!(f, "  {} ({} rows)", name, rows)?,
                None => writeln!(f, "  {}", name)?,
            }
        }
        write!(f, "Views ({}):", self.views.len())?;
        for v in &self.views {
            write!(f, "\n  {}", v.full_name())?;
        }
        Ok(())
    }
}

/// Result of one export or import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Unique run identifier.
    pub run_id: String,

    pub command: CommandKind,
    pub mode: Mode,
    pub test_mode: bool,
    pub target_type: TargetType,

    /// True iff no container or view failed.
    pub success: bool,

    /// Ledger counters at the end of the run.
    pub counts: LedgerSnapshot,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Names of failed containers and views.
    pub failed_entities: Vec<String>,

    /// Archive listing (list mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Inventory>,
}

impl RunResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_record_partitions_outcomes() {
        let ledger = ProgressLedger::new();
        let cancel = CancellationToken::new();

        let done = Ok(Outcome::Done { rows: 3 });
        record(&ledger, &cancel, EntityKind::Container, "a", done).unwrap();
        record(&ledger, &cancel, EntityKind::Container, "b", Ok(Outcome::Skipped)).unwrap();
        record(
            &ledger,
            &cancel,
            EntityKind::View,
            "c",
            Err(MigrateError::entity("c", "bad")),
        )
        .unwrap();

        let snap = ledger.snapshot();
        assert_eq!(snap.containers.succeeded, 1);
        assert_eq!(snap.containers.skipped, 1);
        assert_eq!(snap.views.failed, 1);
        assert_eq!(snap.rows, 3);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_record_structural_cancels() {
        let ledger = ProgressLedger::new();
        let cancel = CancellationToken::new();
        let err = record(
            &ledger,
            &cancel,
            EntityKind::Container,
            "x",
            Err(MigrateError::CapabilityMissing("client".into())),
        )
        .unwrap_err();
        assert!(matches!(err, MigrateError::CapabilityMissing(_)));
        assert!(cancel.is_cancelled());
        assert_eq!(ledger.snapshot().containers.failed, 0);
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(2, CancellationToken::new());

        for i in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            assert!(
                pool.spawn(format!("t{}", i), async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            );
        }
        pool.join().await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_pool_turns_panic_into_internal_fault() {
        let mut pool = WorkerPool::new(2, CancellationToken::new());
        let explode = true;
        pool.spawn("boom".into(), async move {
            if explode {
                panic!("boom");
            }
            Ok(())
        })
        .await;
        let err = pool.join().await.unwrap_err();
        assert!(matches!(err, MigrateError::InternalFault(_)));
    }

    #[tokio::test]
    async fn test_pool_stops_spawning_after_cancel() {
        let cancel = CancellationToken::new();
        let mut pool = WorkerPool::new(1, cancel.clone());
        cancel.cancel();
        assert!(!pool.spawn("late".into(), async { Ok(()) }).await);
        assert!(matches!(pool.join().await, Err(MigrateError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_pool_never_starts_queued_work_with_free_permits() {
        let started = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let cancel = CancellationToken::new();
            let mut pool = WorkerPool::new(4, cancel.clone());
            cancel.cancel();
            for i in 0..4 {
                let started = started.clone();
                let spawned = pool
                    .spawn(format!("queued{}", i), async move {
                        started.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await;
                assert!(!spawned);
            }
            assert!(matches!(pool.join().await, Err(MigrateError::Cancelled)));
        }
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_key_locks_are_shared_for_equal_keys() {
        let locks = KeyLocks::default();
        let a = locks.lock_for(&ContainerKey::in_database("db", "Sales"));
        let b = locks.lock_for(&ContainerKey::in_database("DB", "sales"));
        assert!(Arc::ptr_eq(&a, &b));
        let _guard = a.lock().await;
        assert!(b.try_lock().is_err());
    }

    #[test]
    fn test_inventory_display() {
        let inventory = Inventory {
            containers: vec![InventoryEntry {
                database: Some("db".into()),
                container: "c".into(),
                row_count: Some(4),
                meta_file: None,
            }],
            views: vec![ViewDefinition::new("db", "v", "SELECT 1")],
        };
        let text = inventory.to_string();
        assert!(text.contains("db.c (4 rows)"));
        assert!(text.contains("db.v"));
    }
}
