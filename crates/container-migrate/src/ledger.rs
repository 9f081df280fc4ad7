//! Run-scoped success/failure/skip counters.
//!
//! One [`ProgressLedger`] is created per run and shared with worker tasks
//! behind an `Arc`. Counters are atomics, so concurrent increments need no
//! extra locking; the failure list is behind a mutex.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Entity class a counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Container,
    View,
}

#[derive(Debug, Default)]
struct Counters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> KindCounts {
        KindCounts {
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
        }
    }
}

/// Process counters for one run.
#[derive(Debug, Default)]
pub struct ProgressLedger {
    containers: Counters,
    views: Counters,
    rows: AtomicU64,
    failures: Mutex<Vec<String>>,
}

impl ProgressLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, kind: EntityKind) -> &Counters {
        match kind {
            EntityKind::Container => &self.containers,
            EntityKind::View => &self.views,
        }
    }

    pub fn record_success(&self, kind: EntityKind) {
        self.counters(kind).succeeded.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a failure and remember which entity failed.
    pub fn record_failure(&self, kind: EntityKind, entity: &str) {
        self.counters(kind).failed.fetch_add(1, Ordering::SeqCst);
        match self.failures.lock() {
            Ok(mut failures) => failures.push(entity.to_string()),
            Err(poisoned) => poisoned.into_inner().push(entity.to_string()),
        }
    }

    pub fn record_skip(&self, kind: EntityKind) {
        self.counters(kind).skipped.fetch_add(1, Ordering::SeqCst);
    }

    /// Add rows moved (or, in test mode, rows that would have moved).
    pub fn add_rows(&self, rows: u64) {
        self.rows.fetch_add(rows, Ordering::SeqCst);
    }

    pub fn has_failures(&self) -> bool {
        self.containers.failed.load(Ordering::SeqCst) > 0
            || self.views.failed.load(Ordering::SeqCst) > 0
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut failed_entities = match self.failures.lock() {
            Ok(failures) => failures.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        failed_entities.sort();

        LedgerSnapshot {
            containers: self.containers.snapshot(),
            views: self.views.snapshot(),
            rows: self.rows.load(Ordering::SeqCst),
            failed_entities,
        }
    }

    /// Print the summary block to stdout.
    pub fn print_summary(&self) {
        println!("{}", self.snapshot());
    }
}

/// Counts for one entity class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl KindCounts {
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed + self.skipped
    }
}

/// Immutable copy of a ledger, carried in the run result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub containers: KindCounts,
    pub views: KindCounts,
    pub rows: u64,
    pub failed_entities: Vec<String>,
}

impl LedgerSnapshot {
    pub fn has_failures(&self) -> bool {
        self.containers.failed > 0 || self.views.failed > 0
    }
}

impl fmt::Display for LedgerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  Containers: {} succeeded, {} failed, {} skipped",
            self.containers.succeeded, self.containers.failed, self.containers.skipped
        )?;
        writeln!(
            f,
            "  Views: {} succeeded, {} failed, {} skipped",
            self.views.succeeded, self.views.failed, self.views.skipped
        )?;
        write!(f, "  Rows: {}", self.rows)?;
        if !self.failed_entities.is_empty() {
            write!(f, "\n  Failed: {}", self.failed_entities.join(", "))?;
        }
        Ok(())
    }
}
