//! Metrics collection for import monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Import metrics.
pub struct ImportMetrics {
    /// Provider imports attempted.
    pub imports_total: AtomicU64,
    /// Imports that stored their table.
    pub imports_succeeded: AtomicU64,
    /// Imports failed by a storage error.
    pub imports_failed: AtomicU64,
    /// Providers evaluated but not due.
    pub imports_skipped: AtomicU64,
    /// Absorbed upstream fetch or validation failures.
    pub fetch_failures: AtomicU64,
    /// Rate entries written to latest tables.
    pub rows_written: AtomicU64,
}

impl ImportMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            imports_total: AtomicU64::new(0),
            imports_succeeded: AtomicU64::new(0),
            imports_failed: AtomicU64::new(0),
            imports_skipped: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
        }
    }

    pub fn import_started(&self) {
        self.imports_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stored import and its row count.
    pub fn import_succeeded(&self, rows: usize) {
        self.imports_succeeded.fetch_add(1, Ordering::Relaxed);
        self.rows_written.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn import_failed(&self) {
        self.imports_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn import_skipped(&self) {
        self.imports_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fetch_failed(&self, count: usize) {
        self.fetch_failures.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> ImportMetricsSnapshot {
        ImportMetricsSnapshot {
            imports_total: self.imports_total.load(Ordering::Relaxed),
            imports_succeeded: self.imports_succeeded.load(Ordering::Relaxed),
            imports_failed: self.imports_failed.load(Ordering::Relaxed),
            imports_skipped: self.imports_skipped.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP exchanger_imports_total Provider imports attempted
# TYPE exchanger_imports_total counter
exchanger_imports_total {}

# HELP exchanger_imports_succeeded Provider imports stored
# TYPE exchanger_imports_succeeded counter
exchanger_imports_succeeded {}

# HELP exchanger_imports_failed Provider imports failed by storage errors
# TYPE exchanger_imports_failed counter
exchanger_imports_failed {}

# HELP exchanger_imports_skipped Providers evaluated and not due
# TYPE exchanger_imports_skipped counter
exchanger_imports_skipped {}

# HELP exchanger_fetch_failures Upstream fetch failures absorbed during imports
# TYPE exchanger_fetch_failures counter
exchanger_fetch_failures {}

# HELP exchanger_rows_written Rate entries written to latest tables
# TYPE exchanger_rows_written counter
exchanger_rows_written {}
"#,
            snapshot.imports_total,
            snapshot.imports_succeeded,
            snapshot.imports_failed,
            snapshot.imports_skipped,
            snapshot.fetch_failures,
            snapshot.rows_written,
        )
    }
}

impl Default for ImportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportMetricsSnapshot {
    pub imports_total: u64,
    pub imports_succeeded: u64,
    pub imports_failed: u64,
    pub imports_skipped: u64,
    pub fetch_failures: u64,
    pub rows_written: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<ImportMetrics>;
