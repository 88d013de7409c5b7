use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

/// Execution events emitted by the engine.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        batches: usize,
        files: usize,
    },
    BatchStarted {
        index: usize,
        files: usize,
        bytes: u64,
    },
    ThrottleWaited {
        duration: Duration,
    },
    FileStarted {
        batch: usize,
        file: String,
    },
    FileFinished {
        batch: usize,
        file: String,
        tables: usize,
        rows: usize,
    },
    FileFailed {
        batch: usize,
        file: String,
        error: String,
    },
    BatchFinished {
        index: usize,
        succeeded: usize,
        failed: usize,
    },
    RunFinished {
        elapsed: Duration,
        metrics: ExecutionMetricsSnapshot,
    },
}

/// Observer hook for execution events.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Forwards execution events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingExecutionObserver;

impl ExecutionObserver for TracingExecutionObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::RunStarted { batches, files } => {
                info!(batches, files, "run started");
            }
            ExecutionEvent::BatchStarted { index, files, bytes } => {
                info!(batch = index, files, bytes, "batch started");
            }
            ExecutionEvent::ThrottleWaited { duration } => {
                debug!(waited = ?duration, "throttled");
            }
            ExecutionEvent::FileStarted { batch, file } => {
                debug!(batch, file = %file, "file started");
            }
            ExecutionEvent::FileFinished {
                batch,
                file,
                tables,
                rows,
            } => {
                info!(batch, file = %file, tables, rows, "file loaded");
            }
            ExecutionEvent::FileFailed { batch, file, error } => {
                warn!(batch, file = %file, error = %error, "file failed");
            }
            ExecutionEvent::BatchFinished {
                index,
                succeeded,
                failed,
            } => {
                info!(batch = index, succeeded, failed, "batch finished");
            }
            ExecutionEvent::RunFinished { elapsed, metrics } => {
                info!(elapsed = ?elapsed, metrics = %metrics, "run finished");
            }
        }
    }
}

/// Real-time metrics for an execution run.
///
/// The engine updates these counters during execution; callers can snapshot them at any time.
pub struct ExecutionMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,

    batches_finished: AtomicU64,
    files_started: AtomicU64,
    files_finished: AtomicU64,
    files_failed: AtomicU64,
    tables_loaded: AtomicU64,
    rows_loaded: AtomicU64,
    throttle_wait_ns: AtomicU64,

    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self {
            run_id: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
            batches_finished: AtomicU64::new(0),
            files_started: AtomicU64::new(0),
            files_finished: AtomicU64::new(0),
            files_failed: AtomicU64::new(0),
            tables_loaded: AtomicU64::new(0),
            rows_loaded: AtomicU64::new(0),
            throttle_wait_ns: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn begin_run(&self) {
        let _ = self.run_id.fetch_add(1, Ordering::SeqCst);
        for counter in [
            &self.elapsed_ns,
            &self.batches_finished,
            &self.files_started,
            &self.files_finished,
            &self.files_failed,
            &self.tables_loaded,
            &self.rows_loaded,
            &self.throttle_wait_ns,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        self.in_flight.store(0, Ordering::SeqCst);
        self.max_in_flight.store(0, Ordering::SeqCst);
    }

    pub fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns.store(saturating_nanos(elapsed), Ordering::SeqCst);
    }

    pub fn on_file_start(&self) {
        let _ = self.files_started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        update_max_usize(&self.max_in_flight, now);
    }

    pub fn on_file_loaded(&self, tables: usize, rows: usize) {
        let _ = self.files_finished.fetch_add(1, Ordering::SeqCst);
        let _ = self.tables_loaded.fetch_add(tables as u64, Ordering::SeqCst);
        let _ = self.rows_loaded.fetch_add(rows as u64, Ordering::SeqCst);
        let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Tables committed by a file that failed afterwards; counted as loaded, not finished.
    pub fn on_partial_load(&self, tables: usize, rows: usize) {
        let _ = self.tables_loaded.fetch_add(tables as u64, Ordering::SeqCst);
        let _ = self.rows_loaded.fetch_add(rows as u64, Ordering::SeqCst);
    }

    pub fn on_file_failed(&self) {
        let _ = self.files_failed.fetch_add(1, Ordering::SeqCst);
        let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn on_batch_end(&self) {
        let _ = self.batches_finished.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_throttle_wait(&self, d: Duration) {
        let _ = self
            .throttle_wait_ns
            .fetch_add(saturating_nanos(d), Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        ExecutionMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed: (elapsed_ns > 0).then(|| Duration::from_nanos(elapsed_ns)),
            batches_finished: self.batches_finished.load(Ordering::SeqCst),
            files_started: self.files_started.load(Ordering::SeqCst),
            files_finished: self.files_finished.load(Ordering::SeqCst),
            files_failed: self.files_failed.load(Ordering::SeqCst),
            tables_loaded: self.tables_loaded.load(Ordering::SeqCst),
            rows_loaded: self.rows_loaded.load(Ordering::SeqCst),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.load(Ordering::SeqCst)),
            max_in_flight: self.max_in_flight.load(Ordering::SeqCst),
        }
    }
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    d.as_nanos().min(u64::MAX as u128) as u64
}

fn update_max_usize(dst: &AtomicUsize, now: usize) {
    let _ = dst.fetch_max(now, Ordering::SeqCst);
}

/// Immutable snapshot of [`ExecutionMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub batches_finished: u64,
    pub files_started: u64,
    pub files_finished: u64,
    pub files_failed: u64,
    pub tables_loaded: u64,
    pub rows_loaded: u64,
    pub throttle_wait: Duration,
    pub max_in_flight: usize,
}

impl fmt::Display for ExecutionMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, batches={}, files={}/{} ({} failed), tables={}, rows={}, max_in_flight={}, throttle_wait={:?}, elapsed={:?}",
            self.run_id,
            self.batches_finished,
            self.files_finished,
            self.files_started,
            self.files_failed,
            self.tables_loaded,
            self.rows_loaded,
            self.max_in_flight,
            self.throttle_wait,
            self.elapsed
        )
    }
}
