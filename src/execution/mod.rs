//! Execution engine for the per-file extract → load pipeline.
//!
//! Batches run one after another, in schedule order. Within a batch, files run either one at a
//! time ([`TaskRunner::Sequential`]) or on a worker pool with at most `concurrency_limit` files
//! in flight ([`TaskRunner::Concurrent`]). A failing file never stops its siblings: every task
//! yields a [`TaskOutcome`], and the engine reports progress through [`ExecutionEvent`]s and
//! live [`ExecutionMetrics`].

mod observer;
mod semaphore;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

use crate::catalog::SourceFile;
use crate::config::{EngineOptions, TaskRunner};
use crate::error::ExecutionResult;
use crate::scheduler::{Batch, HasSize};

pub use observer::{
    ExecutionEvent, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver,
    TracingExecutionObserver,
};

use semaphore::Semaphore;

/// Something the engine can run a task for.
pub trait TaskItem: HasSize + Sync {
    /// Identity used in events and logs.
    fn label(&self) -> String;
}

impl TaskItem for SourceFile {
    fn label(&self) -> String {
        self.path.display().to_string()
    }
}

/// What a successful task loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskReport {
    pub tables: usize,
    pub rows: usize,
}

/// Result of one task, in schedule order.
#[derive(Debug)]
pub struct TaskOutcome<E> {
    pub batch: usize,
    pub item: String,
    pub result: Result<TaskReport, E>,
}

/// Runs tasks over scheduled batches with bounded parallelism.
pub struct IngestEngine {
    pool: Option<ThreadPool>,
    opts: EngineOptions,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl IngestEngine {
    /// Create an engine. The concurrent runner gets a pool of `concurrency_limit` threads.
    pub fn new(opts: EngineOptions) -> ExecutionResult<Self> {
        opts.validate()?;
        let pool = match opts.runner {
            TaskRunner::Sequential => None,
            TaskRunner::Concurrent => Some(
                ThreadPoolBuilder::new()
                    .num_threads(opts.concurrency_limit)
                    .thread_name(|i| format!("ingest-worker-{i}"))
                    .build()?,
            ),
        };
        Ok(Self {
            pool,
            opts,
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        })
    }

    /// Attach an observer for execution events.
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time execution metrics.
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.opts
    }

    /// Run `task` for every item of every batch. Outcomes keep schedule order.
    pub fn run<T, E, F>(&self, batches: &[Batch<T>], task: F) -> Vec<TaskOutcome<E>>
    where
        T: TaskItem,
        E: fmt::Display + Send,
        F: Fn(&T) -> Result<TaskReport, E> + Send + Sync,
    {
        let start = Instant::now();
        self.metrics.begin_run();
        self.emit(ExecutionEvent::RunStarted {
            batches: batches.len(),
            files: batches.iter().map(|b| b.items.len()).sum(),
        });

        let mut outcomes = Vec::new();
        for batch in batches {
            self.emit(ExecutionEvent::BatchStarted {
                index: batch.index,
                files: batch.items.len(),
                bytes: batch.total_bytes(),
            });

            let batch_outcomes: Vec<TaskOutcome<E>> = match &self.pool {
                None => batch
                    .items
                    .iter()
                    .map(|item| self.run_one(batch.index, item, &task))
                    .collect(),
                Some(pool) => {
                    let sem = Semaphore::new(self.opts.concurrency_limit);
                    pool.install(|| {
                        batch
                            .items
                            .par_iter()
                            .map(|item| {
                                let (_permit, waited) = sem.acquire();
                                if waited > Duration::ZERO {
                                    self.metrics.on_throttle_wait(waited);
                                    self.emit(ExecutionEvent::ThrottleWaited { duration: waited });
                                }
                                self.run_one(batch.index, item, &task)
                            })
                            .collect()
                    })
                }
            };

            let failed = batch_outcomes.iter().filter(|o| o.result.is_err()).count();
            self.metrics.on_batch_end();
            self.emit(ExecutionEvent::BatchFinished {
                index: batch.index,
                succeeded: batch_outcomes.len() - failed,
                failed,
            });
            outcomes.extend(batch_outcomes);
        }

        self.metrics.end_run(start.elapsed());
        self.emit(ExecutionEvent::RunFinished {
            elapsed: start.elapsed(),
            metrics: self.metrics.snapshot(),
        });
        outcomes
    }

    fn run_one<T, E, F>(&self, batch: usize, item: &T, task: &F) -> TaskOutcome<E>
    where
        T: TaskItem,
        E: fmt::Display,
        F: Fn(&T) -> Result<TaskReport, E>,
    {
        let label = item.label();
        self.metrics.on_file_start();
        self.emit(ExecutionEvent::FileStarted {
            batch,
            file: label.clone(),
        });

        let result = task(item);
        match &result {
            Ok(report) => {
                self.metrics.on_file_loaded(report.tables, report.rows);
                self.emit(ExecutionEvent::FileFinished {
                    batch,
                    file: label.clone(),
                    tables: report.tables,
                    rows: report.rows,
                });
            }
            Err(e) => {
                self.metrics.on_file_failed();
                self.emit(ExecutionEvent::FileFailed {
                    batch,
                    file: label.clone(),
                    error: e.to_string(),
                });
            }
        }
        TaskOutcome {
            batch,
            item: label,
            result,
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::scheduler::{BatchLimits, schedule};

    #[derive(Debug, Clone)]
    struct Job(u64);

    impl HasSize for Job {
        fn size_bytes(&self) -> u64 {
            self.0
        }
    }

    impl TaskItem for Job {
        fn label(&self) -> String {
            format!("job-{}", self.0)
        }
    }

    fn batches(n: u64, limit: usize) -> Vec<Batch<Job>> {
        schedule(
            (1..=n).map(Job).collect(),
            BatchLimits {
                concurrency_limit: limit,
                available_memory: u64::MAX,
                check_memory: false,
            },
        )
    }

    fn engine(limit: usize, runner: TaskRunner) -> IngestEngine {
        IngestEngine::new(EngineOptions {
            concurrency_limit: limit,
            available_memory: None,
            check_memory: false,
            runner,
        })
        .unwrap()
    }

    struct Recorder(Mutex<Vec<String>>);

    impl ExecutionObserver for Recorder {
        fn on_event(&self, event: &ExecutionEvent) {
            let tag = match event {
                ExecutionEvent::BatchStarted { index, .. } => format!("batch{index}"),
                ExecutionEvent::FileFailed { file, .. } => format!("failed:{file}"),
                _ => return,
            };
            self.0.lock().unwrap().push(tag);
        }
    }

    #[test]
    fn failures_are_isolated_and_order_is_kept() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let engine = engine(2, TaskRunner::Sequential).with_observer(recorder.clone());

        let outcomes = engine.run(&batches(5, 2), |job| {
            if job.0 == 3 {
                Err("bad file".to_string())
            } else {
                Ok(TaskReport {
                    tables: 1,
                    rows: job.0 as usize,
                })
            }
        });

        let items: Vec<_> = outcomes.iter().map(|o| o.item.as_str()).collect();
        assert_eq!(items, vec!["job-1", "job-2", "job-3", "job-4", "job-5"]);
        assert!(outcomes[2].result.is_err());
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["batch0", "batch1", "failed:job-3", "batch2"]
        );

        let snap = engine.metrics().snapshot();
        assert_eq!(snap.files_started, 5);
        assert_eq!(snap.files_finished, 4);
        assert_eq!(snap.files_failed, 1);
        assert_eq!(snap.rows_loaded, 1 + 2 + 4 + 5);
        assert_eq!(snap.batches_finished, 3);
        assert!(snap.elapsed.is_some());
    }

    #[test]
    fn concurrent_runner_bounds_files_in_flight() {
        let engine = engine(3, TaskRunner::Concurrent);
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let outcomes = engine.run(&batches(12, 3), |_job| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, String>(TaskReport::default())
        });

        assert_eq!(outcomes.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(engine.metrics().snapshot().max_in_flight <= 3);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let opts = EngineOptions {
            concurrency_limit: 0,
            ..EngineOptions::default()
        };
        assert!(IngestEngine::new(opts).is_err());
    }
}
