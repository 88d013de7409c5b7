use std::error::Error as StdError;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde_json::{Map, Value as JsonValue, json};
use tracing::{error, info, warn};

use crate::error::IngestionError;

use super::unified::IngestionFormat;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IngestionSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (the file was excluded).
    Error,
    /// Critical error (typically I/O or other infrastructure failures).
    Critical,
}

impl IngestionSeverity {
    /// Failures that cannot reach the bytes of a file are critical; everything else is an error.
    pub fn of(error: &IngestionError) -> Self {
        let io = match error {
            IngestionError::Io(_) => true,
            IngestionError::Csv(err) => matches!(err.kind(), ::csv::ErrorKind::Io(_)),
            IngestionError::Parquet(err) => caused_by_io(err),
            _ => false,
        };
        if io { Self::Critical } else { Self::Error }
    }
}

fn caused_by_io(err: &(dyn StdError + 'static)) -> bool {
    let mut cur = Some(err);
    while let Some(e) = cur {
        if e.is::<std::io::Error>() {
            return true;
        }
        cur = e.source();
    }
    false
}

/// Context about one extraction attempt.
#[derive(Debug, Clone)]
pub struct IngestionContext {
    /// The input path.
    pub path: PathBuf,
    /// Format used for extraction.
    pub format: IngestionFormat,
    /// Dataset category the file belongs to, when known.
    pub dataset: Option<String>,
}

/// Stats reported on successful extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionStats {
    /// Number of tables produced (one per sheet for multi-sheet reads).
    pub tables: usize,
    /// Rows over all tables.
    pub rows: usize,
}

/// Observer interface for extraction outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait IngestionObserver: Send + Sync {
    /// Called when extraction succeeds.
    fn on_success(&self, _ctx: &IngestionContext, _stats: IngestionStats) {}

    /// Called when extraction fails.
    fn on_failure(&self, _ctx: &IngestionContext, _severity: IngestionSeverity, _error: &IngestionError) {}

    /// Called when a failure meets an alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.on_failure(ctx, severity, error)
    }
}

/// Fans every callback out to several observers, in registration order.
#[derive(Default, Clone)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn IngestionObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn IngestionObserver>>) -> Self {
        Self { observers }
    }

    /// Add one more observer.
    pub fn with(mut self, observer: Arc<dyn IngestionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    fn each(&self, f: impl Fn(&dyn IngestionObserver)) {
        self.observers.iter().for_each(|o| f(o.as_ref()));
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl IngestionObserver for CompositeObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        self.each(|o| o.on_success(ctx, stats));
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.each(|o| o.on_failure(ctx, severity, error));
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.each(|o| o.on_alert(ctx, severity, error));
    }
}

/// Emits extraction events as `tracing` events.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl IngestionObserver for TracingObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        info!(
            format = ?ctx.format,
            file = %ctx.path.display(),
            dataset = ctx.dataset.as_deref().unwrap_or(""),
            tables = stats.tables,
            rows = stats.rows,
            "file extracted"
        );
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        warn!(
            severity = ?severity,
            format = ?ctx.format,
            file = %ctx.path.display(),
            dataset = ctx.dataset.as_deref().unwrap_or(""),
            error = %error,
            "file excluded"
        );
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        error!(
            severity = ?severity,
            format = ?ctx.format,
            file = %ctx.path.display(),
            dataset = ctx.dataset.as_deref().unwrap_or(""),
            error = %error,
            "extraction alert"
        );
    }
}

/// Appends one JSON object per extraction event to a local file.
///
/// Every line carries `ts` (RFC 3339), `event` (`ok`, `fail` or `alert`), `file`, `format` and
/// `dataset`; failures add `severity` and `error`, successes `tables` and `rows`.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Writes are best-effort: a log file that cannot be opened or written is ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append(&self, event: &str, ctx: &IngestionContext, mut fields: Map<String, JsonValue>) {
        fields.insert("ts".into(), json!(Utc::now().to_rfc3339()));
        fields.insert("event".into(), json!(event));
        fields.insert("file".into(), json!(ctx.path.display().to_string()));
        fields.insert("format".into(), json!(format!("{:?}", ctx.format)));
        fields.insert("dataset".into(), json!(ctx.dataset));

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{}", JsonValue::Object(fields));
        }
    }

    fn failure_fields(severity: IngestionSeverity, error: &IngestionError) -> Map<String, JsonValue> {
        let mut fields = Map::new();
        fields.insert("severity".into(), json!(format!("{severity:?}")));
        fields.insert("error".into(), json!(error.to_string()));
        fields
    }
}

impl IngestionObserver for FileObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        let mut fields = Map::new();
        fields.insert("tables".into(), json!(stats.tables));
        fields.insert("rows".into(), json!(stats.rows));
        self.append("ok", ctx, fields);
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.append("fail", ctx, Self::failure_fields(severity, error));
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.append("alert", ctx, Self::failure_fields(severity, error));
    }
}
