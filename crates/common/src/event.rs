//! Structured JSON Lines event log
//!
//! Every component of a smoke run reports through an [`EventLogger`], a named
//! handle onto a shared [`EventSink`]. Each call produces exactly one JSON
//! object on one line, appended to the sink file and mirrored to stdout, so
//! the log aggregator can ingest the file line by line.
//!
//! ```text
//! {"timestamp":"2026-10-19T08:30:00.000000Z","component":"api_tester",
//!  "event_type":"test_result","message":"Test api_health: PASS","level":"INFO",
//!  "test_name":"api_health","test_status":"PASS","test_duration":0.012,...}
//! ```
//! (wrapped here for readability; the real line has no breaks)

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Error, Result};

/// Level written on every event. Severity is carried by a `status` field.
pub const LEVEL: &str = "INFO";

/// Keys owned by the envelope; context values under these names are dropped.
const RESERVED_FIELDS: [&str; 5] = ["timestamp", "component", "event_type", "message", "level"];

/// Source of event timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock in UTC
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a single instant, for reproducible logs
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// One line of the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: String,
    pub component: String,
    pub event_type: String,
    pub message: String,
    pub level: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Event {
    pub fn new(
        at: DateTime<Utc>,
        component: impl Into<String>,
        event_type: impl Into<String>,
        message: impl Into<String>,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Micros, true),
            component: component.into(),
            event_type: event_type.into(),
            message: message.into(),
            level: LEVEL.to_string(),
            fields,
        }
    }

    /// Encode as a single JSON line (no trailing newline)
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Extra field by name
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Outcome label of a test result event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Pass,
    Fail,
}

impl TestStatus {
    pub fn from_success(success: bool) -> Self {
        if success {
            TestStatus::Pass
        } else {
            TestStatus::Fail
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct SinkInner {
    path: PathBuf,
    file: Mutex<File>,
    console: bool,
    clock: Arc<dyn Clock>,
}

/// Append-only JSON Lines destination shared by every component of a run
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<SinkInner>,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("path", &self.inner.path)
            .field("console", &self.inner.console)
            .finish()
    }
}

impl EventSink {
    /// Open `path` for appending, mirroring every line to stdout
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, Arc::new(SystemClock), true)
    }

    /// Open with an explicit clock and console mirroring choice
    pub fn open_with(path: impl AsRef<Path>, clock: Arc<dyn Clock>, console: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| Error::SinkOpen {
                    path: path.clone(),
                    source,
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| Error::SinkOpen {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            inner: Arc::new(SinkInner {
                path,
                file: Mutex::new(file),
                console,
                clock,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Named logger writing into this sink
    pub fn logger(&self, component: impl Into<String>) -> EventLogger {
        EventLogger {
            component: component.into(),
            sink: self.clone(),
        }
    }

    fn emit(&self, component: &str, event_type: &str, message: String, fields: Map<String, Value>) {
        let event = Event::new(self.inner.clock.now(), component, event_type, message, fields);

        // Fields are already JSON values with string keys, so encoding cannot fail.
        let line = event
            .to_line()
            .expect("event fields are plain JSON values");

        {
            let mut file = self.inner.file.lock();
            let written = writeln!(file, "{}", line);
            if let Err(e) = written.and_then(|_| file.flush()) {
                warn!("Failed to append to {}: {}", self.inner.path.display(), e);
            }
        }

        if self.inner.console {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            if let Err(e) = writeln!(out, "{}", line) {
                warn!("Failed to mirror event to stdout: {}", e);
            }
        }
    }
}

/// Per-component handle onto an [`EventSink`]
#[derive(Debug, Clone)]
pub struct EventLogger {
    component: String,
    sink: EventSink,
}

impl EventLogger {
    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    /// Emit a free-form event.
    ///
    /// `context` should be a JSON object whose keys become top-level fields;
    /// `Value::Null` adds nothing and any other value is stored under `context`.
    pub fn log_event(&self, event_type: &str, message: impl Into<String>, context: Value) {
        let mut fields = Map::new();
        merge_context(&mut fields, context);
        self.sink.emit(&self.component, event_type, message.into(), fields);
    }

    /// Emit an instantaneous metric observation
    pub fn log_metric(&self, metric_name: &str, value: f64, context: Value) {
        let mut fields = Map::new();
        merge_context(&mut fields, context);
        fields.insert("metric_name".to_string(), Value::from(metric_name));
        fields.insert("metric_value".to_string(), Value::from(value));
        self.sink.emit(
            &self.component,
            "metric",
            format!("Metric: {}", metric_name),
            fields,
        );
    }

    /// Emit the scored outcome of a single probe
    pub fn log_test_result(
        &self,
        test_name: &str,
        status: TestStatus,
        duration: Duration,
        context: Value,
    ) {
        let mut fields = Map::new();
        merge_context(&mut fields, context);
        fields.insert("test_name".to_string(), Value::from(test_name));
        fields.insert("test_status".to_string(), Value::from(status.as_str()));
        fields.insert("test_duration".to_string(), Value::from(duration.as_secs_f64()));
        self.sink.emit(
            &self.component,
            "test_result",
            format!("Test {}: {}", test_name, status),
            fields,
        );
    }
}

fn merge_context(fields: &mut Map<String, Value>, context: Value) {
    match context {
        Value::Null => {}
        Value::Object(map) => {
            for (key, value) in map {
                if !RESERVED_FIELDS.contains(&key.as_str()) {
                    fields.insert(key, value);
                }
            }
        }
        other => {
            fields.insert("context".to_string(), other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_sink(dir: &tempfile::TempDir) -> EventSink {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap();
        let path = dir.path().join("events.jsonl");
        EventSink::open_with(path, Arc::new(FixedClock(at)), false).unwrap()
    }

    fn read_events(sink: &EventSink) -> Vec<Value> {
        std::fs::read_to_string(sink.path())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_every_kind_has_mandatory_fields() {
        let dir = tempfile::tempdir().unwrap();
        let sink = fixed_sink(&dir);
        let logger = sink.logger("kubernetes");

        logger.log_event("pods_wait", "Waiting for pods", Value::Null);
        logger.log_metric("users_count", 3.0, json!({}));
        logger.log_test_result(
            "api_health",
            TestStatus::Pass,
            Duration::from_millis(250),
            json!({"status_code": 200}),
        );

        let events = read_events(&sink);
        assert_eq!(events.len(), 3);
        for event in &events {
            for key in ["timestamp", "component", "event_type", "message"] {
                let value = event[key].as_str().unwrap();
                assert!(!value.is_empty(), "{} is empty", key);
            }
            assert_eq!(event["level"], "INFO");
            assert_eq!(event["timestamp"], "2026-10-19T08:30:00.000000Z");
            assert_eq!(event["component"], "kubernetes");
        }
    }

    #[test]
    fn test_metric_and_test_result_fields() {
        let dir = tempfile::tempdir().unwrap();
        let sink = fixed_sink(&dir);
        let logger = sink.logger("api_tester");

        logger.log_metric("health_uptime", 42.5, json!({"unit": "s"}));
        logger.log_test_result(
            "api_login",
            TestStatus::Fail,
            Duration::ZERO,
            json!({"error": "refused"}),
        );

        let events = read_events(&sink);
        assert_eq!(events[0]["event_type"], "metric");
        assert_eq!(events[0]["message"], "Metric: health_uptime");
        assert_eq!(events[0]["metric_name"], "health_uptime");
        assert_eq!(events[0]["metric_value"], 42.5);
        assert_eq!(events[0]["unit"], "s");

        assert_eq!(events[1]["event_type"], "test_result");
        assert_eq!(events[1]["message"], "Test api_login: FAIL");
        assert_eq!(events[1]["test_status"], "FAIL");
        assert_eq!(events[1]["test_duration"], 0.0);
        assert_eq!(events[1]["error"], "refused");
    }

    #[test]
    fn test_context_cannot_override_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let sink = fixed_sink(&dir);

        sink.logger("runner").log_event(
            "test_suite",
            "override attempt",
            json!({"level": "ERROR", "component": "other", "status": "error"}),
        );

        let events = read_events(&sink);
        assert_eq!(events[0]["level"], "INFO");
        assert_eq!(events[0]["component"], "runner");
        assert_eq!(events[0]["status"], "error");
    }

    #[test]
    fn test_multiline_message_stays_on_one_line() {
        let dir = tempfile::tempdir().unwrap();
        let sink = fixed_sink(&dir);

        sink.logger("runner")
            .log_event("test_suite_error", "first\nsecond", json!({"error": "a\nb"}));

        let content = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content.lines().count(), 1);
        let event: Event = serde_json::from_str(content.trim_end()).unwrap();
        assert_eq!(event.message, "first\nsecond");
        assert_eq!(event.field("error"), Some(&json!("a\nb")));
    }

    #[test]
    fn test_non_object_context_is_nested() {
        let dir = tempfile::tempdir().unwrap();
        let sink = fixed_sink(&dir);

        sink.logger("runner").log_event("note", "list", json!([1, 2]));

        let events = read_events(&sink);
        assert_eq!(events[0]["context"], json!([1, 2]));
    }

    #[test]
    fn test_sink_appends_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/run.jsonl");

        EventSink::open_with(&path, Arc::new(SystemClock), false)
            .unwrap()
            .logger("a")
            .log_event("one", "1", Value::Null);
        EventSink::open_with(&path, Arc::new(SystemClock), false)
            .unwrap()
            .logger("b")
            .log_event("two", "2", Value::Null);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_status_from_success() {
        assert_eq!(TestStatus::from_success(true), TestStatus::Pass);
        assert_eq!(TestStatus::from_success(false).to_string(), "FAIL");
    }
}
