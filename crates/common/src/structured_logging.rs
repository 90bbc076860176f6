//! Structured logging
//!
//! Runtime events carry `actor`, `instance` and `prefix` fields. In JSON mode
//! every event becomes one [`LogRecord`] line with those fields lifted out of
//! the free-form field map, so log pipelines can index actors directly.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::io::{self, Write};
use std::time::Instant;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt as fmt_layer, layer::SubscriberExt, EnvFilter, Layer, Registry};

/// One JSON log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// RFC 3339
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Checkpoint instance the event was observed under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessInfo>,
}

/// Identifies the emitting worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub hostname: String,
    pub pid: u32,
    pub thread: String,
    pub version: String,
}

impl ProcessInfo {
    pub fn current() -> Self {
        Self {
            hostname: hostname::get()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            thread: std::thread::current()
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{:?}", std::thread::current().id())),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Collects event fields, routing the well-known actor fields into slots.
#[derive(Default)]
struct RecordVisitor {
    message: String,
    actor: Option<String>,
    instance: Option<u64>,
    prefix: Option<String>,
    fields: Map<String, Value>,
}

impl RecordVisitor {
    fn put(&mut self, field: &Field, value: Value) {
        match (field.name(), value) {
            ("message", Value::String(text)) => self.message = text,
            ("actor", Value::String(text)) => self.actor = Some(text),
            ("prefix", Value::String(text)) => self.prefix = Some(text),
            ("instance", value) if value.is_u64() => self.instance = value.as_u64(),
            (name, value) => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }
}

impl LogRecord {
    fn from_event(event: &Event<'_>, process: Option<ProcessInfo>) -> Self {
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        Self {
            timestamp: Utc::now().to_rfc3339(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: visitor.message,
            actor: visitor.actor,
            instance: visitor.instance,
            prefix: visitor.prefix,
            fields: visitor.fields,
            process,
        }
    }
}

/// Layer writing one [`LogRecord`] per event.
pub struct JsonLayer<W = fn() -> io::Stdout> {
    make_writer: W,
    include_process: bool,
}

impl JsonLayer {
    pub fn stdout() -> Self {
        Self::new(io::stdout)
    }
}

impl<W> JsonLayer<W>
where
    W: for<'a> MakeWriter<'a> + 'static,
{
    pub fn new(make_writer: W) -> Self {
        Self {
            make_writer,
            include_process: false,
        }
    }

    pub fn with_process_info(mut self, include: bool) -> Self {
        self.include_process = include;
        self
    }
}

impl<S, W> Layer<S> for JsonLayer<W>
where
    S: Subscriber,
    W: for<'a> MakeWriter<'a> + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let record = LogRecord::from_event(event, self.include_process.then(ProcessInfo::current));
        if let Ok(line) = serde_json::to_string(&record) {
            let mut writer = self.make_writer.make_writer();
            let _ = writeln!(writer, "{}", line);
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is unset
    pub level: Level,
    pub json_output: bool,
    /// Human format only
    pub color_output: bool,
    /// Attach [`ProcessInfo`] to JSON records
    pub include_process: bool,
    pub include_line_numbers: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_output: false,
            color_output: true,
            include_process: true,
            include_line_numbers: cfg!(debug_assertions),
        }
    }
}

impl LoggingConfig {
    /// Defaults overridden by `PEERLOOM_LOG_LEVEL` and `PEERLOOM_LOG_JSON`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(level) = std::env::var("PEERLOOM_LOG_LEVEL")
            .ok()
            .and_then(|value| value.parse::<Level>().ok())
        {
            config.level = level;
        }
        if let Ok(value) = std::env::var("PEERLOOM_LOG_JSON") {
            config.json_output = is_truthy(&value);
            config.color_output &= !config.json_output;
        }
        config
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_structured_logging(config: LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let json = config
        .json_output
        .then(|| JsonLayer::stdout().with_process_info(config.include_process));
    let human = (!config.json_output).then(|| {
        fmt_layer::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(config.include_line_numbers)
            .with_ansi(config.color_output)
            .with_span_events(FmtSpan::CLOSE)
    });

    tracing::subscriber::set_global_default(
        Registry::default().with(filter).with(json).with(human),
    )?;
    Ok(())
}

/// Logs how long an operation took once it is finished.
pub struct OperationTimer {
    operation: String,
    started: Instant,
    fields: Map<String, Value>,
}

impl OperationTimer {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            started: Instant::now(),
            fields: Map::new(),
        }
    }

    /// Attach a field to the completion event. Unserializable values are skipped.
    pub fn add_field(&mut self, key: impl Into<String>, value: impl Serialize) {
        if let Ok(value) = serde_json::to_value(value) {
            self.fields.insert(key.into(), value);
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn finish(self) {
        let duration_ms = self.elapsed_ms();
        tracing::debug!(
            operation = %self.operation,
            duration_ms,
            fields = %serde_json::Value::Object(self.fields),
            "Operation completed"
        );
    }

    pub fn finish_with_result<T, E: fmt::Display>(self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.finish(),
            Err(e) => {
                let duration_ms = self.elapsed_ms();
                tracing::warn!(
                    operation = %self.operation,
                    duration_ms,
                    error = %e,
                    fields = %serde_json::Value::Object(self.fields),
                    "Operation failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn records(&self) -> Vec<LogRecord> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    fn capture(include_process: bool, emit: impl FnOnce()) -> Vec<LogRecord> {
        let captured = Captured::default();
        let writer = captured.clone();
        let layer = JsonLayer::new(move || writer.clone()).with_process_info(include_process);
        tracing::subscriber::with_default(Registry::default().with(layer), emit);
        captured.records()
    }

    #[test]
    fn test_actor_fields_are_lifted() {
        let records = capture(false, || {
            tracing::info!(actor = %"local:a", instance = 3u64, outgoing = 2, "Actor stored");
        });

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.message, "Actor stored");
        assert_eq!(record.level, "INFO");
        assert_eq!(record.actor.as_deref(), Some("local:a"));
        assert_eq!(record.instance, Some(3));
        assert_eq!(record.prefix, None);
        assert_eq!(record.fields.get("outgoing"), Some(&Value::from(2)));
        assert!(!record.fields.contains_key("actor"));
        assert!(record.process.is_none());
    }

    #[test]
    fn test_process_info_is_optional() {
        let records = capture(true, || {
            tracing::warn!(prefix = "local", "No shuttle for prefix");
        });

        let record = &records[0];
        assert_eq!(record.prefix.as_deref(), Some("local"));
        assert_eq!(record.level, "WARN");
        let process = record.process.as_ref().unwrap();
        assert_eq!(process.pid, std::process::id());
    }

    #[test]
    fn test_non_numeric_instance_stays_a_field() {
        let records = capture(false, || {
            tracing::debug!(instance = "stale", "Store refused");
        });

        assert_eq!(records[0].instance, None);
        assert_eq!(records[0].fields.get("instance"), Some(&Value::from("stale")));
    }

    #[test]
    fn test_timer_reports_failure() {
        let records = capture(false, || {
            let mut timer = OperationTimer::new("actor_iteration");
            timer.add_field("actor", "local:a");
            let result: Result<(), String> = Err("store unavailable".to_string());
            timer.finish_with_result(&result);
        });

        let record = &records[0];
        assert_eq!(record.message, "Operation failed");
        assert_eq!(record.fields.get("operation"), Some(&Value::from("actor_iteration")));
        assert_eq!(record.fields.get("error"), Some(&Value::from("store unavailable")));
        assert!(record.fields["fields"].as_str().unwrap().contains("local:a"));
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("TRUE"));
        assert!(is_truthy(" on "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("nope"));
    }
}
