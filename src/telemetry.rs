//! Structured logging setup and the SSE broadcast tap behind
//! `GET /api/logs/stream` (spec §6, ambient logging stack).
//!
//! Two sinks: a human-readable `fmt` layer on stderr, and a daily-rotated
//! JSON file under `<agents_dir>/.daemon/logs/`. A third, lightweight layer
//! forwards one formatted JSON line per event into a broadcast channel so
//! the hook surface can tail live logs without re-reading the file.

use std::path::Path;

use tokio::sync::broadcast;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Capacity of the log broadcast channel. Slow subscribers drop the
/// oldest lines rather than block the logging hot path.
const BROADCAST_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct LogBroadcast {
    sender: broadcast::Sender<String>,
}

impl LogBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}

impl Default for LogBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

/// A `tracing_subscriber::Layer` that renders each event as one JSON line
/// and pushes it onto the broadcast channel; it never touches disk or
/// stderr itself, leaving those to the `fmt`/json-file layers.
struct BroadcastLayer {
    sender: broadcast::Sender<String>,
}

struct JsonVisitor {
    fields: serde_json::Map<String, serde_json::Value>,
}

impl tracing::field::Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.fields.insert(field.name().to_string(), serde_json::Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::json!(value));
    }
}

impl<S> Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if self.sender.receiver_count() == 0 {
            return;
        }
        let mut visitor = JsonVisitor { fields: serde_json::Map::new() };
        event.record(&mut visitor);
        let metadata = event.metadata();
        let line = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "level": metadata.level().to_string(),
            "target": metadata.target(),
            "fields": visitor.fields,
        });
        let _ = self.sender.send(line.to_string());
    }
}

/// Install the global tracing subscriber: stderr `fmt` layer, daily-rotated
/// JSON file under `logs_dir`, and the SSE broadcast tap. Returns the
/// broadcast handle and a file-appender guard that must be held for the
/// life of the process (dropping it stops the writer thread).
pub fn init(logs_dir: &Path, broadcast: LogBroadcast) -> tracing_appender::non_blocking::WorkerGuard {
    let _ = std::fs::create_dir_all(logs_dir);
    let file_appender = tracing_appender::rolling::daily(logs_dir, "signet.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let json_layer = tracing_subscriber::fmt::layer().json().with_writer(non_blocking).with_target(true);
    let broadcast_layer = BroadcastLayer { sender: broadcast.sender.clone() };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(json_layer)
        .with(broadcast_layer)
        .init();

    guard
}
