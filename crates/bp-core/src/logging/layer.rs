//! JSONL tracing layer.
//!
//! Emits one JSON object per event on stderr. Correlation fields
//! (`run_id`, `host_id`, `stage`, `pid`, `connection`) are hoisted to the
//! top level whether they were recorded on the event itself or on an
//! enclosing span; everything else lands under `fields`.

use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::events::Level;

const HOISTED: [&str; 5] = ["run_id", "host_id", "stage", "pid", "connection"];

/// Correlation data collected from span attributes.
#[derive(Debug, Clone, Default)]
struct Correlation {
    values: Map<String, Value>,
}

impl Correlation {
    /// Fill keys missing here from `other`.
    fn inherit(&mut self, other: &Correlation) {
        for (key, value) in &other.values {
            self.values
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// Collects event or span fields into JSON values.
#[derive(Default)]
struct JsonFieldVisitor {
    correlation: Correlation,
    fields: Map<String, Value>,
    message: Option<String>,
}

impl JsonFieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        let name = field.name();
        if name == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else if HOISTED.contains(&name) {
            self.correlation.values.insert(name.to_string(), value);
        } else {
            self.fields.insert(name.to_string(), value);
        }
    }
}

impl Visit for JsonFieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, Value::String(format!("{:?}", value)));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.insert(field, Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }
}

/// JSONL tracing layer, stderr by default.
pub struct JsonlLayer<W = io::Stderr> {
    writer: Mutex<W>,
}

impl JsonlLayer<io::Stderr> {
    pub fn stderr() -> Self {
        JsonlLayer {
            writer: Mutex::new(io::stderr()),
        }
    }
}

impl<W: Write> JsonlLayer<W> {
    /// Layer writing to an arbitrary sink.
    pub fn new(writer: W) -> Self {
        JsonlLayer {
            writer: Mutex::new(writer),
        }
    }
}

impl<S, W> Layer<S> for JsonlLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = JsonFieldVisitor::default();
        attrs.record(&mut visitor);

        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(visitor.correlation);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let ts = Utc::now();

        let mut visitor = JsonFieldVisitor::default();
        event.record(&mut visitor);

        // Event fields win over span fields; inner spans win over outer ones.
        let mut correlation = visitor.correlation;
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(span_ctx) = span.extensions().get::<Correlation>() {
                    correlation.inherit(span_ctx);
                }
            }
        }

        let level: Level = (*event.metadata().level()).into();
        let mut obj = Map::new();
        obj.insert("ts".to_string(), serde_json::json!(ts.to_rfc3339()));
        obj.insert("level".to_string(), serde_json::json!(level));
        obj.insert(
            "event".to_string(),
            serde_json::json!(event.metadata().target()),
        );
        for key in HOISTED {
            if let Some(value) = correlation.values.remove(key) {
                obj.insert(key.to_string(), value);
            }
        }
        if let Some(msg) = visitor.message {
            obj.insert("message".to_string(), Value::String(msg));
        }
        if !visitor.fields.is_empty() {
            obj.insert("fields".to_string(), Value::Object(visitor.fields));
        }

        let json = serde_json::to_string(&Value::Object(obj)).unwrap_or_default();
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<Value> {
            let bytes = self.0.lock().unwrap();
            String::from_utf8_lossy(&bytes)
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    fn capture(f: impl FnOnce()) -> Vec<Value> {
        let buf = SharedBuf::default();
        let subscriber = tracing_subscriber::registry().with(JsonlLayer::new(buf.clone()));
        tracing::subscriber::with_default(subscriber, f);
        buf.lines()
    }

    #[test]
    fn writes_level_event_and_message() {
        let lines = capture(|| {
            tracing::info!(target: "test.event", message = "test message");
        });
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["level"], "info");
        assert_eq!(lines[0]["event"], "test.event");
        assert_eq!(lines[0]["message"], "test message");
    }

    #[test]
    fn correlation_fields_are_hoisted() {
        let lines = capture(|| {
            tracing::warn!(
                target: "search.pass",
                run_id = "run-1",
                stage = "search",
                candidates = 3u64,
                "pass done"
            );
        });
        assert_eq!(lines[0]["run_id"], "run-1");
        assert_eq!(lines[0]["stage"], "search");
        assert_eq!(lines[0]["fields"]["candidates"], 3);
        assert!(lines[0]["fields"].get("run_id").is_none());
    }

    #[test]
    fn span_context_is_inherited_by_events() {
        let lines = capture(|| {
            let span = tracing::info_span!("search", run_id = "run-span", pid = 42u64);
            let _guard = span.enter();
            tracing::info!(target: "filter.rejected", connection = ":1.9", "rejected");
        });
        assert_eq!(lines[0]["run_id"], "run-span");
        assert_eq!(lines[0]["pid"], 42);
        assert_eq!(lines[0]["connection"], ":1.9");
    }

    #[test]
    fn event_fields_override_span_fields() {
        let lines = capture(|| {
            let span = tracing::info_span!("outer", stage = "search");
            let _guard = span.enter();
            tracing::info!(target: "handshake.state", stage = "handshake", "state");
        });
        assert_eq!(lines[0]["stage"], "handshake");
    }

    #[test]
    fn engine_events_carry_their_stage() {
        use crate::address::{BusAddress, VersionCheckCache};
        use crate::backend::Backend;
        use crate::constants::AUTOPILOT_PATH;
        use crate::mock_bus::{MockBus, MockEndpoint};
        use crate::query::Query;

        let bus = Arc::new(
            MockBus::new().with_endpoint(MockEndpoint::new(":1.5", 100).application("calc")),
        );
        let address = BusAddress::new(bus, ":1.5", AUTOPILOT_PATH, Arc::new(VersionCheckCache::new()));
        let lines = capture(|| {
            Backend::new(address)
                .execute_query_get_data(&Query::pseudo_tree_root())
                .unwrap();
        });

        let stage_of = |event: &str| {
            lines
                .iter()
                .find(|line| line["event"] == event)
                .map(|line| line["stage"].clone())
        };
        assert_eq!(stage_of("version.checked"), Some(Value::from("handshake")));
        assert_eq!(stage_of("query.issued"), Some(Value::from("query")));
    }
}
