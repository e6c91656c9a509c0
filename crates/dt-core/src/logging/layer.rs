//! JSONL tracing layer.
//!
//! Each event becomes one JSON object on its own line:
//!
//! ```json
//! {"ts":"...","level":"warn","event":"stability.run_failed","analysis_id":"dt-...",
//!  "host_id":"host-...","stage":"stability","message":"run failed","fields":{"run":3}}
//! ```
//!
//! Correlation keys come from the innermost enclosing span that recorded
//! them; the same keys recorded on the event itself take precedence.

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

/// Keys lifted to the top level of each line.
const CORRELATION_KEYS: [&str; 3] = ["analysis_id", "host_id", "stage"];

/// Correlation IDs captured from a span, stored in its extensions.
#[derive(Debug, Clone, Default)]
struct Correlation {
    values: Vec<(&'static str, String)>,
}

impl Correlation {
    fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, key: &'static str, value: String) {
        match self.values.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.values.push((key, value)),
        }
    }
}

/// Splits recorded fields into correlation IDs, the message, and the rest.
#[derive(Default)]
struct FieldCollector {
    correlation: Correlation,
    message: Option<String>,
    fields: Map<String, Value>,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: Value) {
        let name = field.name();
        if name == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
            return;
        }
        if let Some(key) = CORRELATION_KEYS.iter().find(|k| **k == name) {
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            self.correlation.set(*key, text);
            return;
        }
        self.fields.insert(name.to_string(), value);
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, Value::String(format!("{:?}", value)));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        // NaN and infinities have no JSON number form.
        let v = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.insert(field, v);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }
}

/// Tracing layer writing JSONL to a writer (stderr in production).
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
        let mut collector = FieldCollector::default();
        attrs.record(&mut collector);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(collector.correlation);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        event.record(&mut collector);

        let mut correlation = collector.correlation;
        if let Some(scope) = ctx.event_scope(event) {
            // Scope iterates innermost first, so the first hit wins.
            for span in scope {
                if let Some(span_corr) = span.extensions().get::<Correlation>() {
                    for key in CORRELATION_KEYS {
                        if correlation.get(key).is_none() {
                            if let Some(v) = span_corr.get(key) {
                                correlation.set(key, v.to_string());
                            }
                        }
                    }
                }
            }
        }

        let level: Level = (*event.metadata().level()).into();
        let mut obj = Map::new();
        obj.insert("ts".to_string(), Value::String(Utc::now().to_rfc3339()));
        obj.insert("level".to_string(), serde_json::json!(level));
        obj.insert(
            "event".to_string(),
            Value::String(event.metadata().target().to_string()),
        );
        for key in CORRELATION_KEYS {
            if let Some(v) = correlation.get(key) {
                obj.insert(key.to_string(), Value::String(v.to_string()));
            }
        }
        if let Some(msg) = collector.message {
            obj.insert("message".to_string(), Value::String(msg));
        }
        if !collector.fields.is_empty() {
            obj.insert("fields".to_string(), Value::Object(collector.fields));
        }

        let line = Value::Object(obj).to_string();
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogContext, Stage};
    use dt_common::AnalysisId;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(f: impl FnOnce()) -> Vec<Value> {
        let buf = SharedBuf(Arc::new(Mutex::new(Vec::new())));
        let subscriber = tracing_subscriber::registry().with(JsonlLayer::new(buf.clone()));
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buf.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_plain_event() {
        let lines = capture(|| {
            tracing::info!(target: "test.event", message = "hello", rank = 3u64);
        });
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line["level"], "info");
        assert_eq!(line["event"], "test.event");
        assert_eq!(line["message"], "hello");
        assert_eq!(line["fields"]["rank"], 3);
        assert!(line.get("analysis_id").is_none());
    }

    #[test]
    fn test_span_correlation_is_lifted() {
        let ctx = LogContext::new(AnalysisId("dt-20260101-000000-abcd".into()), "host-test");
        let lines = capture(|| {
            let span = ctx.span(Stage::Stability);
            let _guard = span.enter();
            tracing::warn!(target: "stability.run_failed", run = 3u64, "run failed");
        });
        let line = &lines[0];
        assert_eq!(line["analysis_id"], "dt-20260101-000000-abcd");
        assert_eq!(line["host_id"], "host-test");
        assert_eq!(line["stage"], "stability");
        assert_eq!(line["level"], "warn");
        assert_eq!(line["fields"]["run"], 3);
        assert!(line["fields"].get("stage").is_none());
    }

    #[test]
    fn test_event_stage_overrides_span() {
        let ctx = LogContext::new(AnalysisId("dt-20260101-000000-abcd".into()), "host-test");
        let lines = capture(|| {
            let span = ctx.span(Stage::Init);
            let _guard = span.enter();
            tracing::info!(target: "store.written", stage = "store", "wrote");
        });
        assert_eq!(lines[0]["stage"], "store");
    }

    #[test]
    fn test_non_finite_float_is_stringified() {
        let lines = capture(|| {
            tracing::info!(target: "t", error = f64::NAN, "nan");
        });
        assert_eq!(lines[0]["fields"]["error"], "NaN");
    }
}
