use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

const REDACTED: &str = "<omitted>";

/// Append-only diagnostics log in JSONL form.
///
/// - default fields are `type`, `session_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - inline image data anywhere in the payload is replaced by `<omitted>`
/// - a writer without a path builds and returns events but writes nothing
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: Option<PathBuf>,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self::build(Some(path.into()), session_id.into())
    }

    pub fn disabled(session_id: impl Into<String>) -> Self {
        Self::build(None, session_id.into())
    }

    fn build(path: Option<PathBuf>, session_id: String) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path,
                session_id,
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Builds the event, appends it to the log when enabled, and returns it.
    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let event = self.envelope(event_type, payload);
        if let Some(path) = self.inner.path.as_deref() {
            self.append_line(path, &event)?;
        }
        Ok(event)
    }

    fn envelope(&self, event_type: &str, payload: EventPayload) -> Value {
        let mut event = Map::from_iter([
            ("type".to_string(), Value::from(event_type)),
            ("session_id".to_string(), Value::from(self.session_id())),
            (
                "ts".to_string(),
                Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
            ),
        ]);
        event.extend(
            payload
                .into_iter()
                .map(|(key, value)| (key, sanitize_payload(&value))),
        );
        Value::Object(event)
    }

    fn append_line(&self, path: &Path, event: &Value) -> anyhow::Result<()> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open event log {}", path.display()))?
            .write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Strips image payloads so raw provider envelopes can be logged.
pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let cleaned = if row.is_string() && is_image_field(key) {
                    Value::from(REDACTED)
                } else {
                    sanitize_payload(row)
                };
                out.insert(key.clone(), cleaned);
            }
            Value::Object(out)
        }
    }
}

fn is_image_field(key: &str) -> bool {
    ["data", "b64_json", "image_bytes", "bytes"]
        .iter()
        .any(|name| key.eq_ignore_ascii_case(name))
}
