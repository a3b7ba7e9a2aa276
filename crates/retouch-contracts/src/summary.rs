use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Totals for one editing session, written once when the session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub total_versions: u64,
    pub cursor: Option<u64>,
    pub edits_succeeded: u64,
    pub edits_failed: u64,
    pub batch_items: u64,
    pub batch_failed: u64,
}

impl SessionSummary {
    pub fn edits_attempted(&self) -> u64 {
        self.edits_succeeded + self.edits_failed
    }

    /// Summary fields plus `written_at`, with `extra` keys layered on top.
    pub fn to_payload(&self, extra: &Map<String, Value>) -> anyhow::Result<Map<String, Value>> {
        let Value::Object(mut payload) = serde_json::to_value(self)? else {
            anyhow::bail!("session summary did not serialise to an object");
        };
        payload.insert(
            "written_at".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        payload.extend(extra.iter().map(|(key, value)| (key.clone(), value.clone())));
        Ok(payload)
    }
}

/// Writes `summary` as pretty JSON, creating parent directories.
pub fn write_summary(
    path: &Path,
    summary: &SessionSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let payload = summary.to_payload(extra.unwrap_or(&Map::new()))?;
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let text = serde_json::to_string_pretty(&Value::Object(payload))?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}
