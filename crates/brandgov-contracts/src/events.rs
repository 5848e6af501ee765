use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

pub const MODEL_CALL_EVENT: &str = "model_call";
pub const JOB_TRANSITION_EVENT: &str = "job_transition";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Reason,
    SeeAndGenerate,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Reason => "reason",
            OperationType::SeeAndGenerate => "see_and_generate",
        }
    }
}

/// One external model call, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub request_id: String,
    pub model_name: String,
    pub operation_type: OperationType,
    pub success: bool,
    pub latency_ms: u64,
    pub token_count: u64,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub job_id: String,
    pub brand_id: String,
    pub from: String,
    pub to: String,
    pub attempt_count: u32,
}

/// Append-only JSONL sink shared by every stage of one pipeline.
///
/// Each line is an object carrying `type`, `pipeline_id` and `ts`, followed by
/// the payload fields; payload keys win on collision. Clones share one lock so
/// concurrent jobs never interleave partial lines.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<Sink>,
}

#[derive(Debug)]
struct Sink {
    path: PathBuf,
    pipeline_id: String,
    append: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, pipeline_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Sink {
                path: path.into(),
                pipeline_id: pipeline_id.into(),
                append: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn pipeline_id(&self) -> &str {
        &self.shared.pipeline_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event: EventPayload = [
            ("type", event_type.to_string()),
            ("pipeline_id", self.shared.pipeline_id.clone()),
            ("ts", Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), Value::String(value)))
        .collect();
        event.extend(payload);
        let event = Value::Object(event);
        self.append_line(&serde_json::to_string(&event)?)?;
        Ok(event)
    }

    fn append_line(&self, line: &str) -> anyhow::Result<()> {
        let path = &self.shared.path;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _held = self
            .shared
            .append
            .lock()
            .map_err(|_| anyhow::anyhow!("event sink lock poisoned"))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Emits a serializable record as the event payload.
    pub fn emit_record<T: Serialize>(&self, event_type: &str, record: &T) -> anyhow::Result<Value> {
        let payload = match serde_json::to_value(record)? {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        self.emit(event_type, payload)
    }

    /// Like [`EventWriter::emit_record`], but a write failure is only logged.
    pub fn record_quietly<T: Serialize>(&self, event_type: &str, record: &T) {
        if let Err(err) = self.emit_record(event_type, record) {
            tracing::warn!(
                event_type,
                path = %self.shared.path.display(),
                error = %err,
                "event write failed"
            );
        }
    }
}

pub fn read_events(path: &Path) -> anyhow::Result<Vec<Value>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
        .collect()
}
