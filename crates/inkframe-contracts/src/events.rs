use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// One line of the request event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComicEvent {
    ComicStarted {
        working_dir: String,
        engine: String,
        panel_count: usize,
    },
    PanelRendered {
        index: u32,
        used_fallback: bool,
        fallback_reason: Option<String>,
        image_path: String,
        sha256: Option<String>,
    },
    BundleAssembled {
        archive: String,
        document: String,
        document_degraded: bool,
        fallback_panels: usize,
    },
    CleanupScheduled {
        working_dir: String,
        delay_s: u64,
    },
}

/// Append-only writer for `events.jsonl`.
///
/// Every line carries `type`, `request_id` and `ts`, followed by the event fields.
/// Clones share one lock, so concurrent panel workers can emit freely.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    request_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, request_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                request_id: request_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    /// Same log file, different request.
    pub fn for_request(&self, request_id: impl Into<String>) -> Self {
        Self::new(self.inner.path.clone(), request_id)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub fn emit(&self, event: &ComicEvent) -> anyhow::Result<Value> {
        let mut line = Map::new();
        let body = serde_json::to_value(event)?;
        let Value::Object(fields) = body else {
            anyhow::bail!("event did not serialize to an object");
        };
        if let Some(kind) = fields.get("type") {
            line.insert("type".to_string(), kind.clone());
        }
        line.insert(
            "request_id".to_string(),
            Value::String(self.inner.request_id.clone()),
        );
        line.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in fields {
            if key != "type" {
                line.insert(key, value);
            }
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut encoded = serde_json::to_string(&line)?;
        encoded.push('\n');
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(encoded.as_bytes())?;

        Ok(Value::Object(line))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
