use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
    SessionStarted,
    AnalysisCompleted,
    QuestionAnswered,
    SuggestionsUpdated,
    TurnFailed,
    SessionReset,
}

impl SessionEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::AnalysisCompleted => "analysis_completed",
            Self::QuestionAnswered => "question_answered",
            Self::SuggestionsUpdated => "suggestions_updated",
            Self::TurnFailed => "turn_failed",
            Self::SessionReset => "session_reset",
        }
    }
}

/// Session event log: one compact JSON object per line.
///
/// Every record starts with `type`, `session_id` and `ts`; payload fields
/// follow and cannot replace those three. Clones write through the same
/// handle, so one writer serves every session of a server process.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<SharedLog>,
}

#[derive(Debug)]
struct SharedLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

const RESERVED_KEYS: [&str; 3] = ["type", "session_id", "ts"];

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            shared: Arc::new(SharedLog {
                path: path.into(),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn emit(
        &self,
        session_id: &str,
        kind: SessionEventKind,
        payload: EventPayload,
    ) -> anyhow::Result<Value> {
        let mut record = Map::new();
        record.insert("type".to_string(), Value::from(kind.as_str()));
        record.insert("session_id".to_string(), Value::from(session_id));
        record.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        record.extend(
            payload
                .into_iter()
                .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str())),
        );
        let record = Value::Object(record);

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut slot = self
            .shared
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let file = match slot.take() {
            Some(file) => file,
            None => self.open()?,
        };
        let file = slot.insert(file);
        file.write_all(&line)?;
        file.flush()?;
        Ok(record)
    }

    fn open(&self) -> anyhow::Result<File> {
        if let Some(parent) = self
            .shared
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.shared.path)?)
    }
}
