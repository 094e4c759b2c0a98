//! Data types shared across the ingestion pipeline: the records produced by
//! the parser, the events produced by the watcher, the samples produced by
//! the performance monitor, and the wire envelope sent to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// A single message extracted from a transcript file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedMessage {
    pub message_id: String,
    pub session_id: String,
    /// References another message's `message_id`, if this message is a
    /// reply in a branching transcript.
    #[serde(default)]
    pub parent_id: Option<String>,
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tool_usage: Vec<ToolUsage>,
}

/// A tool invocation paired with its eventual result, if one arrived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolUsage {
    pub tool_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    #[serde(default)]
    pub tool_output: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// A fully parsed conversation, ready to be written to persistent storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationData {
    /// Assigned by the persistence writer on first persist; `None` until
    /// then. The writer's `write_conversation` return value is the
    /// authoritative id for a just-written row.
    pub id: Option<i64>,
    pub project_id: String,
    pub session_id: String,
    pub file_path: PathBuf,
    pub title: Option<String>,
    /// Invariant: always equal to `messages.len()`.
    pub message_count: usize,
    pub messages: Vec<ParsedMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The kind of filesystem change a [`FileEvent`] describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    Created,
    Modified,
    Moved,
    Deleted,
}

/// A filesystem change observed by the watcher.
///
/// `dest_path` is required when `kind == Moved` and forbidden otherwise; the
/// only way to build one is through [`FileEvent::new`], which enforces this.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEvent {
    path: PathBuf,
    kind: FileEventKind,
    dest_path: Option<PathBuf>,
    detected_at: DateTime<Utc>,
}

/// Returned by [`FileEvent::new`] when `dest_path` doesn't match `kind`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FileEventError {
    #[error("dest_path is required for a moved event")]
    MissingDestPath,
    #[error("dest_path must not be set for a {0:?} event")]
    UnexpectedDestPath(FileEventKind),
}

impl FileEvent {
    pub fn new(
        path: PathBuf,
        kind: FileEventKind,
        dest_path: Option<PathBuf>,
        detected_at: DateTime<Utc>,
    ) -> Result<Self, FileEventError> {
        match (kind, &dest_path) {
            (FileEventKind::Moved, None) => Err(FileEventError::MissingDestPath),
            (FileEventKind::Moved, Some(_)) => Ok(()),
            (other, Some(_)) => Err(FileEventError::UnexpectedDestPath(other)),
            (_, None) => Ok(()),
        }?;
        Ok(Self {
            path,
            kind,
            dest_path,
            detected_at,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn kind(&self) -> FileEventKind {
        self.kind
    }

    pub fn dest_path(&self) -> Option<&PathBuf> {
        self.dest_path.as_ref()
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }
}

/// A single latency/throughput observation recorded by the performance
/// monitor. Both latencies must be strictly positive; construction is not
/// gated behind a fallible constructor because the monitor is the sole
/// producer and always supplies measured, positive durations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSample {
    pub detection_latency_ms: f64,
    pub processing_latency_ms: f64,
    pub throughput_msgs_per_sec: f64,
    pub recorded_at: DateTime<Utc>,
}

/// A connected WebSocket client and the subscriptions it has active.
#[derive(Debug, Clone)]
pub struct Session {
    pub client_id: Uuid,
    pub user_id: Option<String>,
    pub subscriptions: Vec<String>,
    pub connected_at: DateTime<Utc>,
}

/// The envelope wrapping every message sent to a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Builds an envelope, assigning `timestamp` now — producers never set
    /// their own timestamp, only the sender does.
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_event_moved_requires_dest_path() {
        let err = FileEvent::new(
            PathBuf::from("/a"),
            FileEventKind::Moved,
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, FileEventError::MissingDestPath);
    }

    #[test]
    fn file_event_non_moved_forbids_dest_path() {
        let err = FileEvent::new(
            PathBuf::from("/a"),
            FileEventKind::Created,
            Some(PathBuf::from("/b")),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, FileEventError::UnexpectedDestPath(FileEventKind::Created));
    }

    #[test]
    fn file_event_moved_with_dest_path_succeeds() {
        let ev = FileEvent::new(
            PathBuf::from("/a"),
            FileEventKind::Moved,
            Some(PathBuf::from("/b")),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(ev.dest_path(), Some(&PathBuf::from("/b")));
    }

    #[test]
    fn file_event_created_without_dest_path_succeeds() {
        let ev = FileEvent::new(PathBuf::from("/a"), FileEventKind::Created, None, Utc::now())
            .unwrap();
        assert_eq!(ev.kind(), FileEventKind::Created);
        assert!(ev.dest_path().is_none());
    }

    #[test]
    fn envelope_serializes_with_type_field() {
        let env = Envelope::new("ping", serde_json::json!({"a": 1}));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "ping");
        assert_eq!(v["data"]["a"], 1);
        assert!(v.get("timestamp").is_some());
    }
}
