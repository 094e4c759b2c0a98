//! SQLite-backed persistence for parsed conversations.
//!
//! Conversation upsert is read-then-write, keyed by `(project_id,
//! session_id)`. Message upsert is an `INSERT ... ON CONFLICT DO NOTHING`
//! keyed by `(conversation_id, message_id)` — an existing row is left
//! untouched rather than overwritten. Both operations retry with
//! exponential backoff before giving up.

use crate::transcript::ConversationData;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("failed to open database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("database error after exhausting retries: {0}")]
    DatabaseError(#[source] rusqlite::Error),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WriterStats {
    pub conversations_written: u64,
    pub conversations_updated: u64,
    pub messages_written: u64,
    pub write_errors: u64,
}

/// Per-stage and total elapsed time for one `write_conversation` call.
#[derive(Debug, Clone, Copy)]
pub struct WriteMetrics {
    pub conversation_write_ms: f64,
    pub messages_write_ms: f64,
    pub total_ms: f64,
}

pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

pub struct PersistenceWriter {
    conn: Mutex<Connection>,
    retry: RetryPolicy,
    stats: Mutex<WriterStats>,
}

impl PersistenceWriter {
    pub fn open(path: &Path, retry: RetryPolicy) -> Result<Self, WriterError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path).map_err(|source| WriterError::Open {
            path: path.display().to_string(),
            source,
        })?;
        init_schema(&conn).map_err(WriterError::DatabaseError)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retry,
            stats: Mutex::new(WriterStats::default()),
        })
    }

    pub fn stats(&self) -> WriterStats {
        *self.stats.lock().unwrap()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock().unwrap() = WriterStats::default();
    }

    /// Writes or updates the conversation's row, then upserts its messages.
    /// Retries each step independently with exponential backoff. Returns the
    /// assigned conversation id plus per-stage write metrics.
    pub async fn write_conversation(
        &self,
        convo: &ConversationData,
    ) -> Result<(i64, WriteMetrics), WriterError> {
        let total_start = Instant::now();

        let conv_start = Instant::now();
        let conversation_id = self.with_retry(|| self.write_conversation_record(convo)).await?;
        let conversation_write_ms = conv_start.elapsed().as_secs_f64() * 1000.0;

        let msg_start = Instant::now();
        self.with_retry(|| self.upsert_messages(conversation_id, convo))
            .await?;
        let messages_write_ms = msg_start.elapsed().as_secs_f64() * 1000.0;

        let metrics = WriteMetrics {
            conversation_write_ms,
            messages_write_ms,
            total_ms: total_start.elapsed().as_secs_f64() * 1000.0,
        };
        Ok((conversation_id, metrics))
    }

    fn write_conversation_record(&self, convo: &ConversationData) -> rusqlite::Result<i64> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM conversations WHERE project_id = ?1 AND session_id = ?2",
                params![convo.project_id, convo.session_id],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE conversations SET file_path = ?1, title = ?2, message_count = ?3, updated_at = ?4 WHERE id = ?5",
                    params![
                        convo.file_path.to_string_lossy(),
                        convo.title,
                        convo.message_count as i64,
                        convo.updated_at.to_rfc3339(),
                        id
                    ],
                )?;
                self.stats.lock().unwrap().conversations_updated += 1;
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO conversations
                     (project_id, session_id, file_path, title, message_count, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        convo.project_id,
                        convo.session_id,
                        convo.file_path.to_string_lossy(),
                        convo.title,
                        convo.message_count as i64,
                        convo.created_at.to_rfc3339(),
                        convo.updated_at.to_rfc3339(),
                    ],
                )?;
                let id = conn.last_insert_rowid();
                self.stats.lock().unwrap().conversations_written += 1;
                Ok(id)
            }
        }
    }

    fn upsert_messages(&self, conversation_id: i64, convo: &ConversationData) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut written = 0u64;
        for msg in &convo.messages {
            let tool_usage = serde_json::to_string(&msg.tool_usage).unwrap_or_else(|_| "[]".to_string());
            let changed = conn.execute(
                "INSERT INTO messages (conversation_id, message_id, parent_id, role, content, timestamp, tool_usage)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(conversation_id, message_id) DO NOTHING",
                params![
                    conversation_id,
                    msg.message_id,
                    msg.parent_id,
                    msg.role,
                    msg.content,
                    msg.timestamp.to_rfc3339(),
                    tool_usage,
                ],
            )?;
            written += changed as u64;
        }
        self.stats.lock().unwrap().messages_written += written;
        Ok(())
    }

    async fn with_retry<T>(&self, op: impl Fn() -> rusqlite::Result<T>) -> Result<T, WriterError> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        self.stats.lock().unwrap().write_errors += 1;
                        error!(%err, attempt, "persistence write failed, retries exhausted");
                        return Err(WriterError::DatabaseError(err));
                    }
                    let delay = self.retry.base_delay_ms * 2u64.pow(attempt - 1);
                    warn!(%err, attempt, delay_ms = delay, "persistence write failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
            }
        }
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            title TEXT,
            message_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(project_id, session_id)
        );
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id),
            message_id TEXT NOT NULL,
            parent_id TEXT,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            tool_usage TEXT,
            UNIQUE(conversation_id, message_id)
        );",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_conversation(project: &str, session: &str) -> ConversationData {
        let messages = vec![crate::transcript::ParsedMessage {
            message_id: "m1".to_string(),
            session_id: session.to_string(),
            parent_id: None,
            role: "user".to_string(),
            content: "hi".to_string(),
            timestamp: Utc::now(),
            tool_usage: vec![],
        }];
        ConversationData {
            id: None,
            project_id: project.to_string(),
            session_id: session.to_string(),
            file_path: "/tmp/x.jsonl".into(),
            title: Some("Conversation from /tmp/x.jsonl".to_string()),
            message_count: messages.len(),
            messages,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn writes_new_conversation_and_message() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PersistenceWriter::open(&dir.path().join("db.sqlite3"), RetryPolicy::default())
            .unwrap();
        let convo = sample_conversation("proj-1", "sess-1");
        let (_id, metrics) = writer.write_conversation(&convo).await.unwrap();
        assert!(metrics.total_ms >= 0.0);
        let stats = writer.stats();
        assert_eq!(stats.conversations_written, 1);
        assert_eq!(stats.messages_written, 1);
    }

    #[tokio::test]
    async fn rewriting_same_key_updates_not_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PersistenceWriter::open(&dir.path().join("db.sqlite3"), RetryPolicy::default())
            .unwrap();
        let convo = sample_conversation("proj-1", "sess-1");
        writer.write_conversation(&convo).await.unwrap();
        writer.write_conversation(&convo).await.unwrap();
        let stats = writer.stats();
        assert_eq!(stats.conversations_written, 1);
        assert_eq!(stats.conversations_updated, 1);
    }

    #[tokio::test]
    async fn duplicate_message_id_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PersistenceWriter::open(&dir.path().join("db.sqlite3"), RetryPolicy::default())
            .unwrap();
        let convo = sample_conversation("proj-1", "sess-1");
        writer.write_conversation(&convo).await.unwrap();
        writer.write_conversation(&convo).await.unwrap();
        assert_eq!(writer.stats().messages_written, 1);
    }

    #[tokio::test]
    async fn tool_usage_round_trips_through_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PersistenceWriter::open(&dir.path().join("db.sqlite3"), RetryPolicy::default())
            .unwrap();
        let mut convo = sample_conversation("proj-1", "sess-2");
        convo.messages[0].tool_usage.push(crate::transcript::ToolUsage {
            tool_id: "t1".to_string(),
            tool_name: "search".to_string(),
            tool_input: serde_json::json!({"q": "x"}),
            tool_output: Some("ok".to_string()),
            status: Some("success".to_string()),
        });
        writer.write_conversation(&convo).await.unwrap();

        let conn = writer.conn.lock().unwrap();
        let stored: String = conn
            .query_row("SELECT tool_usage FROM messages WHERE message_id = 'm1'", [], |row| row.get(0))
            .unwrap();
        assert!(stored.contains("search"));
    }
}
