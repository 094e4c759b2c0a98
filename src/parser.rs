//! Parses a transcript `.jsonl` file into a [`ConversationData`] value.
//!
//! Each line is an independent JSON object describing one message. Session
//! id is taken from the first successfully parsed message's `sessionId`
//! field — not derived from the file path — so that a file can be moved or
//! renamed without changing the conversation it belongs to.

use crate::transcript::{ConversationData, ParsedMessage, ToolUsage};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

const REQUIRED_FIELDS: &[&str] = &["uuid", "sessionId", "timestamp", "type", "message"];

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("permission denied reading {0}")]
    PermissionDenied(PathBuf),
    #[error("file is empty: {0}")]
    EmptyFile(PathBuf),
    #[error("failed to process {path}: {source}")]
    FileProcessing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no session id could be determined for {0}")]
    NoSessionId(PathBuf),
}

/// Why a single transcript line failed to become a [`ParsedMessage`].
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid role: {0}")]
    InvalidRole(String),
    #[error("missing or unrecognized content")]
    InvalidContent,
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// A per-line failure: either the line wasn't JSON at all, or it parsed but
/// failed validation. Blank lines are not an error — see [`JsonlParser::parse_line`].
#[derive(Debug, thiserror::Error)]
pub enum LineError {
    #[error("malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ParserStats {
    pub lines_processed: u64,
    pub messages_parsed: u64,
    pub parse_errors: u64,
    pub validation_errors: u64,
}

#[derive(Default)]
pub struct JsonlParser {
    stats: ParserStats,
}

impl JsonlParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = ParserStats::default();
    }

    /// Parses a single JSONL line. Returns `None` for a blank line (not an
    /// error); otherwise `Some(Ok(msg))` or `Some(Err(LineError))` carrying
    /// the reason the line was rejected. Every processed line bumps
    /// `lines_processed`; failures bump `parse_errors` or `validation_errors`
    /// as appropriate.
    pub fn parse_line(&mut self, line: &str) -> Option<Result<ParsedMessage, LineError>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        self.stats.lines_processed += 1;

        let raw: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(err) => {
                self.stats.parse_errors += 1;
                return Some(Err(LineError::MalformedJson(err)));
            }
        };

        match extract_message(&raw) {
            Ok(msg) => {
                self.stats.messages_parsed += 1;
                Some(Ok(msg))
            }
            Err(err) => {
                self.stats.validation_errors += 1;
                Some(Err(LineError::Validation(err)))
            }
        }
    }

    /// Parses an entire transcript file into a [`ConversationData`],
    /// extracting `project_id` from the watch-relative parent directory name
    /// and `session_id` from the first successfully parsed message.
    pub fn parse_conversation_file(
        &mut self,
        path: &Path,
        project_id: &str,
    ) -> Result<ConversationData, ParseError> {
        if !path.exists() {
            return Err(ParseError::FileNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                ParseError::PermissionDenied(path.to_path_buf())
            } else {
                ParseError::FileProcessing {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;

        if content.trim().is_empty() {
            return Err(ParseError::EmptyFile(path.to_path_buf()));
        }

        let mut messages = Vec::new();
        for line in content.lines() {
            match self.parse_line(line) {
                Some(Ok(msg)) => messages.push(msg),
                Some(Err(err)) => warn!(%err, "transcript line rejected"),
                None => {}
            }
        }

        // Session id comes from the first message in file order, before the
        // timestamp sort below — a file may arrive with out-of-order lines.
        let session_id = messages
            .first()
            .map(|m| m.session_id.clone())
            .ok_or_else(|| ParseError::NoSessionId(path.to_path_buf()))?;

        messages.sort_by_key(|m| m.timestamp);

        let now = Utc::now();
        let created_at = messages.first().map(|m| m.timestamp).unwrap_or(now);
        let updated_at = messages.last().map(|m| m.timestamp).unwrap_or(now);
        let message_count = messages.len();

        Ok(ConversationData {
            id: None,
            project_id: project_id.to_string(),
            session_id,
            file_path: path.to_path_buf(),
            title: Some(format!("Conversation from {}", path.display())),
            message_count,
            messages,
            created_at,
            updated_at,
        })
    }
}

fn extract_message(raw: &serde_json::Value) -> Result<ParsedMessage, ValidationError> {
    for field in REQUIRED_FIELDS {
        if raw.get(field).is_none() {
            return Err(ValidationError::MissingField(field));
        }
    }

    let message = raw.get("message").ok_or(ValidationError::MissingField("message"))?;
    let role = message
        .get("role")
        .and_then(|v| v.as_str())
        .ok_or(ValidationError::MissingField("message.role"))?;
    if role != "user" && role != "assistant" {
        return Err(ValidationError::InvalidRole(role.to_string()));
    }

    let content_value = message
        .get("content")
        .ok_or(ValidationError::MissingField("message.content"))?;
    let content = extract_content(content_value).ok_or(ValidationError::InvalidContent)?;
    let tool_usage = extract_tool_usage(content_value);

    let timestamp_raw = raw
        .get("timestamp")
        .and_then(|v| v.as_str())
        .ok_or(ValidationError::MissingField("timestamp"))?;
    let timestamp = parse_timestamp(timestamp_raw)
        .ok_or_else(|| ValidationError::InvalidTimestamp(timestamp_raw.to_string()))?;

    let message_id = raw
        .get("uuid")
        .and_then(|v| v.as_str())
        .ok_or(ValidationError::MissingField("uuid"))?
        .to_string();
    let session_id = raw
        .get("sessionId")
        .and_then(|v| v.as_str())
        .ok_or(ValidationError::MissingField("sessionId"))?
        .to_string();
    let parent_id = raw
        .get("parentUuid")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    Ok(ParsedMessage {
        message_id,
        session_id,
        parent_id,
        role: role.to_string(),
        content,
        timestamp,
        tool_usage,
    })
}

fn extract_content(content: &serde_json::Value) -> Option<String> {
    if let Some(s) = content.as_str() {
        return Some(s.to_string());
    }
    if let Some(blocks) = content.as_array() {
        let text: Vec<&str> = blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect();
        return Some(text.join("\n"));
    }
    None
}

fn extract_tool_usage(content: &serde_json::Value) -> Vec<ToolUsage> {
    let Some(blocks) = content.as_array() else {
        return Vec::new();
    };

    let mut usage = Vec::new();
    let mut index_by_id: HashMap<String, usize> = HashMap::new();

    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("tool_use") => {
                let Some(id) = block.get("id").and_then(|v| v.as_str()) else {
                    continue;
                };
                let name = block
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let input = block.get("input").cloned().unwrap_or(serde_json::Value::Null);
                index_by_id.insert(id.to_string(), usage.len());
                usage.push(ToolUsage {
                    tool_id: id.to_string(),
                    tool_name: name,
                    tool_input: input,
                    tool_output: None,
                    status: Some("pending".to_string()),
                });
            }
            Some("tool_result") => {
                let Some(id) = block.get("tool_use_id").and_then(|v| v.as_str()) else {
                    continue;
                };
                if let Some(&idx) = index_by_id.get(id) {
                    let output = block
                        .get("content")
                        .and_then(|c| extract_content(c))
                        .unwrap_or_default();
                    let status = if block.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false)
                    {
                        "error"
                    } else {
                        "success"
                    };
                    usage[idx].tool_output = Some(output);
                    usage[idx].status = Some(status.to_string());
                }
            }
            _ => {}
        }
    }

    usage
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let normalized = raw.replace('Z', "+00:00");
    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(role: &str, content: &str, session: &str) -> String {
        serde_json::json!({
            "uuid": uuid::Uuid::new_v4().to_string(),
            "sessionId": session,
            "timestamp": "2026-01-01T00:00:00Z",
            "type": "message",
            "message": { "role": role, "content": content },
        })
        .to_string()
    }

    #[test]
    fn parses_simple_text_message() {
        let mut parser = JsonlParser::new();
        let msg = parser.parse_line(&line("user", "hello", "sess-1")).unwrap().unwrap();
        assert_eq!(msg.role, "user");
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.session_id, "sess-1");
        assert_eq!(parser.stats().messages_parsed, 1);
    }

    #[test]
    fn rejects_invalid_role() {
        let mut parser = JsonlParser::new();
        let err = parser.parse_line(&line("system", "x", "sess-1")).unwrap().unwrap_err();
        assert!(matches!(err, LineError::Validation(ValidationError::InvalidRole(_))));
        assert_eq!(parser.stats().validation_errors, 1);
    }

    #[test]
    fn ignores_blank_lines() {
        let mut parser = JsonlParser::new();
        assert!(parser.parse_line("   ").is_none());
        assert_eq!(parser.stats().lines_processed, 0);
    }

    #[test]
    fn counts_malformed_json_as_parse_error() {
        let mut parser = JsonlParser::new();
        let err = parser.parse_line("{not json").unwrap().unwrap_err();
        assert!(matches!(err, LineError::MalformedJson(_)));
        assert_eq!(parser.stats().parse_errors, 1);
    }

    #[test]
    fn joins_text_blocks_and_extracts_tool_usage() {
        let raw = serde_json::json!({
            "uuid": "u1",
            "sessionId": "sess-2",
            "timestamp": "2026-01-01T00:00:00Z",
            "type": "message",
            "message": {
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "first"},
                    {"type": "tool_use", "id": "t1", "name": "search", "input": {"q": "x"}},
                    {"type": "text", "text": "second"},
                ],
            },
        })
        .to_string();
        let mut parser = JsonlParser::new();
        let msg = parser.parse_line(&raw).unwrap().unwrap();
        assert_eq!(msg.content, "first\nsecond");
        assert_eq!(msg.tool_usage.len(), 1);
        assert_eq!(msg.tool_usage[0].tool_name, "search");
        assert!(msg.tool_usage[0].tool_output.is_none());
        assert_eq!(msg.tool_usage[0].status.as_deref(), Some("pending"));
    }

    #[test]
    fn pairs_tool_result_with_matching_tool_use() {
        let raw = serde_json::json!({
            "uuid": "u2",
            "sessionId": "sess-3",
            "timestamp": "2026-01-01T00:00:00Z",
            "type": "message",
            "message": {
                "role": "assistant",
                "content": [
                    {"type": "tool_use", "id": "t1", "name": "search", "input": {}},
                    {"type": "tool_result", "tool_use_id": "t1", "content": "ok", "is_error": false},
                ],
            },
        })
        .to_string();
        let mut parser = JsonlParser::new();
        let msg = parser.parse_line(&raw).unwrap().unwrap();
        assert_eq!(msg.tool_usage[0].tool_output.as_deref(), Some("ok"));
        assert_eq!(msg.tool_usage[0].status.as_deref(), Some("success"));
    }

    #[test]
    fn parse_conversation_file_extracts_session_id_from_first_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.jsonl");
        let content = format!(
            "{}\n{}\n",
            line("user", "hi", "session-from-message"),
            line("assistant", "hello back", "session-from-message")
        );
        std::fs::write(&path, content).unwrap();

        let mut parser = JsonlParser::new();
        let convo = parser.parse_conversation_file(&path, "proj-1").unwrap();
        assert_eq!(convo.session_id, "session-from-message");
        assert_eq!(convo.messages.len(), 2);
        assert_eq!(convo.message_count, convo.messages.len());
        assert_eq!(convo.id, None);
    }

    #[test]
    fn messages_are_sorted_by_timestamp_ties_broken_by_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.jsonl");
        let msg = |uuid: &str, ts: &str| {
            serde_json::json!({
                "uuid": uuid,
                "sessionId": "sess-order",
                "timestamp": ts,
                "type": "message",
                "message": { "role": "user", "content": uuid },
            })
            .to_string()
        };
        let content = format!(
            "{}\n{}\n{}\n",
            msg("second", "2026-01-01T00:00:05Z"),
            msg("first", "2026-01-01T00:00:00Z"),
            msg("tied-after", "2026-01-01T00:00:00Z"),
        );
        std::fs::write(&path, content).unwrap();

        let mut parser = JsonlParser::new();
        let convo = parser.parse_conversation_file(&path, "proj-1").unwrap();
        let ids: Vec<&str> = convo.messages.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "tied-after", "second"]);
        // session id is taken from file order (the "second" line), not post-sort order.
        assert_eq!(convo.session_id, "sess-order");
    }

    #[test]
    fn parent_id_is_extracted_when_present() {
        let raw = serde_json::json!({
            "uuid": "u3",
            "parentUuid": "u2",
            "sessionId": "sess-4",
            "timestamp": "2026-01-01T00:00:00Z",
            "type": "message",
            "message": { "role": "user", "content": "hi" },
        })
        .to_string();
        let mut parser = JsonlParser::new();
        let msg = parser.parse_line(&raw).unwrap().unwrap();
        assert_eq!(msg.parent_id.as_deref(), Some("u2"));
    }

    #[test]
    fn parent_id_is_none_when_absent() {
        let mut parser = JsonlParser::new();
        let msg = parser.parse_line(&line("user", "hi", "sess-5")).unwrap().unwrap();
        assert_eq!(msg.parent_id, None);
    }

    #[test]
    fn empty_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.jsonl");
        std::fs::write(&path, "").unwrap();
        let mut parser = JsonlParser::new();
        assert!(matches!(
            parser.parse_conversation_file(&path, "proj-1"),
            Err(ParseError::EmptyFile(_))
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let mut parser = JsonlParser::new();
        let result = parser.parse_conversation_file(Path::new("/no/such/file.jsonl"), "proj-1");
        assert!(matches!(result, Err(ParseError::FileNotFound(_))));
    }
}
