//! Builds envelopes and routes them to the connection registry. Kept
//! separate from [`super::registry`] so the orchestrator can reason about
//! "what to send and where" independent of the session-table mechanics.

use crate::transcript::{ConversationData, Envelope, SubscriptionKey};
use crate::ws::registry::ConnectionRegistry;
use tracing::warn;
use uuid::Uuid;

pub struct Broadcaster {
    registry: ConnectionRegistry,
}

impl Broadcaster {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Broadcasts a conversation update under `project:<project_id>`, which
    /// the registry unions with every `all_conversations` subscriber.
    pub fn broadcast_conversation_update(&self, convo: &ConversationData) -> Vec<Uuid> {
        let envelope = Envelope::new(
            "conversation_update",
            serde_json::json!({
                "project_id": convo.project_id,
                "session_id": convo.session_id,
                "message_count": convo.messages.len(),
                "updated_at": convo.updated_at,
            }),
        );
        let key = SubscriptionKey::Project(convo.project_id.clone()).as_wire();
        let failed = self.registry.broadcast(&key, envelope);
        if !failed.is_empty() {
            warn!(count = failed.len(), "conversation update delivery failed for some clients");
        }
        failed
    }

    /// Broadcasts a raw file-monitoring update under `file_events`. The
    /// envelope type is `kind` itself (e.g. `file_created`, `file_modified`),
    /// not a generic label.
    pub fn broadcast_file_event(&self, path: &str, kind: &str) -> Vec<Uuid> {
        let envelope = Envelope::new(
            kind,
            serde_json::json!({ "path": path, "kind": kind }),
        );
        let key = SubscriptionKey::FileEvents.as_wire();
        self.registry.broadcast(&key, envelope)
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::ParsedMessage;
    use chrono::Utc;

    fn sample_conversation() -> ConversationData {
        let messages = vec![ParsedMessage {
            message_id: "m1".to_string(),
            session_id: "sess-1".to_string(),
            parent_id: None,
            role: "user".to_string(),
            content: "hi".to_string(),
            timestamp: Utc::now(),
            tool_usage: vec![],
        }];
        ConversationData {
            id: None,
            project_id: "proj-1".to_string(),
            session_id: "sess-1".to_string(),
            file_path: "/tmp/x.jsonl".into(),
            title: Some("Conversation from /tmp/x.jsonl".to_string()),
            message_count: messages.len(),
            messages,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn conversation_update_reaches_firehose_subscriber() {
        let registry = ConnectionRegistry::new();
        let (_client_id, mut rx) = registry.accept(None);
        let broadcaster = Broadcaster::new(registry);
        let failed = broadcaster.broadcast_conversation_update(&sample_conversation());
        assert!(failed.is_empty());
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.kind, "conversation_update");
    }

    #[tokio::test]
    async fn file_event_reaches_file_events_subscriber() {
        let registry = ConnectionRegistry::new();
        let (_client_id, mut rx) = registry.accept(None);
        let broadcaster = Broadcaster::new(registry);
        broadcaster.broadcast_file_event("/a/b.jsonl", "file_modified");
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.kind, "file_modified");
        assert_eq!(envelope.data["path"], "/a/b.jsonl");
    }
}
