//! Subscription-key grammar accepted by the WebSocket handshake and used to
//! route broadcasts through the connection registry.

use std::fmt;

/// A parsed subscription key. `AllConversations` is the global firehose:
/// every filtered broadcast is unioned with it by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    AllConversations,
    ProjectUpdates,
    FileEvents,
    Project(String),
    Conversation(String),
    FileEventsFor(String),
}

impl SubscriptionKey {
    /// Parses the wire form of a subscription key (e.g. `project:abc123`).
    /// Unknown prefixes or an empty opaque id are rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "all_conversations" => return Some(Self::AllConversations),
            "project_updates" => return Some(Self::ProjectUpdates),
            "file_events" => return Some(Self::FileEvents),
            _ => {}
        }
        let (prefix, id) = raw.split_once(':')?;
        if id.is_empty() {
            return None;
        }
        match prefix {
            "project" => Some(Self::Project(id.to_string())),
            "conversation" => Some(Self::Conversation(id.to_string())),
            "file_events" => Some(Self::FileEventsFor(id.to_string())),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllConversations => write!(f, "all_conversations"),
            Self::ProjectUpdates => write!(f, "project_updates"),
            Self::FileEvents => write!(f, "file_events"),
            Self::Project(id) => write!(f, "project:{id}"),
            Self::Conversation(id) => write!(f, "conversation:{id}"),
            Self::FileEventsFor(id) => write!(f, "file_events:{id}"),
        }
    }
}

/// Default subscriptions a newly accepted connection is given, matching the
/// original connection manager's default set.
pub fn default_subscriptions() -> Vec<String> {
    vec![
        SubscriptionKey::AllConversations.as_wire(),
        SubscriptionKey::FileEvents.as_wire(),
    ]
}
