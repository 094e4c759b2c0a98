//! The sole owner of the session table and subscription index.
//!
//! `all_conversations` is a global firehose: broadcasting under any other
//! key additionally reaches every client subscribed to `all_conversations`.

use crate::transcript::{default_subscriptions, Envelope, Session};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

const FIREHOSE_KEY: &str = "all_conversations";
const SEND_CHANNEL_CAPACITY: usize = 256;

struct Connection {
    session: Session,
    sender: mpsc::Sender<Envelope>,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<Uuid, Connection>>,
    subscriptions: Arc<DashMap<String, Vec<Uuid>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a new connection, seeding it with the default subscription
    /// set, and returns the client id plus the receiving half of its send
    /// channel.
    pub fn accept(&self, user_id: Option<String>) -> (Uuid, mpsc::Receiver<Envelope>) {
        let client_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SEND_CHANNEL_CAPACITY);
        let subscriptions = default_subscriptions();

        for key in &subscriptions {
            self.subscriptions.entry(key.clone()).or_default().push(client_id);
        }

        let session = Session {
            client_id,
            user_id,
            subscriptions,
            connected_at: chrono::Utc::now(),
        };
        self.connections.insert(client_id, Connection { session, sender: tx });
        debug!(%client_id, "connection accepted");
        (client_id, rx)
    }

    /// Removes a connection and prunes it out of every subscription bucket.
    pub fn remove(&self, client_id: Uuid) {
        self.connections.remove(&client_id);
        for mut entry in self.subscriptions.iter_mut() {
            entry.value_mut().retain(|id| *id != client_id);
        }
        self.subscriptions.retain(|_, ids| !ids.is_empty());
        debug!(%client_id, "connection removed");
    }

    pub fn session(&self, client_id: Uuid) -> Option<Session> {
        self.connections.get(&client_id).map(|c| c.session.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Sends `envelope` to every client subscribed to `filter_key`,
    /// additionally reaching every `all_conversations` subscriber. Returns
    /// the ids of clients whose send failed (closed channel).
    pub fn broadcast(&self, filter_key: &str, envelope: Envelope) -> Vec<Uuid> {
        let targets = self.resolve_targets(filter_key);
        let mut failed = Vec::new();
        for client_id in targets {
            if let Some(conn) = self.connections.get(&client_id) {
                if conn.sender.try_send(envelope.clone()).is_err() {
                    warn!(%client_id, "failed to deliver broadcast, channel closed or full");
                    failed.push(client_id);
                }
            }
        }
        failed
    }

    fn resolve_targets(&self, filter_key: &str) -> Vec<Uuid> {
        if filter_key == FIREHOSE_KEY {
            return self
                .subscriptions
                .get(FIREHOSE_KEY)
                .map(|ids| ids.clone())
                .unwrap_or_default();
        }

        let mut ids: Vec<Uuid> = self
            .subscriptions
            .get(filter_key)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        if let Some(firehose) = self.subscriptions.get(FIREHOSE_KEY) {
            for id in firehose.iter() {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
        }
        ids
    }
}
