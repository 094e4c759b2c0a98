pub mod schema;
pub mod subscription;

pub use schema::{
    ConversationData, Envelope, FileEvent, FileEventError, FileEventKind, ParsedMessage,
    PerformanceSample, Session, ToolUsage,
};
pub use subscription::{default_subscriptions, SubscriptionKey};
