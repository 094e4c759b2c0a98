pub mod broadcaster;
pub mod handler;
pub mod registry;

pub use broadcaster::Broadcaster;
pub use handler::{upgrade, WsState};
pub use registry::ConnectionRegistry;
