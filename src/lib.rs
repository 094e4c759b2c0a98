pub mod auth;
pub mod config;
pub mod monitor;
pub mod net;
pub mod orchestrator;
pub mod parser;
pub mod persistence;
pub mod transcript;
pub mod watcher;
pub mod ws;

pub use config::Config;
pub use orchestrator::Orchestrator;
