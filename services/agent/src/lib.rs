pub mod admin;
pub mod chat_client;
pub mod config;
pub mod meta_indexer;
pub mod parser;
pub mod pipeline;

pub use config::AgentConfig;
