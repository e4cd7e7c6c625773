pub mod agents;
pub mod artifacts;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod extraction;
pub mod llm;
pub mod mcp;
pub mod schema;
pub mod terminal;
pub mod transport;
