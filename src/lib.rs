//! Finance Agent Router
//!
//! Orchestration layer of a financial chat assistant:
//! - An intent router that classifies each user turn to one specialist agent
//! - A bounded tool-using agent loop with corrective retries on bad tool calls
//! - Per-session state (history, portfolio, last agent) behind a store trait
//! - Chart and portfolio artifacts extracted from tool results
//!
//! TURN:
//! LOCK → LOAD → CLASSIFY → (THINK → ACT → OBSERVE)* → PERSIST → RESPOND

pub mod agent;
pub mod api;
pub mod classifier;
pub mod config;
pub mod error;
pub mod execution;
pub mod extractor;
pub mod gemini;
pub mod llm;
pub mod models;
pub mod router;
pub mod state;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use router::IntentRouter;
