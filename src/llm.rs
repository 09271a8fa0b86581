//! Model client abstraction
//!
//! The reasoning backend receives the operator policy, the working history
//! and the tools it may request. It answers either with final text or with a
//! batch of messages (tool-call requests, possibly already-executed results).

use crate::models::Message;
use crate::tools::ToolSignature;
use crate::Result;

pub struct ModelRequest<'a> {
    pub policy: &'a str,
    pub history: &'a [Message],
    pub tools: &'a [ToolSignature],
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    Final(String),
    Messages(Vec<Message>),
}

impl ModelOutput {
    /// Normalize into a message batch; final text becomes one assistant message.
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            ModelOutput::Final(text) => vec![Message::assistant(text)],
            ModelOutput::Messages(messages) => messages,
        }
    }

    /// Text of the answer, used by classification.
    pub fn final_text(&self) -> Option<&str> {
        match self {
            ModelOutput::Final(text) => Some(text),
            ModelOutput::Messages(messages) => messages
                .iter()
                .rev()
                .find(|message| message.is_final_answer())
                .and_then(Message::text),
        }
    }
}

#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelOutput>;
}
