//! Scripted model and tool stubs shared by unit tests.

use crate::error::ToolFailure;
use crate::llm::{ModelClient, ModelOutput, ModelRequest};
use crate::models::{ContentBlock, Message, ToolCallRequest};
use crate::tools::{ToolInvoker, ToolOutcome, ToolSignature};
use crate::Result;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Model whose answer is computed from the call index and the history it sees.
pub struct FnModel<F> {
    respond: F,
    calls: AtomicUsize,
    pub histories: Mutex<Vec<Vec<Message>>>,
    pub policies: Mutex<Vec<String>>,
}

impl<F> FnModel<F>
where
    F: Fn(usize, &[Message]) -> Result<ModelOutput> + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            calls: AtomicUsize::new(0),
            histories: Mutex::new(Vec::new()),
            policies: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_history(&self) -> Vec<Message> {
        self.histories.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl<F> ModelClient for FnModel<F>
where
    F: Fn(usize, &[Message]) -> Result<ModelOutput> + Send + Sync,
{
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelOutput> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.histories.lock().unwrap().push(request.history.to_vec());
        self.policies.lock().unwrap().push(request.policy.to_string());
        (self.respond)(index, request.history)
    }
}

/// Invoker answering every tool through one closure `(name, args, call_index)`.
pub struct FnInvoker<F> {
    names: Vec<String>,
    respond: F,
    calls: AtomicUsize,
}

impl<F> FnInvoker<F>
where
    F: Fn(&str, &Value, usize) -> ToolOutcome + Send + Sync,
{
    pub fn new(names: &[&str], respond: F) -> Self {
        Self {
            names: names.iter().map(|name| name.to_string()).collect(),
            respond,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl<F> ToolInvoker for FnInvoker<F>
where
    F: Fn(&str, &Value, usize) -> ToolOutcome + Send + Sync,
{
    fn signatures(&self) -> Vec<ToolSignature> {
        self.names
            .iter()
            .map(|name| ToolSignature {
                name: name.clone(),
                description: String::new(),
                parameters: json!({"type": "object"}),
                artifact: None,
            })
            .collect()
    }

    async fn invoke(&self, name: &str, args: &Value) -> ToolOutcome {
        if !self.names.iter().any(|known| known == name) {
            return Err(ToolFailure::validation(name, "no tool with this name is available"));
        }
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(name, args, index)
    }
}

pub fn call_tools(calls: &[(&str, &str, Value)]) -> ModelOutput {
    ModelOutput::Messages(vec![Message::tool_calls(
        calls
            .iter()
            .map(|(id, name, args)| ToolCallRequest::new(*id, *name, args.clone()))
            .collect(),
    )])
}

pub fn chart_block(title: &str, filename: &str) -> ContentBlock {
    ContentBlock::text(json!({"title": title, "filename": filename, "chart_type": "line"}).to_string())
}

pub fn has_tool_result(history: &[Message]) -> bool {
    history.iter().any(|message| matches!(message, Message::Tool(_)))
}
