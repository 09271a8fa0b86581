//! Tool dispatch for one agent iteration
//!
//! All tool calls requested in a batch run concurrently, each under its own
//! timeout. The dispatcher waits for every call and returns outcomes in
//! request order.

use crate::error::ToolFailure;
use crate::models::{Message, ToolCallRequest, ToolResult};
use crate::tools::{ToolInvoker, ToolSignature};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub type DispatchOutcome = std::result::Result<ToolResult, ToolFailure>;

pub struct ToolDispatcher {
    invoker: Arc<dyn ToolInvoker>,
    allowed: Option<HashSet<String>>,
    call_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(invoker: Arc<dyn ToolInvoker>, call_timeout: Duration) -> Self {
        Self {
            invoker,
            allowed: None,
            call_timeout,
        }
    }

    /// Only the named tools are advertised and callable.
    pub fn restricted_to<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed.as_ref().map_or(true, |allowed| allowed.contains(name))
    }

    pub fn signatures(&self) -> Vec<ToolSignature> {
        self.invoker
            .signatures()
            .into_iter()
            .filter(|signature| self.is_allowed(&signature.name))
            .collect()
    }

    pub async fn dispatch(&self, calls: Vec<ToolCallRequest>) -> Vec<DispatchOutcome> {
        let mut slots: Vec<Option<DispatchOutcome>> = vec![None; calls.len()];
        let mut tasks = JoinSet::new();

        for (index, call) in calls.iter().enumerate() {
            if !self.is_allowed(&call.name) {
                warn!(tool = %call.name, "Model requested a tool outside this agent's set");
                slots[index] = Some(Err(ToolFailure::validation(
                    &call.name,
                    "this tool is not available to the current agent",
                )));
                continue;
            }

            let invoker = Arc::clone(&self.invoker);
            let call = call.clone();
            let call_timeout = self.call_timeout;

            tasks.spawn(async move {
                let started = Instant::now();
                let outcome = match tokio::time::timeout(call_timeout, invoker.invoke(&call.name, &call.arguments)).await {
                    Ok(Ok(content)) => Ok(ToolResult {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        content,
                        is_error: false,
                    }),
                    Ok(Err(failure)) => Err(failure),
                    Err(_) => Err(ToolFailure::transport(
                        &call.name,
                        format!("timed out after {} ms", call_timeout.as_millis()),
                    )),
                };

                debug!(
                    tool = %call.name,
                    call_id = %call.id,
                    ok = outcome.is_ok(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tool call complete"
                );

                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!("Tool task did not complete: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(calls)
            .map(|(slot, call)| {
                slot.unwrap_or_else(|| Err(ToolFailure::unknown(&call.name, "tool task aborted")))
            })
            .collect()
    }
}

/// Tool calls in `batch` that have no matching tool result in the same batch.
pub fn pending_calls(batch: &[Message]) -> Vec<ToolCallRequest> {
    let answered: HashSet<&str> = batch
        .iter()
        .filter_map(|message| match message {
            Message::Tool(result) => Some(result.tool_call_id.as_str()),
            _ => None,
        })
        .collect();

    batch
        .iter()
        .filter_map(|message| match message {
            Message::Assistant { tool_calls, .. } => Some(tool_calls),
            _ => None,
        })
        .flatten()
        .filter(|call| !answered.contains(call.id.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::models::ContentBlock;
    use crate::tools::ToolOutcome;
    use serde_json::{json, Value};

    /// Sleeps for `args.delay_ms` and echoes the tool name.
    struct SleepyInvoker;

    #[async_trait::async_trait]
    impl ToolInvoker for SleepyInvoker {
        fn signatures(&self) -> Vec<ToolSignature> {
            ["fast", "slow", "hidden"]
                .iter()
                .map(|name| ToolSignature {
                    name: name.to_string(),
                    description: String::new(),
                    parameters: json!({"type": "object"}),
                    artifact: None,
                })
                .collect()
        }

        async fn invoke(&self, name: &str, args: &Value) -> ToolOutcome {
            let delay = args.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(vec![ContentBlock::text(name)])
        }
    }

    fn call(id: &str, name: &str, delay_ms: u64) -> ToolCallRequest {
        ToolCallRequest::new(id, name, json!({"delay_ms": delay_ms}))
    }

    #[tokio::test]
    async fn test_results_keep_request_order_and_run_concurrently() {
        let dispatcher = ToolDispatcher::new(Arc::new(SleepyInvoker), Duration::from_secs(5));
        let started = Instant::now();

        let outcomes = dispatcher
            .dispatch(vec![call("a", "slow", 150), call("b", "fast", 0), call("c", "slow", 150)])
            .await;

        assert!(started.elapsed() < Duration::from_millis(290));
        let ids: Vec<String> = outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap().tool_call_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_timeout_is_transport_failure() {
        let dispatcher = ToolDispatcher::new(Arc::new(SleepyInvoker), Duration::from_millis(20));
        let outcomes = dispatcher.dispatch(vec![call("a", "slow", 500), call("b", "fast", 0)]).await;

        assert_eq!(outcomes[0].as_ref().unwrap_err().kind(), FailureKind::Transport);
        assert!(outcomes[1].is_ok());
    }

    #[tokio::test]
    async fn test_restricted_tools() {
        let dispatcher = ToolDispatcher::new(Arc::new(SleepyInvoker), Duration::from_secs(1))
            .restricted_to(["fast", "slow"]);

        let names: Vec<String> = dispatcher.signatures().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["fast", "slow"]);

        let outcomes = dispatcher.dispatch(vec![call("a", "hidden", 0)]).await;
        assert_eq!(outcomes[0].as_ref().unwrap_err().kind(), FailureKind::Validation);
    }

    #[test]
    fn test_pending_calls_skips_answered() {
        let batch = vec![
            Message::Assistant {
                content: None,
                tool_calls: vec![call("a", "fast", 0), call("b", "slow", 0)],
            },
            Message::Tool(ToolResult {
                tool_call_id: "a".into(),
                tool_name: "fast".into(),
                content: vec![],
                is_error: false,
            }),
        ];

        let pending = pending_calls(&batch);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "b");
    }
}
