//! Agent execution loop
//!
//! THINK → ACT → OBSERVE, bounded by an iteration limit. One model call per
//! iteration. Tool calls requested by the model are dispatched concurrently;
//! validation failures get corrective feedback and a bounded number of
//! retries; every terminal path returns a well-formed response carrying the
//! artifacts gathered so far.

pub mod diagnostics;
pub mod profiles;

pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use profiles::AgentProfile;

use crate::config::LoopSettings;
use crate::error::{FailureKind, OrchestrationError};
use crate::execution::{pending_calls, ToolDispatcher};
use crate::extractor::{ArtifactExtractor, Extracted};
use crate::llm::{ModelClient, ModelRequest};
use crate::models::{
    AgentKind, AgentResponse, ChartArtifact, Message, PortfolioSnapshot, TurnOutcome,
};
use crate::tools::{ToolInvoker, ToolSignature};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const EXHAUSTED_MESSAGE: &str = "I apologize, but I couldn't complete the request within the iteration limit. Here are the results I was able to generate.";

pub const RETRIES_EXHAUSTED_MESSAGE: &str = "I encountered repeated validation errors when calling the tools. This typically means the tool parameters were not formatted correctly. Please try rephrasing your request or contact support if the issue persists.";

pub const FAILURE_MESSAGE: &str = "I encountered an error, but here are the results I was able to generate before the error occurred.";

pub(crate) const FEEDBACK_PREFIX: &str = "The previous tool call was rejected:";

/// Input of one agent invocation.
pub struct AgentRequest<'a> {
    pub session_id: &'a str,
    /// Full session history, ending with the new user message.
    pub history: &'a [Message],
    pub portfolio: &'a PortfolioSnapshot,
}

#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn run(&self, request: AgentRequest<'_>) -> Result<AgentResponse>;
}

/// Artifacts accumulated over one turn.
#[derive(Debug, Default)]
struct TurnArtifacts {
    charts: Vec<ChartArtifact>,
    portfolio: Option<PortfolioSnapshot>,
    parse_failures: usize,
}

impl TurnArtifacts {
    fn absorb(&mut self, extracted: Extracted) {
        self.charts.extend(extracted.charts);
        if extracted.portfolio.is_some() {
            self.portfolio = extracted.portfolio;
        }
        self.parse_failures += extracted.parse_failures;
    }

    fn into_response(self, agent: AgentKind, message: String, outcome: TurnOutcome) -> AgentResponse {
        AgentResponse {
            agent,
            message,
            charts: self.charts,
            portfolio: self.portfolio,
            outcome,
        }
    }
}

/// A failed iteration, with whatever messages completed before the failure.
struct StepFailure {
    error: OrchestrationError,
    completed: Vec<Message>,
}

impl From<OrchestrationError> for StepFailure {
    fn from(error: OrchestrationError) -> Self {
        Self {
            error,
            completed: Vec::new(),
        }
    }
}

pub struct AgentExecutor {
    profile: AgentProfile,
    model: Arc<dyn ModelClient>,
    dispatcher: ToolDispatcher,
    extractor: ArtifactExtractor,
    limits: LoopSettings,
    diagnostics: Arc<Diagnostics>,
}

impl AgentExecutor {
    pub fn new(
        profile: AgentProfile,
        model: Arc<dyn ModelClient>,
        invoker: Arc<dyn ToolInvoker>,
        limits: LoopSettings,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let extractor = ArtifactExtractor::new(&invoker.signatures());
        let dispatcher = ToolDispatcher::new(invoker, limits.call_timeout)
            .restricted_to(profile.tools.iter().copied());

        Self {
            profile,
            model,
            dispatcher,
            extractor,
            limits,
            diagnostics,
        }
    }

    /// THINK + ACT: one model call, then dispatch of any unanswered tool calls.
    async fn step(
        &self,
        policy: &str,
        tools: &[ToolSignature],
        history: &[Message],
    ) -> std::result::Result<Vec<Message>, StepFailure> {
        let request = ModelRequest {
            policy,
            history,
            tools,
        };

        let output = match tokio::time::timeout(self.limits.call_timeout, self.model.complete(request)).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(OrchestrationError::Timeout(self.limits.call_timeout.as_millis() as u64).into())
            }
        };

        let mut batch = output.into_messages();

        let requested: Vec<&str> = batch
            .iter()
            .filter_map(|message| match message {
                Message::Assistant { tool_calls, .. } => Some(tool_calls),
                _ => None,
            })
            .flatten()
            .map(|call| call.name.as_str())
            .collect();
        if !requested.is_empty() {
            debug!(agent = %self.profile.kind, tools = ?requested, "Model requested tools");
            self.diagnostics.record_tool_calls(requested.len());
        }

        let pending = pending_calls(&batch);
        if pending.is_empty() {
            return Ok(batch);
        }

        let mut failure = None;
        for outcome in self.dispatcher.dispatch(pending).await {
            match outcome {
                Ok(result) => batch.push(Message::Tool(result)),
                Err(tool_failure) => {
                    warn!(
                        agent = %self.profile.kind,
                        tool = tool_failure.tool(),
                        kind = ?tool_failure.kind(),
                        "Tool call failed: {}",
                        tool_failure
                    );
                    failure.get_or_insert(tool_failure);
                }
            }
        }

        match failure {
            Some(tool_failure) => Err(StepFailure {
                error: tool_failure.into(),
                completed: batch,
            }),
            None => Ok(batch),
        }
    }

    fn observe(&self, batch: &[Message], artifacts: &mut TurnArtifacts) {
        for message in batch {
            if let Message::Tool(result) = message {
                artifacts.absorb(self.extractor.extract(result));
            }
        }
    }

    async fn drive(
        &self,
        request: &AgentRequest<'_>,
        artifacts: &mut TurnArtifacts,
    ) -> Result<(String, TurnOutcome)> {
        let policy = self.profile.policy_with_context(request.portfolio);
        let tools = self.dispatcher.signatures();
        let mut working: Vec<Message> = request.history.to_vec();
        let mut validation_failures: u32 = 0;

        for iteration in 1..=self.limits.max_iterations {
            debug!(
                agent = %self.profile.kind,
                session_id = request.session_id,
                iteration,
                history_len = working.len(),
                "Agent iteration"
            );

            let batch = match self.step(&policy, &tools, &working).await {
                Ok(batch) => {
                    validation_failures = 0;
                    batch
                }
                Err(failure) if failure.error.kind() == FailureKind::Validation => {
                    validation_failures += 1;
                    self.diagnostics.record_validation_retry();
                    warn!(
                        agent = %self.profile.kind,
                        iteration,
                        validation_failures,
                        "Validation failure: {}",
                        failure.error
                    );

                    if validation_failures > self.limits.max_validation_retries {
                        return Ok((RETRIES_EXHAUSTED_MESSAGE.to_string(), TurnOutcome::RetriesExhausted));
                    }

                    working.push(Message::user(corrective_feedback(&failure.error)));
                    continue;
                }
                Err(failure) => {
                    self.observe(&failure.completed, artifacts);
                    return Err(failure.error);
                }
            };

            self.observe(&batch, artifacts);

            let final_text = match batch.last() {
                None => {
                    return Err(OrchestrationError::LlmError(
                        "model returned an empty message batch".to_string(),
                    ))
                }
                Some(last) if last.is_final_answer() => Some(last.text().unwrap_or_default().to_string()),
                Some(_) => None,
            };

            if let Some(text) = final_text {
                return Ok((text, TurnOutcome::Completed));
            }
            working.extend(batch);
        }

        warn!(
            agent = %self.profile.kind,
            session_id = request.session_id,
            max_iterations = self.limits.max_iterations,
            "Iteration limit reached"
        );
        Ok((EXHAUSTED_MESSAGE.to_string(), TurnOutcome::Exhausted))
    }
}

/// Feedback appended after a rejected tool call.
fn corrective_feedback(error: &OrchestrationError) -> String {
    let detail: String = error.to_string().chars().take(200).collect();
    format!(
        "{} {}\n\n\
         Fix the call and try again:\n\
         1. Check the tool signature and call only the tools listed.\n\
         2. Pass each parameter as its own argument.\n\
         3. Do not nest parameters inside another object unless the schema declares an object.\n\
         4. For create_multi_line_chart, y_series holds only the series data; title, xlabel and ylabel are separate arguments.",
        FEEDBACK_PREFIX, detail
    )
}

#[async_trait::async_trait]
impl Agent for AgentExecutor {
    fn kind(&self) -> AgentKind {
        self.profile.kind
    }

    async fn run(&self, request: AgentRequest<'_>) -> Result<AgentResponse> {
        let agent = self.profile.kind;
        let invocation = self.diagnostics.record_invocation(agent);
        info!(
            agent = %agent,
            session_id = request.session_id,
            invocation,
            history_len = request.history.len(),
            "Agent invoked"
        );

        let mut artifacts = TurnArtifacts::default();
        let (message, outcome) = match self.drive(&request, &mut artifacts).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    agent = %agent,
                    session_id = request.session_id,
                    error = %e,
                    "Agent loop failed, returning partial results"
                );
                (FAILURE_MESSAGE.to_string(), TurnOutcome::Failed)
            }
        };

        info!(
            agent = %agent,
            session_id = request.session_id,
            ?outcome,
            charts = artifacts.charts.len(),
            portfolio_updated = artifacts.portfolio.is_some(),
            parse_failures = artifacts.parse_failures,
            "Agent finished"
        );

        Ok(artifacts.into_response(agent, message, outcome))
    }
}
