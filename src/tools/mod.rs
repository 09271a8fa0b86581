//! Tool trait, registry and invoker
//!
//! Every capability an agent can call is a `Tool`. The `ToolRegistry` checks
//! argument shape before executing, retries transport failures a bounded
//! number of times, and never retries validation failures.

pub mod portfolio;
pub mod remote;

use crate::error::{FailureKind, ToolFailure};
use crate::models::ContentBlock;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Structured artifact a tool is known to produce.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Chart,
    Portfolio,
}

/// Declaration of a tool as advertised to the model.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolSignature {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object.
    pub parameters: Value,
    #[serde(skip)]
    pub artifact: Option<ArtifactKind>,
}

impl ToolSignature {
    /// Names listed under the schema's `required` key.
    pub fn required(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
    }
}

pub type ToolOutcome = std::result::Result<Vec<ContentBlock>, ToolFailure>;

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> Value;

    fn artifact(&self) -> Option<ArtifactKind> {
        None
    }

    async fn execute(&self, args: &Value) -> ToolOutcome;

    fn signature(&self) -> ToolSignature {
        ToolSignature {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
            artifact: self.artifact(),
        }
    }
}

/// Executes named tools on behalf of the agent loop.
#[async_trait::async_trait]
pub trait ToolInvoker: Send + Sync {
    fn signatures(&self) -> Vec<ToolSignature>;

    async fn invoke(&self, name: &str, args: &Value) -> ToolOutcome;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    transport_retries: u32,
    retry_backoff: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            transport_retries: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }

    pub fn with_transport_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.transport_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject argument shapes the tool could never accept.
pub fn check_arguments(signature: &ToolSignature, args: &Value) -> Result<(), ToolFailure> {
    let Some(object) = args.as_object() else {
        return Err(ToolFailure::validation(
            &signature.name,
            format!("arguments must be a JSON object, got {}", json_type(args)),
        ));
    };

    let missing: Vec<&str> = signature
        .required()
        .filter(|key| object.get(*key).map_or(true, Value::is_null))
        .collect();

    if !missing.is_empty() {
        return Err(ToolFailure::validation(
            &signature.name,
            format!("missing required parameter(s): {}", missing.join(", ")),
        ));
    }

    Ok(())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait::async_trait]
impl ToolInvoker for ToolRegistry {
    fn signatures(&self) -> Vec<ToolSignature> {
        let mut signatures: Vec<ToolSignature> =
            self.tools.values().map(|tool| tool.signature()).collect();
        signatures.sort_by(|a, b| a.name.cmp(&b.name));
        signatures
    }

    async fn invoke(&self, name: &str, args: &Value) -> ToolOutcome {
        let tool = self.get(name).ok_or_else(|| {
            ToolFailure::validation(name, "no tool with this name is available")
        })?;

        check_arguments(&tool.signature(), args)?;

        let mut attempt = 0;
        loop {
            match tool.execute(args).await {
                Err(failure)
                    if failure.kind() == FailureKind::Transport
                        && attempt < self.transport_retries =>
                {
                    attempt += 1;
                    warn!(
                        tool = name,
                        attempt,
                        error = %failure,
                        "Transport failure, retrying tool call"
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                outcome => {
                    debug!(tool = name, ok = outcome.is_ok(), "Tool call finished");
                    return outcome;
                }
            }
        }
    }
}

/// Schema helper for tools with a flat argument object.
pub(crate) fn object_schema(properties: &[(&str, Value)], required: &[&str]) -> Value {
    let properties: serde_json::Map<String, Value> = properties
        .iter()
        .map(|(name, schema)| (name.to_string(), schema.clone()))
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Registry with the in-process portfolio tools and the remote chart, market,
/// goals and document tools. Without a tools API URL the remote tools are
/// still advertised but fail as unavailable.
pub fn create_default_registry(tools_api_base_url: Option<&str>, transport_retries: u32) -> ToolRegistry {
    let mut registry =
        ToolRegistry::new().with_transport_retries(transport_retries, Duration::from_millis(250));

    for tool in portfolio::portfolio_tools() {
        registry.register(tool);
    }

    let client = tools_api_base_url.and_then(remote::ToolsApiClient::new);
    for tool in remote::remote_tools(client) {
        registry.register(tool);
    }

    registry
}
