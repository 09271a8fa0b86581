//! Gemini API model client
//!
//! Maps the conversation onto `generateContent`: user and tool messages are
//! sent as `user` turns, assistant messages as `model` turns, tool signatures
//! as function declarations. Uses a long-lived reqwest::Client for connection
//! pooling.

use crate::config::GeminiSettings;
use crate::error::OrchestrationError;
use crate::llm::{ModelClient, ModelOutput, ModelRequest};
use crate::models::{ContentBlock, Message, ToolCallRequest, ToolResult};
use crate::tools::ToolSignature;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(settings: &GeminiSettings) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            endpoint: format!("{}/{}:generateContent", API_BASE, settings.model),
        })
    }
}

#[async_trait::async_trait]
impl ModelClient for GeminiClient {
    async fn complete(&self, request: ModelRequest<'_>) -> crate::Result<ModelOutput> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::ConfigError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let body = build_request(&request);
        debug!(
            contents = body.contents.len(),
            tools = request.tools.len(),
            "Calling Gemini API"
        );

        let url = format!("{}?key={}", self.endpoint, self.api_key);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                if e.is_timeout() || e.is_connect() {
                    OrchestrationError::Transport(format!("Gemini API unreachable: {}", e))
                } else {
                    OrchestrationError::HttpError(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                OrchestrationError::Transport(format!("Gemini API {}: {}", status, error_text))
            } else {
                OrchestrationError::LlmError(format!("Gemini API {}: {}", status, error_text))
            });
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        parse_response(gemini_response)
    }
}

fn build_request(request: &ModelRequest<'_>) -> GeminiRequest {
    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![ToolDeclarations {
            function_declarations: request.tools.iter().map(FunctionDeclaration::from).collect(),
        }]
    };

    GeminiRequest {
        contents: to_contents(request.history),
        system_instruction: Some(Content {
            role: None,
            parts: vec![Part::text(request.policy)],
        }),
        tools,
        generation_config: GenerationConfig {
            temperature: 0.2,
            top_p: 0.9,
            max_output_tokens: 2048,
        },
    }
}

/// Consecutive tool results answer one parallel call and go back as a single
/// `user` turn with one `functionResponse` part per result.
fn to_contents(history: &[Message]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::with_capacity(history.len());
    let mut previous_was_tool = false;

    for message in history {
        let is_tool = matches!(message, Message::Tool(_));
        let content = to_content(message);
        if is_tool && previous_was_tool {
            if let Some(last) = contents.last_mut() {
                last.parts.extend(content.parts);
                continue;
            }
        }
        contents.push(content);
        previous_was_tool = is_tool;
    }

    contents
}

fn to_content(message: &Message) -> Content {
    match message {
        Message::User { content } => Content {
            role: Some("user".to_string()),
            parts: vec![Part::text(content)],
        },
        Message::Assistant { content, tool_calls } => {
            let mut parts: Vec<Part> = content.iter().map(|text| Part::text(text)).collect();
            parts.extend(tool_calls.iter().map(|call| Part {
                function_call: Some(FunctionCall {
                    name: call.name.clone(),
                    args: call.arguments.clone(),
                }),
                ..Part::default()
            }));
            Content {
                role: Some("model".to_string()),
                parts,
            }
        }
        Message::Tool(result) => Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                function_response: Some(FunctionResponse {
                    name: result.tool_name.clone(),
                    response: tool_response_payload(result),
                }),
                ..Part::default()
            }],
        },
    }
}

/// Gemini expects an object as the function response.
fn tool_response_payload(result: &ToolResult) -> Value {
    let content: Value = match result.content.as_slice() {
        [ContentBlock::Json { value }] => value.clone(),
        blocks => Value::String(
            blocks
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => text.clone(),
                    ContentBlock::Json { value } => value.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
    };

    if result.is_error {
        json!({ "error": content })
    } else {
        json!({ "content": content })
    }
}

fn parse_response(response: GeminiResponse) -> crate::Result<ModelOutput> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| OrchestrationError::LlmError("No response from Gemini API".to_string()))?;

    if let Some(usage) = &response.usage_metadata {
        debug!(
            prompt_tokens = usage.prompt_token_count,
            output_tokens = usage.candidates_token_count,
            finish_reason = ?candidate.finish_reason,
            "Gemini usage"
        );
    }

    let parts = candidate.content.map(|content| content.parts).unwrap_or_default();

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in parts {
        if let Some(fragment) = part.text {
            text.push_str(&fragment);
        }
        if let Some(call) = part.function_call {
            tool_calls.push(ToolCallRequest::new(
                format!("call_{}", Uuid::new_v4().simple()),
                call.name,
                call.args,
            ));
        }
    }

    if tool_calls.is_empty() {
        if text.trim().is_empty() {
            return Err(OrchestrationError::LlmError(format!(
                "Empty response from Gemini (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        return Ok(ModelOutput::Final(text));
    }

    Ok(ModelOutput::Messages(vec![Message::Assistant {
        content: (!text.trim().is_empty()).then_some(text),
        tool_calls,
    }]))
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&ToolSignature> for FunctionDeclaration {
    fn from(signature: &ToolSignature) -> Self {
        Self {
            name: signature.name.clone(),
            description: signature.description.clone(),
            parameters: signature.parameters.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i32,
    #[serde(default)]
    candidates_token_count: i32,
}
