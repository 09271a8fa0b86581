//! HTTP-backed tools
//!
//! Chart rendering, market data, goal simulation and document retrieval run
//! in a separate tools service. Each call is a JSON POST to
//! `{base_url}/tools/{name}`; the HTTP status decides the failure category.

use super::{object_schema, ArtifactKind, Tool, ToolOutcome};
use crate::error::ToolFailure;
use crate::models::ContentBlock;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct ToolsApiClient {
    client: Client,
    base_url: String,
}

impl ToolsApiClient {
    pub fn new(base_url: &str) -> Option<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .ok()?;

        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn call(&self, tool: &str, args: &Value) -> ToolOutcome {
        let url = format!("{}/tools/{}", self.base_url, tool);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(args)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    ToolFailure::transport(tool, format!("request failed: {}", e))
                } else {
                    ToolFailure::unknown(tool, format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ToolFailure::transport(tool, format!("failed to read response: {}", e)))?;

        debug!(tool, %status, bytes = text.len(), "Tools API responded");
        classify_response(tool, status, &text)
    }
}

/// Map an HTTP response of the tools service to blocks or a typed failure.
fn classify_response(tool: &str, status: StatusCode, text: &str) -> ToolOutcome {
    if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
        return Err(ToolFailure::validation(tool, error_detail(text)));
    }
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        return Err(ToolFailure::transport(tool, format!("{}: {}", status, error_detail(text))));
    }
    if !status.is_success() {
        return Err(ToolFailure::unknown(tool, format!("{}: {}", status, error_detail(text))));
    }

    let body = match serde_json::from_str::<Value>(text) {
        Ok(body) => body,
        Err(_) => return Ok(vec![ContentBlock::text(text)]),
    };

    if let Some(blocks) = body.get("content").and_then(Value::as_array) {
        if let Ok(blocks) = serde_json::from_value::<Vec<ContentBlock>>(Value::Array(blocks.clone())) {
            return Ok(blocks);
        }
    }

    Ok(vec![ContentBlock::json(body)])
}

fn error_detail(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|body| {
            body.get("detail")
                .or_else(|| body.get("error"))
                .map(|detail| match detail {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
        })
        .unwrap_or_else(|| text.chars().take(500).collect())
}

/// Argument types understood by the catalog.
#[derive(Clone, Copy)]
enum Param {
    Str,
    Num,
    Int,
    Bool,
    Strings,
    Numbers,
    Object,
}

impl Param {
    fn schema(self) -> Value {
        match self {
            Param::Str => json!({"type": "string"}),
            Param::Num => json!({"type": "number"}),
            Param::Int => json!({"type": "integer"}),
            Param::Bool => json!({"type": "boolean"}),
            Param::Strings => json!({"type": "array", "items": {"type": "string"}}),
            Param::Numbers => json!({"type": "array", "items": {"type": "number"}}),
            Param::Object => json!({"type": "object"}),
        }
    }
}

struct CatalogEntry {
    name: &'static str,
    description: &'static str,
    /// (name, type, required)
    params: &'static [(&'static str, Param, bool)],
    artifact: Option<ArtifactKind>,
}

const CHART: Option<ArtifactKind> = Some(ArtifactKind::Chart);

static CATALOG: &[CatalogEntry] = &[
    // Charts
    CatalogEntry {
        name: "create_pie_chart",
        description: "Render a pie chart. Returns JSON with title and filename.",
        params: &[("labels", Param::Strings, true), ("values", Param::Numbers, true), ("title", Param::Str, false)],
        artifact: CHART,
    },
    CatalogEntry {
        name: "create_bar_chart",
        description: "Render a bar chart. Returns JSON with title and filename.",
        params: &[
            ("categories", Param::Strings, true),
            ("values", Param::Numbers, true),
            ("title", Param::Str, false),
            ("xlabel", Param::Str, false),
            ("ylabel", Param::Str, false),
        ],
        artifact: CHART,
    },
    CatalogEntry {
        name: "create_line_chart",
        description: "Render a line chart. Returns JSON with title and filename.",
        params: &[
            ("x_values", Param::Strings, true),
            ("y_values", Param::Numbers, true),
            ("title", Param::Str, false),
            ("xlabel", Param::Str, false),
            ("ylabel", Param::Str, false),
        ],
        artifact: CHART,
    },
    CatalogEntry {
        name: "create_multi_line_chart",
        description: "Render several series on one chart. 'y_series' maps each series name to its values and holds nothing else; title, xlabel and ylabel are separate arguments.",
        params: &[
            ("x_values", Param::Strings, true),
            ("y_series", Param::Object, true),
            ("title", Param::Str, false),
            ("xlabel", Param::Str, false),
            ("ylabel", Param::Str, false),
        ],
        artifact: CHART,
    },
    CatalogEntry {
        name: "create_goal_projection_chart",
        description: "Render a projection of portfolio growth toward a goal value.",
        params: &[
            ("current_value", Param::Num, true),
            ("goal_value", Param::Num, true),
            ("years", Param::Int, true),
            ("monthly_contribution", Param::Num, true),
            ("annual_return_rate", Param::Num, false),
            ("title", Param::Str, false),
        ],
        artifact: CHART,
    },
    // Goals
    CatalogEntry {
        name: "simple_monte_carlo_simulation",
        description: "Simulate the six-asset portfolio with correlated returns and report the probability of reaching target_goal after the given years.",
        params: &[
            ("portfolio", Param::Object, true),
            ("target_goal", Param::Num, false),
            ("years", Param::Int, false),
            ("sims", Param::Int, false),
        ],
        artifact: None,
    },
    // Market data
    CatalogEntry {
        name: "get_ticker_quote",
        description: "Current quote for a ticker symbol.",
        params: &[("symbol", Param::Str, true), ("use_cache", Param::Bool, false)],
        artifact: None,
    },
    CatalogEntry {
        name: "get_ticker_history",
        description: "Price history for a ticker symbol over a period ('1d', '5d', '1mo', '3mo', '6mo', '1y', '5y', 'max').",
        params: &[("symbol", Param::Str, true), ("period", Param::Str, false), ("use_cache", Param::Bool, false)],
        artifact: None,
    },
    CatalogEntry {
        name: "get_ticker",
        description: "Look up the ticker symbol for a company name.",
        params: &[("company_name", Param::Str, true)],
        artifact: None,
    },
    CatalogEntry {
        name: "get_asset_classes",
        description: "Asset class breakdown of a fund symbol.",
        params: &[("symbol", Param::Str, true), ("use_cache", Param::Bool, false)],
        artifact: None,
    },
    CatalogEntry {
        name: "get_market_summary",
        description: "Summary of the major market indices.",
        params: &[("use_cache", Param::Bool, false)],
        artifact: None,
    },
    // Knowledge base
    CatalogEntry {
        name: "list_categories",
        description: "Categories of the basic financial knowledge base, for use with basic_query.",
        params: &[],
        artifact: None,
    },
    CatalogEntry {
        name: "list_advanced_categories",
        description: "Categories of the advanced financial knowledge base, for use with advanced_query.",
        params: &[],
        artifact: None,
    },
    CatalogEntry {
        name: "basic_query",
        description: "Search financial articles about investing, taxes and retirement. Use category 'Glossary' for definitions.",
        params: &[("query", Param::Str, true), ("categories", Param::Strings, false)],
        artifact: None,
    },
    CatalogEntry {
        name: "advanced_query",
        description: "Search full-length planning articles. Use after basic_query when more detail is needed.",
        params: &[("query", Param::Str, true), ("categories", Param::Strings, false)],
        artifact: None,
    },
];

pub struct RemoteTool {
    entry: &'static CatalogEntry,
    client: Option<ToolsApiClient>,
}

#[async_trait::async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &'static str {
        self.entry.name
    }

    fn description(&self) -> &'static str {
        self.entry.description
    }

    fn parameters(&self) -> Value {
        let properties: Vec<(&str, Value)> = self
            .entry
            .params
            .iter()
            .map(|(name, kind, _)| (*name, kind.schema()))
            .collect();
        let required: Vec<&str> = self
            .entry
            .params
            .iter()
            .filter(|(_, _, required)| *required)
            .map(|(name, _, _)| *name)
            .collect();
        object_schema(&properties, &required)
    }

    fn artifact(&self) -> Option<ArtifactKind> {
        self.entry.artifact
    }

    async fn execute(&self, args: &Value) -> ToolOutcome {
        let client = self.client.as_ref().ok_or_else(|| {
            ToolFailure::transport(self.entry.name, "TOOLS_API_BASE_URL is not configured")
        })?;
        client.call(self.entry.name, args).await
    }
}

pub fn remote_tools(client: Option<ToolsApiClient>) -> Vec<Arc<dyn Tool>> {
    CATALOG
        .iter()
        .map(|entry| {
            Arc::new(RemoteTool {
                entry,
                client: client.clone(),
            }) as Arc<dyn Tool>
        })
        .collect()
}
