//! Artifact extraction from tool results
//!
//! Charts and portfolio updates are pulled out of heterogeneous tool output.
//! The registered capability table decides what a tool produces; unregistered
//! names fall back to substring matching on "chart" / "portfolio". A malformed
//! block is logged and counted, never raised.

use crate::models::{ChartArtifact, ContentBlock, PortfolioSnapshot, ToolResult};
use crate::tools::{ArtifactKind, ToolSignature};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Artifacts found in one tool result.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Extracted {
    pub charts: Vec<ChartArtifact>,
    pub portfolio: Option<PortfolioSnapshot>,
    pub parse_failures: usize,
}

#[derive(Deserialize)]
struct ChartPayload {
    title: String,
    filename: String,
}

#[derive(Debug, Default, Clone)]
pub struct ArtifactExtractor {
    capabilities: HashMap<String, Option<ArtifactKind>>,
}

impl ArtifactExtractor {
    pub fn new(signatures: &[ToolSignature]) -> Self {
        Self {
            capabilities: signatures
                .iter()
                .map(|signature| (signature.name.clone(), signature.artifact))
                .collect(),
        }
    }

    pub fn kind_for(&self, tool_name: &str) -> Option<ArtifactKind> {
        if let Some(kind) = self.capabilities.get(tool_name) {
            return *kind;
        }

        let lowered = tool_name.to_lowercase();
        if lowered.contains("chart") {
            Some(ArtifactKind::Chart)
        } else if lowered.contains("portfolio") {
            Some(ArtifactKind::Portfolio)
        } else {
            None
        }
    }

    pub fn extract(&self, result: &ToolResult) -> Extracted {
        let mut extracted = Extracted::default();
        if result.is_error {
            return extracted;
        }

        match self.kind_for(&result.tool_name) {
            Some(ArtifactKind::Chart) => {
                for block in &result.content {
                    match chart_from_block(block) {
                        Ok(chart) => extracted.charts.push(chart),
                        Err(reason) => {
                            warn!(
                                tool = %result.tool_name,
                                call_id = %result.tool_call_id,
                                "Skipping malformed chart block: {}",
                                reason
                            );
                            extracted.parse_failures += 1;
                        }
                    }
                }
            }
            Some(ArtifactKind::Portfolio) => {
                for block in &result.content {
                    match portfolio_from_block(block) {
                        Ok(Some(portfolio)) => extracted.portfolio = Some(portfolio),
                        Ok(None) => {}
                        Err(reason) => {
                            warn!(
                                tool = %result.tool_name,
                                call_id = %result.tool_call_id,
                                "Skipping malformed portfolio block: {}",
                                reason
                            );
                            extracted.parse_failures += 1;
                        }
                    }
                }
            }
            None => {}
        }

        extracted
    }
}

fn block_value(block: &ContentBlock) -> Result<Value, String> {
    match block {
        ContentBlock::Json { value } => Ok(value.clone()),
        ContentBlock::Text { text } => {
            serde_json::from_str(text).map_err(|e| format!("not valid JSON: {}", e))
        }
    }
}

fn chart_from_block(block: &ContentBlock) -> Result<ChartArtifact, String> {
    let payload: ChartPayload = serde_json::from_value(block_value(block)?)
        .map_err(|e| format!("missing chart fields: {}", e))?;
    Ok(ChartArtifact {
        title: payload.title,
        filename: payload.filename,
    })
}

/// `Ok(None)` when the block is valid JSON but not a portfolio at all.
fn portfolio_from_block(block: &ContentBlock) -> Result<Option<PortfolioSnapshot>, String> {
    let value = block_value(block)?;

    let candidate = match &value {
        Value::Object(_) if PortfolioSnapshot::looks_like(&value) => Some(&value),
        Value::Array(items) => items.iter().find(|item| PortfolioSnapshot::looks_like(item)),
        _ => None,
    };

    let Some(candidate) = candidate else {
        return Ok(None);
    };

    let portfolio: PortfolioSnapshot = serde_json::from_value(candidate.clone())
        .map_err(|e| format!("invalid portfolio amounts: {}", e))?;
    portfolio.validate()?;
    Ok(Some(portfolio))
}
