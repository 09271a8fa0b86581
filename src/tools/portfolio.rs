//! In-process portfolio tools
//!
//! Deterministic arithmetic over the six-class `PortfolioSnapshot`. Results
//! are returned as structured JSON blocks. Any operation that would leave a
//! negative amount is rejected as a validation failure.

use super::{object_schema, ArtifactKind, Tool, ToolOutcome};
use crate::error::ToolFailure;
use crate::models::{AssetClass, ContentBlock, PortfolioSnapshot};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

/// Annual volatility assumption per asset class.
const VOLATILITY: [(AssetClass, f64); 6] = [
    (AssetClass::Equities, 0.18),
    (AssetClass::FixedIncome, 0.06),
    (AssetClass::RealEstate, 0.12),
    (AssetClass::Cash, 0.01),
    (AssetClass::Commodities, 0.15),
    (AssetClass::Crypto, 0.70),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortfolioOp {
    New,
    Add,
    AddAssetClass,
    AddWithAllocation,
    Summary,
    RiskTolerance,
}

pub struct PortfolioTool {
    op: PortfolioOp,
}

impl PortfolioTool {
    pub fn new(op: PortfolioOp) -> Self {
        Self { op }
    }
}

pub fn portfolio_tools() -> Vec<Arc<dyn Tool>> {
    [
        PortfolioOp::New,
        PortfolioOp::Add,
        PortfolioOp::AddAssetClass,
        PortfolioOp::AddWithAllocation,
        PortfolioOp::Summary,
        PortfolioOp::RiskTolerance,
    ]
    .into_iter()
    .map(|op| Arc::new(PortfolioTool::new(op)) as Arc<dyn Tool>)
    .collect()
}

fn portfolio_schema() -> Value {
    let properties: Map<String, Value> = AssetClass::ALL
        .iter()
        .map(|class| (class.key().to_string(), json!({"type": "number"})))
        .collect();
    json!({
        "type": "object",
        "description": "Amounts per asset class: Equities, Fixed_Income, Real_Estate, Cash, Commodities, Crypto",
        "properties": properties,
    })
}

/// Parse an asset-class keyed object. Unknown keys and non-numeric values are
/// rejected. A JSON-encoded string is accepted as well.
fn parse_classes(tool: &str, field: &str, value: Option<&Value>) -> Result<PortfolioSnapshot, ToolFailure> {
    let value = value.ok_or_else(|| ToolFailure::validation(tool, format!("'{}' is required", field)))?;

    let decoded;
    let value = match value {
        Value::String(text) => {
            decoded = serde_json::from_str::<Value>(text).map_err(|_| {
                ToolFailure::validation(tool, format!("'{}' must be an object keyed by asset class", field))
            })?;
            &decoded
        }
        other => other,
    };

    let object = value.as_object().ok_or_else(|| {
        ToolFailure::validation(tool, format!("'{}' must be an object keyed by asset class", field))
    })?;

    let mut snapshot = PortfolioSnapshot::zero();
    for (key, amount) in object {
        let class = AssetClass::parse(key).ok_or_else(|| {
            ToolFailure::validation(tool, format!("{} is not an asset class in the portfolio", key))
        })?;
        let amount = amount.as_f64().ok_or_else(|| {
            ToolFailure::validation(tool, format!("'{}.{}' must be a number", field, key))
        })?;
        snapshot.set(class, amount);
    }
    Ok(snapshot)
}

fn parse_amount(tool: &str, args: &Value) -> Result<f64, ToolFailure> {
    args.get("amount")
        .and_then(Value::as_f64)
        .filter(|amount| amount.is_finite())
        .ok_or_else(|| ToolFailure::validation(tool, "'amount' must be a number"))
}

fn checked(tool: &str, portfolio: PortfolioSnapshot) -> ToolOutcome {
    portfolio
        .validate()
        .map_err(|reason| ToolFailure::validation(tool, format!("resulting portfolio is invalid: {}", reason)))?;
    info!(tool, total = portfolio.total(), "Portfolio updated");
    let value = serde_json::to_value(portfolio).map_err(|e| ToolFailure::unknown(tool, e.to_string()))?;
    Ok(vec![ContentBlock::json(value)])
}

fn summary(portfolio: &PortfolioSnapshot) -> Value {
    let total = portfolio.total();
    let percentages: Map<String, Value> = AssetClass::ALL
        .iter()
        .map(|class| {
            let pct = if total == 0.0 { 0.0 } else { portfolio.get(*class) / total * 100.0 };
            (class.key().to_string(), json!(pct))
        })
        .collect();

    json!({
        "total_value": total,
        "asset_values": portfolio,
        "asset_percentages": percentages,
        "asset_count": AssetClass::ALL.iter().filter(|class| portfolio.get(**class) > 0.0).count(),
    })
}

fn risk_tolerance(portfolio: &PortfolioSnapshot) -> Value {
    let total = portfolio.total();
    if total == 0.0 {
        return json!({
            "weighted_volatility": "0.00%",
            "risk_tolerance_tier": "Empty Portfolio",
        });
    }

    let volatility: f64 = VOLATILITY
        .iter()
        .map(|(class, sigma)| portfolio.get(*class) / total * sigma)
        .sum();

    let tier = match volatility {
        v if v < 0.04 => "Conservative (Preservation focused)",
        v if v < 0.09 => "Moderate-Conservative (Income focused)",
        v if v < 0.14 => "Moderate (Balanced Growth)",
        v if v < 0.20 => "Aggressive (Growth focused)",
        _ => "Very Aggressive (Speculative/High Growth)",
    };

    let driver = AssetClass::ALL
        .iter()
        .copied()
        .max_by(|a, b| portfolio.get(*a).total_cmp(&portfolio.get(*b)))
        .unwrap_or(AssetClass::Equities);

    json!({
        "weighted_volatility": format!("{:.2}%", volatility * 100.0),
        "risk_tolerance_tier": tier,
        "primary_risk_driver": driver.key(),
    })
}

#[async_trait::async_trait]
impl Tool for PortfolioTool {
    fn name(&self) -> &'static str {
        match self.op {
            PortfolioOp::New => "get_new_portfolio",
            PortfolioOp::Add => "add_to_portfolio",
            PortfolioOp::AddAssetClass => "add_to_portfolio_asset_class",
            PortfolioOp::AddWithAllocation => "add_to_portfolio_with_allocation",
            PortfolioOp::Summary => "get_portfolio_summary",
            PortfolioOp::RiskTolerance => "assess_risk_tolerance",
        }
    }

    fn description(&self) -> &'static str {
        match self.op {
            PortfolioOp::New => "Returns a new six-asset portfolio with every asset class at 0.",
            PortfolioOp::Add => "Adds the amounts in 'additions' (keyed by asset class, negative to subtract) to 'portfolio' and returns the updated portfolio.",
            PortfolioOp::AddAssetClass => "Adds 'amount' to a single asset class ('asset_class_key') of 'portfolio' and returns the updated portfolio.",
            PortfolioOp::AddWithAllocation => "Splits 'amount' across asset classes using 'asset_allocation' ratios between 0 and 1, adds it to 'portfolio' and returns the updated portfolio.",
            PortfolioOp::Summary => "Returns total value, per-class values and percentage allocation of 'portfolio'.",
            PortfolioOp::RiskTolerance => "Computes the weighted volatility of 'portfolio' and maps it to a risk tolerance tier.",
        }
    }

    fn parameters(&self) -> Value {
        match self.op {
            PortfolioOp::New => object_schema(&[], &[]),
            PortfolioOp::Add => object_schema(
                &[("portfolio", portfolio_schema()), ("additions", portfolio_schema())],
                &["portfolio", "additions"],
            ),
            PortfolioOp::AddAssetClass => object_schema(
                &[
                    ("asset_class_key", json!({"type": "string", "enum": AssetClass::ALL.iter().map(|c| c.key()).collect::<Vec<_>>()})),
                    ("amount", json!({"type": "number"})),
                    ("portfolio", portfolio_schema()),
                ],
                &["asset_class_key", "amount", "portfolio"],
            ),
            PortfolioOp::AddWithAllocation => object_schema(
                &[
                    ("amount", json!({"type": "number"})),
                    ("portfolio", portfolio_schema()),
                    ("asset_allocation", portfolio_schema()),
                ],
                &["amount", "portfolio", "asset_allocation"],
            ),
            PortfolioOp::Summary | PortfolioOp::RiskTolerance => {
                object_schema(&[("portfolio", portfolio_schema())], &["portfolio"])
            }
        }
    }

    fn artifact(&self) -> Option<ArtifactKind> {
        match self.op {
            PortfolioOp::Summary | PortfolioOp::RiskTolerance => None,
            _ => Some(ArtifactKind::Portfolio),
        }
    }

    async fn execute(&self, args: &Value) -> ToolOutcome {
        let tool = self.name();

        match self.op {
            PortfolioOp::New => checked(tool, PortfolioSnapshot::zero()),
            PortfolioOp::Add => {
                let mut portfolio = parse_classes(tool, "portfolio", args.get("portfolio"))?;
                let additions = parse_classes(tool, "additions", args.get("additions"))?;
                for class in AssetClass::ALL {
                    portfolio.set(class, portfolio.get(class) + additions.get(class));
                }
                checked(tool, portfolio)
            }
            PortfolioOp::AddAssetClass => {
                let key = args
                    .get("asset_class_key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolFailure::validation(tool, "'asset_class_key' must be a string"))?;
                let class = AssetClass::parse(key).ok_or_else(|| {
                    ToolFailure::validation(tool, format!("{} is not an asset class in the portfolio", key))
                })?;
                let amount = parse_amount(tool, args)?;
                let mut portfolio = parse_classes(tool, "portfolio", args.get("portfolio"))?;
                portfolio.set(class, portfolio.get(class) + amount);
                checked(tool, portfolio)
            }
            PortfolioOp::AddWithAllocation => {
                let amount = parse_amount(tool, args)?;
                let mut portfolio = parse_classes(tool, "portfolio", args.get("portfolio"))?;
                let allocation = parse_classes(tool, "asset_allocation", args.get("asset_allocation"))?;

                if AssetClass::ALL
                    .iter()
                    .any(|class| !(0.0..=1.0).contains(&allocation.get(*class)))
                {
                    return Err(ToolFailure::validation(tool, "allocation ratios must be between 0 and 1"));
                }
                if allocation.total() > 1.0 + 1e-6 {
                    return Err(ToolFailure::validation(
                        tool,
                        format!("allocation ratios sum to {:.4}, more than 1", allocation.total()),
                    ));
                }

                for class in AssetClass::ALL {
                    portfolio.set(class, portfolio.get(class) + amount * allocation.get(class));
                }
                checked(tool, portfolio)
            }
            PortfolioOp::Summary => {
                let portfolio = parse_classes(tool, "portfolio", args.get("portfolio"))?;
                Ok(vec![ContentBlock::json(summary(&portfolio))])
            }
            PortfolioOp::RiskTolerance => {
                let portfolio = parse_classes(tool, "portfolio", args.get("portfolio"))?;
                Ok(vec![ContentBlock::json(risk_tolerance(&portfolio))])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    fn snapshot_of(blocks: &[ContentBlock]) -> PortfolioSnapshot {
        match &blocks[0] {
            ContentBlock::Json { value } => serde_json::from_value(value.clone()).unwrap(),
            other => panic!("unexpected block {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_add_to_asset_class_accepts_spaced_names() {
        let tool = PortfolioTool::new(PortfolioOp::AddAssetClass);
        let blocks = tool
            .execute(&json!({
                "asset_class_key": "Fixed Income",
                "amount": 25000.0,
                "portfolio": {"Equities": 1000.0}
            }))
            .await
            .unwrap();

        let portfolio = snapshot_of(&blocks);
        assert_eq!(portfolio.fixed_income, 25_000.0);
        assert_eq!(portfolio.equities, 1_000.0);
    }

    #[tokio::test]
    async fn test_unknown_asset_class_is_validation_failure() {
        let tool = PortfolioTool::new(PortfolioOp::AddAssetClass);
        let err = tool
            .execute(&json!({"asset_class_key": "Bonds", "amount": 1.0, "portfolio": {}}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);
        assert!(err.to_string().contains("Bonds"));
    }

    #[tokio::test]
    async fn test_negative_result_is_rejected() {
        let tool = PortfolioTool::new(PortfolioOp::Add);
        let err = tool
            .execute(&json!({
                "portfolio": {"Cash": 100.0},
                "additions": {"Cash": -250.0}
            }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);
    }

    #[tokio::test]
    async fn test_allocation_split() {
        let tool = PortfolioTool::new(PortfolioOp::AddWithAllocation);
        let blocks = tool
            .execute(&json!({
                "amount": 400000.0,
                "portfolio": "{\"Equities\": 0.0}",
                "asset_allocation": {"Equities": 0.7, "Fixed_Income": 0.2, "Real_Estate": 0.1}
            }))
            .await
            .unwrap();

        let portfolio = snapshot_of(&blocks);
        assert!((portfolio.equities - 280_000.0).abs() < 1e-6);
        assert!((portfolio.fixed_income - 80_000.0).abs() < 1e-6);
        assert!((portfolio.real_estate - 40_000.0).abs() < 1e-6);

        let err = tool
            .execute(&json!({
                "amount": 10.0,
                "portfolio": {},
                "asset_allocation": {"Equities": 0.9, "Cash": 0.9}
            }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);
    }

    #[tokio::test]
    async fn test_risk_tolerance_tiers() {
        let tool = PortfolioTool::new(PortfolioOp::RiskTolerance);
        let blocks = tool
            .execute(&json!({"portfolio": {"Cash": 100.0}}))
            .await
            .unwrap();
        let ContentBlock::Json { value } = &blocks[0] else { panic!() };
        assert_eq!(value["risk_tolerance_tier"], "Conservative (Preservation focused)");
        assert_eq!(value["primary_risk_driver"], "Cash");

        let blocks = tool.execute(&json!({"portfolio": {}})).await.unwrap();
        let ContentBlock::Json { value } = &blocks[0] else { panic!() };
        assert_eq!(value["risk_tolerance_tier"], "Empty Portfolio");
    }

    #[tokio::test]
    async fn test_summary_is_not_a_portfolio_artifact() {
        let tool = PortfolioTool::new(PortfolioOp::Summary);
        assert_eq!(tool.artifact(), None);
        let blocks = tool
            .execute(&json!({"portfolio": {"Equities": 75.0, "Cash": 25.0}}))
            .await
            .unwrap();
        let ContentBlock::Json { value } = &blocks[0] else { panic!() };
        assert_eq!(value["total_value"], 100.0);
        assert_eq!(value["asset_percentages"]["Equities"], 75.0);
        assert_eq!(value["asset_count"], 2);
    }
}
