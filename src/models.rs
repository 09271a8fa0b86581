//! Core data models for the financial agent router

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

//
// ================= Agents =================
//

/// Closed set of specialized agents a turn can be routed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AgentKind {
    #[serde(rename = "FinanceQandAAgent")]
    FinanceQandA,
    #[serde(rename = "FinanceMarketAgent")]
    FinanceMarket,
    #[serde(rename = "PortfolioAgent")]
    Portfolio,
    #[serde(rename = "GoalsAgent")]
    Goals,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::FinanceQandA,
        AgentKind::FinanceMarket,
        AgentKind::Portfolio,
        AgentKind::Goals,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            AgentKind::FinanceQandA => "FinanceQandAAgent",
            AgentKind::FinanceMarket => "FinanceMarketAgent",
            AgentKind::Portfolio => "PortfolioAgent",
            AgentKind::Goals => "GoalsAgent",
        }
    }

    /// Case-insensitive lookup by identifier.
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.id().eq_ignore_ascii_case(id.trim()))
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            AgentKind::FinanceQandA => 0,
            AgentKind::FinanceMarket => 1,
            AgentKind::Portfolio => 2,
            AgentKind::Goals => 3,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_id(s).ok_or_else(|| format!("unknown agent '{}'", s))
    }
}

//
// ================= Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One entry of the append-only conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool(ToolResult),
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Message::Assistant {
            content: None,
            tool_calls: calls,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::User { .. } => Role::User,
            Message::Assistant { .. } => Role::Assistant,
            Message::Tool(_) => Role::Tool,
        }
    }

    /// Text payload, if the message carries any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Message::User { content } => Some(content),
            Message::Assistant { content, .. } => content.as_deref(),
            Message::Tool(_) => None,
        }
    }

    /// True for an assistant message that requests no tools.
    pub fn is_final_answer(&self) -> bool {
        matches!(self, Message::Assistant { tool_calls, .. } if tool_calls.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    /// Plain text, possibly a JSON-encoded payload.
    Text { text: String },
    /// Structured payload from in-process tools.
    Json { value: Value },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn json(value: Value) -> Self {
        ContentBlock::Json { value }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
}

//
// ================= Artifacts =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChartArtifact {
    pub title: String,
    pub filename: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AssetClass {
    Equities,
    #[serde(rename = "Fixed_Income")]
    FixedIncome,
    #[serde(rename = "Real_Estate")]
    RealEstate,
    Cash,
    Commodities,
    Crypto,
}

impl AssetClass {
    pub const ALL: [AssetClass; 6] = [
        AssetClass::Equities,
        AssetClass::FixedIncome,
        AssetClass::RealEstate,
        AssetClass::Cash,
        AssetClass::Commodities,
        AssetClass::Crypto,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            AssetClass::Equities => "Equities",
            AssetClass::FixedIncome => "Fixed_Income",
            AssetClass::RealEstate => "Real_Estate",
            AssetClass::Cash => "Cash",
            AssetClass::Commodities => "Commodities",
            AssetClass::Crypto => "Crypto",
        }
    }

    /// Accepts `Fixed_Income`, `fixed income`, `FIXED-INCOME` and so on.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized: String = name
            .trim()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        Self::ALL
            .iter()
            .copied()
            .find(|class| class.key().eq_ignore_ascii_case(&normalized))
    }
}

/// Fixed six-class allocation. Serialized keys and their order are part of
/// the wire contract shared with the portfolio tools and the frontend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSnapshot {
    #[serde(rename = "Equities", default)]
    pub equities: f64,
    #[serde(rename = "Fixed_Income", alias = "Fixed Income", default)]
    pub fixed_income: f64,
    #[serde(rename = "Real_Estate", alias = "Real Estate", default)]
    pub real_estate: f64,
    #[serde(rename = "Cash", default)]
    pub cash: f64,
    #[serde(rename = "Commodities", default)]
    pub commodities: f64,
    #[serde(rename = "Crypto", default)]
    pub crypto: f64,
}

impl PortfolioSnapshot {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn get(&self, class: AssetClass) -> f64 {
        match class {
            AssetClass::Equities => self.equities,
            AssetClass::FixedIncome => self.fixed_income,
            AssetClass::RealEstate => self.real_estate,
            AssetClass::Cash => self.cash,
            AssetClass::Commodities => self.commodities,
            AssetClass::Crypto => self.crypto,
        }
    }

    pub fn set(&mut self, class: AssetClass, amount: f64) {
        let slot = match class {
            AssetClass::Equities => &mut self.equities,
            AssetClass::FixedIncome => &mut self.fixed_income,
            AssetClass::RealEstate => &mut self.real_estate,
            AssetClass::Cash => &mut self.cash,
            AssetClass::Commodities => &mut self.commodities,
            AssetClass::Crypto => &mut self.crypto,
        };
        *slot = amount;
    }

    pub fn total(&self) -> f64 {
        AssetClass::ALL.iter().map(|class| self.get(*class)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0.0
    }

    /// Rejects negative or non-finite amounts.
    pub fn validate(&self) -> Result<(), String> {
        for class in AssetClass::ALL {
            let amount = self.get(class);
            if !amount.is_finite() {
                return Err(format!("{} is not a finite amount", class.key()));
            }
            if amount < 0.0 {
                return Err(format!("{} cannot be negative ({})", class.key(), amount));
            }
        }
        Ok(())
    }

    /// True when the JSON object carries at least one asset-class key.
    pub fn looks_like(value: &Value) -> bool {
        value.as_object().map_or(false, |object| {
            object.keys().any(|key| AssetClass::parse(key).is_some())
        })
    }
}

//
// ================= Responses =================
//

/// How the agent loop terminated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed,
    Exhausted,
    RetriesExhausted,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResponse {
    pub agent: AgentKind,
    pub message: String,
    #[serde(default)]
    pub charts: Vec<ChartArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio: Option<PortfolioSnapshot>,
    pub outcome: TurnOutcome,
}

impl AgentResponse {
    pub fn is_success(&self) -> bool {
        self.outcome == TurnOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_portfolio_serializes_in_canonical_order() {
        let portfolio = PortfolioSnapshot {
            equities: 60_000.0,
            fixed_income: 30_000.0,
            cash: 10_000.0,
            ..PortfolioSnapshot::zero()
        };

        let text = serde_json::to_string(&portfolio).unwrap();
        assert_eq!(
            text,
            r#"{"Equities":60000.0,"Fixed_Income":30000.0,"Real_Estate":0.0,"Cash":10000.0,"Commodities":0.0,"Crypto":0.0}"#
        );
        assert_eq!(portfolio.total(), 100_000.0);
    }

    #[test]
    fn test_portfolio_missing_keys_default_to_zero() {
        let portfolio: PortfolioSnapshot =
            serde_json::from_value(json!({"Equities": 5.0, "Real Estate": 2.5})).unwrap();
        assert_eq!(portfolio.equities, 5.0);
        assert_eq!(portfolio.real_estate, 2.5);
        assert_eq!(portfolio.crypto, 0.0);
        assert!(!portfolio.is_empty());
        assert!(PortfolioSnapshot::zero().is_empty());
    }

    #[test]
    fn test_portfolio_validation() {
        let mut portfolio = PortfolioSnapshot::zero();
        portfolio.set(AssetClass::Cash, -1.0);
        assert!(portfolio.validate().is_err());

        portfolio.set(AssetClass::Cash, f64::NAN);
        assert!(portfolio.validate().is_err());

        portfolio.set(AssetClass::Cash, 10.0);
        assert!(portfolio.validate().is_ok());
    }

    #[test]
    fn test_asset_class_parse() {
        assert_eq!(AssetClass::parse("Fixed Income"), Some(AssetClass::FixedIncome));
        assert_eq!(AssetClass::parse("real_estate"), Some(AssetClass::RealEstate));
        assert_eq!(AssetClass::parse("CRYPTO"), Some(AssetClass::Crypto));
        assert_eq!(AssetClass::parse("Bonds"), None);
    }

    #[test]
    fn test_message_role_tag() {
        let message = Message::Tool(ToolResult {
            tool_call_id: "call_1".into(),
            tool_name: "create_pie_chart".into(),
            content: vec![ContentBlock::text("{}")],
            is_error: false,
        });

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_name"], "create_pie_chart");
        assert_eq!(message.role(), Role::Tool);

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_final_answer_detection() {
        assert!(Message::assistant("done").is_final_answer());
        let call = ToolCallRequest::new("c1", "get_ticker_quote", json!({"ticker": "AAPL"}));
        assert!(!Message::tool_calls(vec![call]).is_final_answer());
        assert!(!Message::user("hi").is_final_answer());
    }

    #[test]
    fn test_agent_kind_ids() {
        assert_eq!(AgentKind::from_id("portfolioagent"), Some(AgentKind::Portfolio));
        assert_eq!("GoalsAgent".parse::<AgentKind>(), Ok(AgentKind::Goals));
        assert_eq!(
            serde_json::to_value(AgentKind::FinanceQandA).unwrap(),
            json!("FinanceQandAAgent")
        );
        assert!(AgentKind::from_id("TaxAgent").is_none());
    }
}
