//! Per-agent operator policy and tool set
//!
//! The execution loop is shared; a profile is what makes it a market analyst
//! or a portfolio builder. Policies can be overridden from
//! `<AGENT_POLICY_DIR>/<AgentId>.md`.

use crate::models::{AgentKind, PortfolioSnapshot};
use crate::Result;
use std::path::Path;
use tracing::info;

const DISCLAIMER: &str =
    "End every direct answer with: \"Answers are for educational purposes only and may contain mistakes.\"";

const QANDA_POLICY: &str = r#"# ROLE
You are a financial educator. Answer general questions about personal finance, investing, taxes and retirement.

# RULES
- Look up the knowledge base before answering: call list_categories, then basic_query with the most relevant categories.
- Use advanced_query only when basic_query does not give enough detail.
- Do not quote live prices or give advice about specific securities.
- Keep answers short and structured."#;

const MARKET_POLICY: &str = r#"# ROLE
You are a market data analyst. Answer questions about specific companies, tickers and funds.

# RULES
- Resolve company names with get_ticker before requesting quotes or history.
- Use get_asset_classes for fund composition questions.
- When the user asks to compare price history, fetch each history first, then call create_multi_line_chart once.
- y_series holds only the ticker series; title, xlabel and ylabel are separate arguments.
- Report numbers exactly as returned by the tools."#;

const PORTFOLIO_POLICY: &str = r#"# ROLE
You build, modify and analyze the user's six-asset portfolio: Equities, Fixed_Income, Real_Estate, Cash, Commodities, Crypto.

# RULES
- The current portfolio is given in the session context below. Always pass it as the 'portfolio' argument.
- Use add_to_portfolio_asset_class for a single class, add_to_portfolio for several, add_to_portfolio_with_allocation for percentage splits.
- Call get_new_portfolio only when the user asks to start over.
- For analysis, call assess_risk_tolerance and then create_pie_chart with the same portfolio.
- If the amount or asset class is unclear, ask the user instead of guessing.
- Call each tool once per request unless a call failed."#;

const GOALS_POLICY: &str = r#"# ROLE
You project portfolio outcomes and evaluate progress toward financial goals.

# RULES
- Run simple_monte_carlo_simulation with the current portfolio from the session context before describing any projection.
- Visualize a goal with create_goal_projection_chart only after the simulation returned.
- If the portfolio is empty, ask the user to build one first.
- State probabilities as ranges, never as guarantees."#;

#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub kind: AgentKind,
    pub policy: String,
    pub tools: Vec<&'static str>,
}

impl AgentProfile {
    pub fn builtin(kind: AgentKind) -> Self {
        let (policy, tools): (&str, &[&'static str]) = match kind {
            AgentKind::FinanceQandA => (
                QANDA_POLICY,
                &["list_categories", "list_advanced_categories", "basic_query", "advanced_query"],
            ),
            AgentKind::FinanceMarket => (
                MARKET_POLICY,
                &[
                    "get_ticker",
                    "get_ticker_quote",
                    "get_ticker_history",
                    "get_asset_classes",
                    "get_market_summary",
                    "create_line_chart",
                    "create_multi_line_chart",
                ],
            ),
            AgentKind::Portfolio => (
                PORTFOLIO_POLICY,
                &[
                    "get_new_portfolio",
                    "add_to_portfolio",
                    "add_to_portfolio_asset_class",
                    "add_to_portfolio_with_allocation",
                    "get_portfolio_summary",
                    "assess_risk_tolerance",
                    "create_pie_chart",
                    "create_bar_chart",
                ],
            ),
            AgentKind::Goals => (
                GOALS_POLICY,
                &[
                    "simple_monte_carlo_simulation",
                    "assess_risk_tolerance",
                    "create_goal_projection_chart",
                    "create_bar_chart",
                    "create_pie_chart",
                ],
            ),
        };

        Self {
            kind,
            policy: format!("{}\n\n{}", policy, DISCLAIMER),
            tools: tools.to_vec(),
        }
    }

    /// Built-in profile, with the policy replaced by `<dir>/<AgentId>.md` when present.
    pub async fn load(kind: AgentKind, policy_dir: Option<&Path>) -> Result<Self> {
        let mut profile = Self::builtin(kind);

        if let Some(dir) = policy_dir {
            let path = dir.join(format!("{}.md", kind.id()));
            if tokio::fs::try_exists(&path).await? {
                profile.policy = tokio::fs::read_to_string(&path).await?;
                info!(agent = %kind, path = %path.display(), "Loaded policy override");
            }
        }

        Ok(profile)
    }

    /// Policy text plus the session context the model needs every call.
    pub fn policy_with_context(&self, portfolio: &PortfolioSnapshot) -> String {
        let portfolio_json =
            serde_json::to_string(portfolio).unwrap_or_else(|_| "{}".to_string());
        format!(
            "{}\n\n# SESSION CONTEXT\nCurrent portfolio (total {:.2}): {}",
            self.policy,
            portfolio.total(),
            portfolio_json
        )
    }
}
