//! Intent classification
//!
//! The router asks the model to name exactly one agent. This module owns the
//! routing prompt and the strict parsing of the model's reply; anything that
//! does not parse to a known agent id is treated as a classification failure.

use crate::models::{AgentKind, PortfolioSnapshot};

/// Routing table given to the classifier as its policy.
pub const ROUTER_POLICY: &str = r#"# ROLE
You route a user's message in a financial assistant to exactly one specialist.

# SPECIALISTS
- FinanceQandAAgent: general finance education. Concepts, definitions, taxes, retirement accounts, budgeting. No live data.
- FinanceMarketAgent: specific tickers, companies or funds. Quotes, price history, fund composition, market summaries, price comparisons.
- PortfolioAgent: building or changing the user's portfolio. Adding money, allocating across asset classes, portfolio summaries, risk assessment of holdings.
- GoalsAgent: projections and goals. Retirement targets, "will I reach", Monte Carlo simulation, time-to-goal questions.

# RULES
- Pick the specialist whose tools answer the message.
- A short reply to a question the assistant just asked belongs to the agent that asked it.
- Goal projections need a portfolio; if the portfolio is empty and the user talks about investing amounts, choose PortfolioAgent.
- When nothing fits, choose FinanceQandAAgent."#;

/// Session facts the classifier sees alongside the message.
#[derive(Debug, Clone, Default)]
pub struct RoutingContext {
    pub last_agent: Option<AgentKind>,
    pub pending_clarification: bool,
    pub portfolio_total: f64,
}

impl RoutingContext {
    pub fn new(
        last_agent: Option<AgentKind>,
        pending_clarification: bool,
        portfolio: &PortfolioSnapshot,
    ) -> Self {
        Self {
            last_agent,
            pending_clarification,
            portfolio_total: portfolio.total(),
        }
    }
}

pub fn build_classification_prompt(user_text: &str, context: &RoutingContext) -> String {
    let agents: Vec<&str> = AgentKind::ALL.iter().map(|agent| agent.id()).collect();

    let mut prompt = String::from("Session context:\n");
    match context.last_agent {
        Some(agent) => prompt.push_str(&format!("- Previous agent: {}\n", agent.id())),
        None => prompt.push_str("- Previous agent: none\n"),
    }
    if context.pending_clarification {
        prompt.push_str("- The previous assistant reply asked the user a question.\n");
    }
    if context.portfolio_total > 0.0 {
        prompt.push_str(&format!(
            "- The user has a portfolio totalling {:.2}.\n",
            context.portfolio_total
        ));
    } else {
        prompt.push_str("- The user has no portfolio yet.\n");
    }

    prompt.push_str(&format!(
        "\nUser message:\n{}\n\nRespond with only the agent name, one of: {}",
        user_text.trim(),
        agents.join(", ")
    ));
    prompt
}

/// Strict parse of the classifier reply. Surrounding quotes, backticks and
/// trailing punctuation are tolerated; anything else is rejected.
pub fn parse_classification(raw: &str) -> Option<AgentKind> {
    let cleaned = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c.is_whitespace())
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | ',' | ';' | ':'))
        .trim();

    AgentKind::from_id(cleaned)
}
