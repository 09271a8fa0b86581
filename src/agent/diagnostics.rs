//! Invocation counters
//!
//! Shared by reference between the router and every executor. Counters are
//! observational only; nothing reads them to make a decision.

use crate::models::AgentKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Diagnostics {
    invocations: [AtomicU64; 4],
    tool_calls: AtomicU64,
    validation_retries: AtomicU64,
    routing_fallbacks: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub invocations: BTreeMap<String, u64>,
    pub tool_calls: u64,
    pub validation_retries: u64,
    pub routing_fallbacks: u64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the invocation number for this agent, starting at 1.
    pub fn record_invocation(&self, agent: AgentKind) -> u64 {
        self.invocations[agent.index()].fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_tool_calls(&self, count: usize) {
        self.tool_calls.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_validation_retry(&self) {
        self.validation_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_routing_fallback(&self) {
        self.routing_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invocations(&self, agent: AgentKind) -> u64 {
        self.invocations[agent.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            invocations: AgentKind::ALL
                .iter()
                .map(|agent| (agent.id().to_string(), self.invocations(*agent)))
                .collect(),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            validation_retries: self.validation_retries.load(Ordering::Relaxed),
            routing_fallbacks: self.routing_fallbacks.load(Ordering::Relaxed),
        }
    }
}
