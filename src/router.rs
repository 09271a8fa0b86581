//! Intent router
//!
//! Entry point for one user turn: serialize on the session, load its state,
//! classify the message to one specialist agent, run that agent and persist
//! the outcome. A turn always produces a response; failures below this layer
//! surface as a Failed outcome, never as an error.

use crate::agent::{Agent, AgentExecutor, AgentProfile, AgentRequest, Diagnostics};
use crate::classifier::{
    build_classification_prompt, parse_classification, RoutingContext, ROUTER_POLICY,
};
use crate::config::{LoopSettings, RouterSettings};
use crate::error::OrchestrationError;
use crate::llm::{ModelClient, ModelRequest};
use crate::models::{AgentKind, AgentResponse, Message, TurnOutcome};
use crate::state::{SessionLocks, SessionState, SessionStore, SessionUpdate};
use crate::tools::ToolInvoker;
use crate::Result;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const ROUTER_ERROR_MESSAGE: &str = "An error occurred while processing your request.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    Classified,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDecision {
    pub agent: AgentKind,
    pub source: RouteSource,
}

pub struct IntentRouter {
    model: Arc<dyn ModelClient>,
    agents: HashMap<AgentKind, Arc<dyn Agent>>,
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
    settings: RouterSettings,
    diagnostics: Arc<Diagnostics>,
}

impl IntentRouter {
    pub fn new(
        model: Arc<dyn ModelClient>,
        store: Arc<dyn SessionStore>,
        settings: RouterSettings,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            model,
            agents: HashMap::new(),
            store,
            locks: SessionLocks::new(),
            settings,
            diagnostics,
        }
    }

    /// Router with the four built-in agents sharing one model and tool invoker.
    pub async fn with_default_agents(
        model: Arc<dyn ModelClient>,
        invoker: Arc<dyn ToolInvoker>,
        store: Arc<dyn SessionStore>,
        settings: RouterSettings,
        limits: LoopSettings,
        policy_dir: Option<&Path>,
        diagnostics: Arc<Diagnostics>,
    ) -> Result<Self> {
        let mut router = Self::new(model.clone(), store, settings, diagnostics.clone());

        for kind in AgentKind::ALL {
            let profile = AgentProfile::load(kind, policy_dir).await?;
            router.register(Arc::new(AgentExecutor::new(
                profile,
                model.clone(),
                invoker.clone(),
                limits,
                diagnostics.clone(),
            )));
        }

        Ok(router)
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        info!(agent = %agent.kind(), "Registered agent");
        self.agents.insert(agent.kind(), agent);
    }

    pub fn diagnostics(&self) -> Arc<Diagnostics> {
        self.diagnostics.clone()
    }

    /// Classify `user_text`, falling back to the default agent on any failure.
    pub async fn route(&self, user_text: &str, state: &SessionState) -> RouteDecision {
        let context = RoutingContext::new(
            state.last_agent,
            state.pending_clarification,
            &state.portfolio,
        );
        let prompt = build_classification_prompt(user_text, &context);
        let history = [Message::user(prompt)];
        let request = ModelRequest {
            policy: ROUTER_POLICY,
            history: &history,
            tools: &[],
        };

        let reply = match tokio::time::timeout(self.settings.classify_timeout, self.model.complete(request)).await {
            Ok(Ok(output)) => output.final_text().map(str::to_string),
            Ok(Err(e)) => {
                warn!(session_id = %state.session_id, "Classification call failed: {}", e);
                None
            }
            Err(_) => {
                warn!(session_id = %state.session_id, "Classification timed out");
                None
            }
        };

        if let Some(agent) = reply.as_deref().and_then(parse_classification) {
            return RouteDecision {
                agent,
                source: RouteSource::Classified,
            };
        }

        warn!(
            session_id = %state.session_id,
            reply = ?reply,
            default_agent = %self.settings.default_agent,
            "Unrecognized classification, using default agent"
        );
        self.diagnostics.record_routing_fallback();
        RouteDecision {
            agent: self.settings.default_agent,
            source: RouteSource::Fallback,
        }
    }

    async fn dispatch(
        &self,
        agent: AgentKind,
        session_id: &str,
        history: &[Message],
        state: &SessionState,
    ) -> Result<AgentResponse> {
        let handler = self
            .agents
            .get(&agent)
            .ok_or_else(|| OrchestrationError::AgentError(format!("agent {} is not registered", agent)))?;

        let request = AgentRequest {
            session_id,
            history,
            portfolio: &state.portfolio,
        };

        match tokio::time::timeout(self.settings.turn_timeout, handler.run(request)).await {
            Ok(result) => result,
            Err(_) => Err(OrchestrationError::Timeout(self.settings.turn_timeout.as_millis() as u64)),
        }
    }

    /// Handle one user turn end to end.
    pub async fn handle_turn(&self, session_id: &str, user_text: &str) -> AgentResponse {
        let _guard = self.locks.acquire(session_id).await;

        let state = match self.store.load(session_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(session_id, "Failed to load session, starting fresh: {}", e);
                SessionState::new(session_id)
            }
        };

        let decision = self.route(user_text, &state).await;
        info!(
            session_id,
            agent = %decision.agent,
            source = ?decision.source,
            history_len = state.messages.len(),
            "Routed turn"
        );

        let user_message = Message::user(user_text);
        let mut history = state.messages.clone();
        history.push(user_message.clone());

        let response = match self.dispatch(decision.agent, session_id, &history, &state).await {
            Ok(response) => response,
            Err(e) => {
                error!(session_id, agent = %decision.agent, "Agent dispatch failed: {}", e);
                AgentResponse {
                    agent: decision.agent,
                    message: ROUTER_ERROR_MESSAGE.to_string(),
                    charts: Vec::new(),
                    portfolio: None,
                    outcome: TurnOutcome::Failed,
                }
            }
        };

        let update = SessionUpdate {
            new_messages: vec![user_message, Message::assistant(response.message.clone())],
            portfolio: response.portfolio,
            last_agent: Some(response.agent),
            last_response: Some(response.clone()),
            pending_clarification: Some(response.message.trim_end().ends_with('?')),
        };

        if let Err(e) = self.store.save(session_id, update).await {
            error!(session_id, "Failed to persist session: {}", e);
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelOutput;
    use crate::models::{AssetClass, PortfolioSnapshot};
    use crate::state::InMemorySessionStore;
    use crate::testing::FnModel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Agent answering with a fixed message, optionally returning a portfolio.
    struct CannedAgent {
        kind: AgentKind,
        message: &'static str,
        portfolio: Option<PortfolioSnapshot>,
        runs: AtomicUsize,
        delay: Duration,
    }

    impl CannedAgent {
        fn new(kind: AgentKind, message: &'static str) -> Self {
            Self {
                kind,
                message,
                portfolio: None,
                runs: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait::async_trait]
    impl Agent for CannedAgent {
        fn kind(&self) -> AgentKind {
            self.kind
        }

        async fn run(&self, request: AgentRequest<'_>) -> Result<AgentResponse> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            assert!(matches!(request.history.last(), Some(Message::User { .. })));
            tokio::time::sleep(self.delay).await;
            Ok(AgentResponse {
                agent: self.kind,
                message: self.message.to_string(),
                charts: Vec::new(),
                portfolio: self.portfolio,
                outcome: TurnOutcome::Completed,
            })
        }
    }

    fn router_with(
        reply: &'static str,
        store: Arc<InMemorySessionStore>,
        agents: Vec<Arc<dyn Agent>>,
    ) -> IntentRouter {
        let model = Arc::new(FnModel::new(move |_, _: &[Message]| Ok(ModelOutput::Final(reply.into()))));
        let mut router = IntentRouter::new(model, store, RouterSettings::default(), Arc::new(Diagnostics::new()));
        for agent in agents {
            router.register(agent);
        }
        router
    }

    #[tokio::test]
    async fn test_classified_turn_is_persisted() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut portfolio_agent = CannedAgent::new(AgentKind::Portfolio, "Added $10,000 to Cash.");
        let mut portfolio = PortfolioSnapshot::zero();
        portfolio.set(AssetClass::Cash, 10_000.0);
        portfolio_agent.portfolio = Some(portfolio);

        let router = router_with("PortfolioAgent", store.clone(), vec![Arc::new(portfolio_agent)]);
        let response = router.handle_turn("s1", "Put 10k in cash").await;

        assert_eq!(response.agent, AgentKind::Portfolio);
        assert_eq!(response.outcome, TurnOutcome::Completed);

        let state = store.load("s1").await.unwrap();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0], Message::user("Put 10k in cash"));
        assert_eq!(state.messages[1], Message::assistant("Added $10,000 to Cash."));
        assert_eq!(state.portfolio.cash, 10_000.0);
        assert_eq!(state.last_agent, Some(AgentKind::Portfolio));
        assert!(!state.pending_clarification);
        assert_eq!(state.last_response, Some(response));
    }

    #[tokio::test]
    async fn test_unparseable_classification_falls_back_to_default() {
        let store = Arc::new(InMemorySessionStore::new());
        let qanda = Arc::new(CannedAgent::new(AgentKind::FinanceQandA, "An ETF is a fund. Want to know more?"));
        let router = router_with("Probably the tax agent", store.clone(), vec![qanda.clone()]);

        let response = router.handle_turn("s2", "What is an ETF?").await;

        assert_eq!(response.agent, AgentKind::FinanceQandA);
        assert_eq!(qanda.runs.load(Ordering::SeqCst), 1);
        assert_eq!(router.diagnostics().snapshot().routing_fallbacks, 1);
        assert!(store.load("s2").await.unwrap().pending_clarification);
    }

    #[tokio::test]
    async fn test_classification_error_falls_back() {
        let store = Arc::new(InMemorySessionStore::new());
        let model = Arc::new(FnModel::new(|_, _: &[Message]| {
            Err(OrchestrationError::Transport("unreachable".into()))
        }));
        let router = IntentRouter::new(model, store, RouterSettings::default(), Arc::new(Diagnostics::new()));

        let decision = router.route("hello", &SessionState::new("s3")).await;
        assert_eq!(decision.agent, AgentKind::FinanceQandA);
        assert_eq!(decision.source, RouteSource::Fallback);
    }

    #[tokio::test]
    async fn test_unregistered_agent_yields_error_response() {
        let store = Arc::new(InMemorySessionStore::new());
        let router = router_with("GoalsAgent", store.clone(), vec![]);

        let response = router.handle_turn("s4", "Will I retire at 60?").await;

        assert_eq!(response.outcome, TurnOutcome::Failed);
        assert_eq!(response.message, ROUTER_ERROR_MESSAGE);
        assert_eq!(response.agent, AgentKind::Goals);
        assert_eq!(store.load("s4").await.unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_turn_timeout_yields_error_response() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut slow = CannedAgent::new(AgentKind::FinanceMarket, "too late");
        slow.delay = Duration::from_millis(500);
        let model = Arc::new(FnModel::new(|_, _: &[Message]| Ok(ModelOutput::Final("FinanceMarketAgent".into()))));
        let settings = RouterSettings {
            turn_timeout: Duration::from_millis(50),
            ..RouterSettings::default()
        };
        let mut router = IntentRouter::new(model, store, settings, Arc::new(Diagnostics::new()));
        router.register(Arc::new(slow));

        let response = router.handle_turn("s5", "AAPL price?").await;
        assert_eq!(response.outcome, TurnOutcome::Failed);
    }

    #[tokio::test]
    async fn test_same_session_turns_are_serialized() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut agent = CannedAgent::new(AgentKind::FinanceQandA, "ok");
        agent.delay = Duration::from_millis(20);
        let router = Arc::new(router_with("FinanceQandAAgent", store.clone(), vec![Arc::new(agent)]));

        let mut handles = Vec::new();
        for i in 0..5 {
            let router = router.clone();
            handles.push(tokio::spawn(async move {
                router.handle_turn("shared", &format!("question {}", i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let state = store.load("shared").await.unwrap();
        assert_eq!(state.messages.len(), 10);
        for pair in state.messages.chunks(2) {
            assert!(matches!(pair[0], Message::User { .. }));
            assert_eq!(pair[1], Message::assistant("ok"));
        }
    }

    #[tokio::test]
    async fn test_with_default_agents_registers_all() {
        let store = Arc::new(InMemorySessionStore::new());
        let model = Arc::new(FnModel::new(|_, _: &[Message]| Ok(ModelOutput::Final("GoalsAgent".into()))));
        let invoker = Arc::new(crate::tools::create_default_registry(None, 0));

        let router = IntentRouter::with_default_agents(
            model,
            invoker,
            store,
            RouterSettings::default(),
            LoopSettings::default(),
            None,
            Arc::new(Diagnostics::new()),
        )
        .await
        .unwrap();

        assert_eq!(router.agents.len(), AgentKind::ALL.len());
    }
}
