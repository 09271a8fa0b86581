//! Session state persistence
//!
//! One `SessionState` per session id. History is append-only; the scalar
//! fields are overwritten only when an update provides them. Turns for the
//! same session are serialized through `SessionLocks`.

mod postgres;

pub use postgres::PostgresSessionStore;

use crate::config::Settings;
use crate::models::{AgentKind, AgentResponse, Message, PortfolioSnapshot};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub last_agent: Option<AgentKind>,
    pub portfolio: PortfolioSnapshot,
    pub last_response: Option<AgentResponse>,
    pub pending_clarification: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            last_agent: None,
            portfolio: PortfolioSnapshot::zero(),
            last_response: None,
            pending_clarification: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an update in place: append messages, overwrite provided fields.
    pub fn apply(&mut self, update: SessionUpdate) {
        self.messages.extend(update.new_messages);
        if let Some(portfolio) = update.portfolio {
            self.portfolio = portfolio;
        }
        if let Some(agent) = update.last_agent {
            self.last_agent = Some(agent);
        }
        if let Some(response) = update.last_response {
            self.last_response = Some(response);
        }
        if let Some(pending) = update.pending_clarification {
            self.pending_clarification = pending;
        }
        self.updated_at = Utc::now();
    }
}

/// Changes produced by one routed turn.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub new_messages: Vec<Message>,
    pub portfolio: Option<PortfolioSnapshot>,
    pub last_agent: Option<AgentKind>,
    pub last_response: Option<AgentResponse>,
    pub pending_clarification: Option<bool>,
}

/// Trait for session persistence
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session, creating a zero-valued one if it does not exist.
    async fn load(&self, session_id: &str) -> Result<SessionState>;

    async fn save(&self, session_id: &str, update: SessionUpdate) -> Result<()>;
}

/// In-memory session store for development and tests
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionState>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<SessionState> {
        {
            let sessions = self.sessions.read().await;
            if let Some(state) = sessions.get(session_id) {
                return Ok(state.clone());
            }
        }

        let mut sessions = self.sessions.write().await;
        let state = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::new(session_id))
            .clone();

        Ok(state)
    }

    async fn save(&self, session_id: &str, update: SessionUpdate) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::new(session_id))
            .apply(update);
        Ok(())
    }
}

/// One async mutex per session id.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `session_id`. Other sessions never contend.
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Postgres when a database URL is configured, otherwise in-memory.
pub fn build_session_store(settings: &Settings) -> Arc<dyn SessionStore> {
    if let Some(url) = settings.database_url.as_deref() {
        match PostgresSessionStore::connect_lazy(url) {
            Ok(store) => {
                info!("Session store backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres session store, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Session store backend: in-memory");
    Arc::new(InMemorySessionStore::new())
}
