//! Postgres-backed session store
//!
//! Scalar session fields live in `session_states`; history rows live in
//! `session_messages` ordered by a per-session position. JSON payloads are
//! stored as text.

use super::{SessionState, SessionStore, SessionUpdate};
use crate::error::OrchestrationError;
use crate::models::{AgentKind, AgentResponse, Message, PortfolioSnapshot};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

pub struct PostgresSessionStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

fn db_error(context: &str) -> impl Fn(sqlx::Error) -> OrchestrationError + '_ {
    move |e| OrchestrationError::DatabaseError(format!("{}: {}", context, e))
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        OrchestrationError::StateError(format!("Corrupt {} payload: {}", column, e))
    })
}

impl PostgresSessionStore {
    /// Build the pool without connecting; the first query opens a connection.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
            .map_err(db_error("Failed to configure postgres pool"))?;

        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        let pool = &self.pool;
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS session_states (
                      session_id TEXT PRIMARY KEY,
                      last_agent TEXT,
                      portfolio TEXT NOT NULL,
                      last_response TEXT,
                      pending_clarification BOOLEAN NOT NULL DEFAULT FALSE,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS session_messages (
                      message_id UUID PRIMARY KEY,
                      session_id TEXT NOT NULL REFERENCES session_states (session_id),
                      position BIGINT NOT NULL,
                      role TEXT NOT NULL,
                      payload TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      UNIQUE (session_id, position)
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(db_error("Failed to initialize session schema"))?;

        Ok(())
    }

    async fn insert_empty_state<'e, E>(executor: E, session_id: &str) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let portfolio = encode(&PortfolioSnapshot::zero())?;
        sqlx::query(
            r#"
            INSERT INTO session_states (session_id, portfolio)
            VALUES ($1, $2)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(session_id)
        .bind(portfolio)
        .execute(executor)
        .await
        .map_err(db_error("Failed to create session"))?;
        Ok(())
    }
}

fn role_to_db(message: &Message) -> &'static str {
    match message.role() {
        crate::models::Role::User => "user",
        crate::models::Role::Assistant => "assistant",
        crate::models::Role::Tool => "tool",
    }
}

#[async_trait::async_trait]
impl SessionStore for PostgresSessionStore {
    async fn load(&self, session_id: &str) -> Result<SessionState> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            SELECT last_agent, portfolio, last_response, pending_clarification, created_at, updated_at
            FROM session_states
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load session"))?;

        let Some(row) = row else {
            Self::insert_empty_state(&self.pool, session_id).await?;
            debug!(session_id, "Created new session");
            return Ok(SessionState::new(session_id));
        };

        let last_agent: Option<String> = row.try_get("last_agent").map_err(db_error("last_agent"))?;
        let portfolio: String = row.try_get("portfolio").map_err(db_error("portfolio"))?;
        let last_response: Option<String> = row.try_get("last_response").map_err(db_error("last_response"))?;
        let pending_clarification: bool = row
            .try_get("pending_clarification")
            .map_err(db_error("pending_clarification"))?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(db_error("created_at"))?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(db_error("updated_at"))?;

        let rows = sqlx::query(
            r#"
            SELECT payload
            FROM session_messages
            WHERE session_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load session history"))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.try_get("payload").map_err(db_error("payload"))?;
            messages.push(decode::<Message>("message", &payload)?);
        }

        Ok(SessionState {
            session_id: session_id.to_string(),
            messages,
            last_agent: last_agent.as_deref().and_then(AgentKind::from_id),
            portfolio: decode("portfolio", &portfolio)?,
            last_response: last_response
                .as_deref()
                .map(|raw| decode::<AgentResponse>("last_response", raw))
                .transpose()?,
            pending_clarification,
            created_at,
            updated_at,
        })
    }

    async fn save(&self, session_id: &str, update: SessionUpdate) -> Result<()> {
        self.ensure_schema().await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin session transaction"))?;

        Self::insert_empty_state(&mut *tx, session_id).await?;

        // Row lock keeps positions contiguous if two writers race.
        sqlx::query("SELECT 1 FROM session_states WHERE session_id = $1 FOR UPDATE")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to lock session"))?;

        let next_position: i64 = sqlx::query(
            "SELECT COALESCE(MAX(position) + 1, 0) AS next FROM session_messages WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await
        .and_then(|row| row.try_get("next"))
        .map_err(db_error("Failed to read history position"))?;

        for (offset, message) in update.new_messages.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO session_messages (message_id, session_id, position, role, payload)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(session_id)
            .bind(next_position + offset as i64)
            .bind(role_to_db(message))
            .bind(encode(message)?)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to append session message"))?;
        }

        let portfolio = update.portfolio.as_ref().map(encode).transpose()?;
        let last_response = update.last_response.as_ref().map(encode).transpose()?;

        sqlx::query(
            r#"
            UPDATE session_states SET
              portfolio = COALESCE($2, portfolio),
              last_agent = COALESCE($3, last_agent),
              last_response = COALESCE($4, last_response),
              pending_clarification = COALESCE($5, pending_clarification),
              updated_at = NOW()
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .bind(portfolio)
        .bind(update.last_agent.map(|agent| agent.id()))
        .bind(last_response)
        .bind(update.pending_clarification)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to update session"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit session transaction"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TurnOutcome;

    #[test]
    fn test_portfolio_text_column_round_trip_is_exact() {
        let portfolio = PortfolioSnapshot {
            equities: 7_372_376.617_515_271_5,
            fixed_income: 0.1 + 0.2,
            real_estate: 1e-7,
            cash: 123_456_789.012_345_67,
            commodities: 0.0,
            crypto: 2_f64.sqrt() * 1_000.0,
        };

        let stored = encode(&portfolio).unwrap();
        let loaded: PortfolioSnapshot = decode("portfolio", &stored).unwrap();

        assert_eq!(loaded, portfolio);
        assert_eq!(loaded.equities.to_bits(), portfolio.equities.to_bits());
        assert_eq!(encode(&loaded).unwrap(), stored);
    }

    #[test]
    fn test_last_response_round_trip_keeps_amounts() {
        let mut portfolio = PortfolioSnapshot::zero();
        portfolio.equities = 7_372_376.617_515_271_5;
        let response = AgentResponse {
            agent: AgentKind::Portfolio,
            message: "Updated".into(),
            charts: vec![],
            portfolio: Some(portfolio),
            outcome: TurnOutcome::Completed,
        };

        let loaded: AgentResponse = decode("last_response", &encode(&response).unwrap()).unwrap();
        assert_eq!(loaded, response);
    }

    #[test]
    fn test_corrupt_payload_is_state_error() {
        let err = decode::<PortfolioSnapshot>("portfolio", "{not json").unwrap_err();
        assert!(matches!(err, OrchestrationError::StateError(_)));
    }
}
