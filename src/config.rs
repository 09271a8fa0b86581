//! Runtime configuration
//!
//! Everything is read from the process environment (after `.env` is loaded).
//! `Settings::from_lookup` takes any key lookup so tests don't touch the
//! real environment.

use crate::error::OrchestrationError;
use crate::models::AgentKind;
use crate::Result;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
    pub request_timeout: Duration,
}

/// Bounds for the per-agent execution loop.
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub max_iterations: u32,
    pub max_validation_retries: u32,
    /// Applies to every model call and every tool call.
    pub call_timeout: Duration,
    pub transport_retries: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_validation_retries: 2,
            call_timeout: Duration::from_secs(60),
            transport_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RouterSettings {
    pub default_agent: AgentKind,
    pub classify_timeout: Duration,
    pub turn_timeout: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            default_agent: AgentKind::FinanceQandA,
            classify_timeout: Duration::from_secs(30),
            turn_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub gemini: GeminiSettings,
    pub tools_api_base_url: Option<String>,
    pub database_url: Option<String>,
    pub api_port: u16,
    pub agent: LoopSettings,
    pub router: RouterSettings,
    pub policy_dir: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| lookup(key))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
        };

        let loop_defaults = LoopSettings::default();
        let router_defaults = RouterSettings::default();

        let agent = LoopSettings {
            max_iterations: parse_or(get(&["AGENT_MAX_ITERATIONS"]), "AGENT_MAX_ITERATIONS", loop_defaults.max_iterations)?,
            max_validation_retries: parse_or(
                get(&["AGENT_MAX_VALIDATION_RETRIES"]),
                "AGENT_MAX_VALIDATION_RETRIES",
                loop_defaults.max_validation_retries,
            )?,
            call_timeout: secs_or(get(&["AGENT_CALL_TIMEOUT_SECS"]), "AGENT_CALL_TIMEOUT_SECS", loop_defaults.call_timeout)?,
            transport_retries: parse_or(
                get(&["TOOL_TRANSPORT_RETRIES"]),
                "TOOL_TRANSPORT_RETRIES",
                loop_defaults.transport_retries,
            )?,
        };

        if agent.max_iterations == 0 {
            return Err(OrchestrationError::ConfigError(
                "AGENT_MAX_ITERATIONS must be at least 1".to_string(),
            ));
        }

        let default_agent = match get(&["ROUTER_DEFAULT_AGENT"]) {
            Some(id) => AgentKind::from_id(&id).ok_or_else(|| {
                OrchestrationError::ConfigError(format!("ROUTER_DEFAULT_AGENT: unknown agent '{}'", id))
            })?,
            None => router_defaults.default_agent,
        };

        let router = RouterSettings {
            default_agent,
            classify_timeout: secs_or(
                get(&["ROUTER_CLASSIFY_TIMEOUT_SECS"]),
                "ROUTER_CLASSIFY_TIMEOUT_SECS",
                router_defaults.classify_timeout,
            )?,
            turn_timeout: secs_or(get(&["TURN_TIMEOUT_SECS"]), "TURN_TIMEOUT_SECS", router_defaults.turn_timeout)?,
        };

        Ok(Self {
            gemini: GeminiSettings {
                api_key: get(&["GEMINI_API_KEY"]).unwrap_or_default(),
                model: get(&["GEMINI_MODEL"]).unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                request_timeout: agent.call_timeout,
            },
            tools_api_base_url: get(&["TOOLS_API_BASE_URL", "FINANCIAL_API_BASE_URL"])
                .map(|url| url.trim_end_matches('/').to_string()),
            database_url: get(&["DATABASE_URL", "POSTGRES_URL"]),
            api_port: parse_or(get(&["PORT", "API_PORT"]), "PORT", 8080)?,
            agent,
            router,
            policy_dir: get(&["AGENT_POLICY_DIR"]).map(PathBuf::from),
        })
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(value) => value.parse::<T>().map_err(|_| {
            OrchestrationError::ConfigError(format!("{}: cannot parse '{}'", key, value))
        }),
        None => Ok(default),
    }
}

fn secs_or(raw: Option<String>, key: &str, default: Duration) -> Result<Duration> {
    parse_or(raw, key, default.as_secs()).map(Duration::from_secs)
}

/// Install the global `tracing` subscriber. `RUST_LOG` wins over `default_directive`.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.agent.max_iterations, 15);
        assert_eq!(settings.agent.max_validation_retries, 2);
        assert_eq!(settings.router.default_agent, AgentKind::FinanceQandA);
        assert_eq!(settings.api_port, 8080);
        assert_eq!(settings.gemini.model, DEFAULT_GEMINI_MODEL);
        assert!(settings.database_url.is_none());
        assert!(settings.tools_api_base_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let settings = settings_from(&[
            ("AGENT_MAX_ITERATIONS", "4"),
            ("ROUTER_DEFAULT_AGENT", "PortfolioAgent"),
            ("POSTGRES_URL", "postgres://localhost/chat"),
            ("FINANCIAL_API_BASE_URL", "http://tools:9000/"),
            ("API_PORT", "9090"),
            ("TURN_TIMEOUT_SECS", "12"),
        ])
        .unwrap();

        assert_eq!(settings.agent.max_iterations, 4);
        assert_eq!(settings.router.default_agent, AgentKind::Portfolio);
        assert_eq!(settings.database_url.as_deref(), Some("postgres://localhost/chat"));
        assert_eq!(settings.tools_api_base_url.as_deref(), Some("http://tools:9000"));
        assert_eq!(settings.api_port, 9090);
        assert_eq!(settings.router.turn_timeout, Duration::from_secs(12));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let err = settings_from(&[("AGENT_MAX_ITERATIONS", "many")]).unwrap_err();
        assert!(matches!(err, OrchestrationError::ConfigError(_)));

        let err = settings_from(&[("ROUTER_DEFAULT_AGENT", "TaxAgent")]).unwrap_err();
        assert!(err.to_string().contains("TaxAgent"));

        assert!(settings_from(&[("AGENT_MAX_ITERATIONS", "0")]).is_err());
    }
}
