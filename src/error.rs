//! Error types for the financial agent router

use thiserror::Error;

/// Result type alias for router operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Agent Loop Errors
    // =============================

    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Agent error: {0}")]
    AgentError(String),

    // =============================
    // Infrastructure Errors
    // =============================

    #[error("State persistence error: {0}")]
    StateError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Coarse failure category used by the agent loop to pick a recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Malformed arguments; the model gets corrective feedback and retries.
    Validation,
    /// Network, timeout or backend unavailability.
    Transport,
    Unknown,
}

impl OrchestrationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ToolValidation(_) => FailureKind::Validation,
            Self::Transport(_) | Self::Timeout(_) => FailureKind::Transport,
            Self::HttpError(e) if e.is_timeout() || e.is_connect() => FailureKind::Transport,
            _ => FailureKind::Unknown,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == FailureKind::Validation
    }
}

/// Typed failure raised by a single tool invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolFailure {
    #[error("invalid arguments for '{tool}': {message}")]
    Validation { tool: String, message: String },

    #[error("'{tool}' is unavailable: {message}")]
    Transport { tool: String, message: String },

    #[error("'{tool}' failed: {message}")]
    Unknown { tool: String, message: String },
}

impl ToolFailure {
    pub fn validation(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn transport(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn unknown(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unknown {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation { .. } => FailureKind::Validation,
            Self::Transport { .. } => FailureKind::Transport,
            Self::Unknown { .. } => FailureKind::Unknown,
        }
    }

    pub fn tool(&self) -> &str {
        match self {
            Self::Validation { tool, .. }
            | Self::Transport { tool, .. }
            | Self::Unknown { tool, .. } => tool,
        }
    }
}

impl From<ToolFailure> for OrchestrationError {
    fn from(failure: ToolFailure) -> Self {
        let text = failure.to_string();
        match failure.kind() {
            FailureKind::Validation => Self::ToolValidation(text),
            FailureKind::Transport => Self::Transport(text),
            FailureKind::Unknown => Self::ToolError(text),
        }
    }
}
