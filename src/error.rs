use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgencyError>;

#[derive(Debug, Error)]
pub enum AgencyError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid arguments for tool `{tool}`: {message}")]
    Validation { tool: String, message: String },

    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("tool `{name}` failed: {source}")]
    ToolExecution {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("cannot deliver message from `{from}` to `{to}`: {reason}")]
    Routing {
        from: String,
        to: String,
        reason: String,
    },

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl AgencyError {
    pub fn config(message: impl Into<String>) -> Self {
        AgencyError::Configuration(message.into())
    }

    pub fn tool_failure(name: impl Into<String>, message: impl Into<String>) -> Self {
        AgencyError::ToolExecution {
            name: name.into(),
            source: message.into().into(),
        }
    }

    /// Errors that stay inside a turn and are reported back to the model as a
    /// failed tool result.
    pub fn is_turn_local(&self) -> bool {
        matches!(
            self,
            AgencyError::Validation { .. }
                | AgencyError::ToolNotFound(_)
                | AgencyError::ToolExecution { .. }
                | AgencyError::Routing { .. }
        )
    }
}
