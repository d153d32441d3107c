use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriageError {
    #[error("validation failed: {fields:?}")]
    Validation { fields: Vec<String> },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {message}")]
    Conflict {
        message: String,
        existing_id: Option<String>,
    },

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("step '{step}' timed out after {timeout_ms}ms")]
    StepTimeout { step: &'static str, timeout_ms: u64 },

    #[error("step '{step}' failed: {message}")]
    StepFailure { step: &'static str, message: String },

    #[error("circuit open for step '{step}'")]
    CircuitOpen { step: &'static str },

    #[error("one-time passcode required")]
    OtpRequired,

    #[error("one-time passcode invalid or expired")]
    OtpInvalid,

    #[error("action blocked by policy '{blocked_by}'")]
    PolicyBlocked { blocked_by: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error [{correlation_id}]: {message}")]
    Internal {
        correlation_id: String,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TriageError {
    pub fn validation(fields: &[&str]) -> Self {
        Self::Validation {
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn not_found(entity: &'static str, id: &str) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type TriageResult<T> = Result<T, TriageError>;
