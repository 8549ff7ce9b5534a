use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Role;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("student {student_id} not found")]
    NotFound { student_id: Uuid },

    #[error("member {id} is a {role}, not a student")]
    Role { id: Uuid, role: Role },

    #[error("invalid event type `{0}`, must be one of: attendance, assignment, performance")]
    InvalidEventType(String),

    #[error("invalid payload field `{field}`: {message}")]
    InvalidPayload {
        field: &'static str,
        message: String,
    },

    #[error("persistence failure: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn invalid_payload(field: &'static str, message: impl Into<String>) -> Self {
        PipelineError::InvalidPayload {
            field,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::NotFound { .. } => "not_found",
            PipelineError::Role { .. } => "role",
            PipelineError::InvalidEventType(_) => "invalid_event_type",
            PipelineError::InvalidPayload { .. } => "invalid_payload",
            PipelineError::Persistence(_) => "persistence",
        }
    }

    /// True for every error raised before the pipeline writes anything.
    pub fn is_validation(&self) -> bool {
        !matches!(self, PipelineError::Persistence(_))
    }
}

/// Structured failure result handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: &'static str,
    pub message: String,
}

impl From<&PipelineError> for Failure {
    fn from(err: &PipelineError) -> Self {
        Failure {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_kind_and_message() {
        let err = PipelineError::invalid_payload("score", "must be between 0 and 100");
        let failure = Failure::from(&err);
        assert_eq!(failure.kind, "invalid_payload");
        assert_eq!(
            failure.message,
            "invalid payload field `score`: must be between 0 and 100"
        );
        assert!(err.is_validation());
    }

    #[test]
    fn persistence_errors_are_not_validation() {
        let err = PipelineError::from(anyhow::anyhow!("connection refused"));
        assert_eq!(err.kind(), "persistence");
        assert!(!err.is_validation());
        assert!(err.to_string().contains("connection refused"));
    }
}
