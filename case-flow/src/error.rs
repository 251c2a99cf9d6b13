use thiserror::Error;

use crate::session::FeedbackStage;

#[derive(Error, Debug)]
pub enum CaseFlowError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Case not found: {0}")]
    CaseNotFound(String),

    #[error("Stage '{stage}' requires '{missing}' feedback to be recorded first")]
    PrerequisiteMissing {
        stage: FeedbackStage,
        missing: FeedbackStage,
    },

    #[error("Session has no '{0}' recorded yet")]
    MissingInteraction(&'static str),

    #[error("Oracle output for '{stage}' is malformed: {reason}")]
    OracleMalformed { stage: String, reason: String },

    #[error("Oracle call failed: {0}")]
    Oracle(String),

    #[error("Version conflict on session {key}: expected {expected}, found {found}")]
    VersionConflict {
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Finalization failed: {0}")]
    Finalization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for CaseFlowError {
    fn from(err: sqlx::Error) -> Self {
        CaseFlowError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for CaseFlowError {
    fn from(err: std::io::Error) -> Self {
        CaseFlowError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CaseFlowError>;
