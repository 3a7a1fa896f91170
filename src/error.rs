use thiserror::Error;

use crate::model::ScoreRange;

pub type EngineResult<T> = std::result::Result<T, CalibrationError>;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("user {user_id} is not authorized to {action}")]
    NotAuthorized { user_id: String, action: String },

    #[error("sampling pool too small: requested {requested}, available {available}")]
    InsufficientPool { requested: usize, available: usize },

    #[error(
        "not enough anchor candidates in {range} range: requested {requested}, available {available}"
    )]
    InsufficientRange {
        range: ScoreRange,
        requested: usize,
        available: usize,
    },

    #[error("no replacement available in {range} range for rejected anchor {anchor_id}")]
    NoReplacementAvailable { range: ScoreRange, anchor_id: String },

    #[error("invalid state: {0}")]
    ValidationState(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("user {user_id} is already rating in active session {session_id}")]
    ActiveSessionConflict { user_id: String, session_id: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CalibrationError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn not_authorized(user_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self::NotAuthorized {
            user_id: user_id.into(),
            action: action.into(),
        }
    }

    /// Failures an operator can resolve by changing session configuration or
    /// archive contents and retrying the same call.
    pub fn is_operator_actionable(&self) -> bool {
        match self {
            Self::InsufficientPool { .. } => true,
            Self::InsufficientRange { .. } => true,
            Self::NoReplacementAvailable { .. } => true,
            Self::ActiveSessionConflict { .. } => true,
            Self::InvalidInput(_) => true,
            Self::NotFound { .. } => false,
            Self::NotAuthorized { .. } => false,
            Self::ValidationState(_) => false,
            Self::Storage(_) | Self::Serialization(_) => false,
        }
    }
}
