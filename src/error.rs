//! Engine error taxonomy.
//!
//! Entity- and summary-level errors are absorbed by the turn protocol and never
//! abort a turn; [`EngineError::GenerationFailed`] aborts only the current turn.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The character limit was reached; the mention is logged, not persisted.
    #[error("character capacity of {limit} reached; dropped mention '{mention}'")]
    EntityCapacityExceeded { limit: usize, mention: String },

    /// The narration model exhausted its retry budget.
    #[error("generation failed after {attempts} attempt(s): {reason}")]
    GenerationFailed { attempts: u32, reason: String },

    /// Model output did not follow the speaker-label format.
    #[error("malformed segmentation: {0}")]
    MalformedSegmentation(String),

    #[error("story summary regeneration failed: {0}")]
    StaleSummaryRegenerationFailed(String),

    /// More entries were requested for deletion than exist.
    #[error("requested rollback of {requested} entries but only {available} exist")]
    RollbackInconsistency { requested: usize, available: usize },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid attributes: {0}")]
    InvalidAttributes(String),

    #[error("a narrator already exists with role {existing}")]
    NarratorConflict { existing: String },

    #[error("cannot address {0}")]
    UnknownAddressee(String),

    #[error("invalid turn transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error(transparent)]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the turn protocol absorbs this error instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::EntityCapacityExceeded { .. }
                | Self::MalformedSegmentation(_)
                | Self::StaleSummaryRegenerationFailed(_)
                | Self::RollbackInconsistency { .. }
        )
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
