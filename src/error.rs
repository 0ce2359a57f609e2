use thiserror::Error;
use uuid::Uuid;

use crate::recommendations::OptimizationStatus;

/// Errors surfaced to collaborators at the engine boundary
///
/// Policy outcomes (ineligible campaigns, solver fallbacks, unattributed feedback,
/// missing reference data) are handled inside the engine and never show up here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("recommendation {id} is already {status:?}")]
    LifecycleConflict { id: u64, status: OptimizationStatus },

    #[error("recommendation {0} not found")]
    RecommendationNotFound(u64),

    #[error("campaign {0} not found")]
    CampaignNotFound(u64),

    #[error("auction response {0} not found")]
    ResponseNotFound(Uuid),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read configuration: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl EngineError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::LifecycleConflict { .. })
    }
}
