use drover_domain::DomainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind}/{id} not found")]
    NotFound { kind: String, id: String },

    #[error("{kind}/{id} already exists")]
    AlreadyExists { kind: String, id: String },

    #[error("version conflict on {kind}/{id}: expected {expected}, stored {stored}")]
    VersionConflict { kind: String, id: String, expected: u64, stored: u64 },

    #[error("phase conflict on {kind}/{id}")]
    PhaseConflict { kind: String, id: String },

    #[error("{kind}/{id} still has finalizers: {finalizers:?}")]
    FinalizersPresent { kind: String, id: String, finalizers: Vec<String> },

    #[error("{kind}/{id} is owned by another controller")]
    OwnerMismatch { kind: String, id: String },

    #[error(transparent)]
    Decode(#[from] DomainError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }

    pub fn is_phase_conflict(&self) -> bool {
        matches!(self, StoreError::PhaseConflict { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}
