use tally_core::CollaboratorError;
use tally_import::{DecodeError, PipelineError};
use tally_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    /// Missing or wrong statement password, or an unreadable container.
    #[error("Could not decrypt statement: {0}")]
    DecryptionFailed(String),
    #[error("Unsupported statement: {0}")]
    UnsupportedFormat(String),
    #[error("Statement parsing timed out: {0}")]
    Timeout(String),
    /// The column layout could not be determined; a layout profile is needed.
    #[error("Statement layout could not be reconstructed: {0}")]
    ReconstructionAmbiguous(String),
    #[error("Duplicate statement: {0}")]
    DuplicateDetected(String),
    #[error("Approval conflict: {0}")]
    ApprovalConflict(String),
    #[error("Not allowed in the current state: {0}")]
    InvalidTransition(String),
    /// Maker-checker: the submitter tried to approve their own batch.
    #[error("Self-approval is not allowed: {0}")]
    SelfApproval(String),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Collaborator failed: {0}")]
    Collaborator(#[from] CollaboratorError),
    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl ReconError {
    /// The operator can fix the cause and try the same call again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ReconError::DecryptionFailed(_) | ReconError::Timeout(_) | ReconError::Collaborator(_)
        )
    }
}

impl From<StorageError> for ReconError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(msg) => ReconError::NotFound(msg),
            StorageError::StaleState(msg) => ReconError::InvalidTransition(msg),
            StorageError::Conflict(msg) => ReconError::Conflict(msg),
            other => ReconError::Storage(other),
        }
    }
}

impl From<PipelineError> for ReconError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Decode(ref d) if d.is_decryption_failure() => ReconError::DecryptionFailed(d.to_string()),
            PipelineError::Decode(DecodeError::LimitExceeded(msg)) => {
                ReconError::UnsupportedFormat(format!("statement too large: {msg}"))
            }
            PipelineError::Decode(other) => ReconError::UnsupportedFormat(other.to_string()),
            PipelineError::Reconstruct(r) => ReconError::ReconstructionAmbiguous(r.to_string()),
            other @ PipelineError::Timeout(_) => ReconError::Timeout(other.to_string()),
            PipelineError::Worker(msg) => ReconError::UnsupportedFormat(format!("statement could not be parsed: {msg}")),
        }
    }
}
