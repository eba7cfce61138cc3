//! Error taxonomy shared by the store, scheduler and control gateway.
//!
//! Every variant maps to a stable machine-checkable kind (see [`HubqError::kind`])
//! so clients can branch on the failure without parsing messages.

use crate::job::JobId;
use crate::transfer::TransferError;

/// Errors surfaced at the library boundary.
#[derive(Debug, thiserror::Error)]
pub enum HubqError {
    /// Malformed or incomplete submission.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Missing or invalid credential. Never reveals whether the target exists.
    #[error("missing or invalid credential")]
    Authorization,

    #[error("job {0} not found")]
    NotFound(JobId),

    /// Duplicate fingerprint, or an action the job's current state does not allow.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient transfer error: {0}")]
    TransientTransfer(String),

    #[error("permanent transfer error: {0}")]
    PermanentTransfer(String),

    #[error("job store: {0}")]
    Store(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HubqError {
    /// Stable identifier for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            HubqError::Validation(_) => "ValidationError",
            HubqError::Authorization => "AuthorizationError",
            HubqError::NotFound(_) => "NotFoundError",
            HubqError::Conflict(_) => "ConflictError",
            HubqError::TransientTransfer(_) => "TransientTransferError",
            HubqError::PermanentTransfer(_) => "PermanentTransferError",
            HubqError::Store(_) => "StoreError",
            HubqError::Internal(_) => "InternalError",
        }
    }

    pub(crate) fn conflict(msg: impl Into<String>) -> Self {
        HubqError::Conflict(msg.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        HubqError::Validation(msg.into())
    }
}

impl From<TransferError> for HubqError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Transient(msg) => HubqError::TransientTransfer(msg),
            TransferError::Permanent(msg) => HubqError::PermanentTransfer(msg),
        }
    }
}

impl From<serde_json::Error> for HubqError {
    fn from(e: serde_json::Error) -> Self {
        HubqError::Internal(format!("json: {e}"))
    }
}
