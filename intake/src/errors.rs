use crate::config::ValidationError;
use crate::store::StoreError;
use crate::types::{IdError, ObjectId, RecordKind};
use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for intake operations
pub type Result<T, E = IntakeError> = std::result::Result<T, E>;

/// Errors that can occur while accepting or querying reports
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    #[error("invalid report: {0}")]
    InvalidReport(String),

    /// The request body could not be read, e.g. it exceeded the size limit.
    #[error("{message}")]
    RequestBody { status: StatusCode, message: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: RecordKind, id: ObjectId },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The issue was stored but could not be confirmed as attached to its
    /// bug. A failed upsert leaves it orphaned; a timed out one may still
    /// have landed.
    #[error("issue {issue_id} was stored but not confirmed attached to bug {signature}: {source}")]
    PartialFailure {
        issue_id: ObjectId,
        signature: String,
        #[source]
        source: StoreError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),
}

impl IntakeError {
    pub fn status(&self) -> StatusCode {
        match self {
            // Malformed identifiers are reported like missing records.
            IntakeError::InvalidId(_) | IntakeError::NotFound { .. } => StatusCode::NOT_FOUND,
            IntakeError::InvalidReport(_) => StatusCode::BAD_REQUEST,
            IntakeError::RequestBody { status, .. } => *status,
            IntakeError::Store(_)
            | IntakeError::PartialFailure { .. }
            | IntakeError::Io(_)
            | IntakeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The underlying store error, if any. Never sent to clients unless
    /// explicitly configured.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            IntakeError::Store(e) | IntakeError::PartialFailure { source: e, .. } => Some(e),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.store_error(), Some(StoreError::Timeout(_)))
    }

    /// The issue was stored but attaching it to its bug timed out, so the
    /// bug may or may not reference it.
    pub fn attachment_unknown(&self) -> bool {
        matches!(
            self,
            IntakeError::PartialFailure {
                source: StoreError::Timeout(_),
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            IntakeError::from(IdError::Length(3)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            IntakeError::InvalidReport("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            IntakeError::RequestBody {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                message: "length limit exceeded".into()
            }
            .status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            IntakeError::NotFound {
                kind: RecordKind::Bug,
                id: ObjectId::new()
            }
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            IntakeError::from(StoreError::Corrupt("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_store_error_access() {
        let err = IntakeError::PartialFailure {
            issue_id: ObjectId::new(),
            signature: "abc".into(),
            source: StoreError::Timeout(Duration::from_secs(1)),
        };
        assert!(err.is_timeout());
        assert!(err.attachment_unknown());
        assert!(err.store_error().is_some());

        let err = IntakeError::PartialFailure {
            issue_id: ObjectId::new(),
            signature: "abc".into(),
            source: StoreError::Conflict("taken".into()),
        };
        assert!(!err.attachment_unknown());
        let err = IntakeError::from(StoreError::Timeout(Duration::from_secs(1)));
        assert!(err.is_timeout());
        assert!(!err.attachment_unknown());
        assert!(
            IntakeError::InvalidReport("bad".into())
                .store_error()
                .is_none()
        );
    }
}
