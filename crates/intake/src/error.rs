//! Error taxonomy for intake operations.
//!
//! Every failure path returns a specific [`IntakeError`] variant. Callers map
//! them exhaustively (usually through [`IntakeError::kind`]) instead of
//! comparing messages.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Result alias used across the intake crates.
pub type Result<T, E = IntakeError> = std::result::Result<T, E>;

/// Input rejected before any storage work starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidInput {
    #[error("page must be >= 1, got {0}")]
    InvalidPage(i64),

    #[error("page size must be within 1..={max}, got {got}")]
    InvalidPageSize { got: i64, max: i64 },

    #[error("range start {start} is later than range end {end}")]
    InvalidRange {
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    },

    #[error("city is not allowed: {0:?}")]
    CityNotAllowed(String),

    #[error("item type is not allowed: {0:?}")]
    ItemTypeNotAllowed(String),
}

/// Closed set of failures surfaced by the service and by every store.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("site {site_id} not found")]
    SiteNotFound { site_id: Uuid },

    #[error("site {site_id} already has a reception in progress")]
    ActiveSessionExists { site_id: Uuid },

    #[error("site {site_id} has no reception in progress")]
    NoActiveSession { site_id: Uuid },

    #[error("reception {session_id} has no items to remove")]
    EmptySession { session_id: Uuid },

    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInput),

    #[error("role {role:?} may not perform this operation")]
    AccessDenied { role: String },

    /// Lost a race at the storage layer. Safe to retry.
    #[error("concurrent modification: {reason}")]
    Conflict { reason: String },

    #[error("operation did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("storage failure")]
    Infrastructure(#[source] anyhow::Error),
}

/// Fieldless mirror of [`IntakeError`] for exhaustive matching at the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SiteNotFound,
    ActiveSessionExists,
    NoActiveSession,
    EmptySession,
    InvalidInput,
    AccessDenied,
    Conflict,
    DeadlineExceeded,
    Infrastructure,
}

impl IntakeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SiteNotFound { .. } => ErrorKind::SiteNotFound,
            Self::ActiveSessionExists { .. } => ErrorKind::ActiveSessionExists,
            Self::NoActiveSession { .. } => ErrorKind::NoActiveSession,
            Self::EmptySession { .. } => ErrorKind::EmptySession,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            Self::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }

    /// Only lost races are worth retrying; every other failure is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Wrap an unexpected storage error.
    pub fn infrastructure(err: impl Into<anyhow::Error>) -> Self {
        Self::Infrastructure(err.into())
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflict_is_retryable() {
        let site_id = Uuid::new_v4();
        assert!(IntakeError::conflict("serialization failure").is_retryable());
        assert!(!IntakeError::ActiveSessionExists { site_id }.is_retryable());
        assert!(!IntakeError::infrastructure(anyhow::anyhow!("boom")).is_retryable());
        assert!(!IntakeError::DeadlineExceeded(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_invalid_input_converts_and_keeps_kind() {
        let err: IntakeError = InvalidInput::InvalidPage(0).into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(matches!(
            err,
            IntakeError::InvalidInput(InvalidInput::InvalidPage(0))
        ));
    }

    #[test]
    fn test_infrastructure_keeps_source_chain() {
        let err = IntakeError::infrastructure(anyhow::anyhow!("connection reset"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("connection reset"));
    }
}
