//! Caller-facing error taxonomy.
//!
//! Collaborator errors (`LedgerError`, `StoreError`, `QueueError`, ...) live
//! next to their ports and are folded into [`PipelineError`] at the dispatcher
//! boundary. Per-URL failures are never errors here: they are recorded as
//! [`UrlStatus`](super::UrlStatus) tags.

use serde::{Deserialize, Serialize};

use crate::ports::{AuthError, LedgerError, QueueError, StoreError};

/// Error code surfaced to the caller, one per failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthenticated,
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    ResourceExhausted,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::NotFound => "not_found",
            ErrorCode::FailedPrecondition => "failed_precondition",
            ErrorCode::ResourceExhausted => "resource_exhausted",
            ErrorCode::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronous pipeline failure, mapped 1:1 onto an [`ErrorCode`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("Insufficient credits. This action requires {required} credits, but you have {available}.")]
    ResourceExhausted { required: u64, available: u64 },

    #[error("{0}")]
    Internal(String),
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::Unauthenticated(_) => ErrorCode::Unauthenticated,
            PipelineError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            PipelineError::NotFound(_) => ErrorCode::NotFound,
            PipelineError::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            PipelineError::ResourceExhausted { .. } => ErrorCode::ResourceExhausted,
            PipelineError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => PipelineError::NotFound(what),
            other => PipelineError::Internal(other.to_string()),
        }
    }
}

impl From<QueueError> for PipelineError {
    fn from(err: QueueError) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

impl From<LedgerError> for PipelineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                required,
                available,
            } => PipelineError::ResourceExhausted {
                required,
                available,
            },
            LedgerError::AccountNotFound(owner) => {
                PipelineError::NotFound(format!("Account record not found for {owner}."))
            }
            LedgerError::Storage(msg) => {
                PipelineError::Internal(format!("Failed to process credits: {msg}"))
            }
        }
    }
}

impl From<AuthError> for PipelineError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingRefreshToken | AuthError::InvalidGrant(_) => {
                PipelineError::Unauthenticated(err.user_message().to_string())
            }
            AuthError::InvalidCredential(_) => {
                PipelineError::FailedPrecondition(err.user_message().to_string())
            }
            AuthError::Transient(_) | AuthError::Client(_) => {
                PipelineError::Internal(err.user_message().to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OwnerId;
    use rstest::rstest;

    #[rstest]
    #[case::insufficient(
        LedgerError::InsufficientFunds { required: 10, available: 5 },
        ErrorCode::ResourceExhausted
    )]
    #[case::missing_account(LedgerError::AccountNotFound(OwnerId::new("u")), ErrorCode::NotFound)]
    #[case::storage(LedgerError::Storage("down".into()), ErrorCode::Internal)]
    fn ledger_errors_map_to_codes(#[case] err: LedgerError, #[case] code: ErrorCode) {
        assert_eq!(PipelineError::from(err).code(), code);
    }

    #[rstest]
    #[case::invalid_grant(AuthError::InvalidGrant("revoked".into()), ErrorCode::Unauthenticated)]
    #[case::no_refresh_token(AuthError::MissingRefreshToken, ErrorCode::Unauthenticated)]
    #[case::transient(AuthError::Transient("503".into()), ErrorCode::Internal)]
    #[case::incomplete(AuthError::InvalidCredential("no token".into()), ErrorCode::FailedPrecondition)]
    fn auth_errors_map_to_codes(#[case] err: AuthError, #[case] code: ErrorCode) {
        assert_eq!(PipelineError::from(err).code(), code);
    }

    #[test]
    fn resource_exhausted_message_names_both_amounts() {
        let err = PipelineError::ResourceExhausted {
            required: 10,
            available: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("requires 10"));
        assert!(msg.contains("have 5"));
    }

    #[test]
    fn error_code_serializes_snake_case() {
        let s = serde_json::to_string(&ErrorCode::FailedPrecondition).unwrap();
        assert_eq!(s, "\"failed_precondition\"");
    }
}
