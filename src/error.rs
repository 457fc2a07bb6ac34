//! Drive error taxonomy
//!
//! Every session operation returns `DriveError`. Store-level failures are
//! carried as `Transport`, except credential failures which surface as `Auth`
//! so the front end can send the user back to sign-in.

use thiserror::Error;

use crate::providers::StoreError;

#[derive(Error, Debug)]
pub enum DriveError {
    /// Sign-in failed or the session's credentials were rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error(transparent)]
    Transport(StoreError),

    /// A multi-step operation stopped after applying part of its work
    #[error("{message} ({succeeded} done, {failed} failed)")]
    PartialBulkFailure {
        succeeded: usize,
        failed: usize,
        message: String,
    },

    #[error("Nothing selected")]
    EmptySelection,

    /// The operation had nothing to act on
    #[error("{0}")]
    NoOp(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for DriveError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AuthenticationFailed(msg) => DriveError::Auth(msg),
            other => DriveError::Transport(other),
        }
    }
}

impl From<zip::result::ZipError> for DriveError {
    fn from(err: zip::result::ZipError) -> Self {
        DriveError::Archive(err.to_string())
    }
}

impl DriveError {
    /// Whether the session can no longer be used and must sign in again
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriveError::Auth(_))
    }
}

pub type DriveResult<T> = Result<T, DriveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_auth_maps_to_auth() {
        let err: DriveError = StoreError::AuthenticationFailed("ExpiredToken".into()).into();
        assert!(matches!(err, DriveError::Auth(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_store_errors_map_to_transport() {
        let err: DriveError = StoreError::NetworkError("connection reset".into()).into();
        assert!(matches!(err, DriveError::Transport(StoreError::NetworkError(_))));
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Network error: connection reset");
    }

    #[test]
    fn test_partial_failure_message() {
        let err = DriveError::PartialBulkFailure {
            succeeded: 1000,
            failed: 3,
            message: "Delete of 'docs' stopped".into(),
        };
        assert_eq!(err.to_string(), "Delete of 'docs' stopped (1000 done, 3 failed)");
    }
}
