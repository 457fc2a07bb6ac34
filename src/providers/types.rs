//! Shared types for object store providers
//!
//! Typed request/response structs for every store operation the drive needs,
//! the S3 connection configuration, and the provider error type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key separator used by the store to emulate hierarchy
pub const DELIMITER: &str = "/";

/// Longest lifetime S3 accepts for a pre-signed URL (7 days)
pub const MAX_PRESIGN_SECS: u64 = 604_800;

/// Progress callback invoked with `(loaded_bytes, total_bytes)`
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// S3-specific configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3-compatible endpoint URL (empty for AWS S3)
    pub endpoint: Option<String>,
    /// AWS region (e.g., us-east-1)
    pub region: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key (SecretString for memory zeroization)
    pub secret_access_key: secrecy::SecretString,
    /// Session token issued alongside temporary credentials
    pub session_token: Option<secrecy::SecretString>,
    /// Bucket name
    pub bucket: String,
    /// Use path-style addressing (for MinIO, etc.)
    pub path_style: bool,
}

impl S3Config {
    /// Normalize a user-supplied endpoint: `None` for AWS, otherwise a URL with a scheme
    pub fn normalize_endpoint(host: Option<&str>) -> Option<String> {
        let host = host.map(str::trim).unwrap_or("");
        if host.is_empty() || host == "s3.amazonaws.com" {
            None
        } else if host.starts_with("http://") || host.starts_with("https://") {
            Some(host.to_string())
        } else {
            Some(format!("https://{}", host))
        }
    }
}

/// Parameters of a `ListObjectsV2` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsRequest {
    /// Key prefix to list under
    pub prefix: String,
    /// Group keys by this delimiter (single-level listing) when set
    pub delimiter: Option<String>,
    /// Cursor returned by the previous page
    pub continuation_token: Option<String>,
    /// Page size hint; the store may return fewer
    pub max_keys: Option<u32>,
}

impl ListObjectsRequest {
    /// Single-level listing of the immediate children of `prefix`
    pub fn children(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: Some(DELIMITER.to_string()),
            ..Default::default()
        }
    }

    /// Flat listing of every key under `prefix`
    pub fn recursive(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn with_continuation(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }

    pub fn with_max_keys(mut self, max_keys: Option<u32>) -> Self {
        self.max_keys = max_keys;
        self
    }
}

/// One object as reported by a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsPage {
    /// Folder-level groupings (full prefixes, ending with the delimiter)
    pub common_prefixes: Vec<String>,
    /// Leaf objects
    pub objects: Vec<ObjectSummary>,
    /// Whether more pages follow
    pub is_truncated: bool,
    /// Cursor for the next page
    pub next_continuation_token: Option<String>,
}

impl ListObjectsPage {
    /// Cursor to follow, if the store reported more pages
    pub fn next_token(&self) -> Option<&str> {
        if self.is_truncated {
            self.next_continuation_token.as_deref()
        } else {
            None
        }
    }
}

/// A key the store refused to delete in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub key: String,
    pub code: String,
    pub message: String,
}

/// Result of a batch delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteObjectsOutcome {
    /// Number of keys removed
    pub deleted: usize,
    /// Keys the store reported as failed
    pub errors: Vec<DeleteFailure>,
}

impl DeleteObjectsOutcome {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parameters of a pre-signed GET URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignRequest {
    pub key: String,
    pub expires_in_secs: u64,
    /// `response-content-disposition` override (e.g. attachment with filename)
    pub response_content_disposition: Option<String>,
}

impl PresignRequest {
    pub fn get(key: impl Into<String>, expires_in_secs: u64) -> Self {
        Self {
            key: key.into(),
            expires_in_secs,
            response_content_disposition: None,
        }
    }

    pub fn with_disposition(mut self, disposition: impl Into<String>) -> Self {
        self.response_content_disposition = Some(disposition.into());
        self
    }
}

/// Provider error type
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the failure means the session's credentials are no longer usable
    pub fn is_auth(&self) -> bool {
        matches!(self, StoreError::AuthenticationFailed(_))
    }

    /// Check if this error is recoverable (caller may retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StoreError::NetworkError(_) | StoreError::ServerError(_) | StoreError::TransferFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(S3Config::normalize_endpoint(None), None);
        assert_eq!(S3Config::normalize_endpoint(Some("s3.amazonaws.com")), None);
        assert_eq!(
            S3Config::normalize_endpoint(Some("minio.local:9000")),
            Some("https://minio.local:9000".to_string())
        );
        assert_eq!(
            S3Config::normalize_endpoint(Some(" http://localhost:9000 ")),
            Some("http://localhost:9000".to_string())
        );
    }

    #[test]
    fn test_next_token_requires_truncation() {
        let page = ListObjectsPage {
            is_truncated: false,
            next_continuation_token: Some("abc".to_string()),
            ..Default::default()
        };
        assert_eq!(page.next_token(), None);

        let page = ListObjectsPage {
            is_truncated: true,
            next_continuation_token: Some("abc".to_string()),
            ..Default::default()
        };
        assert_eq!(page.next_token(), Some("abc"));
    }

    #[test]
    fn test_list_request_builders() {
        let req = ListObjectsRequest::children("alice/docs/");
        assert_eq!(req.delimiter.as_deref(), Some("/"));
        let req = ListObjectsRequest::recursive("alice/docs/")
            .with_continuation(Some("t".to_string()))
            .with_max_keys(Some(10));
        assert_eq!(req.delimiter, None);
        assert_eq!(req.continuation_token.as_deref(), Some("t"));
        assert_eq!(req.max_keys, Some(10));
    }

    #[test]
    fn test_error_classification() {
        assert!(StoreError::AuthenticationFailed("expired".into()).is_auth());
        assert!(!StoreError::NotFound("x".into()).is_auth());
        assert!(StoreError::NetworkError("reset".into()).is_recoverable());
        assert!(!StoreError::PermissionDenied("x".into()).is_recoverable());
    }
}
