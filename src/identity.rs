//! Identity adapter
//!
//! Exchanges an authenticated session for short-lived store credentials and
//! the namespace root they are scoped to. `CognitoIdentity` talks to the
//! Cognito Identity JSON API (GetId + GetCredentialsForIdentity);
//! `StaticIdentity` hands out configured keys.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{DriveError, DriveResult};
use crate::namespace::NamespaceRoot;

/// Credentials are treated as expired this long before their deadline
const EXPIRY_BUFFER_SECS: i64 = 300;

/// Short-lived store credentials
#[derive(Debug, Clone)]
pub struct TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TemporaryCredentials {
    /// Check if credentials are expired (with 5 min buffer)
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at.timestamp() <= now.timestamp() + EXPIRY_BUFFER_SECS,
            None => false,
        }
    }
}

/// Result of a successful sign-in
#[derive(Debug, Clone)]
pub struct Identity {
    pub root: NamespaceRoot,
    pub credentials: TemporaryCredentials,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Obtain the namespace root and store credentials of the caller
    async fn sign_in(&self) -> DriveResult<Identity>;
}

/// Fixed root and long-lived keys (local stores, MinIO, tests)
pub struct StaticIdentity {
    root: String,
    access_key_id: String,
    secret_access_key: SecretString,
    session_token: Option<SecretString>,
}

impl StaticIdentity {
    pub fn new(
        root: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: SecretString,
    ) -> Self {
        Self {
            root: root.into(),
            access_key_id: access_key_id.into(),
            secret_access_key,
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: SecretString) -> Self {
        self.session_token = Some(token);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    fn name(&self) -> &str {
        "static"
    }

    async fn sign_in(&self) -> DriveResult<Identity> {
        let root = NamespaceRoot::new(self.root.clone())
            .map_err(|e| DriveError::Auth(e.to_string()))?;
        Ok(Identity {
            root,
            credentials: TemporaryCredentials {
                access_key_id: self.access_key_id.clone(),
                secret_access_key: self.secret_access_key.clone(),
                session_token: self.session_token.clone(),
                expires_at: None,
            },
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetIdResponse {
    identity_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CognitoCredentials {
    access_key_id: String,
    secret_key: String,
    session_token: Option<String>,
    /// Seconds since the epoch
    expiration: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetCredentialsResponse {
    identity_id: String,
    credentials: CognitoCredentials,
}

#[derive(Debug, Deserialize)]
struct CognitoErrorBody {
    #[serde(rename = "__type")]
    kind: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

/// Federated identity through a Cognito identity pool
pub struct CognitoIdentity {
    client: Client,
    endpoint: String,
    identity_pool_id: String,
    /// Identity provider name -> ID token
    logins: HashMap<String, SecretString>,
}

impl CognitoIdentity {
    pub fn new(region: &str, identity_pool_id: impl Into<String>) -> DriveResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| DriveError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("https://cognito-identity.{}.amazonaws.com/", region),
            identity_pool_id: identity_pool_id.into(),
            logins: HashMap::new(),
        })
    }

    /// Attach the ID token issued by a user pool or social provider
    pub fn with_login(mut self, provider: impl Into<String>, id_token: SecretString) -> Self {
        self.logins.insert(provider.into(), id_token);
        self
    }

    fn logins_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .logins
            .iter()
            .map(|(provider, token)| (provider.clone(), serde_json::Value::String(token.expose_secret().to_string())))
            .collect();
        serde_json::Value::Object(map)
    }

    async fn call<T: DeserializeOwned>(&self, target: &str, body: serde_json::Value) -> DriveResult<T> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/x-amz-json-1.1")
            .header("X-Amz-Target", format!("AWSCognitoIdentityService.{}", target))
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| DriveError::Auth(format!("{} request failed: {}", target, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DriveError::Auth(format!("{} response unreadable: {}", target, e)))?;

        if !status.is_success() {
            return Err(cognito_error(target, status.as_u16(), &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| DriveError::Auth(format!("{} returned an unexpected body: {}", target, e)))
    }
}

/// Map a Cognito error body (`{"__type": ..., "message": ...}`) to an auth failure
fn cognito_error(target: &str, status: u16, body: &str) -> DriveError {
    let parsed: Option<CognitoErrorBody> = serde_json::from_str(body).ok();
    let kind = parsed
        .as_ref()
        .and_then(|b| b.kind.as_deref())
        .map(|k| k.rsplit('#').next().unwrap_or(k).to_string())
        .unwrap_or_else(|| format!("HTTP {}", status));
    let message = parsed.and_then(|b| b.message).unwrap_or_default();
    DriveError::Auth(format!("{} failed: {} {}", target, kind, message).trim_end().to_string())
}

fn into_identity(response: GetCredentialsResponse) -> DriveResult<Identity> {
    let root = NamespaceRoot::new(response.identity_id)
        .map_err(|e| DriveError::Auth(e.to_string()))?;
    let creds = response.credentials;
    let expires_at = creds
        .expiration
        .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single());

    Ok(Identity {
        root,
        credentials: TemporaryCredentials {
            access_key_id: creds.access_key_id,
            secret_access_key: SecretString::from(creds.secret_key),
            session_token: creds.session_token.map(SecretString::from),
            expires_at,
        },
    })
}

#[async_trait]
impl IdentityProvider for CognitoIdentity {
    fn name(&self) -> &str {
        "cognito"
    }

    async fn sign_in(&self) -> DriveResult<Identity> {
        let logins = self.logins_json();

        let id: GetIdResponse = self
            .call(
                "GetId",
                serde_json::json!({
                    "IdentityPoolId": self.identity_pool_id,
                    "Logins": logins,
                }),
            )
            .await?;
        tracing::info!("[Identity] Resolved identity {}", id.identity_id);

        let response: GetCredentialsResponse = self
            .call(
                "GetCredentialsForIdentity",
                serde_json::json!({
                    "IdentityId": id.identity_id,
                    "Logins": logins,
                }),
            )
            .await?;

        into_identity(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_static_identity() {
        let identity = StaticIdentity::new("alice", "AKID", SecretString::from("secret".to_string()))
            .sign_in()
            .await
            .unwrap();
        assert_eq!(identity.root.as_str(), "alice");
        assert!(!identity.credentials.is_expired());
    }

    #[tokio::test]
    async fn test_static_identity_rejects_bad_root() {
        let err = StaticIdentity::new("a/b", "AKID", SecretString::from("s".to_string()))
            .sign_in()
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::Auth(_)));
    }

    #[test]
    fn test_expiry_buffer() {
        let now = Utc::now();
        let mut creds = TemporaryCredentials {
            access_key_id: "AKID".into(),
            secret_access_key: SecretString::from("s".to_string()),
            session_token: None,
            expires_at: Some(now + Duration::seconds(600)),
        };
        assert!(!creds.is_expired_at(now));
        creds.expires_at = Some(now + Duration::seconds(200));
        assert!(creds.is_expired_at(now));
    }

    #[test]
    fn test_parse_credentials_response() {
        let body = r#"{
            "IdentityId": "us-east-1:7f0c2d1e-1111-2222-3333-444455556666",
            "Credentials": {
                "AccessKeyId": "ASIAEXAMPLE",
                "SecretKey": "secret",
                "SessionToken": "token",
                "Expiration": 1.7e9
            }
        }"#;
        let response: GetCredentialsResponse = serde_json::from_str(body).unwrap();
        let identity = into_identity(response).unwrap();
        assert_eq!(identity.root.prefix(), "us-east-1:7f0c2d1e-1111-2222-3333-444455556666/");
        assert_eq!(identity.credentials.access_key_id, "ASIAEXAMPLE");
        assert_eq!(identity.credentials.expires_at.unwrap().timestamp(), 1_700_000_000);
        assert!(identity.credentials.session_token.is_some());
    }

    #[test]
    fn test_cognito_error_mapping() {
        let err = cognito_error(
            "GetId",
            400,
            r#"{"__type":"com.amazonaws#NotAuthorizedException","message":"Invalid login token."}"#,
        );
        assert_eq!(err.to_string(), "Authentication failed: GetId failed: NotAuthorizedException Invalid login token.");

        let err = cognito_error("GetId", 502, "<html>");
        assert_eq!(err.to_string(), "Authentication failed: GetId failed: HTTP 502");
    }

    #[test]
    fn test_logins_are_serialized() {
        let identity = CognitoIdentity::new("us-east-1", "us-east-1:pool")
            .unwrap()
            .with_login("accounts.google.com", SecretString::from("jwt".to_string()));
        assert_eq!(identity.logins_json()["accounts.google.com"], "jwt");
        assert_eq!(identity.endpoint, "https://cognito-identity.us-east-1.amazonaws.com/");
    }
}
