// S3 Drive Configuration Module
// Persistent drive configuration storage

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bulk::DEFAULT_COMPRESSION_LEVEL;
use crate::error::{DriveError, DriveResult};
use crate::identity::{CognitoIdentity, IdentityProvider, StaticIdentity, TemporaryCredentials};
use crate::namespace::NamespaceRoot;
use crate::providers::{S3Config, MAX_PRESIGN_SECS};
use crate::signed_urls::DEFAULT_SAFETY_MARGIN_SECS;
use crate::thumbnail::ImageThumbnailer;

/// Drive configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriveConfig {
    /// Bucket holding every user's namespace
    pub bucket: String,
    /// AWS region (e.g., us-east-1)
    pub region: String,
    /// S3-compatible endpoint (empty for AWS S3)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Use path-style addressing (for MinIO, etc.)
    #[serde(default)]
    pub path_style: bool,
    /// How the namespace root and credentials are obtained
    pub identity: IdentityConfig,
    #[serde(default)]
    pub links: LinkTtls,
    /// Listing page size hint (1-1000); the store default when unset
    #[serde(default)]
    pub list_page_size: Option<u32>,
    #[serde(default)]
    pub thumbnails: ThumbnailConfig,
    /// Deflate level for archives (0 = store only)
    #[serde(default = "default_compression_level")]
    pub compression_level: i64,
}

fn default_compression_level() -> i64 {
    DEFAULT_COMPRESSION_LEVEL
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            path_style: false,
            identity: IdentityConfig::Static {
                root: String::new(),
                access_key_id: String::new(),
                secret_access_key: None,
            },
            links: LinkTtls::default(),
            list_page_size: None,
            thumbnails: ThumbnailConfig::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityConfig {
    /// Fixed namespace root with long-lived keys
    Static {
        root: String,
        access_key_id: String,
        /// May be left out and supplied at runtime instead
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_access_key: Option<String>,
    },
    /// Cognito identity pool; the root is the caller's identity id
    Cognito {
        identity_pool_id: String,
        /// Region of the pool, defaults to the bucket region
        #[serde(default)]
        region: Option<String>,
        /// Login provider the ID token belongs to
        /// (e.g. `cognito-idp.us-east-1.amazonaws.com/us-east-1_abc`)
        #[serde(default)]
        login_provider: Option<String>,
    },
}

/// Secrets that are never written to the config file
#[derive(Debug, Default, Clone)]
pub struct IdentitySecrets {
    pub secret_access_key: Option<SecretString>,
    /// Session token paired with temporary static keys
    pub session_token: Option<SecretString>,
    pub id_token: Option<SecretString>,
}

/// Lifetimes of signed links, per call site
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkTtls {
    pub inline_secs: u64,
    pub attachment_secs: u64,
    pub preview_secs: u64,
    /// Upper bound for the cache safety margin
    pub safety_margin_secs: u64,
}

impl Default for LinkTtls {
    fn default() -> Self {
        Self {
            inline_secs: 60,
            attachment_secs: 300,
            preview_secs: 3600,
            safety_margin_secs: DEFAULT_SAFETY_MARGIN_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThumbnailConfig {
    pub enabled: bool,
    pub max_dimension: u32,
    pub quality: u8,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_dimension: 256,
            quality: 80,
        }
    }
}

impl ThumbnailConfig {
    pub fn thumbnailer(&self) -> Option<ImageThumbnailer> {
        self.enabled
            .then(|| ImageThumbnailer::new(self.max_dimension, self.quality))
    }
}

impl DriveConfig {
    /// Store connection for a set of credentials
    pub fn s3_config(&self, credentials: &TemporaryCredentials) -> S3Config {
        S3Config {
            endpoint: S3Config::normalize_endpoint(self.endpoint.as_deref()),
            region: self.region.clone(),
            access_key_id: credentials.access_key_id.clone(),
            secret_access_key: credentials.secret_access_key.clone(),
            session_token: credentials.session_token.clone(),
            bucket: self.bucket.clone(),
            path_style: self.path_style,
        }
    }

    /// Build the identity provider described by the config
    pub fn identity_provider(&self, secrets: IdentitySecrets) -> DriveResult<Arc<dyn IdentityProvider>> {
        match &self.identity {
            IdentityConfig::Static { root, access_key_id, secret_access_key } => {
                let secret = secrets
                    .secret_access_key
                    .or_else(|| secret_access_key.clone().map(SecretString::from))
                    .ok_or_else(|| DriveError::Config("No secret access key configured".to_string()))?;
                let mut identity = StaticIdentity::new(root.clone(), access_key_id.clone(), secret);
                if let Some(token) = secrets.session_token {
                    identity = identity.with_session_token(token);
                }
                Ok(Arc::new(identity))
            }
            IdentityConfig::Cognito { identity_pool_id, region, login_provider } => {
                let region = region.as_deref().unwrap_or(&self.region);
                let mut identity = CognitoIdentity::new(region, identity_pool_id.clone())?;
                match (login_provider, secrets.id_token) {
                    (Some(provider), Some(token)) => identity = identity.with_login(provider.clone(), token),
                    (Some(_), None) => {
                        return Err(DriveError::Config("An ID token is required to sign in".to_string()))
                    }
                    // Unauthenticated identities need no login
                    (None, _) => {}
                }
                Ok(Arc::new(identity))
            }
        }
    }
}

/// Get the configuration file path
pub fn get_config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")));
    config_dir.join("s3drive").join("config.json")
}

/// Load drive configuration from the default location
pub fn load_config() -> DriveConfig {
    load_config_from(&get_config_path())
}

/// Load drive configuration, falling back to defaults when missing or unreadable
pub fn load_config_from(config_path: &Path) -> DriveConfig {
    if config_path.exists() {
        match fs::read_to_string(config_path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse drive config: {}", e);
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read drive config: {}", e);
            }
        }
    }

    DriveConfig::default()
}

/// Save drive configuration to the default location
pub fn save_config(config: &DriveConfig) -> DriveResult<()> {
    save_config_to(config, &get_config_path())
}

pub fn save_config_to(config: &DriveConfig, config_path: &Path) -> DriveResult<()> {
    // Ensure parent directory exists
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| DriveError::Config(format!("Failed to serialize config: {}", e)))?;

    fs::write(config_path, content)?;
    tracing::info!("Drive config saved to {:?}", config_path);
    Ok(())
}

/// Validate configuration before connecting
pub fn validate_config(config: &DriveConfig) -> DriveResult<()> {
    if config.bucket.trim().is_empty() {
        return Err(DriveError::Config("Bucket name is required".to_string()));
    }
    if config.region.trim().is_empty() {
        return Err(DriveError::Config("Region is required".to_string()));
    }

    match &config.identity {
        IdentityConfig::Static { root, access_key_id, .. } => {
            NamespaceRoot::new(root.clone())
                .map_err(|e| DriveError::Config(format!("Invalid root: {}", e)))?;
            if access_key_id.is_empty() {
                return Err(DriveError::Config("Access key ID is required".to_string()));
            }
        }
        IdentityConfig::Cognito { identity_pool_id, .. } => {
            if identity_pool_id.is_empty() {
                return Err(DriveError::Config("Identity pool ID is required".to_string()));
            }
        }
    }

    let links = &config.links;
    if links.inline_secs == 0 || links.attachment_secs == 0 || links.preview_secs == 0 {
        return Err(DriveError::Config("Link lifetimes must be positive".to_string()));
    }
    if links.inline_secs.max(links.attachment_secs).max(links.preview_secs) > MAX_PRESIGN_SECS {
        return Err(DriveError::Config(format!(
            "Link lifetimes cannot exceed {} seconds (7 days)",
            MAX_PRESIGN_SECS
        )));
    }
    if let Some(page_size) = config.list_page_size {
        if !(1..=1000).contains(&page_size) {
            return Err(DriveError::Config("List page size must be between 1 and 1000".to_string()));
        }
    }
    if !(0..=9).contains(&config.compression_level) {
        return Err(DriveError::Config("Compression level must be between 0 and 9".to_string()));
    }
    if config.thumbnails.enabled
        && (config.thumbnails.max_dimension == 0 || !(1..=100).contains(&config.thumbnails.quality))
    {
        return Err(DriveError::Config("Invalid thumbnail settings".to_string()));
    }

    Ok(())
}
