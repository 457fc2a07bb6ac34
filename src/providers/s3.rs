//! S3 Storage Provider
//!
//! Implementation of the ObjectStore trait for Amazon S3 and S3-compatible storage.
//! Supports AWS S3, MinIO, Backblaze B2, DigitalOcean Spaces, Cloudflare R2, Wasabi, etc.
//!
//! This implementation uses reqwest with AWS Signature Version 4 for authentication,
//! avoiding the heavyweight aws-sdk-s3 dependency for better compile times and smaller binaries.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use secrecy::ExposeSecret;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{
    DeleteFailure, DeleteObjectsOutcome, ListObjectsPage, ListObjectsRequest, ObjectStore,
    ObjectSummary, PresignRequest, ProgressCallback, S3Config, StoreError, MAX_PRESIGN_SECS,
};

/// Maximum keys accepted by a single DeleteObjects call
const MAX_DELETE_BATCH: usize = 1000;

/// Chunk size used to report upload progress
const UPLOAD_CHUNK_SIZE: usize = 256 * 1024;

type HmacSha256 = hmac::Hmac<sha2::Sha256>;

/// S3 Storage Provider
pub struct S3Provider {
    config: S3Config,
    client: Client,
}

impl S3Provider {
    /// Create a new S3 provider with the given configuration
    pub fn new(config: S3Config) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| StoreError::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Get the S3 endpoint URL
    fn endpoint(&self) -> String {
        if let Some(ref endpoint) = self.config.endpoint {
            endpoint.trim_end_matches('/').to_string()
        } else {
            format!("https://s3.{}.amazonaws.com", self.config.region)
        }
    }

    /// Build URL for S3 operations. The key is URI-encoded segment by segment.
    fn build_url(&self, key: &str) -> String {
        let endpoint = self.endpoint();
        let key = uri_encode_path(key.trim_start_matches('/'));

        if self.config.path_style {
            // Path-style: https://endpoint/bucket/key
            if key.is_empty() {
                format!("{}/{}", endpoint, self.config.bucket)
            } else {
                format!("{}/{}/{}", endpoint, self.config.bucket, key)
            }
        } else {
            // Virtual-hosted style: https://bucket.endpoint/key
            let endpoint_without_scheme = endpoint
                .replace("https://", "")
                .replace("http://", "");
            let scheme = if endpoint.starts_with("http://") { "http" } else { "https" };

            if key.is_empty() {
                format!("{}://{}.{}", scheme, self.config.bucket, endpoint_without_scheme)
            } else {
                format!("{}://{}.{}/{}", scheme, self.config.bucket, endpoint_without_scheme, key)
            }
        }
    }

    /// Derive the SigV4 signing key for a given date
    fn signing_key(&self, date_stamp: &str) -> Vec<u8> {
        let secret = format!("AWS4{}", self.config.secret_access_key.expose_secret());
        let k_date = hmac_sha256(secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.config.region.as_bytes());
        let k_service = hmac_sha256(&k_region, b"s3");
        hmac_sha256(&k_service, b"aws4_request")
    }

    /// Sign a request using AWS Signature Version 4.
    ///
    /// `headers` receives the `x-amz-*` and `host` headers that were signed.
    fn sign_request(
        &self,
        method: &str,
        url: &str,
        canonical_query: &str,
        headers: &mut BTreeMap<String, String>,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        headers.insert("x-amz-date".to_string(), amz_date.clone());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.to_string());
        if let Some(ref token) = self.config.session_token {
            headers.insert("x-amz-security-token".to_string(), token.expose_secret().to_string());
        }

        let (host, path) = host_and_path(url)?;
        headers.insert("host".to_string(), host);

        // BTreeMap keeps header names sorted, as the canonical form requires
        let signed_headers_str = headers.keys().cloned().collect::<Vec<_>>().join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query, canonical_headers, signed_headers_str, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let signature = hex::encode(hmac_sha256(&self.signing_key(&date_stamp), string_to_sign.as_bytes()));

        Ok(format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.config.access_key_id, credential_scope, signed_headers_str, signature
        ))
    }

    /// Make a signed request to S3
    async fn s3_request(
        &self,
        method: Method,
        key: &str,
        query_params: &[(&str, &str)],
        body: Option<reqwest::Body>,
        payload_hash: &str,
        extra_headers: &[(&str, String)],
    ) -> Result<reqwest::Response, StoreError> {
        let base_url = self.build_url(key);
        let canonical_query = canonical_query_string(query_params);
        let url = if canonical_query.is_empty() {
            base_url.clone()
        } else {
            format!("{}?{}", base_url, canonical_query)
        };

        let mut headers: BTreeMap<String, String> = extra_headers
            .iter()
            .map(|(name, value)| (name.to_lowercase(), value.clone()))
            .collect();
        let authorization = self.sign_request(
            method.as_str(),
            &base_url,
            &canonical_query,
            &mut headers,
            payload_hash,
            Utc::now(),
        )?;

        let mut request = self.client.request(method, &url);
        for (name, value) in headers.iter().filter(|(name, _)| name.as_str() != "host") {
            request = request.header(name.as_str(), value.as_str());
        }
        request = request.header("Authorization", authorization);

        if let Some(body) = body {
            request = request.body(body);
        }

        request.send().await
            .map_err(|e| StoreError::NetworkError(e.to_string()))
    }

    /// Convert a non-success response into a typed error
    async fn error_from_response(response: reqwest::Response, context: &str) -> StoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        status_error(status, &body, context)
    }

    /// Build a pre-signed URL valid from `now` for the requested lifetime
    fn presign_at(&self, request: &PresignRequest, now: DateTime<Utc>) -> Result<String, StoreError> {
        let expires = request.expires_in_secs.clamp(1, MAX_PRESIGN_SECS).to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let credential = format!("{}/{}", self.config.access_key_id, credential_scope);

        let url = self.build_url(&request.key);
        let (host, path) = host_and_path(&url)?;

        let token = self
            .config
            .session_token
            .as_ref()
            .map(|t| t.expose_secret().to_string());

        let mut params: Vec<(&str, &str)> = vec![
            ("X-Amz-Algorithm", "AWS4-HMAC-SHA256"),
            ("X-Amz-Credential", &credential),
            ("X-Amz-Date", &amz_date),
            ("X-Amz-Expires", &expires),
            ("X-Amz-SignedHeaders", "host"),
        ];
        if let Some(ref token) = token {
            params.push(("X-Amz-Security-Token", token));
        }
        if let Some(ref disposition) = request.response_content_disposition {
            params.push(("response-content-disposition", disposition));
        }
        let query = canonical_query_string(&params);

        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            path,
            query,
            host
        );

        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            sha256_hex(canonical_request.as_bytes())
        );
        let signature = hex::encode(hmac_sha256(&self.signing_key(&date_stamp), string_to_sign.as_bytes()));

        Ok(format!("{}?{}&X-Amz-Signature={}", url, query, signature))
    }
}

#[async_trait]
impl ObjectStore for S3Provider {
    fn display_name(&self) -> String {
        if self.config.endpoint.is_some() {
            format!("s3://{} (custom)", self.config.bucket)
        } else {
            format!("s3://{} ({})", self.config.bucket, self.config.region)
        }
    }

    async fn list_objects(&self, request: &ListObjectsRequest) -> Result<ListObjectsPage, StoreError> {
        let max_keys = request.max_keys.map(|n| n.to_string());
        let mut params: Vec<(&str, &str)> = vec![("list-type", "2"), ("prefix", &request.prefix)];
        if let Some(ref delimiter) = request.delimiter {
            params.push(("delimiter", delimiter));
        }
        if let Some(ref token) = request.continuation_token {
            params.push(("continuation-token", token));
        }
        if let Some(ref max_keys) = max_keys {
            params.push(("max-keys", max_keys));
        }

        tracing::debug!("[S3] Listing prefix '{}' (token: {:?})", request.prefix, request.continuation_token);
        let response = self.s3_request(Method::GET, "", &params, None, EMPTY_SHA256, &[]).await?;

        match response.status() {
            StatusCode::OK => {
                let xml = response.text().await
                    .map_err(|e| StoreError::ParseError(e.to_string()))?;
                parse_list_response(&xml)
            }
            _ => Err(Self::error_from_response(response, "List").await),
        }
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        let payload_hash = sha256_hex(&body);
        let mut headers = Vec::new();
        if let Some(content_type) = content_type {
            headers.push(("content-type", content_type.to_string()));
        }

        let response = self
            .s3_request(Method::PUT, key, &[], Some(body.into()), &payload_hash, &headers)
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            _ => Err(Self::error_from_response(response, "Upload").await),
        }
    }

    async fn upload_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<(), StoreError> {
        let Some(progress) = on_progress else {
            return self.put_object(key, body, content_type).await;
        };

        let total = body.len() as u64;
        let payload_hash = sha256_hex(&body);
        let mut headers = vec![("content-length", total.to_string())];
        if let Some(content_type) = content_type {
            headers.push(("content-type", content_type.to_string()));
        }

        let progress: Arc<ProgressCallback> = Arc::new(progress);
        let loaded = Arc::new(AtomicU64::new(0));
        let chunks: Vec<Vec<u8>> = body.chunks(UPLOAD_CHUNK_SIZE).map(|c| c.to_vec()).collect();
        let stream = futures_util::stream::iter(chunks.into_iter().map({
            let progress = progress.clone();
            let loaded = loaded.clone();
            move |chunk| {
                let done = loaded.fetch_add(chunk.len() as u64, Ordering::Relaxed) + chunk.len() as u64;
                progress(done, total);
                Ok::<_, std::io::Error>(chunk)
            }
        }));

        let response = self
            .s3_request(
                Method::PUT,
                key,
                &[],
                Some(reqwest::Body::wrap_stream(stream)),
                &payload_hash,
                &headers,
            )
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => {
                if total == 0 {
                    progress(0, 0);
                }
                Ok(())
            }
            _ => Err(Self::error_from_response(response, "Upload").await),
        }
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let response = self.s3_request(Method::GET, key, &[], None, EMPTY_SHA256, &[]).await?;

        match response.status() {
            StatusCode::OK => {
                let bytes = response.bytes().await
                    .map_err(|e| StoreError::TransferFailed(e.to_string()))?;
                Ok(bytes.to_vec())
            }
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(key.to_string())),
            _ => Err(Self::error_from_response(response, "Download").await),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        let response = self.s3_request(Method::DELETE, key, &[], None, EMPTY_SHA256, &[]).await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::ACCEPTED | StatusCode::NOT_FOUND => Ok(()),
            _ => Err(Self::error_from_response(response, "Delete").await),
        }
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<DeleteObjectsOutcome, StoreError> {
        let mut outcome = DeleteObjectsOutcome::default();

        for batch in keys.chunks(MAX_DELETE_BATCH) {
            let body = build_delete_body(batch);
            let payload_hash = sha256_hex(body.as_bytes());
            let content_md5 = {
                use md5::{Digest, Md5};
                base64::engine::general_purpose::STANDARD.encode(Md5::digest(body.as_bytes()))
            };
            let headers = [
                ("content-md5", content_md5),
                ("content-type", "application/xml".to_string()),
            ];

            let response = self
                .s3_request(Method::POST, "", &[("delete", "")], Some(body.into_bytes().into()), &payload_hash, &headers)
                .await?;

            match response.status() {
                StatusCode::OK => {
                    let xml = response.text().await
                        .map_err(|e| StoreError::ParseError(e.to_string()))?;
                    let errors = parse_delete_errors(&xml)?;
                    outcome.deleted += deleted_count(batch.len(), &errors);
                    outcome.errors.extend(errors);
                }
                _ => return Err(Self::error_from_response(response, "Batch delete").await),
            }
        }

        Ok(outcome)
    }

    async fn presign(&self, request: &PresignRequest) -> Result<String, StoreError> {
        self.presign_at(request, Utc::now())
    }
}

/// SHA-256 of the empty payload
const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    use hmac::Mac;
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}

/// URI-encode every path segment, keeping the separators
fn uri_encode_path(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Canonical query string: names and values URI-encoded, sorted by name
fn canonical_query_string(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (urlencoding::encode(k).into_owned(), urlencoding::encode(v).into_owned()))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Host header value (with non-default port) and canonical path of a URL
fn host_and_path(url: &str) -> Result<(String, String), StoreError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
    let host = parsed.host_str().unwrap_or("");
    let host = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    Ok((host, parsed.path().to_string()))
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Extract content from an XML tag
fn extract_xml_tag(xml: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"<{}(?:\s[^>]*)?>([^<]*)</{}>", tag, tag);
    let re = regex::Regex::new(&pattern).ok()?;
    let text = re.captures(xml)?.get(1)?.as_str().trim();
    if text.is_empty() {
        None
    } else {
        Some(xml_unescape(text))
    }
}

/// Parse S3 ListObjectsV2 XML response
fn parse_list_response(xml: &str) -> Result<ListObjectsPage, StoreError> {
    let mut page = ListObjectsPage::default();

    let prefix_pattern = regex::Regex::new(r"(?s)<CommonPrefixes>\s*<Prefix>([^<]*)</Prefix>\s*</CommonPrefixes>")
        .map_err(|e| StoreError::ParseError(e.to_string()))?;
    for cap in prefix_pattern.captures_iter(xml) {
        if let Some(prefix_match) = cap.get(1) {
            page.common_prefixes.push(xml_unescape(prefix_match.as_str()));
        }
    }

    let contents_pattern = regex::Regex::new(r"(?s)<Contents>(.*?)</Contents>")
        .map_err(|e| StoreError::ParseError(e.to_string()))?;
    for cap in contents_pattern.captures_iter(xml) {
        let Some(content) = cap.get(1) else { continue };
        let content_str = content.as_str();

        let Some(key) = extract_xml_tag(content_str, "Key") else { continue };
        let size: u64 = extract_xml_tag(content_str, "Size")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let last_modified = extract_xml_tag(content_str, "LastModified")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        page.objects.push(ObjectSummary { key, size, last_modified });
    }

    // Strip nested elements before reading top-level flags
    let top_level = contents_pattern.replace_all(xml, "");
    page.is_truncated = extract_xml_tag(&top_level, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    page.next_continuation_token = extract_xml_tag(&top_level, "NextContinuationToken");

    Ok(page)
}

/// Build the XML body of a quiet DeleteObjects request
fn build_delete_body(keys: &[String]) -> String {
    let mut body = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Delete><Quiet>true</Quiet>"#);
    for key in keys {
        body.push_str("<Object><Key>");
        body.push_str(&xml_escape(key));
        body.push_str("</Key></Object>");
    }
    body.push_str("</Delete>");
    body
}

/// Keys of a batch that were deleted; a response may list more errors than keys sent
fn deleted_count(sent: usize, errors: &[DeleteFailure]) -> usize {
    sent.saturating_sub(errors.len())
}

/// Parse the `<Error>` elements of a DeleteObjects result
fn parse_delete_errors(xml: &str) -> Result<Vec<DeleteFailure>, StoreError> {
    let error_pattern = regex::Regex::new(r"(?s)<Error>(.*?)</Error>")
        .map_err(|e| StoreError::ParseError(e.to_string()))?;

    Ok(error_pattern
        .captures_iter(xml)
        .filter_map(|cap| cap.get(1))
        .map(|m| {
            let part = m.as_str();
            DeleteFailure {
                key: extract_xml_tag(part, "Key").unwrap_or_default(),
                code: extract_xml_tag(part, "Code").unwrap_or_default(),
                message: extract_xml_tag(part, "Message").unwrap_or_default(),
            }
        })
        .collect())
}

/// Map an S3 error status and body to a typed error
fn status_error(status: StatusCode, body: &str, context: &str) -> StoreError {
    let code = extract_xml_tag(body, "Code").unwrap_or_default();
    let message = extract_xml_tag(body, "Message").unwrap_or_else(|| status.to_string());
    let detail = if code.is_empty() {
        format!("{} failed ({}): {}", context, status, message)
    } else {
        format!("{} failed ({} {}): {}", context, status, code, message)
    };

    match status {
        StatusCode::UNAUTHORIZED => StoreError::AuthenticationFailed(detail),
        StatusCode::FORBIDDEN => match code.as_str() {
            "ExpiredToken" | "InvalidAccessKeyId" | "InvalidToken" | "SignatureDoesNotMatch"
            | "TokenRefreshRequired" => StoreError::AuthenticationFailed(detail),
            _ => StoreError::PermissionDenied(detail),
        },
        StatusCode::NOT_FOUND => StoreError::NotFound(detail),
        _ => StoreError::ServerError(detail),
    }
}
