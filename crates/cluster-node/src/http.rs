//! REST client for orchestrator management APIs
//!
//! Thin wrapper over `reqwest` shared by the rancher2 and harvester drivers:
//! base URL handling, authentication headers, TLS trust and status mapping.

use crate::error::ClusterError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Statuses retried when throttle retry is enabled
const THROTTLE_STATUSES: &[u16] = &[429, 502, 503];

/// Authorization scheme
#[derive(Clone)]
pub enum Auth {
    None,
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// `Authorization: Basic base64(<token>)`, token is `user:password`
    Basic(String),
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Auth::Basic(_) => f.write_str("Basic(<redacted>)"),
        }
    }
}

/// TLS trust settings
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub insecure: bool,
    /// CA bundle, PEM text or base64-encoded PEM
    pub ca_data: String,
}

/// Decode CA data given either as PEM or as base64-encoded PEM
///
/// # Errors
///
/// Fails if the data is neither PEM nor valid base64.
pub fn decode_pem(data: &str) -> Result<Vec<u8>, ClusterError> {
    let trimmed = data.trim();
    if trimmed.starts_with("-----BEGIN") {
        return Ok(trimmed.as_bytes().to_vec());
    }
    STANDARD
        .decode(trimmed)
        .map_err(|e| ClusterError::Connect(format!("invalid CA data: {e}")))
}

/// HTTP client wrapper with authentication
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    auth: Auth,
    throttle_attempts: u32,
    throttle_wait: Duration,
}

impl RestClient {
    /// Create a client rooted at `base_url`
    ///
    /// # Errors
    ///
    /// Fails if the CA bundle is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, auth: Auth, tls: &TlsOptions) -> Result<Self, ClusterError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(60))
            .danger_accept_invalid_certs(tls.insecure);
        if !tls.ca_data.is_empty() {
            let pem = decode_pem(&tls.ca_data)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| ClusterError::Connect(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            throttle_attempts: 1,
            throttle_wait: Duration::ZERO,
        })
    }

    /// Retry 429/502/503 responses, sleeping `wait * attempt` between tries
    #[must_use]
    pub fn with_throttle_retry(mut self, attempts: u32, wait: Duration) -> Self {
        self.throttle_attempts = attempts.max(1);
        self.throttle_wait = wait;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URLs pass through, paths are joined to the base URL
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<String, ClusterError> {
        let url = self.build_url(path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("{} {}", method, url);
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("Accept", "application/json");
            request = match &self.auth {
                Auth::None => request,
                Auth::Bearer(token) => request.bearer_auth(token),
                Auth::Basic(token) => {
                    request.header("Authorization", format!("Basic {}", STANDARD.encode(token)))
                }
            };
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if status.is_success() {
                return Ok(text);
            }
            if THROTTLE_STATUSES.contains(&status.as_u16()) && attempt < self.throttle_attempts {
                warn!("{} {} returned {}, retrying (attempt {}/{})", method, path, status, attempt, self.throttle_attempts);
                sleep(self.throttle_wait * attempt).await;
                continue;
            }
            return Err(status_error(&method, path, status, &text));
        }
    }

    /// GET returning the raw body
    ///
    /// # Errors
    ///
    /// Returns `NotFound` on 404 and `Api` on any other failure status.
    pub async fn get_text(&self, path: &str) -> Result<String, ClusterError> {
        self.send(Method::GET, path, None).await
    }

    /// GET decoding a JSON body
    ///
    /// # Errors
    ///
    /// Fails on a failure status or an undecodable body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClusterError> {
        let text = self.send(Method::GET, path, None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// POST a JSON body, ignoring the response body
    ///
    /// # Errors
    ///
    /// Fails on a failure status.
    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<(), ClusterError> {
        self.send(Method::POST, path, Some(body)).await.map(|_| ())
    }

    /// PUT a JSON body and decode the response
    ///
    /// # Errors
    ///
    /// Fails on a failure status or an undecodable body.
    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: &serde_json::Value) -> Result<T, ClusterError> {
        let text = self.send(Method::PUT, path, Some(body)).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// DELETE a resource
    ///
    /// # Errors
    ///
    /// Fails on a failure status.
    pub async fn delete(&self, path: &str) -> Result<(), ClusterError> {
        self.send(Method::DELETE, path, None).await.map(|_| ())
    }
}

fn status_error(method: &Method, path: &str, status: StatusCode, body: &str) -> ClusterError {
    match status {
        StatusCode::NOT_FOUND => ClusterError::NotFound(format!("{method} {path}: {body}")),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
            ClusterError::Api(format!("{method} {path}: access denied ({status})"))
        }
        _ => ClusterError::Api(format!("{method} {path} failed: {status} - {body}")),
    }
}
