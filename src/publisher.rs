//! Catalog publisher.
//!
//! Logs in to the catalog service and uploads a mapping payload. Every
//! publish authenticates afresh; no token outlives a single call.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CatalogSettings;
use crate::types::UploadPayload;

/// Error type for catalog calls.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Login failed or returned no token. The upload was not attempted.
    #[error("Catalog authentication failed: {0}")]
    AuthFailure(String),
    /// Upload failed in transport or was rejected by the catalog.
    #[error("Catalog upload failed{}: {message}", status_suffix(.status))]
    PublishFailure {
        /// HTTP status, absent for transport-level failures.
        status: Option<u16>,
        /// Failure detail or response body.
        message: String,
    },
}

impl PublishError {
    /// HTTP status of a rejected upload.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::PublishFailure { status, .. } => *status,
            Self::AuthFailure(_) => None,
        }
    }

    /// True when the upload never got an HTTP response.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::PublishFailure { status: None, .. })
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {s}")).unwrap_or_default()
}

/// Destination for built payloads.
#[async_trait]
pub trait CatalogPublisher: Send + Sync {
    /// Publish a payload and return the catalog's response body.
    async fn publish(&self, payload: &UploadPayload) -> Result<Value, PublishError>;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
}

/// Publishes to the catalog over HTTP.
///
/// `POST {endpoint}/auth/login` with `{email, password}`, then
/// `POST {endpoint}/mapping` with `Authorization: Bearer <accessToken>`.
pub struct HttpCatalogPublisher {
    client: reqwest::Client,
    endpoint: String,
    email: String,
    password: SecretString,
}

impl HttpCatalogPublisher {
    /// Create a publisher; every request is bounded by `settings.http_timeout`.
    pub fn new(settings: CatalogSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            email: settings.login_email,
            password: settings.login_password,
        })
    }

    /// Base URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Log in and return the access token.
    pub async fn authenticate(&self) -> Result<SecretString, PublishError> {
        let request = LoginRequest {
            email: &self.email,
            password: self.password.expose_secret(),
        };

        let response = self
            .client
            .post(format!("{}/auth/login", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| PublishError::AuthFailure(format!("login request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::AuthFailure(format!("login returned {status}: {body}")));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| PublishError::AuthFailure(format!("login response parse error: {e}")))?;

        match login.access_token {
            Some(token) if !token.is_empty() => Ok(SecretString::from(token)),
            _ => Err(PublishError::AuthFailure(
                "login response has no accessToken".to_string(),
            )),
        }
    }

    /// Upload a payload with an already obtained token.
    pub async fn upload(
        &self,
        token: &SecretString,
        payload: &UploadPayload,
    ) -> Result<Value, PublishError> {
        let response = self
            .client
            .post(format!("{}/mapping", self.endpoint))
            .bearer_auth(token.expose_secret())
            .json(payload)
            .send()
            .await
            .map_err(|e| PublishError::PublishFailure {
                status: None,
                message: if e.is_timeout() {
                    "upload timed out".to_string()
                } else {
                    format!("upload request failed: {e}")
                },
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| PublishError::PublishFailure {
            status: Some(status.as_u16()),
            message: format!("failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(PublishError::PublishFailure {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        Ok(parse_body(body))
    }
}

#[async_trait]
impl CatalogPublisher for HttpCatalogPublisher {
    async fn publish(&self, payload: &UploadPayload) -> Result<Value, PublishError> {
        let token = self.authenticate().await?;
        tracing::debug!(endpoint = %self.endpoint, "Authenticated with catalog");
        self.upload(&token, payload).await
    }
}

/// JSON bodies are returned parsed; anything else is returned as a string.
fn parse_body(body: String) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&body).unwrap_or(Value::String(body))
}
