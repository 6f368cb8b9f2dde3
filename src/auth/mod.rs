//! Azure AD Authentication module
//!
//! Implements the OAuth2 client credentials grant used for server-to-server
//! access to the Dynamics 365 Web API. Every call to
//! [`TokenProvider::acquire_token`] performs a full credential exchange; no
//! token is kept between calls.

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Identity authority used when none is configured
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Per-call timeout used when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Token request failed ({status}): {body}")]
    TokenRequestFailed { status: StatusCode, body: String },

    #[error("HTTP error: {0}")]
    HttpError(#[source] reqwest::Error),

    #[error("Token request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("Token parse error: {0}")]
    ParseError(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AuthError::Timeout(err)
        } else {
            AuthError::HttpError(err)
        }
    }
}

/// App registration credentials for the client credentials grant.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// Resource the token is requested for, e.g. `https://org.crm.dynamics.com`
    pub resource_uri: String,
}

impl Credentials {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        resource_uri: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            resource_uri: resource_uri.into(),
        }
    }

    /// Reject blank fields before any network traffic happens
    fn validate(&self) -> Result<(), AuthError> {
        let missing: Vec<&str> = [
            ("tenant_id", &self.tenant_id),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("resource_uri", &self.resource_uri),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthError::MissingCredentials(missing.join(", ")))
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("resource_uri", &self.resource_uri)
            .finish()
    }
}

/// Bearer token returned by the identity endpoint
#[derive(Clone)]
pub struct AccessToken {
    value: String,
    expires_at: Option<Instant>,
}

impl AccessToken {
    /// A lifetime too large to represent is treated as unknown.
    pub fn new(value: impl Into<String>, expires_in: Option<Duration>) -> Self {
        Self {
            value: value.into(),
            expires_at: expires_in.and_then(|d| Instant::now().checked_add(d)),
        }
    }

    /// Raw token string, as sent in the `Authorization` header
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Tokens without a reported lifetime are never considered expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| at <= Instant::now())
            .unwrap_or(false)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of bearer tokens for outbound requests.
///
/// Implementations must be safe to call from many tasks at once. The client
/// calls this once per operation, immediately before sending the request.
pub trait TokenProvider: Send + Sync + fmt::Debug {
    fn acquire_token(&self) -> BoxFuture<'_, Result<AccessToken, AuthError>>;
}

/// `expires_in` is a number on the v2 endpoint and a numeric string on v1
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(u64),
    Text(String),
}

impl ExpiresIn {
    fn as_duration(&self) -> Option<Duration> {
        match self {
            ExpiresIn::Seconds(secs) => Some(Duration::from_secs(*secs)),
            ExpiresIn::Text(text) => text.trim().parse().ok().map(Duration::from_secs),
        }
    }
}

/// Token response from Azure AD
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<ExpiresIn>,
}

/// Azure AD authentication helper for client credentials flow
#[derive(Debug)]
pub struct AzureAdAuth {
    credentials: Credentials,
    authority: String,
    http_client: Client,
}

impl AzureAdAuth {
    /// Create a helper against the public Azure AD authority
    pub fn new(credentials: Credentials) -> Result<Self, AuthError> {
        Self::with_authority(credentials, DEFAULT_AUTHORITY, DEFAULT_TIMEOUT)
    }

    /// Create a helper against a specific authority
    ///
    /// # Arguments
    /// * `credentials` - App registration credentials
    /// * `authority` - Identity host, e.g. "https://login.microsoftonline.com"
    /// * `timeout` - Upper bound for a single token request
    pub fn with_authority(
        credentials: Credentials,
        authority: &str,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            credentials,
            authority: authority.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Get the token endpoint URL for this tenant
    fn token_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/token",
            self.authority, self.credentials.tenant_id
        )
    }

    /// Run one client credentials exchange against Azure AD
    async fn request_token(&self) -> Result<AccessToken, AuthError> {
        self.credentials.validate()?;

        tracing::info!(
            "Acquiring access token for resource: {}",
            self.credentials.resource_uri
        );

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("resource", self.credentials.resource_uri.as_str()),
        ];

        let response = self
            .http_client
            .post(self.token_endpoint())
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!("Token request failed: {} - {}", status, body);
            return Err(AuthError::TokenRequestFailed { status, body });
        }

        let token_response: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::ParseError(format!("Failed to parse token response: {}", e))
        })?;

        if token_response.access_token.trim().is_empty() {
            return Err(AuthError::ParseError(
                "Token response contained an empty access_token".to_string(),
            ));
        }

        if let Some(ref token_type) = token_response.token_type {
            if !token_type.eq_ignore_ascii_case("bearer") {
                tracing::warn!("Unexpected token type: {}", token_type);
            }
        }

        let expires_in = token_response
            .expires_in
            .as_ref()
            .and_then(ExpiresIn::as_duration);

        tracing::info!(
            "Token acquired successfully, expires in {:?}",
            expires_in
        );

        Ok(AccessToken::new(token_response.access_token, expires_in))
    }

    /// Get resource URL (scheme, host and any non-default port) from endpoint
    pub fn resource_from_endpoint(endpoint: &str) -> String {
        match Url::parse(endpoint).map(|url| url.origin()) {
            Ok(origin) if origin.is_tuple() => origin.ascii_serialization(),
            _ => endpoint
                .split('/')
                .take(3)
                .collect::<Vec<_>>()
                .join("/"),
        }
    }
}

impl TokenProvider for AzureAdAuth {
    fn acquire_token(&self) -> BoxFuture<'_, Result<AccessToken, AuthError>> {
        Box::pin(self.request_token())
    }
}
