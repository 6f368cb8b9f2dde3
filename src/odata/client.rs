//! OData Client module
//!
//! Create/read/update operations against the Dynamics 365 Web API.
//! Each operation acquires a fresh bearer token, sends exactly one request
//! and interprets the response; nothing is retried.

use crate::auth::{AuthError, AzureAdAuth, TokenProvider};
use crate::config::RuntimeConfig;
use crate::odata::request::{ODataRequest, RequestBuilder, ODATA_ENTITY_ID};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The server answered, but not in the way the operation requires
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unexpected status {status} {reason}: {body}")]
    Status {
        status: StatusCode,
        reason: String,
        body: String,
    },

    #[error("Response is missing the OData-EntityId header")]
    MissingEntityId,

    #[error("Response carries {0} OData-EntityId headers, expected one")]
    DuplicateEntityId(usize),

    #[error("Malformed OData-EntityId header: {0}")]
    MalformedEntityId(String),

    #[error("Malformed JSON body: {0}")]
    MalformedJson(#[source] serde_json::Error),
}

/// OData client errors
#[derive(Error, Debug)]
pub enum ODataError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for ODataError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ODataError::Timeout(err)
        } else {
            ODataError::Transport(err)
        }
    }
}

impl ODataError {
    /// HTTP status of a rejected request, if that is what failed
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ODataError::Protocol(ProtocolError::Status { status, .. }) => Some(*status),
            ODataError::Auth(AuthError::TokenRequestFailed { status, .. }) => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ODataError::Timeout(_) | ODataError::Auth(AuthError::Timeout(_))
        )
    }
}

/// OData client for the D365 Web API
#[derive(Debug, Clone)]
pub struct ODataClient {
    auth: Arc<dyn TokenProvider>,
    builder: RequestBuilder,
    http_client: Client,
}

impl ODataClient {
    /// Create a new OData client
    ///
    /// # Arguments
    /// * `auth` - Token source, called once per operation
    /// * `service_root` - Service root URL (e.g., "https://org.crm.dynamics.com/api/data/v9.0/")
    /// * `timeout` - Upper bound for each request
    pub fn new(
        auth: Arc<dyn TokenProvider>,
        service_root: &str,
        timeout: Duration,
    ) -> Result<Self, ODataError> {
        let builder = RequestBuilder::new(service_root)?;
        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            auth,
            builder,
            http_client,
        })
    }

    /// Wire Azure AD authentication and the client from configuration
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, ODataError> {
        let auth = AzureAdAuth::with_authority(
            config.credentials.clone(),
            &config.authority,
            config.timeout,
        )?;

        Self::new(Arc::new(auth), &config.service_root, config.timeout)
    }

    /// Get service root URL
    pub fn service_root(&self) -> &Url {
        self.builder.service_root()
    }

    /// Send a request with a freshly acquired token.
    ///
    /// The response is returned as-is; status interpretation is left to the
    /// caller.
    pub async fn send(&self, request: ODataRequest) -> Result<Response, ODataError> {
        let token = self.auth.acquire_token().await?;
        let http_request = self.builder.build(&request, &token)?;

        tracing::debug!("{} {}", http_request.method(), http_request.url());

        let response = self.http_client.execute(http_request).await?;

        tracing::debug!("{} {} -> {}", request.method, request.target, response.status());

        Ok(response)
    }

    /// Create an entity and return the URI of the new record
    ///
    /// # Arguments
    /// * `entity_set` - Entity set name (e.g., "accounts", "contacts")
    /// * `body` - Attribute values for the new record
    pub async fn create<T>(&self, entity_set: &str, body: &T) -> Result<Url, ODataError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body).map_err(|e| {
            ODataError::InvalidRequest(format!("Failed to serialize entity: {}", e))
        })?;

        let response = self.send(ODataRequest::post(entity_set, body)).await?;
        let response = ensure_success(response).await?;

        let uri = entity_id(response.headers())?;
        tracing::info!("Created {}", uri);

        Ok(uri)
    }

    /// Read an entity or collection
    ///
    /// Returns `None` when the server answers 304 Not Modified, which happens
    /// when `headers` carries a matching `If-None-Match`.
    ///
    /// # Arguments
    /// * `target` - Path relative to the service root, or an absolute entity URI
    /// * `headers` - Optional extra request headers
    pub async fn read(
        &self,
        target: &str,
        headers: Option<HeaderMap>,
    ) -> Result<Option<Value>, ODataError> {
        let mut request = ODataRequest::get(target);
        if let Some(headers) = headers {
            request = request.with_headers(headers);
        }

        let response = self.send(request).await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            tracing::debug!("{} not modified", target);
            return Ok(None);
        }

        let response = ensure_success(response).await?;
        let bytes = response.bytes().await?;

        let value = serde_json::from_slice(&bytes).map_err(ProtocolError::MalformedJson)?;

        Ok(Some(value))
    }

    /// Set a single property of an entity
    ///
    /// # Arguments
    /// * `target` - Entity path or absolute entity URI
    /// * `property` - Property logical name
    /// * `value` - New property value
    pub async fn update(
        &self,
        target: &str,
        property: &str,
        value: impl Into<Value>,
    ) -> Result<(), ODataError> {
        let target = format!("{}/{}", target.trim_end_matches('/'), property);
        let body = json!({ "value": value.into() });

        let response = self.send(ODataRequest::put(target, body)).await?;
        ensure_success(response).await?;

        Ok(())
    }
}

/// Turn a non-2xx response into a status failure
async fn ensure_success(response: Response) -> Result<Response, ODataError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().clone();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!("Failed to read error body from {}: {}", url, e);
            format!("<unreadable body: {}>", e)
        }
    };
    tracing::warn!("{} returned {}", url, status);

    Err(ProtocolError::Status {
        status,
        reason: status.canonical_reason().unwrap_or_default().to_string(),
        body,
    }
    .into())
}

/// Extract the single OData-EntityId header as an absolute URI
fn entity_id(headers: &HeaderMap) -> Result<Url, ProtocolError> {
    let values: Vec<_> = headers.get_all(ODATA_ENTITY_ID).iter().collect();

    let value = match values.as_slice() {
        [] => return Err(ProtocolError::MissingEntityId),
        [value] => *value,
        many => return Err(ProtocolError::DuplicateEntityId(many.len())),
    };

    let text = value
        .to_str()
        .map_err(|e| ProtocolError::MalformedEntityId(e.to_string()))?;

    Url::parse(text.trim()).map_err(|e| ProtocolError::MalformedEntityId(format!("{}: {}", text, e)))
}
