//! OData request assembly
//!
//! Turns an [`ODataRequest`] plus a bearer token into a ready-to-send
//! `reqwest::Request` carrying the headers the Web API requires.

use crate::auth::AccessToken;
use crate::odata::ODataError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Request, Url};
use serde_json::Value;

pub const ODATA_MAX_VERSION: &str = "OData-MaxVersion";
pub const ODATA_VERSION: &str = "OData-Version";
pub const PREFER: &str = "Prefer";
pub const ODATA_ENTITY_ID: &str = "OData-EntityId";

pub const ODATA_VERSION_VALUE: &str = "4.0";
pub const PREFER_INCLUDE_ANNOTATIONS: &str = "odata.include-annotations=*";
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// A single outbound call, before authentication is attached
#[derive(Debug, Clone)]
pub struct ODataRequest {
    pub method: Method,
    /// Path relative to the service root, or an absolute URI
    pub target: String,
    pub body: Option<Value>,
    pub headers: HeaderMap,
}

impl ODataRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, target).with_body(body)
    }

    pub fn put(target: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, target).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Extra headers are sent after the fixed OData headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Builds authenticated requests relative to a service root
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    service_root: Url,
}

impl RequestBuilder {
    /// Create a builder for the given service root
    /// (e.g., "https://org.crm.dynamics.com/api/data/v9.0/")
    pub fn new(service_root: &str) -> Result<Self, ODataError> {
        // Ensure endpoint ends with / so relative joins keep the version segment
        let normalized = if service_root.ends_with('/') {
            service_root.to_string()
        } else {
            format!("{}/", service_root)
        };

        let service_root = Url::parse(&normalized).map_err(|e| {
            ODataError::InvalidRequest(format!("Invalid service root '{}': {}", service_root, e))
        })?;

        Ok(Self { service_root })
    }

    pub fn service_root(&self) -> &Url {
        &self.service_root
    }

    /// Resolve a path or absolute URI against the service root
    pub fn resolve(&self, target: &str) -> Result<Url, ODataError> {
        if let Ok(url) = Url::parse(target) {
            if matches!(url.scheme(), "http" | "https") {
                return Ok(url);
            }
        }

        self.service_root
            .join(target.trim_start_matches('/'))
            .map_err(|e| ODataError::InvalidRequest(format!("Invalid target '{}': {}", target, e)))
    }

    /// Assemble the final request. No I/O happens here.
    pub fn build(&self, request: &ODataRequest, token: &AccessToken) -> Result<Request, ODataError> {
        let url = self.resolve(&request.target)?;
        let mut http_request = Request::new(request.method.clone(), url);

        let headers = http_request.headers_mut();
        headers.insert(
            HeaderName::from_static("odata-maxversion"),
            HeaderValue::from_static(ODATA_VERSION_VALUE),
        );
        headers.insert(
            HeaderName::from_static("odata-version"),
            HeaderValue::from_static(ODATA_VERSION_VALUE),
        );
        headers.insert(
            HeaderName::from_static("prefer"),
            HeaderValue::from_static(PREFER_INCLUDE_ANNOTATIONS),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut authorization = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
            .map_err(|_| {
                ODataError::InvalidRequest("Access token is not a valid header value".to_string())
            })?;
        authorization.set_sensitive(true);
        headers.insert(AUTHORIZATION, authorization);

        if let Some(ref body) = request.body {
            let bytes = serde_json::to_vec(body).map_err(|e| {
                ODataError::InvalidRequest(format!("Failed to serialize request body: {}", e))
            })?;
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            *http_request.body_mut() = Some(bytes.into());
        }

        for (name, value) in request.headers.iter() {
            http_request.headers_mut().append(name.clone(), value.clone());
        }

        Ok(http_request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn builder() -> RequestBuilder {
        RequestBuilder::new("https://org.crm.dynamics.com/api/data/v9.0").unwrap()
    }

    fn token() -> AccessToken {
        AccessToken::new("test-token", None)
    }

    fn assert_fixed_headers(request: &Request) {
        let headers = request.headers();
        assert_eq!(headers.get(ODATA_MAX_VERSION).unwrap(), "4.0");
        assert_eq!(headers.get(ODATA_VERSION).unwrap(), "4.0");
        assert_eq!(headers.get(PREFER).unwrap(), "odata.include-annotations=*");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer test-token");
    }

    #[test]
    fn test_relative_target_joins_service_root() {
        let url = builder().resolve("accounts").unwrap();
        assert_eq!(url.as_str(), "https://org.crm.dynamics.com/api/data/v9.0/accounts");

        let url = builder().resolve("/contacts(00000000-0000-0000-0000-000000000001)").unwrap();
        assert_eq!(
            url.as_str(),
            "https://org.crm.dynamics.com/api/data/v9.0/contacts(00000000-0000-0000-0000-000000000001)"
        );
    }

    #[test]
    fn test_absolute_target_used_verbatim() {
        let target = "https://other.crm.dynamics.com/api/data/v9.0/accounts(1)";
        let url = builder().resolve(target).unwrap();
        assert_eq!(url.as_str(), target);
    }

    #[test]
    fn test_query_string_preserved() {
        let url = builder().resolve("accounts?$select=name&$top=3").unwrap();
        assert_eq!(url.path(), "/api/data/v9.0/accounts");
        assert_eq!(url.query(), Some("$select=name&$top=3"));
    }

    #[test]
    fn test_invalid_service_root() {
        let err = RequestBuilder::new("not a url").unwrap_err();
        assert!(matches!(err, ODataError::InvalidRequest(_)));
    }

    #[test]
    fn test_get_has_fixed_headers_and_no_body() {
        let request = builder().build(&ODataRequest::get("accounts"), &token()).unwrap();

        assert_eq!(request.method(), Method::GET);
        assert_fixed_headers(&request);
        assert_eq!(request.headers().get(ACCEPT).unwrap(), "application/json");
        assert!(request.headers().get(CONTENT_TYPE).is_none());
        assert!(request.body().is_none());
    }

    #[test]
    fn test_body_is_utf8_json() {
        let body = json!({"lastname": "Nekić", "donotemail": false});
        let request = builder()
            .build(&ODataRequest::post("contacts", body.clone()), &token())
            .unwrap();

        assert_fixed_headers(&request);
        assert_eq!(request.headers().get(CONTENT_TYPE).unwrap(), JSON_CONTENT_TYPE);

        let bytes = request.body().and_then(|b| b.as_bytes()).unwrap();
        let text = std::str::from_utf8(bytes).unwrap();
        assert!(text.contains("Nekić"));
        let parsed: Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(parsed, body);
    }

    #[test]
    fn test_extra_headers_are_appended() {
        let mut extra = HeaderMap::new();
        extra.insert("if-none-match", HeaderValue::from_static("W/\"12345\""));
        extra.insert("prefer", HeaderValue::from_static("return=representation"));

        let request = builder()
            .build(&ODataRequest::get("accounts(1)").with_headers(extra), &token())
            .unwrap();

        assert_fixed_headers(&request);
        assert_eq!(request.headers().get("If-None-Match").unwrap(), "W/\"12345\"");

        let prefer: Vec<_> = request.headers().get_all(PREFER).iter().collect();
        assert_eq!(prefer, vec!["odata.include-annotations=*", "return=representation"]);
    }

    #[test]
    fn test_authorization_is_sensitive() {
        let request = builder().build(&ODataRequest::get("accounts"), &token()).unwrap();
        assert!(request.headers().get(AUTHORIZATION).unwrap().is_sensitive());
    }

    #[test]
    fn test_token_with_newline_is_rejected() {
        let bad = AccessToken::new("abc\ndef", None);
        let err = builder().build(&ODataRequest::get("accounts"), &bad).unwrap_err();
        assert!(matches!(err, ODataError::InvalidRequest(_)));
    }
}
