//! The seam between the persistence client and the network.
//!
//! [`Transport`] sends one [`ApiRequest`] and hands back the raw
//! [`ApiResponse`], without interpreting status codes. Status handling,
//! retries and decoding live above it, so the production
//! [`HttpTransport`] and the in-memory test backend behave identically
//! from the caller's point of view.

use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ClientError;

/// A JSON request against the application's REST API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, e.g. `/api/projects/{id}/chat`.
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::DELETE,
            path: path.into(),
            body: None,
        }
    }

    pub fn post<B: serde::Serialize>(path: impl Into<String>, body: &B) -> Result<Self, ClientError> {
        Self::with_body(Method::POST, path, body)
    }

    pub fn patch<B: serde::Serialize>(path: impl Into<String>, body: &B) -> Result<Self, ClientError> {
        Self::with_body(Method::PATCH, path, body)
    }

    fn with_body<B: serde::Serialize>(
        method: Method,
        path: impl Into<String>,
        body: &B,
    ) -> Result<Self, ClientError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ClientError::InvalidRequest(format!("unserializable body: {e}")))?;
        Ok(Self {
            method,
            path: path.into(),
            body: Some(body),
        })
    }
}

/// A raw response: status plus body text.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

/// Shape of every error body the API returns.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Return the response unchanged on 2xx, or a [`ClientError::Api`]
    /// carrying the `{ error }` message (or the raw body) otherwise.
    pub fn ensure_success(self) -> Result<Self, ClientError> {
        if self.is_success() {
            return Ok(self);
        }
        let message = match serde_json::from_str::<ErrorBody>(&self.body) {
            Ok(parsed) => parsed.error,
            Err(_) if self.body.trim().is_empty() => "<empty body>".to_string(),
            Err(_) => self.body,
        };
        Err(ClientError::Api {
            status: self.status,
            message,
        })
    }

    /// Parse the body as JSON into the expected type.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Sends requests to the persistence backend.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Perform a single request. Implementations return `Ok` for every
    /// response the server produced, whatever its status; `Err` means no
    /// response was obtained.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError>;
}

/// [`Transport`] over HTTP using [`reqwest`].
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` (e.g. `http://localhost:3000`)
    /// with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing [`reqwest::Client`] (shares its connection pool).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(request.method.clone(), &url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        tracing::debug!(
            method = %request.method,
            path = %request.path,
            status,
            "API request completed",
        );

        Ok(ApiResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_success_passes_2xx_through() {
        let response = ApiResponse::new(201, r#"{"ok":true}"#);
        assert_eq!(response.clone().ensure_success().unwrap(), response);
    }

    #[test]
    fn ensure_success_extracts_error_field() {
        let err = ApiResponse::new(404, r#"{"error":"Project not found"}"#)
            .ensure_success()
            .unwrap_err();
        assert_eq!(
            err,
            ClientError::Api {
                status: 404,
                message: "Project not found".into()
            }
        );
    }

    #[test]
    fn ensure_success_falls_back_to_raw_body() {
        let err = ApiResponse::new(502, "Bad Gateway").ensure_success().unwrap_err();
        assert_eq!(err.to_string(), "API error (502): Bad Gateway");

        let err = ApiResponse::new(500, "  ").ensure_success().unwrap_err();
        assert_eq!(err.to_string(), "API error (500): <empty body>");
    }

    #[test]
    fn json_decode_failure_is_terminal() {
        let err = ApiResponse::new(200, "<html>")
            .json::<serde_json::Value>()
            .unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn post_serializes_body() {
        let req = ApiRequest::post("/api/projects", &serde_json::json!({"name": "Launch"})).unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.body.unwrap()["name"], "Launch");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let transport = HttpTransport::with_client(reqwest::Client::new(), "http://localhost:3000/");
        assert_eq!(transport.base_url(), "http://localhost:3000");
    }
}
