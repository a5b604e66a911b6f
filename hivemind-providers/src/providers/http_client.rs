//! Thin wrapper over `reqwest` shared by every HTTP adapter: base URL
//! handling, default headers, and the status-to-error mapping the retry
//! engine keys off.

use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response, StatusCode};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ProviderError;

/// Provider marker text meaning the credential is valid but scoped to a
/// different product. Never retried.
const PRODUCT_RESTRICTION_MARKER: &str = "only authorized for use with";

pub struct HttpProviderClient {
    http: Client,
    base_url: String,
    default_headers: HeaderMap,
}

impl HttpProviderClient {
    pub fn new(
        timeout: Duration,
        base_url: Option<String>,
        default_base: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(timeout).build().map_err(|e| {
            ProviderError::Configuration {
                message: format!("failed to build HTTP client: {e}"),
            }
        })?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        for (key, value) in headers {
            if let (Ok(name), Ok(value)) = (
                key.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                default_headers.insert(name, value);
            }
        }

        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| default_base.to_string()),
            default_headers,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url.trim_end_matches('/'), path)
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), path)
        }
    }

    /// POST a pre-serialized JSON body. The body bytes are marshaled
    /// once by the caller and cloned per attempt, never re-serialized.
    pub async fn post_bytes(
        &self,
        path: &str,
        body: Vec<u8>,
        request_headers: HeaderMap,
    ) -> Result<Response, ProviderError> {
        let mut headers = self.default_headers.clone();
        headers.extend(request_headers);

        let response = self
            .http
            .request(Method::POST, self.build_url(path))
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(map_transport_error)?;
        Ok(response)
    }

    pub async fn get(
        &self,
        path: &str,
        request_headers: HeaderMap,
    ) -> Result<Response, ProviderError> {
        let mut headers = self.default_headers.clone();
        headers.extend(request_headers);

        let response = self
            .http
            .request(Method::GET, self.build_url(path))
            .headers(headers)
            .send()
            .await
            .map_err(map_transport_error)?;
        Ok(response)
    }
}

/// Classify a transport failure. Deadline expiry inside reqwest is a
/// timeout, everything else a connection error.
pub fn map_transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Connection(error)
    }
}

/// Map a non-success response onto the canonical error kinds.
pub async fn map_error_response(response: Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body);

    if body.contains(PRODUCT_RESTRICTION_MARKER) {
        return ProviderError::AuthProductRestricted { message };
    }

    match status {
        StatusCode::BAD_REQUEST => ProviderError::InvalidRequest { message },
        StatusCode::UNAUTHORIZED => ProviderError::AuthFailed { message },
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
        StatusCode::SERVICE_UNAVAILABLE => ProviderError::Unavailable,
        _ if status.as_u16() == 529 => ProviderError::Overloaded,
        _ => ProviderError::Api {
            code: status.as_u16(),
            message,
        },
    }
}

/// Pull a human-readable message out of the common JSON error shapes,
/// falling back to the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            let error = value.get("error")?;
            error
                .get("message")
                .or_else(|| error.get("msg"))
                .and_then(|m| m.as_str())
                .map(|m| m.to_string())
                .or_else(|| error.as_str().map(|m| m.to_string()))
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}
