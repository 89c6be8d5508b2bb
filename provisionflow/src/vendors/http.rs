//! Shared JSON HTTP client with failure classification.
//!
//! Every vendor call goes through [`ApiClient`], which checks the run's
//! cancellation scope before sending and maps every failure into a
//! [`ProvisionError`] kind:
//!
//! - network errors, timeouts, 5xx and 429 are transient
//! - every other 4xx, 409 included, is permanent
//! - a 2xx body that does not parse is permanent

use crate::cancellation::CancelScope;
use crate::credentials::Secret;
use crate::errors::ProvisionError;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

use super::HttpConfig;

const MAX_BODY_IN_ERROR: usize = 300;

/// How requests authenticate.
#[derive(Clone)]
pub enum Auth {
    /// `Authorization: Bearer <token>`.
    Bearer(Secret),
    /// No auth header; credentials travel in the query string.
    None,
}

/// A JSON API client bound to one vendor.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth: Auth,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a client.
    pub fn new(base_url: impl Into<String>, auth: Auth, config: &HttpConfig) -> Result<Self, ProvisionError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ProvisionError::permanent(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        })
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET and decode JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, scope: &CancelScope, path: &str) -> Result<T, ProvisionError> {
        let body = self.send(scope, self.request(Method::GET, path), "GET", path).await?;
        decode(&body, path)
    }

    /// GET and decode JSON, mapping 404 to `None`.
    pub async fn get_json_opt<T: DeserializeOwned>(
        &self,
        scope: &CancelScope,
        path: &str,
    ) -> Result<Option<T>, ProvisionError> {
        match self.send_raw(scope, self.request(Method::GET, path), "GET", path).await? {
            (StatusCode::NOT_FOUND, _) => Ok(None),
            (status, body) if status.is_success() => decode(&body, path).map(Some),
            (status, body) => Err(classify_status("GET", path, status, &body)),
        }
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json<B, T>(&self, scope: &CancelScope, path: &str, body: &B) -> Result<T, ProvisionError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.request(Method::POST, path).json(body);
        let body = self.send(scope, request, "POST", path).await?;
        decode(&body, path)
    }

    /// GET with query parameters and return the raw body.
    pub async fn get_text(
        &self,
        scope: &CancelScope,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<String, ProvisionError> {
        let request = self.request(Method::GET, path).query(query);
        self.send(scope, request, "GET", path).await
    }

    /// GET an absolute URL and return only its status.
    ///
    /// Transport failures are returned as transient errors; any HTTP status,
    /// including 5xx, is returned as a value.
    pub async fn probe_status(&self, scope: &CancelScope, url: &str) -> Result<StatusCode, ProvisionError> {
        scope.checkpoint()?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport("GET", url, &e))?;
        Ok(response.status())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        };

        let builder = self
            .http
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.auth {
            Auth::Bearer(token) => builder.bearer_auth(token.expose()),
            Auth::None => builder,
        }
    }

    async fn send(
        &self,
        scope: &CancelScope,
        request: RequestBuilder,
        method: &str,
        path: &str,
    ) -> Result<String, ProvisionError> {
        let (status, body) = self.send_raw(scope, request, method, path).await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(classify_status(method, path, status, &body))
        }
    }

    async fn send_raw(
        &self,
        scope: &CancelScope,
        request: RequestBuilder,
        method: &str,
        path: &str,
    ) -> Result<(StatusCode, String), ProvisionError> {
        scope.checkpoint()?;

        tracing::debug!(method, path, "Vendor request");
        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(method, path, &e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(method, path, &e))?;

        tracing::debug!(method, path, status = status.as_u16(), "Vendor response");
        Ok((status, body))
    }
}

/// Returns true for statuses that waiting can resolve.
#[must_use]
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Classifies a non-success HTTP response.
#[must_use]
pub fn classify_status(method: &str, path: &str, status: StatusCode, body: &str) -> ProvisionError {
    let message = format!("{method} {path}: HTTP {}: {}", status.as_u16(), error_detail(body));
    if is_transient_status(status) {
        ProvisionError::transient(message)
    } else {
        ProvisionError::permanent(message)
    }
}

/// Classifies a transport-level failure.
#[must_use]
pub fn classify_transport(method: &str, path: &str, err: &reqwest::Error) -> ProvisionError {
    let message = format!("{method} {path}: {err}");
    if err.is_builder() || err.is_redirect() {
        ProvisionError::permanent(message)
    } else {
        ProvisionError::transient(message)
    }
}

/// Pulls a human-readable message out of a vendor error body.
///
/// Understands `{"message": ..}`, `{"error": {"message": ..}}`,
/// `{"error": ".."}` and GraphQL `{"errors": [{"message": ..}]}`; falls
/// back to the truncated body.
#[must_use]
pub fn error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let candidates = [
            value.get("message"),
            value.get("error").and_then(|e| e.get("message")),
            value.get("error"),
            value.get("errors").and_then(|e| e.get(0)).and_then(|e| e.get("message")),
        ];
        if let Some(message) = candidates.into_iter().flatten().find_map(serde_json::Value::as_str) {
            return message.to_string();
        }
    }
    truncate(body.trim())
}

fn decode<T: DeserializeOwned>(body: &str, path: &str) -> Result<T, ProvisionError> {
    serde_json::from_str(body).map_err(|e| {
        ProvisionError::permanent(format!("{path}: unexpected response ({e}): {}", truncate(body)))
    })
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_BODY_IN_ERROR {
        return body.to_string();
    }
    let mut end = MAX_BODY_IN_ERROR;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_status_classification() {
        let cases = [
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Transient),
            (StatusCode::BAD_GATEWAY, ErrorKind::Transient),
            (StatusCode::SERVICE_UNAVAILABLE, ErrorKind::Transient),
            (StatusCode::TOO_MANY_REQUESTS, ErrorKind::Transient),
            (StatusCode::BAD_REQUEST, ErrorKind::Permanent),
            (StatusCode::UNAUTHORIZED, ErrorKind::Permanent),
            (StatusCode::FORBIDDEN, ErrorKind::Permanent),
            (StatusCode::NOT_FOUND, ErrorKind::Permanent),
            (StatusCode::CONFLICT, ErrorKind::Permanent),
            (StatusCode::LOCKED, ErrorKind::Permanent),
        ];

        for (status, expected) in cases {
            assert_eq!(classify_status("POST", "/projects", status, "").kind(), expected, "{status}");
        }
    }

    #[test]
    fn test_error_message_keeps_vendor_text() {
        let err = classify_status(
            "POST",
            "/projects",
            StatusCode::UNAUTHORIZED,
            r#"{"code":"","message":"authentication required"}"#,
        );

        assert_eq!(err.message(), "POST /projects: HTTP 401: authentication required");
    }

    #[test]
    fn test_error_detail_shapes() {
        assert_eq!(error_detail(r#"{"error":{"code":"forbidden","message":"no access"}}"#), "no access");
        assert_eq!(error_detail(r#"{"error":"bad token"}"#), "bad token");
        assert_eq!(error_detail(r#"{"errors":[{"message":"Not Authorized"}]}"#), "Not Authorized");
        assert_eq!(error_detail("plain text"), "plain text");
    }

    #[test]
    fn test_truncate_long_bodies() {
        let body = "é".repeat(400);
        let detail = error_detail(&body);

        assert!(detail.ends_with("..."));
        assert!(detail.len() <= MAX_BODY_IN_ERROR + 3);
    }

    #[test]
    fn test_decode_failure_is_permanent() {
        let err = decode::<serde_json::Value>("<html>", "/projects").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[tokio::test]
    async fn test_cancelled_scope_sends_nothing() {
        let client = ApiClient::new("http://127.0.0.1:9", Auth::None, &HttpConfig::default()).unwrap();
        let token = std::sync::Arc::new(crate::cancellation::CancellationToken::new());
        token.cancel("stop");
        let scope = CancelScope::new(token);

        let err = client.get_json::<serde_json::Value>(&scope, "/x").await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
