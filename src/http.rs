//! HTTP wrapper for the storefront API.
//!
//! Two layers:
//! - `request`: one raw exchange with a hard timeout, no retries
//! - `call_with_auth_fallback`: walks the configured header schemes in order,
//!   moving on only when the server answers 401/403, and normalizes the
//!   outcome into parsed JSON or an [`ApiError`]

use crate::error::ApiError;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// `Authorization` header format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderScheme {
    /// `Bearer <token>` (end-user endpoints)
    Bearer,
    /// `Token <token>` (admin endpoints)
    Token,
}

impl HeaderScheme {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "bearer" => Some(Self::Bearer),
            "token" => Some(Self::Token),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bearer => "Bearer",
            Self::Token => "Token",
        }
    }

    pub fn header_value(&self, token: &str) -> String {
        format!("{} {}", self.as_str(), token)
    }
}

/// Ordered list of header schemes tried by `call_with_auth_fallback`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPolicy {
    schemes: Vec<HeaderScheme>,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            schemes: vec![HeaderScheme::Bearer, HeaderScheme::Token],
        }
    }
}

impl AuthPolicy {
    pub fn new(schemes: Vec<HeaderScheme>) -> Self {
        Self { schemes }
    }

    pub fn schemes(&self) -> &[HeaderScheme] {
        &self.schemes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
        }
    }
}

/// Everything a single exchange needs besides the URL
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            body: None,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Option<&Value>) -> Self {
        if let Some(body) = body {
            self.headers
                .push(("Content-Type".to_string(), "application/json".to_string()));
            self.body = Some(body.clone());
        }
        self
    }

    /// Value of the `Authorization` header, if one was set
    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
            .map(|(_, value)| value.as_str())
    }
}

/// Response as received, before any interpretation
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_auth_rejection(&self) -> bool {
        self.status == 401 || self.status == 403
    }
}

/// Performs one raw HTTP exchange
///
/// Any status code the server sends back is a successful exchange; only
/// timeouts and connection failures are errors here.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        url: &str,
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<RawResponse, ApiError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(
        &self,
        url: &str,
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<RawResponse, ApiError> {
        (**self).send(url, options, timeout)
    }
}

/// Blocking transport over a shared `ureq::Agent`
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        Self {
            agent: ureq::Agent::new(),
        }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn send(
        &self,
        url: &str,
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<RawResponse, ApiError> {
        let mut req = self
            .agent
            .request(options.method.as_str(), url)
            .timeout(timeout);
        for (name, value) in &options.headers {
            req = req.set(name, value);
        }

        let resp = match &options.body {
            Some(body) => req.send_json(body.clone()),
            None => req.call(),
        };

        match resp {
            Ok(r) => read_response(r),
            // Non-2xx is still a response; the caller interprets it
            Err(ureq::Error::Status(_, r)) => read_response(r),
            Err(ureq::Error::Transport(t)) => {
                if is_timeout(&t) {
                    Err(ApiError::Timeout)
                } else {
                    Err(ApiError::Network(t.to_string()))
                }
            }
        }
    }
}

fn read_response(resp: ureq::Response) -> Result<RawResponse, ApiError> {
    let status = resp.status();
    let status_text = resp.status_text().to_string();
    let body = resp.into_string().map_err(|e| {
        if is_timeout(&e) {
            ApiError::Timeout
        } else {
            ApiError::Network(e.to_string())
        }
    })?;
    Ok(RawResponse {
        status,
        status_text,
        body,
    })
}

/// Walk the error chain looking for an I/O timeout
fn is_timeout(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) {
                return true;
            }
        }
        if e.to_string().to_lowercase().contains("timed out") {
            return true;
        }
        current = e.source();
    }
    false
}

/// Client for the storefront REST API
pub struct HttpClient {
    base_url: String,
    timeout: Duration,
    policy: AuthPolicy,
    transport: Box<dyn Transport>,
}

impl HttpClient {
    pub fn new(base_url: &str, timeout: Duration, policy: AuthPolicy) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            policy,
            transport: Box::new(UreqTransport::new()),
        }
    }

    /// Swap the transport for a scripted one
    #[cfg(test)]
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Absolute URLs pass through; paths are joined to the base URL
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// One exchange with the default timeout
    pub fn request(&self, path: &str, options: &RequestOptions) -> Result<RawResponse, ApiError> {
        self.request_with_timeout(path, options, self.timeout)
    }

    /// One exchange; fails with [`ApiError::Timeout`] if no response arrives in time
    pub fn request_with_timeout(
        &self,
        path: &str,
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<RawResponse, ApiError> {
        let url = self.url(path);
        // Only the scheme is logged, never the token
        let scheme = options
            .authorization()
            .and_then(|value| value.split_whitespace().next())
            .unwrap_or("none");
        debug!(method = options.method.as_str(), %url, scheme, ?timeout, "request");
        let resp = self.transport.send(&url, options, timeout);
        match &resp {
            Ok(r) => debug!(status = r.status, %url, "response"),
            Err(e) => debug!(error = %e, %url, "request failed"),
        }
        resp
    }

    /// Call an endpoint, trying each header scheme until the server stops answering 401/403.
    ///
    /// Without a token a single unauthenticated attempt is made.
    pub fn call_with_auth_fallback(
        &self,
        path: &str,
        method: Method,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<Value, ApiError> {
        let token = token.filter(|t| !t.is_empty());
        let attempts: Vec<Option<HeaderScheme>> = match token {
            Some(_) => self.policy.schemes.iter().copied().map(Some).collect(),
            None => vec![None],
        };

        for (i, scheme) in attempts.iter().enumerate() {
            let mut options = RequestOptions::new(method).json(body);
            if let (Some(scheme), Some(token)) = (scheme, token) {
                options = options.header("Authorization", &scheme.header_value(token));
            }

            let resp = self.request(path, &options)?;
            if resp.is_auth_rejection() {
                if i + 1 < attempts.len() {
                    warn!(
                        status = resp.status,
                        scheme = scheme.map(|s| s.as_str()).unwrap_or("none"),
                        path,
                        "auth rejected, trying next header scheme"
                    );
                }
                continue;
            }
            return parse_response(resp);
        }

        Err(ApiError::AuthRequired)
    }
}

/// Turn a non-auth-rejected response into JSON or a normalized error
fn parse_response(resp: RawResponse) -> Result<Value, ApiError> {
    if !resp.is_success() {
        return Err(ApiError::from_status(
            resp.status,
            &resp.status_text,
            &resp.body,
        ));
    }
    if resp.body.trim().is_empty() {
        return Ok(json!({ "success": true }));
    }
    serde_json::from_str(&resp.body).map_err(|e| ApiError::Decode(e.to_string()))
}


#[cfg(test)]
mod tests {
    use super::testing::{ok, MockTransport};
    use super::*;
    use crate::error::ErrorKind;

    fn client(transport: Arc<MockTransport>) -> HttpClient {
        HttpClient::new(
            "https://api.example.com/",
            Duration::from_secs(15),
            AuthPolicy::default(),
        )
        .with_transport(Box::new(transport))
    }

    #[test]
    fn test_header_scheme_parse() {
        assert_eq!(HeaderScheme::from_str("Bearer"), Some(HeaderScheme::Bearer));
        assert_eq!(HeaderScheme::from_str(" token "), Some(HeaderScheme::Token));
        assert_eq!(HeaderScheme::from_str("basic"), None);
        assert_eq!(HeaderScheme::Token.header_value("t1"), "Token t1");
    }

    #[test]
    fn test_url_joining() {
        let c = client(MockTransport::new());
        assert_eq!(c.url("/all-users"), "https://api.example.com/all-users");
        assert_eq!(c.url("all-users"), "https://api.example.com/all-users");
        assert_eq!(c.url("http://other.test/x"), "http://other.test/x");
    }

    #[test]
    fn test_rate_item_falls_back_to_token_scheme() {
        let transport = MockTransport::new();
        transport.route(
            "POST /store/rate-item/42/",
            vec![ok(403, ""), ok(200, r#"{"message": "ok"}"#)],
        );
        let c = client(transport.clone());

        let body = json!({ "rating": 5 });
        let result = c
            .call_with_auth_fallback("/store/rate-item/42/", Method::Post, Some(&body), Some("t1"))
            .unwrap();

        assert_eq!(result, json!({ "message": "ok" }));
        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].authorization.as_deref(), Some("Bearer t1"));
        assert_eq!(calls[1].authorization.as_deref(), Some("Token t1"));
        assert_eq!(calls[1].body, Some(body));
    }

    #[test]
    fn test_401_then_200_stops_after_second_scheme() {
        let transport = MockTransport::new();
        transport.route(
            "GET /all-users",
            vec![ok(401, ""), ok(200, "[]"), ok(500, "")],
        );
        let policy = AuthPolicy::new(vec![
            HeaderScheme::Bearer,
            HeaderScheme::Token,
            HeaderScheme::Bearer,
        ]);
        let c = HttpClient::new("https://api.example.com", Duration::from_secs(1), policy)
            .with_transport(Box::new(transport.clone()));

        let result = c
            .call_with_auth_fallback("/all-users", Method::Get, None, Some("t1"))
            .unwrap();
        assert_eq!(result, json!([]));
        assert_eq!(transport.count("GET /all-users"), 2);
    }

    #[test]
    fn test_non_auth_error_stops_loop() {
        let transport = MockTransport::new();
        transport.route(
            "GET /store/all-orders",
            vec![ok(500, r#"{"message": "db down"}"#), ok(200, "[]")],
        );
        let c = client(transport.clone());

        let err = c
            .call_with_auth_fallback("/store/all-orders", Method::Get, None, Some("t1"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(err.to_string(), "db down");
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn test_exhausted_schemes_is_auth_required() {
        let transport = MockTransport::new();
        transport.route("GET /all-users", vec![ok(401, ""), ok(403, "")]);
        let c = client(transport.clone());

        let err = c
            .call_with_auth_fallback("/all-users", Method::Get, None, Some("t1"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthRequired);
        assert_eq!(err.to_string(), "Authentication required");
        assert_eq!(transport.calls().len(), 2);
    }

    #[test]
    fn test_no_token_single_attempt_without_header() {
        let transport = MockTransport::new();
        transport.route("GET /store/all-items", vec![ok(200, r#"[{"id": 1}]"#)]);
        let c = client(transport.clone());

        let result = c
            .call_with_auth_fallback("/store/all-items", Method::Get, None, Some(""))
            .unwrap();
        assert_eq!(result, json!([{ "id": 1 }]));
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].authorization.is_none());
    }

    #[test]
    fn test_empty_body_is_default_success() {
        let transport = MockTransport::new();
        transport.route("POST /newsletters/subscribe/", vec![ok(204, "")]);
        let c = client(transport);

        let result = c
            .call_with_auth_fallback("/newsletters/subscribe/", Method::Post, None, Some("t1"))
            .unwrap();
        assert_eq!(result, json!({ "success": true }));
    }

    #[test]
    fn test_conflict_is_already_done() {
        let transport = MockTransport::new();
        transport.route("POST /store/rate-item/7/", vec![ok(409, "")]);
        let c = client(transport);

        let err = c
            .call_with_auth_fallback("/store/rate-item/7/", Method::Post, None, Some("t1"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyDone);
        assert_eq!(err.to_string(), "ALREADY_RATED");
    }

    #[test]
    fn test_transport_timeout_propagates() {
        let transport = MockTransport::new();
        transport.route("GET /store/all-items", vec![Err(ApiError::Timeout)]);
        let c = client(transport);

        let err = c
            .call_with_auth_fallback("/store/all-items", Method::Get, None, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.to_string(), "Request timed out. Please try again.");
    }

    #[test]
    fn test_ureq_timeout_maps_to_timeout_kind() {
        // Listener that never answers: the kernel completes the handshake
        // and the request is buffered, but no response ever comes back.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let c = HttpClient::new(
            &format!("http://{}", addr),
            Duration::from_millis(200),
            AuthPolicy::default(),
        );

        let err = c
            .request("/store/all-items", &RequestOptions::new(Method::Get))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        drop(listener);
    }
}
