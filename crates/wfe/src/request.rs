//! The slice of an inbound HTTP request the verifier looks at.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::{HeaderMap, Method};

/// Media type of every signed ACME POST body.
pub const JOSE_CONTENT_TYPE: &str = "application/jose+json";

/// Header upstream proxies use to pass on the original scheme.
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// An inbound ACME request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    method: Method,
    request_uri: String,
    host: String,
    headers: HeaderMap,
    tls: bool,
    body: Option<Bytes>,
}

impl InboundRequest {
    pub fn new(method: Method, request_uri: impl Into<String>) -> Self {
        Self {
            method,
            request_uri: request_uri.into(),
            host: String::new(),
            headers: HeaderMap::new(),
            tls: false,
            body: None,
        }
    }

    pub fn post(request_uri: impl Into<String>) -> Self {
        Self::new(Method::POST, request_uri)
    }

    /// A well-formed signed POST: content type, length and body set.
    pub fn jose_post(
        host: impl Into<String>,
        request_uri: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self::post(request_uri)
            .with_host(host)
            .with_header(CONTENT_TYPE, HeaderValue::from_static(JOSE_CONTENT_TYPE))
            .with_body(body)
    }

    /// Convert a buffered `http` request. The host comes from the `Host`
    /// header, falling back to the URI authority.
    pub fn from_http(request: http::Request<Bytes>, tls: bool) -> Self {
        let (parts, body) = request.into_parts();

        let host = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();
        let request_uri = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        Self {
            method: parts.method,
            request_uri,
            host,
            headers: parts.headers,
            tls,
            body: Some(body),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the body and a matching `Content-Length`.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        self.body = Some(body);
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn request_uri(&self) -> &str {
        &self.request_uri
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Scheme the client used: `https` under TLS, overridden by a non-empty
    /// `X-Forwarded-Proto`.
    pub fn proto(&self) -> &str {
        match self.header_str(X_FORWARDED_PROTO) {
            Some(proto) if !proto.is_empty() => proto,
            _ if self.tls => "https",
            _ => "http",
        }
    }

    /// The URL a client must put in the JWS `url` header for this request.
    pub fn expected_url(&self) -> String {
        format!("{}://{}{}", self.proto(), self.host, self.request_uri)
    }

    /// Absolute URL of `endpoint` on the host this request was sent to.
    pub fn relative_endpoint(&self, endpoint: &str) -> String {
        let host = if self.host.is_empty() {
            "localhost"
        } else {
            &self.host
        };
        format!("{}://{}{}", self.proto(), host, endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proto_from_tls_and_forwarded_header() {
        let request = InboundRequest::post("/acme/new-order").with_host("example.com");
        assert_eq!(request.proto(), "http");
        assert_eq!(request.clone().with_tls(true).proto(), "https");

        let forwarded = request.with_header(
            HeaderName::from_static(X_FORWARDED_PROTO),
            HeaderValue::from_static("https"),
        );
        assert_eq!(forwarded.proto(), "https");
        assert_eq!(forwarded.expected_url(), "https://example.com/acme/new-order");
    }

    #[test]
    fn test_relative_endpoint_defaults_host() {
        let request = InboundRequest::post("/x").with_tls(true);
        assert_eq!(request.relative_endpoint("/acme/acct/"), "https://localhost/acme/acct/");

        let request = request.with_host("acme.test:4001");
        assert_eq!(
            request.relative_endpoint("/acme/acct/"),
            "https://acme.test:4001/acme/acct/"
        );
    }

    #[test]
    fn test_from_http() {
        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/acme/order/1/2?x=y")
            .header(HOST, "example.com")
            .header(CONTENT_TYPE, JOSE_CONTENT_TYPE)
            .body(Bytes::from_static(b"{}"))
            .unwrap();

        let inbound = InboundRequest::from_http(request, true);
        assert_eq!(inbound.host(), "example.com");
        assert_eq!(inbound.request_uri(), "/acme/order/1/2?x=y");
        assert_eq!(inbound.expected_url(), "https://example.com/acme/order/1/2?x=y");
        assert_eq!(inbound.header_str("content-type"), Some(JOSE_CONTENT_TYPE));
        assert_eq!(inbound.body().map(|b| b.len()), Some(2));
    }

    #[test]
    fn test_jose_post_sets_length() {
        let request = InboundRequest::jose_post("example.com", "/acme/new-acct", "abc");
        assert_eq!(request.header_str("content-length"), Some("3"));
        assert_eq!(request.method(), &Method::POST);
    }
}
