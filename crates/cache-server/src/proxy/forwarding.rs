//! Request forwarding to the upstream origin.
//!
//! The forwarder rebuilds an inbound request against the configured origin,
//! keeping method, path, query, headers and body, and hands back the raw
//! upstream response. Turning failures into HTTP responses is left to the
//! handlers.

use super::client::HttpClient;
use crate::config::UpstreamOrigin;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};
use hyper::{Request, Response, StatusCode, Uri};
use std::convert::Infallible;
use thiserror::Error;
use tracing::{debug, error};

/// Body type used for everything the proxy sends or returns.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid upstream target '{target}': {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: hyper::http::Error,
    },

    #[error("upstream request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("failed to read upstream response body: {0}")]
    Body(#[source] hyper::Error),
}

impl ForwardError {
    /// Status returned to the caller for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::InvalidTarget { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ if self.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::InvalidTarget { .. } => "target",
            ForwardError::Body(_) => "body",
            ForwardError::Transport(_) if self.is_timeout() => "timeout",
            ForwardError::Transport(e) if e.is_connect() => "connect",
            ForwardError::Transport(_) => "transport",
        }
    }

    fn is_timeout(&self) -> bool {
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = source {
            if let Some(io) = err.downcast_ref::<std::io::Error>() {
                if io.kind() == std::io::ErrorKind::TimedOut {
                    return true;
                }
            }
            source = err.source();
        }
        false
    }
}

/// Issues requests against the fixed upstream origin over the shared pool.
pub struct Forwarder {
    client: HttpClient,
    origin: UpstreamOrigin,
}

impl Forwarder {
    pub fn new(client: HttpClient, origin: UpstreamOrigin) -> Self {
        Self { client, origin }
    }

    pub fn origin(&self) -> &UpstreamOrigin {
        &self.origin
    }

    /// Upstream URL for an inbound request URI: origin + path + query.
    pub fn target_for(&self, uri: &Uri) -> String {
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        self.origin.join(path_and_query)
    }

    /// Forward `req` upstream and return the upstream response unread.
    ///
    /// Every inbound header value is copied except `Host`, which is derived
    /// from the upstream origin. No retry is attempted.
    pub async fn forward(&self, req: Request<ProxyBody>) -> Result<Response<Incoming>, ForwardError> {
        let (parts, body) = req.into_parts();
        let target = self.target_for(&parts.uri);

        debug!(method = %parts.method, target = %target, "Forwarding to upstream");

        let mut upstream_req = Request::builder()
            .method(parts.method)
            .uri(target.as_str())
            .body(body)
            .map_err(|source| ForwardError::InvalidTarget {
                target: target.clone(),
                source,
            })?;

        let headers = upstream_req.headers_mut();
        for (name, value) in parts.headers.iter() {
            if *name != HOST {
                headers.append(name.clone(), value.clone());
            }
        }

        Ok(self.client.request(upstream_req).await?)
    }
}

/// Wrap fully-buffered bytes as a [`ProxyBody`].
pub fn full_body(bytes: impl Into<Bytes>) -> ProxyBody {
    BoxBody::new(Full::new(bytes.into()).map_err(|never: Infallible| match never {}))
}

/// Log a failed forward, count it, and turn it into the caller's response.
pub fn upstream_error_response(route: &'static str, err: &ForwardError) -> Response<ProxyBody> {
    let status = err.status();
    error!(route, kind = err.kind(), error = %err, "Upstream request failed");
    crate::metrics::record_upstream_error(route, err.kind());
    error_response(status, status.canonical_reason().unwrap_or("Upstream error"))
}

/// Helper function to create an error response with a small JSON body.
pub fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionPoolConfig;
    use crate::proxy::client::create_http_client;

    fn forwarder(origin: &str) -> Forwarder {
        let client = create_http_client(&ConnectionPoolConfig::default()).unwrap();
        Forwarder::new(client, UpstreamOrigin::parse(origin).unwrap())
    }

    #[tokio::test]
    async fn test_target_keeps_path_and_query() {
        let fwd = forwarder("http://hash-server:9000");
        let uri: Uri = "/calc?input=hello&x=1".parse().unwrap();
        assert_eq!(fwd.target_for(&uri), "http://hash-server:9000/calc?input=hello&x=1");
    }

    #[tokio::test]
    async fn test_target_ignores_inbound_authority() {
        let fwd = forwarder("http://hash-server:9000");
        let uri: Uri = "http://203.0.113.7:5555/other/path".parse().unwrap();
        assert_eq!(fwd.target_for(&uri), "http://hash-server:9000/other/path");
    }

    #[tokio::test]
    async fn test_target_with_base_path() {
        let fwd = forwarder("http://hash-server/v1");
        let uri: Uri = "/calc".parse().unwrap();
        assert_eq!(fwd.target_for(&uri), "http://hash-server/v1/calc");
    }

    #[tokio::test]
    async fn test_connection_refused_is_bad_gateway() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fwd = forwarder(&format!("http://{addr}"));
        let req = Request::get("/anything").body(full_body("")).unwrap();
        let err = fwd.forward(req).await.unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.kind(), "connect");
    }

    #[tokio::test]
    async fn test_upstream_error_response_names_status() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fwd = forwarder(&format!("http://{addr}"));
        let req = Request::get("/").body(full_body("")).unwrap();
        let err = fwd.forward(req).await.unwrap_err();

        let response = upstream_error_response("proxy", &err);
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"error":"Bad Gateway"}"#);
    }

    #[test]
    fn test_error_response_basic() {
        let response = error_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
        assert_eq!(response.status(), 502);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_error_response_body_is_json() {
        let response = error_response(StatusCode::GATEWAY_TIMEOUT, "say \"hi\"");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], "say \"hi\"");
    }
}
