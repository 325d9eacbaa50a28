//! HTTP client creation and configuration.
//!
//! One pooled client is built at startup and shared by every forwarded
//! request for the lifetime of the process.

use super::forwarding::ProxyBody;
use crate::config::ConnectionPoolConfig;
use hyper::Uri;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tower::Service;
use tracing::{info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type alias for the HTTP client used by the proxy.
pub type HttpClient =
    Client<ConnectDeadline<hyper_rustls::HttpsConnector<HttpConnector>>, ProxyBody>;

/// Create the shared HTTP client with connection pooling.
///
/// TCP connect is bounded by `connect_timeout_secs`; the whole connection
/// attempt including the TLS handshake is bounded by
/// `connect_timeout_secs + tls_handshake_timeout_secs`.
pub fn create_http_client(pool: &ConnectionPoolConfig) -> Result<HttpClient, anyhow::Error> {
    // Both rustls providers may be compiled in; pin one before any TLS config is built.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let connect_timeout = Duration::from_secs(pool.connect_timeout_secs);
    let handshake_timeout = Duration::from_secs(pool.tls_handshake_timeout_secs);

    let mut http_connector = HttpConnector::new();
    http_connector.set_keepalive(Some(Duration::from_secs(pool.keepalive_secs)));
    http_connector.set_connect_timeout(Some(connect_timeout));
    http_connector.set_nodelay(true);
    http_connector.enforce_http(false); // Allow both HTTP and HTTPS

    let roots = match hyper_rustls::HttpsConnectorBuilder::new().with_native_roots() {
        Ok(builder) => builder,
        Err(e) => {
            warn!(
                "Native root certificates unavailable ({}), using bundled webpki roots",
                e
            );
            hyper_rustls::HttpsConnectorBuilder::new().with_webpki_roots()
        }
    };

    let https_connector = roots
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    let connector = ConnectDeadline::new(https_connector, connect_timeout + handshake_timeout);

    let http_client = Client::builder(TokioExecutor::new())
        .pool_timer(TokioTimer::new())
        .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
        .pool_max_idle_per_host(pool.max_idle_per_host)
        .build(connector);

    info!(
        "Connection pool configured (HTTP/1.1): max_idle_per_host={}, idle_timeout={}s, keepalive={}s, connect_timeout={}s, tls_handshake_timeout={}s",
        pool.max_idle_per_host,
        pool.idle_timeout_secs,
        pool.keepalive_secs,
        pool.connect_timeout_secs,
        pool.tls_handshake_timeout_secs
    );

    Ok(http_client)
}

/// Connector wrapper that fails a connection attempt once `deadline` elapses.
///
/// `HttpConnector` only bounds the TCP connect; this also covers the TLS
/// handshake performed by the wrapped HTTPS connector.
#[derive(Clone, Debug)]
pub struct ConnectDeadline<C> {
    inner: C,
    deadline: Duration,
}

impl<C> ConnectDeadline<C> {
    pub fn new(inner: C, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

impl<C> Service<Uri> for ConnectDeadline<C>
where
    C: Service<Uri>,
    C::Response: Send + 'static,
    C::Future: Send + 'static,
    C::Error: Into<BoxError>,
{
    type Response = C::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let deadline = self.deadline;
        let connecting = self.inner.call(dst);
        Box::pin(async move {
            match tokio::time::timeout(deadline, connecting).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connection not established within {deadline:?}"),
                )) as BoxError),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::{pending, ready, Pending, Ready};

    #[derive(Clone)]
    struct NeverConnects;

    impl Service<Uri> for NeverConnects {
        type Response = ();
        type Error = std::io::Error;
        type Future = Pending<Result<(), std::io::Error>>;

        fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _dst: Uri) -> Self::Future {
            pending()
        }
    }

    #[derive(Clone)]
    struct ConnectsImmediately;

    impl Service<Uri> for ConnectsImmediately {
        type Response = &'static str;
        type Error = std::io::Error;
        type Future = Ready<Result<&'static str, std::io::Error>>;

        fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _dst: Uri) -> Self::Future {
            ready(Ok("connected"))
        }
    }

    #[tokio::test]
    async fn test_deadline_times_out_stalled_connect() {
        let mut connector = ConnectDeadline::new(NeverConnects, Duration::from_millis(20));
        let err = connector
            .call(Uri::from_static("http://10.255.255.1/"))
            .await
            .unwrap_err();
        let io = err.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(io.kind(), std::io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_deadline_passes_through_success() {
        let mut connector = ConnectDeadline::new(ConnectsImmediately, Duration::from_secs(1));
        let conn = connector
            .call(Uri::from_static("http://localhost/"))
            .await
            .unwrap();
        assert_eq!(conn, "connected");
    }

    #[tokio::test]
    async fn test_create_http_client_with_defaults() {
        assert!(create_http_client(&ConnectionPoolConfig::default()).is_ok());
    }
}
