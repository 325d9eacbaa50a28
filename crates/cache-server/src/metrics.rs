//! Prometheus metrics for cache-server.
//!
//! Tracks cache effectiveness, upstream latency and failures.
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static! {
    /// Total number of requests answered, by route (cache|proxy) and status
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "cache_server_requests_total",
        "Total number of requests answered by the proxy",
        &["route", "status"]
    )
    .unwrap();

    /// Cache lookups by outcome
    pub static ref CACHE_LOOKUPS_TOTAL: CounterVec = register_counter_vec!(
        "cache_server_cache_lookups_total",
        "Total number of cache store lookups",
        &["result"]  // result: hit|miss|error
    )
    .unwrap();

    /// Cache populations by outcome
    pub static ref CACHE_WRITES_TOTAL: CounterVec = register_counter_vec!(
        "cache_server_cache_writes_total",
        "Total number of cache store writes",
        &["result"]  // result: success|error
    )
    .unwrap();

    /// Responses served from another request's in-flight upstream call
    pub static ref SHARED_FETCHES_TOTAL: CounterVec = register_counter_vec!(
        "cache_server_shared_fetches_total",
        "Cache misses answered by joining an in-flight upstream request",
        &["result"]  // result: success|error
    )
    .unwrap();

    /// Upstream request duration
    pub static ref UPSTREAM_REQUEST_DURATION_MS: HistogramVec = register_histogram_vec!(
        "cache_server_upstream_request_duration_ms",
        "Duration of upstream requests until response headers arrive",
        &["route", "status"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();

    /// Upstream transport failures
    pub static ref UPSTREAM_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "cache_server_upstream_errors_total",
        "Total number of upstream requests that failed before a response",
        &["route", "kind"]  // kind: connect|timeout|transport|body|target
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_request(route: &str, status: u16) {
    REQUESTS_TOTAL
        .with_label_values(&[route, &status.to_string()])
        .inc();
}

pub fn record_cache_lookup(result: &str) {
    CACHE_LOOKUPS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_cache_write(result: &str) {
    CACHE_WRITES_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_shared_fetch(result: &str) {
    SHARED_FETCHES_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_upstream_request(route: &str, status: u16, duration_ms: f64) {
    UPSTREAM_REQUEST_DURATION_MS
        .with_label_values(&[route, &status.to_string()])
        .observe(duration_ms);
}

pub fn record_upstream_error(route: &str, kind: &str) {
    UPSTREAM_ERRORS_TOTAL.with_label_values(&[route, kind]).inc();
}

/// Serve `/metrics` and `/health` until the listener fails.
pub async fn serve_metrics(addr: SocketAddr) -> Result<(), anyhow::Error> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics listening on http://{}", listener.local_addr()?);

    loop {
        let (stream, remote_addr) = listener.accept().await?;
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            if let Err(err) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_metrics_request::<hyper::body::Incoming>))
                .await
            {
                error!(
                    "Error serving metrics connection from {}: {}",
                    remote_addr, err
                );
            }
        });
    }
}

async fn handle_metrics_request<B>(
    req: Request<B>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (status, content_type, body) = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => (
            StatusCode::OK,
            "text/plain; version=0.0.4",
            Bytes::from(collect_metrics()),
        ),
        (&Method::GET, "/health") => (StatusCode::OK, "text/plain", Bytes::from_static(b"OK")),
        _ => (
            StatusCode::NOT_FOUND,
            "text/plain",
            Bytes::from_static(b"Not Found"),
        ),
    };

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    Ok(response)
}
