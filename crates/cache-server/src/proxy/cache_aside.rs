//! Cache-aside handler for the designated cache path.
//!
//! The request's input value is hashed into a [`CacheKey`]; a stored entry is
//! returned without contacting the upstream, otherwise the request is
//! forwarded and a successful body is written back to the store in the
//! background.

use super::context::ProxyContext;
use super::form::form_value;
use super::forwarding::{
    error_response, full_body, upstream_error_response, ForwardError, ProxyBody,
};
use super::headers::{CacheHeadersExt, VALUE_HIT, VALUE_MISS, VALUE_SHARED, X_CACHE};
use super::single_flight::{wait_for_leader, Fetched, Flight};
use crate::cache_key::CacheKey;
use crate::metrics;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use std::time::Instant;
use tracing::{debug, warn};

pub(crate) const ROUTE: &str = "cache";

pub async fn handle_cache_aside(ctx: &ProxyContext, req: Request<Incoming>) -> Response<ProxyBody> {
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, ctx.max_body_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            debug!(limit = ctx.max_body_bytes, "Request body too large");
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
        Err(e) => {
            debug!(error = %e, "Failed to read request body");
            return error_response(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };

    let input = form_value(&parts, &body, &ctx.input_param);
    let key = CacheKey::with_prefix(&ctx.key_prefix, &input);

    match ctx.store.get(&key).await {
        Ok(Some(cached)) => {
            debug!(key = %key, bytes = cached.len(), "Cache hit");
            metrics::record_cache_lookup("hit");
            return cached_response(cached);
        }
        Ok(None) => {
            debug!(key = %key, "Cache miss");
            metrics::record_cache_lookup("miss");
        }
        Err(e) => {
            warn!(
                key = %key,
                backend = ctx.store.backend(),
                error = %e,
                "Cache lookup failed, treating as miss"
            );
            metrics::record_cache_lookup("error");
        }
    }

    let upstream_req = Request::from_parts(parts, full_body(body));

    match ctx.single_flight.as_ref().map(|table| table.join(&key)) {
        Some(Flight::Follower(slot)) => match wait_for_leader(slot).await {
            Some(fetched) => {
                debug!(key = %key, "Answered from in-flight upstream request");
                metrics::record_shared_fetch("success");
                fetched_response(&fetched, &VALUE_SHARED)
            }
            None => {
                metrics::record_shared_fetch("error");
                error_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
            }
        },
        Some(Flight::Leader(guard)) => {
            let result = fetch(ctx, upstream_req).await;
            match &result {
                Ok(fetched) => guard.complete(fetched.clone()),
                Err(_) => drop(guard),
            }
            miss_response(ctx, key, result)
        }
        None => {
            let result = fetch(ctx, upstream_req).await;
            miss_response(ctx, key, result)
        }
    }
}

/// Forward a buffered request and capture the whole upstream answer.
async fn fetch(ctx: &ProxyContext, req: Request<ProxyBody>) -> Result<Fetched, ForwardError> {
    let start = Instant::now();
    let response = ctx.forwarder.forward(req).await?;
    metrics::record_upstream_request(
        ROUTE,
        response.status().as_u16(),
        start.elapsed().as_secs_f64() * 1000.0,
    );

    let (parts, body) = response.into_parts();
    let body = body.collect().await.map_err(ForwardError::Body)?.to_bytes();

    Ok(Fetched {
        status: parts.status,
        content_type: parts.headers.get(CONTENT_TYPE).cloned(),
        body,
    })
}

fn miss_response(
    ctx: &ProxyContext,
    key: CacheKey,
    result: Result<Fetched, ForwardError>,
) -> Response<ProxyBody> {
    let fetched = match result {
        Ok(fetched) => fetched,
        Err(e) => return upstream_error_response(ROUTE, &e),
    };

    if fetched.status.is_success() {
        populate(ctx, key, fetched.body.clone());
    } else {
        debug!(key = %key, status = %fetched.status, "Not caching non-success upstream response");
    }

    fetched_response(&fetched, &VALUE_MISS)
}

/// Write `body` under `key` without holding up the response.
fn populate(ctx: &ProxyContext, key: CacheKey, body: Bytes) {
    let store = ctx.store.clone();
    tokio::spawn(async move {
        match store.set(&key, body).await {
            Ok(()) => metrics::record_cache_write("success"),
            Err(e) => {
                warn!(
                    key = %key,
                    backend = store.backend(),
                    error = %e,
                    "Cache write failed"
                );
                metrics::record_cache_write("error");
            }
        }
    });
}

fn cached_response(body: Bytes) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(body));
    response.set_header(&X_CACHE, &VALUE_HIT);
    response
}

/// 2xx answers are normalized to 200; anything else keeps the upstream status.
fn fetched_response(fetched: &Fetched, cache_status: &HeaderValue) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(fetched.body.clone()));
    if !fetched.status.is_success() {
        *response.status_mut() = fetched.status;
    }
    if let Some(content_type) = &fetched.content_type {
        response.set_header(&CONTENT_TYPE, content_type);
    }
    response.set_header(&X_CACHE, cache_status);
    response
}
