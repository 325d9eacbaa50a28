//! Pass-through handler for every path other than the cache path.

use super::context::ProxyContext;
use super::forwarding::{upstream_error_response, ProxyBody};
use crate::metrics;
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::time::Instant;

pub(crate) const ROUTE: &str = "proxy";

/// Forward `req` with its body streamed and mirror the upstream response.
///
/// Status, every header value and the body are returned unchanged; the body
/// is streamed rather than buffered.
pub async fn handle_transparent(ctx: &ProxyContext, req: Request<Incoming>) -> Response<ProxyBody> {
    let start = Instant::now();

    match ctx.forwarder.forward(req.map(|body| body.boxed())).await {
        Ok(response) => {
            metrics::record_upstream_request(
                ROUTE,
                response.status().as_u16(),
                start.elapsed().as_secs_f64() * 1000.0,
            );
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, BoxBody::new(body))
        }
        Err(e) => upstream_error_response(ROUTE, &e),
    }
}
