//! ProxyServer struct and accept loop.

use super::cache_aside::{self, handle_cache_aside};
use super::client::create_http_client;
use super::context::ProxyContext;
use super::forwarding::ProxyBody;
use super::network::create_listener;
use super::transparent::{self, handle_transparent};
use crate::config::Config;
use crate::metrics;
use crate::store::{create_cache_store, CacheStore};
use anyhow::Context;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

pub struct ProxyServer {
    ctx: Arc<ProxyContext>,
    listen_addr: SocketAddr,
    backlog: i32,
}

impl ProxyServer {
    /// Build the server, connecting to the configured cache store.
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let store_config = config.clone();
        let store = tokio::task::spawn_blocking(move || create_cache_store(&store_config))
            .await
            .context("cache store setup task failed")??;
        Self::with_store(config, store)
    }

    /// Build the server around an already-connected store.
    pub fn with_store(config: Config, store: Arc<dyn CacheStore>) -> Result<Self, anyhow::Error> {
        let client = create_http_client(&config.connection_pool)?;
        let ctx = ProxyContext::new(&config, client, store)?;
        Ok(Self {
            ctx: Arc::new(ctx),
            listen_addr: SocketAddr::new(config.bind_address, config.port),
            backlog: config.backlog,
        })
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let listener = create_listener(self.listen_addr, self.backlog)
            .with_context(|| format!("failed to bind {}", self.listen_addr))?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        info!("Listening on http://{}", listener.local_addr()?);
        info!("Proxying to {}", self.ctx.forwarder.origin().as_str());
        info!(
            "Cache path {} keyed by '{}' using {} store (single-flight: {})",
            self.ctx.cache_path,
            self.ctx.input_param,
            self.ctx.store.backend(),
            self.ctx.single_flight.is_some()
        );

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!("Failed to accept connection: {}", err);
                    continue;
                }
            };
            let ctx = Arc::clone(&self.ctx);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let ctx = Arc::clone(&ctx);
                    async move { Ok::<_, Infallible>(dispatch(&ctx, req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!(
                        "Error serving HTTP connection from {}: {}",
                        remote_addr, err
                    );
                }
            });
        }
    }
}

/// Route one request by exact path match.
async fn dispatch(ctx: &ProxyContext, req: Request<Incoming>) -> Response<ProxyBody> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let (route, response) = if ctx.is_cache_path(&path) {
        (cache_aside::ROUTE, handle_cache_aside(ctx, req).await)
    } else {
        (transparent::ROUTE, handle_transparent(ctx, req).await)
    };

    metrics::record_request(route, response.status().as_u16());
    debug!(%method, %path, route, status = response.status().as_u16(), "Request handled");
    response
}
