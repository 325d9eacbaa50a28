//! Proxy server module.
//!
//! # Module Structure
//!
//! - `server` - ProxyServer struct and accept loop
//! - `context` - shared request state built once at startup
//! - `cache_aside` - cache-aside handler for the cache path
//! - `transparent` - pass-through handler for everything else
//! - `forwarding` - request forwarding to the upstream origin
//! - `form` - input value extraction from query and form bodies
//! - `single_flight` - de-duplication of concurrent misses
//! - `client` - HTTP client creation and configuration
//! - `network` - listener creation

mod cache_aside;
mod client;
mod context;
mod form;
mod forwarding;
mod headers;
mod network;
mod server;
mod single_flight;
mod transparent;

pub use client::{create_http_client, HttpClient};
pub use context::ProxyContext;
pub use form::form_value;
pub use forwarding::{error_response, ForwardError, Forwarder, ProxyBody};
pub use network::create_listener;
pub use server::ProxyServer;
pub use single_flight::{Fetched, Flight, SingleFlight};
