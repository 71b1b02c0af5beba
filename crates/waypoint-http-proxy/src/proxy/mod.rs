//! Proxy server module.
//!
//! # Module Structure
//!
//! - `server` - ProxyServer struct and accept loop
//! - `handler` - per-request dispatch (mock / cache / buffered / streaming)
//! - `forwarding` - buffered and streaming forwards to the upstream
//! - `client` - shared upstream HTTP client
//! - `headers` - hop-by-hop scrubbing and proxy header names

pub mod client;
pub mod forwarding;
pub mod handler;
pub mod headers;
mod server;

pub use forwarding::ProxyBody;
pub use handler::{ProxyMode, RequestContext};
pub use server::ProxyServer;
