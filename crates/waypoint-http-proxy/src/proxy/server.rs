//! Listener and accept loop.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, info};

use super::forwarding::ProxyBody;
use super::handler::{handle_request, ProxyMode, RequestContext};
use crate::admin;
use crate::cache::{persist, ResponseCache};
use crate::config::Settings;
use crate::overrides::OverrideEngine;

/// The proxy runtime: everything a request needs, constructed once at
/// startup. Only the stats endpoint reads it outside the dispatcher.
pub struct ProxyServer {
    port: u16,
    mode: ProxyMode,
    settings: Arc<Settings>,
    engine: Arc<OverrideEngine>,
    cache: Option<Arc<ResponseCache>>,
    client: reqwest::Client,
}

impl ProxyServer {
    pub fn new(
        port: u16,
        mode: ProxyMode,
        settings: Arc<Settings>,
        engine: Arc<OverrideEngine>,
        cache: Option<Arc<ResponseCache>>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            port,
            mode,
            settings,
            engine,
            cache,
            client,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind listener on {addr}"))?;
        self.serve(listener).await
    }

    /// Accept loop on an already-bound listener (integration tests bind to
    /// an ephemeral port themselves).
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        info!("listening on http://{}", listener.local_addr()?);
        match &self.mode {
            ProxyMode::TargetLocked(target) => info!(target = %target, "target-locked forward proxy"),
            ProxyMode::AbsoluteUri => info!("absolute-URI HTTP proxy"),
        }

        if let Some(cache) = &self.cache {
            persist::spawn_persistence_worker(Arc::clone(cache));
        }

        let server = Arc::new(self);
        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let server = Arc::clone(&server);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { server.handle(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(%remote_addr, error = %err, "connection closed with error");
                }
            });
        }
    }

    async fn handle(&self, req: Request<Incoming>) -> Result<Response<ProxyBody>, Infallible> {
        if req.uri().path() == "/_proxy_stats" {
            return Ok(admin::stats_response(
                &self.settings,
                &self.engine,
                self.cache.as_deref(),
            ));
        }

        let ctx = RequestContext {
            settings: &self.settings,
            engine: &self.engine,
            cache: self.cache.as_deref(),
            client: &self.client,
            mode: &self.mode,
        };
        handle_request(&ctx, req).await
    }
}
