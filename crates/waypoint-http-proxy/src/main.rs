use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use waypoint_http_proxy::cache::{persist, ResponseCache};
use waypoint_http_proxy::config::{format_duration, OverrideFile, Settings};
use waypoint_http_proxy::overrides::OverrideEngine;
use waypoint_http_proxy::proxy::{client, ProxyMode, ProxyServer};

#[derive(Parser, Debug)]
#[command(name = "waypoint-http-proxy")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PROXY_PORT", default_value = "8080")]
    port: u16,
    /// Upstream base URL; omit to run as an absolute-URI HTTP proxy
    #[arg(short, long, env = "PROXY_TARGET")]
    target: Option<String>,
    /// Path to the override rules file
    #[arg(short, long, env = "OVERRIDE_CONFIG", default_value = "overrides.json")]
    config: String,
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let settings = Settings::from_env();

    let mode = match &args.target {
        Some(target) => {
            let url = reqwest::Url::parse(target)
                .with_context(|| format!("invalid target URL '{target}'"))?;
            ProxyMode::TargetLocked(url)
        }
        None => ProxyMode::AbsoluteUri,
    };

    let overrides = OverrideFile::load_or_default(Path::new(&args.config));
    let engine = OverrideEngine::from_config(overrides);
    info!(
        total = engine.len(),
        active = engine.active_count(),
        config = %args.config,
        "override rules loaded"
    );

    let cache = if settings.cache.enabled {
        let cache = Arc::new(ResponseCache::new(&settings.cache));
        persist::load_from_disk(&cache);
        info!(
            ttl = %format_duration(settings.cache.ttl),
            entries = cache.len(),
            file = %settings.cache.persist_file.display(),
            "response cache enabled"
        );
        Some(cache)
    } else {
        info!("response cache disabled (set CACHE_TTL to enable)");
        None
    };

    let client = client::build_client(&settings.upstream_proxy)?;

    info!(
        request_body = settings.log.show_request_body,
        response_body = settings.log.show_response_body,
        request_headers = settings.log.show_request_headers,
        response_headers = settings.log.show_response_headers,
        mode = settings.log.body_log_mode.as_str(),
        streaming = settings.log.enable_streaming,
        "log settings"
    );

    let server = ProxyServer::new(
        args.port,
        mode,
        Arc::new(settings),
        Arc::new(engine),
        cache,
        client,
    );
    server.run().await
}
