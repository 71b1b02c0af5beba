//! Shared upstream HTTP client.

use anyhow::Context;
use tracing::{info, warn};

use crate::config::UpstreamProxySettings;

/// Build the single client used for every upstream request. When an upstream
/// proxy is configured all traffic routes through it with basic-auth
/// credentials attached; TLS peer verification follows the skip flag; the
/// timeout is a wall-clock bound on the whole request.
pub fn build_client(settings: &UpstreamProxySettings) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(settings.timeout);

    if settings.skip_tls_verify {
        warn!("TLS certificate verification DISABLED for upstream requests");
        builder = builder.danger_accept_invalid_certs(true);
    }

    if settings.enabled {
        let mut proxy = reqwest::Proxy::all(&settings.url)
            .with_context(|| format!("invalid upstream proxy URL '{}'", settings.url))?;
        if !settings.username.is_empty() {
            proxy = proxy.basic_auth(&settings.username, &settings.password);
        }
        builder = builder.proxy(proxy);
        info!(url = %settings.url, "routing upstream traffic through proxy");
    }

    builder.build().context("failed to build upstream HTTP client")
}
