//! Runtime settings.
//!
//! Everything here is resolved once at startup from the environment and is
//! immutable afterwards. The override rules file has its own module.

mod overrides;

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

pub use overrides::{create_example_config, BodyReplacement, OverrideFile, OverrideRule};

/// How request/response bodies are rendered into the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyLogMode {
    /// Never log bodies.
    None,
    /// Log bodies in full (bounded by a hard safety limit).
    Full,
    /// Truncate bodies to `max_log_length`.
    Truncate,
    /// JSON bodies in full and pretty-printed, everything else truncated.
    #[default]
    JsonFull,
}

impl BodyLogMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "full" => Some(Self::Full),
            "truncate" => Some(Self::Truncate),
            "json_full" => Some(Self::JsonFull),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Full => "full",
            Self::Truncate => "truncate",
            Self::JsonFull => "json_full",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub show_request_body: bool,
    pub show_response_body: bool,
    pub show_request_headers: bool,
    pub show_response_headers: bool,
    pub body_log_mode: BodyLogMode,
    pub max_log_length: usize,
    /// Stream bodies through without buffering (disables body logging and
    /// body rewriting on the streamed path).
    pub enable_streaming: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            show_request_body: true,
            show_response_body: true,
            show_request_headers: true,
            show_response_headers: true,
            body_log_mode: BodyLogMode::JsonFull,
            max_log_length: 2000,
            enable_streaming: false,
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Self {
        let mut settings = Self {
            show_request_body: flag_enabled(env::var("LOG_REQUEST_BODY").ok()),
            show_response_body: flag_enabled(env::var("LOG_RESPONSE_BODY").ok()),
            show_request_headers: flag_enabled(env::var("LOG_REQUEST_HEADERS").ok()),
            show_response_headers: flag_enabled(env::var("LOG_RESPONSE_HEADERS").ok()),
            enable_streaming: env::var("ENABLE_STREAMING").as_deref() == Ok("true"),
            ..Self::default()
        };

        if let Ok(mode) = env::var("BODY_LOG_MODE") {
            match BodyLogMode::parse(&mode) {
                Some(parsed) => settings.body_log_mode = parsed,
                None => warn!(mode = %mode, "unknown BODY_LOG_MODE, using json_full"),
            }
        }

        if let Ok(raw) = env::var("MAX_LOG_LENGTH") {
            match raw.parse::<usize>() {
                Ok(len) if len > 0 => settings.max_log_length = len,
                _ => warn!(raw = %raw, "invalid MAX_LOG_LENGTH, using default"),
            }
        }

        settings
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
    /// Header names that contribute to the cache fingerprint in addition to
    /// `Authorization` and `Content-Type`.
    pub key_headers: Vec<String>,
    /// URL patterns with `*` wildcards; empty means every URL is cacheable.
    pub url_patterns: Vec<String>,
    pub persist_file: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: Duration::ZERO,
            key_headers: Vec::new(),
            url_patterns: Vec::new(),
            persist_file: PathBuf::from("cache.gob"),
        }
    }
}

impl CacheSettings {
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(file) = env::var("CACHE_FILE") {
            if !file.is_empty() {
                settings.persist_file = PathBuf::from(file);
            }
        }

        let raw_ttl = match env::var("CACHE_TTL") {
            Ok(raw) if !raw.is_empty() => raw,
            _ => return settings,
        };
        match parse_duration(&raw_ttl) {
            Some(ttl) => {
                settings.enabled = true;
                settings.ttl = ttl;
            }
            None => {
                warn!(raw = %raw_ttl, "invalid CACHE_TTL format, caching disabled");
                return settings;
            }
        }

        settings.key_headers = split_list(env::var("CACHE_KEY_HEADERS").ok());
        settings.url_patterns = split_list(env::var("CACHE_URL_PATTERNS").ok());
        settings
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamProxySettings {
    pub enabled: bool,
    pub url: String,
    pub username: String,
    pub password: String,
    pub skip_tls_verify: bool,
    pub timeout: Duration,
}

impl Default for UpstreamProxySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            username: String::new(),
            password: String::new(),
            skip_tls_verify: false,
            timeout: Duration::from_secs(30),
        }
    }
}

impl UpstreamProxySettings {
    pub fn from_env() -> Self {
        let mut settings = Self {
            skip_tls_verify: env::var("UPSTREAM_PROXY_SKIP_TLS").as_deref() == Ok("true"),
            ..Self::default()
        };

        if let Ok(raw) = env::var("UPSTREAM_PROXY_TIMEOUT") {
            match parse_duration(&raw) {
                Some(timeout) => settings.timeout = timeout,
                None => warn!(raw = %raw, "invalid UPSTREAM_PROXY_TIMEOUT, using 30s"),
            }
        }

        if let Ok(url) = env::var("UPSTREAM_PROXY") {
            if !url.is_empty() {
                settings.enabled = true;
                settings.url = url;
                settings.username = env::var("UPSTREAM_PROXY_USERNAME").unwrap_or_default();
                settings.password = env::var("UPSTREAM_PROXY_PASSWORD").unwrap_or_default();
            }
        }

        settings
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub log: LogSettings,
    pub cache: CacheSettings,
    pub upstream_proxy: UpstreamProxySettings,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            log: LogSettings::from_env(),
            cache: CacheSettings::from_env(),
            upstream_proxy: UpstreamProxySettings::from_env(),
        }
    }
}

/// Logging flags default to on; only the literal `false` disables them.
fn flag_enabled(value: Option<String>) -> bool {
    value.as_deref() != Some("false")
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a suffixed duration string: `500ms`, `45s`, `30m`, `3h` and
/// concatenations like `1h30m`. Returns `None` for anything malformed.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = raw.chars().peekable();
    let mut segments = 0usize;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            return None;
        }
        let mut unit = String::from(c);
        if c == 'm' && chars.peek() == Some(&'s') {
            chars.next();
            unit.push('s');
        }
        let value: u64 = digits.parse().ok()?;
        digits.clear();
        total += match unit.as_str() {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            _ => return None,
        };
        segments += 1;
    }

    // A bare number with no unit is not a duration.
    if !digits.is_empty() || segments == 0 {
        return None;
    }
    Some(total)
}

/// Render a duration compactly for logs and the stats document.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 && d.subsec_millis() > 0 {
        return format!("{}ms", d.subsec_millis());
    }
    if secs > 0 && secs % 3600 == 0 {
        return format!("{}h", secs / 3600);
    }
    if secs > 0 && secs % 60 == 0 {
        return format!("{}m", secs / 60);
    }
    format!("{secs}s")
}
