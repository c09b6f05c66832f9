use crate::error::{RelayError, Result};
use crate::manifest::{HostPattern, SegmentRouting};
use crate::models::StrategyMode;
use std::env;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Relay server configuration
    pub server: ServerConfig,
    /// Egress pool configuration
    pub egress: EgressConfig,
    /// Upstream fetch configuration
    pub fetch: FetchConfig,
    /// Health probe configuration
    pub health: HealthConfig,
    /// Manifest rewriting configuration
    pub rewrite: RewriteConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for the relay (default: 5000)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Externally visible base URL used in rewritten links
    pub public_url: Option<String>,
    /// Allowed CORS origins (comma-separated, empty = any origin)
    pub cors_origins: Vec<String>,
    /// Reject loopback/private targets
    pub block_private_targets: bool,
}

#[derive(Debug, Clone)]
pub struct EgressConfig {
    /// Upstream proxy URLs, credentials embedded
    pub proxies: Vec<String>,
    /// Permit the implicit direct path
    pub allow_direct: bool,
    /// Lifetime of a sticky session binding
    pub sticky_ttl: Duration,
    /// Soft cap on concurrent requests per path
    pub max_parallel_per_path: usize,
    /// Minimum wait applied when a path is saturated
    pub guard_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Connect timeout for upstream clients
    pub connect_timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Minimum jittered backoff between attempts
    pub retry_backoff: Duration,
    /// Upper bound of the jitter applied before manifest fetches
    pub request_jitter: Duration,
    /// How header strategies are picked per attempt
    pub strategy_mode: StrategyMode,
    /// Referer sent by the default strategy
    pub default_referer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Interval between probe rounds
    pub interval: Duration,
    /// Timeout for each probe
    pub timeout: Duration,
    /// Probe target
    pub probe_url: String,
}

#[derive(Debug, Clone)]
pub struct RewriteConfig {
    /// Whether segments are routed through the relay
    pub segments: SegmentRouting,
    /// Hosts whose auxiliary assets must go through the relay
    pub asset_relay_hosts: Vec<HostPattern>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            host: "0.0.0.0".to_string(),
            public_url: None,
            cors_origins: Vec::new(),
            block_private_targets: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            proxies: Vec::new(),
            allow_direct: true,
            sticky_ttl: Duration::from_secs(60),
            max_parallel_per_path: 6,
            guard_backoff: Duration::from_millis(100),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
            request_jitter: Duration::from_millis(200),
            strategy_mode: StrategyMode::Rotate,
            default_referer: None,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            probe_url: "https://www.google.com/generate_204".to_string(),
        }
    }
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            segments: SegmentRouting::Relay,
            asset_relay_hosts: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            server: ServerConfig {
                port: get_env_or("RELAY_PORT", "5000").parse().map_err(|_| {
                    RelayError::InvalidConfig("RELAY_PORT must be a valid port number".into())
                })?,
                host: get_env_or("RELAY_HOST", "0.0.0.0"),
                public_url: parse_public_url()?,
                cors_origins: split_list(&get_env_or("CORS_ORIGINS", "")),
                block_private_targets: get_env_or("RELAY_BLOCK_PRIVATE_TARGETS", "false")
                    .parse()
                    .unwrap_or(false),
            },
            egress: EgressConfig {
                proxies: parse_proxies()?,
                allow_direct: get_env_or("RELAY_ALLOW_DIRECT", "true")
                    .parse()
                    .unwrap_or(true),
                sticky_ttl: secs(get_env_or("RELAY_STICKY_TTL", "60").parse().unwrap_or(60)),
                max_parallel_per_path: get_env_or("RELAY_MAX_PARALLEL_PER_PROXY", "6")
                    .parse()
                    .unwrap_or(6),
                guard_backoff: millis(
                    get_env_or("RELAY_GUARD_BACKOFF_MS", "100")
                        .parse()
                        .unwrap_or(100),
                ),
            },
            fetch: FetchConfig {
                timeout: secs(get_env_or("RELAY_FETCH_TIMEOUT", "30").parse().unwrap_or(30)),
                connect_timeout: secs(
                    get_env_or("RELAY_CONNECT_TIMEOUT", "10")
                        .parse()
                        .unwrap_or(10),
                ),
                max_retries: get_env_or("RELAY_MAX_RETRIES", "2").parse().unwrap_or(2),
                retry_backoff: millis(
                    get_env_or("RELAY_RETRY_BACKOFF_MS", "500")
                        .parse()
                        .unwrap_or(500),
                ),
                request_jitter: millis(
                    get_env_or("RELAY_REQUEST_JITTER_MS", "200")
                        .parse()
                        .unwrap_or(200),
                ),
                strategy_mode: StrategyMode::from_str(&get_env_or(
                    "RELAY_STRATEGY_MODE",
                    "rotate",
                )),
                default_referer: env::var("RELAY_DEFAULT_REFERER")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            },
            health: HealthConfig {
                interval: secs(
                    get_env_or("RELAY_HEALTHCHECK_INTERVAL", "30")
                        .parse()
                        .unwrap_or(30),
                ),
                timeout: secs(
                    get_env_or("RELAY_HEALTHCHECK_TIMEOUT", "10")
                        .parse()
                        .unwrap_or(10),
                ),
                probe_url: get_env_or(
                    "RELAY_HEALTHCHECK_URL",
                    "https://www.google.com/generate_204",
                ),
            },
            rewrite: RewriteConfig {
                segments: SegmentRouting::from_str(&get_env_or("RELAY_SEGMENT_MODE", "relay")),
                asset_relay_hosts: split_list(&get_env_or("RELAY_ASSET_RELAY_HOSTS", ""))
                    .iter()
                    .map(|p| HostPattern::new(p))
                    .collect(),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the relay listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_public_url() -> Result<Option<String>> {
    let raw = env::var("RELAY_PUBLIC_URL").unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let url = Url::parse(raw).map_err(|e| {
        RelayError::InvalidConfig(format!("RELAY_PUBLIC_URL must be a valid URL: {}", e))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RelayError::InvalidConfig(
            "RELAY_PUBLIC_URL must use http or https".into(),
        ));
    }

    Ok(Some(raw.trim_end_matches('/').to_string()))
}

fn parse_proxies() -> Result<Vec<String>> {
    split_list(&get_env_or("RELAY_PROXIES", ""))
        .into_iter()
        .map(|raw| validate_proxy_url(&raw).map(|_| raw))
        .collect()
}

/// Validate a single upstream proxy URL
pub fn validate_proxy_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| RelayError::InvalidConfig(format!("invalid proxy URL: {}", e)))?;

    // Reject URLs that carry request-specific components.
    if url.fragment().is_some() || url.query().is_some() {
        return Err(RelayError::InvalidConfig(
            "proxy URL must not include query/fragment".into(),
        ));
    }
    if !(url.path().is_empty() || url.path() == "/") {
        return Err(RelayError::InvalidConfig(
            "proxy URL must not include a path".into(),
        ));
    }

    match url.scheme().to_lowercase().as_str() {
        "http" | "https" | "socks5" | "socks5h" => {}
        other => {
            return Err(RelayError::InvalidConfig(format!(
                "proxy URL has unsupported scheme: {}",
                other
            )))
        }
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(RelayError::InvalidConfig(
            "proxy URL must include a host".into(),
        ));
    }

    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn millis(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
