//! Server configuration via CLI args and environment variables.

use clap::Parser;

/// Edge access-control engine for the video platform.
#[derive(Parser, Debug, Clone)]
#[command(name = "edgegate", version, about)]
pub struct Config {
    /// Bind address.
    #[arg(long, default_value = "0.0.0.0", env = "EDGEGATE_HOST")]
    pub host: String,

    /// Bind port.
    #[arg(long, default_value_t = 8086, env = "EDGEGATE_PORT")]
    pub port: u16,

    /// CORS allowed origins (comma-separated). Empty for no CORS.
    #[arg(long, env = "EDGEGATE_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Geo provider lookup timeout in milliseconds.
    #[arg(long, default_value_t = 500, env = "EDGEGATE_GEO_TIMEOUT_MS")]
    pub geo_timeout_ms: u64,

    /// Geo cache TTL in seconds (VPN/proxy status drifts).
    #[arg(long, default_value_t = 86_400, env = "EDGEGATE_GEO_CACHE_TTL")]
    pub geo_cache_ttl_secs: i64,

    /// Geo cache capacity in entries.
    #[arg(long, default_value_t = 10_000, env = "EDGEGATE_GEO_CACHE_CAPACITY")]
    pub geo_cache_capacity: usize,

    /// Block requests when geo resolution fails (default: fail open).
    #[arg(long, default_value_t = false, env = "EDGEGATE_GEO_FAIL_CLOSED")]
    pub geo_fail_closed: bool,

    /// Audit channel buffer size.
    #[arg(long, default_value_t = 1024, env = "EDGEGATE_AUDIT_BUFFER")]
    pub audit_buffer: usize,

    /// Maximum audit records retained in memory.
    #[arg(long, default_value_t = 100_000, env = "EDGEGATE_AUDIT_CAPACITY")]
    pub audit_capacity: usize,

    /// Audit 1-in-N allowed decisions (0 = blocked only).
    #[arg(long, default_value_t = 100, env = "EDGEGATE_ALLOW_SAMPLE_RATE")]
    pub allow_sample_rate: u64,

    /// Interval for the expiry sweep task, in seconds.
    #[arg(long, default_value_t = 60, env = "EDGEGATE_CLEANUP_INTERVAL")]
    pub cleanup_interval_secs: u64,

    /// Log level.
    #[arg(long, default_value = "info", env = "EDGEGATE_LOG_LEVEL")]
    pub log_level: String,

    /// Log format: "text" or "json".
    #[arg(long, default_value = "text", env = "EDGEGATE_LOG_FORMAT")]
    pub log_format: String,
}

impl Config {
    /// Parses configuration from CLI args and env vars.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
