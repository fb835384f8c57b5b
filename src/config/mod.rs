use std::env;
use std::time::Duration;

/// Runtime configuration for the conversion engine
#[derive(Debug, Clone)]
pub struct Config {
    /// Access credential for the chat transport, if the adapter needs one
    pub transport_token: Option<String>,

    /// Maximum accepted upload size in bytes (default: 50 MiB)
    pub max_file_size: u64,

    /// Ceiling for a single conversion before it is abandoned (default: 120s)
    pub convert_timeout: Duration,

    /// Size of the bounded conversion worker pool (default: 4)
    pub max_concurrent_conversions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport_token: None,
            max_file_size: 50 * 1024 * 1024, // 50 MiB
            convert_timeout: Duration::from_secs(120),
            max_concurrent_conversions: 4,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            transport_token: env::var("BOT_TOKEN").ok().filter(|t| !t.is_empty()),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            convert_timeout: env::var("CONVERT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.convert_timeout),

            max_concurrent_conversions: env::var("MAX_CONCURRENT_CONVERSIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_concurrent_conversions),
        }
    }
}
