//! Control-plane configuration

use std::path::PathBuf;

/// Control-plane configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Data directory for persistence
    pub data_dir: PathBuf,
    /// Public hostname used in Problem Details type URIs
    pub public_host: String,
    /// Delayed-job poller interval in milliseconds
    pub poll_interval_ms: u64,
    /// Inbound webhook requests allowed per integration per minute
    pub ingest_rate_limit: u32,
    /// Enable request logging
    pub enable_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: PathBuf::from(".alertplane"),
            public_host: "localhost".to_string(),
            poll_interval_ms: 500,
            ingest_rate_limit: 120,
            enable_logging: true,
        }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("ALERTPLANE_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("ALERTPLANE_PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }
        if let Ok(dir) = std::env::var("ALERTPLANE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(host) = std::env::var("ALERTPLANE_PUBLIC_HOST") {
            config.public_host = host;
        }
        if let Ok(limit) = std::env::var("ALERTPLANE_INGEST_RATE_LIMIT") {
            if let Ok(l) = limit.parse() {
                config.ingest_rate_limit = l;
            }
        }
        if let Ok(logging) = std::env::var("ALERTPLANE_LOGGING") {
            config.enable_logging = logging == "true" || logging == "1";
        }

        config
    }

    /// Builder-style host setter
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Builder-style port setter
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder-style data_dir setter
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Base URI for Problem Details `type` fields
    pub fn problem_base(&self) -> String {
        format!("https://api.{}/errors", self.public_host)
    }
}
