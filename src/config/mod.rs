//! Server configuration.
//!
//! Loaded once at startup (usually from a TOML file), validated, and then
//! passed by value into [`Server::bind`](crate::Server::bind). Nothing reads it
//! again afterwards.
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8080
//! debug = false
//! static_dirs = ["static", "public"]
//! template_dirs = ["views"]
//! not_found_template = "views/errors/404.html"
//! read_timeout_secs = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Smallest listen backlog accepted by [`ServerConfig::validate`].
pub const MIN_BACKLOG: u32 = 5;

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings for a [`Server`](crate::Server).
///
/// Every field has a default, so a partial file (or none at all) is valid.
///
/// # Examples
///
/// ```
/// use netjin::ServerConfig;
///
/// let config = ServerConfig::from_toml_str("port = 0\ndebug = false").unwrap();
/// assert_eq!(config.host, "127.0.0.1");
/// assert_eq!(config.port, 0);
/// assert!(!config.debug);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Host name or IP address to bind.
    pub host: String,
    /// TCP port to bind; `0` picks an ephemeral port.
    pub port: u16,
    /// Log every request at `info` instead of `debug`.
    pub debug: bool,
    /// Directories searched, in order, for paths no route matches.
    pub static_dirs: Vec<PathBuf>,
    /// Directories searched, in order, by the file template renderer.
    pub template_dirs: Vec<PathBuf>,
    /// Template for the built-in 404 page; `{{ pathname }}` is replaced by the path.
    pub not_found_template: Option<PathBuf>,
    /// Seconds a connection may take to deliver its request head.
    pub read_timeout_secs: u64,
    /// Size of the bounded read buffer for the request line and headers.
    pub max_request_bytes: usize,
    /// Listen backlog.
    pub backlog: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 5500,
            debug: true,
            static_dirs: vec![PathBuf::from("static")],
            template_dirs: vec![PathBuf::from("templates")],
            not_found_template: None,
            read_timeout_secs: 60,
            max_request_bytes: 8 * 1024,
            backlog: 128,
        }
    }
}

impl ServerConfig {
    /// Reads, parses, and validates a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, is not valid TOML for
    /// this schema, or fails [`validate`](Self::validate).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialize fine but cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.backlog < MIN_BACKLOG {
            return Err(ConfigError::Invalid(format!(
                "backlog must be at least {MIN_BACKLOG}, got {}",
                self.backlog
            )));
        }
        if self.max_request_bytes < 64 {
            return Err(ConfigError::Invalid(format!(
                "max_request_bytes must be at least 64, got {}",
                self.max_request_bytes
            )));
        }
        if self.read_timeout_secs == 0 {
            return Err(ConfigError::Invalid("read_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    /// Returns the per-connection read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Returns the `host:port` string the server binds to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
