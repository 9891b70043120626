//! Configuration management for the download worker.
//!
//! Loads configuration from a TOML file; command-line flags override it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub intercept: InterceptConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Origin the site is served under (e.g. `https://drivers.example`).
    /// Derived from bind/port when unset.
    #[serde(default)]
    pub public_origin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterceptConfig {
    /// Path prefix of download requests; the remainder is the archive name
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Name answered with a bare `OK` to keep the worker alive
    #[serde(default = "default_keepalive_token")]
    pub keepalive_token: String,

    /// Form field carrying the JSON manifest
    #[serde(default = "default_payload_field")]
    pub payload_field: String,

    /// Largest download request body accepted, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Also treat a foreign `Origin` header as a cross-origin request.
    /// Off by default: only the request target decides.
    #[serde(default)]
    pub check_origin_header: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Probe every item with HEAD before streaming the archive
    #[serde(default = "default_prepass")]
    pub prepass: bool,

    /// Entry compression (stored, deflate)
    #[serde(default = "default_compression")]
    pub compression: String,

    /// Bytes buffered between the archive writer and the response body
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// User-Agent sent with item requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Directory served for every request that is not intercepted
    #[serde(default = "default_site_root")]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Shut down after this many idle seconds (0 disables)
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_prefix() -> String {
    "/product/downloadDrivers/".to_string()
}

fn default_keepalive_token() -> String {
    "keepalive".to_string()
}

fn default_payload_field() -> String {
    "payload".to_string()
}

fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024 // 64MB
}

fn default_prepass() -> bool {
    true
}

fn default_compression() -> String {
    "stored".to_string()
}

fn default_buffer_size() -> usize {
    64 * 1024 // 64KB
}

fn default_user_agent() -> String {
    concat!("download-worker/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_site_root() -> PathBuf {
    PathBuf::from("./public")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            public_origin: None,
        }
    }
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            keepalive_token: default_keepalive_token(),
            payload_field: default_payload_field(),
            max_body_bytes: default_max_body_bytes(),
            check_origin_header: false,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            prepass: default_prepass(),
            compression: default_compression(),
            buffer_size: default_buffer_size(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            root: default_site_root(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Origin this worker answers for, without a trailing slash
    pub fn own_origin(&self) -> String {
        match &self.server.public_origin {
            Some(origin) => origin.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.server.bind, self.server.port),
        }
    }
}
