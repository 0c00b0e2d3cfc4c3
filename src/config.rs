//! Runtime configuration
//!
//! Read once from the environment (and an optional `.env` file) by the binaries,
//! then passed by value into the pipeline. The library never reads the environment
//! on its own.

use crate::error::{BridgeError, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Model used when `OLLAMA_MODEL` is not set.
pub const DEFAULT_MODEL: &str = "deepseek-r1:8b";

/// Upper bound on refinement attempts after a failed execution.
pub const MAX_RETRIES: usize = 3;

/// Sampling temperature sent with every generate request.
pub const MODEL_TEMPERATURE: f64 = 0.2;

pub const DEFAULT_MAX_ROWS: usize = 200;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub model: String,
    pub ollama_host: String,
    pub ollama_port: u16,
    pub model_timeout: Duration,
    pub max_retries: usize,
    pub default_max_rows: usize,
    pub server_addr: SocketAddr,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            ollama_host: "localhost".to_string(),
            ollama_port: 11434,
            model_timeout: Duration::from_secs(120),
            max_retries: MAX_RETRIES,
            default_max_rows: DEFAULT_MAX_ROWS,
            server_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

impl BridgeConfig {
    /// Load from the process environment after reading `.env` if present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(model) = get("OLLAMA_MODEL") {
            config.model = model;
        }
        if let Some(host) = get("OLLAMA_HOST") {
            config.ollama_host = host;
        }
        if let Some(port) = get("OLLAMA_PORT") {
            config.ollama_port = parse_value("OLLAMA_PORT", &port)?;
        }
        if let Some(secs) = get("MODEL_TIMEOUT_SECS") {
            let secs: u64 = parse_value("MODEL_TIMEOUT_SECS", &secs)?;
            if secs == 0 {
                return Err(BridgeError::Config("MODEL_TIMEOUT_SECS must be greater than zero".to_string()));
            }
            config.model_timeout = Duration::from_secs(secs);
        }
        if let Some(rows) = get("SQL_BRIDGE_MAX_ROWS") {
            config.default_max_rows = parse_value("SQL_BRIDGE_MAX_ROWS", &rows)?;
        }
        if let Some(addr) = get("SQL_BRIDGE_ADDR") {
            config.server_addr = parse_value("SQL_BRIDGE_ADDR", &addr)?;
        }

        Ok(config)
    }

    /// Generation endpoint of the local model service.
    pub fn generate_endpoint(&self) -> String {
        let host = self
            .ollama_host
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_end_matches('/');
        format!("http://{}:{}/api/generate", host, self.ollama_port)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| BridgeError::Config(format!("{} has an invalid value: '{}'", key, raw)))
}
