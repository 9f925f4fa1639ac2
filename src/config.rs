//! YAML configuration for the ingress table.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "TUNNEL_ORIGIN_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Ordered ingress rules; the last one must be a catch-all
    pub ingress: Vec<IngressRuleConfig>,

    #[serde(default)]
    pub origin_request: OriginRequestConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngressRuleConfig {
    /// Exact name, `*.suffix` or `*`; missing means every hostname
    #[serde(default)]
    pub hostname: Option<String>,

    /// Regular expression over the URL path
    #[serde(default)]
    pub path: Option<String>,

    /// `http://host:port`, `http_status:<code>`, `hello_world`,
    /// `tcp://host:port`, `bastion` or `private_network`
    pub service: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OriginRequestConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

impl Default for OriginRequestConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl OriginRequestConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Config {
    /// Loads the file named by `TUNNEL_ORIGIN_CONFIG`, or `config.yml`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;

        let last = config.ingress.last().ok_or(ConfigError::NoRules)?;
        if let Some(hostname) = &last.hostname {
            let hostname = hostname.trim();
            if !(hostname.is_empty() || hostname == "*") {
                return Err(ConfigError::MissingCatchAll(hostname.to_string()));
            }
        }
        if last.path.is_some() {
            return Err(ConfigError::MissingCatchAll(format!(
                "{} (path-scoped)",
                last.hostname.as_deref().unwrap_or("*")
            )));
        }

        Ok(config)
    }
}
