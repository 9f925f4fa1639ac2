//! Ordered ingress rules: hostname (+ optional path) → origin service.
//!
//! Rules are evaluated in declaration order and the first match wins, so a
//! catch-all belongs last. A table without one can still be built in code;
//! unmatched requests then resolve to `None` and the proxy answers 404.

pub mod matcher;

use std::sync::Arc;

use http::StatusCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;

use crate::config::Config;
use crate::error::{ConfigError, OriginError};
use crate::origin::OriginService;

pub use matcher::{HostMatcher, PathMatcher};

/// One ingress entry.
#[derive(Debug, Clone)]
pub struct Rule {
    pub hostname: HostMatcher,
    pub path: Option<PathMatcher>,
    pub service: Arc<OriginService>,
}

impl Rule {
    pub fn new(hostname: HostMatcher, path: Option<PathMatcher>, service: Arc<OriginService>) -> Self {
        Self {
            hostname,
            path,
            service,
        }
    }

    /// Rule for every hostname and path.
    pub fn catch_all(service: Arc<OriginService>) -> Self {
        Self::new(HostMatcher::Any, None, service)
    }

    pub fn matches(&self, hostname: &str, path: &str) -> bool {
        self.hostname.matches(hostname) && self.path.as_ref().is_none_or(|p| p.matches(path))
    }
}

/// The ingress table.
#[derive(Debug, Clone, Default)]
pub struct Ingress {
    rules: Vec<Rule>,
}

impl Ingress {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Builds the table from configuration, one service per rule.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let connect_timeout = config.origin_request.connect_timeout();
        let mut rules = Vec::with_capacity(config.ingress.len());

        for (index, rule) in config.ingress.iter().enumerate() {
            let hostname_raw = rule.hostname.as_deref().unwrap_or("*");
            let hostname = HostMatcher::parse(hostname_raw).ok_or_else(|| {
                ConfigError::InvalidHostname {
                    index,
                    hostname: hostname_raw.to_string(),
                }
            })?;

            let path = rule
                .path
                .as_deref()
                .map(PathMatcher::new)
                .transpose()
                .map_err(|source| ConfigError::InvalidPath { index, source })?;

            let service = parse_service(&rule.service, connect_timeout).map_err(|reason| {
                ConfigError::InvalidService {
                    index,
                    service: rule.service.clone(),
                    reason,
                }
            })?;

            rules.push(Rule::new(hostname, path, Arc::new(service)));
        }

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Finds the first rule accepting `hostname` and `path`.
    pub fn resolve(&self, hostname: &str, path: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matches(hostname, path))
    }

    /// Starts every distinct origin service once.
    ///
    /// A bind failure aborts startup and is returned; failures of running
    /// origins arrive on `errors`.
    pub async fn start_origins(
        &self,
        tasks: &TaskTracker,
        shutdown: CancellationToken,
        errors: mpsc::Sender<OriginError>,
    ) -> Result<(), OriginError> {
        let mut started: Vec<&Arc<OriginService>> = Vec::new();

        for rule in &self.rules {
            if started.iter().any(|s| Arc::ptr_eq(s, &rule.service)) {
                continue;
            }
            rule.service
                .start(tasks, shutdown.clone(), errors.clone())
                .await?;
            started.push(&rule.service);
        }

        tracing::info!(origins = started.len(), rules = self.rules.len(), "Started origins");
        Ok(())
    }
}

/// Parses a configured service string.
fn parse_service(service: &str, connect_timeout: std::time::Duration) -> Result<OriginService, String> {
    let service = service.trim();

    if let Some(code) = service.strip_prefix("http_status:") {
        let code: u16 = code.parse().map_err(|_| format!("invalid status {:?}", code))?;
        let status = StatusCode::from_u16(code).map_err(|e| e.to_string())?;
        return Ok(OriginService::fixed_status(status));
    }

    match service {
        "hello_world" => return Ok(OriginService::hello_world(connect_timeout)),
        "bastion" => return Ok(OriginService::bastion(connect_timeout)),
        "private_network" => return Ok(OriginService::private_network(connect_timeout)),
        _ => {}
    }

    let url = Url::parse(service).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" => {
            if url.host_str().is_none() {
                return Err("origin URL missing host".to_string());
            }
            Ok(OriginService::reverse_http(url, connect_timeout))
        }
        "tcp" => {
            let host = url.host_str().ok_or("tcp origin missing host")?;
            let port = url.port().ok_or("tcp origin missing port")?;
            Ok(OriginService::tcp(format!("{}:{}", host, port), connect_timeout))
        }
        other => Err(format!("unsupported scheme {:?}", other)),
    }
}
