//! Remote instance discovery.
//!
//! Discovery is an ordered chain of sources: a live source (platform
//! discovery, DNS, whatever the embedder supplies) is consulted first and the
//! configuration-declared endpoint list is the fallback. Every source obeys
//! the same contract: an empty list is a valid "no known remote target"
//! result, and source errors are logged and skipped rather than failing the
//! lookup. This keeps nil-checks out of the router entirely.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{ConfigStore, Result};

// =============================================================================
// Remote Endpoint
// =============================================================================

/// A remote endpoint capable of hosting a service. Pure value type, produced
/// fresh per discovery call and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub host: String,
    pub port: u16,

    /// Free-form hints (e.g. `scheme`, `zone`).
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl RemoteEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tags: HashMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Base URL for invocation, honoring the `scheme` tag (default `http`).
    pub fn base_url(&self) -> String {
        let scheme = self.tags.get("scheme").map(String::as_str).unwrap_or("http");
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

// =============================================================================
// Discovery Sources
// =============================================================================

/// One strategy for locating remote instances of a service.
///
/// Implementations return an empty vec for "nothing known" and reserve `Err`
/// for genuine lookup failures; the chain logs those and moves on.
#[async_trait::async_trait]
pub trait DiscoverySource: Send + Sync + std::fmt::Debug {
    /// Short name used in fallback logging.
    fn name(&self) -> &str;

    async fn find_instances(&self, service_name: &str) -> Result<Vec<RemoteEndpoint>>;
}

/// Fixed endpoint list, useful for tests and single-node dev setups.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    endpoints: Vec<RemoteEndpoint>,
}

impl StaticDiscovery {
    pub fn new(endpoints: Vec<RemoteEndpoint>) -> Self {
        Self { endpoints }
    }
}

#[async_trait::async_trait]
impl DiscoverySource for StaticDiscovery {
    fn name(&self) -> &str {
        "static"
    }

    async fn find_instances(&self, _service_name: &str) -> Result<Vec<RemoteEndpoint>> {
        Ok(self.endpoints.clone())
    }
}

/// Resolves endpoints from the routing snapshot: service → owning module →
/// the module's declared `{"instances":[...]}` list.
#[derive(Debug)]
pub struct ConfigDiscovery {
    config: Arc<ConfigStore>,
}

impl ConfigDiscovery {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }

    fn parse_instances(value: &serde_json::Value) -> Vec<RemoteEndpoint> {
        let Some(instances) = value.get("instances").and_then(|v| v.as_array()) else {
            return Vec::new();
        };

        let mut endpoints = Vec::with_capacity(instances.len());
        for entry in instances {
            let host = entry.get("host").and_then(|v| v.as_str());
            let port = entry.get("port").and_then(|v| v.as_i64()).unwrap_or(-1);
            let (Some(host), 1..=65535) = (host, port) else {
                // Skip malformed entries rather than failing the whole list.
                continue;
            };

            let mut tags = HashMap::new();
            if let Some(metadata) = entry.get("metadata").and_then(|v| v.as_object()) {
                for (key, val) in metadata {
                    let text = match val {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    tags.insert(key.clone(), text);
                }
            }

            endpoints.push(RemoteEndpoint {
                host: host.to_string(),
                port: port as u16,
                tags,
            });
        }
        endpoints
    }
}

#[async_trait::async_trait]
impl DiscoverySource for ConfigDiscovery {
    fn name(&self) -> &str {
        "config"
    }

    async fn find_instances(&self, service_name: &str) -> Result<Vec<RemoteEndpoint>> {
        let snapshot = self.config.current();

        let Some(service) = snapshot.service(service_name) else {
            tracing::debug!("no service route for {}, returning empty list", service_name);
            return Ok(Vec::new());
        };
        if service.module_name.trim().is_empty() {
            tracing::debug!("service route for {} has no module name", service_name);
            return Ok(Vec::new());
        }

        let Some(module) = snapshot.enabled_module(&service.module_name) else {
            return Ok(Vec::new());
        };
        let Some(instances_json) = module.instances_json.as_ref() else {
            return Ok(Vec::new());
        };

        Ok(Self::parse_instances(instances_json))
    }
}

// =============================================================================
// Remote Locator
// =============================================================================

/// Ordered discovery chain. Sources are tried in order; the first non-empty
/// result wins, errors fall through to the next source.
#[derive(Debug)]
pub struct RemoteLocator {
    sources: Vec<Arc<dyn DiscoverySource>>,
}

impl RemoteLocator {
    pub fn new(sources: Vec<Arc<dyn DiscoverySource>>) -> Self {
        Self { sources }
    }

    /// Standard chain: an optional live source ahead of the config fallback.
    pub fn with_config_fallback(
        live: Option<Arc<dyn DiscoverySource>>,
        config: Arc<ConfigStore>,
    ) -> Self {
        let mut sources: Vec<Arc<dyn DiscoverySource>> = Vec::new();
        if let Some(live) = live {
            sources.push(live);
        }
        sources.push(Arc::new(ConfigDiscovery::new(config)));
        Self { sources }
    }

    /// Candidate endpoints for a service, in no particular order. Empty is a
    /// valid result; this call never fails.
    pub async fn find_instances(&self, service_name: &str) -> Vec<RemoteEndpoint> {
        if service_name.trim().is_empty() {
            return Vec::new();
        }
        for source in &self.sources {
            match source.find_instances(service_name).await {
                Ok(endpoints) if !endpoints.is_empty() => return endpoints,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(
                        "discovery source {} failed for service={}, trying next: {}",
                        source.name(),
                        service_name,
                        err
                    );
                }
            }
        }
        Vec::new()
    }
}
