//! Configuration structures.
//!
//! Two kinds of configuration live here:
//!   - Static tunables (`MeshConfig`): retry, circuit breaker, transport and
//!     drain settings, loaded once at startup.
//!   - The routing snapshot (`ConfigSnapshot`): the periodically reloaded view
//!     of modules and services provided by an external configuration source.
//!     The runtime treats it as read-only; a missing or empty snapshot means
//!     "no routes", never an error.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Global runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MeshConfig {
    /// Retry policy for remote invocations.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Circuit breaker parameters (per logical route).
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Outbound HTTP transport settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Queue drain worker settings.
    #[serde(default)]
    pub drain: DrainConfig,
}

/// Retry policy for remote invocations.
///
/// Only transport-level failures are retried; an application-level FAILURE
/// response is a completed call and is returned as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first call.
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Multiplier applied to the backoff after each failed attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff delay before retry number `retry` (0-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(retry as i32);
        self.initial_backoff.mul_f64(factor)
    }
}

/// Circuit breaker parameters, shared by every logical route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Size of the rolling outcome window.
    pub window_size: usize,

    /// Minimum recorded calls before the failure rate is evaluated.
    pub min_calls: usize,

    /// Failure ratio (0.0..=1.0) at or above which the breaker opens.
    pub failure_rate_threshold: f64,

    /// How long an open breaker rejects calls before allowing probes.
    #[serde(with = "humantime_serde")]
    pub open_duration: Duration,

    /// Concurrent probe calls admitted while half-open.
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            min_calls: 5,
            failure_rate_threshold: 0.5,
            open_duration: Duration::from_secs(30),
            half_open_max_probes: 1,
        }
    }
}

/// Outbound HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Per-request timeout. Total remote latency is bounded by
    /// `request_timeout * max_attempts` plus backoff delays.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Queue drain worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainConfig {
    /// Interval between drain ticks.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Maximum items drained per queue per tick.
    pub batch_size: usize,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            batch_size: 50,
        }
    }
}

// =============================================================================
// Routing snapshot
// =============================================================================

/// How requests reach a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteMode {
    /// Synchronous routing only.
    Direct,
    /// Producers enqueue; the drain worker submits to the router later.
    Queue,
    /// Prefer local execution, fall back to remote.
    LocalFirst,
}

/// Routing record for one deployable module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRoute {
    pub name: String,
    pub enabled: bool,
    pub route_mode: RouteMode,

    /// Inbound queue name, required when `route_mode == Queue`.
    #[serde(default)]
    pub queue_name: Option<String>,

    /// Declared endpoint list for remote fallback:
    /// `{"instances":[{"host":"...","port":8081,"metadata":{...}}]}`.
    #[serde(default)]
    pub instances_json: Option<serde_json::Value>,
}

/// Routing record for one named service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRoute {
    pub service_name: String,

    /// Owning module name, used to resolve remote endpoints.
    pub module_name: String,

    /// Declared concurrency budget for local hosting.
    pub max_concurrency: u32,
}

/// Point-in-time view of the routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigSnapshot {
    pub modules: Vec<ModuleRoute>,
    pub services: Vec<ServiceRoute>,
}

impl ConfigSnapshot {
    /// Find the routing record for a service name (case-sensitive).
    pub fn service(&self, service_name: &str) -> Option<&ServiceRoute> {
        self.services
            .iter()
            .find(|s| s.service_name == service_name)
    }

    /// Find an enabled module by name (case-insensitive, matching how module
    /// names are declared by operators).
    pub fn enabled_module(&self, module_name: &str) -> Option<&ModuleRoute> {
        self.modules
            .iter()
            .filter(|m| m.enabled)
            .find(|m| m.name.eq_ignore_ascii_case(module_name))
    }

    /// Distinct queue names of enabled modules in queue-routing mode.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .modules
            .iter()
            .filter(|m| m.enabled && m.route_mode == RouteMode::Queue)
            .filter_map(|m| m.queue_name.clone())
            .filter(|q| !q.trim().is_empty())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Shared handle to the current routing snapshot.
///
/// The external configuration layer calls `replace` on reload; readers grab a
/// cheap `Arc` clone and never observe a torn snapshot.
#[derive(Debug, Default)]
pub struct ConfigStore {
    snapshot: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigStore {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Current snapshot. Falls back to an empty snapshot ("no routes") if the
    /// lock was poisoned by a panicking writer.
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a freshly loaded snapshot.
    pub fn replace(&self, snapshot: ConfigSnapshot) {
        let next = Arc::new(snapshot);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}
