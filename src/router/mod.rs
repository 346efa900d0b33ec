//! Request routing - the local-vs-remote decision core.
//!
//! `Router::route` is the single call surface of the runtime. It never
//! returns an error: every failure path is synthesized into a FAILURE
//! response with a stable error code.
//!
//! Decision flow per request:
//!   1. Validate the request (service name present).
//!   2. Try local admission: registry lookup + atomic reservation, execute
//!      the handler, release on every exit path.
//!   3. On absence, saturation or a lost reservation race, fall through to
//!      remote: discovery → round-robin endpoint choice → resilient
//!      invocation.
//!
//! A lost reservation race is expected under load and is never an error; the
//! remote path is the correct fallback.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::discovery::RemoteLocator;
use crate::invoker::ResilientInvoker;
use crate::registry::{ServiceDescriptor, ServiceRegistry};
use crate::types::{Error, ServiceRequest, ServiceResponse};

// =============================================================================
// Error codes
// =============================================================================

/// Stable error codes carried on FAILURE responses.
pub mod error_codes {
    /// Malformed input, detected before any side effect.
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    /// Local handler raised an unexpected fault.
    pub const EXCEPTION: &str = "EXCEPTION";
    /// Remote discovery returned nothing.
    pub const NO_INSTANCES: &str = "NO_INSTANCES";
    /// Transport failure, retry exhaustion, or open circuit.
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    /// Remote call nominally succeeded but returned no body.
    pub const EMPTY_RESPONSE: &str = "EMPTY_RESPONSE";
    /// No remote discovery mechanism configured at all.
    pub const NO_REMOTE_PATH: &str = "NO_REMOTE_PATH";
}

// =============================================================================
// Interceptors
// =============================================================================

/// Observes completed routing decisions.
///
/// Interceptors run best-effort after every `route` call with the request and
/// the final response; they cannot alter either. Keep implementations cheap,
/// since they run on the request path.
pub trait RouteInterceptor: Send + Sync {
    fn after_route(&self, request: &ServiceRequest, response: &ServiceResponse);
}

// =============================================================================
// Router statistics
// =============================================================================

/// Route-level outcome counters, labeled {route ∈ local/remote} × {outcome}.
#[derive(Debug, Default)]
pub struct RouterStats {
    local_success: AtomicU64,
    local_failure: AtomicU64,
    remote_success: AtomicU64,
    remote_failure: AtomicU64,
}

/// Point-in-time copy of the router counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RouterStatsView {
    pub local_success: u64,
    pub local_failure: u64,
    pub remote_success: u64,
    pub remote_failure: u64,
}

impl RouterStats {
    fn record(&self, route: RouteKind, response: &ServiceResponse) {
        let counter = match (route, response.is_success()) {
            (RouteKind::Local, true) => &self.local_success,
            (RouteKind::Local, false) => &self.local_failure,
            (RouteKind::Remote, true) => &self.remote_success,
            (RouteKind::Remote, false) => &self.remote_failure,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn view(&self) -> RouterStatsView {
        RouterStatsView {
            local_success: self.local_success.load(Ordering::Relaxed),
            local_failure: self.local_failure.load(Ordering::Relaxed),
            remote_success: self.remote_success.load(Ordering::Relaxed),
            remote_failure: self.remote_failure.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RouteKind {
    Local,
    Remote,
}

impl RouteKind {
    fn label(self) -> &'static str {
        match self {
            RouteKind::Local => "local",
            RouteKind::Remote => "remote",
        }
    }
}

// =============================================================================
// Reservation guard
// =============================================================================

/// Returns a claimed concurrency slot when dropped.
///
/// Covers every way out of the local branch: a normal return, a handler
/// fault, an unwinding panic, and a `route` future cancelled while the
/// handler is still pending.
struct ReservationGuard {
    descriptor: Arc<ServiceDescriptor>,
}

impl ReservationGuard {
    fn new(descriptor: Arc<ServiceDescriptor>) -> Self {
        Self { descriptor }
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        self.descriptor.release();
    }
}

// =============================================================================
// Router
// =============================================================================

/// Routes service requests to a local instance (if registered with spare
/// capacity) or delegates to a remote instance via discovery + resilient
/// invocation.
pub struct Router {
    registry: Arc<ServiceRegistry>,
    locator: Option<Arc<RemoteLocator>>,
    invoker: Option<Arc<ResilientInvoker>>,
    /// Router-wide round-robin counter, shared across services.
    rr: AtomicUsize,
    interceptors: Vec<Arc<dyn RouteInterceptor>>,
    stats: RouterStats,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("remote_path", &self.locator.is_some())
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

impl Router {
    /// Local-only router: remote fall-through answers NO_REMOTE_PATH.
    pub fn local_only(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            locator: None,
            invoker: None,
            rr: AtomicUsize::new(0),
            interceptors: Vec::new(),
            stats: RouterStats::default(),
        }
    }

    /// Router with a remote path.
    pub fn new(
        registry: Arc<ServiceRegistry>,
        locator: Arc<RemoteLocator>,
        invoker: Arc<ResilientInvoker>,
    ) -> Self {
        Self {
            registry,
            locator: Some(locator),
            invoker: Some(invoker),
            rr: AtomicUsize::new(0),
            interceptors: Vec::new(),
            stats: RouterStats::default(),
        }
    }

    /// Append an interceptor to the after-route chain.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn RouteInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn stats(&self) -> RouterStatsView {
        self.stats.view()
    }

    /// Route one request. Never fails: every outcome is a `ServiceResponse`.
    pub async fn route(&self, request: &ServiceRequest) -> ServiceResponse {
        if request.service_name.trim().is_empty() {
            let response = ServiceResponse::failure(
                error_codes::INVALID_REQUEST,
                "Invalid request or service name",
                None,
            );
            self.notify(request, &response);
            return response;
        }

        let name = request.service_name.as_str();

        if let Some(descriptor) = self.registry.get(name) {
            if descriptor.has_capacity() {
                if !descriptor.try_reserve() {
                    // Race: capacity was consumed between the check and the
                    // reservation; delegate to remote.
                    tracing::debug!(
                        "lost reservation race for {}, falling through to remote",
                        name
                    );
                    return self.route_remote_tracked(request).await;
                }

                let slot = ReservationGuard::new(Arc::clone(&descriptor));
                let started = Instant::now();
                let result = descriptor.handler().execute(request).await;
                drop(slot);

                let response = match result {
                    Ok(response) => response,
                    Err(fault) => {
                        tracing::warn!(
                            "local handler fault service={} corr_id={}: {}",
                            name,
                            request.correlation_id,
                            fault
                        );
                        ServiceResponse::failure(error_codes::EXCEPTION, fault.summarize(), None)
                    }
                };
                self.finish(request, &response, RouteKind::Local, started);
                return response;
            }
        }

        // Local unavailable or full: remote path.
        self.route_remote_tracked(request).await
    }

    async fn route_remote_tracked(&self, request: &ServiceRequest) -> ServiceResponse {
        let started = Instant::now();
        let response = self.route_remote(request).await;
        self.finish(request, &response, RouteKind::Remote, started);
        response
    }

    async fn route_remote(&self, request: &ServiceRequest) -> ServiceResponse {
        let name = request.service_name.as_str();

        let (Some(locator), Some(invoker)) = (self.locator.as_ref(), self.invoker.as_ref())
        else {
            return ServiceResponse::failure(
                error_codes::NO_REMOTE_PATH,
                "No remote locator configured",
                None,
            );
        };

        let instances = locator.find_instances(name).await;
        if instances.is_empty() {
            return ServiceResponse::failure(
                error_codes::NO_INSTANCES,
                format!("No remote instances for service: {}", name),
                None,
            );
        }

        let idx = self.rr.fetch_add(1, Ordering::Relaxed) % instances.len();
        let chosen = &instances[idx];

        match invoker.invoke(name, chosen, request).await {
            Ok(response) => response,
            Err(Error::CircuitOpen(_)) => ServiceResponse::failure(
                error_codes::SERVICE_UNAVAILABLE,
                format!("circuit open for service: {}", name),
                None,
            ),
            Err(Error::EmptyResponse(_)) => ServiceResponse::failure(
                error_codes::EMPTY_RESPONSE,
                "Remote call returned no body",
                None,
            ),
            Err(err) => ServiceResponse::failure(
                error_codes::SERVICE_UNAVAILABLE,
                err.summarize(),
                None,
            ),
        }
    }

    fn finish(
        &self,
        request: &ServiceRequest,
        response: &ServiceResponse,
        route: RouteKind,
        started: Instant,
    ) {
        self.stats.record(route, response);
        tracing::debug!(
            "routed service={} route={} outcome={} elapsed_ms={} corr_id={}",
            request.service_name,
            route.label(),
            if response.is_success() { "success" } else { "failure" },
            started.elapsed().as_millis(),
            request.correlation_id
        );
        self.notify(request, response);
    }

    fn notify(&self, request: &ServiceRequest, response: &ServiceResponse) {
        for interceptor in &self.interceptors {
            interceptor.after_route(request, response);
        }
    }
}
