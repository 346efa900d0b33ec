//! Local service registry and capacity reservation.
//!
//! Features:
//!   - Service registration and lookup by name
//!   - Lock-free concurrency reservation (compare-and-swap, never a mutex on
//!     the hot path)
//!   - Status transitions (UP/DOWN/DRAINING) and heartbeat tracking
//!   - Point-in-time capacity snapshots for monitoring endpoints
//!
//! The reservation counter is the admission-control invariant the router's
//! correctness depends on: under any number of concurrent callers the active
//! count never exceeds `max_concurrency` and never goes negative.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use crate::types::{ServiceRequest, ServiceResponse};

// =============================================================================
// Service Status
// =============================================================================

/// Hosting status of a local service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    /// Accepting reservations.
    Up,
    /// Not accepting reservations.
    Down,
    /// Finishing in-flight work; no new reservations.
    Draining,
}

impl ServiceStatus {
    fn as_u8(self) -> u8 {
        match self {
            ServiceStatus::Up => 0,
            ServiceStatus::Down => 1,
            ServiceStatus::Draining => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => ServiceStatus::Up,
            1 => ServiceStatus::Down,
            _ => ServiceStatus::Draining,
        }
    }
}

// =============================================================================
// Service Handler
// =============================================================================

/// A locally hosted, executable service.
///
/// Implementations are invoked by the router after a successful reservation.
/// Returning `Err` is treated as an unexpected fault and surfaces as an
/// EXCEPTION response; an application-level failure should instead be a
/// normal `ServiceResponse` with FAILURE status.
#[async_trait::async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn execute(&self, request: &ServiceRequest) -> crate::types::Result<ServiceResponse>;
}

// =============================================================================
// Service Descriptor
// =============================================================================

/// Descriptor for a locally hosted service instance.
///
/// The active counter and status are atomics so reserve/release and status
/// reads never block each other or unrelated services.
pub struct ServiceDescriptor {
    name: String,
    handler: Arc<dyn ServiceHandler>,
    max_concurrency: u32,
    active: AtomicU32,
    status: AtomicU8,
    last_heartbeat: RwLock<DateTime<Utc>>,
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("active", &self.active.load(Ordering::Relaxed))
            .field("max_concurrency", &self.max_concurrency)
            .field("status", &self.status())
            .finish()
    }
}

impl ServiceDescriptor {
    /// Create a descriptor in UP state with zero active reservations.
    pub fn new(
        name: impl Into<String>,
        handler: Arc<dyn ServiceHandler>,
        max_concurrency: u32,
    ) -> Self {
        Self {
            name: name.into(),
            handler,
            max_concurrency,
            active: AtomicU32::new(0),
            status: AtomicU8::new(ServiceStatus::Up.as_u8()),
            last_heartbeat: RwLock::new(Utc::now()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> Arc<dyn ServiceHandler> {
        Arc::clone(&self.handler)
    }

    pub fn max_concurrency(&self) -> u32 {
        self.max_concurrency
    }

    pub fn active(&self) -> u32 {
        self.active.load(Ordering::Acquire)
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: ServiceStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        match self.last_heartbeat.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn touch_heartbeat(&self) {
        let now = Utc::now();
        match self.last_heartbeat.write() {
            Ok(mut guard) => *guard = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    /// Whether a reservation would currently succeed.
    ///
    /// Advisory only: capacity can be consumed between this check and
    /// `try_reserve`; callers must treat a lost race as normal fall-through.
    pub fn has_capacity(&self) -> bool {
        self.status() == ServiceStatus::Up && self.active() < self.max_concurrency
    }

    /// Atomically claim one concurrency slot if one is free and the service
    /// is UP. Compare-and-swap loop; never blocks, never overshoots.
    pub fn try_reserve(&self) -> bool {
        if self.status() != ServiceStatus::Up {
            return false;
        }
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current >= self.max_concurrency {
                return false;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Release a previously claimed slot, floored at zero so a double
    /// release cannot corrupt the counter.
    pub fn release(&self) {
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return;
            }
            match self.active.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

// =============================================================================
// Service Registry
// =============================================================================

/// Per-service view returned by the capacity endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CapacityView {
    pub name: String,
    pub active: u32,
    pub max_concurrency: u32,
    pub status: ServiceStatus,
}

/// Thread-safe in-memory registry of local services.
///
/// The map lock is only taken for registration-shape changes and lookups;
/// reservation traffic goes straight to the descriptor's atomic counter.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<ServiceDescriptor>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ServiceDescriptor>>> {
        match self.services.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_map(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<ServiceDescriptor>>> {
        match self.services.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register or replace a service using explicit parameters.
    ///
    /// A zero `max_concurrency` is allowed and means the service never admits
    /// locally; the router will always take the remote path for it.
    pub fn register(
        &self,
        service_name: impl Into<String>,
        handler: Arc<dyn ServiceHandler>,
        max_concurrency: u32,
    ) -> Arc<ServiceDescriptor> {
        let descriptor = Arc::new(ServiceDescriptor::new(service_name, handler, max_concurrency));
        self.register_descriptor(descriptor)
    }

    /// Register or replace a service descriptor. Stamps the heartbeat and
    /// returns the stored descriptor. Concurrent calls for the same name race
    /// to last-writer-wins.
    pub fn register_descriptor(&self, descriptor: Arc<ServiceDescriptor>) -> Arc<ServiceDescriptor> {
        descriptor.touch_heartbeat();
        let name = descriptor.name().to_string();
        self.write_map().insert(name.clone(), Arc::clone(&descriptor));
        tracing::info!(
            "registered local service: {} (max_concurrency={})",
            name,
            descriptor.max_concurrency()
        );
        descriptor
    }

    /// Remove a service by name. Idempotent no-op if absent.
    pub fn deregister(&self, service_name: &str) {
        if self.write_map().remove(service_name).is_some() {
            tracing::info!("deregistered local service: {}", service_name);
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Get the current descriptor for a name, if registered.
    pub fn get(&self, service_name: &str) -> Option<Arc<ServiceDescriptor>> {
        self.read_map().get(service_name).cloned()
    }

    /// Alias matching the discovery terminology.
    pub fn lookup(&self, service_name: &str) -> Option<Arc<ServiceDescriptor>> {
        self.get(service_name)
    }

    pub fn has_capacity(&self, service_name: &str) -> bool {
        self.get(service_name).is_some_and(|d| d.has_capacity())
    }

    pub fn list_names(&self) -> Vec<String> {
        self.read_map().keys().cloned().collect()
    }

    // =========================================================================
    // Reservation
    // =========================================================================

    /// Atomically reserve one slot for the named service. A missing
    /// descriptor is "no capacity", not an error.
    pub fn reserve(&self, service_name: &str) -> bool {
        self.get(service_name).is_some_and(|d| d.try_reserve())
    }

    /// Release one slot for the named service. Total: missing descriptors and
    /// over-release are no-ops.
    pub fn release(&self, service_name: &str) {
        if let Some(descriptor) = self.get(service_name) {
            descriptor.release();
        }
    }

    // =========================================================================
    // Status & monitoring
    // =========================================================================

    /// Transition a service's hosting status. Returns false if unknown.
    pub fn set_status(&self, service_name: &str, status: ServiceStatus) -> bool {
        match self.get(service_name) {
            Some(descriptor) => {
                descriptor.set_status(status);
                true
            }
            None => false,
        }
    }

    /// Refresh a service's heartbeat. Returns false if unknown.
    pub fn touch_heartbeat(&self, service_name: &str) -> bool {
        match self.get(service_name) {
            Some(descriptor) => {
                descriptor.touch_heartbeat();
                true
            }
            None => false,
        }
    }

    /// Point-in-time capacity view of every registered service.
    ///
    /// Each entry is internally consistent; the snapshot as a whole carries no
    /// cross-entry atomicity guarantee.
    pub fn capacity_snapshot(&self) -> Vec<CapacityView> {
        self.read_map()
            .values()
            .map(|d| CapacityView {
                name: d.name().to_string(),
                active: d.active(),
                max_concurrency: d.max_concurrency(),
                status: d.status(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Result;
    use std::collections::HashMap as StdHashMap;

    struct EchoHandler;

    #[async_trait::async_trait]
    impl ServiceHandler for EchoHandler {
        async fn execute(&self, request: &ServiceRequest) -> Result<ServiceResponse> {
            Ok(ServiceResponse::success(request.payload.clone()))
        }
    }

    fn handler() -> Arc<dyn ServiceHandler> {
        Arc::new(EchoHandler)
    }

    #[test]
    fn register_replaces_and_stamps_heartbeat() {
        let registry = ServiceRegistry::new();
        let first = registry.register("SVC", handler(), 2);
        assert_eq!(first.max_concurrency(), 2);

        let replaced = registry.register("SVC", handler(), 8);
        assert_eq!(replaced.max_concurrency(), 8);
        assert_eq!(
            registry.get("SVC").unwrap().max_concurrency(),
            8,
            "last writer wins"
        );
    }

    #[test]
    fn deregister_is_idempotent() {
        let registry = ServiceRegistry::new();
        registry.register("SVC", handler(), 1);
        registry.deregister("SVC");
        assert!(registry.get("SVC").is_none());
        // Second deregister and unknown names are no-ops.
        registry.deregister("SVC");
        registry.deregister("NEVER_EXISTED");
    }

    #[test]
    fn reserve_respects_capacity_and_release_restores_it() {
        let registry = ServiceRegistry::new();
        registry.register("SVC", handler(), 2);

        assert!(registry.reserve("SVC"));
        assert!(registry.reserve("SVC"));
        assert!(!registry.reserve("SVC"), "third reservation must fail");
        assert!(!registry.has_capacity("SVC"));

        registry.release("SVC");
        assert!(registry.has_capacity("SVC"));
        assert!(registry.reserve("SVC"));
    }

    #[test]
    fn release_is_floored_at_zero() {
        let registry = ServiceRegistry::new();
        registry.register("SVC", handler(), 1);

        registry.release("SVC");
        registry.release("SVC");
        assert_eq!(registry.get("SVC").unwrap().active(), 0);

        // Missing descriptor release is a no-op, not an error.
        registry.release("UNKNOWN");
    }

    #[test]
    fn reserve_fails_for_non_up_status() {
        let registry = ServiceRegistry::new();
        registry.register("SVC", handler(), 4);

        registry.set_status("SVC", ServiceStatus::Draining);
        assert!(!registry.reserve("SVC"));
        assert!(!registry.has_capacity("SVC"));

        registry.set_status("SVC", ServiceStatus::Down);
        assert!(!registry.reserve("SVC"));

        registry.set_status("SVC", ServiceStatus::Up);
        assert!(registry.reserve("SVC"));
    }

    #[test]
    fn reserve_missing_service_is_no_capacity() {
        let registry = ServiceRegistry::new();
        assert!(!registry.reserve("UNKNOWN"));
        assert!(!registry.has_capacity("UNKNOWN"));
    }

    #[test]
    fn concurrent_reservations_never_overshoot() {
        let registry = Arc::new(ServiceRegistry::new());
        let max = 7u32;
        registry.register("SVC", handler(), max);

        let attempts = 64;
        let mut handles = Vec::with_capacity(attempts);
        for _ in 0..attempts {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || registry.reserve("SVC")));
        }

        let granted = handles
            .into_iter()
            .map(|h| h.join())
            .filter(|r| matches!(r, Ok(true)))
            .count() as u32;

        assert_eq!(granted, max, "exactly max_concurrency reservations succeed");
        assert_eq!(registry.get("SVC").unwrap().active(), max);
    }

    #[test]
    fn concurrent_reserve_release_churn_stays_bounded() {
        let registry = Arc::new(ServiceRegistry::new());
        let max = 3u32;
        registry.register("SVC", handler(), max);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                for _ in 0..500 {
                    if registry.reserve("SVC") {
                        let descriptor = registry.get("SVC").unwrap();
                        assert!(descriptor.active() <= max, "overshoot observed");
                        registry.release("SVC");
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.get("SVC").unwrap().active(), 0);
    }

    #[test]
    fn capacity_snapshot_reflects_entries() {
        let registry = ServiceRegistry::new();
        registry.register("A", handler(), 3);
        registry.register("B", handler(), 5);
        registry.reserve("B");

        let snapshot = registry.capacity_snapshot();
        assert_eq!(snapshot.len(), 2);

        let by_name: StdHashMap<&str, &CapacityView> =
            snapshot.iter().map(|v| (v.name.as_str(), v)).collect();
        assert_eq!(by_name["A"].active, 0);
        assert_eq!(by_name["B"].active, 1);
        assert_eq!(by_name["B"].max_concurrency, 5);
        assert_eq!(by_name["B"].status, ServiceStatus::Up);
    }
}
