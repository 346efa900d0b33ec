//! # Mesh Runtime - Service Routing & Admission Control
//!
//! Routing core for a modular service mesh:
//! - Local service registry with lock-free concurrency reservation
//! - Local-vs-remote routing decisions with a uniform response model
//! - Remote instance discovery with a live-source/config fallback chain
//! - Resilient remote invocation (bounded retry + per-route circuit breaker)
//! - Queue offload with a periodic drain loop feeding the same router
//!
//! ## Architecture
//!
//! ```text
//!   inbound request ──► Router.route ──► registry reservation ──► local handler
//!                          │ (no capacity / unknown service)
//!                          └─► RemoteLocator ──► ResilientInvoker ──► remote module
//!
//!   producer ──► QueueStore.enqueue ─ ─ ─► DrainWorker tick ──► Router.route
//! ```
//!
//! `Router::route` never raises: every outcome is a `ServiceResponse`, with
//! failures carrying a stable error code (see `router::error_codes`).

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod discovery;
pub mod invoker;
pub mod queue;
pub mod registry;
pub mod router;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Error, MeshConfig, Result, ServiceRequest, ServiceResponse};
