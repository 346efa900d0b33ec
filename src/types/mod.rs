//! Core types for the mesh runtime.
//!
//! This module provides foundational types used throughout the system:
//! - **Messages**: The immutable `ServiceRequest`/`ServiceResponse` model
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Static tunables and the periodically reloaded routing snapshot

mod config;
mod errors;
mod message;

pub use config::{
    CircuitBreakerConfig, ConfigSnapshot, ConfigStore, DrainConfig, MeshConfig, ModuleRoute,
    RetryConfig, RouteMode, ServiceRoute, TransportConfig,
};
pub use errors::{Error, Result};
pub use message::{ResponseStatus, ServiceRequest, ServiceResponse};
