//! Request/response model for service invocation.
//!
//! `ServiceRequest` and `ServiceResponse` are the wire-and-memory currency of
//! the whole runtime: inbound controllers, the router, remote invocation and
//! the queue offload path all speak these two types. Both are immutable once
//! constructed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An invocation request for a named service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub service_name: String,

    /// Service-specific input values.
    #[serde(default)]
    pub payload: HashMap<String, serde_json::Value>,

    /// Transport/trace metadata (never interpreted by the router).
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Opaque trace token carried unchanged through the request lifecycle.
    pub correlation_id: String,
}

impl ServiceRequest {
    pub fn new(
        service_name: impl Into<String>,
        payload: HashMap<String, serde_json::Value>,
        metadata: HashMap<String, String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            payload,
            metadata,
            correlation_id: correlation_id.into(),
        }
    }

    /// Build a request with an empty payload and a fresh v4 correlation id.
    pub fn named(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            payload: HashMap::new(),
            metadata: HashMap::new(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Outcome status of a service invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// The outcome of executing a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub status: ResponseStatus,

    /// Result values; empty on failure unless partial data is supplied.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    /// Stable machine-readable code, present iff status is FAILURE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ServiceResponse {
    pub fn success(data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            status: ResponseStatus::Success,
            data,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failure(
        error_code: impl Into<String>,
        error_message: impl Into<String>,
        data: Option<HashMap<String, serde_json::Value>>,
    ) -> Self {
        Self {
            status: ResponseStatus::Failure,
            data: data.unwrap_or_default(),
            error_code: Some(error_code.into()),
            error_message: Some(error_message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}
