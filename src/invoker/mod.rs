//! Resilient remote invocation.
//!
//! `ResilientInvoker` wraps a single remote POST in bounded retry with
//! exponential backoff and a per-route circuit breaker. The breaker is keyed
//! by logical route (the target service name), not per endpoint instance, so
//! round-robin load spread across a service's endpoints shares one breaker
//! budget by design.
//!
//! Retry and breaker compose without double counting: all attempts of one
//! invocation are recorded as a single breaker outcome.

pub mod circuit;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::discovery::RemoteEndpoint;
use crate::types::{
    CircuitBreakerConfig, Error, Result, RetryConfig, ServiceRequest, ServiceResponse,
    TransportConfig,
};
use circuit::{CircuitBreaker, CircuitState, Permit};

// =============================================================================
// Transport
// =============================================================================

/// Outbound transport seam: "POST body, get typed response or error".
///
/// `Ok(None)` means the call nominally succeeded but carried no body, which
/// the invoker treats as a retryable failure distinct from transport errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RemoteTransport: Send + Sync + std::fmt::Debug {
    async fn post(&self, url: &str, request: &ServiceRequest)
        -> Result<Option<ServiceResponse>>;
}

/// reqwest-backed transport with a bounded per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl RemoteTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        request: &ServiceRequest,
    ) -> Result<Option<ServiceResponse>> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(format!("remote returned {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::transport(e.to_string()))?;
        if body.is_empty() {
            return Ok(None);
        }

        let parsed: ServiceResponse = serde_json::from_slice(&body)?;
        Ok(Some(parsed))
    }
}

// =============================================================================
// Resilient Invoker
// =============================================================================

/// Invokes remote endpoints with retry + circuit breaking.
#[derive(Debug)]
pub struct ResilientInvoker {
    transport: Arc<dyn RemoteTransport>,
    retry: RetryConfig,
    breaker_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl ResilientInvoker {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        retry: RetryConfig,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            transport,
            retry,
            breaker_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Invoke a service on a chosen endpoint.
    ///
    /// Fails with `Error::CircuitOpen` when the route's breaker rejects the
    /// call (no transport attempt is made), or with the last attempt's error
    /// once retries are exhausted. An application-level FAILURE response is a
    /// completed call: it is returned as-is and never retried.
    pub async fn invoke(
        &self,
        route: &str,
        endpoint: &RemoteEndpoint,
        request: &ServiceRequest,
    ) -> Result<ServiceResponse> {
        let breaker = self.breaker(route);

        if breaker.try_acquire() == Permit::Rejected {
            return Err(Error::circuit_open(format!(
                "circuit open for service: {}",
                route
            )));
        }

        let url = format!(
            "{}/internal/service/{}",
            endpoint.base_url(),
            request.service_name
        );

        let outcome = self.post_with_retry(&url, request).await;
        match &outcome {
            Ok(_) => breaker.record_success(),
            Err(_) => breaker.record_failure(),
        }
        outcome
    }

    /// Breaker state for a logical route (CLOSED for never-seen routes).
    pub fn circuit_state(&self, route: &str) -> CircuitState {
        self.read_breakers()
            .get(route)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    async fn post_with_retry(
        &self,
        url: &str,
        request: &ServiceRequest,
    ) -> Result<ServiceResponse> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_err: Option<Error> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay: Duration = self.retry.backoff_for(attempt - 1);
                tracing::debug!(
                    "retrying remote call attempt={} url={} after {:?}",
                    attempt + 1,
                    url,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            match self.transport.post(url, request).await {
                Ok(Some(response)) => return Ok(response),
                Ok(None) => {
                    last_err = Some(Error::empty_response("remote call returned no body"));
                }
                Err(err) => {
                    tracing::debug!(
                        "remote call failed attempt={} url={} corr_id={}: {}",
                        attempt + 1,
                        url,
                        request.correlation_id,
                        err
                    );
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::transport("remote call failed")))
    }

    fn breaker(&self, route: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.read_breakers().get(route) {
            return Arc::clone(existing);
        }
        let mut breakers = match self.breakers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            breakers
                .entry(route.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.breaker_config.clone()))),
        )
    }

    fn read_breakers(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        match self.breakers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            backoff_multiplier: 1.0,
        }
    }

    fn permissive_breaker() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            window_size: 100,
            min_calls: 100,
            failure_rate_threshold: 1.0,
            open_duration: Duration::from_secs(60),
            half_open_max_probes: 1,
        }
    }

    fn trip_fast_breaker() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            window_size: 5,
            min_calls: 5,
            failure_rate_threshold: 1.0,
            open_duration: Duration::from_secs(60),
            half_open_max_probes: 1,
        }
    }

    fn endpoint() -> RemoteEndpoint {
        RemoteEndpoint::new("localhost", 8090)
    }

    fn request() -> ServiceRequest {
        ServiceRequest::named("SVC_REMOTE")
    }

    fn ok_response() -> ServiceResponse {
        ServiceResponse::success(StdHashMap::from([(
            "ok".to_string(),
            serde_json::json!(true),
        )]))
    }

    #[tokio::test]
    async fn invoke_builds_internal_service_url() {
        let mut transport = MockRemoteTransport::new();
        transport
            .expect_post()
            .withf(|url, _| url == "http://localhost:8090/internal/service/SVC_REMOTE")
            .times(1)
            .returning(|_, _| Ok(Some(ok_response())));

        let invoker =
            ResilientInvoker::new(Arc::new(transport), fast_retry(), permissive_breaker());
        let resp = invoker
            .invoke("SVC_REMOTE", &endpoint(), &request())
            .await
            .unwrap();
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn retries_transport_failures_then_succeeds() {
        let mut transport = MockRemoteTransport::new();
        let mut calls = 0u32;
        transport.expect_post().times(3).returning(move |_, _| {
            calls += 1;
            if calls < 3 {
                Err(Error::transport(format!("remote down #{}", calls)))
            } else {
                Ok(Some(ok_response()))
            }
        });

        let invoker =
            ResilientInvoker::new(Arc::new(transport), fast_retry(), permissive_breaker());
        let resp = invoker
            .invoke("SVC_REMOTE", &endpoint(), &request())
            .await
            .unwrap();
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn application_failure_is_returned_without_retry() {
        let mut transport = MockRemoteTransport::new();
        transport
            .expect_post()
            .times(1)
            .returning(|_, _| Ok(Some(ServiceResponse::failure("DOWNSTREAM", "nope", None))));

        let invoker =
            ResilientInvoker::new(Arc::new(transport), fast_retry(), permissive_breaker());
        let resp = invoker
            .invoke("SVC_REMOTE", &endpoint(), &request())
            .await
            .unwrap();
        assert!(!resp.is_success());
        assert_eq!(resp.error_code.as_deref(), Some("DOWNSTREAM"));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_last_error_verbatim() {
        let mut transport = MockRemoteTransport::new();
        let mut calls = 0u32;
        transport.expect_post().times(3).returning(move |_, _| {
            calls += 1;
            Err(Error::transport(format!("remote down #{}", calls)))
        });

        let invoker =
            ResilientInvoker::new(Arc::new(transport), fast_retry(), permissive_breaker());
        let err = invoker
            .invoke("SVC_REMOTE", &endpoint(), &request())
            .await
            .unwrap_err();
        assert_eq!(err.summarize(), "remote down #3");
    }

    #[tokio::test]
    async fn empty_body_maps_to_empty_response_error() {
        let mut transport = MockRemoteTransport::new();
        transport.expect_post().times(3).returning(|_, _| Ok(None));

        let invoker =
            ResilientInvoker::new(Arc::new(transport), fast_retry(), permissive_breaker());
        let err = invoker
            .invoke("SVC_REMOTE", &endpoint(), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyResponse(_)));
    }

    #[tokio::test]
    async fn breaker_opens_and_short_circuits_without_transport_call() {
        let mut transport = MockRemoteTransport::new();
        // 5 invocations × 1 attempt each (retry disabled) trip the breaker;
        // the 6th must never reach the transport.
        transport
            .expect_post()
            .times(5)
            .returning(|_, _| Err(Error::transport("remote down")));

        let retry = RetryConfig {
            max_attempts: 1,
            ..fast_retry()
        };
        let invoker = ResilientInvoker::new(Arc::new(transport), retry, trip_fast_breaker());

        for _ in 0..5 {
            let err = invoker
                .invoke("SVC_REMOTE", &endpoint(), &request())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Transport(_)));
        }
        assert_eq!(invoker.circuit_state("SVC_REMOTE"), CircuitState::Open);

        let err = invoker
            .invoke("SVC_REMOTE", &endpoint(), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CircuitOpen(_)));
        assert_eq!(err.summarize(), "circuit open for service: SVC_REMOTE");
    }

    #[tokio::test]
    async fn retries_count_once_against_the_breaker() {
        let mut transport = MockRemoteTransport::new();
        // 4 invocations × 3 attempts = 12 transport failures, but only 4
        // breaker outcomes, below min_calls=5, so the breaker stays closed.
        transport
            .expect_post()
            .times(12)
            .returning(|_, _| Err(Error::transport("remote down")));

        let invoker =
            ResilientInvoker::new(Arc::new(transport), fast_retry(), trip_fast_breaker());
        for _ in 0..4 {
            let _ = invoker.invoke("SVC_REMOTE", &endpoint(), &request()).await;
        }
        assert_eq!(invoker.circuit_state("SVC_REMOTE"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn breakers_are_isolated_per_route() {
        let mut transport = MockRemoteTransport::new();
        transport
            .expect_post()
            .returning(|_, _| Err(Error::transport("remote down")));

        let retry = RetryConfig {
            max_attempts: 1,
            ..fast_retry()
        };
        let invoker = ResilientInvoker::new(Arc::new(transport), retry, trip_fast_breaker());

        for _ in 0..5 {
            let _ = invoker.invoke("SVC_A", &endpoint(), &request()).await;
        }
        assert_eq!(invoker.circuit_state("SVC_A"), CircuitState::Open);
        assert_eq!(invoker.circuit_state("SVC_B"), CircuitState::Closed);
    }
}
