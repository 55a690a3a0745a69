//! Per-route circuit breaker.
//!
//! # Circuit Breaker States
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    CIRCUIT BREAKER STATE MACHINE                    │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │                  all trial calls succeed                            │
//! │            ┌───────────────────────────────────────┐                │
//! │            ▼                                       │                │
//! │      ┌──────────┐          ┌──────────┐          ┌──────────┐       │
//! │      │  CLOSED  │ ───────► │   OPEN   │ ───────► │HALF-OPEN │       │
//! │      │ (normal) │  rate ≥  │ (reject) │   wait   │ (trials) │       │
//! │      └──────────┘ threshold└──────────┘ elapsed  └──────────┘       │
//! │                                 ▲                      │            │
//! │                                 └──────────────────────┘            │
//! │                                    any trial fails                  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The failure rate is computed over a count-based window of the last
//! `sliding_window_size` outcomes and only once the window is full. One
//! execution of the inner chain, all of its retries included, is one
//! outcome.
//!
//! OPEN moves to HALF_OPEN on the first call after the wait duration. With
//! automatic transition enabled a timer also performs the move with no
//! traffic at all.

use crate::body::ReplayableRequest;
use crate::domain::classify::{classify_error, is_failure_status, message_has_failure_marker};
use crate::domain::error::{text_response, ProxyError};
use crate::domain::filters::{CircuitBreakerConfig, FailurePredicateKind, RetryableErrors};
use crate::middleware::fallback::{FallbackCause, FallbackHandler};
use crate::middleware::metrics::GatewayMetrics;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, info, warn};

/// Liveness bound on one breaker-tracked call. Far above any realistic
/// request so the time limiter always fires first.
pub const BREAKER_CALL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Circuit is open - requests are rejected immediately
    Open,
    /// A limited number of trial calls decide where to go next
    HalfOpen,
}

impl CircuitState {
    pub fn as_upper(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Mutable breaker state. Only touched inside a short critical section.
struct BreakerInner {
    state: CircuitState,
    /// `true` marks a failed call
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_issued: u32,
    half_open_successes: u32,
    /// Bumped on every transition; outcomes from an older epoch are ignored
    epoch: u64,
    last_transition: Instant,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    rejected_calls: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        let window = VecDeque::with_capacity(config.sliding_window_size as usize);
        Arc::new(Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window,
                opened_at: None,
                half_open_issued: 0,
                half_open_successes: 0,
                epoch: 0,
                last_transition: Instant::now(),
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn not_permitted_message(&self) -> String {
        format!(
            "CircuitBreaker '{}' is {} and does not permit further calls",
            self.config.name,
            self.state().as_upper()
        )
    }

    /// Ask for permission to make one call.
    ///
    /// Returns `None` when the breaker is open, or half-open with all trial
    /// slots taken.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open
            && inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.wait_duration_in_open_state)
        {
            self.transition(&mut inner, CircuitState::HalfOpen);
        }

        let state = inner.state;
        let half_open = match state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen
                if inner.half_open_issued < self.config.permitted_calls_in_half_open =>
            {
                inner.half_open_issued += 1;
                true
            }
            _ => {
                self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                debug!(
                    route_id = %self.config.route_id,
                    breaker = %self.config.name,
                    state = %state,
                    "Circuit breaker rejecting call"
                );
                return None;
            }
        };

        Some(Permit {
            breaker: Arc::clone(self),
            epoch: inner.epoch,
            half_open,
            done: false,
        })
    }

    /// Whether an outcome counts as a failure under this breaker's predicate.
    pub fn is_failure(&self, outcome: &Result<Response, ProxyError>) -> bool {
        match outcome {
            Ok(response) => {
                response.extensions().get::<FallbackCause>().is_some()
                    || is_failure_status(response.status())
            }
            Err(err) => {
                let counted = classify_error(err, &RetryableErrors::none()).circuit_countable;
                match self.config.failure_predicate {
                    FailurePredicateKind::Default => counted,
                    FailurePredicateKind::Response => {
                        counted || message_has_failure_marker(&err.to_string())
                    }
                }
            }
        }
    }

    fn on_result(self: &Arc<Self>, epoch: u64, failed: bool) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        }

        let reopened = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                debug!(
                    route_id = %self.config.route_id,
                    breaker = %self.config.name,
                    "Ignoring outcome recorded in an earlier state"
                );
                return;
            }

            match inner.state {
                CircuitState::Closed => {
                    let size = self.config.sliding_window_size as usize;
                    inner.window.push_back(failed);
                    while inner.window.len() > size {
                        inner.window.pop_front();
                    }

                    if inner.window.len() < size {
                        None
                    } else {
                        let rate = failure_rate(&inner.window);
                        if rate >= self.config.failure_rate_threshold {
                            warn!(
                                route_id = %self.config.route_id,
                                breaker = %self.config.name,
                                failure_rate = rate,
                                threshold = self.config.failure_rate_threshold,
                                wait_ms = self.config.wait_duration_in_open_state.as_millis() as u64,
                                "Circuit breaker opening due to failures"
                            );
                            self.transition(&mut inner, CircuitState::Open)
                        } else {
                            None
                        }
                    }
                }
                CircuitState::HalfOpen if failed => {
                    warn!(
                        route_id = %self.config.route_id,
                        breaker = %self.config.name,
                        "Circuit breaker reopening after trial failure"
                    );
                    self.transition(&mut inner, CircuitState::Open)
                }
                CircuitState::HalfOpen => {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.permitted_calls_in_half_open {
                        info!(
                            route_id = %self.config.route_id,
                            breaker = %self.config.name,
                            successes = inner.half_open_successes,
                            "Circuit breaker closing after successful trials"
                        );
                        self.transition(&mut inner, CircuitState::Closed)
                    } else {
                        None
                    }
                }
                CircuitState::Open => None,
            }
        };

        if let Some(epoch) = reopened {
            self.schedule_half_open(epoch);
        }
    }

    /// Give back a half-open slot whose call never produced an outcome.
    fn release(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        if inner.epoch == epoch && inner.state == CircuitState::HalfOpen {
            inner.half_open_issued = inner.half_open_issued.saturating_sub(1);
        }
    }

    /// Returns the new epoch when a half-open timer should be armed.
    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) -> Option<u64> {
        let from = inner.state;
        let now = Instant::now();

        inner.state = to;
        inner.epoch += 1;
        inner.last_transition = now;
        inner.window.clear();
        inner.half_open_issued = 0;
        inner.half_open_successes = 0;
        inner.opened_at = (to == CircuitState::Open).then_some(now);

        info!(
            route_id = %self.config.route_id,
            breaker = %self.config.name,
            from = %from,
            to = %to,
            "Circuit breaker state transition"
        );

        (to == CircuitState::Open && self.config.automatic_transition).then_some(inner.epoch)
    }

    fn schedule_half_open(self: &Arc<Self>, epoch: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(breaker = %self.config.name, "No runtime for automatic half-open timer");
            return;
        };

        let breaker: Weak<Self> = Arc::downgrade(self);
        let wait = self.config.wait_duration_in_open_state;
        handle.spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(breaker) = breaker.upgrade() {
                let mut inner = breaker.inner.lock();
                if inner.epoch == epoch && inner.state == CircuitState::Open {
                    breaker.transition(&mut inner, CircuitState::HalfOpen);
                }
            }
        });
    }

    /// Force the breaker closed (for admin purposes)
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        info!(
            route_id = %self.config.route_id,
            breaker = %self.config.name,
            "Circuit breaker manually reset"
        );
        self.transition(&mut inner, CircuitState::Closed);
    }

    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.lock();
        let size = self.config.sliding_window_size as usize;
        CircuitStats {
            route_id: self.config.route_id.clone(),
            name: self.config.name.clone(),
            state: inner.state,
            failure_rate: if inner.window.len() == size {
                failure_rate(&inner.window)
            } else {
                -1.0
            },
            buffered_calls: inner.window.len() as u32,
            failed_calls: inner.window.iter().filter(|failed| **failed).count() as u32,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            time_in_state_ms: inner.last_transition.elapsed().as_millis() as u64,
        }
    }
}

fn failure_rate(window: &VecDeque<bool>) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    let failed = window.iter().filter(|failed| **failed).count();
    failed as f32 * 100.0 / window.len() as f32
}

/// Permission for one call. Must be completed with [`Permit::record`];
/// dropping it unrecorded gives a half-open trial slot back.
pub struct Permit {
    breaker: Arc<CircuitBreaker>,
    epoch: u64,
    half_open: bool,
    done: bool,
}

impl Permit {
    pub fn record(mut self, failed: bool) {
        self.done = true;
        self.breaker.on_result(self.epoch, failed);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.done && self.half_open {
            self.breaker.release(self.epoch);
        }
    }
}

/// Statistics for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitStats {
    pub route_id: String,
    pub name: String,
    pub state: CircuitState,
    /// Percentage; `-1` until the window is full
    pub failure_rate: f32,
    pub buffered_calls: u32,
    pub failed_calls: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub time_in_state_ms: u64,
}

impl serde::Serialize for CircuitStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("CircuitStats", 10)?;
        state.serialize_field("route_id", &self.route_id)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("state", self.state.as_upper())?;
        state.serialize_field("failure_rate", &self.failure_rate)?;
        state.serialize_field("buffered_calls", &self.buffered_calls)?;
        state.serialize_field("failed_calls", &self.failed_calls)?;
        state.serialize_field("total_calls", &self.total_calls)?;
        state.serialize_field("total_failures", &self.total_failures)?;
        state.serialize_field("rejected_calls", &self.rejected_calls)?;
        state.serialize_field("time_in_state_ms", &self.time_in_state_ms)?;
        state.end()
    }
}

/// Everything a breaker-wrapped chain needs besides the inner service.
pub struct CircuitBreakerFilter {
    pub breaker: Arc<CircuitBreaker>,
    pub fallback: Option<FallbackHandler>,
    pub max_request_body: usize,
    pub metrics: Arc<GatewayMetrics>,
}

/// Circuit breaker layer
#[derive(Clone)]
pub struct CircuitBreakerLayer {
    filter: Arc<CircuitBreakerFilter>,
}

impl CircuitBreakerLayer {
    pub fn new(filter: CircuitBreakerFilter) -> Self {
        Self {
            filter: Arc::new(filter),
        }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService {
            inner,
            filter: Arc::clone(&self.filter),
        }
    }
}

/// Circuit breaker service
#[derive(Clone)]
pub struct CircuitBreakerService<S> {
    inner: S,
    filter: Arc<CircuitBreakerFilter>,
}

impl<S> Service<Request<Body>> for CircuitBreakerService<S>
where
    S: Service<Request<Body>, Response = Response, Error = ProxyError> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = ProxyError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let filter = Arc::clone(&self.filter);
        let inner = self.inner.clone();

        Box::pin(async move {
            let breaker = &filter.breaker;
            let route_id = &breaker.config().route_id;

            let Some(permit) = breaker.try_acquire() else {
                filter.metrics.record_short_circuit();
                let message = breaker.not_permitted_message();
                warn!(route_id = %route_id, breaker = %breaker.name(), "Circuit breaker short-circuited call");
                return Ok(match &filter.fallback {
                    Some(fallback) => {
                        filter.metrics.record_fallback();
                        fallback.respond(Some(req), &message).await
                    }
                    None => text_response(StatusCode::SERVICE_UNAVAILABLE, message),
                });
            };

            let (req, replay) = match &filter.fallback {
                Some(fallback) if fallback.needs_request_body() => {
                    let replay = ReplayableRequest::buffer(req, filter.max_request_body).await?;
                    (replay.to_request(), Some(replay))
                }
                _ => (req, None),
            };

            let outcome = match tokio::time::timeout(BREAKER_CALL_TIMEOUT, inner.oneshot(req)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ProxyError::Timeout(format!(
                    "circuit breaker '{}' call exceeded {}s",
                    breaker.name(),
                    BREAKER_CALL_TIMEOUT.as_secs()
                ))),
            };

            let failed = breaker.is_failure(&outcome);
            permit.record(failed);

            match (outcome, &filter.fallback) {
                (Ok(response), _) => Ok(response),
                (Err(err), Some(fallback)) => {
                    let message = err.root_cause().to_string();
                    warn!(route_id = %route_id, error = %message, "Breaker call failed, using fallback");
                    filter.metrics.record_fallback();
                    Ok(fallback
                        .respond(replay.map(|r| r.to_request()), &message)
                        .await)
                }
                (Err(err), None) => Err(err),
            }
        })
    }
}
