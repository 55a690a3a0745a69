//! Gateway metrics.
//!
//! Plain atomics; exported as JSON on the admin router and, with the
//! `metrics` feature, in Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Gateway-wide counters
#[derive(Default)]
pub struct GatewayMetrics {
    // Request counters
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_error: AtomicU64,
    pub requests_unrouted: AtomicU64,

    // Resilience decisions
    pub rate_limit_rejected: AtomicU64,
    pub breaker_short_circuits: AtomicU64,
    pub retries: AtomicU64,
    pub timeouts: AtomicU64,
    pub fallbacks: AtomicU64,

    // Route table
    pub reloads: AtomicU64,
    pub reload_failures: AtomicU64,

    // Latency tracking (simplified - in production use histograms)
    pub total_latency_ms: AtomicU64,
    pub request_count_for_latency: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed request. Anything below 500 is a success.
    pub fn record_request(&self, success: bool, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if success {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_error.fetch_add(1, Ordering::Relaxed);
        }

        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.request_count_for_latency
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unrouted(&self) {
        self.requests_unrouted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_rejection(&self) {
        self.rate_limit_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_short_circuit(&self) {
        self.breaker_short_circuits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reload(&self, success: bool) {
        if success {
            self.reloads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reload_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.request_count_for_latency.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn to_prometheus(&self) -> String {
        let counters: [(&str, &str, &AtomicU64); 11] = [
            ("requests_total", "Total proxied requests", &self.requests_total),
            ("requests_success_total", "Requests answered below 500", &self.requests_success),
            ("requests_error_total", "Requests answered with 5xx", &self.requests_error),
            ("requests_unrouted_total", "Requests matching no route", &self.requests_unrouted),
            ("rate_limit_rejected_total", "Requests rejected by a rate limiter", &self.rate_limit_rejected),
            ("breaker_short_circuits_total", "Calls rejected by an open circuit", &self.breaker_short_circuits),
            ("retries_total", "Upstream attempts beyond the first", &self.retries),
            ("timeouts_total", "Requests cut off by a time limiter", &self.timeouts),
            ("fallbacks_total", "Requests answered by a fallback", &self.fallbacks),
            ("route_reloads_total", "Route table rebuilds", &self.reloads),
            ("route_reload_failures_total", "Failed route source polls", &self.reload_failures),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            output.push_str(&format!(
                "# HELP waypoint_{name} {help}\n\
                 # TYPE waypoint_{name} counter\n\
                 waypoint_{name} {}\n",
                value.load(Ordering::Relaxed)
            ));
        }

        output.push_str(&format!(
            "# HELP waypoint_average_latency_ms Average request latency\n\
             # TYPE waypoint_average_latency_ms gauge\n\
             waypoint_average_latency_ms {:.2}\n",
            self.average_latency_ms()
        ));

        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "requests": {
                "total": self.requests_total.load(Ordering::Relaxed),
                "success": self.requests_success.load(Ordering::Relaxed),
                "error": self.requests_error.load(Ordering::Relaxed),
                "unrouted": self.requests_unrouted.load(Ordering::Relaxed),
            },
            "resilience": {
                "rate_limited": self.rate_limit_rejected.load(Ordering::Relaxed),
                "short_circuited": self.breaker_short_circuits.load(Ordering::Relaxed),
                "retries": self.retries.load(Ordering::Relaxed),
                "timeouts": self.timeouts.load(Ordering::Relaxed),
                "fallbacks": self.fallbacks.load(Ordering::Relaxed),
            },
            "routes": {
                "reloads": self.reloads.load(Ordering::Relaxed),
                "reload_failures": self.reload_failures.load(Ordering::Relaxed),
            },
            "latency": {
                "average_ms": self.average_latency_ms(),
            }
        })
    }
}

/// Request timing helper
pub struct RequestTimer {
    start: Instant,
    metrics: Arc<GatewayMetrics>,
}

impl RequestTimer {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    pub fn finish(self, success: bool) {
        let latency_ms = self.start.elapsed().as_millis() as u64;
        self.metrics.record_request(success, latency_ms);
    }
}
