//! # Admission and deadlines
//!
//! Rate-limited requests never reach the upstream or the breaker; a time
//! limiter bounds the whole retry sequence and, when asked to, cancels the
//! call that overran.

#[cfg(test)]
mod tests {
    use crate::support::{
        body_text, breaker, gateway, rate_limiter, retry, send, time_limiter, ScriptedUpstream,
    };
    use axum::http::{Method, StatusCode};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use waypoint_gateway::middleware::rate_limit::RATE_LIMITED_MESSAGE;
    use waypoint_gateway::middleware::time_limiter::TIMEOUT_MESSAGE;
    use waypoint_gateway::RouteDefinition;

    fn orders() -> RouteDefinition {
        RouteDefinition::new("orders", "/orders/**", "http://orders:8080")
    }

    #[tokio::test]
    async fn test_burst_then_429_without_touching_upstream_or_breaker() {
        let upstream = ScriptedUpstream::always(StatusCode::OK, "ok");
        let route = orders()
            .with_filter(rate_limiter(1, 3))
            .with_filter(breaker("orders", 2, 50));
        let (service, _) = gateway(vec![route], upstream.clone()).await;
        let router = service.proxy_router();

        for _ in 0..3 {
            assert_eq!(send(&router, Method::GET, "/orders/1").await.status(), StatusCode::OK);
        }
        let rejected = send(&router, Method::GET, "/orders/1").await;

        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_text(rejected).await, RATE_LIMITED_MESSAGE);
        assert_eq!(upstream.call_count(), 3);

        let stats = service
            .reloader()
            .assembler()
            .registry()
            .breaker("orders")
            .expect("route has a breaker")
            .stats();
        assert_eq!(stats.total_calls, 3);
        assert_eq!(service.metrics().rate_limit_rejected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_504_and_cancels_the_call() {
        let upstream = ScriptedUpstream::slow(Duration::from_secs(5));
        let route = orders().with_filter(time_limiter("1s", true));
        let (service, _) = gateway(vec![route], upstream.clone()).await;

        let response = send(&service.proxy_router(), Method::GET, "/orders/1").await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body_text(response).await, TIMEOUT_MESSAGE);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(upstream.call_count(), 1);
        assert_eq!(upstream.completed(), 0);
        assert_eq!(service.metrics().timeouts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_cancel_lets_the_call_finish() {
        let upstream = ScriptedUpstream::slow(Duration::from_secs(5));
        let route = orders().with_filter(time_limiter("1s", false));
        let (service, _) = gateway(vec![route], upstream.clone()).await;

        let response = send(&service.proxy_router(), Method::GET, "/orders/1").await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(upstream.completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_covers_the_whole_retry_sequence() {
        let upstream = ScriptedUpstream::always(StatusCode::BAD_GATEWAY, "bad gateway");
        let route = orders()
            .with_filter(retry(10, "300ms"))
            .with_filter(time_limiter("1s", true));
        let (service, _) = gateway(vec![route], upstream.clone()).await;

        let response = send(&service.proxy_router(), Method::GET, "/orders/1").await;

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        // Attempts at 0, 300, 600 and 900ms; the 1200ms one never starts.
        assert_eq!(upstream.call_count(), 4);
    }
}
