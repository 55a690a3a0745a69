//! # The `inventory-read` route
//!
//! RequestRateLimiter(10/10/1), Retry(3, 200ms) and CircuitBreaker(5, 50%)
//! declared on one route in front of an inventory service that keeps
//! failing. The breaker wraps the whole retry sequence, so one client
//! request is one breaker call no matter how many attempts it took.

#[cfg(test)]
mod tests {
    use crate::support::{body_text, breaker, gateway, rate_limiter, retry, send, ScriptedUpstream};
    use axum::http::{header, Method, StatusCode};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use waypoint_gateway::middleware::CircuitState;
    use waypoint_gateway::{FilterDeclaration, GatewayService, RouteDefinition};

    // =============================================================================
    // FIXTURES
    // =============================================================================

    fn inventory_read(breaker_decl: FilterDeclaration) -> RouteDefinition {
        // Declared in a different order than they run.
        RouteDefinition::new("inventory-read", "/inventory/**", "http://inventory:8080")
            .with_method("GET")
            .with_filter(rate_limiter(10, 10))
            .with_filter(retry(3, "200ms"))
            .with_filter(breaker_decl)
    }

    fn breaker_stats(service: &GatewayService) -> waypoint_gateway::middleware::CircuitStats {
        service
            .reloader()
            .assembler()
            .registry()
            .breaker("inventory-read")
            .expect("route has a breaker")
            .stats()
    }

    fn assert_spacing(upstream: &ScriptedUpstream, expected: Duration) {
        for gap in upstream.gaps() {
            assert!(
                gap >= expected && gap < expected + Duration::from_millis(10),
                "attempt spacing {gap:?}"
            );
        }
    }

    // =============================================================================
    // FAILING UPSTREAM
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_three_spaced_attempts_counts_one_breaker_failure() {
        let upstream = ScriptedUpstream::always(StatusCode::INTERNAL_SERVER_ERROR, "stock service down");
        let route = inventory_read(breaker("inventory", 5, 50).arg("fallbackUri", "/fallback/inventory"));
        let (service, _) = gateway(vec![route], upstream.clone()).await;

        let response = send(&service.proxy_router(), Method::GET, "/inventory/items/42").await;

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/fallback/inventory?exceptionMessage=500+Internal+Server+Error%3A+stock+service+down"
        );

        assert_eq!(upstream.call_count(), 3);
        assert_spacing(&upstream, Duration::from_millis(200));
        assert!(upstream
            .calls()
            .iter()
            .all(|call| call.uri == "http://inventory:8080/inventory/items/42"));

        let stats = breaker_stats(&service);
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.total_failures, 1);
        assert_eq!(stats.state, CircuitState::Closed);

        let metrics = service.metrics();
        assert_eq!(metrics.retries.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.fallbacks.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_fallback_last_upstream_answer_is_returned() {
        let upstream = ScriptedUpstream::always(StatusCode::INTERNAL_SERVER_ERROR, "stock service down");
        let (service, _) = gateway(vec![inventory_read(breaker("inventory", 5, 50))], upstream.clone()).await;

        let response = send(&service.proxy_router(), Method::GET, "/inventory/items/42").await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "stock service down");
        assert_eq!(upstream.call_count(), 3);
        assert_eq!(breaker_stats(&service).total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_after_full_window_and_stops_calling_upstream() {
        let upstream = ScriptedUpstream::always(StatusCode::INTERNAL_SERVER_ERROR, "stock service down");
        let (service, _) = gateway(vec![inventory_read(breaker("inventory", 5, 50))], upstream.clone()).await;
        let router = service.proxy_router();

        for _ in 0..5 {
            let response = send(&router, Method::GET, "/inventory/items/42").await;
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
        assert_eq!(upstream.call_count(), 15);
        assert_eq!(breaker_stats(&service).state, CircuitState::Open);

        let response = send(&router, Method::GET, "/inventory/items/42").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_text(response).await,
            "CircuitBreaker 'inventory' is OPEN and does not permit further calls"
        );
        assert_eq!(upstream.call_count(), 15);
        assert_eq!(service.metrics().breaker_short_circuits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_fallback_still_counts_against_the_breaker() {
        let upstream = ScriptedUpstream::always(StatusCode::INTERNAL_SERVER_ERROR, "stock service down");
        let route = RouteDefinition::new("inventory-read", "/inventory/**", "http://inventory:8080")
            .with_method("GET")
            .with_filter(rate_limiter(10, 10))
            .with_filter(retry(3, "200ms").arg("fallbackUri", "/fallback/inventory"))
            .with_filter(breaker("inventory", 5, 50));
        let (service, _) = gateway(vec![route], upstream.clone()).await;
        let router = service.proxy_router();

        let response = send(&router, Method::GET, "/inventory/items/42").await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/fallback/inventory?exceptionMessage=500+Internal+Server+Error%3A+stock+service+down"
        );
        assert_eq!(upstream.call_count(), 3);
        let stats = breaker_stats(&service);
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.total_failures, 1);

        for _ in 0..4 {
            let response = send(&router, Method::GET, "/inventory/items/42").await;
            assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        }
        assert_eq!(upstream.call_count(), 15);
        assert_eq!(breaker_stats(&service).state, CircuitState::Open);

        let response = send(&router, Method::GET, "/inventory/items/42").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(upstream.call_count(), 15);
    }

    // =============================================================================
    // RECOVERING AND NON-RETRYABLE UPSTREAMS
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_success_on_second_attempt_is_passed_through_unchanged() {
        let upstream = ScriptedUpstream::sequence(vec![
            (StatusCode::INTERNAL_SERVER_ERROR, "warming up"),
            (StatusCode::OK, r#"{"sku":42,"available":7}"#),
        ]);
        let (service, _) = gateway(vec![inventory_read(breaker("inventory", 5, 50))], upstream.clone()).await;

        let response = send(&service.proxy_router(), Method::GET, "/inventory/items/42").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"{"sku":42,"available":7}"#);
        assert_eq!(upstream.call_count(), 2);
        assert_eq!(breaker_stats(&service).total_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_503_is_attempted_once_but_counted_by_breaker() {
        let upstream = ScriptedUpstream::always(StatusCode::SERVICE_UNAVAILABLE, "overloaded");
        let (service, _) = gateway(vec![inventory_read(breaker("inventory", 5, 50))], upstream.clone()).await;

        let response = send(&service.proxy_router(), Method::GET, "/inventory/items/42").await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "overloaded");
        assert_eq!(upstream.call_count(), 1);
        assert_eq!(breaker_stats(&service).total_failures, 1);
    }

    #[tokio::test]
    async fn test_other_methods_do_not_match_the_route() {
        let upstream = ScriptedUpstream::always(StatusCode::OK, "ok");
        let (service, _) = gateway(vec![inventory_read(breaker("inventory", 5, 50))], Arc::clone(&upstream) as _).await;

        let response = send(&service.proxy_router(), Method::DELETE, "/inventory/items/42").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(upstream.call_count(), 0);
    }
}
