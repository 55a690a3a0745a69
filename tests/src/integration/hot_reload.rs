//! # Hot reload
//!
//! Routes change underneath a running gateway. New versions are picked up
//! by the poller or a forced admin reload, unchanged versions keep their
//! breaker and limiter state, and a broken route source never empties the
//! table.

#[cfg(test)]
mod tests {
    use crate::support::{body_text, breaker, gateway, send, ScriptedUpstream};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use waypoint_gateway::{
        FileRouteProvider, GatewayConfig, GatewayService, ReloadOutcome, RouteDefinition,
    };

    fn orders(version: u64) -> RouteDefinition {
        RouteDefinition::new("orders", "/orders/**", "http://orders:8080")
            .with_version(version)
            .with_filter(breaker("orders", 4, 50))
    }

    fn breaker_failures(service: &GatewayService) -> u64 {
        service
            .reloader()
            .assembler()
            .registry()
            .breaker("orders")
            .map(|breaker| breaker.stats().total_failures)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_new_route_is_served_after_reload() {
        let upstream = ScriptedUpstream::always(StatusCode::OK, "ok");
        let (service, provider) = gateway(Vec::new(), upstream.clone()).await;
        let router = service.proxy_router();

        assert_eq!(send(&router, Method::GET, "/orders/7").await.status(), StatusCode::NOT_FOUND);

        provider.upsert(orders(1));
        let outcome = service.reloader().reload(false).await.unwrap();
        assert_eq!(outcome, ReloadOutcome::Reloaded { routes: 1, skipped: 0 });

        let response = send(&router, Method::GET, "/orders/7").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(upstream.calls()[0].uri, "http://orders:8080/orders/7");
    }

    #[tokio::test]
    async fn test_breaker_state_survives_unrelated_changes_but_not_a_new_version() {
        let upstream = ScriptedUpstream::always(StatusCode::INTERNAL_SERVER_ERROR, "down");
        let (service, provider) = gateway(vec![orders(1)], upstream.clone()).await;
        let router = service.proxy_router();

        send(&router, Method::GET, "/orders/1").await;
        assert_eq!(breaker_failures(&service), 1);

        provider.upsert(RouteDefinition::new("billing", "/billing/**", "http://billing:8080"));
        service.reloader().reload(false).await.unwrap();
        assert_eq!(breaker_failures(&service), 1);

        provider.upsert(orders(2));
        service.reloader().reload(false).await.unwrap();
        assert_eq!(breaker_failures(&service), 0);
    }

    #[tokio::test]
    async fn test_admin_reload_and_route_listing() {
        let upstream = ScriptedUpstream::always(StatusCode::OK, "ok");
        let (service, provider) = gateway(vec![orders(1)], upstream.clone()).await;
        let admin = service.admin_router();

        provider.upsert(
            RouteDefinition::new("billing", "/billing/**", "http://billing:8080").with_method("POST"),
        );
        let reload = Request::builder()
            .method(Method::POST)
            .uri("/routes/reload")
            .body(Body::empty())
            .unwrap();
        let response = admin.clone().oneshot(reload).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let listing = send(&admin, Method::GET, "/routes").await;
        let listing: serde_json::Value = serde_json::from_str(&body_text(listing).await).unwrap();
        let ids: Vec<&str> = listing["routes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|route| route["route_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, ["orders", "billing"]);
        assert_eq!(listing["routes"][1]["method"], "POST");
    }

    #[tokio::test]
    async fn test_poller_picks_up_file_changes_and_survives_bad_edits() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"[{{"routeId": "orders", "path": "/orders/**", "uri": "http://orders:8080", "version": 1}}]"#
        )
        .unwrap();

        let mut config = GatewayConfig::default();
        config.routes.reload_interval = Duration::from_millis(20);
        let service = GatewayService::with_parts(
            config,
            Arc::new(FileRouteProvider::new(file.path())),
            ScriptedUpstream::always(StatusCode::OK, "ok"),
        )
        .unwrap();
        let poller = tokio::spawn(service.reloader().run());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(service.reloader().table().load().len(), 1);

        std::fs::write(file.path(), "[{ not json").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(service.reloader().table().load().len(), 1);

        std::fs::write(
            file.path(),
            r#"{"routes": [
                {"routeId": "orders", "path": "/orders/**", "uri": "http://orders:8080", "version": 2},
                {"routeId": "billing", "path": "/billing/**", "uri": "http://billing:8080", "version": 1}
            ]}"#,
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(service.reloader().table().load().len(), 2);

        poller.abort();
    }
}
