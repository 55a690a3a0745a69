//! # Live upstream
//!
//! The gateway and an inventory service both listen on real localhost
//! sockets. Requests go client → gateway → `HttpUpstream` → service, so
//! header handling, body replay and streaming are exercised end to end.

#[cfg(test)]
mod tests {
    use crate::support::{retry, spawn_server};
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::Router;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use waypoint_gateway::{
        GatewayConfig, GatewayService, HttpUpstream, RouteConfigProvider, RouteDefinition,
        StaticRouteProvider,
    };

    const ITEM: &str = r#"{"sku":"A-42","available":7,"warehouse":"north"}"#;

    /// Binary error payload larger than the default capture limit.
    fn locked_report() -> Vec<u8> {
        [0xff, 0xfe, 0x00, 0x01]
            .into_iter()
            .chain((0..102_400u32).map(|i| (i % 253) as u8))
            .collect()
    }

    /// Inventory service: a stable item, a flaky stock endpoint and an echo.
    async fn inventory_service() -> (SocketAddr, Arc<AtomicU32>) {
        let stock_calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&stock_calls);

        let router = Router::new()
            .route("/inventory/items/A-42", get(|| async { ITEM }))
            .route(
                "/inventory/stock",
                get(move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                            (StatusCode::INTERNAL_SERVER_ERROR, "stock service warming up")
                        } else {
                            (StatusCode::OK, "in stock")
                        }
                    }
                }),
            )
            .route(
                "/inventory/locked",
                get(|| async {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        [("retry-after", "7"), ("x-error-code", "STOCK_LOCKED")],
                        locked_report(),
                    )
                }),
            )
            .route(
                "/inventory/echo",
                post(|headers: HeaderMap, body: Bytes| async move {
                    let tag = headers
                        .get("x-tag")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("none")
                        .to_string();
                    format!("{tag}:{}", String::from_utf8_lossy(&body))
                }),
            );

        (spawn_server(router).await, stock_calls)
    }

    /// Gateway in front of `upstream`, serving on its own ephemeral port.
    async fn gateway_for(upstream: SocketAddr) -> (SocketAddr, GatewayService) {
        let config = GatewayConfig::default();
        let route = RouteDefinition::new("inventory", "/inventory/**", format!("http://{upstream}"))
            .with_filter(retry(3, "20ms"));
        let provider: Arc<dyn RouteConfigProvider> = Arc::new(StaticRouteProvider::new(vec![route]));
        let client = HttpUpstream::new(&config.upstream, config.limits.max_request_body).unwrap();

        let service = GatewayService::with_parts(config, provider, Arc::new(client)).unwrap();
        service.reloader().reload(false).await.unwrap();
        (spawn_server(service.proxy_router()).await, service)
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_passes_through_byte_for_byte() {
        let (upstream, _) = inventory_service().await;
        let (gateway, _service) = gateway_for(upstream).await;

        let response = client()
            .get(format!("http://{gateway}/inventory/items/A-42"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(response.text().await.unwrap(), ITEM);
    }

    #[tokio::test]
    async fn test_flaky_endpoint_recovers_through_retry() {
        let (upstream, stock_calls) = inventory_service().await;
        let (gateway, service) = gateway_for(upstream).await;

        let response = client()
            .get(format!("http://{gateway}/inventory/stock"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "in stock");
        assert_eq!(stock_calls.load(Ordering::SeqCst), 3);
        assert_eq!(service.metrics().retries.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_request_headers_and_body_reach_upstream() {
        let (upstream, _) = inventory_service().await;
        let (gateway, _service) = gateway_for(upstream).await;

        let response = client()
            .post(format!("http://{gateway}/inventory/echo"))
            .header("x-tag", "restock")
            .body(r#"{"sku":"A-42","add":5}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), r#"restock:{"sku":"A-42","add":5}"#);
    }

    #[tokio::test]
    async fn test_exhausted_failure_reaches_client_with_headers_and_full_body() {
        let (upstream, _) = inventory_service().await;
        let (gateway, service) = gateway_for(upstream).await;

        let response = client()
            .get(format!("http://{gateway}/inventory/locked"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["retry-after"], "7");
        assert_eq!(response.headers()["x-error-code"], "STOCK_LOCKED");
        let body = response.bytes().await.unwrap();
        assert_eq!(body.len(), locked_report().len());
        assert_eq!(&body[..], &locked_report()[..]);
        assert_eq!(service.metrics().retries.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_502_after_retries() {
        let dead = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let (gateway, service) = gateway_for(dead).await;

        let response = client()
            .get(format!("http://{gateway}/inventory/items/A-42"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(service.metrics().retries.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_service_runs_until_shutdown() {
        let mut config = GatewayConfig::default();
        config.http.port = 0;
        config.admin.port = 0;
        let service = GatewayService::new(config).unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(service.run(async {
            let _ = stop_rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
