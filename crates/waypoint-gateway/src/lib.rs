//! Waypoint - an HTTP gateway that forwards each request through a
//! per-route resilience pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           WAYPOINT GATEWAY                           │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐                               ┌──────────────┐     │
//! │  │    Proxy     │                               │    Admin     │     │
//! │  │  Port 8080   │                               │  Port 9090   │     │
//! │  └──────┬───────┘                               └──────┬───────┘     │
//! │         │ Tracing → BodyLimit                          │             │
//! │  ┌──────┴──────────────────┐      ┌────────────────────┴─────────┐   │
//! │  │    Pipeline Executor    │◄─────│  Route Table (ArcSwap)       │   │
//! │  └──────┬──────────────────┘      │  ▲ Route Reloader            │   │
//! │         │                         │  │ Filter Assembler          │   │
//! │  ┌──────┴──────────────────┐      │  │ Resilience Registry       │   │
//! │  │ RateLimiter             │      └──┼───────────────────────────┘   │
//! │  │  → CircuitBreaker       │         │                               │
//! │  │   → TimeLimiter         │      Route Config Provider              │
//! │  │    → Retry              │      (file / static)                    │
//! │  │     → Upstream          │                                         │
//! │  └──────┬──────────────────┘                                         │
//! └─────────┼────────────────────────────────────────────────────────────┘
//!           ▼
//!       upstream services
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use waypoint_gateway::{GatewayConfig, GatewayService};
//!
//! let config = GatewayConfig::load("waypoint.toml")?;
//! let service = GatewayService::new(config)?;
//! service.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod body;
pub mod domain;
pub mod middleware;
pub mod pipeline;
pub mod ports;
pub mod service;

// Re-exports for public API
pub use adapters::{FileRouteProvider, HttpUpstream, StaticRouteProvider};
pub use domain::config::GatewayConfig;
pub use domain::error::{GatewayError, ProxyError};
pub use domain::route::{FilterDeclaration, RouteDefinition};
pub use middleware::GatewayMetrics;
pub use pipeline::{PipelineExecutor, ReloadOutcome, RouteReloader};
pub use ports::{ProviderError, RouteConfigProvider, UpstreamClient};
pub use service::GatewayService;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
