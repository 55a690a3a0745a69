//! # Waypoint Test Suite
//!
//! Scenarios that cross module boundaries: route source → reloader →
//! assembled chain → upstream, driven through the same routers the gateway
//! serves.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── support.rs              # Scripted upstreams, route builders, gateway wiring
//! └── integration/
//!     ├── inventory_read.rs   # Retry + breaker + rate limiter on one route
//!     ├── admission.rs        # Rate limiting and time limiting at the edge
//!     ├── hot_reload.rs       # Route versions, state reuse, admin reload
//!     └── live_upstream.rs    # Real sockets: axum upstream, reqwest client
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p waypoint-tests
//! cargo test -p waypoint-tests integration::hot_reload::
//! ```

pub mod integration;
pub mod support;
