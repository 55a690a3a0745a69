//! Adapters implementing the outbound ports.

pub mod file_provider;
pub mod http_upstream;
pub mod static_provider;

pub use file_provider::{parse_routes, FileRouteProvider, RouteFormat};
pub use http_upstream::HttpUpstream;
pub use static_provider::StaticRouteProvider;
