//! Ports: the seams between the pipeline and the outside world.

pub mod outbound;

pub use outbound::{ProviderError, RouteConfigProvider, UpstreamClient};
