//! Cross-module scenarios.

pub mod admission;
pub mod hot_reload;
pub mod inventory_read;
pub mod live_upstream;
