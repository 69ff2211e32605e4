//! Platform Aggregate
//!
//! Platform registration and lookup.

pub mod entity;
pub mod api;
pub mod operations;

// Re-export main types
pub use entity::{NewPlatform, Platform, PlatformView};
pub use api::{PlatformsState, platforms_router};
