//! Platform Operations
//!
//! Platform creation: local persistence, best-effort replication and event
//! delivery under one transaction boundary.

pub mod events;
pub mod create;

pub use events::PlatformPublished;

pub use create::{
    CreatePlatformCommand,
    CreatedPlatform,
    CreationError,
    CreationOrchestrator,
};
