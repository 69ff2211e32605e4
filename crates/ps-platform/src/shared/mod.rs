//! Shared Module
//!
//! Cross-cutting concerns and shared utilities.

pub mod error;

pub use error::{ErrorResponse, PlatformError, Result, INTERNAL_ERROR_MESSAGE};
