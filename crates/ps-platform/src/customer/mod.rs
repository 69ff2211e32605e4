//! Customer Aggregate
//!
//! Owners of platforms. Customers are never created directly through the API;
//! they are resolved (or created with placeholder names) during platform creation.

pub mod entity;

pub use entity::{Customer, NewCustomer, PLACEHOLDER_FIRST_NAME, PLACEHOLDER_LAST_NAME};
