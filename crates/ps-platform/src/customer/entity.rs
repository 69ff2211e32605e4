//! Customer Entity

use serde::{Deserialize, Serialize};

/// First name given to customers created implicitly from an email address
pub const PLACEHOLDER_FIRST_NAME: &str = "Unknown";
/// Last name given to customers created implicitly from an email address
pub const PLACEHOLDER_LAST_NAME: &str = "Customer";

/// Owner of platforms, identified externally by email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: i64,
    /// Unique lookup key
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// Customer fields before an id is assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomer {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl NewCustomer {
    /// Customer known only by email.
    pub fn placeholder(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            first_name: PLACEHOLDER_FIRST_NAME.to_string(),
            last_name: PLACEHOLDER_LAST_NAME.to_string(),
        }
    }
}
