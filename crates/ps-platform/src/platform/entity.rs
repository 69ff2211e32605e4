//! Platform Entity

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A registered platform. Owned by exactly one customer for its whole life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub id: i64,
    pub name: String,
    pub publisher: String,
    /// Opaque; stored and echoed as given
    pub cost: String,
    pub customer_id: i64,
}

/// Platform fields before an id is assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPlatform {
    pub name: String,
    pub publisher: String,
    pub cost: String,
}

/// Platform as exposed over HTTP and sent to the replication peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlatformView {
    pub id: i64,
    pub name: String,
    pub publisher: String,
    pub cost: String,
    pub customer_id: i64,
}

impl From<Platform> for PlatformView {
    fn from(p: Platform) -> Self {
        Self {
            id: p.id,
            name: p.name,
            publisher: p.publisher,
            cost: p.cost,
            customer_id: p.customer_id,
        }
    }
}

impl From<&Platform> for PlatformView {
    fn from(p: &Platform) -> Self {
        p.clone().into()
    }
}

impl Platform {
    /// Location of this platform in the REST API
    pub fn location(&self) -> String {
        format!("/api/platforms/{}", self.id)
    }
}
