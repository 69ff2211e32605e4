//! Platform Domain Events

use ps_common::{ChannelMessage, PLATFORM_PUBLISHED};
use serde_json::json;

use crate::platform::Platform;

/// Event announcing a newly created platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformPublished {
    pub platform_id: i64,
    pub name: String,
    pub publisher: String,
    pub cost: String,
    pub customer_id: i64,
}

impl PlatformPublished {
    pub const EVENT_TYPE: &'static str = PLATFORM_PUBLISHED;

    pub fn new(platform: &Platform) -> Self {
        Self {
            platform_id: platform.id,
            name: platform.name.clone(),
            publisher: platform.publisher.clone(),
            cost: platform.cost.clone(),
            customer_id: platform.customer_id,
        }
    }

    /// Wrap the event in a channel message with a fresh message id.
    pub fn to_message(&self) -> ChannelMessage {
        ChannelMessage::new(
            Self::EVENT_TYPE,
            json!({
                "id": self.platform_id,
                "name": self.name,
                "publisher": self.publisher,
                "cost": self.cost,
                "customerId": self.customer_id,
            }),
        )
    }
}
