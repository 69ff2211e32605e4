//! Message channel
//!
//! One delivery attempt of a [`ChannelMessage`]. Retrying is the publisher's
//! job; a channel only reports whether this attempt was accepted.

use std::time::Duration;

use async_trait::async_trait;
use ps_common::ChannelMessage;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel rejected message with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("channel transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

/// Destination for creation events.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send(&self, message: &ChannelMessage) -> Result<(), ChannelError>;
}

/// HTTP channel configuration
#[derive(Debug, Clone)]
pub struct HttpChannelConfig {
    /// URL messages are POSTed to
    pub endpoint: String,
    /// Optional Bearer token for authentication
    pub api_token: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8081/api/events".to_string(),
            api_token: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Channel that POSTs each message as JSON to a broker endpoint.
///
/// The message id travels in the `Idempotency-Key` header so the receiving
/// side can drop redeliveries.
pub struct HttpChannel {
    config: HttpChannelConfig,
    client: reqwest::Client,
}

impl HttpChannel {
    pub fn new(config: HttpChannelConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl MessageChannel for HttpChannel {
    async fn send(&self, message: &ChannelMessage) -> Result<(), ChannelError> {
        debug!(message_id = %message.message_id, url = %self.config.endpoint, "Sending message to channel");

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("Idempotency-Key", &message.message_id)
            .json(message);

        if let Some(ref token) = self.config.api_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ChannelError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ps_common::PLATFORM_PUBLISHED;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel_for(server: &MockServer, token: Option<&str>) -> HttpChannel {
        HttpChannel::new(HttpChannelConfig {
            endpoint: format!("{}/api/events", server.uri()),
            api_token: token.map(String::from),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_accepted_message() {
        let server = MockServer::start().await;
        let message = ChannelMessage::new(PLATFORM_PUBLISHED, json!({"id": 1, "name": "Docker"}));

        Mock::given(method("POST"))
            .and(path("/api/events"))
            .and(header("Idempotency-Key", message.message_id.as_str()))
            .and(body_partial_json(json!({"eventType": "Platform_Published"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        channel_for(&server, None).send(&message).await.unwrap();
    }

    #[tokio::test]
    async fn test_bearer_token_is_sent() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(header("Authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let message = ChannelMessage::new(PLATFORM_PUBLISHED, json!({}));
        channel_for(&server, Some("s3cret")).send(&message).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_rejection() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("broker down"))
            .mount(&server)
            .await;

        let message = ChannelMessage::new(PLATFORM_PUBLISHED, json!({}));
        let err = channel_for(&server, None).send(&message).await.unwrap_err();

        match err {
            ChannelError::Rejected { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "broker down");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let channel = HttpChannel::new(HttpChannelConfig {
            endpoint: "http://127.0.0.1:1/api/events".to_string(),
            connect_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .unwrap();

        let message = ChannelMessage::new(PLATFORM_PUBLISHED, json!({}));
        let err = channel.send(&message).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));
    }
}
