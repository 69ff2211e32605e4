//! Create Platform Operation
//!
//! Resolves the owning customer, persists the platform and propagates the
//! creation to the replication peer and the message channel.
//!
//! Two delivery modes share the first steps:
//!
//! - `Direct`: the event is published (with retries) while the transaction is
//!   still open, and the transaction commits only if publishing succeeded.
//! - `Outbox`: an outbox row is staged next to the platform and the
//!   transaction commits right away; a relay publishes the row later.
//!
//! Replication runs before the publish in `Direct` mode and after the commit in
//! `Outbox` mode. Its failures never abort a request.

use std::sync::Arc;

use ps_common::{Observation, Observer, OutboxItem};
use ps_config::DeliveryMode;
use ps_outbox::{AsyncEventPublisher, PublishError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::events::PlatformPublished;
use crate::customer::{Customer, NewCustomer};
use crate::platform::{NewPlatform, Platform, PlatformView};
use crate::replication::SyncReplicationClient;
use crate::repository::{PlatformRepository, RepositoryTransaction, StorageError};

#[derive(Debug, Error)]
pub enum CreationError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("event publish failed: {0}")]
    Publish(#[source] PublishError),

    #[error("request cancelled")]
    Cancelled,
}

impl From<PublishError> for CreationError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Cancelled { .. } => CreationError::Cancelled,
            other => CreationError::Publish(other),
        }
    }
}

/// Command for creating a new platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePlatformCommand {
    /// Email of the owning customer; the customer is created if unknown
    pub customer_email: String,
    pub name: String,
    pub publisher: String,
    pub cost: String,
}

impl CreatePlatformCommand {
    pub fn validate(&self) -> Result<(), CreationError> {
        let email = self.customer_email.trim();
        if email.is_empty() {
            return Err(CreationError::Validation("customerEmail is required".to_string()));
        }
        if !email.contains('@') {
            return Err(CreationError::Validation(format!(
                "customerEmail '{}' is not a valid email address",
                email
            )));
        }

        for (field, value) in [("name", &self.name), ("publisher", &self.publisher), ("cost", &self.cost)] {
            if value.trim().is_empty() {
                return Err(CreationError::Validation(format!("{} is required", field)));
            }
        }

        Ok(())
    }

    fn new_platform(&self) -> NewPlatform {
        NewPlatform {
            name: self.name.clone(),
            publisher: self.publisher.clone(),
            cost: self.cost.clone(),
        }
    }
}

/// Result of a successful creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPlatform {
    pub platform: PlatformView,
    /// Where the platform can be read back
    pub location: String,
}

pub struct CreationOrchestrator {
    repository: Arc<dyn PlatformRepository>,
    replication: Arc<dyn SyncReplicationClient>,
    publisher: Arc<AsyncEventPublisher>,
    observer: Arc<dyn Observer>,
    mode: DeliveryMode,
}

impl CreationOrchestrator {
    pub fn new(
        repository: Arc<dyn PlatformRepository>,
        replication: Arc<dyn SyncReplicationClient>,
        publisher: Arc<AsyncEventPublisher>,
        observer: Arc<dyn Observer>,
        mode: DeliveryMode,
    ) -> Self {
        Self {
            repository,
            replication,
            publisher,
            observer,
            mode,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub async fn create(
        &self,
        command: CreatePlatformCommand,
        cancel: &CancellationToken,
    ) -> Result<CreatedPlatform, CreationError> {
        command.validate()?;

        let mut tx = self.repository.begin().await?;

        let staged = self.run_in_transaction(tx.as_mut(), &command, cancel).await;
        let platform = match staged {
            Ok(platform) => platform,
            Err(e) => {
                self.abort(tx.as_mut(), &e).await;
                return Err(e);
            }
        };

        if let Err(e) = tx.commit().await {
            let e = CreationError::from(e);
            self.abort(tx.as_mut(), &e).await;
            return Err(e);
        }
        self.observer.observe(Observation::Committed { platform_id: platform.id });

        let view = PlatformView::from(&platform);
        if self.mode == DeliveryMode::Outbox {
            self.replicate(&view).await;
        }

        Ok(CreatedPlatform {
            location: platform.location(),
            platform: view,
        })
    }

    async fn run_in_transaction(
        &self,
        tx: &mut dyn RepositoryTransaction,
        command: &CreatePlatformCommand,
        cancel: &CancellationToken,
    ) -> Result<Platform, CreationError> {
        let customer = self.resolve_customer(tx, command.customer_email.trim()).await?;

        let platform = tx.create_platform(customer.id, &command.new_platform()).await?;
        self.observer.observe(Observation::PlatformPersisted {
            platform_id: platform.id,
            customer_id: customer.id,
        });

        let event = PlatformPublished::new(&platform);
        match self.mode {
            DeliveryMode::Direct => {
                self.replicate(&PlatformView::from(&platform)).await;
                self.publisher.publish(&event.to_message(), cancel).await?;
            }
            DeliveryMode::Outbox => {
                let message = event.to_message();
                tx.enqueue_event(&OutboxItem::pending(&message, platform.id.to_string()))
                    .await?;
                self.observer.observe(Observation::OutboxEnqueued {
                    message_id: message.message_id,
                    platform_id: platform.id,
                });
            }
        }

        Ok(platform)
    }

    async fn resolve_customer(
        &self,
        tx: &mut dyn RepositoryTransaction,
        email: &str,
    ) -> Result<Customer, CreationError> {
        let (customer, created) = match tx.find_customer_by_email(email).await? {
            Some(existing) => (existing, false),
            None => (tx.create_customer(&NewCustomer::placeholder(email)).await?, true),
        };

        self.observer.observe(Observation::CustomerResolved {
            customer_id: customer.id,
            created,
        });
        Ok(customer)
    }

    async fn replicate(&self, view: &PlatformView) {
        match self.replication.send_platform(view).await {
            Ok(()) => self.observer.observe(Observation::ReplicationSucceeded { platform_id: view.id }),
            Err(e) => self.observer.observe(Observation::ReplicationFailed {
                platform_id: view.id,
                cause: e.to_string(),
            }),
        }
    }

    async fn abort(&self, tx: &mut dyn RepositoryTransaction, reason: &CreationError) {
        match tx.rollback().await {
            Ok(()) => self.observer.observe(Observation::RolledBack { reason: reason.to_string() }),
            Err(e) => self.observer.observe(Observation::RollbackFailed { cause: e.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(email: &str, name: &str) -> CreatePlatformCommand {
        CreatePlatformCommand {
            customer_email: email.to_string(),
            name: name.to_string(),
            publisher: "Docker Inc".to_string(),
            cost: "0".to_string(),
        }
    }

    #[test]
    fn test_valid_command() {
        assert!(command("ops@example.com", "Docker").validate().is_ok());
    }

    #[test]
    fn test_blank_email_rejected() {
        let err = command("   ", "Docker").validate().unwrap_err();
        assert!(matches!(err, CreationError::Validation(msg) if msg.contains("customerEmail")));
    }

    #[test]
    fn test_email_without_at_rejected() {
        assert!(matches!(
            command("ops.example.com", "Docker").validate(),
            Err(CreationError::Validation(_))
        ));
    }

    #[test]
    fn test_blank_field_rejected() {
        let err = command("ops@example.com", "").validate().unwrap_err();
        assert!(matches!(err, CreationError::Validation(msg) if msg == "name is required"));
    }

    #[test]
    fn test_cancelled_publish_maps_to_cancelled() {
        let err = CreationError::from(PublishError::Cancelled { attempts: 2 });
        assert!(matches!(err, CreationError::Cancelled));
    }
}
