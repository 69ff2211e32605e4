//! Platform Repository
//!
//! Durable state for customers and platforms. Writes happen through a
//! [`RepositoryTransaction`]; nothing staged in one is visible to other
//! readers until it commits.

pub mod sqlite;

use async_trait::async_trait;
use ps_common::OutboxItem;
use thiserror::Error;

use crate::customer::{Customer, NewCustomer};
use crate::platform::{NewPlatform, Platform};

pub use sqlite::SqlitePlatformRepository;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("transaction already finished")]
    TransactionClosed,

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait PlatformRepository: Send + Sync {
    /// Open the single transaction of a creation request.
    async fn begin(&self) -> StorageResult<Box<dyn RepositoryTransaction>>;

    async fn find_platform_by_id(&self, id: i64) -> StorageResult<Option<Platform>>;

    /// All committed platforms, in id order
    async fn find_all_platforms(&self) -> StorageResult<Vec<Platform>>;
}

/// One open transaction.
///
/// Inserts return the stored row, so ids are known as soon as a write is staged.
/// After `commit` or `rollback` further writes fail with
/// [`StorageError::TransactionClosed`]; a second `rollback` is a no-op.
#[async_trait]
pub trait RepositoryTransaction: Send {
    async fn find_customer_by_email(&mut self, email: &str) -> StorageResult<Option<Customer>>;

    /// Stage a customer. If another transaction committed the same email
    /// first, the existing row is returned instead.
    async fn create_customer(&mut self, customer: &NewCustomer) -> StorageResult<Customer>;

    async fn create_platform(&mut self, customer_id: i64, platform: &NewPlatform) -> StorageResult<Platform>;

    /// Stage an outbox row alongside the business rows.
    async fn enqueue_event(&mut self, item: &OutboxItem) -> StorageResult<()>;

    async fn commit(&mut self) -> StorageResult<()>;

    async fn rollback(&mut self) -> StorageResult<()>;
}
