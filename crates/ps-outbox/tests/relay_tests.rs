//! Outbox relay tests
//!
//! Exercises the relay against a real in-memory SQLite outbox, with either a
//! wiremock broker or an in-process failing channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ps_common::testing::{RecordingObserver, RecordingSleeper};
use ps_common::{ChannelMessage, Observation, OutboxItem, OutboxStatus, RetryPolicy, PLATFORM_PUBLISHED};
use ps_outbox::sqlite::{enqueue, SqliteOutboxRepository};
use ps_outbox::{
    AsyncEventPublisher, BatchSummary, ChannelError, HttpChannel, HttpChannelConfig, MessageChannel,
    OutboxRelay, OutboxRelayConfig, OutboxRepository,
};

/// Channel that refuses every message
struct DownChannel {
    calls: AtomicUsize,
}

impl DownChannel {
    fn new() -> Self {
        Self { calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl MessageChannel for DownChannel {
    async fn send(&self, _message: &ChannelMessage) -> Result<(), ChannelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ChannelError::Unavailable("broker down".to_string()))
    }
}

async fn outbox() -> Arc<SqliteOutboxRepository> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let repo = SqliteOutboxRepository::new(pool);
    repo.init_schema().await.unwrap();
    Arc::new(repo)
}

async fn enqueue_platform(repo: &SqliteOutboxRepository, platform_id: i64) -> OutboxItem {
    let message = ChannelMessage::new(PLATFORM_PUBLISHED, json!({"id": platform_id, "name": "Docker"}));
    let item = OutboxItem::pending(&message, platform_id.to_string());
    enqueue(repo.pool(), &item).await.unwrap();
    item
}

fn relay(
    repo: Arc<SqliteOutboxRepository>,
    channel: Arc<dyn MessageChannel>,
    observer: Arc<RecordingObserver>,
    max_relay_attempts: i32,
) -> OutboxRelay {
    relay_with_sleeper(repo, channel, observer, max_relay_attempts, RecordingSleeper::new())
}

fn relay_with_sleeper(
    repo: Arc<SqliteOutboxRepository>,
    channel: Arc<dyn MessageChannel>,
    observer: Arc<RecordingObserver>,
    max_relay_attempts: i32,
    sleeper: RecordingSleeper,
) -> OutboxRelay {
    let publisher = AsyncEventPublisher::new(channel, RetryPolicy::default(), observer.clone())
        .with_sleeper(Arc::new(sleeper));

    OutboxRelay::new(
        repo,
        Arc::new(publisher),
        observer,
        OutboxRelayConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 10,
            max_relay_attempts,
        },
    )
}

#[tokio::test]
async fn test_relay_delivers_pending_rows_to_broker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/events"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let repo = outbox().await;
    let first = enqueue_platform(&repo, 1).await;
    let second = enqueue_platform(&repo, 2).await;

    let channel = HttpChannel::new(HttpChannelConfig {
        endpoint: format!("{}/api/events", server.uri()),
        ..Default::default()
    })
    .unwrap();
    let observer = Arc::new(RecordingObserver::new());
    let relay = relay(repo.clone(), Arc::new(channel), observer.clone(), 10);

    let summary = relay.process_batch(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary, BatchSummary { delivered: 2, ..Default::default() });

    for item in [first, second] {
        let stored = repo.find_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::SUCCESS);
    }
    assert_eq!(observer.count(|o| matches!(o, Observation::RelayDelivered { attempts: 1, .. })), 2);
}

#[tokio::test]
async fn test_exhausted_publish_defers_row() {
    let repo = outbox().await;
    let item = enqueue_platform(&repo, 1).await;
    let channel = Arc::new(DownChannel::new());
    let observer = Arc::new(RecordingObserver::new());

    let summary = relay(repo.clone(), channel.clone(), observer.clone(), 10)
        .process_batch(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.deferred, 1);
    assert_eq!(channel.calls.load(Ordering::SeqCst), 5);

    let stored = repo.find_by_id(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OutboxStatus::PENDING);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.error_message.unwrap().contains("broker down"));
    assert!(observer.contains(|o| matches!(o, Observation::RelayDeferred { retry_count: 1, .. })));
}

#[tokio::test]
async fn test_row_fails_after_max_relay_attempts() {
    let repo = outbox().await;
    let item = enqueue_platform(&repo, 1).await;
    let observer = Arc::new(RecordingObserver::new());
    let relay = relay(repo.clone(), Arc::new(DownChannel::new()), observer.clone(), 2);

    relay.process_batch(&CancellationToken::new()).await.unwrap();
    let summary = relay.process_batch(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.failed, 1);

    let stored = repo.find_by_id(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OutboxStatus::FAILED);
    assert_eq!(stored.retry_count, 2);
    assert!(observer.contains(|o| matches!(o, Observation::RelayGaveUp { retry_count: 2, .. })));

    // FAILED rows are no longer picked up
    let summary = relay.process_batch(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary, BatchSummary::default());
}

#[tokio::test]
async fn test_cancelled_relay_claims_nothing() {
    let repo = outbox().await;
    let a = enqueue_platform(&repo, 1).await;
    let b = enqueue_platform(&repo, 2).await;
    let channel = Arc::new(DownChannel::new());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = relay(repo.clone(), channel.clone(), Arc::new(RecordingObserver::new()), 10)
        .process_batch(&cancel)
        .await
        .unwrap();

    assert_eq!(summary, BatchSummary::default());
    assert_eq!(channel.calls.load(Ordering::SeqCst), 0);
    for item in [a, b] {
        let stored = repo.find_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::PENDING);
        assert_eq!(stored.retry_count, 0);
    }
}

#[tokio::test]
async fn test_shutdown_mid_backoff_releases_current_row() {
    let repo = outbox().await;
    let a = enqueue_platform(&repo, 1).await;
    let b = enqueue_platform(&repo, 2).await;
    let channel = Arc::new(DownChannel::new());

    let summary = relay_with_sleeper(
        repo.clone(),
        channel.clone(),
        Arc::new(RecordingObserver::new()),
        10,
        RecordingSleeper::cancelling_on(1),
    )
    .process_batch(&CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(summary, BatchSummary { released: 1, ..Default::default() });
    assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
    for item in [a, b] {
        let stored = repo.find_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::PENDING);
        assert_eq!(stored.retry_count, 0);
    }
}

/// Channel that snapshots the outbox row statuses each time it is called
struct StatusSnapshotChannel {
    repo: Arc<SqliteOutboxRepository>,
    ids: Vec<String>,
    snapshots: Mutex<Vec<Vec<OutboxStatus>>>,
}

#[async_trait]
impl MessageChannel for StatusSnapshotChannel {
    async fn send(&self, _message: &ChannelMessage) -> Result<(), ChannelError> {
        let mut statuses = Vec::new();
        for id in &self.ids {
            let stored = self
                .repo
                .find_by_id(id)
                .await
                .map_err(|e| ChannelError::Unavailable(e.to_string()))?
                .ok_or_else(|| ChannelError::Unavailable(format!("missing row {id}")))?;
            statuses.push(stored.status);
        }
        self.snapshots.lock().push(statuses);
        Ok(())
    }
}

#[tokio::test]
async fn test_rows_are_claimed_one_at_a_time() {
    let repo = outbox().await;
    let a = enqueue_platform(&repo, 1).await;
    let b = enqueue_platform(&repo, 2).await;
    let channel = Arc::new(StatusSnapshotChannel {
        repo: repo.clone(),
        ids: vec![a.id.clone(), b.id.clone()],
        snapshots: Mutex::new(Vec::new()),
    });

    let summary = relay(repo.clone(), channel.clone(), Arc::new(RecordingObserver::new()), 10)
        .process_batch(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.delivered, 2);

    // The second row is still PENDING, and so recoverable, while the first is in flight
    assert_eq!(
        channel.snapshots.lock().clone(),
        vec![
            vec![OutboxStatus::IN_PROGRESS, OutboxStatus::PENDING],
            vec![OutboxStatus::SUCCESS, OutboxStatus::IN_PROGRESS],
        ]
    );
}

#[tokio::test]
async fn test_run_loop_relays_until_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let repo = outbox().await;
    let item = enqueue_platform(&repo, 1).await;
    let channel = HttpChannel::new(HttpChannelConfig {
        endpoint: format!("{}/api/events", server.uri()),
        ..Default::default()
    })
    .unwrap();
    let relay = Arc::new(relay(repo.clone(), Arc::new(channel), Arc::new(RecordingObserver::new()), 10));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let relay = relay.clone();
        let cancel = cancel.clone();
        async move { relay.run(cancel).await }
    });

    let delivered = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stored = repo.find_by_id(&item.id).await.unwrap().unwrap();
            if stored.status == OutboxStatus::SUCCESS {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(delivered.is_ok(), "relay did not deliver the row in time");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
