#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum_test_helper::TestClient;
use chrono::{DateTime, TimeZone, Utc};

use eventgate::event::{Event, EventPayload};
use eventgate::sinks::{EventSink, SingleWriter, WriterConfig};
use eventgate::store::{
    ChannelTotals, EventBatchStore, MetricsStore, StoreError, Totals,
};
use eventgate::time::TimeSource;

/// Base instant for fixtures; the fixed clock sits 100s after it so
/// payloads stamped at the base are always valid.
pub const BASE_UNIX: i64 = 1_700_000_000;

#[derive(Clone)]
pub struct FixedTime {
    pub now: DateTime<Utc>,
}

impl TimeSource for FixedTime {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

pub fn fixed_time() -> FixedTime {
    FixedTime {
        now: Utc.timestamp_opt(BASE_UNIX + 100, 0).unwrap(),
    }
}

/// In-memory stand-in for the Postgres event store: same insert-or-skip
/// contract, plus knobs to slow it down or fail it.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<MemoryInner>,
    delay: Option<Duration>,
    fail: AtomicBool,
}

#[derive(Default)]
struct MemoryInner {
    rows: Vec<Event>,
    seen: HashSet<String>,
    batch_sizes: Vec<usize>,
}

impl MemoryEventStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<Event> {
        self.inner.lock().unwrap().rows.clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.inner.lock().unwrap().batch_sizes.clone()
    }
}

#[async_trait]
impl EventBatchStore for MemoryEventStore {
    async fn insert_batch(&self, events: &[Event]) -> Result<HashSet<String>, StoreError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }

        let mut inner = self.inner.lock().unwrap();
        inner.batch_sizes.push(events.len());
        let mut inserted = HashSet::new();
        for event in events {
            if inner.seen.insert(event.dedup_key.clone()) {
                inner.rows.push(event.clone());
                inserted.insert(event.dedup_key.clone());
            }
        }
        Ok(inserted)
    }
}

/// Canned metrics responses for exercising the read endpoint shape.
#[derive(Default, Clone)]
pub struct StaticMetricsStore {
    pub totals: Totals,
    pub by_channel: Vec<ChannelTotals>,
}

#[async_trait]
impl MetricsStore for StaticMetricsStore {
    async fn totals(
        &self,
        _event_name: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
        _channel: &str,
    ) -> Result<Totals, StoreError> {
        Ok(self.totals)
    }

    async fn by_channel(
        &self,
        _event_name: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
        _channel: &str,
    ) -> Result<Vec<ChannelTotals>, StoreError> {
        Ok(self.by_channel.clone())
    }
}

pub fn sample_event(user_id: &str, timestamp: i64) -> Event {
    EventPayload {
        event_name: "click".into(),
        channel: "push".into(),
        campaign_id: String::new(),
        user_id: user_id.into(),
        timestamp,
        tags: vec![],
        metadata: None,
    }
    .to_event()
    .unwrap()
}

pub struct TestApp {
    pub client: TestClient,
    pub store: Arc<MemoryEventStore>,
    pub sink: Arc<SingleWriter>,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(
        MemoryEventStore::new(),
        StaticMetricsStore::default(),
        Duration::from_secs(1),
    )
    .await
}

pub async fn spawn_app_with(
    store: Arc<MemoryEventStore>,
    metrics: StaticMetricsStore,
    request_timeout: Duration,
) -> TestApp {
    let sink = Arc::new(SingleWriter::new(
        store.clone() as Arc<dyn EventBatchStore + Send + Sync>,
        WriterConfig {
            batch_window: Duration::from_millis(2),
            max_batch: 64,
            queue_size: 1024,
        },
    ));
    sink.start();

    let router = eventgate::router::router(
        fixed_time(),
        sink.clone(),
        store.clone(),
        metrics,
        request_timeout,
    );

    TestApp {
        client: TestClient::new(router).await,
        store,
        sink,
    }
}
