use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::event::Event;

pub mod events;
pub mod metrics;

pub use events::{PgEventStore, MAX_INSERT_ROWS};
pub use metrics::PgMetricsStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("batch of {0} rows exceeds the {MAX_INSERT_ROWS} row insert limit")]
    BatchTooLarge(usize),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Transactional insert-or-skip over a bounded slice of events.
#[async_trait]
pub trait EventBatchStore {
    /// Returns the set of dedup keys actually inserted; a key absent from
    /// the set means its row already existed. All-or-nothing at the
    /// transaction level.
    async fn insert_batch(&self, events: &[Event]) -> Result<HashSet<String>, StoreError>;
}

#[async_trait]
impl<T: EventBatchStore + ?Sized + Send + Sync> EventBatchStore for Arc<T> {
    async fn insert_batch(&self, events: &[Event]) -> Result<HashSet<String>, StoreError> {
        (**self).insert_batch(events).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub total: i64,
    pub unique_users: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelTotals {
    pub channel: String,
    pub total: i64,
    pub unique_users: i64,
}

/// Read-only aggregates over the half-open interval `[from, to)`. An empty
/// `channel` means "do not filter".
#[async_trait]
pub trait MetricsStore {
    async fn totals(
        &self,
        event_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        channel: &str,
    ) -> Result<Totals, StoreError>;

    async fn by_channel(
        &self,
        event_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        channel: &str,
    ) -> Result<Vec<ChannelTotals>, StoreError>;
}
