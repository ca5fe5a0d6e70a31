use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use super::{EventBatchStore, StoreError};
use crate::event::Event;

/// 8 positional parameters per row against Postgres' 65535 bind limit gives
/// a ceiling of 8191 rows; 4000 leaves a comfortable margin.
pub const MAX_INSERT_ROWS: usize = 4000;

pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventBatchStore for PgEventStore {
    async fn insert_batch(&self, events: &[Event]) -> Result<HashSet<String>, StoreError> {
        if events.is_empty() {
            return Ok(HashSet::new());
        }
        if events.len() > MAX_INSERT_ROWS {
            return Err(StoreError::BatchTooLarge(events.len()));
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO events (dedup_key, event_name, channel, campaign_id, user_id, ts, tags, metadata) ",
        );
        builder.push_values(events, |mut row, event| {
            row.push_bind(&event.dedup_key)
                .push_bind(&event.event_name)
                .push_bind(&event.channel)
                .push_bind(campaign_id_param(event))
                .push_bind(&event.user_id)
                .push_bind(event.timestamp)
                .push_bind(&event.tags)
                .push_bind(metadata_param(event))
                .push_unseparated("::jsonb");
        });
        builder.push(" ON CONFLICT (dedup_key) DO NOTHING RETURNING dedup_key");

        let mut tx = self.pool.begin().await?;
        let rows = builder.build().fetch_all(&mut *tx).await?;
        tx.commit().await?;

        let mut inserted = HashSet::with_capacity(rows.len());
        for row in rows {
            inserted.insert(row.try_get("dedup_key").map_err(StoreError::Database)?);
        }
        Ok(inserted)
    }
}

fn campaign_id_param(event: &Event) -> Option<&str> {
    // empty campaign is stored as NULL
    if event.campaign_id.is_empty() {
        None
    } else {
        Some(event.campaign_id.as_str())
    }
}

fn metadata_param(event: &Event) -> &str {
    if event.metadata.is_empty() {
        "{}"
    } else {
        &event.metadata
    }
}
