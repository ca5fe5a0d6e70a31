use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{ChannelTotals, MetricsStore, StoreError, Totals};

pub struct PgMetricsStore {
    pool: PgPool,
}

impl PgMetricsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsStore for PgMetricsStore {
    async fn totals(
        &self,
        event_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        channel: &str,
    ) -> Result<Totals, StoreError> {
        let (total, unique_users): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
              COUNT(*)::bigint AS total,
              COUNT(DISTINCT user_id)::bigint AS unique_users
            FROM events
            WHERE event_name = $1
              AND ts >= $2
              AND ts <  $3
              AND ($4 = '' OR channel = $4)
            "#,
        )
        .bind(event_name)
        .bind(from)
        .bind(to)
        .bind(channel)
        .fetch_one(&self.pool)
        .await?;

        Ok(Totals {
            total,
            unique_users,
        })
    }

    async fn by_channel(
        &self,
        event_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        channel: &str,
    ) -> Result<Vec<ChannelTotals>, StoreError> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT
              channel,
              COUNT(*)::bigint AS total,
              COUNT(DISTINCT user_id)::bigint AS unique_users
            FROM events
            WHERE event_name = $1
              AND ts >= $2
              AND ts <  $3
              AND ($4 = '' OR channel = $4)
            GROUP BY channel
            ORDER BY channel
            "#,
        )
        .bind(event_name)
        .bind(from)
        .bind(to)
        .bind(channel)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(channel, total, unique_users)| ChannelTotals {
                channel,
                total,
                unique_users,
            })
            .collect())
    }
}
