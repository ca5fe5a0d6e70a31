use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::api::IngestError;
use crate::event::parse_unix_timestamp;
use crate::router;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MetricsQuery {
    pub event_name: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub event_name: String,
    pub from: i64,
    pub to: i64,
    pub total: i64,
    pub unique: i64,
    pub group_by: String,
    pub breakdown: Vec<BreakdownRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BreakdownRow {
    pub channel: String,
    pub total: i64,
    pub unique: i64,
}

/// GET /metrics: aggregate totals over `[from, to)`, plus a per-channel
/// breakdown. `to` defaults to now, `from` to one hour before `to`.
pub async fn metrics(
    State(state): State<router::State>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<MetricsResponse>, IngestError> {
    let event_name = query.event_name.as_deref().map(str::trim).unwrap_or("");
    if event_name.is_empty() {
        return Err(IngestError::InvalidQuery("event_name is required".into()));
    }

    let now = state.timesource.now();
    let to = parse_time_param(query.to.as_deref())
        .map_err(|()| IngestError::InvalidQuery("invalid to".into()))?
        .unwrap_or(now);
    let from = parse_time_param(query.from.as_deref())
        .map_err(|()| IngestError::InvalidQuery("invalid from".into()))?
        .unwrap_or_else(|| to - Duration::hours(1));

    if from >= to {
        return Err(IngestError::InvalidQuery("from must be < to".into()));
    }

    let channel = query.channel.as_deref().map(str::trim).unwrap_or("");

    let totals = state
        .metrics
        .totals(event_name, from, to, channel)
        .await
        .map_err(|e| IngestError::Store(e.to_string()))?;

    let by_channel = state
        .metrics
        .by_channel(event_name, from, to, channel)
        .await
        .map_err(|e| IngestError::Store(e.to_string()))?;

    let breakdown = by_channel
        .into_iter()
        .map(|row| BreakdownRow {
            channel: row.channel,
            total: row.total,
            unique: row.unique_users,
        })
        .collect();

    Ok(Json(MetricsResponse {
        event_name: event_name.to_owned(),
        from: from.timestamp(),
        to: to.timestamp(),
        total: totals.total,
        unique: totals.unique_users,
        group_by: "channel".to_owned(),
        breakdown,
        channel: (!channel.is_empty()).then(|| channel.to_owned()),
    }))
}

/// Query times accept the same seconds-vs-milliseconds heuristic as event
/// timestamps. `Ok(None)` means the parameter was absent.
fn parse_time_param(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ()> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let n: i64 = raw.parse().map_err(|_| ())?;
    parse_unix_timestamp(n).ok_or(()).map(Some)
}
