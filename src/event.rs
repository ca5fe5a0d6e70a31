use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};

use crate::api::IngestError;

/// Raw unix values at or above this are read as milliseconds, below as seconds.
pub const UNIX_MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

const MAX_FUTURE_SKEW_MINUTES: i64 = 2;

/// Caller-supplied event document, as decoded off the wire. Unknown fields
/// are rejected; missing fields fall back to their zero value so that
/// validation can name the offending field instead of failing the decode.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventPayload {
    pub event_name: String,
    pub channel: String,
    pub campaign_id: String,
    pub user_id: String,
    pub timestamp: i64,
    pub tags: Vec<String>,
    pub metadata: Option<Box<RawValue>>,
}

/// Canonical internal form. `dedup_key` is a pure function of the other
/// fields; two payloads that normalize identically produce the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub dedup_key: String,
    pub event_name: String,
    pub channel: String,
    pub campaign_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub tags: Vec<String>,
    /// Canonical JSON text, or empty when the payload carried none.
    pub metadata: String,
}

impl EventPayload {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), IngestError> {
        if self.event_name.trim().is_empty() {
            return Err(IngestError::MissingEventName);
        }
        if self.channel.trim().is_empty() {
            return Err(IngestError::MissingChannel);
        }
        if self.user_id.trim().is_empty() {
            return Err(IngestError::MissingUserId);
        }

        let ts = parse_unix_timestamp(self.timestamp).ok_or(IngestError::InvalidTimestamp)?;
        if ts > now + Duration::minutes(MAX_FUTURE_SKEW_MINUTES) {
            return Err(IngestError::FutureTimestamp);
        }

        if let Some(raw) = &self.metadata {
            if serde_json::from_str::<serde_json::Value>(raw.get()).is_err() {
                return Err(IngestError::InvalidMetadata);
            }
        }

        Ok(())
    }

    pub fn to_event(&self) -> Result<Event, IngestError> {
        let timestamp = parse_unix_timestamp(self.timestamp).ok_or(IngestError::InvalidTimestamp)?;
        let tags = normalize_tags(&self.tags);
        let metadata = normalize_metadata(self.metadata.as_deref());

        let event_name = self.event_name.trim().to_owned();
        let channel = self.channel.trim().to_owned();
        let campaign_id = self.campaign_id.trim().to_owned();
        let user_id = self.user_id.trim().to_owned();

        let dedup_key = build_dedup_key(
            &event_name,
            &channel,
            &campaign_id,
            &user_id,
            timestamp.timestamp_millis(),
            &tags,
            &metadata,
        );

        Ok(Event {
            dedup_key,
            event_name,
            channel,
            campaign_id,
            user_id,
            timestamp,
            tags,
            metadata,
        })
    }
}

/// Seconds-vs-milliseconds heuristic shared by payloads and the metrics
/// query parameters. Returns `None` for non-positive or unrepresentable
/// values.
pub fn parse_unix_timestamp(raw: i64) -> Option<DateTime<Utc>> {
    if raw <= 0 {
        return None;
    }
    if raw >= UNIX_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

fn normalize_tags(input: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = input
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(str::to_owned)
        .collect();
    tags.sort_unstable();
    tags.dedup();
    tags
}

/// Parse-and-reserialize to collapse client formatting differences. Anything
/// that fails to round-trip collapses to empty, which hashes as the `{}`
/// sentinel.
fn normalize_metadata(raw: Option<&RawValue>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };
    match serde_json::from_str::<serde_json::Value>(raw.get()) {
        Ok(value) => serde_json::to_string(&value).unwrap_or_default(),
        Err(_) => String::new(),
    }
}

/// Canonical serialization: fields joined by `|`, timestamp in unix millis,
/// tags joined by `,`, empty metadata rendered as the literal `{}`. The
/// SHA-256 of these bytes (lowercase hex) is the external dedup contract;
/// any change here changes every key.
pub fn build_dedup_key(
    event_name: &str,
    channel: &str,
    campaign_id: &str,
    user_id: &str,
    ts_unix_millis: i64,
    tags: &[String],
    metadata: &str,
) -> String {
    let mut canonical = String::with_capacity(96);
    canonical.push_str(event_name);
    canonical.push('|');
    canonical.push_str(channel);
    canonical.push('|');
    canonical.push_str(campaign_id);
    canonical.push('|');
    canonical.push_str(user_id);
    canonical.push('|');
    canonical.push_str(&ts_unix_millis.to_string());
    canonical.push('|');
    canonical.push_str(&tags.join(","));
    canonical.push('|');
    if metadata.is_empty() {
        canonical.push_str("{}");
    } else {
        canonical.push_str(metadata);
    }

    hex::encode(Sha256::digest(canonical.as_bytes()))
}
