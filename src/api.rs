use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::sinks::SinkError;

/// Per-event outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Inserted,
    Duplicate,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: IngestStatus,
    pub dedup_key: String,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResponse {
    pub received: usize,
    pub processed: usize,
    pub inserted: usize,
    pub duplicate: usize,
    pub invalid: usize,
    pub batch_fail: usize,
}

/// nginx convention for "client closed request"; not in [`StatusCode`]'s
/// named set.
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to decode request: {0}")]
    RequestDecoding(String),

    #[error("empty payload")]
    EmptyBatch,
    #[error("event_name is required")]
    MissingEventName,
    #[error("channel is required")]
    MissingChannel,
    #[error("user_id is required")]
    MissingUserId,
    #[error("timestamp must be a positive unix timestamp")]
    InvalidTimestamp,
    #[error("timestamp must not be in the future")]
    FutureTimestamp,
    #[error("metadata must be valid JSON")]
    InvalidMetadata,

    #[error("{0}")]
    InvalidQuery(String),

    #[error("client closed request")]
    Cancelled,
    #[error("ingestion temporarily unavailable")]
    Stopped,

    // client-facing message is generic; the cause only reaches the log
    #[error("internal error")]
    Store(String),
    #[error("internal error")]
    Internal(String),
}

impl From<SinkError> for IngestError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Stopped => IngestError::Stopped,
            SinkError::Cancelled => IngestError::Cancelled,
            SinkError::Internal(cause) => IngestError::Internal(cause),
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngestError::RequestDecoding(_)
            | IngestError::EmptyBatch
            | IngestError::MissingEventName
            | IngestError::MissingChannel
            | IngestError::MissingUserId
            | IngestError::InvalidTimestamp
            | IngestError::FutureTimestamp
            | IngestError::InvalidMetadata
            | IngestError::InvalidQuery(_) => StatusCode::BAD_REQUEST,

            IngestError::Cancelled => StatusCode::from_u16(STATUS_CLIENT_CLOSED_REQUEST)
                .expect("static status code"),

            IngestError::Stopped => StatusCode::SERVICE_UNAVAILABLE,

            IngestError::Store(_) | IngestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, status = %status, "request failed");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
