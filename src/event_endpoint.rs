use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::api::{BulkResponse, IngestError, IngestResponse};
use crate::event::{Event, EventPayload};
use crate::router;
use crate::sinks::SinkError;
use crate::store::MAX_INSERT_ROWS;

/// POST /events: validate one payload, hand it to the coalescer and report
/// the definitive inserted/duplicate outcome.
pub async fn event(
    State(state): State<router::State>,
    payload: Result<Json<EventPayload>, JsonRejection>,
) -> Result<Json<IngestResponse>, IngestError> {
    let Json(payload) = payload.map_err(|e| IngestError::RequestDecoding(e.body_text()))?;

    let now = state.timesource.now();
    payload.validate(now)?;
    let event = payload.to_event()?;
    let dedup_key = event.dedup_key.clone();

    // The token fires on timeout; once the event is enqueued the writer may
    // still commit it, which is exactly the at-most-once contract. A client
    // disconnect simply drops this future and with it the reply slot.
    let cancel = CancellationToken::new();
    let submitted = tokio::select! {
        submitted = state.sink.submit(event, cancel.clone()) => submitted,
        _ = tokio::time::sleep(state.request_timeout) => {
            cancel.cancel();
            Err(SinkError::Cancelled)
        }
    };

    let status = submitted.map_err(IngestError::from)?;
    Ok(Json(IngestResponse { status, dedup_key }))
}

/// POST /events/bulk: validate each payload independently, then write the
/// valid ones straight to the store in row-capped chunks. An invalid payload
/// never fails its peers; a failed chunk is counted wholesale as
/// `batch_fail` because a failed transaction has no per-row attribution.
pub async fn bulk(
    State(state): State<router::State>,
    payload: Result<Json<Vec<EventPayload>>, JsonRejection>,
) -> Result<Json<BulkResponse>, IngestError> {
    let Json(payloads) = payload.map_err(|e| IngestError::RequestDecoding(e.body_text()))?;
    if payloads.is_empty() {
        return Err(IngestError::EmptyBatch);
    }

    let now = state.timesource.now();
    let received = payloads.len();
    let mut invalid = 0usize;
    let mut events: Vec<Event> = Vec::with_capacity(payloads.len());

    for payload in &payloads {
        if payload.validate(now).is_err() {
            invalid += 1;
            continue;
        }
        match payload.to_event() {
            Ok(event) => events.push(event),
            Err(_) => invalid += 1,
        }
    }

    let mut response = BulkResponse {
        received,
        processed: events.len(),
        invalid,
        ..Default::default()
    };

    for chunk in events.chunks(MAX_INSERT_ROWS) {
        match state.events.insert_batch(chunk).await {
            Ok(inserted_keys) => {
                response.inserted += inserted_keys.len();
                response.duplicate += chunk.len() - inserted_keys.len();
            }
            Err(store_err) => {
                error!(
                    component = "events_bulk",
                    chunk_size = chunk.len(),
                    error = %store_err,
                    "bulk chunk insert failed"
                );
                response.batch_fail += chunk.len();
            }
        }
    }

    Ok(Json(response))
}
