use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{EventSink, SinkError};
use crate::api::IngestStatus;
use crate::event::Event;

/// Logs submissions instead of persisting them. Local debug only: every
/// event reports `inserted` and nothing is written anywhere.
pub struct PrintSink {}

#[async_trait]
impl EventSink for PrintSink {
    fn start(&self) {}

    async fn stop(&self, _deadline: Duration) -> Result<(), SinkError> {
        Ok(())
    }

    async fn submit(
        &self,
        event: Event,
        _cancel: CancellationToken,
    ) -> Result<IngestStatus, SinkError> {
        info!("event: {event:?}");
        counter!("ingest_events_submitted_total").increment(1);
        Ok(IngestStatus::Inserted)
    }
}
