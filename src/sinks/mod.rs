use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::IngestStatus;
use crate::event::Event;

pub mod print;
pub mod writer;

pub use print::PrintSink;
pub use writer::{SingleWriter, WriterConfig};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("ingest sink stopped")]
    Stopped,
    #[error("submission cancelled")]
    Cancelled,
    #[error("ingest failure: {0}")]
    Internal(String),
}

#[async_trait]
pub trait EventSink {
    /// Bring up the sink's background machinery. Idempotent.
    fn start(&self);

    /// Drain in-flight work and halt. Idempotent; returns once the sink has
    /// halted or the deadline elapsed. After an `Ok` no further store calls
    /// are made.
    async fn stop(&self, deadline: Duration) -> Result<(), SinkError>;

    /// Submit one event and wait for its definitive outcome.
    ///
    /// A token fired before enqueue guarantees the event is never persisted.
    /// A token fired after enqueue returns [`SinkError::Cancelled`] while the
    /// event may still be committed; at-most-once persistence holds either
    /// way and a retry with the same content is absorbed by dedup.
    async fn submit(
        &self,
        event: Event,
        cancel: CancellationToken,
    ) -> Result<IngestStatus, SinkError>;
}

#[async_trait]
impl<T: EventSink + ?Sized + Send + Sync> EventSink for Box<T> {
    fn start(&self) {
        (**self).start()
    }

    async fn stop(&self, deadline: Duration) -> Result<(), SinkError> {
        (**self).stop(deadline).await
    }

    async fn submit(
        &self,
        event: Event,
        cancel: CancellationToken,
    ) -> Result<IngestStatus, SinkError> {
        (**self).submit(event, cancel).await
    }
}

#[async_trait]
impl<T: EventSink + ?Sized + Send + Sync> EventSink for Arc<T> {
    fn start(&self) {
        (**self).start()
    }

    async fn stop(&self, deadline: Duration) -> Result<(), SinkError> {
        (**self).stop(deadline).await
    }

    async fn submit(
        &self,
        event: Event,
        cancel: CancellationToken,
    ) -> Result<IngestStatus, SinkError> {
        (**self).submit(event, cancel).await
    }
}
