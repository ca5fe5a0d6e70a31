use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{EventSink, SinkError};
use crate::api::IngestStatus;
use crate::event::Event;
use crate::store::EventBatchStore;

/// Bound on one store call, independent of any submitter's deadline so a
/// producer hang-up cannot kill an in-flight write.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum time a non-empty, non-full batch is deferred.
    pub batch_window: Duration,
    /// Maximum events per store call. Must not exceed the store's row cap.
    pub max_batch: usize,
    /// Bounded intake depth; submitters block (backpressure) when full.
    pub queue_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(2),
            max_batch: 800,
            queue_size: 50_000,
        }
    }
}

struct SubmitRequest {
    event: Event,
    /// Single-shot reply slot; the writer's send never blocks and an
    /// abandoned receiver is silently discarded.
    reply: oneshot::Sender<Result<IngestStatus, SinkError>>,
}

/// Single-writer coalescer: many concurrent submitters feed a bounded
/// queue, one consumer task owns every store write and fans per-event
/// outcomes back through oneshot reply slots.
pub struct SingleWriter {
    store: Arc<dyn EventBatchStore + Send + Sync>,
    config: WriterConfig,
    tx: mpsc::Sender<SubmitRequest>,
    stopping: CancellationToken,
    /// Cancelled when the writer task has exited, however it exited; every
    /// `stop` caller waits on this rather than on the join handle, so
    /// repeated or racing stops all observe the writer's true state.
    halted: CancellationToken,
    state: Mutex<WriterState>,
}

struct WriterState {
    intake: Option<mpsc::Receiver<SubmitRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl SingleWriter {
    pub fn new(store: Arc<dyn EventBatchStore + Send + Sync>, config: WriterConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_size);
        Self {
            store,
            config,
            tx,
            stopping: CancellationToken::new(),
            halted: CancellationToken::new(),
            state: Mutex::new(WriterState {
                intake: Some(rx),
                handle: None,
            }),
        }
    }
}

#[async_trait]
impl EventSink for SingleWriter {
    fn start(&self) {
        if self.stopping.is_cancelled() {
            return;
        }
        let mut state = self.state.lock().expect("writer state lock poisoned");
        let Some(intake) = state.intake.take() else {
            return; // already running
        };
        let writer_loop = WriterLoop {
            store: self.store.clone(),
            config: self.config.clone(),
            intake,
            stopping: self.stopping.clone(),
        };
        let halted = self.halted.clone();
        state.handle = Some(tokio::spawn(async move {
            // the guard cancels `halted` even if the loop panics
            let _halt_guard = halted.drop_guard();
            writer_loop.run().await;
        }));
    }

    async fn stop(&self, deadline: Duration) -> Result<(), SinkError> {
        self.stopping.cancel();

        {
            let state = self.state.lock().expect("writer state lock poisoned");
            // never started: there is no writer task to wait for, and
            // `start` refuses to spawn one once stopping is cancelled
            if state.intake.is_some() {
                return Ok(());
            }
        }

        if timeout(deadline, self.halted.cancelled()).await.is_err() {
            return Err(SinkError::Internal(
                "writer did not halt before the stop deadline".into(),
            ));
        }

        // the loop has exited; reap the task so a panic is surfaced
        let handle = {
            let mut state = self.state.lock().expect("writer state lock poisoned");
            state.handle.take()
        };
        if let Some(handle) = handle {
            if let Err(join_err) = handle.await {
                error!(component = "ingest_writer", error = %join_err, "writer task failed");
            }
        }
        Ok(())
    }

    async fn submit(
        &self,
        event: Event,
        cancel: CancellationToken,
    ) -> Result<IngestStatus, SinkError> {
        if self.stopping.is_cancelled() {
            return Err(SinkError::Stopped);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = SubmitRequest {
            event,
            reply: reply_tx,
        };

        tokio::select! {
            sent = self.tx.send(request) => {
                // a dropped receiver means the writer loop is gone
                if sent.is_err() {
                    return Err(SinkError::Stopped);
                }
            }
            _ = self.stopping.cancelled() => return Err(SinkError::Stopped),
            _ = cancel.cancelled() => return Err(SinkError::Cancelled),
        }

        tokio::select! {
            outcome = reply_rx => match outcome {
                Ok(result) => result,
                Err(_) => Err(SinkError::Internal("writer dropped the reply slot".into())),
            },
            _ = cancel.cancelled() => Err(SinkError::Cancelled),
        }
    }
}

struct WriterLoop {
    store: Arc<dyn EventBatchStore + Send + Sync>,
    config: WriterConfig,
    intake: mpsc::Receiver<SubmitRequest>,
    stopping: CancellationToken,
}

impl WriterLoop {
    async fn run(mut self) {
        info!(
            component = "ingest_writer",
            batch_window_us = self.config.batch_window.as_micros() as u64,
            max_batch = self.config.max_batch,
            "writer loop started"
        );

        let mut batch: Vec<SubmitRequest> = Vec::with_capacity(self.config.max_batch);
        let window = tokio::time::sleep(self.config.batch_window);
        tokio::pin!(window);
        let mut window_armed = false;

        loop {
            tokio::select! {
                _ = self.stopping.cancelled() => break,

                received = self.intake.recv() => match received {
                    Some(request) => {
                        // arm the window when the batch starts
                        if batch.is_empty() {
                            window.as_mut().reset(Instant::now() + self.config.batch_window);
                            window_armed = true;
                        }
                        batch.push(request);
                        if batch.len() >= self.config.max_batch {
                            window_armed = false;
                            self.flush(&mut batch).await;
                        }
                    }
                    // every sender is gone; nothing more can arrive
                    None => {
                        self.flush(&mut batch).await;
                        return;
                    }
                },

                _ = &mut window, if window_armed => {
                    window_armed = false;
                    self.flush(&mut batch).await;
                }
            }
        }

        self.drain(&mut batch).await;
        info!(component = "ingest_writer", "writer loop halted");
    }

    /// Keep accepting already-submitted events until a full batch window
    /// passes with no arrivals, so nothing handed to `submit` before stop is
    /// silently dropped, then flush the remainder and halt.
    async fn drain(&mut self, batch: &mut Vec<SubmitRequest>) {
        debug!(component = "ingest_writer", "draining intake");
        let quiet = tokio::time::sleep(self.config.batch_window);
        tokio::pin!(quiet);

        loop {
            tokio::select! {
                received = self.intake.recv() => match received {
                    Some(request) => {
                        batch.push(request);
                        if batch.len() >= self.config.max_batch {
                            self.flush(batch).await;
                        }
                        quiet.as_mut().reset(Instant::now() + self.config.batch_window);
                    }
                    None => break,
                },
                _ = &mut quiet => break,
            }
        }

        self.flush(batch).await;
    }

    async fn flush(&self, batch: &mut Vec<SubmitRequest>) {
        if batch.is_empty() {
            return;
        }
        let requests: Vec<SubmitRequest> = batch.drain(..).collect();
        let events: Vec<Event> = requests.iter().map(|r| r.event.clone()).collect();

        debug!(
            component = "ingest_writer",
            batch_size = events.len(),
            "flushing batch"
        );
        let started = std::time::Instant::now();
        let outcome = timeout(FLUSH_TIMEOUT, self.store.insert_batch(&events)).await;

        histogram!("ingest_batch_size").record(events.len() as f64);
        histogram!("ingest_flush_duration_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(Ok(inserted)) => {
                counter!("ingest_events_inserted_total").increment(inserted.len() as u64);
                counter!("ingest_events_duplicate_total")
                    .increment(events.len().saturating_sub(inserted.len()) as u64);
                for request in requests {
                    let status = if inserted.contains(&request.event.dedup_key) {
                        IngestStatus::Inserted
                    } else {
                        IngestStatus::Duplicate
                    };
                    let _ = request.reply.send(Ok(status));
                }
            }
            Ok(Err(store_err)) => {
                counter!("ingest_flush_failures_total").increment(1);
                error!(
                    component = "ingest_writer",
                    batch_size = events.len(),
                    error = %store_err,
                    "batch insert failed"
                );
                // no per-row attribution once the transaction fails
                let message = store_err.to_string();
                for request in requests {
                    let _ = request.reply.send(Err(SinkError::Internal(message.clone())));
                }
            }
            Err(_elapsed) => {
                counter!("ingest_flush_failures_total").increment(1);
                error!(
                    component = "ingest_writer",
                    batch_size = events.len(),
                    "batch insert timed out"
                );
                for request in requests {
                    let _ = request
                        .reply
                        .send(Err(SinkError::Internal("batch insert timed out".into())));
                }
            }
        }
    }
}
