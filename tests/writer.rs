use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use eventgate::api::IngestStatus;
use eventgate::sinks::{EventSink, SingleWriter, SinkError, WriterConfig};
use eventgate::store::EventBatchStore;

mod common;
use common::*;

fn writer_with(
    store: Arc<MemoryEventStore>,
    max_batch: usize,
    queue_size: usize,
) -> Arc<SingleWriter> {
    Arc::new(SingleWriter::new(
        store as Arc<dyn EventBatchStore + Send + Sync>,
        WriterConfig {
            batch_window: Duration::from_millis(5),
            max_batch,
            queue_size,
        },
    ))
}

#[tokio::test]
async fn reports_inserted_then_duplicate() -> Result<()> {
    let store = MemoryEventStore::new();
    let writer = writer_with(store.clone(), 64, 128);
    writer.start();

    let event = sample_event("u1", BASE_UNIX);
    let status = writer
        .submit(event.clone(), CancellationToken::new())
        .await?;
    assert_eq!(status, IngestStatus::Inserted);

    let status = writer.submit(event, CancellationToken::new()).await?;
    assert_eq!(status, IngestStatus::Duplicate);

    assert_eq!(store.rows().len(), 1);
    writer.stop(Duration::from_secs(1)).await?;
    Ok(())
}

#[tokio::test]
async fn concurrent_submitters_all_get_outcomes() -> Result<()> {
    let store = MemoryEventStore::new();
    let writer = writer_with(store.clone(), 50, 10_000);
    writer.start();

    let producers = 20;
    let per_producer = 50;

    let mut handles = Vec::new();
    for p in 0..producers {
        let writer = writer.clone();
        handles.push(tokio::spawn(async move {
            let mut statuses = Vec::new();
            for i in 0..per_producer {
                let event = sample_event(&format!("u{p}-{i}"), BASE_UNIX);
                statuses.push(writer.submit(event, CancellationToken::new()).await);
            }
            statuses
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        for status in handle.await? {
            assert_eq!(status?, IngestStatus::Inserted);
            inserted += 1;
        }
    }
    assert_eq!(inserted, producers * per_producer);
    assert_eq!(store.rows().len(), producers * per_producer);

    // the coalescer never exceeds its configured batch size
    assert!(store.batch_sizes().iter().all(|&size| size <= 50));

    writer.stop(Duration::from_secs(10)).await?;
    let stopped = writer
        .submit(sample_event("late", BASE_UNIX), CancellationToken::new())
        .await;
    assert_eq!(stopped, Err(SinkError::Stopped));
    Ok(())
}

#[tokio::test]
async fn stop_drains_pending_submissions() -> Result<()> {
    // a slow store keeps the writer busy so later submissions pile up in
    // the queue before stop begins
    let store = MemoryEventStore::with_delay(Duration::from_millis(100));
    let writer = writer_with(store.clone(), 4, 128);
    writer.start();

    let mut handles = Vec::new();
    for i in 0..12 {
        let writer = writer.clone();
        handles.push(tokio::spawn(async move {
            writer
                .submit(sample_event(&format!("u{i}"), BASE_UNIX), CancellationToken::new())
                .await
        }));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    writer.stop(Duration::from_secs(5)).await?;

    for handle in handles {
        let status = handle.await??;
        assert_eq!(status, IngestStatus::Inserted);
    }
    assert_eq!(store.rows().len(), 12);
    Ok(())
}

#[tokio::test]
async fn pre_enqueue_cancellation_never_persists() -> Result<()> {
    let store = MemoryEventStore::new();
    // writer deliberately not started: the queue (capacity 1) fills and the
    // second submit blocks on backpressure
    let writer = writer_with(store.clone(), 4, 1);

    let first = {
        let writer = writer.clone();
        tokio::spawn(async move {
            writer
                .submit(sample_event("u1", BASE_UNIX), CancellationToken::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let cancel = CancellationToken::new();
    let blocked = {
        let writer = writer.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { writer.submit(sample_event("u2", BASE_UNIX), cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    cancel.cancel();
    assert_eq!(blocked.await?, Err(SinkError::Cancelled));
    assert!(store.rows().is_empty());

    first.abort();
    Ok(())
}

#[tokio::test]
async fn post_enqueue_cancellation_may_still_commit() -> Result<()> {
    let store = MemoryEventStore::with_delay(Duration::from_millis(200));
    let writer = writer_with(store.clone(), 4, 128);
    writer.start();

    let event = sample_event("u1", BASE_UNIX);
    let dedup_key = event.dedup_key.clone();
    let cancel = CancellationToken::new();

    let submit = {
        let writer = writer.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { writer.submit(event, cancel).await })
    };

    // cancel while the flush is already in flight
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    assert_eq!(submit.await?, Err(SinkError::Cancelled));

    // the write still completes; at-most-once is preserved, reporting is not
    tokio::time::sleep(Duration::from_millis(300)).await;
    let rows = store.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].dedup_key, dedup_key);

    writer.stop(Duration::from_secs(1)).await?;
    Ok(())
}

#[tokio::test]
async fn store_failure_fans_out_to_every_submitter() -> Result<()> {
    let store = MemoryEventStore::new();
    store.set_fail(true);
    let writer = writer_with(store.clone(), 8, 128);
    writer.start();

    let mut handles = Vec::new();
    for i in 0..6 {
        let writer = writer.clone();
        handles.push(tokio::spawn(async move {
            writer
                .submit(sample_event(&format!("u{i}"), BASE_UNIX), CancellationToken::new())
                .await
        }));
    }

    for handle in handles {
        let outcome = handle.await?;
        assert!(matches!(outcome, Err(SinkError::Internal(_))));
    }
    assert!(store.rows().is_empty());

    writer.stop(Duration::from_secs(1)).await?;
    Ok(())
}

#[tokio::test]
async fn start_and_stop_are_idempotent() -> Result<()> {
    let store = MemoryEventStore::new();
    let writer = writer_with(store.clone(), 8, 128);
    writer.start();
    writer.start();

    let status = writer
        .submit(sample_event("u1", BASE_UNIX), CancellationToken::new())
        .await?;
    assert_eq!(status, IngestStatus::Inserted);

    writer.stop(Duration::from_secs(1)).await?;
    writer.stop(Duration::from_secs(1)).await?;
    Ok(())
}

#[tokio::test]
async fn stop_deadline_elapses_with_hung_store() -> Result<()> {
    let store = MemoryEventStore::with_delay(Duration::from_secs(10));
    let writer = writer_with(store.clone(), 4, 128);
    writer.start();

    let submit = {
        let writer = writer.clone();
        tokio::spawn(async move {
            writer
                .submit(sample_event("u1", BASE_UNIX), CancellationToken::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stopped = writer.stop(Duration::from_millis(100)).await;
    assert!(matches!(stopped, Err(SinkError::Internal(_))));

    // the writer is still mid-flush; a retried stop must not report a halt
    // that has not happened
    let retried = writer.stop(Duration::from_millis(100)).await;
    assert!(matches!(retried, Err(SinkError::Internal(_))));

    submit.abort();
    Ok(())
}

#[tokio::test]
async fn stop_before_start_is_clean() -> Result<()> {
    let store = MemoryEventStore::new();
    let writer = writer_with(store.clone(), 4, 128);

    writer.stop(Duration::from_millis(100)).await?;

    // stopping pre-empts a later start; nothing runs, nothing is accepted
    writer.start();
    let rejected = writer
        .submit(sample_event("u1", BASE_UNIX), CancellationToken::new())
        .await;
    assert_eq!(rejected, Err(SinkError::Stopped));
    assert!(store.rows().is_empty());

    writer.stop(Duration::from_millis(100)).await?;
    Ok(())
}
