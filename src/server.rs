use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::db;
use crate::router;
use crate::sinks::{EventSink, PrintSink, SingleWriter, WriterConfig};
use crate::store::{PgEventStore, PgMetricsStore};
use crate::time::SystemTime;

/// Budget for draining the writer once HTTP intake has closed.
const WRITER_STOP_DEADLINE: Duration = Duration::from_secs(5);

/// Wire everything up and serve until `shutdown` resolves, then tear down
/// in order: HTTP intake first, then the writer, then the pool.
pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let pool = db::connect(&config)
        .await
        .context("failed to connect to database")?;
    let healthcheck = db::spawn_healthcheck(
        pool.clone(),
        config.db_healthcheck_period.duration(),
    );

    let event_store = Arc::new(PgEventStore::new(pool.clone()));
    let metrics_store = PgMetricsStore::new(pool.clone());

    let sink: Arc<dyn EventSink + Send + Sync> = if config.print_sink {
        // local debug only; nothing reaches the events table via /events
        info!("using print sink");
        Arc::new(PrintSink {})
    } else {
        Arc::new(SingleWriter::new(
            event_store.clone(),
            WriterConfig {
                batch_window: config.writer_batch_window.duration(),
                max_batch: config.writer_max_batch,
                queue_size: config.writer_queue_size,
            },
        ))
    };
    sink.start();

    let app = router::router(
        SystemTime {},
        sink.clone(),
        event_store,
        metrics_store,
        config.request_timeout.duration(),
    );

    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    // intake is closed; drain what was already accepted
    if let Err(stop_err) = sink.stop(WRITER_STOP_DEADLINE).await {
        error!(component = "shutdown", error = %stop_err, "writer stop failed");
    }
    healthcheck.abort();
    pool.close().await;

    Ok(())
}
