use std::net::SocketAddr;
use std::process::ExitCode;

use envconfig::Envconfig;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use eventgate::config::Config;
use eventgate::server::serve;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("shutting down gracefully...");
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::init_from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = config.validate() {
        eprintln!("invalid configuration: {err}");
        return ExitCode::FAILURE;
    }

    // JSON logs to stdout; RUST_LOG overrides the LOG_LEVEL floor
    let log_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(config.log_level.to_filter().into())
                .from_env_lossy(),
        );
    tracing_subscriber::registry().with(log_layer).init();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "could not bind port");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(port = config.port, "starting eventgate");
    if let Err(err) = serve(config, listener, shutdown()).await {
        tracing::error!(error = format!("{err:#}"), "service failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
