use anyhow::{Result, anyhow};
use std::sync::Arc;
use tokio::signal;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use throttr_server::config::Config;
use throttr_server::metrics::Metrics;
use throttr_server::transport::{Transport, http::HttpTransport, native::NativeTransport};
use throttr_server::{store, sweeper};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from CLI arguments, environment and config file
    let config = Config::from_env_and_args()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("throttr={}", config.log_level).parse()?),
        )
        .init();

    let engine = store::create_engine(&config.store);
    let metrics = Arc::new(Metrics::new());
    let shutdown = CancellationToken::new();

    let sweeper = sweeper::spawn(
        Arc::clone(&engine),
        Arc::clone(&metrics),
        config.store.sweep_interval,
        shutdown.child_token(),
    );

    // Create a set to manage the transport tasks
    let mut transport_tasks = JoinSet::new();

    // Bind before spawning so address errors stop startup
    let native = NativeTransport::bind(
        &config.transports.native.addr(),
        config.idle_connection_timeout,
        Arc::clone(&metrics),
    )
    .await?;
    {
        let engine = Arc::clone(&engine);
        let token = shutdown.child_token();
        transport_tasks.spawn(async move { native.start(engine, token).await });
    }

    if let Some(http_config) = &config.transports.http {
        let http = HttpTransport::bind(&http_config.addr(), Arc::clone(&metrics)).await?;
        let engine = Arc::clone(&engine);
        let token = shutdown.child_token();
        transport_tasks.spawn(async move { http.start(engine, token).await });
    }

    info!(
        shards = engine.store().shard_count(),
        max_keys = config.store.max_keys,
        max_key_length = config.store.max_key_length,
        ttl_unit = %config.store.ttl_unit,
        "Throttr server started"
    );

    // Run until a signal arrives or a transport fails
    let mut result = Ok(());
    tokio::select! {
        _ = shutdown_signal() => {}
        Some(joined) = transport_tasks.join_next() => {
            result = flatten(joined);
            match &result {
                Ok(()) => warn!("Transport stopped unexpectedly"),
                Err(e) => error!(error = %e, "Transport task failed"),
            }
        }
    }

    shutdown.cancel();

    let drain = async {
        while let Some(joined) = transport_tasks.join_next().await {
            if let Err(e) = flatten(joined) {
                error!(error = %e, "Transport failed during shutdown");
            }
        }
        if let Err(e) = sweeper.await {
            error!(error = %e, "Sweeper task panicked");
        }
    };

    if tokio::time::timeout(config.shutdown_timeout, drain)
        .await
        .is_err()
    {
        warn!(
            timeout_secs = config.shutdown_timeout.as_secs(),
            "Shutdown timed out, aborting remaining tasks"
        );
        transport_tasks.abort_all();
    }

    info!(keys = engine.key_count(), "Throttr server stopped");
    result
}

fn flatten(joined: Result<Result<()>, JoinError>) -> Result<()> {
    joined.map_err(|e| anyhow!("Transport task panicked: {e}"))?
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
