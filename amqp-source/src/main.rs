use amqp_source::{supervisor, Metrics, SourceConfig};
use anyhow::Context;
use prometheus::Registry;
use std::process::ExitCode;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().json().with_env_filter(filter).init();

    match run().await {
        Ok(()) => {
            info!("AMQP source adapter stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "AMQP source adapter terminated");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = SourceConfig::from_env().context("failed to load configuration")?;

    let registry = Registry::new();
    let metrics = Metrics::new(&registry)?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let metrics_server = match config.metrics_bind_addr {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind metrics endpoint on {}", addr))?;
            info!(address = %addr, "📊 Serving metrics on /metrics");
            Some(tokio::spawn(amqp_source::metrics::serve(
                listener,
                metrics.clone(),
                shutdown.clone(),
            )))
        }
        None => None,
    };

    let result = supervisor::run(config, &metrics, shutdown.clone()).await;

    shutdown.cancel();
    if let Some(server) = metrics_server {
        match server.await {
            Ok(Err(e)) => error!(error = %e, "Metrics endpoint stopped"),
            Err(e) => error!(error = %e, "Metrics endpoint task failed"),
            Ok(Ok(())) => {}
        }
    }

    info!(
        received = metrics.received(),
        reconnects = metrics.reconnects(),
        fallbacks = metrics.fallbacks(),
        "Message totals"
    );
    result?;
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
