//! Instance supervisor
//!
//! Owns the connect → receive cycle. Recoverable failures tear the link down
//! and reconnect with exponential backoff; anything else ends the instance.

use crate::address::SourceAddress;
use crate::config::SourceConfig;
use crate::connection::{Connector, LinkFactory};
use crate::dispatcher::{EventSink, HttpDispatcher};
use crate::metrics::Metrics;
use crate::receiver::ReceiverLoop;
use crate::translator::Translator;
use crate::{Error, Result};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run one adapter instance until cancelled or a fatal error
///
/// Configuration is validated and the event source computed before any
/// network I/O.
pub async fn run(config: SourceConfig, metrics: &Metrics, shutdown: CancellationToken) -> Result<()> {
    let config = config.validate()?;
    let address = SourceAddress::parse(&config.source_uri)?;
    let source = address.spec_source();

    info!(
        source = %source,
        sink = %config.sink_uri,
        credit = config.credit,
        failure_policy = ?config.failure_policy,
        "🚀 Starting AMQP source adapter"
    );

    let connector = Connector::new(&config, address)?;
    let dispatcher = Arc::new(HttpDispatcher::new(&config)?);
    let receiver = ReceiverLoop::new(
        Translator::new(source),
        dispatcher,
        metrics.clone(),
        config.failure_policy,
        shutdown.clone(),
    )
    .with_receive_timeout(config.receive_timeout());

    supervise(
        &connector,
        &receiver,
        reconnect_backoff(&config),
        metrics,
        &shutdown,
    )
    .await
}

/// Reconnect schedule derived from configuration
pub fn reconnect_backoff(config: &SourceConfig) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(config.reconnect_initial_interval_ms))
        .with_max_interval(Duration::from_secs(config.reconnect_max_interval_secs))
        .with_max_elapsed_time(Some(Duration::from_secs(config.reconnect_max_elapsed_secs)))
        .build()
}

/// Connect, run the receiver loop, and reconnect on recoverable failures
///
/// The backoff restarts whenever a link that attached successfully fails, so
/// its elapsed-time limit bounds one outage, not the life of a link. Returns
/// `Ok(())` when `shutdown` fires.
pub async fn supervise<F, S>(
    factory: &F,
    receiver: &ReceiverLoop<S>,
    mut backoff: ExponentialBackoff,
    metrics: &Metrics,
    shutdown: &CancellationToken,
) -> Result<()>
where
    F: LinkFactory,
    S: EventSink,
{
    let mut attempts: u32 = 0;

    loop {
        let connected = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            connected = factory.connect() => connected,
        };

        let err = match connected {
            Ok(mut link) => {
                let result = receiver.run(&mut link).await;
                factory.release(link).await;
                match result {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        // The outage starts when an attached link fails, not at attach.
                        backoff.reset();
                        attempts = 0;
                        e
                    }
                }
            }
            Err(e) => e,
        };

        if !err.is_recoverable() {
            error!(error = %err, "Fatal error, stopping");
            return Err(err);
        }

        attempts += 1;
        let Some(delay) = backoff.next_backoff() else {
            error!(attempts, error = %err, "Giving up reconnecting");
            return Err(Error::ReconnectExhausted {
                attempts,
                last_error: err.to_string(),
            });
        };

        warn!(
            attempt = attempts,
            delay = ?delay,
            error = %err,
            "Connection lost, reconnecting"
        );
        metrics.record_reconnect();

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
