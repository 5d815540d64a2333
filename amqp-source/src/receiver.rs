//! Receiver loop
//!
//! Takes one message at a time off a [`MessageLink`], translates it, hands
//! the event to an [`EventSink`] and settles the delivery before asking for
//! the next one.

use crate::config::FailurePolicy;
use crate::dispatcher::EventSink;
use crate::error::DispatchError;
use crate::link::{MessageLink, Received};
use crate::metrics::Metrics;
use crate::settlement::Disposition;
use crate::translator::Translator;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drives translate → dispatch → settle for a single link
pub struct ReceiverLoop<S> {
    translator: Translator,
    sink: Arc<S>,
    metrics: Metrics,
    policy: FailurePolicy,
    receive_timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl<S> ReceiverLoop<S>
where
    S: EventSink,
{
    /// Create a loop; `shutdown` is observed while waiting for messages
    pub fn new(
        translator: Translator,
        sink: Arc<S>,
        metrics: Metrics,
        policy: FailurePolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            translator,
            sink,
            metrics,
            policy,
            receive_timeout: None,
            shutdown,
        }
    }

    /// Fail with a receive error if no message arrives within `timeout`
    pub fn with_receive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Process messages until cancelled or a failure ends the loop
    ///
    /// Returns `Ok(())` only on cancellation.
    pub async fn run<L: MessageLink>(&self, link: &mut L) -> Result<()> {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Receiver loop cancelled");
                    return Ok(());
                }
                received = self.next(link) => received?,
            };

            self.process(link, received).await?;
        }
    }

    async fn next<L: MessageLink>(&self, link: &mut L) -> Result<Received<L::Delivery>> {
        match self.receive_timeout {
            Some(timeout) => tokio::time::timeout(timeout, link.receive())
                .await
                .map_err(|_| Error::Receive(format!("no message received within {:?}", timeout)))?,
            None => link.receive().await,
        }
    }

    /// Handle one delivery end to end and return the disposition sent
    pub async fn process<L: MessageLink>(
        &self,
        link: &mut L,
        received: Received<L::Delivery>,
    ) -> Result<Disposition> {
        let Received { message, delivery } = received;
        self.metrics.record_received();
        if message.body.is_unrecognized() {
            self.metrics.record_fallback();
        }

        let event = self.translator.translate(message);
        let event_id = event.envelope.id.clone();

        let start = Instant::now();
        let outcome = self.sink.dispatch(event).await;
        self.metrics.observe_dispatch(start.elapsed());

        let disposition = Disposition::for_outcome(&outcome);
        let settled = link.settle(delivery, disposition).await;
        if settled.is_ok() {
            self.metrics.record_settled(disposition);
        }

        match outcome {
            Ok(receipt) => {
                settled?;
                debug!(
                    message_id = %event_id,
                    status = receipt.status.as_u16(),
                    "Message accepted"
                );
                Ok(disposition)
            }
            Err(e) => {
                self.metrics.record_dispatch_failure(&e);
                self.on_dispatch_failure(&event_id, e, settled)?;
                Ok(disposition)
            }
        }
    }

    fn on_dispatch_failure(
        &self,
        event_id: &str,
        err: DispatchError,
        settled: Result<()>,
    ) -> Result<()> {
        match self.policy {
            FailurePolicy::FailFast => {
                if let Err(settle_err) = settled {
                    warn!(message_id = %event_id, error = %settle_err, "Failed to reject message");
                }
                error!(message_id = %event_id, error = %err, "Dispatch failed, message rejected");
                Err(Error::Dispatch(err))
            }
            FailurePolicy::RejectAndContinue => {
                warn!(message_id = %event_id, error = %err, "Dispatch failed, message rejected");
                settled
            }
        }
    }
}
