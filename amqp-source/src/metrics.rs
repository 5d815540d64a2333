//! Prometheus metrics for the AMQP source
//!
//! Collectors are registered on a caller-owned [`Registry`] so each adapter
//! instance (and each test) gets its own set. [`serve`] exposes them in the
//! Prometheus text format on `GET /metrics`.

use crate::error::{DispatchError, Result};
use crate::settlement::Disposition;
use crate::Error;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{
    histogram_opts, opts, Encoder, Histogram, IntCounter, IntCounterVec, Registry, TextEncoder,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Instance-scoped counters and histograms
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    received: IntCounter,
    settled: IntCounterVec,
    dispatch_failures: IntCounterVec,
    fallbacks: IntCounter,
    reconnects: IntCounter,
    dispatch_duration: Histogram,
}

impl Metrics {
    /// Create collectors and register them on `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        let received = IntCounter::with_opts(opts!(
            "amqp_source_messages_received_total",
            "Total messages received from the AMQP link"
        ))
        .map_err(metrics_error)?;

        let settled = IntCounterVec::new(
            opts!(
                "amqp_source_messages_settled_total",
                "Total messages settled, by disposition"
            ),
            &["disposition"],
        )
        .map_err(metrics_error)?;

        let dispatch_failures = IntCounterVec::new(
            opts!(
                "amqp_source_dispatch_failures_total",
                "Total failed event dispatches, by failure kind"
            ),
            &["kind"],
        )
        .map_err(metrics_error)?;

        let fallbacks = IntCounter::with_opts(opts!(
            "amqp_source_body_fallbacks_total",
            "Messages whose body section was not recognized"
        ))
        .map_err(metrics_error)?;

        let reconnects = IntCounter::with_opts(opts!(
            "amqp_source_reconnects_total",
            "Reconnect attempts after a recoverable failure"
        ))
        .map_err(metrics_error)?;

        let dispatch_duration = Histogram::with_opts(histogram_opts!(
            "amqp_source_dispatch_duration_seconds",
            "Event dispatch duration in seconds"
        ))
        .map_err(metrics_error)?;

        registry
            .register(Box::new(received.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(settled.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(dispatch_failures.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(fallbacks.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(reconnects.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(dispatch_duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry: registry.clone(),
            received,
            settled,
            dispatch_failures,
            fallbacks,
            reconnects,
            dispatch_duration,
        })
    }

    /// A message came off the link
    pub fn record_received(&self) {
        self.received.inc();
    }

    /// A disposition was sent
    pub fn record_settled(&self, disposition: Disposition) {
        self.settled.with_label_values(&[disposition.as_str()]).inc();
    }

    /// A dispatch failed
    pub fn record_dispatch_failure(&self, error: &DispatchError) {
        self.dispatch_failures.with_label_values(&[error.kind()]).inc();
    }

    /// A body fell back to the placeholder payload
    pub fn record_fallback(&self) {
        self.fallbacks.inc();
    }

    /// A reconnect was attempted
    pub fn record_reconnect(&self) {
        self.reconnects.inc();
    }

    /// Time spent on one dispatch
    pub fn observe_dispatch(&self, elapsed: Duration) {
        self.dispatch_duration.observe(elapsed.as_secs_f64());
    }

    /// Messages received so far
    pub fn received(&self) -> u64 {
        self.received.get()
    }

    /// Messages settled with `disposition` so far
    pub fn settled(&self, disposition: Disposition) -> u64 {
        self.settled.with_label_values(&[disposition.as_str()]).get()
    }

    /// Dispatch failures of `kind` so far
    pub fn dispatch_failures(&self, kind: &str) -> u64 {
        self.dispatch_failures.with_label_values(&[kind]).get()
    }

    /// Fallbacks so far
    pub fn fallbacks(&self) -> u64 {
        self.fallbacks.get()
    }

    /// Reconnect attempts so far
    pub fn reconnects(&self) -> u64 {
        self.reconnects.get()
    }

    /// Dispatches observed by the latency histogram
    pub fn dispatches_timed(&self) -> u64 {
        self.dispatch_duration.get_sample_count()
    }

    /// Everything on the registry in the Prometheus text format
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| Error::Metrics(format!("encoding failed: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| Error::Metrics(format!("invalid exposition: {}", e)))
    }
}

/// Serve `GET /metrics` on `listener` until `shutdown` fires
pub async fn serve(
    listener: TcpListener,
    metrics: Metrics,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Metrics(format!("metrics endpoint failed: {}", e)))
}

async fn metrics_handler(State(metrics): State<Metrics>) -> Response {
    match metrics.export() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to export metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn metrics_error(err: prometheus::Error) -> Error {
    Error::Config(format!("metrics registration failed: {}", err))
}
