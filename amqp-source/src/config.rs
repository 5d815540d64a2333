//! Adapter configuration
//!
//! Values are layered as defaults, then an optional file named by
//! `AMQP_SOURCE_CONFIG_FILE`, then `AMQP_*` environment variables
//! (`AMQP_SOURCE_URI`, `AMQP_SINK_URI`, `AMQP_CREDIT`, ...).

use crate::{Error, Result};
use config::{Environment, File};
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

/// What the receiver loop does after rejecting a message it failed to dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Terminate the instance on the first dispatch failure
    #[default]
    FailFast,
    /// Log the failure and keep receiving
    RejectAndContinue,
}

/// Startup configuration, immutable for the lifetime of the process
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// AMQP address: `amqp[s]://[user:pass@]host[:port]/queue`
    pub source_uri: String,

    /// HTTP(S) endpoint receiving the events
    pub sink_uri: String,

    /// Receiver credit (prefetch) window
    pub credit: u32,

    /// Skip TLS certificate chain and hostname validation
    pub insecure_tls_connection: bool,

    /// PEM bundle replacing the default trust store
    pub root_ca: Option<String>,

    /// AMQP container id; falls back to `$HOSTNAME`
    pub container_id: Option<String>,

    /// Behavior after a dispatch failure
    pub failure_policy: FailurePolicy,

    /// Deadline for the TCP/TLS dial and AMQP attach
    pub dial_timeout_secs: u64,

    /// Deadline for one POST to the sink
    pub dispatch_timeout_secs: u64,

    /// Reconnect if no message arrives within this window
    pub receive_timeout_secs: Option<u64>,

    /// First reconnect delay
    pub reconnect_initial_interval_ms: u64,

    /// Upper bound for a single reconnect delay
    pub reconnect_max_interval_secs: u64,

    /// Give up reconnecting once an outage has lasted this long
    pub reconnect_max_elapsed_secs: u64,

    /// Serve Prometheus metrics on `GET /metrics` at this address
    pub metrics_bind_addr: Option<SocketAddr>,
}

impl SourceConfig {
    /// Config with defaults for everything but the two addresses
    pub fn new(source_uri: impl Into<String>, sink_uri: impl Into<String>) -> Self {
        Self {
            source_uri: source_uri.into(),
            sink_uri: sink_uri.into(),
            credit: crate::DEFAULT_CREDIT,
            insecure_tls_connection: false,
            root_ca: None,
            container_id: None,
            failure_policy: FailurePolicy::default(),
            dial_timeout_secs: crate::DEFAULT_DIAL_TIMEOUT_SECONDS,
            dispatch_timeout_secs: crate::DEFAULT_DISPATCH_TIMEOUT_SECONDS,
            receive_timeout_secs: None,
            reconnect_initial_interval_ms: 500,
            reconnect_max_interval_secs: 30,
            reconnect_max_elapsed_secs: 300,
            metrics_bind_addr: None,
        }
    }

    /// Load from `AMQP_*` environment variables and an optional config file
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::defaults()?;

        if let Ok(config_file) = env::var("AMQP_SOURCE_CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        }

        builder = builder.add_source(Environment::with_prefix("AMQP").try_parsing(true));

        Self::from_settings(builder.build()?)
    }

    /// Deserialize and validate already-layered settings
    pub fn from_settings(settings: config::Config) -> Result<Self> {
        let config: Self = settings.try_deserialize()?;
        config.validate()
    }

    /// Builder pre-populated with every default
    pub fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let builder = config::Config::builder()
            .set_default("credit", crate::DEFAULT_CREDIT)?
            .set_default("insecure_tls_connection", false)?
            .set_default("failure_policy", "fail_fast")?
            .set_default("dial_timeout_secs", crate::DEFAULT_DIAL_TIMEOUT_SECONDS)?
            .set_default(
                "dispatch_timeout_secs",
                crate::DEFAULT_DISPATCH_TIMEOUT_SECONDS,
            )?
            .set_default("reconnect_initial_interval_ms", 500)?
            .set_default("reconnect_max_interval_secs", 30)?
            .set_default("reconnect_max_elapsed_secs", 300)?;
        Ok(builder)
    }

    /// Check limits and the sink address; normalizes blank optional strings
    pub fn validate(mut self) -> Result<Self> {
        if self.credit == 0 {
            return Err(Error::Config("credit must be a positive integer".to_string()));
        }
        if self.dial_timeout_secs == 0 || self.dispatch_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be greater than zero".to_string()));
        }
        if self.receive_timeout_secs == Some(0) {
            return Err(Error::Config(
                "receive_timeout_secs must be greater than zero when set".to_string(),
            ));
        }

        let sink = Url::parse(&self.sink_uri)
            .map_err(|e| Error::Config(format!("invalid sink URI {}: {}", self.sink_uri, e)))?;
        if !matches!(sink.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "sink URI must be http or https, got {}",
                sink.scheme()
            )));
        }

        self.root_ca = self.root_ca.filter(|pem| !pem.trim().is_empty());
        self.container_id = self.container_id.filter(|id| !id.trim().is_empty());
        Ok(self)
    }

    /// Custom trust material, if any
    pub fn root_ca(&self) -> Option<&str> {
        self.root_ca.as_deref()
    }

    /// AMQP container id: configured value, `$HOSTNAME`, or a generated one
    pub fn container_id(&self) -> String {
        self.container_id
            .clone()
            .or_else(|| env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| format!("amqp-source-{}", uuid::Uuid::new_v4()))
    }

    /// Dial deadline
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    /// POST deadline
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    /// Receive deadline, if enabled
    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout_secs.map(Duration::from_secs)
    }
}
