//! # AMQP Source Adapter
//!
//! Bridges an AMQP 1.0 queue or topic to an HTTP event sink:
//! - One receiver link with a bounded credit window
//! - Messages translated to events in HTTP binary content mode
//! - Accept on 2xx, reject on any dispatch failure
//! - Reconnect with exponential backoff on link or connection loss
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  AMQP 1.0   ┌────────────────────────────────────┐
//! │    Broker    │────────────▶│ Connector (TCP / TLS, SASL, link)  │
//! └──────▲───────┘             └─────────────────┬──────────────────┘
//!        │ accept / reject                       │ InboundMessage
//!        │                     ┌─────────────────▼──────────────────┐
//!        └─────────────────────│ ReceiverLoop                       │
//!                              │   Translator → EventSink → settle  │
//!                              └─────────────────┬──────────────────┘
//!                                                │ HTTP POST
//!                                         ┌──────▼──────┐
//!                                         │  Event sink │
//!                                         └─────────────┘
//! ```
//!
//! [`supervisor::run`] wires everything together for the binary.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod address;
pub mod body;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod link;
pub mod message;
pub mod metrics;
pub mod receiver;
pub mod settlement;
pub mod supervisor;
pub mod tls;
pub mod translator;

#[cfg(test)]
mod test_support;

pub use address::{SourceAddress, SpecSource};
pub use config::{FailurePolicy, SourceConfig};
pub use connection::{ConnectionHandle, Connector, LinkFactory};
pub use dispatcher::{DispatchReceipt, EventSink, HttpDispatcher};
pub use error::{DispatchError, Error, Result};
pub use event::{Event, EventEnvelope};
pub use link::{MessageLink, Received};
pub use message::{InboundMessage, MessageBody, MessageId};
pub use metrics::Metrics;
pub use receiver::ReceiverLoop;
pub use settlement::Disposition;
pub use translator::Translator;

/// Default receiver credit window
pub const DEFAULT_CREDIT: u32 = 10;

/// Default dial deadline in seconds
pub const DEFAULT_DIAL_TIMEOUT_SECONDS: u64 = 30;

/// Default dispatch deadline in seconds
pub const DEFAULT_DISPATCH_TIMEOUT_SECONDS: u64 = 30;
