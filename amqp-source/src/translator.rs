//! Message translator
//!
//! Turns an [`InboundMessage`] into an [`Event`]. Translation never fails:
//! body sections it does not understand degrade to a placeholder payload
//! with [`FALLBACK_CONTENT_TYPE`].

use crate::address::SpecSource;
use crate::body::{BodyReader, Payload};
use crate::event::{Event, EventEnvelope};
use crate::message::{InboundMessage, MessageBody, MessageId};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use tracing::{debug, warn};

/// Content type for string bodies
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Content type for binary bodies that declare none
pub const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type marking an unrecognized body
pub const FALLBACK_CONTENT_TYPE: &str = "application/x-amqp-unrecognized-body";

/// Payload sent in place of an unrecognized body
pub const FALLBACK_PAYLOAD: &str = "unrecognized AMQP body section";

/// Builds events for one source
#[derive(Debug, Clone)]
pub struct Translator {
    source: SpecSource,
}

impl Translator {
    /// Translator stamping `source` on every event
    pub fn new(source: SpecSource) -> Self {
        Self { source }
    }

    /// Event source
    pub fn source(&self) -> &SpecSource {
        &self.source
    }

    /// Map a message onto an envelope and payload
    pub fn translate(&self, message: InboundMessage) -> Event {
        let id = coerce_message_id(message.message_id.as_ref());

        let (content_type, payload) = match message.body {
            MessageBody::Text(text) => (
                TEXT_CONTENT_TYPE.to_string(),
                Payload::Streamed(BodyReader::new(text)),
            ),
            MessageBody::Binary(bytes) => match message.content_type {
                Some(declared) => (declared, Payload::Materialized(bytes)),
                None => (
                    OCTET_STREAM_CONTENT_TYPE.to_string(),
                    Payload::Streamed(BodyReader::new(bytes)),
                ),
            },
            MessageBody::Unrecognized { section } => {
                warn!(
                    message_id = %id,
                    section = %section,
                    "Unrecognized AMQP body, sending placeholder payload"
                );
                (
                    FALLBACK_CONTENT_TYPE.to_string(),
                    Payload::Streamed(BodyReader::new(Bytes::from_static(
                        FALLBACK_PAYLOAD.as_bytes(),
                    ))),
                )
            }
        };

        debug!(
            message_id = %id,
            content_type = %content_type,
            streamed = payload.is_streamed(),
            size = payload.len(),
            "Translated message"
        );

        let mut envelope = EventEnvelope::new(self.source.clone(), id, content_type);
        envelope.time = message.creation_time;

        Event { envelope, payload }
    }
}

/// String form of an AMQP message id; absent ids become `""`
pub fn coerce_message_id(message_id: Option<&MessageId>) -> String {
    match message_id {
        Some(MessageId::String(id)) => id.clone(),
        Some(MessageId::Ulong(id)) => id.to_string(),
        Some(MessageId::Uuid(id)) => id.hyphenated().to_string(),
        Some(MessageId::Binary(id)) => STANDARD.encode(id),
        None => String::new(),
    }
}
