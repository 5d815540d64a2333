//! Receiver link abstraction and AMQP message conversion

use crate::message::{InboundMessage, MessageBody, MessageId};
use crate::settlement::Disposition;
use crate::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use fe2o3_amqp::types::messaging::{self, Body, Message, Properties};
use fe2o3_amqp::types::primitives::Value;

/// A message paired with the handle needed to settle it
#[derive(Debug)]
pub struct Received<D> {
    /// Converted message
    pub message: InboundMessage,
    /// Settlement handle
    pub delivery: D,
}

/// Source of messages that must each be settled exactly once
#[async_trait]
pub trait MessageLink: Send {
    /// Settlement handle for one delivery
    type Delivery: Send;

    /// Wait for the next message
    ///
    /// Link or session failure is an [`Error::Receive`](crate::Error::Receive).
    async fn receive(&mut self) -> Result<Received<Self::Delivery>>;

    /// Send the disposition for a delivery
    ///
    /// Failure is an [`Error::Settlement`](crate::Error::Settlement).
    async fn settle(&mut self, delivery: Self::Delivery, disposition: Disposition) -> Result<()>;
}

/// Convert a decoded AMQP message
pub fn inbound_message(message: &Message<Body<Value>>) -> InboundMessage {
    let properties = message.properties.as_ref();

    InboundMessage {
        content_type: properties
            .and_then(|p| p.content_type.as_ref())
            .map(|symbol| symbol.0.clone())
            .filter(|content_type| !content_type.is_empty()),
        body: convert_body(&message.body),
        message_id: properties
            .and_then(|p| p.message_id.as_ref())
            .map(convert_message_id),
        creation_time: properties.and_then(creation_time),
    }
}

/// Map an AMQP body section onto the body shapes the translator knows
pub fn convert_body(body: &Body<Value>) -> MessageBody {
    match body {
        Body::Value(messaging::AmqpValue(Value::String(text))) => MessageBody::Text(text.clone()),
        Body::Value(messaging::AmqpValue(Value::Binary(bytes))) => {
            MessageBody::Binary(Bytes::copy_from_slice(bytes))
        }
        Body::Value(messaging::AmqpValue(other)) => MessageBody::Unrecognized {
            section: format!("amqp-value({})", value_kind(other)),
        },
        Body::Data(sections) => {
            let mut buf = BytesMut::new();
            for section in sections.iter() {
                buf.extend_from_slice(&section.0);
            }
            MessageBody::Binary(buf.freeze())
        }
        Body::Sequence(_) => MessageBody::Unrecognized {
            section: "amqp-sequence".to_string(),
        },
        Body::Empty => MessageBody::Unrecognized {
            section: "empty".to_string(),
        },
    }
}

/// Map an AMQP `message-id`
pub fn convert_message_id(id: &messaging::MessageId) -> MessageId {
    match id {
        messaging::MessageId::String(s) => MessageId::String(s.clone()),
        messaging::MessageId::Ulong(n) => MessageId::Ulong(*n),
        messaging::MessageId::Uuid(uuid) => {
            MessageId::Uuid(uuid::Uuid::from_bytes(uuid.clone().into_inner()))
        }
        messaging::MessageId::Binary(bytes) => MessageId::Binary(bytes.to_vec()),
    }
}

fn creation_time(properties: &Properties) -> Option<DateTime<Utc>> {
    let timestamp = properties.creation_time.as_ref()?;
    Utc.timestamp_millis_opt(timestamp.milliseconds()).single()
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Ubyte(_) | Value::Ushort(_) | Value::Uint(_) | Value::Ulong(_) => "unsigned",
        Value::Byte(_) | Value::Short(_) | Value::Int(_) | Value::Long(_) => "integer",
        Value::Float(_) | Value::Double(_) => "floating-point",
        Value::Symbol(_) => "symbol",
        Value::List(_) => "list",
        Value::Map(_) => "map",
        Value::Array(_) => "array",
        _ => "other",
    }
}
