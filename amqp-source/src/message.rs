//! Inbound AMQP message, reduced to what the translator needs

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// AMQP `message-id`, one of the four admissible wire types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageId {
    /// `string`
    String(String),
    /// `ulong`
    Ulong(u64),
    /// `uuid`
    Uuid(uuid::Uuid),
    /// `binary`
    Binary(Vec<u8>),
}

/// Body shape of an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// `amqp-value` holding a string
    Text(String),
    /// `data` section(s), or `amqp-value` holding binary
    Binary(Bytes),
    /// Any other section (`amqp-sequence`, other `amqp-value` types, no body)
    Unrecognized {
        /// Short description of what was received, for logs
        section: String,
    },
}

impl MessageBody {
    /// Whether the translator will fall back to the placeholder payload
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, MessageBody::Unrecognized { .. })
    }

    /// Section name used in logs
    pub fn describe(&self) -> &str {
        match self {
            MessageBody::Text(_) => "text",
            MessageBody::Binary(_) => "binary",
            MessageBody::Unrecognized { section } => section,
        }
    }
}

/// Message pulled off the receiver link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Declared `content-type`; empty strings are stored as `None`
    pub content_type: Option<String>,

    /// Body
    pub body: MessageBody,

    /// `message-id`
    pub message_id: Option<MessageId>,

    /// `creation-time`
    pub creation_time: Option<DateTime<Utc>>,
}

impl InboundMessage {
    /// Create a message with just a body
    pub fn new(body: MessageBody) -> Self {
        Self {
            content_type: None,
            body,
            message_id: None,
            creation_time: None,
        }
    }

    /// Text body
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(MessageBody::Text(text.into()))
    }

    /// Binary body
    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Self::new(MessageBody::Binary(bytes.into()))
    }

    /// Set declared content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        let content_type = content_type.into();
        self.content_type = (!content_type.is_empty()).then_some(content_type);
        self
    }

    /// Set message id
    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// Set creation time
    pub fn with_creation_time(mut self, creation_time: DateTime<Utc>) -> Self {
        self.creation_time = Some(creation_time);
        self
    }
}
