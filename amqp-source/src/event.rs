//! Outbound event envelope and its HTTP binary-mode headers

use crate::address::SpecSource;
use crate::body::Payload;
use crate::error::DispatchError;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Event format version stamped on every event
pub const SPEC_VERSION: &str = "1.0";

/// Event type for every message delivered by this adapter
pub const EVENT_TYPE: &str = "amqp.message.delivery";

/// `ce-specversion`
pub const HEADER_SPEC_VERSION: &str = "ce-specversion";
/// `ce-id`
pub const HEADER_ID: &str = "ce-id";
/// `ce-type`
pub const HEADER_TYPE: &str = "ce-type";
/// `ce-source`
pub const HEADER_SOURCE: &str = "ce-source";
/// `ce-time`
pub const HEADER_TIME: &str = "ce-time";
/// `content-type`
pub const HEADER_CONTENT_TYPE: &str = "content-type";

/// Event attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Format version
    pub spec_version: &'static str,

    /// Event type
    pub event_type: &'static str,

    /// Coerced AMQP message id (may be empty)
    pub id: String,

    /// AMQP creation time
    pub time: Option<DateTime<Utc>>,

    /// Instance source
    pub source: SpecSource,

    /// Resolved payload content type
    pub content_type: String,
}

impl EventEnvelope {
    /// Envelope with the fixed version and type
    pub fn new(source: SpecSource, id: String, content_type: impl Into<String>) -> Self {
        Self {
            spec_version: SPEC_VERSION,
            event_type: EVENT_TYPE,
            id,
            time: None,
            source,
            content_type: content_type.into(),
        }
    }

    /// `ce-time` value, RFC 3339 in UTC
    pub fn time_header(&self) -> Option<String> {
        self.time.map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    /// Request headers for the binary content mode
    pub fn headers(&self) -> Result<HeaderMap, DispatchError> {
        let mut headers = HeaderMap::new();
        insert(&mut headers, HEADER_SPEC_VERSION, self.spec_version)?;
        insert(&mut headers, HEADER_ID, &self.id)?;
        insert(&mut headers, HEADER_TYPE, self.event_type)?;
        insert(&mut headers, HEADER_SOURCE, self.source.as_str())?;
        if let Some(time) = self.time_header() {
            insert(&mut headers, HEADER_TIME, &time)?;
        }
        insert(&mut headers, HEADER_CONTENT_TYPE, &self.content_type)?;

        Ok(headers)
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), DispatchError> {
    let value = HeaderValue::from_str(value).map_err(|e| DispatchError::InvalidAttribute {
        name,
        reason: e.to_string(),
    })?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

/// Envelope plus payload, ready for dispatch
#[derive(Debug, Clone)]
pub struct Event {
    /// Attributes
    pub envelope: EventEnvelope,
    /// Body
    pub payload: Payload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::SourceAddress;
    use chrono::TimeZone;

    fn source() -> SpecSource {
        SourceAddress::parse("amqp://broker:5672/queue1")
            .unwrap()
            .spec_source()
    }

    #[test]
    fn test_headers() {
        let mut envelope = EventEnvelope::new(source(), "42".to_string(), "text/plain");
        envelope.time = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());

        let headers = envelope.headers().unwrap();
        assert_eq!(headers["ce-specversion"], "1.0");
        assert_eq!(headers["ce-id"], "42");
        assert_eq!(headers["ce-type"], "amqp.message.delivery");
        assert_eq!(headers["ce-source"], "amqp://broker:5672/queue1");
        assert_eq!(headers["ce-time"], "2024-03-01T12:30:00Z");
        assert_eq!(headers["content-type"], "text/plain");
    }

    #[test]
    fn test_time_omitted_when_absent() {
        let envelope = EventEnvelope::new(source(), String::new(), "application/octet-stream");
        let headers = envelope.headers().unwrap();
        assert!(!headers.contains_key("ce-time"));
        assert_eq!(headers["ce-id"], "");
    }

    #[test]
    fn test_unencodable_attribute() {
        let envelope = EventEnvelope::new(source(), "line\nbreak".to_string(), "text/plain");
        let err = envelope.headers().unwrap_err();
        assert!(matches!(
            err,
            DispatchError::InvalidAttribute { name: "ce-id", .. }
        ));

        let envelope = EventEnvelope::new(source(), "1".to_string(), "text/\u{0}plain");
        assert!(envelope.headers().is_err());
    }
}
