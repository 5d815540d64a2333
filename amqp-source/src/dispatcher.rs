//! Event dispatcher: HTTP POST in binary content mode

use crate::body::Payload;
use crate::config::SourceConfig;
use crate::error::DispatchError;
use crate::event::Event;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Body, Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

/// Successful delivery to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReceipt {
    /// Response status (always 2xx)
    pub status: StatusCode,
}

/// Destination for translated events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event; only a 2xx response counts as success
    async fn dispatch(&self, event: Event) -> std::result::Result<DispatchReceipt, DispatchError>;
}

/// Posts events to the configured HTTP(S) sink
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
    sink_uri: String,
    timeout: Duration,
}

impl HttpDispatcher {
    /// Build the HTTP client with the dispatch deadline
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let timeout = config.dispatch_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        info!(sink = %config.sink_uri, "HTTP dispatcher ready");

        Ok(Self {
            client,
            sink_uri: config.sink_uri.clone(),
            timeout,
        })
    }

    /// Sink address
    pub fn sink_uri(&self) -> &str {
        &self.sink_uri
    }

    fn transport_error(&self, err: reqwest::Error) -> DispatchError {
        if err.is_timeout() {
            DispatchError::Timeout {
                seconds: self.timeout.as_secs(),
            }
        } else {
            DispatchError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl EventSink for HttpDispatcher {
    async fn dispatch(&self, event: Event) -> std::result::Result<DispatchReceipt, DispatchError> {
        let headers = event.envelope.headers()?;

        let body = match event.payload {
            Payload::Streamed(reader) => Body::wrap_stream(reader),
            Payload::Materialized(bytes) => Body::from(bytes),
        };

        let response = self
            .client
            .post(&self.sink_uri)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| self.transport_error(e))?;
        debug!(
            event_id = %event.envelope.id,
            status = status.as_u16(),
            response = %response_body,
            "Sink response"
        );

        if !status.is_success() {
            return Err(DispatchError::Status {
                status_code: status.as_u16(),
            });
        }

        Ok(DispatchReceipt { status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::SourceAddress;
    use crate::message::{InboundMessage, MessageId};
    use crate::translator::Translator;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn translator() -> Translator {
        Translator::new(
            SourceAddress::parse("amqp://broker:5672/queue1")
                .unwrap()
                .spec_source(),
        )
    }

    fn dispatcher(sink_uri: &str) -> HttpDispatcher {
        let config = SourceConfig::new("amqp://broker:5672/queue1", sink_uri);
        HttpDispatcher::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_streamed_text_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events"))
            .and(header("ce-specversion", "1.0"))
            .and(header("ce-type", "amqp.message.delivery"))
            .and(header("ce-source", "amqp://broker:5672/queue1"))
            .and(header("ce-id", "42"))
            .and(header("content-type", "text/plain; charset=utf-8"))
            .and(body_bytes(b"hello".to_vec()))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let event = translator()
            .translate(InboundMessage::text("hello").with_message_id(MessageId::Ulong(42)));
        let receipt = dispatcher(&format!("{}/events", server.uri()))
            .dispatch(event)
            .await
            .unwrap();

        assert_eq!(receipt.status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_materialized_binary_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "application/json"))
            .and(body_bytes(br#"{"amount":10}"#.to_vec()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let message =
            InboundMessage::binary(br#"{"amount":10}"#.to_vec()).with_content_type("application/json");
        let event = translator().translate(message);
        assert!(!event.payload.is_streamed());

        dispatcher(&server.uri()).dispatch(event).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("sink down"))
            .mount(&server)
            .await;

        let event = translator().translate(InboundMessage::text("hello"));
        let err = dispatcher(&server.uri()).dispatch(event).await.unwrap_err();

        assert!(matches!(err, DispatchError::Status { status_code: 500 }));
    }

    #[tokio::test]
    async fn test_unreachable_sink_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let event = translator().translate(InboundMessage::text("hello"));
        let err = dispatcher(&format!("http://{}/", addr))
            .dispatch(event)
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Transport(_)));
    }

    #[tokio::test]
    async fn test_slow_sink_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let mut config = SourceConfig::new("amqp://broker:5672/queue1", server.uri());
        config.dispatch_timeout_secs = 1;
        let dispatcher = HttpDispatcher::new(&config).unwrap();

        let event = translator().translate(InboundMessage::text("hello"));
        let err = dispatcher.dispatch(event).await.unwrap_err();

        assert!(matches!(err, DispatchError::Timeout { seconds: 1 }));
    }

    #[tokio::test]
    async fn test_unencodable_header_fails_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let message = InboundMessage::text("hello")
            .with_message_id(MessageId::String("bad\r\nid".to_string()));
        let event = translator().translate(message);
        let err = dispatcher(&server.uri()).dispatch(event).await.unwrap_err();

        assert!(matches!(err, DispatchError::InvalidAttribute { .. }));
    }
}
