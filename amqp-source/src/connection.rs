//! Connection manager
//!
//! Dials the broker (plain TCP for `amqp`, TLS for `amqps`), opens the AMQP
//! connection, begins a session and attaches the receiver link. The whole
//! sequence runs under the dial deadline.

use crate::address::{Scheme, SourceAddress};
use crate::config::SourceConfig;
use crate::link::{inbound_message, MessageLink, Received};
use crate::settlement::Disposition;
use crate::tls;
use crate::{Error, Result};
use async_trait::async_trait;
use fe2o3_amqp::connection::ConnectionHandle as AmqpConnection;
use fe2o3_amqp::link::delivery::Delivery;
use fe2o3_amqp::link::receiver::CreditMode;
use fe2o3_amqp::sasl_profile::SaslProfile;
use fe2o3_amqp::session::SessionHandle;
use fe2o3_amqp::types::definitions;
use fe2o3_amqp::types::messaging::Body;
use fe2o3_amqp::types::primitives::Value;
use fe2o3_amqp::{Connection, Receiver, Session};
use rustls::pki_types::ServerName;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Byte stream an AMQP connection runs over
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static {}

/// Produces connected transports for one source address
pub struct Dialer {
    address: SourceAddress,
    tls: Option<TlsConnector>,
    timeout: Duration,
}

impl fmt::Debug for Dialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialer")
            .field("address", &self.address.to_string())
            .field("tls", &self.tls.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Dialer {
    /// Prepare dialing; TLS trust material is decoded here
    pub fn new(config: &SourceConfig, address: SourceAddress) -> Result<Self> {
        let tls = match address.scheme() {
            Scheme::Amqps => {
                let client_config =
                    tls::client_config(config.root_ca(), config.insecure_tls_connection)?;
                Some(TlsConnector::from(client_config))
            }
            Scheme::Amqp => None,
        };

        Ok(Self {
            address,
            tls,
            timeout: config.dial_timeout(),
        })
    }

    /// Address being dialed
    pub fn address(&self) -> &SourceAddress {
        &self.address
    }

    /// Open a TCP (and TLS, for `amqps`) stream to the broker
    pub async fn dial(&self) -> Result<Box<dyn Transport>> {
        tokio::time::timeout(self.timeout, self.dial_inner())
            .await
            .map_err(|_| {
                Error::Connection(format!(
                    "dial to {} timed out after {:?}",
                    self.address.authority(),
                    self.timeout
                ))
            })?
    }

    async fn dial_inner(&self) -> Result<Box<dyn Transport>> {
        let authority = self.address.authority();
        let tcp = TcpStream::connect(&authority)
            .await
            .map_err(|e| Error::Connection(format!("failed to connect to {}: {}", authority, e)))?;
        tcp.set_nodelay(true)
            .map_err(|e| Error::Connection(format!("failed to configure socket: {}", e)))?;

        let Some(connector) = &self.tls else {
            debug!(authority = %authority, "TCP connection established");
            return Ok(Box::new(tcp));
        };

        let server_name = ServerName::try_from(self.address.host().to_string()).map_err(|e| {
            Error::Connection(format!("invalid TLS server name {}: {}", self.address.host(), e))
        })?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Connection(format!("TLS handshake with {} failed: {}", authority, e)))?;

        debug!(authority = %authority, "TLS connection established");
        Ok(Box::new(stream))
    }
}

/// Creates links and tears them down
#[async_trait]
pub trait LinkFactory: Send + Sync {
    /// Link type produced
    type Link: MessageLink;

    /// Establish a link ready to receive
    async fn connect(&self) -> Result<Self::Link>;

    /// Close a link, logging failures
    async fn release(&self, link: Self::Link);
}

/// Opens AMQP receiver links for the configured source
#[derive(Debug)]
pub struct Connector {
    dialer: Dialer,
    container_id: String,
    credit: u32,
    timeout: Duration,
}

impl Connector {
    /// Validate TLS material and fix the container id
    pub fn new(config: &SourceConfig, address: SourceAddress) -> Result<Self> {
        Ok(Self {
            dialer: Dialer::new(config, address)?,
            container_id: config.container_id(),
            credit: config.credit,
            timeout: config.dial_timeout(),
        })
    }

    /// AMQP container id
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Dial, open, begin and attach within the dial deadline
    pub async fn open(&self) -> Result<ConnectionHandle> {
        let address = self.dialer.address();
        tokio::time::timeout(self.timeout, self.open_inner())
            .await
            .map_err(|_| {
                Error::Connection(format!(
                    "connecting to {} timed out after {:?}",
                    address, self.timeout
                ))
            })?
    }

    async fn open_inner(&self) -> Result<ConnectionHandle> {
        let address = self.dialer.address();
        let stream = self.dialer.dial().await?;

        let sasl_profile = match address.credentials() {
            Some(credentials) => SaslProfile::Plain {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
            },
            None => SaslProfile::Anonymous,
        };

        let mut connection = Connection::builder()
            .container_id(self.container_id.clone())
            .hostname(address.host())
            .sasl_profile(sasl_profile)
            .open_with_stream(stream)
            .await
            .map_err(|e| Error::Connection(format!("AMQP open failed: {}", e)))?;

        let mut session = match Session::begin(&mut connection).await {
            Ok(session) => session,
            Err(e) => {
                let _ = connection.close().await;
                return Err(Error::Connection(format!("AMQP session begin failed: {}", e)));
            }
        };

        let link_name = format!("{}-receiver", self.container_id);
        let receiver = Receiver::builder()
            .name(link_name)
            .source(address.link_address().to_string())
            .credit_mode(CreditMode::Auto(self.credit))
            .attach(&mut session)
            .await;

        let receiver = match receiver {
            Ok(receiver) => receiver,
            Err(e) => {
                let _ = session.end().await;
                let _ = connection.close().await;
                return Err(Error::Connection(format!(
                    "failed to attach receiver to {}: {}",
                    address.link_address(),
                    e
                )));
            }
        };

        info!(
            source = %address,
            container_id = %self.container_id,
            credit = self.credit,
            "🔌 Receiver link attached"
        );

        Ok(ConnectionHandle {
            connection,
            session,
            receiver,
        })
    }
}

#[async_trait]
impl LinkFactory for Connector {
    type Link = ConnectionHandle;

    async fn connect(&self) -> Result<ConnectionHandle> {
        self.open().await
    }

    async fn release(&self, link: ConnectionHandle) {
        link.close().await;
    }
}

/// Live connection, session and receiver link
pub struct ConnectionHandle {
    connection: AmqpConnection<()>,
    session: SessionHandle<()>,
    receiver: Receiver,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle").finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Detach the link, end the session and close the connection
    pub async fn close(self) {
        let Self {
            mut connection,
            mut session,
            receiver,
        } = self;

        if let Err(e) = receiver.close().await {
            warn!(error = %e, "Failed to detach receiver link");
        }
        if let Err(e) = session.end().await {
            warn!(error = %e, "Failed to end AMQP session");
        }
        if let Err(e) = connection.close().await {
            warn!(error = %e, "Failed to close AMQP connection");
        }
        debug!("AMQP connection closed");
    }
}

#[async_trait]
impl MessageLink for ConnectionHandle {
    type Delivery = Delivery<Body<Value>>;

    async fn receive(&mut self) -> Result<Received<Self::Delivery>> {
        let delivery = self
            .receiver
            .recv::<Body<Value>>()
            .await
            .map_err(|e| Error::Receive(e.to_string()))?;
        let message = inbound_message(delivery.message());
        Ok(Received { message, delivery })
    }

    async fn settle(&mut self, delivery: Self::Delivery, disposition: Disposition) -> Result<()> {
        let result = match disposition {
            Disposition::Accept => self.receiver.accept(&delivery).await,
            Disposition::Reject => {
                self.receiver
                    .reject(&delivery, None::<definitions::Error>)
                    .await
            }
        };
        result.map_err(|e| Error::Settlement(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use rustls::ServerConfig;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    struct TlsServer {
        port: u16,
        cert_pem: String,
    }

    /// TLS listener presenting a fresh self-signed `localhost` certificate
    async fn tls_server() -> TlsServer {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_der: CertificateDer<'static> = certified.cert.der().clone();
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        ));

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let server_config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let Ok((tcp, _)) = listener.accept().await else {
                    return;
                };
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    if let Ok(mut stream) = acceptor.accept(tcp).await {
                        let mut buf = [0u8; 64];
                        let _ = stream.read(&mut buf).await;
                    }
                });
            }
        });

        TlsServer {
            port,
            cert_pem: certified.cert.pem(),
        }
    }

    fn config_for(uri: &str) -> SourceConfig {
        let mut config = SourceConfig::new(uri, "http://sink.local/");
        config.dial_timeout_secs = 5;
        config
    }

    fn dialer(config: &SourceConfig) -> Result<Dialer> {
        Dialer::new(config, SourceAddress::parse(&config.source_uri)?)
    }

    #[tokio::test]
    async fn test_invalid_root_ca_fails_before_dialing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut config = config_for(&format!("amqps://127.0.0.1:{}/queue1", port));
        config.root_ca = Some("-----BEGIN CERTIFICATE-----\nnot base64\n".to_string());

        let result = Connector::new(&config, SourceAddress::parse(&config.source_uri).unwrap());
        assert!(matches!(result, Err(Error::Config(_))));

        let accepted =
            tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(accepted.is_err(), "no connection attempt expected");
    }

    #[tokio::test]
    async fn test_insecure_handshake_accepts_untrusted_cert() {
        let server = tls_server().await;
        let mut config = config_for(&format!("amqps://localhost:{}/queue1", server.port));
        config.insecure_tls_connection = true;

        assert!(dialer(&config).unwrap().dial().await.is_ok());
    }

    #[tokio::test]
    async fn test_untrusted_cert_rejected_by_default() {
        let server = tls_server().await;
        let config = config_for(&format!("amqps://localhost:{}/queue1", server.port));

        let result = dialer(&config).unwrap().dial().await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn test_custom_root_ca_trusts_server() {
        let server = tls_server().await;
        let mut config = config_for(&format!("amqps://localhost:{}/queue1", server.port));
        config.root_ca = Some(server.cert_pem.clone());

        assert!(dialer(&config).unwrap().dial().await.is_ok());
    }

    #[tokio::test]
    async fn test_plain_dial() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = config_for(&format!("amqp://127.0.0.1:{}/queue1", port));
        let dial = dialer(&config).unwrap();
        assert!(dial.tls.is_none());

        let (dialed, accepted) = tokio::join!(dial.dial(), listener.accept());
        assert!(dialed.is_ok());
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn test_refused_dial_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = config_for(&format!("amqp://127.0.0.1:{}/queue1", port));
        let result = dialer(&config).unwrap().dial().await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn test_silent_broker_hits_dial_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // accept and never answer the AMQP header
            let held = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(held);
        });

        let mut config = config_for(&format!("amqp://127.0.0.1:{}/queue1", port));
        config.dial_timeout_secs = 1;
        let connector =
            Connector::new(&config, SourceAddress::parse(&config.source_uri).unwrap()).unwrap();

        let result = connector.open().await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }
}
