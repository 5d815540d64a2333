//! TLS client configuration for `amqps://` sources
//!
//! Trust comes from one of:
//! - a PEM bundle supplied in configuration (replaces the default roots)
//! - the Mozilla root set from `webpki-roots`
//!
//! The insecure flag swaps in a verifier that accepts any server certificate.
//! Handshake signatures are still checked so the session keys are sound.

use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tracing::warn;

/// Build the client config used for every TLS dial of this instance
///
/// Malformed `root_ca` material fails here, before any socket is opened.
pub fn client_config(root_ca: Option<&str>, insecure: bool) -> Result<Arc<ClientConfig>> {
    let roots = match root_ca {
        Some(pem) => root_store_from_pem(pem)?,
        None => default_root_store(),
    };

    let provider = Arc::new(crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("TLS configuration error: {}", e)))?;

    let config = if insecure {
        warn!("TLS certificate verification disabled (insecure_tls_connection)");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
            .with_no_client_auth()
    } else {
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    Ok(Arc::new(config))
}

/// Decode a PEM bundle into a trust store
pub fn root_store_from_pem(pem: &str) -> Result<RootCertStore> {
    let mut reader = pem.as_bytes();
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Config(format!("bad root CA encoding: {}", e)))?;

    if certs.is_empty() {
        return Err(Error::Config(
            "bad root CA encoding: no certificates found".to_string(),
        ));
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(Error::Config(format!(
            "bad root CA encoding: {} certificate(s) could not be parsed",
            ignored
        )));
    }
    if ignored > 0 {
        warn!(ignored, "Some root CA certificates could not be parsed");
    }

    Ok(roots)
}

fn default_root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

/// Accepts any certificate chain and host name
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
