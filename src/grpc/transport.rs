//! Channel establishment to the policy authority
//!
//! Plaintext uses tonic's own connector. For TLS we terminate the session
//! ourselves with rustls and hand tonic an already-encrypted stream through
//! `connect_with_connector`, which lets us offer a skip-verify mode that
//! tonic's built-in TLS does not have:
//!
//! ```text
//! Endpoint ──service_fn──► TcpStream::connect(host:port)
//!                               │
//!                               ▼
//!                         TlsConnector::connect(server_name)   (ALPN h2)
//!                               │
//!                               ▼
//!                         TokioIo<TlsStream>  ──► HTTP/2 ──► gRPC
//! ```

use std::sync::Arc;

use hyper_util::rt::TokioIo;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{info, warn};

use crate::config::{AuthorityConfig, TransportSecurity};

/// Error type for establishing the authority channel
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid authority endpoint {address}: {source}")]
    InvalidEndpoint {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("invalid TLS server name {0:?}")]
    InvalidServerName(String),
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("no usable root certificates in the platform trust store")]
    NoRootCertificates,
    #[error("couldn't connect to the authority at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },
}

/// Open a channel to the authority
///
/// Connects eagerly: the returned channel has completed its first
/// handshake, so a bad address or an authority that is down surfaces here.
pub async fn connect(config: &AuthorityConfig) -> Result<Channel, TransportError> {
    let address = config.address();
    let endpoint = Endpoint::from_shared(format!("http://{}", address))
        .map_err(|source| TransportError::InvalidEndpoint {
            address: address.clone(),
            source,
        })?
        .connect_timeout(config.connect_timeout);

    let connected = match config.security {
        TransportSecurity::Plaintext => endpoint.connect().await,
        TransportSecurity::Tls | TransportSecurity::TlsInsecureSkipVerify => {
            let tls = TlsConnector::from(Arc::new(tls_config(config.security)?));
            let server_name = ServerName::try_from(config.host.clone())
                .map_err(|_| TransportError::InvalidServerName(config.host.clone()))?;
            let dial_address = address.clone();

            endpoint
                .connect_with_connector(service_fn(move |_: Uri| {
                    let tls = tls.clone();
                    let server_name = server_name.clone();
                    let dial_address = dial_address.clone();
                    async move {
                        let tcp = TcpStream::connect(&dial_address).await?;
                        tcp.set_nodelay(true)?;
                        let stream = tls.connect(server_name, tcp).await?;
                        Ok::<_, std::io::Error>(TokioIo::new(stream))
                    }
                }))
                .await
        }
    };

    let channel = connected.map_err(|source| TransportError::Connect {
        address: address.clone(),
        source,
    })?;

    info!(address = %address, security = ?config.security, "connected to the authority");
    Ok(channel)
}

/// Build the rustls client config for a TLS mode
fn tls_config(security: TransportSecurity) -> Result<ClientConfig, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let mut config = if security == TransportSecurity::TlsInsecureSkipVerify {
        warn!("authority certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(native_roots()?)
            .with_no_client_auth()
    };

    config.alpn_protocols = vec![b"h2".to_vec()];
    Ok(config)
}

/// Platform trust store
fn native_roots() -> Result<RootCertStore, TransportError> {
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        warn!(error = %err, "skipping unreadable platform certificate source");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    if ignored > 0 {
        warn!(ignored, "ignored unparsable root certificates");
    }
    if added == 0 {
        return Err(TransportError::NoRootCertificates);
    }
    Ok(roots)
}

/// Accepts any server certificate and hostname.
///
/// Handshake signatures are still checked, so the peer must hold the key
/// for whatever certificate it presents.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_tls_config_advertises_h2() {
        let config = tls_config(TransportSecurity::TlsInsecureSkipVerify).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
    }

    #[test]
    fn test_skip_verify_accepts_any_certificate() {
        let verifier = AcceptAnyServerCert(Arc::new(rustls::crypto::ring::default_provider()));
        let name = ServerName::try_from("authority.invalid").unwrap();
        let result = verifier.verify_server_cert(
            &CertificateDer::from(vec![0u8; 8]),
            &[],
            &name,
            &[],
            UnixTime::now(),
        );
        assert!(result.is_ok());
        assert!(!verifier.supported_verify_schemes().is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused_is_an_error() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = AuthorityConfig {
            host: "127.0.0.1".to_string(),
            port,
            security: TransportSecurity::Plaintext,
            connect_timeout: Duration::from_secs(1),
        };

        let err = connect(&config).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_invalid_server_name() {
        let config = AuthorityConfig {
            host: "not a hostname".to_string(),
            port: 50052,
            security: TransportSecurity::TlsInsecureSkipVerify,
            connect_timeout: Duration::from_secs(1),
        };

        let err = connect(&config).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::InvalidServerName(_) | TransportError::InvalidEndpoint { .. }
        ));
    }
}
