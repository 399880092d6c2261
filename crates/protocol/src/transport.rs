//! QUIC transport session.
//!
//! One encrypted connection per failover, carrying a single bidirectional
//! reliable stream. The server presents a freshly generated self-signed
//! certificate; the client does not verify it — peer authenticity is
//! instead cross-checked against the gossip cluster view by the server.
//!
//! The handshake initial packet size is pinned to 1200 bytes and path-MTU
//! discovery is disabled so sessions survive tunnelled/overlay links.

use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{ClientConfig, Connection, Endpoint, IdleTimeout, ServerConfig, TransportConfig};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::DigitallySignedStruct;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Application protocol identifier negotiated during the handshake.
pub const ALPN_PROTOCOL: &[u8] = b"slotswap-failover";

/// Default server port.
pub const DEFAULT_PORT: u16 = 9898;

/// Handshake initial packet size; kept at the QUIC minimum so handshakes
/// clear overlay networks that cannot carry full-size datagrams.
pub const HANDSHAKE_INITIAL_MTU: u16 = 1200;

/// Tunables for the QUIC session.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Server listen port.
    pub port: u16,
    /// Keep-alive cadence while the protocol sits in long waits.
    pub heartbeat_interval: Duration,
    /// Idle timeout after which the session is torn down.
    pub stream_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            heartbeat_interval: Duration::from_secs(5),
            stream_timeout: Duration::from_secs(600),
        }
    }
}

/// Transport setup and connection errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to generate tls certificate: {0}")]
    Certificate(#[from] rcgen::Error),

    #[error("tls configuration failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid transport configuration: {0}")]
    Config(String),

    #[error("failed to bind endpoint: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection attempt failed: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("connection failed: {0}")]
    Connection(#[from] quinn::ConnectionError),
}

fn install_crypto_provider() {
    // Safe to race; the second install just reports AlreadyInstalled.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

fn transport_config(settings: &TransportSettings) -> Result<TransportConfig, TransportError> {
    let mut transport = TransportConfig::default();
    transport.keep_alive_interval(Some(settings.heartbeat_interval));
    let idle = IdleTimeout::try_from(settings.stream_timeout)
        .map_err(|err| TransportError::Config(format!("stream timeout out of range: {err}")))?;
    transport.max_idle_timeout(Some(idle));
    transport.initial_mtu(HANDSHAKE_INITIAL_MTU);
    transport.mtu_discovery_config(None);
    Ok(transport)
}

/// Build the server endpoint: self-signed certificate, ALPN, and the
/// shared transport tuning, listening on `0.0.0.0:port`.
pub fn server_endpoint(settings: &TransportSettings) -> Result<Endpoint, TransportError> {
    install_crypto_provider();

    let certified = rcgen::generate_simple_self_signed(vec!["slotswap".to_string()])?;
    let cert_chain = vec![certified.cert.der().clone()];
    let key = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());

    let mut crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key.into())?;
    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let quic_crypto = QuicServerConfig::try_from(crypto)
        .map_err(|err| TransportError::Config(err.to_string()))?;
    let mut server_config = ServerConfig::with_crypto(Arc::new(quic_crypto));
    server_config.transport_config(Arc::new(transport_config(settings)?));

    let bind: SocketAddr = (Ipv4Addr::UNSPECIFIED, settings.port).into();
    let endpoint = Endpoint::server(server_config, bind)?;
    debug!(addr = %endpoint.local_addr()?, "server endpoint ready");
    Ok(endpoint)
}

/// Build the client endpoint with certificate verification disabled.
pub fn client_endpoint(settings: &TransportSettings) -> Result<Endpoint, TransportError> {
    install_crypto_provider();

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let quic_crypto = QuicClientConfig::try_from(crypto)
        .map_err(|err| TransportError::Config(err.to_string()))?;
    let mut client_config = ClientConfig::new(Arc::new(quic_crypto));
    client_config.transport_config(Arc::new(transport_config(settings)?));

    let mut endpoint = Endpoint::client((Ipv4Addr::UNSPECIFIED, 0).into())?;
    endpoint.set_default_client_config(client_config);
    Ok(endpoint)
}

/// Dial the server once. Callers own the retry loop.
pub async fn connect(
    endpoint: &Endpoint,
    server_addr: SocketAddr,
    server_name: &str,
) -> Result<Connection, TransportError> {
    let connection = endpoint.connect(server_addr, server_name)?.await?;
    debug!(addr = %server_addr, "connected to server");
    Ok(connection)
}

/// Certificate verifier that accepts any server certificate.
///
/// The server's certificate is self-signed and rotates every run; the
/// protocol authenticates the peer by matching its source IP against the
/// cluster gossip view instead.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<rustls::crypto::CryptoProvider>);

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
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_documented_parameters() {
        let settings = TransportSettings::default();
        assert_eq!(settings.port, 9898);
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(settings.stream_timeout, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn client_connects_to_self_signed_server() {
        let settings = TransportSettings {
            port: 0,
            ..Default::default()
        };
        let server = server_endpoint(&settings).unwrap();
        let server_addr = SocketAddr::from(([127, 0, 0, 1], server.local_addr().unwrap().port()));

        let accept = tokio::spawn({
            let server = server.clone();
            async move {
                let incoming = server.accept().await.expect("incoming connection");
                let connection = incoming.await.expect("handshake");
                let (_send, mut recv) = connection.accept_bi().await.expect("stream");
                let mut byte = [0u8; 1];
                recv.read_exact(&mut byte).await.expect("read");
                byte[0]
            }
        });

        let client = client_endpoint(&settings).unwrap();
        let connection = connect(&client, server_addr, "slotswap").await.unwrap();
        let (mut send, _recv) = connection.open_bi().await.unwrap();
        send.write_all(&[42u8]).await.unwrap();
        let _ = send.finish();

        assert_eq!(accept.await.unwrap(), 42);
    }
}
