//! Channel establishment for node management endpoints.
//!
//! Maintenance mode talks TLS without server verification (nodes in
//! maintenance present a self-signed certificate); normal mode verifies and
//! authenticates with the cluster PKI. `unix://` endpoints bypass TLS for
//! in-process and test paths.

use std::sync::Arc;

use hyper_util::rt::TokioIo;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::TlsConnector;
use tonic::transport::{Channel, Endpoint, Uri};

use crate::error::MachineError;

const DEFAULT_PORT: u16 = 50000;

/// Connect to a maintenance-mode node: TLS with server verification skipped.
pub async fn connect_maintenance(endpoint: &str) -> Result<Channel, MachineError> {
    if let Some(path) = endpoint.strip_prefix("unix://") {
        return connect_unix(path).await;
    }
    let mut tls = rustls::ClientConfig::builder()
        .with_root_certificates(rustls::RootCertStore::empty())
        .with_no_client_auth();
    tls.dangerous().set_certificate_verifier(Arc::new(InsecureVerifier));
    connect_tls(endpoint, tls).await
}

/// Connect with cluster PKI: server verified against `ca_pem`, client
/// authenticated with `crt_pem`/`key_pem`.
pub async fn connect_with_pki(
    endpoint: &str,
    ca_pem: &str,
    crt_pem: &str,
    key_pem: &str,
) -> Result<Channel, MachineError> {
    if let Some(path) = endpoint.strip_prefix("unix://") {
        return connect_unix(path).await;
    }

    let mut roots = rustls::RootCertStore::empty();
    for cert in load_pem_certs(ca_pem.as_bytes())? {
        roots
            .add(cert)
            .map_err(|e| MachineError::connection(format!("bad CA certificate: {e}")))?;
    }
    let client_certs = load_pem_certs(crt_pem.as_bytes())?;
    let client_key = load_pem_key(key_pem.as_bytes())?;

    let tls = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(client_certs, client_key)
        .map_err(|e| MachineError::connection(format!("client auth setup failed: {e}")))?;
    connect_tls(endpoint, tls).await
}

/// Plain-HTTP channel over a unix socket, used by in-process and test paths.
pub async fn connect_unix(path: &str) -> Result<Channel, MachineError> {
    let path = path.to_string();
    Endpoint::from_shared("http://localhost".to_string())
        .map_err(|e| MachineError::connection(e.to_string()))?
        .connect_with_connector(tower::service_fn(move |_uri: Uri| {
            let path = path.clone();
            async move {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok::<_, std::io::Error>(TokioIo::new(stream))
            }
        }))
        .await
        .map_err(|e| MachineError::connection(e.to_string()))
}

async fn connect_tls(
    endpoint: &str,
    mut tls: rustls::ClientConfig,
) -> Result<Channel, MachineError> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    // gRPC requires ALPN h2.
    tls.alpn_protocols = vec![b"h2".to_vec()];
    let connector = TlsConnector::from(Arc::new(tls));

    let (host, port) = split_endpoint(endpoint)?;

    // TLS is handled by the connector, so the endpoint URI stays http.
    let channel = Endpoint::from_shared(format!("http://{}:{}", host, port))
        .map_err(|e| MachineError::connection(e.to_string()))?
        .connect_with_connector(tower::service_fn(move |uri: Uri| {
            let connector = connector.clone();
            let host = host.clone();
            async move {
                let uri_host = uri.host().unwrap_or("127.0.0.1").to_string();
                let uri_port = uri.port_u16().unwrap_or(DEFAULT_PORT);
                let tcp = tokio::net::TcpStream::connect((uri_host.as_str(), uri_port)).await?;

                let server_name = ServerName::try_from(host)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
                let tls_stream = connector.connect(server_name, tcp).await?;
                Ok::<_, std::io::Error>(TokioIo::new(tls_stream))
            }
        }))
        .await
        .map_err(|e| MachineError::connection(e.to_string()))?;

    Ok(channel)
}

fn split_endpoint(endpoint: &str) -> Result<(String, u16), MachineError> {
    let with_scheme = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    };
    let parsed = url::Url::parse(&with_scheme)
        .map_err(|e| MachineError::connection(format!("invalid endpoint '{endpoint}': {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| MachineError::connection(format!("no host in endpoint '{endpoint}'")))?
        .to_string();
    Ok((host, parsed.port().unwrap_or(DEFAULT_PORT)))
}

fn load_pem_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, MachineError> {
    let mut reader = std::io::BufReader::new(pem);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MachineError::connection(format!("failed to parse PEM certificates: {e}")))?;
    if certs.is_empty() {
        return Err(MachineError::connection("no certificates found in PEM data"));
    }
    Ok(certs)
}

fn load_pem_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, MachineError> {
    let mut reader = std::io::BufReader::new(pem);
    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => return Ok(PrivateKeyDer::Pkcs1(key)),
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => return Ok(PrivateKeyDer::Pkcs8(key)),
            Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => return Ok(PrivateKeyDer::Sec1(key)),
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                return Err(MachineError::connection(format!("failed to parse PEM key: {e}")))
            }
        }
    }
    Err(MachineError::connection("no private key found in PEM data"))
}

/// Accepts whatever certificate a maintenance-mode node presents.
#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
