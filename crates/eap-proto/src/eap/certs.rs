//! Certificate loading and rustls server configuration for the TLS based
//! methods (EAP-TLS and PEAP).

use super::EapError;
use pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use rustls::server::WebPkiClientVerifier;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

/// Certificate configuration for the TLS tunnel
#[derive(Debug, Clone)]
pub struct TlsCertificateConfig {
    /// Server certificate chain (PEM format)
    pub server_cert_path: String,
    /// Server private key (PEM format)
    pub server_key_path: String,
    /// CA certificate for client verification (optional, PEM format)
    pub ca_cert_path: Option<String>,
    /// Reject handshakes without a client certificate
    pub require_client_cert: bool,
}

impl TlsCertificateConfig {
    pub fn new(
        server_cert_path: String,
        server_key_path: String,
        ca_cert_path: Option<String>,
        require_client_cert: bool,
    ) -> Self {
        TlsCertificateConfig {
            server_cert_path,
            server_key_path,
            ca_cert_path,
            require_client_cert,
        }
    }

    /// Server certificate only, no client verification
    pub fn simple(server_cert_path: String, server_key_path: String) -> Self {
        Self::new(server_cert_path, server_key_path, None, false)
    }
}

/// Load every certificate from a PEM file
pub fn load_certificates_from_pem(path: &str) -> Result<Vec<CertificateDer<'static>>, EapError> {
    let file = File::open(path).map_err(|e| {
        EapError::IoError(format!("Failed to open certificate file '{}': {}", path, e))
    })?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EapError::CertificateError(format!("Failed to parse certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(EapError::CertificateError(format!(
            "No certificates found in '{}'",
            path
        )));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#8, RSA or SEC1) from a PEM file
pub fn load_private_key_from_pem(path: &str) -> Result<PrivateKeyDer<'static>, EapError> {
    let file = File::open(path)
        .map_err(|e| EapError::IoError(format!("Failed to open key file '{}': {}", path, e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| EapError::CertificateError(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| EapError::CertificateError(format!("No private key found in '{}'", path)))
}

/// Check that a certificate parses and is inside its validity window
pub fn validate_certificate(cert_der: &[u8]) -> Result<(), EapError> {
    use x509_parser::prelude::*;

    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| EapError::CertificateError(format!("Invalid X.509 certificate: {}", e)))?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| EapError::CertificateError(format!("System time error: {}", e)))?
        .as_secs() as i64;

    if now < cert.validity().not_before.timestamp() {
        return Err(EapError::CertificateError(format!(
            "Certificate is not yet valid (not before: {})",
            cert.validity().not_before
        )));
    }
    if now > cert.validity().not_after.timestamp() {
        return Err(EapError::CertificateError(format!(
            "Certificate has expired (not after: {})",
            cert.validity().not_after
        )));
    }
    Ok(())
}

/// Subject common name of a DER certificate, if it has one
pub fn peer_common_name(cert_der: &[u8]) -> Result<Option<String>, EapError> {
    use x509_parser::prelude::*;

    let (_, cert) = X509Certificate::from_der(cert_der).map_err(|e| {
        EapError::CertificateError(format!("Failed to parse peer certificate: {}", e))
    })?;

    Ok(cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string))
}

/// Build the rustls server configuration shared by every tunnel
///
/// A configured CA enables client certificate verification; the handshake
/// only fails without a client certificate when `require_client_cert` is set.
/// Session tickets are disabled since EAP tunnels are never resumed.
pub fn build_server_config(cert_config: &TlsCertificateConfig) -> Result<ServerConfig, EapError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let certs = load_certificates_from_pem(&cert_config.server_cert_path)?;
    validate_certificate(&certs[0])?;
    let private_key = load_private_key_from_pem(&cert_config.server_key_path)?;

    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| EapError::TlsError(format!("Unsupported protocol versions: {}", e)))?;

    let builder = match (&cert_config.ca_cert_path, cert_config.require_client_cert) {
        (Some(ca_path), require) => {
            let mut root_store = rustls::RootCertStore::empty();
            for ca_cert in load_certificates_from_pem(ca_path)? {
                root_store.add(ca_cert).map_err(|e| {
                    EapError::CertificateError(format!("Failed to add CA certificate: {}", e))
                })?;
            }

            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(root_store), provider);
            let verifier = if require {
                verifier
            } else {
                verifier.allow_unauthenticated()
            };
            let verifier = verifier.build().map_err(|e| {
                EapError::TlsError(format!("Failed to build client verifier: {}", e))
            })?;
            builder.with_client_cert_verifier(verifier)
        }
        (None, true) => {
            return Err(EapError::CertificateError(
                "Client certificate verification required but no CA certificate path provided"
                    .to_string(),
            ));
        }
        (None, false) => builder.with_no_client_auth(),
    };

    let mut server_config = builder
        .with_single_cert(certs, private_key)
        .map_err(|e| EapError::TlsError(format!("Failed to configure server: {}", e)))?;
    server_config.send_tls13_tickets = 0;

    Ok(server_config)
}
