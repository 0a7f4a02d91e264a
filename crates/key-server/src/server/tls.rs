//! Certificate loading and the hardened rustls server policy.
//!
//! The policy is fixed per build:
//!
//! - protocol versions: TLS 1.3 and TLS 1.2 (nothing older),
//! - key exchange groups, most to least preferred: secp384r1, secp256r1,
//! - cipher suites: ECDHE with AEAD only, in server preference order,
//! - the server's suite order wins over the client's.
//!
//! The `ring` provider does not implement P-521, so the curve list starts at
//! P-384.

use crate::server::error::{Error, Result};
use rustls::crypto::CryptoProvider;
use rustls::crypto::ring::{cipher_suite, default_provider, kx_group};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, SupportedCipherSuite, SupportedProtocolVersion, version};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Accepted protocol versions, newest first.
pub static PROTOCOL_VERSIONS: &[&SupportedProtocolVersion] = &[&version::TLS13, &version::TLS12];

/// Cipher allow-list in server preference order.
pub fn cipher_suites() -> Vec<SupportedCipherSuite> {
    vec![
        cipher_suite::TLS13_AES_256_GCM_SHA384,
        cipher_suite::TLS13_AES_128_GCM_SHA256,
        cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    ]
}

/// Crypto provider restricted to the allow-listed suites and curves.
pub fn hardened_provider() -> CryptoProvider {
    CryptoProvider {
        cipher_suites: cipher_suites(),
        kx_groups: vec![kx_group::SECP384R1, kx_group::SECP256R1],
        ..default_provider()
    }
}

/// Loads the key pair and builds the server-side rustls configuration.
///
/// # Errors
///
/// Returns [`Error::Startup`] if either file is missing, unreadable or holds
/// no PEM entries, and [`Error::Tls`] if the key does not match the
/// certificate or uses an unsupported algorithm.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>> {
    let cert_chain = read_cert_chain(cert_path)?;
    let private_key = read_private_key(key_path)?;

    let mut config = ServerConfig::builder_with_provider(Arc::new(hardened_provider()))
        .with_protocol_versions(PROTOCOL_VERSIONS)?
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)?;

    config.ignore_client_order = true;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    tracing::info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "loaded TLS certificates"
    );

    Ok(Arc::new(config))
}

fn read_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        Error::startup(format!(
            "failed to open certificate file {}: {e}",
            path.display()
        ))
    })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<core::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::startup(format!(
                "failed to parse certificate PEM {}: {e}",
                path.display()
            ))
        })?;
    if certs.is_empty() {
        return Err(Error::startup(format!(
            "certificate file {} contained no certificates",
            path.display()
        )));
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| {
        Error::startup(format!(
            "failed to open private key file {}: {e}",
            path.display()
        ))
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| {
            Error::startup(format!(
                "failed to parse private key PEM {}: {e}",
                path.display()
            ))
        })?
        .ok_or_else(|| Error::startup(format!("no private key found in {}", path.display())))
}
