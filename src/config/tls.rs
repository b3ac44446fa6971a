//! TLS listener options.
//!
//! Builds the `rustls` server configuration for the API listener, including
//! the client certificate policy used by mTLS revocation and renewal.

use std::{
    fs,
    path::Path,
    sync::Arc,
};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rustls::{
    pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
    RootCertStore, ServerConfig,
};
use x509_parser::prelude::*;

use super::settings::{ClientAuthMode, ServerTlsConfig};
use crate::errors::tls::PemFile;
use crate::errors::TlsError;

/// Metadata extracted from the leaf certificate for startup logging.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// Certificate chain and key loaded from disk.
#[derive(Debug)]
pub struct CertificateBundle {
    pub chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
    pub info: CertificateInfo,
}

/// Read every certificate in a PEM file.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    read_certificates(PemFile::Certificate, path)
}

fn read_certificates(
    file: PemFile,
    path: &Path,
) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let bytes = fs::read(path).map_err(|e| TlsError::read(file, path, e))?;
    let certs = CertificateDer::pem_slice_iter(&bytes)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| TlsError::invalid(file, path, anyhow!(err)))?;
    if certs.is_empty() {
        return Err(TlsError::Empty { file, path: path.to_path_buf() });
    }
    Ok(certs)
}

/// Load the listener certificate chain and key.
pub fn load_certificate_bundle(
    cert_path: &Path,
    key_path: &Path,
    chain_path: Option<&Path>,
) -> Result<CertificateBundle, TlsError> {
    let mut chain = load_certificates(cert_path)?;
    if let Some(chain_path) = chain_path {
        chain.extend(load_certificates(chain_path)?);
    }

    let key_bytes =
        fs::read(key_path).map_err(|e| TlsError::read(PemFile::PrivateKey, key_path, e))?;
    let private_key = PrivateKeyDer::from_pem_slice(&key_bytes)
        .map_err(|err| TlsError::invalid(PemFile::PrivateKey, key_path, anyhow!(err)))?;

    let info = certificate_info(&chain[0], cert_path)?;

    Ok(CertificateBundle { chain, private_key, info })
}

fn certificate_info(
    cert: &CertificateDer<'static>,
    path: &Path,
) -> Result<CertificateInfo, TlsError> {
    let invalid = |source: anyhow::Error| TlsError::invalid(PemFile::Certificate, path, source);

    let (_, parsed) = X509Certificate::from_der(cert.as_ref()).map_err(|e| invalid(anyhow!(e)))?;
    let to_utc = |t: ASN1Time| {
        DateTime::<Utc>::from_timestamp(t.timestamp(), 0)
            .ok_or_else(|| invalid(anyhow!("certificate time out of range")))
    };

    Ok(CertificateInfo {
        subject: parsed.subject().to_string(),
        issuer: parsed.issuer().to_string(),
        not_before: to_utc(parsed.validity().not_before)?,
        not_after: to_utc(parsed.validity().not_after)?,
    })
}

/// Build the `rustls` server configuration for the API listener.
pub fn build_server_config(
    tls: &ServerTlsConfig,
) -> Result<(Arc<ServerConfig>, CertificateInfo), TlsError> {
    let bundle = load_certificate_bundle(
        tls.cert_path.as_path(),
        tls.key_path.as_path(),
        tls.chain_path.as_deref(),
    )?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|err| TlsError::ServerConfig(err.to_string()))?;

    let builder = match tls.client_auth {
        ClientAuthMode::None => builder.with_no_client_auth(),
        mode => {
            let ca_path = tls.client_ca_path.as_deref().ok_or_else(|| {
                TlsError::ClientVerifier("client_ca_path is not configured".to_string())
            })?;

            let mut roots = RootCertStore::empty();
            for cert in read_certificates(PemFile::ClientRoots, ca_path)? {
                roots.add(cert).map_err(|err| TlsError::ClientVerifier(err.to_string()))?;
            }

            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
            let verifier = if mode == ClientAuthMode::VerifyClientCertIfGiven {
                verifier.allow_unauthenticated()
            } else {
                verifier
            };
            let verifier =
                verifier.build().map_err(|err| TlsError::ClientVerifier(err.to_string()))?;

            builder.with_client_cert_verifier(verifier)
        }
    };

    let config = builder
        .with_single_cert(bundle.chain, bundle.private_key)
        .map_err(|err| TlsError::ServerConfig(err.to_string()))?;

    Ok((Arc::new(config), bundle.info))
}
