use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which kind of PEM file a TLS error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PemFile {
    Certificate,
    PrivateKey,
    ClientRoots,
}

impl fmt::Display for PemFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PemFile::Certificate => "certificate",
            PemFile::PrivateKey => "private key",
            PemFile::ClientRoots => "client CA bundle",
        })
    }
}

/// Failures loading listener or CA material, or assembling the rustls config.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Failed to read {file} at {path}: {source}")]
    Read {
        file: PemFile,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{file} file {path} contains no PEM blocks")]
    Empty { file: PemFile, path: PathBuf },

    #[error("{file} file {path} is not usable: {source}")]
    Invalid {
        file: PemFile,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// Client authentication was requested but the roots are missing or bad.
    #[error("Invalid client certificate roots: {0}")]
    ClientVerifier(String),

    #[error("Invalid TLS server configuration: {0}")]
    ServerConfig(String),
}

impl TlsError {
    pub(crate) fn read(file: PemFile, path: &std::path::Path, source: std::io::Error) -> Self {
        TlsError::Read { file, path: path.to_path_buf(), source }
    }

    pub(crate) fn invalid(
        file: PemFile,
        path: &std::path::Path,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        TlsError::Invalid { file, path: path.to_path_buf(), source: source.into() }
    }
}
