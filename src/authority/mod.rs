//! # Certificate Authority
//!
//! [`Authority`] ties the provisioner registry, the authority database and the
//! issuing CA together:
//!
//! - [`Authority::authorize`] turns a one-time token or a client certificate
//!   into [`SignOptions`],
//! - [`Authority::sign`] enforces those options on a CSR and issues a leaf,
//! - [`Authority::revoke`] records a revocation at most once per serial,
//! - [`Authority::get_certificate_revocation_list`] serves the lazily rebuilt
//!   CRL.

pub mod authorize;
pub mod ca;
pub mod crl;
pub mod revoke;
pub mod sign;
pub mod sign_options;
pub mod x509;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::AuthorityConfig;
use crate::db::AuthDb;
use crate::errors::{CertplaneError, ErrorKind, Result};
use crate::provisioner::{Provisioner, ProvisionerExtension, ProvisionerRegistry};

pub use authorize::{AuthorizeMethod, Credential};
pub use ca::CertificateAuthority;
pub use crl::CrlCache;
pub use revoke::RevokeOptions;
pub use sign::IssuedCertificate;
pub use sign_options::{SignOption, SignOptions};
pub use x509::{CsrInfo, PeerCertificate};

/// The certificate authority service. Shared across request handlers via `Arc`.
#[derive(Debug)]
pub struct Authority {
    config: AuthorityConfig,
    registry: Arc<ProvisionerRegistry>,
    db: Arc<dyn AuthDb>,
    ca: CertificateAuthority,
    crl: CrlCache,
}

impl Authority {
    /// Build an authority, loading or generating CA material per `config`.
    pub fn new(
        config: AuthorityConfig,
        registry: Arc<ProvisionerRegistry>,
        db: Arc<dyn AuthDb>,
    ) -> Result<Self> {
        let ca = CertificateAuthority::from_config(&config)?;
        Ok(Self::with_ca(config, registry, db, ca))
    }

    pub fn with_ca(
        config: AuthorityConfig,
        registry: Arc<ProvisionerRegistry>,
        db: Arc<dyn AuthDb>,
        ca: CertificateAuthority,
    ) -> Self {
        Self { config, registry, db, ca, crl: CrlCache::new() }
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProvisionerRegistry> {
        &self.registry
    }

    pub fn db(&self) -> &Arc<dyn AuthDb> {
        &self.db
    }

    pub fn ca(&self) -> &CertificateAuthority {
        &self.ca
    }

    /// Resolve the provisioner that issued a certificate: the embedded
    /// extension first, then the issuance record for its serial.
    pub async fn load_provisioner_by_certificate(
        &self,
        cert_der: &[u8],
    ) -> Result<Arc<Provisioner>> {
        let peer = PeerCertificate::parse(cert_der)?;
        self.provisioner_for_peer(&peer).await
    }

    pub(crate) async fn provisioner_for_peer(
        &self,
        peer: &PeerCertificate,
    ) -> Result<Arc<Provisioner>> {
        if let Some(provisioner) = self.provisioner_from_extension(peer.extension.as_ref()) {
            return Ok(provisioner);
        }
        if let Some(provisioner) = self.provisioner_from_store(&peer.serial).await? {
            return Ok(provisioner);
        }
        Err(CertplaneError::not_found("provisioner for certificate", &peer.serial))
    }

    /// The provisioner named by an embedded extension, if it still exists.
    pub fn provisioner_from_extension(
        &self,
        extension: Option<&ProvisionerExtension>,
    ) -> Option<Arc<Provisioner>> {
        let extension = extension?;
        let provisioner = self.registry.snapshot().get(&extension.id);
        if provisioner.is_none() {
            debug!(provisioner_id = %extension.id, "Embedded provisioner no longer configured");
        }
        provisioner
    }

    /// The provisioner recorded at issuance for `serial`, if it still exists.
    pub async fn provisioner_from_store(&self, serial: &str) -> Result<Option<Arc<Provisioner>>> {
        let data = match self.db.get_certificate_data(serial).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotImplemented => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(data
            .and_then(|data| data.provisioner)
            .and_then(|provisioner| self.registry.snapshot().get(&provisioner.id)))
    }

    /// Direct revocation lookup; reflects every revocation already committed.
    pub async fn is_revoked(&self, serial: &str) -> Result<bool> {
        let serial = x509::normalize_serial(serial)?;
        self.db.is_revoked(&serial).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.db.shutdown().await {
            warn!(error = %e, "Authority database shutdown failed");
            return Err(e);
        }
        Ok(())
    }
}
