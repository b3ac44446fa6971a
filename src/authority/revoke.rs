//! Revocation pipeline.

use chrono::Utc;
use tracing::{info, instrument};

use super::x509::normalize_serial;
use super::Authority;
use crate::db::RevokedCertificateInfo;
use crate::errors::{CertplaneError, ErrorKind, Result};
use crate::observability::metrics;

/// Highest reason code defined for CRL entries (`aACompromise`).
pub const MAX_REASON_CODE: i32 = 10;

/// A revocation request after authorization.
#[derive(Debug, Clone, Default)]
pub struct RevokeOptions {
    pub serial: String,
    pub reason: String,
    pub reason_code: i32,
    /// Record the revocation without tearing down live sessions
    pub passive: bool,
    pub mtls: bool,
    pub acme: bool,
    pub provisioner_id: Option<String>,
}

impl RevokeOptions {
    /// Request-shape checks, run before anything is written.
    pub fn validate(&self) -> Result<()> {
        if self.serial.trim().is_empty() {
            return Err(CertplaneError::validation_field("missing serial", "serial"));
        }
        if !(0..=MAX_REASON_CODE).contains(&self.reason_code) {
            return Err(CertplaneError::validation_field("reasonCode out of bounds", "reasonCode"));
        }
        if !self.passive {
            return Err(CertplaneError::not_implemented("non-passive revocation not implemented"));
        }
        Ok(())
    }
}

impl Authority {
    /// Record a revocation. Revoking the same serial twice fails with
    /// `AlreadyRevoked`; the first record is kept.
    #[instrument(skip(self, options), fields(serial = %options.serial), name = "revoke")]
    pub async fn revoke(&self, options: &RevokeOptions) -> Result<()> {
        options.validate()?;
        let serial = normalize_serial(&options.serial)?;

        let data = match self.db.get_certificate_data(&serial).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotImplemented => None,
            Err(e) => return Err(e),
        };
        let provisioner_id = options
            .provisioner_id
            .clone()
            .or_else(|| data.as_ref().and_then(|d| d.provisioner.as_ref()).map(|p| p.id.clone()))
            .unwrap_or_default();

        let info = RevokedCertificateInfo {
            serial: serial.clone(),
            provisioner_id,
            reason_code: options.reason_code as u8,
            reason: options.reason.clone(),
            revoked_at: Utc::now(),
            expires_at: data.map(|d| d.expires_at),
            mtls: options.mtls,
            acme: options.acme,
        };

        self.db.revoke(&info).await?;
        self.crl.mark_stale();

        let source = if options.acme {
            "acme"
        } else if options.mtls {
            "mtls"
        } else {
            "token"
        };
        metrics::record_revocation(source).await;
        info!(serial = %serial, reason_code = options.reason_code, source, "Certificate revoked");
        Ok(())
    }
}
