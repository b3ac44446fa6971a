//! Certificate revocation list cache.
//!
//! The CRL is rebuilt lazily on read. Every committed revocation bumps a
//! generation counter; a cached CRL is fresh while it was built at the current
//! generation and is not yet inside its renewal window. Rebuilds are
//! single-flight: one caller holds the rebuild lock, the others wait and then
//! reuse its result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rcgen::{
    CertificateRevocationListParams, KeyIdMethod, RevocationReason, RevokedCertParams,
    SerialNumber,
};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use super::x509::serial_bytes;
use super::Authority;
use crate::db::{CertificateRevocationListInfo, RevokedCertificateInfo};
use crate::errors::{CertplaneError, Result};
use crate::observability::metrics;

#[derive(Debug, Clone)]
struct CachedCrl {
    info: CertificateRevocationListInfo,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct CrlCache {
    generation: AtomicU64,
    current: RwLock<Option<CachedCrl>>,
    rebuild: Mutex<()>,
}

impl CrlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate the cached CRL. Called after every committed revocation.
    pub fn mark_stale(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn fresh(
        &self,
        now: DateTime<Utc>,
        renew_period: chrono::Duration,
    ) -> Option<CertificateRevocationListInfo> {
        let generation = self.generation();
        let guard = match self.current.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .as_ref()
            .filter(|cached| {
                cached.generation == generation && now < cached.info.expires_at - renew_period
            })
            .map(|cached| cached.info.clone())
    }

    fn last_number(&self) -> Option<u64> {
        let guard = match self.current.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_ref().map(|cached| cached.info.number)
    }

    fn publish(&self, info: CertificateRevocationListInfo, generation: u64) {
        let cached = Some(CachedCrl { info, generation });
        match self.current.write() {
            Ok(mut guard) => *guard = cached,
            Err(poisoned) => *poisoned.into_inner() = cached,
        }
    }
}

fn reason(code: u8) -> Option<RevocationReason> {
    match code {
        0 => Some(RevocationReason::Unspecified),
        1 => Some(RevocationReason::KeyCompromise),
        2 => Some(RevocationReason::CaCompromise),
        3 => Some(RevocationReason::AffiliationChanged),
        4 => Some(RevocationReason::Superseded),
        5 => Some(RevocationReason::CessationOfOperation),
        6 => Some(RevocationReason::CertificateHold),
        8 => Some(RevocationReason::RemoveFromCrl),
        9 => Some(RevocationReason::PrivilegeWithdrawn),
        10 => Some(RevocationReason::AaCompromise),
        _ => None,
    }
}

fn offset(at: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| CertplaneError::internal_with_source("timestamp out of range", Box::new(e)))
}

impl Authority {
    /// DER encoding of the current CRL, rebuilding it when stale.
    pub async fn get_certificate_revocation_list(&self) -> Result<Vec<u8>> {
        Ok(self.current_crl().await?.der)
    }

    /// The current CRL as a PEM `X509 CRL` block.
    pub async fn get_certificate_revocation_list_pem(&self) -> Result<String> {
        Ok(pem::encode(&pem::Pem::new("X509 CRL", self.current_crl().await?.der)))
    }

    #[instrument(skip(self), name = "current_crl")]
    pub async fn current_crl(&self) -> Result<CertificateRevocationListInfo> {
        let crl_config = &self.config.crl;
        if !crl_config.enabled {
            return Err(CertplaneError::not_implemented("certificate revocation list is disabled"));
        }

        if let Some(info) = self.crl.fresh(Utc::now(), crl_config.renew_period()) {
            return Ok(info);
        }

        let _rebuilding = self.crl.rebuild.lock().await;
        // Observed before listing, so revocations that land mid-build leave
        // the result stale.
        let generation = self.crl.generation();
        if let Some(info) = self.crl.fresh(Utc::now(), crl_config.renew_period()) {
            return Ok(info);
        }

        let previous = match self.crl.last_number() {
            Some(number) => Some(number),
            None => self.db.get_crl().await?.map(|crl| crl.number),
        };
        let number = previous.map_or(1, |n| n + 1);

        let now = Utc::now();
        let revoked: Vec<RevokedCertificateInfo> = self
            .db
            .get_revoked_certificates()
            .await?
            .into_iter()
            .filter(|entry| entry.expires_at.map_or(true, |expires| expires > now))
            .collect();

        let info = self.build_crl(number, now, &revoked)?;
        self.db.store_crl(&info).await?;
        self.crl.publish(info.clone(), generation);

        metrics::record_crl_generated(revoked.len()).await;
        info!(number, entries = revoked.len(), "Generated certificate revocation list");
        Ok(info)
    }

    fn build_crl(
        &self,
        number: u64,
        now: DateTime<Utc>,
        revoked: &[RevokedCertificateInfo],
    ) -> Result<CertificateRevocationListInfo> {
        let expires_at = now + self.config.crl.validity();

        let revoked_certs = revoked
            .iter()
            .map(|entry| {
                Ok(RevokedCertParams {
                    serial_number: SerialNumber::from_slice(&serial_bytes(&entry.serial)?),
                    revocation_time: offset(entry.revoked_at)?,
                    reason_code: reason(entry.reason_code),
                    invalidity_date: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let params = CertificateRevocationListParams {
            this_update: offset(now)?,
            next_update: offset(expires_at)?,
            crl_number: SerialNumber::from(number),
            issuing_distribution_point: None,
            revoked_certs,
            key_identifier_method: KeyIdMethod::Sha256,
        };
        let crl = self.ca.sign_crl(params)?;

        Ok(CertificateRevocationListInfo {
            number,
            generated_at: now,
            expires_at,
            der: crl.der().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_map_to_crl_reasons() {
        assert_eq!(reason(1), Some(RevocationReason::KeyCompromise));
        assert_eq!(reason(9), Some(RevocationReason::PrivilegeWithdrawn));
        assert_eq!(reason(7), None);
    }

    #[test]
    fn cache_freshness_tracks_generation_and_renewal() {
        let cache = CrlCache::new();
        let now = Utc::now();
        let renew = chrono::Duration::hours(1);
        assert!(cache.fresh(now, renew).is_none());

        let info = CertificateRevocationListInfo {
            number: 3,
            generated_at: now,
            expires_at: now + chrono::Duration::hours(24),
            der: vec![1, 2, 3],
        };
        cache.publish(info.clone(), cache.generation());
        assert_eq!(cache.fresh(now, renew), Some(info));
        assert_eq!(cache.last_number(), Some(3));

        // Inside the renewal window.
        assert!(cache.fresh(now + chrono::Duration::hours(23) + renew, renew).is_none());

        cache.mark_stale();
        assert!(cache.fresh(now, renew).is_none());
        assert_eq!(cache.last_number(), Some(3));
    }
}
