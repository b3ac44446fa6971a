//! Minimal [`AuthDb`] that only protects against token replay.
//!
//! Used when the authority runs without a persistent store: tokens are
//! tracked in memory for the lifetime of the process, nothing is ever
//! reported revoked, and every other operation is unavailable.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};

use super::{
    AuthDb, CertificateData, CertificateRevocationListInfo, RevokedCertificateInfo, UsedToken,
};
use crate::errors::{CertplaneError, Result};

#[derive(Debug, Default)]
pub struct SimpleDb {
    used_tokens: DashMap<String, UsedToken>,
}

impl SimpleDb {
    pub fn new() -> Self {
        Self::default()
    }
}

fn unavailable(operation: &str) -> CertplaneError {
    CertplaneError::not_implemented(format!(
        "{} is not supported by the simple database",
        operation
    ))
}

#[async_trait]
impl AuthDb for SimpleDb {
    async fn use_token(&self, id: &str, token: &str) -> Result<bool> {
        match self.used_tokens.entry(id.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(UsedToken {
                    id: id.to_string(),
                    token: token.to_string(),
                    used_at: Utc::now(),
                });
                Ok(true)
            }
        }
    }

    async fn is_revoked(&self, _serial: &str) -> Result<bool> {
        Ok(false)
    }

    async fn revoke(&self, _info: &RevokedCertificateInfo) -> Result<()> {
        Err(unavailable("revoke"))
    }

    async fn get_revoked_certificates(&self) -> Result<Vec<RevokedCertificateInfo>> {
        Err(unavailable("get_revoked_certificates"))
    }

    async fn get_crl(&self) -> Result<Option<CertificateRevocationListInfo>> {
        Err(unavailable("get_crl"))
    }

    async fn store_crl(&self, _crl: &CertificateRevocationListInfo) -> Result<()> {
        Err(unavailable("store_crl"))
    }

    async fn store_certificate_data(&self, _data: &CertificateData) -> Result<()> {
        Err(unavailable("store_certificate_data"))
    }

    async fn get_certificate_data(&self, _serial: &str) -> Result<Option<CertificateData>> {
        Err(unavailable("get_certificate_data"))
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
