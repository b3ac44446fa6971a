//! ACME persistence over the key-value store.
//!
//! Creates are store-if-absent and updates are compare-and-swap against the
//! encoded previous value, so a `false` return always means another writer
//! moved the record first.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use super::{AcmeCertificate, Account, Authorization, Challenge, Order};
use crate::domain::{AccountId, AuthorizationId, CertificateId, ChallengeId, OrderId};
use crate::errors::{CertplaneError, Result};
use crate::storage::{buckets, decode, encode, KvStore};

/// Attempts for read-modify-write loops on shared index records.
const INDEX_RETRIES: usize = 16;

#[derive(Debug, Clone)]
pub struct AcmeDb {
    store: Arc<dyn KvStore>,
}

impl AcmeDb {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        bucket: &str,
        key: &str,
        what: &str,
    ) -> Result<Option<T>> {
        self.store.get(bucket, key).await?.map(|bytes| decode(&bytes, what)).transpose()
    }

    async fn create<T: Serialize>(
        &self,
        bucket: &str,
        key: &str,
        value: &T,
        what: &str,
    ) -> Result<bool> {
        let bytes = encode(value, what)?;
        self.store.cmp_and_swap(bucket, key, None, &bytes).await
    }

    async fn update<T: Serialize>(
        &self,
        bucket: &str,
        key: &str,
        old: &T,
        new: &T,
        what: &str,
    ) -> Result<bool> {
        let old = encode(old, what)?;
        let new = encode(new, what)?;
        self.store.cmp_and_swap(bucket, key, Some(&old), &new).await
    }

    /// Insert an account unless its key is already registered. Returns the
    /// stored account and whether this call created it.
    #[instrument(
        skip(self, account),
        fields(account_id = %account.id),
        name = "acme_db_create_account"
    )]
    pub async fn create_account(&self, account: &Account) -> Result<(Account, bool)> {
        if !self.create(buckets::ACME_ACCOUNTS, account.id.as_str(), account, "account").await? {
            return Err(CertplaneError::internal(format!(
                "account id collision for {}",
                account.id
            )));
        }

        let claimed = self
            .store
            .cmp_and_swap(
                buckets::ACME_ACCOUNT_KEYS,
                &account.key_id,
                None,
                account.id.as_str().as_bytes(),
            )
            .await?;
        if claimed {
            return Ok((account.clone(), true));
        }

        // Lost the race for this key; drop our record and hand back the winner.
        self.store.delete(buckets::ACME_ACCOUNTS, account.id.as_str()).await?;
        debug!(key_id = %account.key_id, "Account key already registered");
        let existing = self.get_account_by_key_id(&account.key_id).await?.ok_or_else(|| {
            CertplaneError::internal("account key index points at a missing account")
        })?;
        Ok((existing, false))
    }

    pub async fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        self.get(buckets::ACME_ACCOUNTS, id.as_str(), "account").await
    }

    pub async fn get_account_by_key_id(&self, key_id: &str) -> Result<Option<Account>> {
        let Some(raw_id) = self.store.get(buckets::ACME_ACCOUNT_KEYS, key_id).await? else {
            return Ok(None);
        };
        let id = String::from_utf8(raw_id)
            .map_err(|_| CertplaneError::internal("account key index is not UTF-8"))?;
        self.get_account(&AccountId::from_string(id)).await
    }

    pub async fn update_account(&self, old: &Account, new: &Account) -> Result<bool> {
        self.update(buckets::ACME_ACCOUNTS, old.id.as_str(), old, new, "account").await
    }

    #[instrument(skip(self, order), fields(order_id = %order.id), name = "acme_db_create_order")]
    pub async fn create_order(&self, order: &Order) -> Result<()> {
        if !self.create(buckets::ACME_ORDERS, order.id.as_str(), order, "order").await? {
            return Err(CertplaneError::internal(format!("order id collision for {}", order.id)));
        }

        let key = order.account_id.as_str();
        for _ in 0..INDEX_RETRIES {
            let current = self.store.get(buckets::ACME_ORDERS_BY_ACCOUNT, key).await?;
            let mut ids: Vec<OrderId> = match &current {
                Some(bytes) => decode(bytes, "order index")?,
                None => Vec::new(),
            };
            ids.push(order.id.clone());
            let next = encode(&ids, "order index")?;
            if self
                .store
                .cmp_and_swap(buckets::ACME_ORDERS_BY_ACCOUNT, key, current.as_deref(), &next)
                .await?
            {
                return Ok(());
            }
        }
        Err(CertplaneError::internal("order index contention; giving up"))
    }

    pub async fn get_order(&self, id: &OrderId) -> Result<Option<Order>> {
        self.get(buckets::ACME_ORDERS, id.as_str(), "order").await
    }

    pub async fn update_order(&self, old: &Order, new: &Order) -> Result<bool> {
        self.update(buckets::ACME_ORDERS, old.id.as_str(), old, new, "order").await
    }

    pub async fn list_order_ids(&self, account_id: &AccountId) -> Result<Vec<OrderId>> {
        Ok(self
            .get(buckets::ACME_ORDERS_BY_ACCOUNT, account_id.as_str(), "order index")
            .await?
            .unwrap_or_default())
    }

    pub async fn create_authorization(&self, authz: &Authorization) -> Result<()> {
        if !self.create(buckets::ACME_AUTHZS, authz.id.as_str(), authz, "authorization").await? {
            return Err(CertplaneError::internal(format!(
                "authorization id collision for {}",
                authz.id
            )));
        }
        Ok(())
    }

    pub async fn get_authorization(&self, id: &AuthorizationId) -> Result<Option<Authorization>> {
        self.get(buckets::ACME_AUTHZS, id.as_str(), "authorization").await
    }

    pub async fn update_authorization(
        &self,
        old: &Authorization,
        new: &Authorization,
    ) -> Result<bool> {
        self.update(buckets::ACME_AUTHZS, old.id.as_str(), old, new, "authorization").await
    }

    pub async fn create_challenge(&self, challenge: &Challenge) -> Result<()> {
        if !self
            .create(buckets::ACME_CHALLENGES, challenge.id.as_str(), challenge, "challenge")
            .await?
        {
            return Err(CertplaneError::internal(format!(
                "challenge id collision for {}",
                challenge.id
            )));
        }
        Ok(())
    }

    pub async fn get_challenge(&self, id: &ChallengeId) -> Result<Option<Challenge>> {
        self.get(buckets::ACME_CHALLENGES, id.as_str(), "challenge").await
    }

    pub async fn update_challenge(&self, old: &Challenge, new: &Challenge) -> Result<bool> {
        self.update(buckets::ACME_CHALLENGES, old.id.as_str(), old, new, "challenge").await
    }

    #[instrument(
        skip(self, cert),
        fields(serial = %cert.serial),
        name = "acme_db_create_certificate"
    )]
    pub async fn create_certificate(&self, cert: &AcmeCertificate) -> Result<()> {
        if !self.create(buckets::ACME_CERTS, cert.id.as_str(), cert, "certificate").await? {
            return Err(CertplaneError::internal(format!(
                "certificate id collision for {}",
                cert.id
            )));
        }
        self.store
            .set(buckets::ACME_CERTS_BY_SERIAL, &cert.serial, cert.id.as_str().as_bytes())
            .await
    }

    pub async fn get_certificate(&self, id: &CertificateId) -> Result<Option<AcmeCertificate>> {
        self.get(buckets::ACME_CERTS, id.as_str(), "certificate").await
    }

    pub async fn get_certificate_by_serial(&self, serial: &str) -> Result<Option<AcmeCertificate>> {
        let Some(raw_id) = self.store.get(buckets::ACME_CERTS_BY_SERIAL, serial).await? else {
            return Ok(None);
        };
        let id = String::from_utf8(raw_id)
            .map_err(|_| CertplaneError::internal("certificate serial index is not UTF-8"))?;
        self.get_certificate(&CertificateId::from_string(id)).await
    }

    /// Whether a key fingerprint already backs an issued certificate.
    pub async fn is_key_used(&self, fingerprint: &str) -> Result<bool> {
        Ok(self.store.get(buckets::ACME_CERT_KEYS, fingerprint).await?.is_some())
    }

    /// Remember a key fingerprint. Returns `false` if it was already recorded.
    pub async fn record_key(
        &self,
        fingerprint: &str,
        certificate_id: &CertificateId,
    ) -> Result<bool> {
        self.store
            .cmp_and_swap(
                buckets::ACME_CERT_KEYS,
                fingerprint,
                None,
                certificate_id.as_str().as_bytes(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::AccountStatus;
    use crate::storage::MemoryKvStore;
    use chrono::Utc;

    fn account(key_id: &str) -> Account {
        Account {
            id: AccountId::new(),
            key: serde_json::json!({"kty": "OKP", "crv": "Ed25519", "x": key_id}),
            key_id: key_id.to_string(),
            contact: vec![],
            status: AccountStatus::Valid,
            terms_of_service_agreed: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn second_account_for_key_returns_first() {
        let db = AcmeDb::new(Arc::new(MemoryKvStore::new()));
        let first = account("k1");
        let (stored, created) = db.create_account(&first).await.unwrap();
        assert!(created);
        assert_eq!(stored.id, first.id);

        let second = account("k1");
        let (stored, created) = db.create_account(&second).await.unwrap();
        assert!(!created);
        assert_eq!(stored.id, first.id);
        assert!(db.get_account(&second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_update_is_refused() {
        let db = AcmeDb::new(Arc::new(MemoryKvStore::new()));
        let (original, _) = db.create_account(&account("k2")).await.unwrap();

        let mut deactivated = original.clone();
        deactivated.status = AccountStatus::Deactivated;
        assert!(db.update_account(&original, &deactivated).await.unwrap());

        let mut contact = original.clone();
        contact.contact = vec!["mailto:late@example.com".to_string()];
        assert!(!db.update_account(&original, &contact).await.unwrap());

        let current = db.get_account(&original.id).await.unwrap().unwrap();
        assert_eq!(current.status, AccountStatus::Deactivated);
    }

    #[tokio::test]
    async fn key_fingerprints_record_once() {
        let db = AcmeDb::new(Arc::new(MemoryKvStore::new()));
        let cert = CertificateId::new();
        assert!(!db.is_key_used("fp").await.unwrap());
        assert!(db.record_key("fp", &cert).await.unwrap());
        assert!(!db.record_key("fp", &CertificateId::new()).await.unwrap());
        assert!(db.is_key_used("fp").await.unwrap());
    }
}
