//! # Provisioner Registry
//!
//! [`ProvisionerIndex`] is an immutable snapshot built from configuration.
//! [`ProvisionerRegistry`] publishes the current snapshot behind an `Arc` so
//! readers never hold a lock while they use a provisioner, and a reload swaps
//! in a complete new index or nothing.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tracing::info;

use super::{Provisioner, ProvisionerConfig, ProvisionerType};
use crate::errors::{CertplaneError, Result};

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

/// Lookup tables over one set of provisioners.
#[derive(Debug, Default)]
pub struct ProvisionerIndex {
    by_id: BTreeMap<String, Arc<Provisioner>>,
    by_name: HashMap<String, String>,
    by_key_id: HashMap<String, String>,
}

impl ProvisionerIndex {
    /// Build an index, failing on duplicate IDs, names or key IDs and on
    /// malformed key material.
    pub fn load_all(configs: &[ProvisionerConfig]) -> Result<Self> {
        let mut index = Self::default();

        for config in configs {
            let provisioner = Arc::new(config.build()?);
            let id = provisioner.id.clone();

            if index.by_id.contains_key(&id) {
                return Err(CertplaneError::config(format!("duplicate provisioner id '{}'", id)));
            }
            if index.by_name.contains_key(&provisioner.name) {
                return Err(CertplaneError::config(format!(
                    "duplicate provisioner name '{}'",
                    provisioner.name
                )));
            }

            for key in &provisioner.keys {
                for alias in [key.kid.clone(), format!("{}:{}", provisioner.name, key.kid)] {
                    if index.by_key_id.insert(alias.clone(), id.clone()).is_some() {
                        return Err(CertplaneError::config(format!(
                            "duplicate provisioner key id '{}'",
                            alias
                        )));
                    }
                }
            }

            index.by_name.insert(provisioner.name.clone(), id.clone());
            index.by_id.insert(id, provisioner);
        }

        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Provisioner>> {
        self.by_id.get(id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Provisioner>> {
        self.by_name.get(name).and_then(|id| self.get(id))
    }

    pub fn get_by_key_id(&self, kid: &str) -> Option<Arc<Provisioner>> {
        self.by_key_id.get(kid).and_then(|id| self.get(id))
    }

    /// Provisioner whose tokens carry `iss`, for tokens without a `kid`.
    pub fn get_by_issuer(&self, iss: &str) -> Option<Arc<Provisioner>> {
        self.get_by_name(iss).or_else(|| {
            self.by_id.values().find(|p| p.expected_issuer() == iss).cloned()
        })
    }

    pub fn of_type(&self, provisioner_type: ProvisionerType) -> Vec<Arc<Provisioner>> {
        self.by_id.values().filter(|p| p.provisioner_type == provisioner_type).cloned().collect()
    }

    /// Provisioners ordered by ID, starting after `cursor`.
    pub fn page(&self, cursor: Option<&str>, limit: usize) -> ProvisionerPage {
        let limit = match limit {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };

        let mut remaining = self
            .by_id
            .iter()
            .filter(|(id, _)| cursor.map_or(true, |c| id.as_str() > c))
            .map(|(_, p)| p.clone());

        let provisioners: Vec<_> = remaining.by_ref().take(limit).collect();
        let next_cursor = match remaining.next() {
            Some(_) => provisioners.last().map(|p| p.id.clone()),
            None => None,
        };

        ProvisionerPage { provisioners, next_cursor }
    }
}

/// One page of a provisioner listing.
#[derive(Debug, Clone)]
pub struct ProvisionerPage {
    pub provisioners: Vec<Arc<Provisioner>>,
    pub next_cursor: Option<String>,
}

/// Shared, hot-swappable provisioner set.
#[derive(Debug)]
pub struct ProvisionerRegistry {
    current: RwLock<Arc<ProvisionerIndex>>,
}

impl ProvisionerRegistry {
    pub fn new(index: ProvisionerIndex) -> Self {
        Self { current: RwLock::new(Arc::new(index)) }
    }

    pub fn from_configs(configs: &[ProvisionerConfig]) -> Result<Self> {
        let index = ProvisionerIndex::load_all(configs)?;
        info!(provisioners = index.len(), "Loaded provisioners");
        Ok(Self::new(index))
    }

    /// The current snapshot. Holding it does not block reloads.
    pub fn snapshot(&self) -> Arc<ProvisionerIndex> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the provisioner set. On error the previous set stays active.
    pub fn reload(&self, configs: &[ProvisionerConfig]) -> Result<()> {
        let index = Arc::new(ProvisionerIndex::load_all(configs)?);
        let count = index.len();
        match self.current.write() {
            Ok(mut guard) => *guard = index,
            Err(poisoned) => *poisoned.into_inner() = index,
        }
        info!(provisioners = count, "Reloaded provisioners");
        Ok(())
    }

    pub fn load_by_id(&self, id: &str) -> Result<Arc<Provisioner>> {
        self.snapshot().get(id).ok_or_else(|| CertplaneError::not_found("provisioner", id))
    }

    pub fn load_by_name(&self, name: &str) -> Result<Arc<Provisioner>> {
        self.snapshot()
            .get_by_name(name)
            .ok_or_else(|| CertplaneError::not_found("provisioner", name))
    }

    pub fn load_by_token_key_id(&self, kid: &str) -> Result<Arc<Provisioner>> {
        self.snapshot()
            .get_by_key_id(kid)
            .ok_or_else(|| CertplaneError::not_found("provisioner key", kid))
    }

    pub fn load_by_issuer(&self, iss: &str) -> Result<Arc<Provisioner>> {
        self.snapshot()
            .get_by_issuer(iss)
            .ok_or_else(|| CertplaneError::not_found("provisioner", iss))
    }

    pub fn list(&self, cursor: Option<&str>, limit: usize) -> ProvisionerPage {
        self.snapshot().page(cursor, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::provisioner::TokenKeyConfig;

    fn jwk(name: &str, kid: &str) -> ProvisionerConfig {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut config = ProvisionerConfig::new(name, ProvisionerType::Jwk);
        config.keys.push(TokenKeyConfig {
            kid: kid.to_string(),
            algorithm: "ES256".to_string(),
            pem: Some(key.public_key_pem()),
            jwk: None,
        });
        config
    }

    #[test]
    fn indexes_by_id_name_and_key() {
        let configs = vec![jwk("ops", "k1"), ProvisionerConfig::new("acme", ProvisionerType::Acme)];
        let registry = ProvisionerRegistry::from_configs(&configs).unwrap();

        assert_eq!(registry.load_by_id("jwk/ops").unwrap().name, "ops");
        assert_eq!(registry.load_by_name("acme").unwrap().id, "acme/acme");
        assert_eq!(registry.load_by_token_key_id("k1").unwrap().id, "jwk/ops");
        assert_eq!(registry.load_by_token_key_id("ops:k1").unwrap().id, "jwk/ops");
        assert_eq!(registry.load_by_issuer("ops").unwrap().id, "jwk/ops");
        assert_eq!(registry.snapshot().of_type(ProvisionerType::Acme).len(), 1);
        assert!(registry.snapshot().of_type(ProvisionerType::Mtls).is_empty());

        let err = registry.load_by_id("jwk/missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn duplicates_are_rejected() {
        let dup_name = vec![jwk("ops", "k1"), jwk("ops", "k2")];
        assert!(ProvisionerIndex::load_all(&dup_name).is_err());

        let dup_kid = vec![jwk("ops", "k1"), jwk("dev", "k1")];
        assert!(ProvisionerIndex::load_all(&dup_kid).is_err());

        let mut a = jwk("a", "ka");
        a.id = Some("shared".to_string());
        let mut b = jwk("b", "kb");
        b.id = Some("shared".to_string());
        assert!(ProvisionerIndex::load_all(&[a, b]).is_err());
    }

    #[test]
    fn reload_swaps_snapshot_atomically() {
        let registry = ProvisionerRegistry::from_configs(&[jwk("ops", "k1")]).unwrap();
        let before = registry.snapshot();

        registry.reload(&[jwk("dev", "k2")]).unwrap();
        assert!(registry.load_by_name("ops").is_err());
        assert!(registry.load_by_name("dev").is_ok());
        // A snapshot taken before the reload is unaffected.
        assert!(before.get_by_name("ops").is_some());

        // A failed reload keeps the current set.
        assert!(registry.reload(&[jwk("x", "k3"), jwk("x", "k4")]).is_err());
        assert!(registry.load_by_name("dev").is_ok());
    }

    #[test]
    fn list_pages_by_id() {
        let configs: Vec<_> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|n| ProvisionerConfig::new(*n, ProvisionerType::Acme))
            .collect();
        let registry = ProvisionerRegistry::from_configs(&configs).unwrap();

        let first = registry.list(None, 2);
        let ids: Vec<_> = first.provisioners.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["acme/a", "acme/b"]);
        assert_eq!(first.next_cursor.as_deref(), Some("acme/b"));

        let second = registry.list(first.next_cursor.as_deref(), 2);
        assert_eq!(second.provisioners[0].id, "acme/c");

        let last = registry.list(Some("acme/d"), 2);
        assert_eq!(last.provisioners.len(), 1);
        assert_eq!(last.next_cursor, None);
    }
}
