//! Startup wiring: storage backend, authority database, provisioner
//! registry, the authority itself and the ACME service.

use std::sync::Arc;

use tracing::{info, warn};

use crate::acme::validation::StaticValidator;
use crate::acme::{AcmeDb, AcmeService, ChallengeValidator};
use crate::authority::Authority;
use crate::config::{AppConfig, DatabaseConfig, StorageBackend};
use crate::db::{AuthDb, KvAuthDb, SimpleDb};
use crate::errors::Result;
use crate::provisioner::ProvisionerRegistry;
use crate::storage::{create_pool, KvStore, MemoryKvStore, SqlxKvStore};

/// Long-lived services shared by the HTTP layer.
#[derive(Debug, Clone)]
pub struct Services {
    pub authority: Arc<Authority>,
    pub acme: AcmeService,
}

/// Open the key-value store selected by `config.backend`.
pub async fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn KvStore>> {
    match config.backend {
        StorageBackend::Sqlite => {
            let pool = create_pool(config).await?;
            Ok(Arc::new(SqlxKvStore::new(pool)))
        }
        StorageBackend::Memory | StorageBackend::Simple => Ok(Arc::new(MemoryKvStore::new())),
    }
}

/// Build every service from configuration.
///
/// ACME state always lives in `store`; the authority database is the minimal
/// replay-only implementation when the `simple` backend is selected.
pub async fn build_services(
    config: &AppConfig,
    validator: Option<Arc<dyn ChallengeValidator>>,
) -> Result<Services> {
    let store = open_store(&config.database).await?;

    let auth_db: Arc<dyn AuthDb> = match config.database.backend {
        StorageBackend::Simple => {
            warn!("Simple database selected; revocation and CRL are unavailable");
            Arc::new(SimpleDb::new())
        }
        _ => Arc::new(KvAuthDb::new(Arc::clone(&store))),
    };

    let registry = Arc::new(ProvisionerRegistry::from_configs(&config.provisioners)?);
    info!(provisioners = registry.snapshot().len(), "Provisioner registry loaded");

    let authority = Arc::new(Authority::new(config.authority.clone(), registry, auth_db)?);

    let validator = validator.unwrap_or_else(|| {
        if config.authority.dev_mode {
            Arc::new(StaticValidator::accept_all())
        } else {
            Arc::new(StaticValidator::reject_all("no challenge validator is configured"))
        }
    });
    let acme = AcmeService::new(
        Arc::clone(&authority),
        AcmeDb::new(store),
        config.acme.clone(),
        validator,
    );

    Ok(Services { authority, acme })
}
