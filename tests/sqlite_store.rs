//! Authority state persisted through the SQLite store survives a reopen.

#![cfg(feature = "sqlite_tests")]

mod common;

use std::sync::Arc;

use certplane::authority::{AuthorizeMethod, Credential, RevokeOptions};
use certplane::config::{DatabaseConfig, StorageBackend};
use certplane::errors::ErrorKind;
use certplane::startup::open_store;
use certplane::storage::KvStore;
use common::{authority_with_store, csr, TokenSigner};

fn sqlite_config(dir: &tempfile::TempDir) -> DatabaseConfig {
    DatabaseConfig {
        backend: StorageBackend::Sqlite,
        url: format!("sqlite://{}", dir.path().join("certplane.db").display()),
        max_connections: 4,
        min_connections: 1,
        auto_migrate: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn used_tokens_and_revocations_persist() {
    let dir = tempfile::tempdir().unwrap();
    let signer = TokenSigner::new("ops");
    let token = signer.sign_token("db.example.com", &[]);

    let store: Arc<dyn KvStore> = open_store(&sqlite_config(&dir)).await.unwrap();
    let authority = authority_with_store(&[signer.config.clone()], Arc::clone(&store));
    let options = authority
        .authorize(&Credential::Token(token.clone()), AuthorizeMethod::Sign)
        .await
        .unwrap();
    let (csr_der, _key) = csr(&["db.example.com"]);
    let issued = authority.sign(&csr_der, &options).await.unwrap();

    let granted = authority
        .authorize(
            &Credential::Token(signer.revoke_token(&issued.serial)),
            AuthorizeMethod::Revoke { serial: &issued.serial },
        )
        .await
        .unwrap();
    let revoke = RevokeOptions {
        serial: issued.serial.clone(),
        passive: true,
        provisioner_id: granted.provisioner().map(|p| p.id.clone()),
        ..Default::default()
    };
    authority.revoke(&revoke).await.unwrap();
    store.close().await.unwrap();

    let reopened = open_store(&sqlite_config(&dir)).await.unwrap();
    let authority = authority_with_store(&[signer.config.clone()], reopened);

    let replay = authority.authorize(&Credential::Token(token), AuthorizeMethod::Sign).await;
    assert_eq!(replay.unwrap_err().kind(), ErrorKind::ReplayedToken);
    assert!(authority.is_revoked(&issued.serial).await.unwrap());
}
