//! Shared fixtures for the integration suites: an in-memory authority with a
//! generated CA, a JWK provisioner that can mint tokens, CSR generation and a
//! challenge validator driven by the test.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use certplane::acme::validation::ValidationRequest;
use certplane::acme::{
    Account, AcmeDb, AcmeService, Challenge, ChallengeStatus, ChallengeValidator,
    ValidationOutcome,
};
use certplane::authority::{Authority, CertificateAuthority};
use certplane::config::{AcmeConfig, AuthorityConfig};
use certplane::db::{AuthDb, KvAuthDb};
use certplane::domain::ChallengeId;
use certplane::provisioner::{
    ProvisionerConfig, ProvisionerRegistry, ProvisionerType, TokenKeyConfig,
};
use certplane::storage::{KvStore, MemoryKvStore};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rand::RngCore;
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use serde_json::{json, Value};

pub const SIGN_AUDIENCE: &str = "certplane/sign";
pub const REVOKE_AUDIENCE: &str = "certplane/revoke";

/// An ES256 key registered on a JWK provisioner, able to mint tokens.
pub struct TokenSigner {
    pub name: String,
    pub kid: String,
    encoding_key: EncodingKey,
    pub config: ProvisionerConfig,
}

impl TokenSigner {
    pub fn new(name: &str) -> Self {
        let key = KeyPair::generate().expect("generate token key");
        let kid = format!("{}-key", name);
        let mut config = ProvisionerConfig::new(name, ProvisionerType::Jwk);
        config.keys.push(TokenKeyConfig {
            kid: kid.clone(),
            algorithm: "ES256".to_string(),
            pem: Some(key.public_key_pem()),
            jwk: None,
        });
        Self {
            name: name.to_string(),
            kid,
            encoding_key: EncodingKey::from_ec_pem(key.serialize_pem().as_bytes())
                .expect("encoding key"),
            config,
        }
    }

    /// Sign arbitrary claims with this provisioner's key.
    pub fn sign_claims(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.kid.clone());
        encode(&header, claims, &self.encoding_key).expect("sign token")
    }

    /// A signing token for `sub` valid for five minutes.
    pub fn sign_token(&self, sub: &str, sans: &[&str]) -> String {
        self.sign_claims(&json!({
            "iss": self.name,
            "sub": sub,
            "aud": SIGN_AUDIENCE,
            "exp": now() + 300,
            "jti": unique_id(),
            "sans": sans,
        }))
    }

    /// A revocation token whose subject is `serial`.
    pub fn revoke_token(&self, serial: &str) -> String {
        self.sign_claims(&json!({
            "iss": self.name,
            "sub": serial,
            "aud": REVOKE_AUDIENCE,
            "exp": now() + 300,
            "jti": unique_id(),
        }))
    }
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn unique_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// In-memory authority over `store` with a freshly generated CA.
pub fn authority_with_store(
    provisioners: &[ProvisionerConfig],
    store: Arc<dyn KvStore>,
) -> Arc<Authority> {
    let registry = Arc::new(ProvisionerRegistry::from_configs(provisioners).expect("registry"));
    let db: Arc<dyn AuthDb> = Arc::new(KvAuthDb::new(store));
    let ca = CertificateAuthority::generate("certplane test").expect("generate CA");
    Arc::new(Authority::with_ca(AuthorityConfig::default(), registry, db, ca))
}

pub fn authority(provisioners: &[ProvisionerConfig]) -> Arc<Authority> {
    authority_with_store(provisioners, Arc::new(MemoryKvStore::new()))
}

/// A DER CSR naming exactly `names` (no common name) and the key behind it.
pub fn csr(names: &[&str]) -> (Vec<u8>, KeyPair) {
    let key = KeyPair::generate().expect("generate CSR key");
    let csr = csr_with_key(names, &key);
    (csr, key)
}

pub fn csr_with_key(names: &[&str], key: &KeyPair) -> Vec<u8> {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let mut params = CertificateParams::new(names).expect("CSR params");
    params.distinguished_name = DistinguishedName::new();
    params.serialize_request(key).expect("serialize CSR").der().to_vec()
}

/// A syntactically valid P-256 JWK. Account keys are only thumbprinted, so
/// random coordinates are enough.
pub fn account_jwk() -> Value {
    let mut x = [0u8; 32];
    let mut y = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut x);
    rand::thread_rng().fill_bytes(&mut y);
    json!({
        "kty": "EC",
        "crv": "P-256",
        "x": URL_SAFE_NO_PAD.encode(x),
        "y": URL_SAFE_NO_PAD.encode(y),
    })
}

/// Validator whose verdicts are queued by the test. Falls back to `Valid`
/// once the queue is empty, and can be told to stall past the timeout.
#[derive(Debug, Default)]
pub struct ScriptedValidator {
    outcomes: Mutex<VecDeque<ValidationOutcome>>,
    requests: Mutex<Vec<ValidationRequest>>,
    stall: Mutex<Option<Duration>>,
}

impl ScriptedValidator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, outcome: ValidationOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn stall_for(&self, delay: Duration) {
        *self.stall.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<ValidationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChallengeValidator for ScriptedValidator {
    async fn validate(&self, request: &ValidationRequest) -> ValidationOutcome {
        self.requests.lock().unwrap().push(request.clone());
        let stall = *self.stall.lock().unwrap();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        self.outcomes.lock().unwrap().pop_front().unwrap_or(ValidationOutcome::Valid)
    }
}

/// An ACME service with an `acme` provisioner and the given validator.
pub struct AcmeHarness {
    pub service: AcmeService,
    pub validator: Arc<ScriptedValidator>,
}

pub fn acme_harness(config: AcmeConfig) -> AcmeHarness {
    let validator = ScriptedValidator::new();
    let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let authority = authority_with_store(
        &[ProvisionerConfig::new("acme", ProvisionerType::Acme)],
        Arc::clone(&store),
    );
    let service = AcmeService::new(
        authority,
        AcmeDb::new(store),
        config,
        Arc::clone(&validator) as Arc<dyn ChallengeValidator>,
    );
    AcmeHarness { service, validator }
}

/// Poll until the challenge leaves `processing`, or panic after two seconds.
pub async fn settled_challenge(
    service: &AcmeService,
    account: &Account,
    id: &ChallengeId,
) -> Challenge {
    for _ in 0..200 {
        let challenge = service.get_challenge(account, id).await.expect("get challenge");
        if challenge.status != ChallengeStatus::Processing {
            return challenge;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("challenge {} never left processing", id);
}
