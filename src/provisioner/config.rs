//! Provisioner configuration as it appears in the settings file, and its
//! conversion into a loaded [`Provisioner`].

use std::path::PathBuf;
use std::str::FromStr;

use jsonwebtoken::{jwk::Jwk, Algorithm, DecodingKey};
use rustls::pki_types::{pem::PemObject, CertificateDer};
use serde::{Deserialize, Serialize};

use super::{NamePolicy, Provisioner, ProvisionerClaims, ProvisionerType, TokenKey};
use crate::errors::{CertplaneError, Result};

fn default_min_rsa_key_bits() -> usize {
    2048
}

/// One provisioner entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Stable identifier; derived from type and name when omitted
    #[serde(default)]
    pub id: Option<String>,

    pub name: String,

    #[serde(rename = "type")]
    pub provisioner_type: ProvisionerType,

    /// Token verification keys (JWK and OIDC)
    #[serde(default)]
    pub keys: Vec<TokenKeyConfig>,

    /// Expected token issuer (OIDC)
    #[serde(default)]
    pub issuer: Option<String>,

    /// Inline PEM bundle of trusted client roots (MTLS)
    #[serde(default)]
    pub roots: Option<String>,

    /// PEM file of trusted client roots (MTLS)
    #[serde(default)]
    pub roots_file: Option<PathBuf>,

    #[serde(default)]
    pub claims: ProvisionerClaims,

    #[serde(default)]
    pub policy: NamePolicy,

    #[serde(default = "default_min_rsa_key_bits")]
    pub min_rsa_key_bits: usize,
}

/// A token verification key, given either as a PEM public key or a JWK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenKeyConfig {
    pub kid: String,
    /// JWS algorithm name, e.g. `ES256`
    pub algorithm: String,
    #[serde(default)]
    pub pem: Option<String>,
    #[serde(default)]
    pub jwk: Option<serde_json::Value>,
}

impl ProvisionerConfig {
    pub fn new<S: Into<String>>(name: S, provisioner_type: ProvisionerType) -> Self {
        Self {
            id: None,
            name: name.into(),
            provisioner_type,
            keys: Vec::new(),
            issuer: None,
            roots: None,
            roots_file: None,
            claims: ProvisionerClaims::default(),
            policy: NamePolicy::default(),
            min_rsa_key_bits: default_min_rsa_key_bits(),
        }
    }

    /// Explicit ID or `"{type}/{name}"`, lowercased.
    pub fn provisioner_id(&self) -> String {
        match &self.id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => format!("{}/{}", self.provisioner_type, self.name).to_lowercase(),
        }
    }

    /// Parse key material and build the runtime provisioner.
    pub fn build(&self) -> Result<Provisioner> {
        let id = self.provisioner_id();
        let invalid = |message: String| {
            CertplaneError::config(format!("provisioner '{}': {}", self.name, message))
        };

        if self.name.trim().is_empty() {
            return Err(CertplaneError::config("provisioner name cannot be empty"));
        }
        self.claims.check().map_err(invalid)?;

        let keys = self
            .keys
            .iter()
            .map(|key| key.build().map_err(|e| invalid(e.to_string())))
            .collect::<Result<Vec<_>>>()?;

        let mut roots = Vec::new();
        if let Some(pem) = &self.roots {
            roots.extend(parse_roots(pem.as_bytes()).map_err(invalid)?);
        }
        if let Some(path) = &self.roots_file {
            let bytes = std::fs::read(path)
                .map_err(|e| invalid(format!("cannot read {}: {}", path.display(), e)))?;
            roots.extend(parse_roots(&bytes).map_err(invalid)?);
        }

        match self.provisioner_type {
            ProvisionerType::Jwk | ProvisionerType::Oidc if keys.is_empty() => {
                return Err(invalid("at least one token key is required".to_string()));
            }
            ProvisionerType::Mtls if roots.is_empty() => {
                return Err(invalid("at least one trusted root is required".to_string()));
            }
            _ => {}
        }

        Ok(Provisioner {
            id,
            name: self.name.clone(),
            provisioner_type: self.provisioner_type,
            keys,
            roots,
            issuer: self.issuer.clone(),
            claims: self.claims.clone(),
            policy: self.policy.clone(),
            min_rsa_key_bits: self.min_rsa_key_bits,
        })
    }
}

fn parse_roots(pem: &[u8]) -> std::result::Result<Vec<Vec<u8>>, String> {
    let roots: Vec<Vec<u8>> = CertificateDer::pem_slice_iter(pem)
        .map(|cert| cert.map(|c| c.to_vec()).map_err(|e| format!("invalid root PEM: {}", e)))
        .collect::<std::result::Result<_, _>>()?;
    if roots.is_empty() {
        return Err("root bundle contains no certificates".to_string());
    }
    for der in &roots {
        x509_parser::parse_x509_certificate(der)
            .map_err(|e| format!("invalid root certificate: {}", e))?;
    }
    Ok(roots)
}

impl TokenKeyConfig {
    pub fn build(&self) -> Result<TokenKey> {
        let algorithm = Algorithm::from_str(&self.algorithm).map_err(|_| {
            CertplaneError::config(format!(
                "key '{}': unknown algorithm {}",
                self.kid, self.algorithm
            ))
        })?;

        let decoding_key = match (&self.pem, &self.jwk) {
            (Some(pem), None) => decoding_key_from_pem(algorithm, pem.as_bytes()),
            (None, Some(jwk)) => serde_json::from_value::<Jwk>(jwk.clone())
                .map_err(|e| e.to_string())
                .and_then(|jwk| DecodingKey::from_jwk(&jwk).map_err(|e| e.to_string())),
            _ => Err("exactly one of pem or jwk must be set".to_string()),
        }
        .map_err(|e| CertplaneError::config(format!("key '{}': {}", self.kid, e)))?;

        Ok(TokenKey { kid: self.kid.clone(), algorithm, decoding_key })
    }
}

fn decoding_key_from_pem(
    algorithm: Algorithm,
    pem: &[u8],
) -> std::result::Result<DecodingKey, String> {
    let key = match algorithm {
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem),
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem),
        Algorithm::EdDSA => DecodingKey::from_ed_pem(pem),
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            return Err("symmetric algorithms are not accepted for provisioner keys".to_string())
        }
    };
    key.map_err(|e| format!("invalid public key: {}", e))
}
