//! One-time token verification for JWK and OIDC provisioners.

use jsonwebtoken::{decode, decode_header, DecodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Provisioner;
use crate::errors::{CertplaneError, Result};

/// Claims carried by a provisioning token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Names the token holder may request; defaults to `sub` when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sans: Vec<String>,
}

impl TokenClaims {
    pub fn allowed_names(&self) -> Vec<String> {
        if self.sans.is_empty() {
            vec![self.sub.clone()]
        } else {
            self.sans.clone()
        }
    }
}

#[derive(Debug, Deserialize)]
struct UnverifiedClaims {
    #[serde(default)]
    iss: Option<String>,
}

/// Replay-protection key for a token: its `jti`, or the hex SHA-256 of the
/// raw token when it carries none.
pub fn token_id(claims: &TokenClaims, token: &str) -> String {
    match claims.jti.as_deref() {
        Some(jti) if !jti.is_empty() => jti.to_string(),
        _ => hex::encode(Sha256::digest(token.as_bytes())),
    }
}

/// Decode the header without verifying anything.
pub fn peek_header(token: &str) -> Result<Header> {
    decode_header(token)
        .map_err(|e| CertplaneError::unauthorized(format!("error parsing token: {}", e)))
}

/// Read `iss` without verifying the signature. Only used to pick the
/// provisioner whose key then verifies the token.
pub fn peek_issuer(token: &str, header: &Header) -> Result<String> {
    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<UnverifiedClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| CertplaneError::unauthorized(format!("error parsing token: {}", e)))?;

    data.claims
        .iss
        .filter(|iss| !iss.is_empty())
        .ok_or_else(|| CertplaneError::unauthorized("token has no kid and no issuer"))
}

/// Verify a token against a provisioner's keys, audience and issuer.
pub fn verify(
    provisioner: &Provisioner,
    token: &str,
    header: &Header,
    audience: &str,
    leeway: u64,
) -> Result<TokenClaims> {
    if !provisioner.provisioner_type.uses_tokens() {
        return Err(CertplaneError::unauthorized(format!(
            "provisioner '{}' does not accept tokens",
            provisioner.name
        )));
    }

    let candidates: Vec<_> = provisioner
        .keys_for(header.kid.as_deref())
        .into_iter()
        .filter(|key| key.algorithm == header.alg)
        .collect();

    if candidates.is_empty() {
        return Err(CertplaneError::unauthorized(format!(
            "no {:?} key on provisioner '{}' matches the token",
            header.alg, provisioner.name
        )));
    }

    let mut last_error = None;
    for key in candidates {
        let mut validation = Validation::new(key.algorithm);
        validation.leeway = leeway;
        validation.validate_nbf = true;
        validation.set_audience(&[audience]);
        validation.set_issuer(&[provisioner.expected_issuer()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        match decode::<TokenClaims>(token, &key.decoding_key, &validation) {
            Ok(data) => return Ok(data.claims),
            Err(e) => last_error = Some(e),
        }
    }

    Err(CertplaneError::unauthorized(match last_error {
        Some(e) => format!("invalid token: {}", e),
        None => "invalid token".to_string(),
    }))
}
