//! JWK thumbprints (RFC 7638).

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{AcmeError, AcmeResult};

fn required_members(kty: &str) -> AcmeResult<&'static [&'static str]> {
    match kty {
        "EC" => Ok(&["crv", "kty", "x", "y"]),
        "RSA" => Ok(&["e", "kty", "n"]),
        "OKP" => Ok(&["crv", "kty", "x"]),
        other => Err(AcmeError::bad_public_key(format!("unsupported key type '{}'", other))),
    }
}

/// SHA-256 thumbprint of a public JWK, base64url without padding.
///
/// Only the required members take part, serialized in lexicographic order
/// with no whitespace, so the same key always yields the same thumbprint.
pub fn thumbprint(jwk: &Value) -> AcmeResult<String> {
    let kty = jwk
        .get("kty")
        .and_then(Value::as_str)
        .ok_or_else(|| AcmeError::malformed("JWK has no 'kty' member"))?;

    let mut members = BTreeMap::new();
    for name in required_members(kty)? {
        let value = jwk.get(*name).and_then(Value::as_str).ok_or_else(|| {
            AcmeError::malformed(format!("JWK is missing required member '{}'", name))
        })?;
        members.insert(*name, value);
    }

    let canonical = serde_json::to_vec(&members)
        .map_err(|e| AcmeError::server_internal(format!("cannot encode JWK: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(&canonical)))
}

/// Key authorization string a challenge response must carry.
pub fn key_authorization(token: &str, jwk: &Value) -> AcmeResult<String> {
    Ok(format!("{}.{}", token, thumbprint(jwk)?))
}
