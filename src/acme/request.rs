//! Decoded JWS payloads.
//!
//! Account updates tolerate unknown members; every other request rejects them.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{AcmeError, AcmeResult, Identifier};

/// The verified payload of a JWS-authenticated request. An empty payload is a
/// POST-as-GET.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn post_as_get() -> Self {
        Self(Vec::new())
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self(value.to_string().into_bytes())
    }

    pub fn is_post_as_get(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parse<T: DeserializeOwned>(&self) -> AcmeResult<T> {
        serde_json::from_slice(&self.0)
            .map_err(|e| AcmeError::malformed(format!("failed to parse payload: {}", e)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewAccountRequest {
    #[serde(default)]
    pub contact: Vec<String>,
    #[serde(default)]
    pub only_return_existing: bool,
    #[serde(default)]
    pub terms_of_service_agreed: bool,
    /// Accepted and ignored
    #[serde(default)]
    pub external_account_binding: Option<serde_json::Value>,
}

impl NewAccountRequest {
    pub fn validate(&self) -> AcmeResult<()> {
        if self.only_return_existing && !self.contact.is_empty() {
            return Err(AcmeError::malformed(
                "incompatible input; onlyReturnExisting must be alone",
            ));
        }
        validate_contacts(&self.contact)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountRequest {
    pub contact: Option<Vec<String>>,
    pub status: Option<String>,
}

impl UpdateAccountRequest {
    /// The new contact list; an empty list counts as no update.
    pub fn contact_update(&self) -> Option<&[String]> {
        self.contact.as_deref().filter(|contact| !contact.is_empty())
    }

    pub fn status_update(&self) -> Option<&str> {
        self.status.as_deref().filter(|status| !status.is_empty())
    }

    pub fn validate(&self) -> AcmeResult<()> {
        match (self.contact_update(), self.status_update()) {
            (Some(_), Some(_)) => Err(AcmeError::malformed(
                "incompatible input; contact and status updates are mutually exclusive",
            )),
            (Some(contact), None) => validate_contacts(contact),
            (None, Some(status)) if status != "deactivated" => Err(AcmeError::malformed(format!(
                "cannot update account status to '{}'; only 'deactivated' is allowed",
                status
            ))),
            _ => Ok(()),
        }
    }
}

fn validate_contacts(contact: &[String]) -> AcmeResult<()> {
    for (i, entry) in contact.iter().enumerate() {
        if entry.trim().is_empty() {
            return Err(AcmeError::malformed(format!("contact {} is empty", i)));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewOrderRequest {
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub not_after: Option<DateTime<Utc>>,
}

impl NewOrderRequest {
    pub fn validate(&self) -> AcmeResult<()> {
        if self.identifiers.is_empty() {
            return Err(AcmeError::malformed("identifiers list cannot be empty"));
        }
        if let (Some(nb), Some(na)) = (self.not_before, self.not_after) {
            if na <= nb {
                return Err(AcmeError::malformed("notAfter must be after notBefore"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FinalizeRequest {
    /// base64url DER CSR
    pub csr: String,
}

impl FinalizeRequest {
    pub fn csr_der(&self) -> AcmeResult<Vec<u8>> {
        decode_b64url(&self.csr).map_err(|_| AcmeError::malformed("csr is not base64url"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateAuthorizationRequest {
    pub status: String,
}

/// Challenge responses carry an empty object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChallengeRequest {}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RevokeCertificateRequest {
    /// base64url DER certificate
    pub certificate: String,
    #[serde(default)]
    pub reason: Option<i32>,
}

impl RevokeCertificateRequest {
    pub fn certificate_der(&self) -> AcmeResult<Vec<u8>> {
        decode_b64url(&self.certificate)
            .map_err(|_| AcmeError::malformed("certificate is not base64url"))
    }
}

/// Accepts padded or unpadded input.
fn decode_b64url(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(value.trim_end_matches('='))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_account_rules() {
        let only_existing: NewAccountRequest = Payload::json(&json!({
            "onlyReturnExisting": true,
            "contact": ["mailto:a@example.com"]
        }))
        .parse()
        .unwrap();
        assert!(only_existing.validate().is_err());

        let empty_contact: NewAccountRequest =
            Payload::json(&json!({"contact": ["mailto:a@example.com", " "]})).parse().unwrap();
        assert!(empty_contact.validate().unwrap_err().detail.contains("contact 1"));

        let with_eab: NewAccountRequest =
            Payload::json(&json!({"termsOfServiceAgreed": true, "externalAccountBinding": {}}))
                .parse()
                .unwrap();
        assert!(with_eab.validate().is_ok());

        assert!(Payload::json(&json!({"bogus": 1})).parse::<NewAccountRequest>().is_err());
    }

    #[test]
    fn update_account_rules() {
        let both: UpdateAccountRequest =
            Payload::json(&json!({"contact": ["mailto:a@example.com"], "status": "deactivated"}))
                .parse()
                .unwrap();
        assert_eq!(both.validate().unwrap_err().status, 400);

        let empty_contact: UpdateAccountRequest =
            Payload::json(&json!({"contact": [], "status": "deactivated"})).parse().unwrap();
        assert!(empty_contact.validate().is_ok());
        assert_eq!(empty_contact.contact_update(), None);
        assert_eq!(empty_contact.status_update(), Some("deactivated"));

        let revoke: UpdateAccountRequest =
            Payload::json(&json!({"status": "revoked"})).parse().unwrap();
        assert!(revoke.validate().is_err());

        let unknown: UpdateAccountRequest =
            Payload::json(&json!({"status": "deactivated", "orders": "x"})).parse().unwrap();
        assert!(unknown.validate().is_ok());
    }

    #[test]
    fn strict_payloads_reject_unknown_fields() {
        let extra = Payload::json(&json!({"csr": "AA", "extra": 1}));
        assert!(extra.parse::<FinalizeRequest>().is_err());
        assert!(Payload::json(&json!({"extra": 1})).parse::<ChallengeRequest>().is_err());
        assert!(Payload::json(&json!({})).parse::<ChallengeRequest>().is_ok());
        assert!(Payload::post_as_get().parse::<ChallengeRequest>().is_err());
    }

    #[test]
    fn new_order_rules() {
        let empty: NewOrderRequest = Payload::json(&json!({"identifiers": []})).parse().unwrap();
        assert!(empty.validate().is_err());

        let backwards: NewOrderRequest = Payload::json(&json!({
            "identifiers": [{"type": "dns", "value": "a.example.com"}],
            "notBefore": "2030-01-02T00:00:00Z",
            "notAfter": "2030-01-01T00:00:00Z"
        }))
        .parse()
        .unwrap();
        assert!(backwards.validate().is_err());

        let unknown_type =
            Payload::json(&json!({"identifiers": [{"type": "email", "value": "x"}]}));
        assert!(unknown_type.parse::<NewOrderRequest>().is_err());
    }

    #[test]
    fn base64_fields_accept_padding() {
        let req = FinalizeRequest { csr: "AQI=".to_string() };
        assert_eq!(req.csr_der().unwrap(), vec![1, 2]);
        let req = FinalizeRequest { csr: "%%".to_string() };
        assert!(req.csr_der().is_err());
    }
}
