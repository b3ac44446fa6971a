//! The provisioner extension embedded in every issued certificate.
//!
//! ```text
//! ProvisionerExtension ::= SEQUENCE {
//!     type          UTF8String,
//!     id            UTF8String,
//!     name          UTF8String,
//!     credentialId  UTF8String }
//! ```

use simple_asn1::{from_der, to_der, ASN1Block};
use x509_parser::prelude::*;

use super::Provisioner;
use crate::errors::{CertplaneError, Result};

/// OID of the non-critical provisioner extension.
pub const PROVISIONER_EXTENSION_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 59999, 1, 1];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerExtension {
    pub provisioner_type: String,
    pub id: String,
    pub name: String,
    /// Key ID or subject that authenticated the request
    pub credential_id: String,
}

impl ProvisionerExtension {
    pub fn for_provisioner(provisioner: &Provisioner, credential_id: impl Into<String>) -> Self {
        Self {
            provisioner_type: provisioner.provisioner_type.as_str().to_string(),
            id: provisioner.id.clone(),
            name: provisioner.name.clone(),
            credential_id: credential_id.into(),
        }
    }

    pub fn oid_string() -> String {
        PROVISIONER_EXTENSION_OID.iter().map(u64::to_string).collect::<Vec<_>>().join(".")
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        let block = ASN1Block::Sequence(
            0,
            vec![
                ASN1Block::UTF8String(0, self.provisioner_type.clone()),
                ASN1Block::UTF8String(0, self.id.clone()),
                ASN1Block::UTF8String(0, self.name.clone()),
                ASN1Block::UTF8String(0, self.credential_id.clone()),
            ],
        );
        to_der(&block).map_err(|e| {
            CertplaneError::crypto_with_source(
                "Failed to encode provisioner extension",
                Box::new(e),
            )
        })
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        let malformed = || CertplaneError::crypto("Malformed provisioner extension");

        let blocks = from_der(der).map_err(|e| {
            CertplaneError::crypto_with_source(
                "Failed to decode provisioner extension",
                Box::new(e),
            )
        })?;

        let items = match blocks.as_slice() {
            [ASN1Block::Sequence(_, items)] => items,
            _ => return Err(malformed()),
        };

        match items.as_slice() {
            [
                ASN1Block::UTF8String(_, provisioner_type),
                ASN1Block::UTF8String(_, id),
                ASN1Block::UTF8String(_, name),
                ASN1Block::UTF8String(_, credential_id),
            ] => Ok(Self {
                provisioner_type: provisioner_type.clone(),
                id: id.clone(),
                name: name.clone(),
                credential_id: credential_id.clone(),
            }),
            _ => Err(malformed()),
        }
    }

    pub fn to_custom_extension(&self) -> Result<rcgen::CustomExtension> {
        Ok(rcgen::CustomExtension::from_oid_content(PROVISIONER_EXTENSION_OID, self.to_der()?))
    }

    /// Extract the extension from a parsed certificate, if present.
    pub fn from_certificate(cert: &X509Certificate<'_>) -> Result<Option<Self>> {
        let oid = Self::oid_string();
        cert.extensions()
            .iter()
            .find(|ext| ext.oid.to_id_string() == oid)
            .map(|ext| Self::from_der(ext.value))
            .transpose()
    }
}
