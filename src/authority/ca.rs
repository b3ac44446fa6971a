//! Issuing CA material: the root handed to clients and the intermediate whose
//! key signs leaf certificates and CRLs.

use std::fmt;
use std::fs;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateRevocationList,
    CertificateRevocationListParams, DistinguishedName, DnType, IsCa, KeyPair, KeyUsagePurpose,
    PublicKeyData,
};
use rustls::pki_types::CertificateDer;
use ::time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use x509_parser::prelude::*;
use zeroize::Zeroizing;

use super::x509::verify_issued_by;
use crate::config::tls::load_certificates;
use crate::config::AuthorityConfig;
use crate::errors::{CertplaneError, Result};

const ROOT_LIFETIME_DAYS: i64 = 10 * 365;
const INTERMEDIATE_LIFETIME_DAYS: i64 = 5 * 365;

pub struct CertificateAuthority {
    root_der: Vec<u8>,
    intermediate_der: Vec<u8>,
    issuer: Certificate,
    issuer_key: KeyPair,
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("root_der_len", &self.root_der.len())
            .field("intermediate_der_len", &self.intermediate_der.len())
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Load CA material from the configured files, or generate an ephemeral
    /// root and intermediate in dev mode.
    pub fn from_config(config: &AuthorityConfig) -> Result<Self> {
        match (&config.intermediate_cert_path, &config.intermediate_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let intermediate = load_certificates(cert_path)?
                    .into_iter()
                    .next()
                    .map(|der| der.as_ref().to_vec())
                    .ok_or_else(|| CertplaneError::config("intermediate certificate is empty"))?;

                let root = match &config.root_cert_path {
                    Some(root_path) => load_certificates(root_path)?
                        .into_iter()
                        .next()
                        .map(|der| der.as_ref().to_vec()),
                    None => None,
                };

                let key_pem =
                    Zeroizing::new(fs::read_to_string(key_path).map_err(|e| CertplaneError::Io {
                        source: e,
                        context: format!("Failed to read CA key {}", key_path.display()),
                    })?);

                let ca = Self::from_pem_material(root, &intermediate, &key_pem)?;
                info!(path = %cert_path.display(), "Loaded intermediate CA from disk");
                Ok(ca)
            }
            _ if config.dev_mode => {
                warn!("No CA material configured; generating an ephemeral dev-mode CA");
                Self::generate(&config.ca_name)
            }
            _ => Err(CertplaneError::config("No CA material configured and dev_mode is disabled")),
        }
    }

    /// Build from an existing intermediate certificate and its key. Without a
    /// root the intermediate is treated as the trust anchor.
    pub fn from_pem_material(
        root_der: Option<Vec<u8>>,
        intermediate_der: &[u8],
        key_pem: &str,
    ) -> Result<Self> {
        let issuer_key = KeyPair::from_pem(key_pem)?;

        let (_, parsed) = X509Certificate::from_der(intermediate_der).map_err(|e| {
            CertplaneError::config_with_source("Invalid intermediate certificate", Box::new(e))
        })?;
        if parsed.public_key().raw != issuer_key.public_key_der().as_slice() {
            return Err(CertplaneError::config(
                "intermediate key does not match the intermediate certificate",
            ));
        }

        let issuer = CertificateParams::from_ca_cert_der(&CertificateDer::from(intermediate_der))?
            .self_signed(&issuer_key)?;

        Ok(Self {
            root_der: root_der.unwrap_or_else(|| intermediate_der.to_vec()),
            intermediate_der: intermediate_der.to_vec(),
            issuer,
            issuer_key,
        })
    }

    /// Generate a self-signed root and an intermediate signed by it.
    pub fn generate(name: &str) -> Result<Self> {
        let now = OffsetDateTime::now_utc();

        let root_key = KeyPair::generate()?;
        let mut root_params = ca_params(&format!("{} Root CA", name), now, ROOT_LIFETIME_DAYS)?;
        root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let root = root_params.self_signed(&root_key)?;

        let issuer_key = KeyPair::generate()?;
        let mut params =
            ca_params(&format!("{} Intermediate CA", name), now, INTERMEDIATE_LIFETIME_DAYS)?;
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        let issuer = params.signed_by(&issuer_key, &root, &root_key)?;

        Ok(Self {
            root_der: root.der().to_vec(),
            intermediate_der: issuer.der().to_vec(),
            issuer,
            issuer_key,
        })
    }

    pub fn root_der(&self) -> &[u8] {
        &self.root_der
    }

    pub fn intermediate_der(&self) -> &[u8] {
        &self.intermediate_der
    }

    pub fn root_pem(&self) -> String {
        ::pem::encode(&::pem::Pem::new("CERTIFICATE", self.root_der.as_slice()))
    }

    /// Chain served after a leaf: the intermediate, unless it is the root.
    pub fn chain_der(&self) -> Vec<Vec<u8>> {
        if self.root_der == self.intermediate_der {
            Vec::new()
        } else {
            vec![self.intermediate_der.clone()]
        }
    }

    /// Sign a leaf certificate for `public_key`.
    pub fn issue(
        &self,
        params: CertificateParams,
        public_key: &impl PublicKeyData,
    ) -> Result<Certificate> {
        Ok(params.signed_by(public_key, &self.issuer, &self.issuer_key)?)
    }

    pub fn sign_crl(
        &self,
        params: CertificateRevocationListParams,
    ) -> Result<CertificateRevocationList> {
        Ok(params.signed_by(&self.issuer, &self.issuer_key)?)
    }

    /// Whether `cert_der` was signed by this authority's intermediate.
    pub fn issued(&self, cert_der: &[u8]) -> bool {
        verify_issued_by(cert_der, &self.intermediate_der)
    }
}

fn ca_params(common_name: &str, now: OffsetDateTime, days: i64) -> Result<CertificateParams> {
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.not_before = now - Duration::hours(1);
    params.not_after = now + Duration::days(days);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_chain_links_to_root() {
        let ca = CertificateAuthority::generate("test").unwrap();
        assert!(verify_issued_by(ca.intermediate_der(), ca.root_der()));
        assert_eq!(ca.chain_der(), vec![ca.intermediate_der().to_vec()]);
        let root_pem = ca.root_pem();
        assert!(root_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        let parsed = ::pem::parse(&root_pem).unwrap();
        assert_eq!(parsed.tag(), "CERTIFICATE");
        assert_eq!(parsed.contents(), ca.root_der());

        let (_, root) = X509Certificate::from_der(ca.root_der()).unwrap();
        assert!(root.is_ca());
        let (_, intermediate) = X509Certificate::from_der(ca.intermediate_der()).unwrap();
        assert_eq!(
            intermediate.subject().iter_common_name().next().unwrap().as_str().unwrap(),
            "test Intermediate CA"
        );
    }

    #[test]
    fn material_from_pem_must_match_key() {
        let generated = CertificateAuthority::generate("disk").unwrap();
        let key_pem = generated.issuer_key.serialize_pem();

        let loaded = CertificateAuthority::from_pem_material(
            Some(generated.root_der().to_vec()),
            generated.intermediate_der(),
            &key_pem,
        )
        .unwrap();
        assert_eq!(loaded.intermediate_der(), generated.intermediate_der());

        let leaf_key = KeyPair::generate().unwrap();
        let leaf = loaded
            .issue(CertificateParams::new(vec!["leaf.test".into()]).unwrap(), &leaf_key)
            .unwrap();
        assert!(loaded.issued(leaf.der()));
        assert!(generated.issued(leaf.der()));

        let other_key = KeyPair::generate().unwrap().serialize_pem();
        let err =
            CertificateAuthority::from_pem_material(None, generated.intermediate_der(), &other_key)
                .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn dev_mode_is_required_without_files() {
        let config = AuthorityConfig { dev_mode: false, ..Default::default() };
        assert!(CertificateAuthority::from_config(&config).is_err());

        let config = AuthorityConfig::default();
        assert!(CertificateAuthority::from_config(&config).is_ok());
    }
}
