//! Leaf certificate issuance.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use pem::Pem;
use rcgen::{
    CertificateParams, CertificateSigningRequestParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, Ia5String, KeyUsagePurpose, SanType, SerialNumber,
};
use rustls::pki_types::CertificateSigningRequestDer;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use super::sign_options::SignOptions;
use super::x509::{new_serial, CsrInfo, NameKind};
use super::Authority;
use crate::db::CertificateData;
use crate::errors::{CertplaneError, ErrorKind, Result};
use crate::observability::metrics;

/// A signed leaf and the chain that accompanies it.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub serial: String,
    pub certificate_der: Vec<u8>,
    /// Intermediates, leaf excluded
    pub chain_der: Vec<Vec<u8>>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl IssuedCertificate {
    /// Leaf followed by the chain, PEM encoded.
    pub fn pem_chain(&self) -> String {
        std::iter::once(&self.certificate_der)
            .chain(self.chain_der.iter())
            .map(|der| pem::encode(&Pem::new("CERTIFICATE", der.as_slice())))
            .collect()
    }
}

impl Authority {
    /// Issue a certificate for `csr_der` under `options`. A violated constraint
    /// fails the whole request before anything is signed.
    #[instrument(skip(self, csr_der, options), name = "sign")]
    pub async fn sign(&self, csr_der: &[u8], options: &SignOptions) -> Result<IssuedCertificate> {
        let extension = options
            .provisioner()
            .ok_or_else(|| CertplaneError::constraint("sign options carry no provisioner"))?;

        let csr = CsrInfo::parse(csr_der)?;
        options.validate(&csr)?;
        let (not_before, not_after) = options.validity(Utc::now())?;

        let request =
            CertificateSigningRequestParams::from_der(&CertificateSigningRequestDer::from(
                csr_der.to_vec(),
            ))
            .map_err(|e| CertplaneError::validation(format!("unsupported CSR: {}", e)))?;

        let (serial_bytes, serial) = new_serial();
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        if let Some(cn) = csr.names.common_name.as_deref().filter(|cn| !cn.is_empty()) {
            params.distinguished_name.push(DnType::CommonName, cn);
        }
        params.subject_alt_names = subject_alt_names(&csr)?;
        params.not_before = to_offset(not_before)?;
        params.not_after = to_offset(not_after)?;
        params.serial_number = Some(SerialNumber::from_slice(&serial_bytes));
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages =
            vec![ExtendedKeyUsagePurpose::ServerAuth, ExtendedKeyUsagePurpose::ClientAuth];
        params.use_authority_key_identifier_extension = true;
        params.custom_extensions.push(extension.to_custom_extension()?);

        let certificate = self.ca.issue(params, &request.public_key)?;

        let data = CertificateData {
            serial: serial.clone(),
            provisioner: options.provisioner_data(),
            issued_at: Utc::now(),
            expires_at: not_after,
        };
        match self.db.store_certificate_data(&data).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotImplemented => {
                debug!(serial = %serial, "Certificate data not persisted by this database");
            }
            Err(e) => return Err(e),
        }

        metrics::record_certificate_issued(&extension.provisioner_type).await;
        info!(
            serial = %serial,
            provisioner = %extension.name,
            not_after = %not_after,
            "Certificate issued"
        );

        Ok(IssuedCertificate {
            serial,
            certificate_der: certificate.der().to_vec(),
            chain_der: self.ca.chain_der(),
            not_before,
            not_after,
        })
    }
}

fn subject_alt_names(csr: &CsrInfo) -> Result<Vec<SanType>> {
    csr.names
        .typed_names()
        .into_iter()
        .map(|(kind, name)| {
            let ia5 = |value: String| {
                Ia5String::try_from(value).map_err(|e| {
                    CertplaneError::validation(format!("name is not IA5 encodable: {}", e))
                })
            };
            Ok(match kind {
                NameKind::Dns => SanType::DnsName(ia5(name)?),
                NameKind::Email => SanType::Rfc822Name(ia5(name)?),
                NameKind::Uri => SanType::URI(ia5(name)?),
                NameKind::Ip => SanType::IpAddress(name.parse::<IpAddr>().map_err(|e| {
                    CertplaneError::validation(format!("invalid IP address: {}", e))
                })?),
            })
        })
        .collect()
}

fn to_offset(at: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| CertplaneError::internal_with_source("timestamp out of range", Box::new(e)))
}
