//! X.509 helpers shared by authorization and signing: CSR inspection, peer
//! certificate summaries and serial numbers.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::warn;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use crate::errors::{CertplaneError, Result};
use crate::provisioner::ProvisionerExtension;

/// Serial numbers are 16 random bytes with the top bit cleared.
const SERIAL_LEN: usize = 16;

/// Category of a requested or certified name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NameKind {
    Dns,
    Ip,
    Email,
    Uri,
}

/// Subject common name plus subject alternative names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectNames {
    pub common_name: Option<String>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub email_addresses: Vec<String>,
    pub uris: Vec<String>,
}

impl SubjectNames {
    fn collect(common_name: Option<String>, general_names: &[GeneralName<'_>]) -> Result<Self> {
        let mut names = SubjectNames { common_name, ..Default::default() };
        for name in general_names {
            match name {
                GeneralName::DNSName(dns) => names.dns_names.push(dns.to_ascii_lowercase()),
                GeneralName::IPAddress(bytes) => names.ip_addresses.push(ip_from_bytes(bytes)?),
                GeneralName::RFC822Name(email) => names.email_addresses.push(email.to_string()),
                GeneralName::URI(uri) => names.uris.push(uri.to_string()),
                other => {
                    return Err(CertplaneError::constraint(format!(
                        "unsupported subject alternative name {:?}",
                        other
                    )))
                }
            }
        }
        Ok(names)
    }

    /// Every name with its kind. The common name is included unless it
    /// repeats a SAN.
    pub fn typed_names(&self) -> Vec<(NameKind, String)> {
        let mut names: Vec<(NameKind, String)> = Vec::new();
        names.extend(self.dns_names.iter().map(|n| (NameKind::Dns, n.clone())));
        names.extend(self.ip_addresses.iter().map(|ip| (NameKind::Ip, ip.to_string())));
        names.extend(self.email_addresses.iter().map(|e| (NameKind::Email, e.clone())));
        names.extend(self.uris.iter().map(|u| (NameKind::Uri, u.clone())));

        if let Some(cn) = self.common_name.as_deref().filter(|cn| !cn.is_empty()) {
            let (kind, value) = classify_name(cn);
            if !names.iter().any(|(k, v)| *k == kind && v.eq_ignore_ascii_case(&value)) {
                names.push((kind, value));
            }
        }
        names
    }

    pub fn all(&self) -> Vec<String> {
        self.typed_names().into_iter().map(|(_, name)| name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.typed_names().is_empty()
    }
}

/// Guess the kind of a free-form name such as a common name or a token SAN.
pub fn classify_name(name: &str) -> (NameKind, String) {
    if let Ok(ip) = name.parse::<IpAddr>() {
        (NameKind::Ip, ip.to_string())
    } else if name.contains("://") {
        (NameKind::Uri, name.to_string())
    } else if name.contains('@') {
        (NameKind::Email, name.to_string())
    } else {
        (NameKind::Dns, name.to_ascii_lowercase())
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Result<IpAddr> {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        Ok(IpAddr::V4(Ipv4Addr::from(octets)))
    } else if let Ok(octets) = <[u8; 16]>::try_from(bytes) {
        Ok(IpAddr::V6(Ipv6Addr::from(octets)))
    } else {
        Err(CertplaneError::validation(format!("invalid IP address SAN of {} bytes", bytes.len())))
    }
}

fn common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name().next().and_then(|cn| cn.as_str().ok()).map(str::to_string)
}

/// A parsed, signature-checked certificate signing request.
#[derive(Debug, Clone)]
pub struct CsrInfo {
    pub names: SubjectNames,
    /// DER SubjectPublicKeyInfo
    pub public_key_der: Vec<u8>,
    pub rsa_bits: Option<usize>,
}

impl CsrInfo {
    pub fn parse(der: &[u8]) -> Result<Self> {
        let (_, csr) = X509CertificationRequest::from_der(der)
            .map_err(|e| CertplaneError::validation(format!("malformed CSR: {}", e)))?;
        csr.verify_signature()
            .map_err(|_| CertplaneError::validation("CSR signature does not verify"))?;

        let info = &csr.certification_request_info;
        let mut general_names = Vec::new();
        if let Some(extensions) = csr.requested_extensions() {
            for extension in extensions {
                if let ParsedExtension::SubjectAlternativeName(san) = extension {
                    general_names.extend(san.general_names.iter().cloned());
                }
            }
        }
        let names = SubjectNames::collect(common_name(&info.subject), &general_names)?;

        let rsa_bits = match info.subject_pki.parsed() {
            Ok(PublicKey::RSA(rsa)) => Some(rsa.key_size()),
            _ => None,
        };

        Ok(Self { names, public_key_der: info.subject_pki.raw.to_vec(), rsa_bits })
    }

    /// Hex SHA-256 of the SubjectPublicKeyInfo.
    pub fn key_fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.public_key_der))
    }
}

/// The fields of a presented client certificate the authority acts on.
#[derive(Debug, Clone)]
pub struct PeerCertificate {
    pub serial: String,
    pub names: SubjectNames,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub extension: Option<ProvisionerExtension>,
}

impl PeerCertificate {
    pub fn parse(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| CertplaneError::validation(format!("malformed certificate: {}", e)))?;

        let general_names = match cert.subject_alternative_name() {
            Ok(Some(san)) => san.value.general_names.clone(),
            Ok(None) => Vec::new(),
            Err(e) => {
                return Err(CertplaneError::validation(format!(
                    "malformed subject alternative names: {}",
                    e
                )))
            }
        };
        let names = SubjectNames::collect(common_name(cert.subject()), &general_names)?;

        let extension = match ProvisionerExtension::from_certificate(&cert) {
            Ok(extension) => extension,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed provisioner extension");
                None
            }
        };

        let to_utc = |t: ASN1Time| {
            DateTime::<Utc>::from_timestamp(t.timestamp(), 0)
                .ok_or_else(|| CertplaneError::validation("certificate time out of range"))
        };

        Ok(Self {
            serial: normalize_serial(&hex::encode(cert.raw_serial()))?,
            names,
            not_before: to_utc(cert.validity().not_before)?,
            not_after: to_utc(cert.validity().not_after)?,
            extension,
        })
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    pub fn lifetime(&self) -> chrono::Duration {
        self.not_after - self.not_before
    }
}

/// Whether `cert_der` names `issuer_der` as its issuer and carries a
/// signature made by the issuer's key.
pub fn verify_issued_by(cert_der: &[u8], issuer_der: &[u8]) -> bool {
    let (Ok((_, cert)), Ok((_, issuer))) =
        (X509Certificate::from_der(cert_der), X509Certificate::from_der(issuer_der))
    else {
        return false;
    };
    cert.issuer().as_raw() == issuer.subject().as_raw()
        && cert.verify_signature(Some(issuer.public_key())).is_ok()
}

/// A fresh random serial: DER integer content bytes and their lowercase hex.
pub fn new_serial() -> (Vec<u8>, String) {
    let mut bytes = [0u8; SERIAL_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] = (bytes[0] & 0x7f) | 0x40;
    (bytes.to_vec(), hex::encode(bytes))
}

/// Canonical form of a serial given as hex, with or without a `0x` prefix or
/// colon separators: lowercase, whole octets, no leading zero octets. A DER
/// sign pad (`00c3..`) and the bare integer (`c3..`) name the same serial.
pub fn normalize_serial(serial: &str) -> Result<String> {
    let trimmed = serial.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let normalized: String = trimmed.chars().filter(|c| *c != ':').collect();

    if normalized.is_empty() {
        return Err(CertplaneError::validation_field("missing serial", "serial"));
    }
    if !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CertplaneError::validation_field(
            format!("serial '{}' is not hexadecimal", serial),
            "serial",
        ));
    }
    let digits = normalized.trim_start_matches('0').to_ascii_lowercase();
    Ok(match digits.len() {
        0 => "00".to_string(),
        n if n % 2 == 1 => format!("0{}", digits),
        _ => digits,
    })
}

/// Integer content bytes of a normalized hex serial.
pub fn serial_bytes(serial: &str) -> Result<Vec<u8>> {
    let padded =
        if serial.len() % 2 == 1 { format!("0{}", serial) } else { serial.to_string() };
    hex::decode(padded)
        .map_err(|e| CertplaneError::validation_field(format!("invalid serial: {}", e), "serial"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DnType, KeyPair, SanType};

    #[test]
    fn serials_are_positive_and_unique() {
        let (bytes, hex) = new_serial();
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[0] & 0x80, 0);
        assert_eq!(hex.len(), 32);
        assert_ne!(hex, new_serial().1);
        assert_eq!(serial_bytes(&hex).unwrap(), bytes);
    }

    #[test]
    fn serial_normalization() {
        assert_eq!(normalize_serial("0x4A:01").unwrap(), "4a01");
        assert_eq!(normalize_serial(" 4a01 ").unwrap(), "4a01");
        assert!(normalize_serial("").is_err());
        assert!(normalize_serial("xyz").is_err());
        assert_eq!(serial_bytes("abc").unwrap(), vec![0x0a, 0xbc]);

        assert_eq!(normalize_serial("00c3f1").unwrap(), "c3f1");
        assert_eq!(normalize_serial("00:C3:F1").unwrap(), "c3f1");
        assert_eq!(normalize_serial("c3f").unwrap(), "0c3f");
        assert_eq!(normalize_serial("000").unwrap(), "00");
    }

    #[test]
    fn csr_names_and_key_are_extracted() {
        let key = KeyPair::generate().unwrap();
        let mut params =
            CertificateParams::new(vec!["Svc.Example.com".to_string(), "10.0.0.7".to_string()])
                .unwrap();
        params.distinguished_name.push(DnType::CommonName, "svc.example.com");
        params
            .subject_alt_names
            .push(SanType::Rfc822Name("ops@example.com".try_into().unwrap()));
        let csr = params.serialize_request(&key).unwrap();

        let info = CsrInfo::parse(csr.der()).unwrap();
        assert_eq!(info.names.dns_names, vec!["svc.example.com"]);
        assert_eq!(info.names.ip_addresses, vec!["10.0.0.7".parse::<IpAddr>().unwrap()]);
        assert_eq!(
            info.names.all(),
            vec!["svc.example.com", "10.0.0.7", "ops@example.com"],
            "a common name repeating a SAN is not listed twice"
        );
        assert_eq!(info.rsa_bits, None);
        assert_eq!(info.public_key_der, key.public_key_der());
        assert_eq!(info.key_fingerprint().len(), 64);
    }

    #[test]
    fn garbage_csr_is_malformed() {
        let err = CsrInfo::parse(&[0x30, 0x03, 0x02, 0x01, 0x01]).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::MalformedRequest);
    }

    #[test]
    fn classify_common_names() {
        assert_eq!(classify_name("10.1.2.3").0, NameKind::Ip);
        assert_eq!(classify_name("ops@example.com").0, NameKind::Email);
        assert_eq!(classify_name("spiffe://example.org/svc").0, NameKind::Uri);
        assert_eq!(classify_name("WWW.Example.com"), (NameKind::Dns, "www.example.com".into()));
    }

    #[test]
    fn issuer_signature_is_checked() {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        ca_params.distinguished_name.push(DnType::CommonName, "Test CA");
        let ca = ca_params.clone().self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let leaf = CertificateParams::new(vec!["leaf.test".to_string()])
            .unwrap()
            .signed_by(&leaf_key, &ca, &ca_key)
            .unwrap();

        assert!(verify_issued_by(leaf.der(), ca.der()));

        let other_key = KeyPair::generate().unwrap();
        let other = ca_params.self_signed(&other_key).unwrap();
        assert!(!verify_issued_by(leaf.der(), other.der()));

        let peer = PeerCertificate::parse(leaf.der()).unwrap();
        assert_eq!(peer.names.dns_names, vec!["leaf.test"]);
        assert!(peer.is_valid_at(Utc::now()));
        assert!(peer.extension.is_none());
    }
}
