//! Signing constraints produced by authorization and enforced at issuance.

use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};

use super::x509::{CsrInfo, NameKind};
use crate::db::ProvisionerData;
use crate::errors::{CertplaneError, Result};
use crate::provisioner::{NamePolicy, Provisioner, ProvisionerExtension};

/// One constraint granted by an authorization.
#[derive(Debug, Clone, PartialEq)]
pub enum SignOption {
    /// Provisioner identity stamped into the certificate.
    Provisioner(ProvisionerExtension),
    /// Names the requester proved control of. The CSR must not ask for more.
    AllowedNames(Vec<String>),
    NamePolicy(NamePolicy),
    ValidityBounds { min: Duration, max: Duration, default: Duration },
    /// Fixed validity, e.g. for renewals and ACME orders.
    ValidityWindow { not_before: DateTime<Utc>, not_after: DateTime<Utc> },
    MinRsaKeyBits(usize),
}

/// The resolved set of constraints for a signing request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignOptions {
    options: Vec<SignOption>,
}

impl SignOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity, name policy, validity bounds and key policy of a provisioner.
    pub fn for_provisioner(provisioner: &Provisioner, credential_id: impl Into<String>) -> Self {
        let claims = &provisioner.claims;
        Self::new()
            .with(SignOption::Provisioner(ProvisionerExtension::for_provisioner(
                provisioner,
                credential_id,
            )))
            .with(SignOption::NamePolicy(provisioner.policy.clone()))
            .with(SignOption::ValidityBounds {
                min: claims.min_duration(),
                max: claims.max_duration(),
                default: claims.default_duration(),
            })
            .with(SignOption::MinRsaKeyBits(provisioner.min_rsa_key_bits))
    }

    pub fn with(mut self, option: SignOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn push(&mut self, option: SignOption) {
        self.options.push(option);
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignOption> {
        self.options.iter()
    }

    pub fn provisioner(&self) -> Option<&ProvisionerExtension> {
        self.options.iter().find_map(|option| match option {
            SignOption::Provisioner(extension) => Some(extension),
            _ => None,
        })
    }

    pub fn provisioner_data(&self) -> Option<ProvisionerData> {
        self.provisioner().map(|ext| ProvisionerData {
            id: ext.id.clone(),
            name: ext.name.clone(),
            provisioner_type: ext.provisioner_type.clone(),
        })
    }

    pub fn allowed_names(&self) -> Option<&[String]> {
        self.options.iter().find_map(|option| match option {
            SignOption::AllowedNames(names) => Some(names.as_slice()),
            _ => None,
        })
    }

    /// Check the CSR against every name and key constraint.
    pub fn validate(&self, csr: &CsrInfo) -> Result<()> {
        let names = csr.names.typed_names();
        if names.is_empty() {
            return Err(CertplaneError::constraint("certificate request contains no names"));
        }

        for option in &self.options {
            match option {
                SignOption::AllowedNames(allowed) => {
                    for (_, name) in &names {
                        if !allowed.iter().any(|a| name_matches(a, name)) {
                            return Err(CertplaneError::constraint(format!(
                                "name '{}' is not authorized",
                                name
                            )));
                        }
                    }
                }
                SignOption::NamePolicy(policy) => {
                    for (kind, name) in &names {
                        let allowed = match kind {
                            NameKind::Dns => policy.allows_dns(name),
                            NameKind::Email => policy.allows_email(name),
                            NameKind::Ip | NameKind::Uri => true,
                        };
                        if !allowed {
                            return Err(CertplaneError::constraint(format!(
                                "name '{}' is not allowed by provisioner policy",
                                name
                            )));
                        }
                    }
                }
                SignOption::MinRsaKeyBits(min) => {
                    if let Some(bits) = csr.rsa_bits.filter(|bits| bits < min) {
                        return Err(CertplaneError::constraint(format!(
                            "RSA key of {} bits is below the {} bit minimum",
                            bits, min
                        )));
                    }
                }
                SignOption::Provisioner(_)
                | SignOption::ValidityBounds { .. }
                | SignOption::ValidityWindow { .. } => {}
            }
        }
        Ok(())
    }

    /// Certificate validity at `now`: the fixed window when one was granted,
    /// otherwise the default duration, checked against the bounds.
    pub fn validity(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let bounds = self.options.iter().find_map(|option| match option {
            SignOption::ValidityBounds { min, max, default } => Some((*min, *max, *default)),
            _ => None,
        });
        let window = self.options.iter().find_map(|option| match option {
            SignOption::ValidityWindow { not_before, not_after } => Some((*not_before, *not_after)),
            _ => None,
        });

        let (not_before, not_after) = match (window, bounds) {
            (Some(window), _) => window,
            (None, Some((_, _, default))) => (now, now + default),
            (None, None) => {
                return Err(CertplaneError::constraint("no validity period was authorized"))
            }
        };

        if not_after <= not_before {
            return Err(CertplaneError::constraint("notAfter must be later than notBefore"));
        }
        if not_after <= now {
            return Err(CertplaneError::constraint("requested validity has already ended"));
        }
        if let Some((min, max, _)) = bounds {
            let requested = not_after - not_before;
            if requested < min {
                return Err(CertplaneError::constraint(format!(
                    "requested duration of {}s is less than the authorized minimum of {}s",
                    requested.num_seconds(),
                    min.num_seconds()
                )));
            }
            if requested > max {
                return Err(CertplaneError::constraint(format!(
                    "requested duration of {}s is more than the authorized maximum of {}s",
                    requested.num_seconds(),
                    max.num_seconds()
                )));
            }
        }
        Ok((not_before, not_after))
    }
}

fn name_matches(allowed: &str, name: &str) -> bool {
    if allowed.eq_ignore_ascii_case(name) {
        return true;
    }
    match (allowed.parse::<IpAddr>(), name.parse::<IpAddr>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::x509::SubjectNames;
    use crate::errors::ErrorKind;
    use crate::provisioner::{ProvisionerConfig, ProvisionerType};

    fn csr(dns: &[&str], rsa_bits: Option<usize>) -> CsrInfo {
        CsrInfo {
            names: SubjectNames {
                dns_names: dns.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
            public_key_der: vec![],
            rsa_bits,
        }
    }

    fn provisioner() -> Provisioner {
        let mut config = ProvisionerConfig::new("acme", ProvisionerType::Acme);
        config.policy.allowed_dns = vec!["*.example.com".to_string()];
        config.build().unwrap()
    }

    #[test]
    fn names_must_be_authorized() {
        let options = SignOptions::for_provisioner(&provisioner(), "acct")
            .with(SignOption::AllowedNames(vec!["www.example.com".to_string()]));

        assert!(options.validate(&csr(&["www.example.com"], None)).is_ok());
        assert!(options.validate(&csr(&["WWW.example.com"], None)).is_ok());

        let err = options.validate(&csr(&["www.example.com", "api.example.com"], None));
        assert_eq!(err.unwrap_err().kind(), ErrorKind::ConstraintViolation);

        let err = options.validate(&csr(&[], None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    }

    #[test]
    fn provisioner_policy_applies() {
        let options = SignOptions::for_provisioner(&provisioner(), "acct");
        assert!(options.validate(&csr(&["api.example.com"], None)).is_ok());
        assert!(options.validate(&csr(&["api.example.org"], None)).is_err());
    }

    #[test]
    fn weak_rsa_keys_are_rejected() {
        let options = SignOptions::for_provisioner(&provisioner(), "acct");
        assert!(options.validate(&csr(&["a.example.com"], Some(1024))).is_err());
        assert!(options.validate(&csr(&["a.example.com"], Some(2048))).is_ok());
        assert!(options.validate(&csr(&["a.example.com"], None)).is_ok());
    }

    #[test]
    fn validity_defaults_and_bounds() {
        let options = SignOptions::for_provisioner(&provisioner(), "acct");
        let now = Utc::now();
        let (nb, na) = options.validity(now).unwrap();
        assert_eq!(nb, now);
        assert_eq!(na - nb, Duration::hours(24));

        let too_long = options.clone().with(SignOption::ValidityWindow {
            not_before: now,
            not_after: now + Duration::days(30),
        });
        assert_eq!(too_long.validity(now).unwrap_err().kind(), ErrorKind::ConstraintViolation);

        let too_short = options.clone().with(SignOption::ValidityWindow {
            not_before: now,
            not_after: now + Duration::seconds(30),
        });
        assert!(too_short.validity(now).is_err());

        let fixed = options.with(SignOption::ValidityWindow {
            not_before: now,
            not_after: now + Duration::hours(1),
        });
        assert_eq!(fixed.validity(now).unwrap(), (now, now + Duration::hours(1)));
    }

    #[test]
    fn accessors_find_options() {
        let options = SignOptions::for_provisioner(&provisioner(), "acct-1")
            .with(SignOption::AllowedNames(vec!["10.0.0.1".into()]));
        assert_eq!(options.provisioner().unwrap().credential_id, "acct-1");
        assert_eq!(options.provisioner_data().unwrap().id, "acme/acme");
        assert_eq!(options.allowed_names(), Some(&["10.0.0.1".to_string()][..]));
        assert!(name_matches("::1", "0:0:0:0:0:0:0:1"));
        assert!(SignOptions::new().validity(Utc::now()).is_err());
    }
}
