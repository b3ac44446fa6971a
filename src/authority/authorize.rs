//! Credential verification: one-time tokens and client certificates.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use super::sign_options::{SignOption, SignOptions};
use super::x509::{normalize_serial, verify_issued_by, PeerCertificate};
use super::Authority;
use crate::errors::{CertplaneError, ErrorKind, Result};
use crate::observability::metrics;
use crate::provisioner::{token, Provisioner, ProvisionerType};

/// A bearer credential presented with a request.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Signed one-time token
    Token(String),
    /// DER client certificate from the TLS handshake
    PeerCertificate(Vec<u8>),
}

/// The operation a credential is presented for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizeMethod<'a> {
    Sign,
    Revoke { serial: &'a str },
}

impl Authority {
    /// Verify a credential and derive the constraints it grants.
    ///
    /// A token is redeemed only after every check passes, and stays redeemed
    /// whatever happens to the request afterwards.
    pub async fn authorize(
        &self,
        credential: &Credential,
        method: AuthorizeMethod<'_>,
    ) -> Result<SignOptions> {
        match credential {
            Credential::Token(token) => self.authorize_token(token, method).await,
            Credential::PeerCertificate(der) => self.authorize_peer(der, method).await,
        }
    }

    #[instrument(skip(self, token), name = "authorize_token")]
    async fn authorize_token(
        &self,
        token: &str,
        method: AuthorizeMethod<'_>,
    ) -> Result<SignOptions> {
        let header = token::peek_header(token)?;
        let provisioner = self.provisioner_for_token(token, &header)?;

        let audience = match method {
            AuthorizeMethod::Sign => &self.config.sign_audience,
            AuthorizeMethod::Revoke { .. } => &self.config.revoke_audience,
        };
        let claims = token::verify(
            &provisioner,
            token,
            &header,
            audience,
            self.config.token_leeway(),
        )?;

        if let AuthorizeMethod::Revoke { serial } = method {
            let subject = normalize_serial(&claims.sub)
                .map_err(|_| CertplaneError::unauthorized("token subject is not a serial"))?;
            if subject != normalize_serial(serial)? {
                return Err(CertplaneError::unauthorized(
                    "token subject does not match the serial being revoked",
                ));
            }
        }

        let token_id = token::token_id(&claims, token);
        if !self.db.use_token(&token_id, token).await? {
            metrics::record_token_replayed(&provisioner.name).await;
            warn!(provisioner = %provisioner.name, token_id = %token_id, "Token replay rejected");
            return Err(CertplaneError::replayed_token(token_id));
        }

        let credential_id = header.kid.clone().unwrap_or_else(|| claims.iss.clone());
        info!(provisioner = %provisioner.name, subject = %claims.sub, "Token authorized");

        Ok(SignOptions::for_provisioner(&provisioner, credential_id)
            .with(SignOption::AllowedNames(claims.allowed_names())))
    }

    fn provisioner_for_token(
        &self,
        token: &str,
        header: &jsonwebtoken::Header,
    ) -> Result<Arc<Provisioner>> {
        let resolved = match header.kid.as_deref() {
            Some(kid) => self.registry.load_by_token_key_id(kid),
            None => self.registry.load_by_issuer(&token::peek_issuer(token, header)?),
        };
        resolved.map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                CertplaneError::unauthorized("no provisioner accepts this token")
            }
            _ => e,
        })
    }

    #[instrument(skip(self, der), name = "authorize_peer")]
    async fn authorize_peer(&self, der: &[u8], method: AuthorizeMethod<'_>) -> Result<SignOptions> {
        let peer = PeerCertificate::parse(der)
            .map_err(|_| CertplaneError::unauthorized("malformed client certificate"))?;

        let now = Utc::now();
        if !peer.is_valid_at(now) {
            return Err(CertplaneError::unauthorized(
                "client certificate is outside its validity period",
            ));
        }

        let provisioner = self.provisioner_for_client(der, &peer).await?;

        match method {
            AuthorizeMethod::Sign => {
                if self.db.is_revoked(&peer.serial).await? {
                    return Err(CertplaneError::unauthorized("client certificate is revoked"));
                }
                if provisioner.claims.disable_renewal {
                    return Err(CertplaneError::unauthorized(format!(
                        "renewal is disabled for provisioner '{}'",
                        provisioner.name
                    )));
                }
                info!(provisioner = %provisioner.name, serial = %peer.serial, "Renewal authorized");

                Ok(SignOptions::for_provisioner(&provisioner, peer.serial.clone())
                    .with(SignOption::AllowedNames(peer.names.all()))
                    .with(SignOption::ValidityWindow {
                        not_before: now,
                        not_after: now + peer.lifetime(),
                    }))
            }
            AuthorizeMethod::Revoke { serial } => {
                if normalize_serial(serial)? != peer.serial {
                    return Err(CertplaneError::unauthorized(
                        "client certificate does not match the serial being revoked",
                    ));
                }
                Ok(SignOptions::for_provisioner(&provisioner, peer.serial.clone()))
            }
        }
    }

    /// Provisioner and chain check for a client certificate. Any resolution
    /// failure is reported as `Unauthorized`.
    async fn provisioner_for_client(
        &self,
        der: &[u8],
        peer: &PeerCertificate,
    ) -> Result<Arc<Provisioner>> {
        if self.ca.issued(der) {
            return match self.provisioner_for_peer(peer).await {
                Ok(provisioner) => Ok(provisioner),
                Err(e) => {
                    warn!(serial = %peer.serial, error = %e, "Cannot resolve certificate provisioner");
                    Err(CertplaneError::unauthorized(
                        "could not determine the provisioner for the client certificate",
                    ))
                }
            };
        }

        self.registry
            .snapshot()
            .of_type(ProvisionerType::Mtls)
            .into_iter()
            .find(|p| p.roots.iter().any(|root| verify_issued_by(der, root)))
            .ok_or_else(|| {
                CertplaneError::unauthorized("client certificate is not issued by a trusted CA")
            })
    }
}
