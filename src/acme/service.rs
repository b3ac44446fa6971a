//! ACME operations.
//!
//! Every method takes an account (or, for `new_account`, a JWK) that the
//! caller has already authenticated. Reads refresh derived state lazily:
//! expired authorizations are marked `expired` and order status is recomputed
//! from its authorizations before being returned.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn, Instrument};

use super::challenge::ChallengeType;
use super::request::{
    ChallengeRequest, FinalizeRequest, NewAccountRequest, NewOrderRequest,
    RevokeCertificateRequest, UpdateAccountRequest, UpdateAuthorizationRequest,
};
use super::validation::ValidationRequest;
use super::{
    jwk, Account, AccountStatus, AcmeCertificate, AcmeDb, AcmeError, AcmeResult, Authorization,
    AuthorizationStatus, Challenge, ChallengeStatus, ChallengeValidator, Identifier,
    IdentifierType, Order, OrderStatus, Payload, ValidationOutcome,
};
use crate::authority::revoke::MAX_REASON_CODE;
use crate::authority::x509::NameKind;
use crate::authority::{
    Authority, CsrInfo, PeerCertificate, RevokeOptions, SignOption, SignOptions,
};
use crate::config::AcmeConfig;
use crate::domain::{AccountId, AuthorizationId, CertificateId, ChallengeId, OrderId};
use crate::provisioner::{Provisioner, ProvisionerType};

/// Attempts for a compare-and-swap loop before giving up.
const CAS_RETRIES: usize = 8;

/// Reason code 7 is unassigned in RFC 5280.
const UNASSIGNED_REASON_CODE: i32 = 7;

/// Result of `new_account`: the account and whether this call created it.
#[derive(Debug, Clone)]
pub struct NewAccountOutcome {
    pub account: Account,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct AcmeService {
    authority: Arc<Authority>,
    db: AcmeDb,
    config: AcmeConfig,
    validator: Arc<dyn ChallengeValidator>,
}

fn ensure_owner(account: &Account, owner: &AccountId, resource: &str) -> AcmeResult<()> {
    if &account.id != owner {
        return Err(AcmeError::unauthorized(format!("account does not own this {}", resource)));
    }
    Ok(())
}

fn contention(resource: &str) -> AcmeError {
    AcmeError::server_internal(format!("too many concurrent updates to {}", resource))
}

/// Identifiers named by a CSR, normalized so they compare against an order.
fn csr_identifiers(csr: &CsrInfo) -> AcmeResult<BTreeSet<Identifier>> {
    csr.names
        .typed_names()
        .into_iter()
        .map(|(kind, name)| match kind {
            NameKind::Dns => Identifier::dns(name).normalized(),
            NameKind::Ip => Identifier::ip(name).normalized(),
            NameKind::Email | NameKind::Uri => {
                Err(AcmeError::bad_csr(format!("CSR contains unsupported name '{}'", name)))
            }
        })
        .collect()
}

fn challenge_types(identifier: &Identifier) -> &'static [ChallengeType] {
    match identifier.identifier_type {
        IdentifierType::Dns if identifier.is_wildcard() => &[ChallengeType::Dns01],
        IdentifierType::Dns => {
            &[ChallengeType::Http01, ChallengeType::Dns01, ChallengeType::TlsAlpn01]
        }
        IdentifierType::Ip => &[ChallengeType::Http01, ChallengeType::TlsAlpn01],
    }
}

impl AcmeService {
    pub fn new(
        authority: Arc<Authority>,
        db: AcmeDb,
        config: AcmeConfig,
        validator: Arc<dyn ChallengeValidator>,
    ) -> Self {
        Self { authority, db, config, validator }
    }

    pub fn authority(&self) -> &Arc<Authority> {
        &self.authority
    }

    pub fn db(&self) -> &AcmeDb {
        &self.db
    }

    // ---------------------------------------------------------------- accounts

    /// Register the key in `jwk`, or return the account it already has.
    pub async fn new_account(
        &self,
        jwk: &serde_json::Value,
        payload: &Payload,
    ) -> AcmeResult<NewAccountOutcome> {
        let request: NewAccountRequest = payload.parse()?;
        request.validate()?;
        let key_id = jwk::thumbprint(jwk)?;

        if let Some(account) = self.db.get_account_by_key_id(&key_id).await? {
            return Ok(NewAccountOutcome { account, created: false });
        }
        if request.only_return_existing {
            return Err(AcmeError::account_does_not_exist(
                "no account exists for the provided key",
            ));
        }

        let account = Account {
            id: AccountId::new(),
            key: jwk.clone(),
            key_id,
            contact: request.contact,
            status: AccountStatus::Valid,
            terms_of_service_agreed: request.terms_of_service_agreed,
            created_at: Utc::now(),
        };
        let (account, created) = self.db.create_account(&account).await?;
        if created {
            info!(account_id = %account.id, "ACME account created");
        }
        Ok(NewAccountOutcome { account, created })
    }

    pub async fn account_by_key_id(&self, key_id: &str) -> AcmeResult<Account> {
        self.db.get_account_by_key_id(key_id).await?.ok_or_else(|| {
            AcmeError::account_does_not_exist("no account exists for the provided key")
        })
    }

    pub async fn account_by_id(&self, id: &AccountId) -> AcmeResult<Account> {
        self.db
            .get_account(id)
            .await?
            .ok_or_else(|| AcmeError::account_does_not_exist(format!("account '{}' not found", id)))
    }

    /// Current record of `account`, rejected unless it is still valid.
    async fn active_account(&self, account: &Account) -> AcmeResult<Account> {
        let current = self.account_by_id(&account.id).await?;
        if !current.is_valid() {
            return Err(AcmeError::forbidden("account is not valid"));
        }
        Ok(current)
    }

    /// POST-as-GET returns the account; otherwise apply a contact update or a
    /// deactivation. A deactivated account never becomes valid again.
    pub async fn get_or_update_account(
        &self,
        account: &Account,
        payload: &Payload,
    ) -> AcmeResult<Account> {
        if payload.is_post_as_get() {
            return self.account_by_id(&account.id).await;
        }
        let request: UpdateAccountRequest = payload.parse()?;
        request.validate()?;

        let span = crate::acme_span!("update_account", account.id);
        async {
            for _ in 0..CAS_RETRIES {
                let current = self.account_by_id(&account.id).await?;
                if !current.is_valid() {
                    if request.contact_update().is_some() {
                        return Err(AcmeError::forbidden("account is not valid"));
                    }
                    return Ok(current);
                }

                let mut updated = current.clone();
                if request.status_update().is_some() {
                    updated.status = AccountStatus::Deactivated;
                } else if let Some(contact) = request.contact_update() {
                    updated.contact = contact.to_vec();
                }
                if updated == current {
                    return Ok(current);
                }
                if self.db.update_account(&current, &updated).await? {
                    info!(status = ?updated.status, "ACME account updated");
                    return Ok(updated);
                }
            }
            Err::<Account, AcmeError>(contention("account"))
        }
        .instrument(span)
        .await
    }

    // ------------------------------------------------------------------ orders

    pub async fn new_order(&self, account: &Account, payload: &Payload) -> AcmeResult<Order> {
        let account = self.active_account(account).await?;
        let request: NewOrderRequest = payload.parse()?;
        request.validate()?;

        let identifiers = request
            .identifiers
            .iter()
            .map(Identifier::normalized)
            .collect::<AcmeResult<BTreeSet<_>>>()?;
        let provisioner = self.acme_provisioner()?;

        let span = crate::acme_span!("new_order", account.id, identifiers = identifiers.len());
        async {
            let now = Utc::now();
            let mut authorization_ids = Vec::with_capacity(identifiers.len());
            for identifier in &identifiers {
                let authz = self.create_authorization(&account.id, identifier, now).await?;
                authorization_ids.push(authz.id);
            }

            let order = Order {
                id: OrderId::new(),
                account_id: account.id.clone(),
                provisioner_id: provisioner.id.clone(),
                status: OrderStatus::Pending,
                identifiers: identifiers.into_iter().collect(),
                not_before: request.not_before,
                not_after: request.not_after,
                expires_at: now + self.config.order_lifetime(),
                authorization_ids,
                certificate_id: None,
                error: None,
                created_at: now,
            };
            self.db.create_order(&order).await?;
            info!(order_id = %order.id, "ACME order created");
            Ok::<Order, AcmeError>(order)
        }
        .instrument(span)
        .await
    }

    async fn create_authorization(
        &self,
        account_id: &AccountId,
        identifier: &Identifier,
        now: DateTime<Utc>,
    ) -> AcmeResult<Authorization> {
        let wildcard = identifier.is_wildcard();
        let target = match identifier.value.strip_prefix("*.") {
            Some(base) if wildcard => Identifier::dns(base),
            _ => identifier.clone(),
        };

        let authz_id = AuthorizationId::new();
        let mut challenge_ids = Vec::new();
        for challenge_type in challenge_types(identifier) {
            let challenge = Challenge::new(authz_id.clone(), account_id.clone(), *challenge_type);
            self.db.create_challenge(&challenge).await?;
            challenge_ids.push(challenge.id);
        }

        let authz = Authorization {
            id: authz_id,
            account_id: account_id.clone(),
            identifier: target,
            status: AuthorizationStatus::Pending,
            challenge_ids,
            wildcard,
            expires_at: now + self.config.authorization_lifetime(),
        };
        self.db.create_authorization(&authz).await?;
        Ok(authz)
    }

    fn acme_provisioner(&self) -> AcmeResult<Arc<Provisioner>> {
        let provisioner =
            self.authority.registry().load_by_name(&self.config.provisioner).map_err(|_| {
                AcmeError::server_internal(format!(
                    "ACME provisioner '{}' is not configured",
                    self.config.provisioner
                ))
            })?;
        if provisioner.provisioner_type != ProvisionerType::Acme {
            return Err(AcmeError::server_internal(format!(
                "provisioner '{}' is not an ACME provisioner",
                provisioner.name
            )));
        }
        Ok(provisioner)
    }

    async fn fetch_order(&self, id: &OrderId) -> AcmeResult<Order> {
        self.db.get_order(id).await?.ok_or_else(|| AcmeError::not_found("order", id))
    }

    pub async fn get_order(&self, account: &Account, id: &OrderId) -> AcmeResult<Order> {
        let order = self.fetch_order(id).await?;
        ensure_owner(account, &order.account_id, "order")?;
        self.refresh_order(order).await
    }

    pub async fn list_orders_by_account(
        &self,
        account: &Account,
        account_id: &AccountId,
    ) -> AcmeResult<Vec<OrderId>> {
        ensure_owner(account, account_id, "order list")?;
        Ok(self.db.list_order_ids(account_id).await?)
    }

    /// Persist any status change implied by the clock or by the order's
    /// authorizations.
    async fn refresh_order(&self, mut order: Order) -> AcmeResult<Order> {
        for _ in 0..CAS_RETRIES {
            let Some((status, error)) = self.derived_order_status(&order, Utc::now()).await? else {
                return Ok(order);
            };
            let mut updated = order.clone();
            updated.status = status;
            if error.is_some() {
                updated.error = error;
            }
            if self.db.update_order(&order, &updated).await? {
                debug!(order_id = %order.id, status = status.as_str(), "Order status updated");
                return Ok(updated);
            }
            order = self.fetch_order(&order.id).await?;
        }
        Ok(order)
    }

    async fn derived_order_status(
        &self,
        order: &Order,
        now: DateTime<Utc>,
    ) -> AcmeResult<Option<(OrderStatus, Option<AcmeError>)>> {
        // Processing belongs to the finalizer; it settles the order itself.
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::Ready) {
            return Ok(None);
        }
        if order.is_expired_at(now) {
            let problem = AcmeError::malformed("order has expired");
            return Ok(Some((OrderStatus::Invalid, Some(problem))));
        }

        let mut all_valid = true;
        for id in &order.authorization_ids {
            let authz = self.refresh_authorization(self.fetch_authorization(id).await?, now).await?;
            if authz.status.is_failed() {
                let problem = AcmeError::unauthorized(format!(
                    "authorization for {} is {}",
                    authz.identifier,
                    authz.status.as_str()
                ));
                return Ok(Some((OrderStatus::Invalid, Some(problem))));
            }
            all_valid &= authz.status == AuthorizationStatus::Valid;
        }

        if order.status == OrderStatus::Pending && all_valid {
            return Ok(Some((OrderStatus::Ready, None)));
        }
        Ok(None)
    }

    /// Issue the certificate for a ready order.
    ///
    /// A valid order is returned as is. Requests that fail validation leave
    /// the order untouched; a signing failure marks it invalid.
    pub async fn finalize_order(
        &self,
        account: &Account,
        id: &OrderId,
        payload: &Payload,
    ) -> AcmeResult<Order> {
        let account = self.active_account(account).await?;
        let request: FinalizeRequest = payload.parse()?;
        let csr_der = request.csr_der()?;

        let order = self.get_order(&account, id).await?;
        if order.status == OrderStatus::Valid {
            return Ok(order);
        }
        if order.status != OrderStatus::Ready {
            return Err(AcmeError::order_not_ready(format!(
                "order is {}, not ready",
                order.status.as_str()
            )));
        }

        let csr = CsrInfo::parse(&csr_der).map_err(|e| AcmeError::bad_csr(e.public_message()))?;
        let ordered: BTreeSet<Identifier> = order.identifiers.iter().cloned().collect();
        if csr_identifiers(&csr)? != ordered {
            return Err(AcmeError::bad_csr("CSR names do not match the order identifiers"));
        }
        let fingerprint = csr.key_fingerprint();
        if self.config.reject_key_reuse && self.db.is_key_used(&fingerprint).await? {
            return Err(AcmeError::bad_public_key(
                "the CSR key already backs another certificate",
            ));
        }
        let provisioner =
            self.authority.registry().load_by_id(&order.provisioner_id).map_err(|_| {
                AcmeError::server_internal(format!(
                    "provisioner '{}' is no longer configured",
                    order.provisioner_id
                ))
            })?;

        let span = crate::acme_span!("finalize_order", account.id, order_id = %order.id);
        async {
            let mut processing = order.clone();
            processing.status = OrderStatus::Processing;
            if !self.db.update_order(&order, &processing).await? {
                debug!("Order changed before finalization; returning current state");
                return self.fetch_order(id).await;
            }

            let options = Self::sign_options(&provisioner, &account, &processing, Utc::now());
            let issued = match self.authority.sign(&csr_der, &options).await {
                Ok(issued) => issued,
                Err(e) => {
                    let problem = AcmeError::from(e);
                    let mut failed = processing.clone();
                    failed.status = OrderStatus::Invalid;
                    failed.error = Some(problem.clone());
                    if !self.db.update_order(&processing, &failed).await? {
                        warn!("Order changed while recording a signing failure");
                    }
                    warn!(error = %problem, "Order finalization failed");
                    return Err(problem);
                }
            };

            let certificate = AcmeCertificate {
                id: CertificateId::new(),
                account_id: account.id.clone(),
                order_id: order.id.clone(),
                serial: issued.serial,
                leaf_der: issued.certificate_der,
                chain_der: issued.chain_der,
                created_at: Utc::now(),
            };
            self.db.create_certificate(&certificate).await?;
            if !self.db.record_key(&fingerprint, &certificate.id).await? {
                debug!("Certificate key was already recorded");
            }

            let mut valid = processing.clone();
            valid.status = OrderStatus::Valid;
            valid.certificate_id = Some(certificate.id.clone());
            if !self.db.update_order(&processing, &valid).await? {
                return Err(AcmeError::server_internal("order changed during finalization"));
            }
            info!(serial = %certificate.serial, "ACME order finalized");
            Ok::<Order, AcmeError>(valid)
        }
        .instrument(span)
        .await
    }

    fn sign_options(
        provisioner: &Provisioner,
        account: &Account,
        order: &Order,
        now: DateTime<Utc>,
    ) -> SignOptions {
        let names = order.identifiers.iter().map(|i| i.value.clone()).collect();
        let mut options = SignOptions::for_provisioner(provisioner, account.id.to_string())
            .with(SignOption::AllowedNames(names));

        let window = match (order.not_before, order.not_after) {
            (None, None) => None,
            (Some(not_before), Some(not_after)) => Some((not_before, not_after)),
            (Some(not_before), None) => {
                Some((not_before, not_before + provisioner.claims.default_duration()))
            }
            (None, Some(not_after)) => Some((now, not_after)),
        };
        if let Some((not_before, not_after)) = window {
            options.push(SignOption::ValidityWindow { not_before, not_after });
        }
        options
    }

    // ---------------------------------------------------------- authorizations

    async fn fetch_authorization(&self, id: &AuthorizationId) -> AcmeResult<Authorization> {
        self.db
            .get_authorization(id)
            .await?
            .ok_or_else(|| AcmeError::not_found("authorization", id))
    }

    /// Mark a pending or valid authorization past its deadline as expired.
    async fn refresh_authorization(
        &self,
        mut authz: Authorization,
        now: DateTime<Utc>,
    ) -> AcmeResult<Authorization> {
        for _ in 0..CAS_RETRIES {
            let live =
                matches!(authz.status, AuthorizationStatus::Pending | AuthorizationStatus::Valid);
            if !live || !authz.is_expired_at(now) {
                return Ok(authz);
            }
            let mut expired = authz.clone();
            expired.status = AuthorizationStatus::Expired;
            if self.db.update_authorization(&authz, &expired).await? {
                debug!(authz_id = %authz.id, "Authorization expired");
                return Ok(expired);
            }
            authz = self.fetch_authorization(&authz.id).await?;
        }
        Ok(authz)
    }

    pub async fn get_authorization(
        &self,
        account: &Account,
        id: &AuthorizationId,
    ) -> AcmeResult<Authorization> {
        let authz = self.fetch_authorization(id).await?;
        ensure_owner(account, &authz.account_id, "authorization")?;
        self.refresh_authorization(authz, Utc::now()).await
    }

    /// Client-requested deactivation of a pending or valid authorization.
    pub async fn deactivate_authorization(
        &self,
        account: &Account,
        id: &AuthorizationId,
        payload: &Payload,
    ) -> AcmeResult<Authorization> {
        let account = self.active_account(account).await?;
        let request: UpdateAuthorizationRequest = payload.parse()?;
        if request.status != "deactivated" {
            return Err(AcmeError::malformed(format!(
                "cannot update authorization status to '{}'",
                request.status
            )));
        }

        for _ in 0..CAS_RETRIES {
            let authz = self.get_authorization(&account, id).await?;
            match authz.status {
                AuthorizationStatus::Deactivated => return Ok(authz),
                AuthorizationStatus::Pending | AuthorizationStatus::Valid => {}
                other => {
                    return Err(AcmeError::malformed(format!(
                        "cannot deactivate an authorization that is {}",
                        other.as_str()
                    )))
                }
            }
            let mut deactivated = authz.clone();
            deactivated.status = AuthorizationStatus::Deactivated;
            if self.db.update_authorization(&authz, &deactivated).await? {
                info!(account_id = %account.id, authz_id = %id, "Authorization deactivated");
                return Ok(deactivated);
            }
        }
        Err(contention("authorization"))
    }

    /// Move a pending authorization to `target`. Any other state is left alone.
    async fn settle_authorization(
        &self,
        id: &AuthorizationId,
        target: AuthorizationStatus,
    ) -> AcmeResult<()> {
        for _ in 0..CAS_RETRIES {
            let authz = self.fetch_authorization(id).await?;
            if authz.status != AuthorizationStatus::Pending {
                return Ok(());
            }
            let mut settled = authz.clone();
            settled.status = target;
            if self.db.update_authorization(&authz, &settled).await? {
                info!(authz_id = %id, status = target.as_str(), "Authorization settled");
                return Ok(());
            }
        }
        Err(contention("authorization"))
    }

    // -------------------------------------------------------------- challenges

    async fn fetch_challenge(&self, id: &ChallengeId) -> AcmeResult<Challenge> {
        self.db.get_challenge(id).await?.ok_or_else(|| AcmeError::not_found("challenge", id))
    }

    pub async fn get_challenge(
        &self,
        account: &Account,
        id: &ChallengeId,
    ) -> AcmeResult<Challenge> {
        let challenge = self.fetch_challenge(id).await?;
        ensure_owner(account, &challenge.account_id, "challenge")?;
        Ok(challenge)
    }

    /// Start validation of a pending challenge.
    ///
    /// The challenge is moved to `processing` and the validator runs in the
    /// background; its verdict arrives through `report_validation_result`.
    /// Challenges that are already processing or settled are returned as
    /// stored, and POST-as-GET never starts a validation.
    pub async fn validate_challenge(
        &self,
        account: &Account,
        authz_id: &AuthorizationId,
        challenge_id: &ChallengeId,
        payload: &Payload,
    ) -> AcmeResult<Challenge> {
        let account = self.active_account(account).await?;
        if !payload.is_post_as_get() {
            payload.parse::<ChallengeRequest>()?;
        }

        let authz = self.get_authorization(&account, authz_id).await?;
        if !authz.challenge_ids.contains(challenge_id) {
            return Err(AcmeError::not_found("challenge", challenge_id));
        }
        let challenge = self.fetch_challenge(challenge_id).await?;
        if payload.is_post_as_get() || challenge.status != ChallengeStatus::Pending {
            return Ok(challenge);
        }
        if authz.status != AuthorizationStatus::Pending {
            return Err(AcmeError::malformed(format!(
                "authorization is {}, not pending",
                authz.status.as_str()
            )));
        }

        let key_authorization = jwk::key_authorization(&challenge.token, &account.key)?;
        let mut processing = challenge.clone();
        processing.status = ChallengeStatus::Processing;
        processing.error = None;
        if !self.db.update_challenge(&challenge, &processing).await? {
            return self.fetch_challenge(challenge_id).await;
        }

        info!(
            account_id = %account.id,
            challenge_id = %challenge_id,
            challenge_type = processing.challenge_type.as_str(),
            "Challenge validation started"
        );
        self.spawn_validation(ValidationRequest {
            challenge: processing.clone(),
            identifier: authz.identifier,
            key_authorization,
        });
        Ok(processing)
    }

    fn spawn_validation(&self, request: ValidationRequest) {
        let service = self.clone();
        let span = crate::acme_span!(
            "validate_challenge",
            request.challenge.account_id,
            challenge_id = %request.challenge.id
        );

        tokio::spawn(
            async move {
                let challenge_id = request.challenge.id.clone();
                let validator = Arc::clone(&service.validator);
                let attempt = tokio::spawn(async move { validator.validate(&request).await });
                let abort = attempt.abort_handle();

                let outcome =
                    match tokio::time::timeout(service.config.challenge_timeout(), attempt).await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(e)) => {
                            warn!(error = %e, "Challenge validator task failed");
                            ValidationOutcome::Invalid(AcmeError::server_internal(
                                "challenge validation failed",
                            ))
                        }
                        Err(_) => {
                            abort.abort();
                            ValidationOutcome::Invalid(AcmeError::connection(
                                "challenge validation timed out",
                            ))
                        }
                    };

                if let Err(e) = service.report_validation_result(&challenge_id, outcome).await {
                    warn!(error = %e, "Failed to record challenge validation result");
                }
            }
            .instrument(span),
        );
    }

    /// Record a validator verdict. Only the first verdict for a processing
    /// challenge is applied; later ones are dropped.
    pub async fn report_validation_result(
        &self,
        challenge_id: &ChallengeId,
        outcome: ValidationOutcome,
    ) -> AcmeResult<Challenge> {
        let challenge = self.fetch_challenge(challenge_id).await?;
        if challenge.status != ChallengeStatus::Processing {
            debug!(challenge_id = %challenge_id, "Discarding result for a settled challenge");
            return Ok(challenge);
        }

        let mut updated = challenge.clone();
        match outcome {
            ValidationOutcome::Valid => {
                updated.status = ChallengeStatus::Valid;
                updated.validated_at = Some(Utc::now());
                updated.error = None;
            }
            ValidationOutcome::Invalid(problem) => {
                updated.retry_count += 1;
                updated.error = Some(problem);
                updated.status = if updated.retry_count < self.config.max_retries {
                    ChallengeStatus::Pending
                } else {
                    ChallengeStatus::Invalid
                };
            }
        }

        if !self.db.update_challenge(&challenge, &updated).await? {
            debug!(challenge_id = %challenge_id, "Another result was recorded first");
            return self.fetch_challenge(challenge_id).await;
        }
        info!(
            challenge_id = %challenge_id,
            status = ?updated.status,
            retry_count = updated.retry_count,
            "Challenge validation result recorded"
        );

        match updated.status {
            ChallengeStatus::Valid => {
                self.settle_authorization(&updated.authorization_id, AuthorizationStatus::Valid)
                    .await?;
            }
            ChallengeStatus::Invalid => {
                if self.all_challenges_invalid(&updated.authorization_id).await? {
                    self.settle_authorization(
                        &updated.authorization_id,
                        AuthorizationStatus::Invalid,
                    )
                    .await?;
                }
            }
            ChallengeStatus::Pending | ChallengeStatus::Processing => {}
        }
        Ok(updated)
    }

    async fn all_challenges_invalid(&self, authz_id: &AuthorizationId) -> AcmeResult<bool> {
        let authz = self.fetch_authorization(authz_id).await?;
        for id in &authz.challenge_ids {
            if self.fetch_challenge(id).await?.status != ChallengeStatus::Invalid {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ------------------------------------------------------------ certificates

    /// PEM chain of an issued certificate, leaf first.
    pub async fn get_certificate(
        &self,
        account: &Account,
        id: &CertificateId,
    ) -> AcmeResult<String> {
        let certificate = self
            .db
            .get_certificate(id)
            .await?
            .ok_or_else(|| AcmeError::not_found("certificate", id))?;
        ensure_owner(account, &certificate.account_id, "certificate")?;
        Ok(certificate.pem_chain())
    }

    /// `revokeCert` with a decoded payload.
    pub async fn revoke(&self, account: &Account, payload: &Payload) -> AcmeResult<()> {
        let request: RevokeCertificateRequest = payload.parse()?;
        let cert_der = request.certificate_der()?;
        self.revoke_certificate(account, &cert_der, request.reason).await
    }

    /// Revoke a certificate this account obtained through ACME.
    pub async fn revoke_certificate(
        &self,
        account: &Account,
        cert_der: &[u8],
        reason_code: Option<i32>,
    ) -> AcmeResult<()> {
        let account = self.active_account(account).await?;
        let reason_code = reason_code.unwrap_or(0);
        if !(0..=MAX_REASON_CODE).contains(&reason_code) || reason_code == UNASSIGNED_REASON_CODE {
            return Err(AcmeError::bad_revocation_reason(format!(
                "reason code {} is not allowed",
                reason_code
            )));
        }

        let peer = PeerCertificate::parse(cert_der)
            .map_err(|_| AcmeError::malformed("unable to parse certificate"))?;
        let certificate = self
            .db
            .get_certificate_by_serial(&peer.serial)
            .await?
            .filter(|c| c.leaf_der.as_slice() == cert_der)
            .ok_or_else(|| AcmeError::unauthorized("certificate was not issued by this service"))?;
        ensure_owner(&account, &certificate.account_id, "certificate")?;

        self.authority
            .revoke(&RevokeOptions {
                serial: peer.serial,
                reason_code,
                passive: true,
                acme: true,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}
