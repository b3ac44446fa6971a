//! ACME state machine tests, driven through `AcmeService` with a scripted
//! challenge validator.

mod common;

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use certplane::acme::jwk::thumbprint;
use certplane::acme::{
    Account, AccountStatus, AcmeError, AcmeService, AuthorizationStatus, ChallengeStatus,
    ChallengeType, Order, OrderStatus, Payload, ProblemType, ValidationOutcome,
};
use certplane::config::AcmeConfig;
use common::{account_jwk, acme_harness, csr, csr_with_key, settled_challenge, AcmeHarness};
use serde_json::{json, Value};

async fn register(service: &AcmeService) -> Account {
    register_with(service, &account_jwk()).await
}

async fn register_with(service: &AcmeService, jwk: &Value) -> Account {
    let payload = Payload::json(&json!({
        "termsOfServiceAgreed": true,
        "contact": ["mailto:ops@example.com"],
    }));
    service.new_account(jwk, &payload).await.expect("new account").account
}

async fn place_order(service: &AcmeService, account: &Account, names: &[&str]) -> Order {
    let identifiers: Vec<Value> =
        names.iter().map(|n| json!({ "type": "dns", "value": n })).collect();
    service
        .new_order(account, &Payload::json(&json!({ "identifiers": identifiers })))
        .await
        .expect("new order")
}

/// Answer the first challenge of every authorization and wait for each verdict.
async fn answer_challenges(service: &AcmeService, account: &Account, order: &Order) {
    for authz_id in &order.authorization_ids {
        let authz = service.get_authorization(account, authz_id).await.unwrap();
        let challenge_id = &authz.challenge_ids[0];
        service
            .validate_challenge(account, authz_id, challenge_id, &Payload::json(&json!({})))
            .await
            .expect("validate challenge");
        settled_challenge(service, account, challenge_id).await;
    }
}

fn finalize_payload(csr_der: &[u8]) -> Payload {
    Payload::json(&json!({ "csr": URL_SAFE_NO_PAD.encode(csr_der) }))
}

async fn issue(h: &AcmeHarness, account: &Account, names: &[&str], csr_der: &[u8]) -> Order {
    let order = place_order(&h.service, account, names).await;
    answer_challenges(&h.service, account, &order).await;
    h.service
        .finalize_order(account, &order.id, &finalize_payload(csr_der))
        .await
        .expect("finalize")
}

fn problem(result: Result<impl std::fmt::Debug, AcmeError>) -> ProblemType {
    result.expect_err("expected a problem").problem_type
}

#[tokio::test]
async fn order_to_certificate() {
    let h = acme_harness(AcmeConfig::default());
    let jwk = account_jwk();
    let account = register_with(&h.service, &jwk).await;
    assert_eq!(account.status, AccountStatus::Valid);
    assert_eq!(account.contact, vec!["mailto:ops@example.com"]);

    let order = place_order(&h.service, &account, &["WWW.example.com.", "*.example.com"]).await;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.identifiers.len(), 2);
    assert_eq!(order.authorization_ids.len(), 2);

    for authz_id in &order.authorization_ids {
        let authz = h.service.get_authorization(&account, authz_id).await.unwrap();
        assert_eq!(authz.status, AuthorizationStatus::Pending);
        let types: Vec<ChallengeType> = {
            let mut types = Vec::new();
            for id in &authz.challenge_ids {
                types.push(h.service.get_challenge(&account, id).await.unwrap().challenge_type);
            }
            types
        };
        if authz.wildcard {
            assert_eq!(authz.identifier.value, "example.com");
            assert_eq!(types, vec![ChallengeType::Dns01]);
        } else {
            assert_eq!(authz.identifier.value, "www.example.com");
            assert_eq!(types.len(), 3);
        }
    }

    answer_challenges(&h.service, &account, &order).await;
    let ready = h.service.get_order(&account, &order.id).await.unwrap();
    assert_eq!(ready.status, OrderStatus::Ready);

    let key_id = thumbprint(&jwk).unwrap();
    assert_eq!(h.validator.requests().len(), 2);
    for request in h.validator.requests() {
        assert_eq!(request.key_authorization, format!("{}.{}", request.challenge.token, key_id));
    }

    let (csr_der, _key) = csr(&["www.example.com", "*.example.com"]);
    let valid = h
        .service
        .finalize_order(&account, &order.id, &finalize_payload(&csr_der))
        .await
        .unwrap();
    assert_eq!(valid.status, OrderStatus::Valid);
    let certificate_id = valid.certificate_id.clone().expect("certificate id");

    let pem = h.service.get_certificate(&account, &certificate_id).await.unwrap();
    assert_eq!(pem.matches("-----BEGIN CERTIFICATE-----").count(), 2);

    // Finalizing again returns the issued order unchanged.
    let again = h
        .service
        .finalize_order(&account, &order.id, &finalize_payload(&csr_der))
        .await
        .unwrap();
    assert_eq!(again, valid);

    let orders = h.service.list_orders_by_account(&account, &account.id).await.unwrap();
    assert_eq!(orders, vec![order.id]);
}

#[tokio::test]
async fn account_registration_is_idempotent_per_key() {
    let h = acme_harness(AcmeConfig::default());
    let jwk = account_jwk();
    let first = register_with(&h.service, &jwk).await;

    let existing = h
        .service
        .new_account(&jwk, &Payload::json(&json!({ "onlyReturnExisting": true })))
        .await
        .unwrap();
    assert!(!existing.created);
    assert_eq!(existing.account.id, first.id);

    let unknown = h
        .service
        .new_account(&account_jwk(), &Payload::json(&json!({ "onlyReturnExisting": true })))
        .await;
    assert_eq!(problem(unknown), ProblemType::AccountDoesNotExist);

    let bad_payload =
        h.service.new_account(&account_jwk(), &Payload::json(&json!({ "x": 1 }))).await;
    assert_eq!(problem(bad_payload), ProblemType::Malformed);
}

#[tokio::test]
async fn concurrent_registration_creates_one_account() {
    let h = acme_harness(AcmeConfig::default());
    let jwk = account_jwk();

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let service = h.service.clone();
            let jwk = jwk.clone();
            tokio::spawn(async move {
                service.new_account(&jwk, &Payload::json(&json!({}))).await
            })
        })
        .collect();

    let mut created = 0;
    let mut ids = Vec::new();
    for attempt in futures::future::join_all(attempts).await {
        let outcome = attempt.unwrap().unwrap();
        created += usize::from(outcome.created);
        ids.push(outcome.account.id);
    }
    assert_eq!(created, 1);
    ids.dedup();
    assert_eq!(ids.len(), 1);
    let by_key = h.service.account_by_key_id(&thumbprint(&jwk).unwrap()).await.unwrap();
    assert_eq!(by_key.id, ids[0]);
}

#[tokio::test]
async fn deactivated_account_is_final() {
    let h = acme_harness(AcmeConfig::default());
    let account = register(&h.service).await;

    let moved = json!({ "contact": ["mailto:new@example.com"] });
    let updated =
        h.service.get_or_update_account(&account, &Payload::json(&moved)).await.unwrap();
    assert_eq!(updated.contact, vec!["mailto:new@example.com"]);

    // An empty contact list is no update, so it may ride along with a deactivation.
    let unchanged = h
        .service
        .get_or_update_account(&account, &Payload::json(&json!({ "contact": [] })))
        .await
        .unwrap();
    assert_eq!(unchanged.contact, updated.contact);

    let deactivate = json!({ "contact": [], "status": "deactivated" });
    let deactivated =
        h.service.get_or_update_account(&account, &Payload::json(&deactivate)).await.unwrap();
    assert_eq!(deactivated.status, AccountStatus::Deactivated);
    assert_eq!(deactivated.contact, updated.contact);

    let fetched =
        h.service.get_or_update_account(&account, &Payload::post_as_get()).await.unwrap();
    assert_eq!(fetched.status, AccountStatus::Deactivated);

    let contact = h
        .service
        .get_or_update_account(&account, &Payload::json(&json!({ "contact": ["mailto:x@y.z"] })))
        .await;
    assert_eq!(problem(contact), ProblemType::Unauthorized);

    let identifiers = json!({ "identifiers": [{ "type": "dns", "value": "a.example.com" }] });
    let order = h.service.new_order(&account, &Payload::json(&identifiers)).await.unwrap_err();
    assert_eq!(order.problem_type, ProblemType::Unauthorized);
    assert_eq!(order.status, 403);
}

#[tokio::test]
async fn finalize_requires_a_ready_order_and_matching_csr() {
    let h = acme_harness(AcmeConfig::default());
    let account = register(&h.service).await;
    let order = place_order(&h.service, &account, &["app.example.com"]).await;

    let (csr_der, _key) = csr(&["app.example.com"]);
    let early = h.service.finalize_order(&account, &order.id, &finalize_payload(&csr_der)).await;
    assert_eq!(problem(early), ProblemType::OrderNotReady);

    answer_challenges(&h.service, &account, &order).await;

    let (other_der, _key) = csr(&["app.example.com", "extra.example.com"]);
    let mismatch =
        h.service.finalize_order(&account, &order.id, &finalize_payload(&other_der)).await;
    assert_eq!(problem(mismatch), ProblemType::BadCsr);

    let garbage = h.service.finalize_order(&account, &order.id, &finalize_payload(b"nope")).await;
    assert_eq!(problem(garbage), ProblemType::BadCsr);

    let still_ready = h.service.get_order(&account, &order.id).await.unwrap();
    assert_eq!(still_ready.status, OrderStatus::Ready);

    let valid = h
        .service
        .finalize_order(&account, &order.id, &finalize_payload(&csr_der))
        .await
        .unwrap();
    assert_eq!(valid.status, OrderStatus::Valid);
}

#[tokio::test]
async fn resources_belong_to_their_account() {
    let h = acme_harness(AcmeConfig::default());
    let owner = register(&h.service).await;
    let other = register(&h.service).await;
    let order = place_order(&h.service, &owner, &["app.example.com"]).await;

    let order_result = h.service.get_order(&other, &order.id).await;
    assert_eq!(problem(order_result), ProblemType::Unauthorized);
    assert_eq!(
        problem(h.service.get_authorization(&other, &order.authorization_ids[0]).await),
        ProblemType::Unauthorized
    );
    assert_eq!(
        problem(h.service.list_orders_by_account(&other, &owner.id).await),
        ProblemType::Unauthorized
    );
}

#[tokio::test]
async fn failed_challenges_retry_then_invalidate() {
    let h = acme_harness(AcmeConfig { max_retries: 2, ..Default::default() });
    let account = register(&h.service).await;
    let order = place_order(&h.service, &account, &["*.example.com"]).await;
    let authz_id = &order.authorization_ids[0];
    let authz = h.service.get_authorization(&account, authz_id).await.unwrap();
    let challenge_id = &authz.challenge_ids[0];

    h.validator.push(ValidationOutcome::Invalid(AcmeError::connection("no TXT record")));
    h.validator.push(ValidationOutcome::Invalid(AcmeError::incorrect_response("wrong digest")));

    let respond = || Payload::json(&json!({}));
    h.service.validate_challenge(&account, authz_id, challenge_id, &respond()).await.unwrap();
    let first = settled_challenge(&h.service, &account, challenge_id).await;
    assert_eq!(first.status, ChallengeStatus::Pending);
    assert_eq!(first.retry_count, 1);
    assert_eq!(first.error.as_ref().map(|e| e.problem_type), Some(ProblemType::Connection));
    assert_eq!(
        h.service.get_authorization(&account, authz_id).await.unwrap().status,
        AuthorizationStatus::Pending
    );

    h.service.validate_challenge(&account, authz_id, challenge_id, &respond()).await.unwrap();
    let second = settled_challenge(&h.service, &account, challenge_id).await;
    assert_eq!(second.status, ChallengeStatus::Invalid);
    assert_eq!(second.retry_count, 2);
    assert_eq!(
        second.error.as_ref().map(|e| e.problem_type),
        Some(ProblemType::IncorrectResponse)
    );

    assert_eq!(
        h.service.get_authorization(&account, authz_id).await.unwrap().status,
        AuthorizationStatus::Invalid
    );
    let order = h.service.get_order(&account, &order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Invalid);
    assert!(order.error.is_some());
}

#[tokio::test]
async fn slow_validation_times_out() {
    let h = acme_harness(AcmeConfig { challenge_timeout_seconds: 1, ..Default::default() });
    h.validator.stall_for(Duration::from_secs(10));
    let account = register(&h.service).await;
    let order = place_order(&h.service, &account, &["slow.example.com"]).await;
    let authz_id = &order.authorization_ids[0];
    let authz = h.service.get_authorization(&account, authz_id).await.unwrap();
    let challenge_id = &authz.challenge_ids[0];

    h.service
        .validate_challenge(&account, authz_id, challenge_id, &Payload::json(&json!({})))
        .await
        .unwrap();
    let challenge = settled_challenge(&h.service, &account, challenge_id).await;
    assert_eq!(challenge.status, ChallengeStatus::Pending);
    assert_eq!(challenge.retry_count, 1);
    assert_eq!(challenge.error.map(|e| e.problem_type), Some(ProblemType::Connection));
}

#[tokio::test]
async fn first_verdict_wins() {
    let h = acme_harness(AcmeConfig { challenge_timeout_seconds: 60, ..Default::default() });
    h.validator.stall_for(Duration::from_secs(30));
    let account = register(&h.service).await;
    let order = place_order(&h.service, &account, &["race.example.com"]).await;
    let authz_id = &order.authorization_ids[0];
    let authz = h.service.get_authorization(&account, authz_id).await.unwrap();
    let challenge_id = &authz.challenge_ids[0];

    // POST-as-GET reports state without starting a validation.
    let polled = h
        .service
        .validate_challenge(&account, authz_id, challenge_id, &Payload::post_as_get())
        .await
        .unwrap();
    assert_eq!(polled.status, ChallengeStatus::Pending);

    let processing = h
        .service
        .validate_challenge(&account, authz_id, challenge_id, &Payload::json(&json!({})))
        .await
        .unwrap();
    assert_eq!(processing.status, ChallengeStatus::Processing);

    let valid =
        h.service.report_validation_result(challenge_id, ValidationOutcome::Valid).await.unwrap();
    assert_eq!(valid.status, ChallengeStatus::Valid);
    assert!(valid.validated_at.is_some());

    let late = h
        .service
        .report_validation_result(
            challenge_id,
            ValidationOutcome::Invalid(AcmeError::connection("late")),
        )
        .await
        .unwrap();
    assert_eq!(late.status, ChallengeStatus::Valid);
    assert_eq!(late.retry_count, 0);

    assert_eq!(
        h.service.get_authorization(&account, authz_id).await.unwrap().status,
        AuthorizationStatus::Valid
    );
    assert_eq!(
        h.service.get_order(&account, &order.id).await.unwrap().status,
        OrderStatus::Ready
    );
}

#[tokio::test]
async fn expired_authorizations_invalidate_the_order() {
    let h =
        acme_harness(AcmeConfig { authorization_lifetime_seconds: 0, ..Default::default() });
    let account = register(&h.service).await;
    let order = place_order(&h.service, &account, &["late.example.com"]).await;

    let authz_id = &order.authorization_ids[0];
    let authz = h.service.get_authorization(&account, authz_id).await.unwrap();
    assert_eq!(authz.status, AuthorizationStatus::Expired);

    let order = h.service.get_order(&account, &order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Invalid);
}

#[tokio::test]
async fn expired_orders_become_invalid() {
    let h = acme_harness(AcmeConfig { order_lifetime_seconds: 0, ..Default::default() });
    let account = register(&h.service).await;
    let order = place_order(&h.service, &account, &["late.example.com"]).await;

    let order = h.service.get_order(&account, &order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Invalid);
    assert!(order.error.map(|e| e.detail).unwrap_or_default().contains("expired"));
}

#[tokio::test]
async fn deactivated_authorization_invalidates_the_order() {
    let h = acme_harness(AcmeConfig::default());
    let account = register(&h.service).await;
    let order = place_order(&h.service, &account, &["gone.example.com"]).await;
    let authz_id = &order.authorization_ids[0];

    let revalidate = Payload::json(&json!({ "status": "valid" }));
    let bad = h.service.deactivate_authorization(&account, authz_id, &revalidate).await;
    assert_eq!(problem(bad), ProblemType::Malformed);

    let deactivate = Payload::json(&json!({ "status": "deactivated" }));
    let authz = h.service.deactivate_authorization(&account, authz_id, &deactivate).await.unwrap();
    assert_eq!(authz.status, AuthorizationStatus::Deactivated);

    let challenge_id = &authz.challenge_ids[0];
    let refused = h
        .service
        .validate_challenge(&account, authz_id, challenge_id, &Payload::json(&json!({})))
        .await;
    assert_eq!(problem(refused), ProblemType::Malformed);

    let order = h.service.get_order(&account, &order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Invalid);
}

#[tokio::test]
async fn certificate_keys_are_not_reused() {
    let h = acme_harness(AcmeConfig::default());
    let account = register(&h.service).await;
    let key = rcgen::KeyPair::generate().unwrap();

    let csr_der = csr_with_key(&["one.example.com"], &key);
    issue(&h, &account, &["one.example.com"], &csr_der).await;

    let order = place_order(&h.service, &account, &["two.example.com"]).await;
    answer_challenges(&h.service, &account, &order).await;
    let reused = csr_with_key(&["two.example.com"], &key);
    let result = h.service.finalize_order(&account, &order.id, &finalize_payload(&reused)).await;
    assert_eq!(problem(result), ProblemType::BadPublicKey);
}

#[tokio::test]
async fn acme_revocation() {
    let h = acme_harness(AcmeConfig::default());
    let account = register(&h.service).await;
    let other = register(&h.service).await;
    let (csr_der, _key) = csr(&["svc.example.com"]);
    let order = issue(&h, &account, &["svc.example.com"], &csr_der).await;

    let certificate = h
        .service
        .db()
        .get_certificate(&order.certificate_id.unwrap())
        .await
        .unwrap()
        .expect("stored certificate");
    let revoke = |reason: i32| {
        Payload::json(&json!({
            "certificate": URL_SAFE_NO_PAD.encode(&certificate.leaf_der),
            "reason": reason,
        }))
    };

    for reason in [7, 11, -1] {
        let result = h.service.revoke(&account, &revoke(reason)).await;
        assert_eq!(problem(result), ProblemType::BadRevocationReason, "reason {}", reason);
    }
    assert_eq!(problem(h.service.revoke(&other, &revoke(1)).await), ProblemType::Unauthorized);

    h.service.revoke(&account, &revoke(1)).await.expect("owner revokes");
    assert!(h.service.authority().is_revoked(&certificate.serial).await.unwrap());

    let again = h.service.revoke(&account, &revoke(1)).await;
    assert_eq!(problem(again), ProblemType::AlreadyRevoked);
}
