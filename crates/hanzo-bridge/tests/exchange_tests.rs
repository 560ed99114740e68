//! End-to-end exchanges against a simulated bank

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use common::{slug, BankBehaviour, BankIdentity, Harness, MockBank, RELAY_URL};
use hanzo_bridge::{
    ApplicationRecord, BridgeError, ExchangeOrchestrator, ExchangeRequest, ExchangeStage,
    KeyRegistry, KeyValidity,
};
use hanzo_bridge_crypto::CryptoError;
use serde_json::json;

const FAST_RSA_BITS: usize = 2048;

struct Scenario {
    harness: Harness,
    application: ApplicationRecord,
    bank: Arc<MockBank>,
    orchestrator: ExchangeOrchestrator,
}

async fn scenario(rsa_bits: usize, behaviour: BankBehaviour, timeout: Duration) -> Scenario {
    let bank_identity = BankIdentity::generate("firstbank", rsa_bits);
    let harness = Harness::new(rsa_bits, bank_identity.remote_public_keys());

    let application = harness
        .service
        .provision_application(&slug("acme"))
        .await
        .unwrap();
    harness
        .service
        .fetch_bank_keys(&bank_identity.slug, "https://relay.test")
        .await
        .unwrap();

    let app_keys = harness
        .store
        .load_application_keys(&application.slug, &application.key_version)
        .unwrap();
    let bank = Arc::new(MockBank::new(
        &bank_identity,
        app_keys.rsa_public,
        app_keys.verifying,
        behaviour,
    ));

    let orchestrator = ExchangeOrchestrator::new(
        harness.store.clone(),
        harness.registry.clone(),
        bank.clone(),
        timeout,
    );

    Scenario {
        harness,
        application,
        bank,
        orchestrator,
    }
}

fn request(application: &ApplicationRecord, payload: &serde_json::Value) -> ExchangeRequest {
    ExchangeRequest {
        application: application.slug.clone(),
        key_version: application.key_version.clone(),
        bank: slug("firstbank"),
        relay_url: RELAY_URL.to_string(),
        payload: serde_json::to_vec(payload).unwrap(),
    }
}

#[tokio::test]
async fn test_acme_firstbank_round_trip() {
    let s = scenario(
        hanzo_bridge_crypto::DEFAULT_RSA_KEY_BITS,
        BankBehaviour::Respond,
        Duration::from_secs(10),
    )
    .await;
    let payload = json!({ "amount": 100 });

    let reply: serde_json::Value = s
        .orchestrator
        .exchange_json(
            &s.application.slug,
            &s.application.key_version,
            &slug("firstbank"),
            RELAY_URL,
            &payload,
        )
        .await
        .unwrap();

    assert_eq!(reply, json!({ "status": "accepted", "echo": payload }));

    // The bank saw the plaintext and the routing headers
    let received = s.bank.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let (headers, body) = &received[0];
    assert_eq!(headers.source_slug.as_str(), "acme");
    assert_eq!(headers.destination_slug.as_str(), "firstbank");
    assert_eq!(headers.key_version, s.application.key_version);
    assert_eq!(body.as_slice(), br#"{"amount":100}"#);
}

#[tokio::test]
async fn test_corrupted_reply_signature_is_rejected() {
    let s = scenario(
        FAST_RSA_BITS,
        BankBehaviour::CorruptSignature,
        Duration::from_secs(10),
    )
    .await;

    let err = s
        .orchestrator
        .exchange(&request(&s.application, &json!({ "amount": "1.00" })))
        .await
        .unwrap_err();

    assert_eq!(err.stage, ExchangeStage::DecryptVerify);
    assert!(matches!(
        err.source,
        BridgeError::Crypto(CryptoError::Authentication)
    ));
    assert_eq!(
        err.to_string(),
        "exchange failed at decrypt_verify: message rejected"
    );
}

#[tokio::test]
async fn test_misaddressed_reply_is_rejected() {
    let s = scenario(
        FAST_RSA_BITS,
        BankBehaviour::ReplyToSomeoneElse,
        Duration::from_secs(10),
    )
    .await;

    let err = s
        .orchestrator
        .exchange(&request(&s.application, &json!({})))
        .await
        .unwrap_err();

    assert_eq!(err.stage, ExchangeStage::AwaitResponse);
    assert!(matches!(err.source, BridgeError::Format(_)));
}

#[tokio::test]
async fn test_slow_bank_times_out() {
    let s = scenario(
        FAST_RSA_BITS,
        BankBehaviour::Stall(Duration::from_secs(30)),
        Duration::from_millis(100),
    )
    .await;

    let err = s
        .orchestrator
        .exchange(&request(&s.application, &json!({})))
        .await
        .unwrap_err();

    assert_eq!(err.stage, ExchangeStage::AwaitResponse);
    assert!(matches!(err.source, BridgeError::Transport(_)));
    assert_eq!(s.bank.calls(), 1);
}

#[tokio::test]
async fn test_expired_key_version_fails_before_any_io() {
    let s = scenario(FAST_RSA_BITS, BankBehaviour::Respond, Duration::from_secs(10)).await;

    let expired = KeyValidity::starting_at(Utc::now() - ChronoDuration::days(120), 90, 365).unwrap();
    s.harness
        .registry
        .record_application_keys(
            &s.application.slug,
            &s.application.key_version,
            &s.application.paths,
            &expired,
        )
        .await
        .unwrap();

    let err = s
        .orchestrator
        .exchange(&request(&s.application, &json!({})))
        .await
        .unwrap_err();

    assert_eq!(err.stage, ExchangeStage::BuildRequest);
    assert!(matches!(err.source, BridgeError::KeyInactive { .. }));
    assert_eq!(s.bank.calls(), 0);
}

#[tokio::test]
async fn test_unknown_bank_fails_before_any_io() {
    let s = scenario(FAST_RSA_BITS, BankBehaviour::Respond, Duration::from_secs(10)).await;

    let mut req = request(&s.application, &json!({}));
    req.bank = slug("otherbank");
    let err = s.orchestrator.exchange(&req).await.unwrap_err();

    assert_eq!(err.stage, ExchangeStage::BuildRequest);
    assert!(matches!(err.source, BridgeError::KeyResolution(_)));
    assert_eq!(s.bank.calls(), 0);
}

#[tokio::test]
async fn test_each_exchange_uses_fresh_envelopes() {
    let s = scenario(FAST_RSA_BITS, BankBehaviour::Respond, Duration::from_secs(10)).await;
    let req = request(&s.application, &json!({ "amount": "5.00" }));

    let first = s.orchestrator.exchange(&req).await.unwrap();
    let second = s.orchestrator.exchange(&req).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(s.bank.calls(), 2);

    let envelopes = s.bank.envelopes.lock().unwrap();
    assert_ne!(envelopes[0], envelopes[1]);
    assert_eq!(
        first,
        MockBank::reply_for(&serde_json::to_vec(&json!({ "amount": "5.00" })).unwrap())
    );
}
