//! End-to-end reconcile cycles against in-process collaborators.

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use meterwarden::protocol::models::{RegisterUsageRequest, RegisterUsageResponse};
use meterwarden::{
    Claim, EntitlementConfig, EntitlementRecord, EntitlementStore, FileStore, MemoryStore,
    MeteringClient, MeterwardenError, Outcome, Reconcile, ReconcileRequest, Reconciler, RecordKey,
    TrustAnchor,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// Test keypairs (DO NOT USE IN PRODUCTION)
const ANCHOR_PRIVATE_PEM: &str = include_str!("fixtures/anchor_private.pem");
const ANCHOR_PUBLIC_PEM: &str = include_str!("fixtures/anchor_public.pem");
const ROGUE_PRIVATE_PEM: &str = include_str!("fixtures/rogue_private.pem");

const NAMESPACE: &str = "upbound-system";
const IDENTITY: &str = "cluster-abc123";
const SIGNATURE_KEY: &str = "awsMeteringSignature";

fn config() -> EntitlementConfig {
    EntitlementConfig {
        trust_anchor: TrustAnchor {
            public_key_pem: ANCHOR_PUBLIC_PEM,
            version: 1,
        },
        ..EntitlementConfig::marketplace()
    }
}

fn record_key() -> RecordKey {
    RecordKey::new(NAMESPACE, config().record_name)
}

fn mint(private_pem: &str, nonce: &str) -> String {
    let claims = json!({
        "productCode": config().product_code,
        "nonce": nonce,
        "publicKeyVersion": 1,
    });
    let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).unwrap();
    encode(&Header::new(Algorithm::RS256), &claims, &key).unwrap()
}

enum Behaviour {
    Sign(&'static str),
    /// Anchor-signed token whose payload segment is replaced.
    BrokenPayload(&'static str),
    Reject,
    Hang(Duration),
}

/// Metering service double that records every call.
struct FakeMetering {
    behaviour: Behaviour,
    calls: Mutex<Vec<RegisterUsageRequest>>,
}

impl FakeMetering {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<RegisterUsageRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MeteringClient for FakeMetering {
    async fn register_usage(
        &self,
        request: &RegisterUsageRequest,
    ) -> Result<RegisterUsageResponse, MeterwardenError> {
        self.calls.lock().unwrap().push(request.clone());
        match &self.behaviour {
            Behaviour::Sign(pem) => Ok(RegisterUsageResponse {
                signature: mint(pem, &request.nonce),
                public_key_rotation_timestamp: None,
            }),
            Behaviour::BrokenPayload(payload) => {
                let token = mint(ANCHOR_PRIVATE_PEM, &request.nonce);
                let parts: Vec<&str> = token.split('.').collect();
                Ok(RegisterUsageResponse {
                    signature: format!("{}.{}.{}", parts[0], payload, parts[2]),
                    public_key_rotation_timestamp: None,
                })
            }
            Behaviour::Reject => Err(MeterwardenError::MeteringApi {
                status: 400,
                code: "CustomerNotEntitledException".to_string(),
                message: "not entitled".to_string(),
            }),
            Behaviour::Hang(d) => {
                tokio::time::sleep(*d).await;
                Ok(RegisterUsageResponse {
                    signature: mint(ANCHOR_PRIVATE_PEM, &request.nonce),
                    public_key_rotation_timestamp: None,
                })
            }
        }
    }
}

/// Store whose writes always fail.
struct ReadOnlyStore(MemoryStore);

#[async_trait]
impl EntitlementStore for ReadOnlyStore {
    async fn get_record(&self, key: &RecordKey) -> Result<EntitlementRecord, MeterwardenError> {
        self.0.get_record(key).await
    }

    async fn apply_record(
        &self,
        _record: &EntitlementRecord,
    ) -> Result<EntitlementRecord, MeterwardenError> {
        Err(MeterwardenError::StoreWrite("secrets is forbidden".to_string()))
    }

    async fn cluster_identity(&self) -> Result<String, MeterwardenError> {
        self.0.cluster_identity().await
    }
}

async fn seeded_store(cached: Option<&str>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new(IDENTITY));
    let mut record = store.create_record(record_key()).await;
    if let Some(token) = cached {
        record.set_cached_token(SIGNATURE_KEY, token);
        store.apply_record(&record).await.unwrap();
    }
    store
}

fn request() -> ReconcileRequest {
    ReconcileRequest::new(NAMESPACE)
}

#[tokio::test]
async fn empty_record_is_registered_persisted_and_confirmed() {
    let store = seeded_store(None).await;
    let metering = FakeMetering::new(Behaviour::Sign(ANCHOR_PRIVATE_PEM));
    let reconciler = Reconciler::new(config(), store.clone(), metering.clone()).unwrap();

    let outcome = reconciler.reconcile(&request()).await.unwrap();

    assert_eq!(outcome, Outcome::Confirmed);
    assert_eq!(outcome.requeue_after(), None);

    let calls = metering.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].nonce, IDENTITY);
    assert_eq!(calls[0].product_code, config().product_code);
    assert_eq!(calls[0].public_key_version, 1);

    let stored = store.snapshot(&record_key()).await.unwrap();
    assert_eq!(
        stored.cached_token(SIGNATURE_KEY).unwrap(),
        Some(mint(ANCHOR_PRIVATE_PEM, IDENTITY))
    );
}

#[tokio::test]
async fn later_cycles_never_register_again() {
    let store = seeded_store(None).await;
    let metering = FakeMetering::new(Behaviour::Sign(ANCHOR_PRIVATE_PEM));
    let reconciler = Reconciler::new(config(), store.clone(), metering.clone()).unwrap();

    for _ in 0..3 {
        let outcome = reconciler.reconcile(&request()).await.unwrap();
        assert!(outcome.is_confirmed());
    }
    assert_eq!(metering.calls().len(), 1);
}

#[tokio::test]
async fn cached_token_is_verified_without_metering_call() {
    let cached = mint(ANCHOR_PRIVATE_PEM, IDENTITY);
    let store = seeded_store(Some(&cached)).await;
    let before = store.snapshot(&record_key()).await.unwrap();
    let metering = FakeMetering::new(Behaviour::Reject);
    let reconciler = Reconciler::new(config(), store.clone(), metering.clone()).unwrap();

    let outcome = reconciler.reconcile(&request()).await.unwrap();

    assert_eq!(outcome, Outcome::Confirmed);
    assert!(metering.calls().is_empty());
    assert_eq!(store.snapshot(&record_key()).await.unwrap(), before);
}

#[tokio::test]
async fn foreign_signature_schedules_recheck() {
    let store = seeded_store(None).await;
    let metering = FakeMetering::new(Behaviour::Sign(ROGUE_PRIVATE_PEM));
    let reconciler = Reconciler::new(config(), store.clone(), metering).unwrap();

    let outcome = reconciler.reconcile(&request()).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Unconfirmed {
            recheck_after: Duration::from_secs(60)
        }
    );
    assert_eq!(outcome.requeue_after(), Some(Duration::from_secs(60)));
}

#[tokio::test]
async fn token_for_another_cluster_is_a_claim_error() {
    let cached = mint(ANCHOR_PRIVATE_PEM, "cluster-somewhere-else");
    let store = seeded_store(Some(&cached)).await;
    let metering = FakeMetering::new(Behaviour::Sign(ANCHOR_PRIVATE_PEM));
    let reconciler = Reconciler::new(config(), store, metering.clone()).unwrap();

    let err = reconciler.reconcile(&request()).await.unwrap_err();

    match err {
        MeterwardenError::ClaimMismatch(mismatch) => {
            assert_eq!(mismatch.claim, Claim::Nonce);
            assert_eq!(mismatch.expected, IDENTITY);
            assert_eq!(mismatch.actual, "cluster-somewhere-else");
        }
        other => panic!("expected claim mismatch, got {:?}", other),
    }
    assert!(metering.calls().is_empty());
}

#[tokio::test]
async fn malformed_token_payload_is_a_parse_error_not_unconfirmed() {
    // "bm90IGpzb24" is base64url for "not json".
    for payload in ["!!!not*base64!!!", "bm90IGpzb24"] {
        let store = seeded_store(None).await;
        let metering = FakeMetering::new(Behaviour::BrokenPayload(payload));
        let reconciler = Reconciler::new(config(), store, metering).unwrap();

        let result = reconciler.reconcile(&request()).await;

        assert!(
            matches!(result, Err(MeterwardenError::TokenParse(_))),
            "payload {:?} gave {:?}",
            payload,
            result
        );
    }
}

#[tokio::test]
async fn metering_rejection_fails_cycle_without_write() {
    let store = seeded_store(None).await;
    let metering = FakeMetering::new(Behaviour::Reject);
    let reconciler = Reconciler::new(config(), store.clone(), metering.clone()).unwrap();

    let err = reconciler.reconcile(&request()).await.unwrap_err();

    assert!(matches!(err, MeterwardenError::MeteringApi { status: 400, .. }));
    assert_eq!(metering.calls().len(), 1);
    let stored = store.snapshot(&record_key()).await.unwrap();
    assert_eq!(stored.cached_token(SIGNATURE_KEY).unwrap(), None);
    assert_eq!(stored.resource_version, 1);
}

#[tokio::test(start_paused = true)]
async fn slow_metering_call_times_out_without_persisting() {
    let store = seeded_store(None).await;
    let metering = FakeMetering::new(Behaviour::Hang(Duration::from_secs(120)));
    let reconciler = Reconciler::new(config(), store.clone(), metering.clone()).unwrap();

    let err = reconciler.reconcile(&request()).await.unwrap_err();

    assert!(matches!(err, MeterwardenError::Timeout(d) if d == Duration::from_secs(60)));
    assert_eq!(metering.calls().len(), 1);
    let stored = store.snapshot(&record_key()).await.unwrap();
    assert_eq!(stored.cached_token(SIGNATURE_KEY).unwrap(), None);
}

#[tokio::test]
async fn persistence_failure_fails_cycle_but_keeps_token() {
    let inner = MemoryStore::new(IDENTITY);
    inner.create_record(record_key()).await;
    let store = Arc::new(ReadOnlyStore(inner));
    let metering = FakeMetering::new(Behaviour::Sign(ANCHOR_PRIVATE_PEM));
    let reconciler = Reconciler::new(config(), store, metering.clone()).unwrap();

    let err = reconciler.reconcile(&request()).await.unwrap_err();

    assert!(matches!(err, MeterwardenError::PersistFailed { .. }));
    assert_eq!(err.obtained_token(), Some(mint(ANCHOR_PRIVATE_PEM, IDENTITY).as_str()));
    assert_eq!(metering.calls().len(), 1);
}

#[tokio::test]
async fn missing_identity_fails_before_registration() {
    let store = Arc::new(MemoryStore::without_identity());
    store.create_record(record_key()).await;
    let metering = FakeMetering::new(Behaviour::Sign(ANCHOR_PRIVATE_PEM));
    let reconciler = Reconciler::new(config(), store, metering.clone()).unwrap();

    let err = reconciler.reconcile(&request()).await.unwrap_err();

    assert!(matches!(err, MeterwardenError::IdentityRead(_)));
    assert!(metering.calls().is_empty());
}

#[tokio::test]
async fn file_store_cycle_round_trips_through_disk() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(FileStore::with_path(temp_dir.path().to_path_buf()));
    store.set_cluster_identity(IDENTITY).await.unwrap();
    store.create_record(record_key()).await.unwrap();

    let metering = FakeMetering::new(Behaviour::Sign(ANCHOR_PRIVATE_PEM));
    let reconciler = Reconciler::new(config(), store.clone(), metering.clone()).unwrap();
    assert!(reconciler.reconcile(&request()).await.unwrap().is_confirmed());

    // A fresh process reading the same directory reuses the cached token.
    let reopened = Arc::new(FileStore::with_path(temp_dir.path().to_path_buf()));
    let reconciler = Reconciler::new(config(), reopened, metering.clone()).unwrap();
    assert!(reconciler.reconcile(&request()).await.unwrap().is_confirmed());
    assert_eq!(metering.calls().len(), 1);
}
