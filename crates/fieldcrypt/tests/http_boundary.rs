//! End-to-end checks of the demo gateway: records go in through HTTP, are
//! stored encrypted, and come back out decrypted.

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use common::UndecryptableField;
use serde_json::{json, Value};

use fieldcrypt::boundary::{
    EncryptedStore, HttpInterceptor, MemoryStore, PersistenceHook, RecordStore, RouteError,
    RouteMap, UNDECRYPTABLE_HEADER,
};
use fieldcrypt::codec::ObjectCodec;
use fieldcrypt::crypto::{CipherEngine, Envelope};
use fieldcrypt::keys::{KeyManager, KeyRecord};
use fieldcrypt::policy::{Boundary, FieldClassifier, PolicyDocument};
use fieldcrypt::server::{router, state::AppState};

const POLICY: &str = r#"
version: 1
entities:
  contacts:
    fields: [email, phone]
    nested:
      address: address
    boundary: http
  address:
    fields: [street]
  invoices:
    fields: [iban]
routes:
  /api/contacts: contacts
"#;

struct Harness {
    server: TestServer,
    backend: Arc<MemoryStore>,
    keys: KeyManager,
}

fn harness() -> Harness {
    harness_with(POLICY, Boundary::Persistence).unwrap()
}

fn harness_with(policy: &str, default_boundary: Boundary) -> Result<Harness, RouteError> {
    let doc = PolicyDocument::parse(policy).unwrap();
    let classifier = Arc::new(FieldClassifier::from_document(&doc, default_boundary).unwrap());
    let keys = KeyManager::init(vec![KeyRecord::generate("k1").unwrap()], "k1").unwrap();
    let codec = ObjectCodec::new(classifier.clone(), CipherEngine::new(keys.clone()));
    let backend = Arc::new(MemoryStore::new());
    let store = EncryptedStore::new(backend.clone(), PersistenceHook::new(codec.clone()));
    let interceptor = HttpInterceptor::new(codec, RouteMap::from_document(&doc), 1024 * 1024)?;
    let state = AppState::new(keys.clone(), classifier, store, interceptor);
    Ok(Harness {
        server: TestServer::new(router::build(state)).unwrap(),
        backend,
        keys,
    })
}

fn is_envelope(v: &Value) -> bool {
    v.as_str().map(|s| s.parse::<Envelope>().is_ok()).unwrap_or(false)
}

fn undecryptable_count(resp: &axum_test::TestResponse) -> Option<String> {
    resp.headers()
        .get(UNDECRYPTABLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

#[tokio::test]
async fn contact_email_is_stored_encrypted_and_returned_plain() {
    let h = harness();
    let resp = h
        .server
        .post("/api/contacts")
        .json(&json!({
            "id": "c-1",
            "name": "Ada",
            "email": "ada@example.com",
            "address": {"street": "1 Analytical Way", "city": "London"}
        }))
        .await;
    assert_eq!(resp.status_code(), StatusCode::CREATED);
    let body: Value = resp.json();
    assert_eq!(body["email"], "ada@example.com");
    assert_eq!(body["address"]["street"], "1 Analytical Way");

    let stored = h.backend.get("contacts", "c-1").unwrap().unwrap();
    assert!(is_envelope(&stored["email"]));
    assert!(is_envelope(&stored["address"]["street"]));
    assert_eq!(stored["name"], "Ada");
    assert_eq!(stored["address"]["city"], "London");

    let fetched: Value = h.server.get("/api/contacts/c-1").await.json();
    assert_eq!(fetched, body);
}

#[tokio::test]
async fn legacy_plaintext_reads_back_unchanged() {
    let h = harness();
    h.backend
        .insert("contacts", json!({"id": "old", "email": "legacy@example.com"}))
        .unwrap();
    h.backend
        .insert("invoices", json!({"id": "inv-old", "iban": "DE00LEGACY"}))
        .unwrap();

    let resp = h.server.get("/api/contacts/old").await;
    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(undecryptable_count(&resp), None);
    assert_eq!(resp.json::<Value>()["email"], "legacy@example.com");

    let resp = h.server.get("/api/invoices/inv-old").await;
    assert_eq!(resp.json::<Value>()["iban"], "DE00LEGACY");
}

#[tokio::test]
async fn unknown_key_becomes_marker_and_header() {
    let h = harness();
    let foreign = CipherEngine::new(
        KeyManager::init(vec![KeyRecord::generate("gone").unwrap()], "gone").unwrap(),
    );
    let sealed = foreign.seal("ada@example.com").unwrap().unwrap().to_string();
    h.backend
        .insert("contacts", json!({"id": "c-9", "email": sealed, "name": "Ada"}))
        .unwrap();

    let resp = h.server.get("/api/contacts/c-9").await;
    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(undecryptable_count(&resp).as_deref(), Some("1"));
    let body: Value = resp.json();
    assert_eq!(
        UndecryptableField::from_value(&body["email"]),
        Some(UndecryptableField::new("unknown_key"))
    );
    assert_eq!(body["name"], "Ada");
}

#[tokio::test]
async fn persistence_owned_entity_round_trips_with_rotation() {
    let h = harness();
    let first = h
        .server
        .post("/api/invoices")
        .json(&json!({"id": "inv-1", "iban": "DE89370400440532013000", "total": 12}))
        .await;
    assert_eq!(first.status_code(), StatusCode::CREATED);

    h.keys.rotate(KeyRecord::generate("k2").unwrap()).unwrap();
    h.server
        .post("/api/invoices")
        .json(&json!({"id": "inv-2", "iban": "FR7630006000011234567890189", "total": 7}))
        .await;

    let stored = h.backend.list("invoices").unwrap();
    assert!(stored[0]["iban"].as_str().unwrap().starts_with("v1.k1."));
    assert!(stored[1]["iban"].as_str().unwrap().starts_with("v1.k2."));

    let listed: Value = h.server.get("/api/invoices").await.json();
    assert_eq!(listed[0]["iban"], "DE89370400440532013000");
    assert_eq!(listed[1]["iban"], "FR7630006000011234567890189");
}

#[tokio::test]
async fn batch_insert_encrypts_every_record() {
    let h = harness();
    let resp = h
        .server
        .post("/api/invoices")
        .json(&json!([{"iban": "A"}, {"iban": "B"}, {"iban": "C"}]))
        .await;
    assert_eq!(resp.status_code(), StatusCode::CREATED);
    assert_eq!(resp.json::<Value>()["ids"].as_array().unwrap().len(), 3);

    let stored = h.backend.list("invoices").unwrap();
    assert!(stored.iter().all(|r| is_envelope(&r["iban"])));
    let listed: Value = h.server.get("/api/invoices").await.json();
    let ibans: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["iban"].as_str().unwrap())
        .collect();
    assert_eq!(ibans, ["A", "B", "C"]);
}

#[tokio::test]
async fn resubmitting_ciphertext_is_refused() {
    let h = harness();
    let sealed = CipherEngine::new(h.keys.clone())
        .seal("DE89")
        .unwrap()
        .unwrap()
        .to_string();
    let resp = h
        .server
        .post("/api/invoices")
        .json(&json!({"iban": sealed}))
        .await;
    assert_eq!(resp.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(resp.json::<Value>()["code"], "already_encrypted");
    assert!(h.backend.list("invoices").unwrap().is_empty());
}

#[tokio::test]
async fn non_json_body_on_routed_path_is_rejected() {
    let h = harness();
    let resp = h.server.post("/api/contacts").text("email=ada@example.com").await;
    assert_eq!(resp.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(h.backend.list("contacts").unwrap().is_empty());
}

#[tokio::test]
async fn percent_encoded_path_cannot_bypass_the_interceptor() {
    let h = harness();
    let resp = h
        .server
        .post("/api/%63ontacts")
        .json(&json!({"id": "x", "email": "alice@example.com"}))
        .await;
    assert_eq!(resp.status_code(), StatusCode::BAD_REQUEST);
    assert!(h.backend.list("contacts").unwrap().is_empty());

    let resp = h
        .server
        .post("/api/%63ontacts")
        .json(&json!([{"email": "alice@example.com"}]))
        .await;
    assert_eq!(resp.status_code(), StatusCode::BAD_REQUEST);
    assert!(h.backend.list("contacts").unwrap().is_empty());
}

#[test]
fn http_owned_entity_without_route_fails_startup() {
    let policy = "version: 1\nentities:\n  leads:\n    fields: [email]\n    boundary: http\n";
    assert!(matches!(
        harness_with(policy, Boundary::Persistence),
        Err(RouteError::Unrouted(ref entity)) if entity == "leads"
    ));
}

#[tokio::test]
async fn unrouted_entity_under_http_default_is_not_stored() {
    let policy = "version: 1\nentities:\n  contacts:\n    fields: [email]\nroutes:\n  /api/contacts: contacts\n";
    let h = harness_with(policy, Boundary::Http).unwrap();

    let resp = h
        .server
        .post("/api/leads")
        .json(&json!({"id": "y", "email": "bob@example.com"}))
        .await;
    assert_eq!(resp.status_code(), StatusCode::BAD_REQUEST);
    assert!(h.backend.list("leads").unwrap().is_empty());

    let resp = h
        .server
        .post("/api/contacts")
        .json(&json!({"id": "c", "email": "carol@example.com"}))
        .await;
    assert_eq!(resp.status_code(), StatusCode::CREATED);
    assert!(is_envelope(&h.backend.get("contacts", "c").unwrap().unwrap()["email"]));
}
