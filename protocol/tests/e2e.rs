//! End-to-end integration tests for the Cipherpost protocol.
//!
//! These tests run a real `Client` against a real `Dispatcher` over an
//! in-process transport. They prove that the pieces compose: key
//! generation and persistence, envelope build and open, key resolution,
//! handler routing, error tunneling, and freshness enforcement on both
//! sides of the exchange.
//!
//! Each test builds its own keys, registry and store. Nothing is shared.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use cipherpost_protocol::client::{Client, ExchangeError, Transport, TransportError, TransportResponse};
use cipherpost_protocol::config::{ProtocolConfig, ERROR_NAME};
use cipherpost_protocol::crypto::keys::{KeyError, PrivateKey, PublicKey};
use cipherpost_protocol::crypto::passphrase::KdfParams;
use cipherpost_protocol::dispatch::{
    Dispatcher, Handler, KeyResolver, Registry, Request, ResolveError, SessionKeys,
};
use cipherpost_protocol::envelope::{codes, Envelope, EnvelopeError, ErrorEnvelope};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

const T0: i64 = 1_700_000_000;

/// Hands request bytes straight to a dispatcher running on its own clock.
struct Loopback {
    dispatcher: Arc<Dispatcher>,
    server_now: DateTime<Utc>,
    captured: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl Transport for Loopback {
    async fn post_envelope(&self, body: Vec<u8>) -> Result<TransportResponse, TransportError> {
        self.captured.lock().unwrap().push(body.clone());
        let (status, body) = self
            .dispatcher
            .dispatch_at(&body, self.server_now)
            .await
            .into_parts();
        Ok(TransportResponse { status, body })
    }
}

#[derive(Default)]
struct Users(Mutex<HashMap<String, SessionKeys>>);

impl Users {
    /// Registers a client and returns the server key dedicated to it.
    fn enroll(&self, client: &PublicKey) -> PublicKey {
        let server = PrivateKey::generate();
        let server_public = server.public();
        self.0.lock().unwrap().insert(
            client.to_id(),
            SessionKeys {
                local: server,
                peer: *client,
            },
        );
        server_public
    }
}

#[async_trait]
impl KeyResolver for Users {
    async fn resolve(&self, sender_id: &str) -> Result<Option<SessionKeys>, ResolveError> {
        Ok(self.0.lock().unwrap().get(sender_id).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    title: String,
    body: String,
}

/// Per-sender note storage; rejects duplicate titles.
#[derive(Clone, Default)]
struct Notes(Arc<Mutex<HashMap<(String, String), Note>>>);

#[async_trait]
impl Handler for Notes {
    async fn handle(&self, request: Request) -> Result<serde_json::Value, ErrorEnvelope> {
        let note: Note = request.decode()?;
        let key = (request.sender.to_id(), note.title.clone());
        let mut notes = self.0.lock().unwrap();
        if notes.contains_key(&key) {
            return Err(ErrorEnvelope::new("note_exists", "a note with this title exists"));
        }
        notes.insert(key, note.clone());
        Ok(serde_json::json!({ "stored": note.title, "count": notes.len() }))
    }
}

#[derive(Debug, Deserialize)]
struct Stored {
    stored: String,
    count: usize,
}

struct Setup {
    users: Arc<Users>,
    dispatcher: Arc<Dispatcher>,
}

fn setup(config: ProtocolConfig) -> Setup {
    let users = Arc::new(Users::default());
    let registry = Registry::builder()
        .register("notes.put", Notes::default())
        .unwrap()
        .build();
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(registry),
        users.clone(),
        config,
    ));
    Setup { users, dispatcher }
}

fn client_for(setup: &Setup, key: PrivateKey, server_now: DateTime<Utc>) -> Client<Loopback> {
    let server_public = setup.users.enroll(&key.public());
    Client::new(
        Loopback {
            dispatcher: setup.dispatcher.clone(),
            server_now,
            captured: Mutex::new(Vec::new()),
        },
        key,
        server_public,
        ProtocolConfig::default(),
    )
}

fn note(title: &str) -> Note {
    Note {
        title: title.into(),
        body: format!("body of {title}"),
    }
}

// ---------------------------------------------------------------------------
// 1. Full Exchange
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_exchange_roundtrip() {
    let s = setup(ProtocolConfig::default());
    let client = client_for(&s, PrivateKey::generate(), at(T0));

    let reply: Stored = client.call_at("notes.put", &note("first"), at(T0)).await.unwrap();
    assert_eq!(reply.stored, "first");
    assert_eq!(reply.count, 1);

    let reply: Stored = client.call_at("notes.put", &note("second"), at(T0)).await.unwrap();
    assert_eq!(reply.count, 2);
}

// ---------------------------------------------------------------------------
// 2. Error Classes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn business_failure_arrives_as_authenticated_application_error() {
    let s = setup(ProtocolConfig::default());
    let client = client_for(&s, PrivateKey::generate(), at(T0));

    client
        .call_at::<_, Stored>("notes.put", &note("dup"), at(T0))
        .await
        .unwrap();
    let err = client
        .call_at::<_, Stored>("notes.put", &note("dup"), at(T0))
        .await
        .unwrap_err();

    assert!(err.is_application());
    assert_eq!(err.application().unwrap().code, "note_exists");
}

#[tokio::test]
async fn tunneled_error_never_appears_in_plaintext() {
    let s = setup(ProtocolConfig::default());
    let client = client_for(&s, PrivateKey::generate(), at(T0));
    client
        .call_at::<_, Stored>("notes.put", &note("secret-title"), at(T0))
        .await
        .unwrap();

    let replay = client.transport_captured_last();
    let (status, body) = s.dispatcher.dispatch_at(&replay, at(T0)).await.into_parts();
    assert_eq!(status, 200);
    let text = String::from_utf8(body.clone()).unwrap();
    assert!(!text.contains("note_exists"));
    let envelope = Envelope::from_json(&body).unwrap();
    assert_eq!(envelope.name, ERROR_NAME);
}

#[tokio::test]
async fn unknown_operation_is_an_application_error() {
    let s = setup(ProtocolConfig::default());
    let client = client_for(&s, PrivateKey::generate(), at(T0));
    let err = client
        .call_at::<_, serde_json::Value>("notes.delete", &note("x"), at(T0))
        .await
        .unwrap_err();
    assert_eq!(err.application().unwrap().code, codes::UNKNOWN_OPERATION);
}

#[tokio::test]
async fn unenrolled_client_is_rejected_in_plaintext() {
    let s = setup(ProtocolConfig::default());
    let enrolled = client_for(&s, PrivateKey::generate(), at(T0));
    // Same server key, but this client was never enrolled.
    let stranger = Client::new(
        Loopback {
            dispatcher: s.dispatcher.clone(),
            server_now: at(T0),
            captured: Mutex::new(Vec::new()),
        },
        PrivateKey::generate(),
        *enrolled.server_key(),
        ProtocolConfig::default(),
    );
    let err = stranger
        .call_at::<_, Stored>("notes.put", &note("x"), at(T0))
        .await
        .unwrap_err();
    match err {
        ExchangeError::Rejected { status, error } => {
            assert_eq!(status, 401);
            assert_eq!(error.code, codes::UNKNOWN_SENDER);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn client_talking_to_wrong_server_key_fails_authentication() {
    let s = setup(ProtocolConfig::default());
    let key = PrivateKey::generate();
    s.users.enroll(&key.public());
    let misconfigured = Client::new(
        Loopback {
            dispatcher: s.dispatcher.clone(),
            server_now: at(T0),
            captured: Mutex::new(Vec::new()),
        },
        key,
        PrivateKey::generate().public(),
        ProtocolConfig::default(),
    );
    let err = misconfigured
        .call_at::<_, Stored>("notes.put", &note("x"), at(T0))
        .await
        .unwrap_err();
    match err {
        ExchangeError::Rejected { error, .. } => assert_eq!(error.code, codes::AUTHENTICATION_FAILED),
        other => panic!("unexpected: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 3. Freshness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn captured_request_replayed_after_window_is_expired() {
    let s = setup(ProtocolConfig::default());
    let client = client_for(&s, PrivateKey::generate(), at(T0));
    client
        .call_at::<_, Stored>("notes.put", &note("once"), at(T0))
        .await
        .unwrap();

    let captured = client.transport_captured_last();
    let (status, body) = s
        .dispatcher
        .dispatch_at(&captured, at(T0 + 301))
        .await
        .into_parts();
    assert_eq!(status, 401);
    assert_eq!(ErrorEnvelope::from_json(&body).unwrap().code, codes::MESSAGE_EXPIRED);
}

#[tokio::test]
async fn skew_tolerance_is_a_server_setting() {
    let tight = ProtocolConfig::default().with_max_clock_skew(Duration::from_secs(60));
    let s = setup(tight);
    // Client clock runs 120 s ahead of the server.
    let client = client_for(&s, PrivateKey::generate(), at(T0));
    let err = client
        .call_at::<_, Stored>("notes.put", &note("x"), at(T0 + 120))
        .await
        .unwrap_err();
    match err {
        ExchangeError::Rejected { error, .. } => assert_eq!(error.code, codes::MESSAGE_FROM_FUTURE),
        other => panic!("unexpected: {other:?}"),
    }

    let lenient = setup(ProtocolConfig::default());
    let client = client_for(&lenient, PrivateKey::generate(), at(T0));
    // The reply is stamped with the server's clock, 120 s behind the client;
    // within the client's default tolerance.
    let reply: Stored = client
        .call_at("notes.put", &note("x"), at(T0 + 120))
        .await
        .unwrap();
    assert_eq!(reply.count, 1);
}

// ---------------------------------------------------------------------------
// 4. Key Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restored_protected_key_keeps_talking() {
    let s = setup(ProtocolConfig::default());
    let params = KdfParams::new(64, 1, 1);
    let (original, text) = PrivateKey::generate_protected("hunter2", &params).unwrap();
    let server_public = s.users.enroll(&original.public());

    assert!(matches!(
        PrivateKey::deserialize(&text, Some("hunter3")),
        Err(KeyError::Decryption)
    ));

    let restored = PrivateKey::deserialize(&text, Some("hunter2")).unwrap();
    assert_eq!(restored.public(), original.public());

    let client = Client::new(
        Loopback {
            dispatcher: s.dispatcher.clone(),
            server_now: at(T0),
            captured: Mutex::new(Vec::new()),
        },
        restored,
        server_public,
        ProtocolConfig::default(),
    );
    let reply: Stored = client.call_at("notes.put", &note("k"), at(T0)).await.unwrap();
    assert_eq!(reply.stored, "k");
}

// ---------------------------------------------------------------------------
// 5. Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_build_open_cycles_are_independent() {
    let tasks = (0..64).map(|i| {
        tokio::spawn(async move {
            let sender = PrivateKey::generate();
            let recipient = PrivateKey::generate();
            let payload = serde_json::json!({ "i": i, "pad": "x".repeat(i) });
            let env = Envelope::build(
                "cycle",
                &payload,
                &sender,
                &sender.public(),
                &recipient.public(),
                at(T0 + i as i64),
            )?;
            let opened = env.open(
                &recipient,
                &sender.public(),
                at(T0 + i as i64),
                &ProtocolConfig::default(),
            )?;
            Ok::<_, EnvelopeError>((i, opened.payload))
        })
    });

    for result in futures::future::join_all(tasks).await {
        let (i, payload) = result.unwrap().unwrap();
        assert_eq!(payload["i"], i);
        assert_eq!(payload["pad"].as_str().unwrap().len(), i);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_share_one_dispatcher() {
    let s = setup(ProtocolConfig::default());
    let clients: Vec<_> = (0..16)
        .map(|_| client_for(&s, PrivateKey::generate(), at(T0)))
        .collect();

    let calls = clients.iter().enumerate().map(|(i, client)| async move {
        client
            .call_at::<_, Stored>("notes.put", &note(&format!("n{i}")), at(T0))
            .await
    });

    for (i, result) in futures::future::join_all(calls).await.into_iter().enumerate() {
        let reply = result.unwrap();
        assert_eq!(reply.stored, format!("n{i}"));
    }
}

// ---------------------------------------------------------------------------
// Helpers on the loopback client
// ---------------------------------------------------------------------------

trait CapturedLast {
    fn transport_captured_last(&self) -> Vec<u8>;
}

impl CapturedLast for Client<Loopback> {
    fn transport_captured_last(&self) -> Vec<u8> {
        self.transport().captured.lock().unwrap().last().cloned().unwrap()
    }
}
