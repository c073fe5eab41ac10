//! Server-side request pipeline.
//!
//! ```text
//!   body ──parse──► Envelope ──resolve──► SessionKeys ──open──► Opened
//!     │               │                     │                    │
//!     ▼               ▼                     ▼                    ▼
//!  malformed     unknown_sender /     authentication /      registry lookup
//!  (plaintext)   internal_error       freshness / payload   ──► handler
//!                (plaintext)          (plaintext)                 │
//!                                                     reply or tunneled error
//!                                                     (sealed to the sender)
//! ```
//!
//! Everything up to a successful open is answered in plaintext: there is
//! no authenticated peer yet to encrypt to. Everything after is sealed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::registry::{Registry, Request};
use crate::config::ProtocolConfig;
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::envelope::error::{codes, ErrorEnvelope};
use crate::envelope::message::{Envelope, Opened};

/// The key pair used for one client: the server's private key for that
/// client and the client's public key.
#[derive(Clone)]
pub struct SessionKeys {
    pub local: PrivateKey,
    pub peer: PublicKey,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("key store unavailable: {0}")]
    Storage(String),
}

/// Looks up the keys for a sender identifier.
///
/// `Ok(None)` means the sender is not known.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve(&self, sender_id: &str) -> Result<Option<SessionKeys>, ResolveError>;
}

/// What the transport should send back.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A sealed envelope for the sender. `tunneled_error` carries the
    /// application error code when the envelope is an error envelope.
    Reply {
        envelope: Envelope,
        tunneled_error: Option<String>,
    },
    /// A plaintext transport-level error.
    Rejected(ErrorEnvelope),
}

impl DispatchOutcome {
    pub fn status(&self) -> u16 {
        match self {
            DispatchOutcome::Reply { .. } => 200,
            DispatchOutcome::Rejected(err) => err.http_status(),
        }
    }

    /// Status and body, ready for the wire.
    pub fn into_parts(self) -> (u16, Vec<u8>) {
        match self {
            DispatchOutcome::Reply { envelope, .. } => match envelope.to_json() {
                Ok(body) => (200, body),
                Err(_) => {
                    let err = ErrorEnvelope::internal();
                    (err.http_status(), err.to_json())
                }
            },
            DispatchOutcome::Rejected(err) => (err.http_status(), err.to_json()),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    resolver: Arc<dyn KeyResolver>,
    config: ProtocolConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        resolver: Arc<dyn KeyResolver>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            registry,
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn dispatch(&self, body: &[u8]) -> DispatchOutcome {
        self.dispatch_at(body, Utc::now()).await
    }

    /// Run one request with an explicit clock. The reply carries `now` as
    /// its timestamp.
    pub async fn dispatch_at(&self, body: &[u8], now: DateTime<Utc>) -> DispatchOutcome {
        // 1. Parse.
        if body.len() > self.config.max_envelope_bytes {
            return DispatchOutcome::Rejected(ErrorEnvelope::malformed("envelope too large"));
        }
        let envelope = match Envelope::from_json(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "rejecting unparseable request");
                return DispatchOutcome::Rejected(ErrorEnvelope::from_envelope_error(&e));
            }
        };

        // 2. Resolve.
        let keys = match self.resolver.resolve(&envelope.sender).await {
            Ok(Some(keys)) => keys,
            Ok(None) => {
                tracing::debug!(sender = %envelope.sender, "unknown sender");
                return DispatchOutcome::Rejected(ErrorEnvelope::unknown_sender());
            }
            Err(e) => {
                tracing::error!(error = %e, "key resolution failed");
                return DispatchOutcome::Rejected(ErrorEnvelope::internal());
            }
        };

        // 3. Open. Failures are never tunneled.
        let opened = match envelope.open(&keys.local, &keys.peer, now, &self.config) {
            Ok(opened) => opened,
            Err(e) => return DispatchOutcome::Rejected(ErrorEnvelope::from_envelope_error(&e)),
        };

        // 4 + 5. Route and run.
        let result = self.run_handler(opened).await;
        let request_name = envelope.name;

        // 6. Seal the answer back to the sender.
        let sealed = match &result {
            Ok(reply) => Envelope::build(
                &request_name,
                reply,
                &keys.local,
                &keys.local.public(),
                &keys.peer,
                now,
            ),
            Err(app_err) => Envelope::build_error(
                app_err,
                &keys.local,
                &keys.local.public(),
                &keys.peer,
                now,
            ),
        };

        match sealed {
            Ok(envelope) => DispatchOutcome::Reply {
                envelope,
                tunneled_error: result.err().map(|e| e.code),
            },
            Err(e) => {
                tracing::error!(name = %request_name, error = %e, "failed to seal reply");
                DispatchOutcome::Rejected(ErrorEnvelope::internal())
            }
        }
    }

    async fn run_handler(&self, opened: Opened) -> Result<serde_json::Value, ErrorEnvelope> {
        let Some(handler) = self.registry.get(&opened.name) else {
            tracing::info!(name = %opened.name, "unknown operation");
            return Err(ErrorEnvelope::unknown_operation(&opened.name));
        };

        let request = Request {
            name: opened.name,
            sender: opened.sender,
            timestamp: opened.timestamp,
            payload: opened.payload,
        };
        let name = request.name.clone();
        let sender = request.sender.fingerprint();

        match handler.handle(request).await {
            Ok(reply) => {
                tracing::debug!(%name, %sender, "handler replied");
                Ok(reply)
            }
            Err(err) => {
                if err.code == codes::INTERNAL_ERROR {
                    tracing::error!(%name, %sender, message = %err.message, "handler failed");
                } else {
                    tracing::info!(%name, %sender, code = %err.code, "application error");
                }
                Err(err)
            }
        }
    }
}
