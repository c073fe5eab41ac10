//! # Client
//!
//! One request/response exchange with a dispatcher: build an envelope, hand
//! it to a [`Transport`], then classify whatever comes back.
//!
//! The result is deliberately fine-grained. A plaintext error body from the
//! server ([`ExchangeError::Rejected`]) is unauthenticated and could have
//! come from anyone on the path; a tunneled error
//! ([`ExchangeError::Application`]) was sealed by the server's key and is
//! fresh. Callers should only ever act on the second kind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::config::{ProtocolConfig, ERROR_NAME};
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::envelope::error::{EnvelopeError, ErrorEnvelope};
use crate::envelope::message::Envelope;

/// Raw response from the transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport failed: {0}")]
    Failed(String),

    #[error("transport timed out")]
    Timeout,
}

/// Carries one envelope to the server and returns its answer.
///
/// Timeouts and cancellation belong to the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_envelope(&self, body: Vec<u8>) -> Result<TransportResponse, TransportError>;
}

/// Every way an exchange can end other than a decoded reply.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Plaintext error body with a non-success status. Unauthenticated.
    #[error("rejected by server ({status}): {error}")]
    Rejected { status: u16, error: ErrorEnvelope },

    /// Building the request or opening the reply failed.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// The reply is authentic but answers a different request.
    #[error("reply name mismatch: expected {expected:?}, got {got:?}")]
    NameMismatch { expected: String, got: String },

    /// Authenticated, fresh application error from the handler.
    #[error("application error: {0}")]
    Application(ErrorEnvelope),

    #[error("unexpected response ({status}): {detail}")]
    UnexpectedResponse { status: u16, detail: String },

    /// The error name cannot be requested; nothing was sent.
    #[error("envelope name {0:?} is reserved")]
    ReservedName(String),
}

impl ExchangeError {
    /// Tampering, wrong keys, or a cross-wired reply.
    pub fn is_security_failure(&self) -> bool {
        match self {
            ExchangeError::Envelope(e) => e.is_security_failure(),
            ExchangeError::NameMismatch { .. } => true,
            _ => false,
        }
    }

    pub fn is_freshness_failure(&self) -> bool {
        matches!(self, ExchangeError::Envelope(e) if e.is_freshness_failure())
    }

    pub fn is_application(&self) -> bool {
        matches!(self, ExchangeError::Application(_))
    }

    /// The application error, if that is what this is.
    pub fn application(&self) -> Option<&ErrorEnvelope> {
        match self {
            ExchangeError::Application(e) => Some(e),
            _ => None,
        }
    }
}

/// A client bound to one server key.
pub struct Client<T> {
    transport: T,
    local: PrivateKey,
    local_public: PublicKey,
    remote: PublicKey,
    config: ProtocolConfig,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, local: PrivateKey, remote: PublicKey, config: ProtocolConfig) -> Self {
        let local_public = local.public();
        Self {
            transport,
            local,
            local_public,
            remote,
            config,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.local_public
    }

    pub fn server_key(&self) -> &PublicKey {
        &self.remote
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn call<Req, Resp>(&self, name: &str, payload: &Req) -> Result<Resp, ExchangeError>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        self.exchange(name, payload, Utc::now(), None).await
    }

    /// [`call`](Self::call) with a fixed clock for both build and open.
    pub async fn call_at<Req, Resp>(
        &self,
        name: &str,
        payload: &Req,
        now: DateTime<Utc>,
    ) -> Result<Resp, ExchangeError>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        self.exchange(name, payload, now, Some(now)).await
    }

    /// Build at `built_at`, post, and open the reply at `opened_at`
    /// (the wall clock once the reply arrives when `None`).
    async fn exchange<Req, Resp>(
        &self,
        name: &str,
        payload: &Req,
        built_at: DateTime<Utc>,
        opened_at: Option<DateTime<Utc>>,
    ) -> Result<Resp, ExchangeError>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        if name == ERROR_NAME {
            return Err(ExchangeError::ReservedName(name.to_string()));
        }
        let envelope = Envelope::build(
            name,
            payload,
            &self.local,
            &self.local_public,
            &self.remote,
            built_at,
        )?;
        let response = self.transport.post_envelope(envelope.to_json()?).await?;
        self.classify(name, response, opened_at.unwrap_or_else(Utc::now))
    }

    fn classify<Resp: DeserializeOwned>(
        &self,
        expected: &str,
        response: TransportResponse,
        now: DateTime<Utc>,
    ) -> Result<Resp, ExchangeError> {
        if !(200..300).contains(&response.status) {
            return Err(match ErrorEnvelope::from_json(&response.body) {
                Ok(error) => ExchangeError::Rejected {
                    status: response.status,
                    error,
                },
                Err(_) => ExchangeError::UnexpectedResponse {
                    status: response.status,
                    detail: String::from_utf8_lossy(&response.body)
                        .chars()
                        .take(200)
                        .collect(),
                },
            });
        }

        let envelope = Envelope::from_json(&response.body)?;
        let opened = envelope.open(&self.local, &self.remote, now, &self.config)?;

        if opened.is_error() {
            let error: ErrorEnvelope = opened.decode()?;
            return Err(ExchangeError::Application(error));
        }
        if opened.name == expected {
            return Ok(opened.decode()?);
        }

        tracing::warn!(
            security = true,
            expected,
            got = %opened.name,
            "reply name does not match request"
        );
        Err(ExchangeError::NameMismatch {
            expected: expected.to_string(),
            got: opened.name,
        })
    }
}
