//! # HTTP transport
//!
//! [`HttpTransport`] talks to a running `cipherpost-node`: `POST /users` to
//! enroll a client key, `POST /encrypted` to carry envelopes. Status and body
//! are passed through untouched; classifying them is the [`Client`]'s job.
//!
//! [`Client`]: crate::client::Client

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::client::{ExchangeError, Transport, TransportError, TransportResponse};
use crate::crypto::keys::PublicKey;
use crate::envelope::error::ErrorEnvelope;

/// Default whole-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of `POST /users` in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBody {
    /// Public key identifier: the client's on the way in, the server's on
    /// the way out.
    pub public_key: String,
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Register `client` with the server and return the server key
    /// dedicated to it.
    pub async fn enroll(&self, client: &PublicKey) -> Result<PublicKey, ExchangeError> {
        let body = serde_json::to_vec(&KeyBody {
            public_key: client.to_id(),
        })
        .map_err(|e| TransportError::Failed(e.to_string()))?;
        let response = self.post("/users", body).await?;

        if !(200..300).contains(&response.status) {
            return Err(match ErrorEnvelope::from_json(&response.body) {
                Ok(error) => ExchangeError::Rejected {
                    status: response.status,
                    error,
                },
                Err(_) => unexpected(&response, "non-JSON error body"),
            });
        }

        let key: KeyBody = serde_json::from_slice(&response.body)
            .map_err(|_| unexpected(&response, "enrollment reply is not a key body"))?;
        let server = PublicKey::from_id(&key.public_key)
            .map_err(|_| unexpected(&response, "enrollment reply carries an invalid key"))?;
        tracing::info!(
            client = %client.fingerprint(),
            server = %server.fingerprint(),
            "enrolled"
        );
        Ok(server)
    }

    async fn post(&self, path: &str, body: Vec<u8>) -> Result<TransportResponse, TransportError> {
        let url = self.url(path);
        tracing::debug!(%url, bytes = body.len(), "sending request");
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(map_reqwest)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest)?.to_vec();
        tracing::debug!(status, bytes = body.len(), "request done");
        Ok(TransportResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_envelope(&self, body: Vec<u8>) -> Result<TransportResponse, TransportError> {
        self.post("/encrypted", body).await
    }
}

fn map_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Failed(err.to_string())
    }
}

fn unexpected(response: &TransportResponse, detail: &str) -> ExchangeError {
    ExchangeError::UnexpectedResponse {
        status: response.status,
        detail: detail.to_string(),
    }
}
