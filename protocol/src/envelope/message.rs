//! The envelope: build, serialize, open.
//!
//! ```text
//! Envelope {
//!   name       "email.create"            associated data
//!   sender     <public key identifier>   associated data
//!   recipient  <public key identifier>   associated data
//!   timestamp  1760000000                associated data
//!   ciphertext base64(nonce || AES-GCM(payload))
//!   auth_tag   base64(GCM tag)
//! }
//! ```
//!
//! Every field except the ciphertext itself is bound into the GCM tag as
//! associated data, so flipping any bit anywhere fails authentication.
//! The opener checks, in order: structure, authentication, freshness, and
//! finally whether the plaintext parses. Nothing is decrypted before the tag
//! has been verified.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::error::{EnvelopeError, ErrorEnvelope};
use crate::config::{
    ProtocolConfig, AES_NONCE_LENGTH, AES_TAG_LENGTH, ENVELOPE_AAD_DOMAIN, ERROR_NAME,
    MAX_NAME_LENGTH,
};
use crate::crypto::agreement::{self, Role};
use crate::crypto::encryption::{self, EncryptionError};
use crate::crypto::keys::{PrivateKey, PublicKey};

/// The wire-level container for one named payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Logical type of the payload; also selects the server-side handler.
    pub name: String,
    /// Sender public key identifier.
    pub sender: String,
    /// Recipient public key identifier.
    pub recipient: String,
    /// Creation time, unix seconds.
    pub timestamp: i64,
    /// `nonce || encrypted payload`.
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// Detached AES-GCM tag.
    #[serde(with = "base64_bytes")]
    pub auth_tag: Vec<u8>,
}

/// A successfully opened envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Opened {
    pub name: String,
    pub sender: PublicKey,
    pub timestamp: i64,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Seal `payload` under `name` from sender to recipient.
    ///
    /// `sender_public` must be the public half of `sender_private`; the
    /// identifiers written into the envelope come from it and from
    /// `recipient_public`. A fresh nonce is drawn on every call.
    pub fn build<T: Serialize + ?Sized>(
        name: &str,
        payload: &T,
        sender_private: &PrivateKey,
        sender_public: &PublicKey,
        recipient_public: &PublicKey,
        now: DateTime<Utc>,
    ) -> Result<Self, EnvelopeError> {
        if name.is_empty() || name.len() > MAX_NAME_LENGTH {
            return Err(EnvelopeError::Malformed(format!(
                "name must be 1..={MAX_NAME_LENGTH} bytes"
            )));
        }

        let plaintext = Zeroizing::new(
            serde_json::to_vec(payload)
                .map_err(|e| EnvelopeError::PayloadSerialization(e.to_string()))?,
        );

        let nonce = encryption::random_nonce();
        let key = agreement::derive_sender_key(sender_private, sender_public, recipient_public, &nonce)?;

        let sender = sender_public.to_id();
        let recipient = recipient_public.to_id();
        let timestamp = now.timestamp();
        let aad = associated_data(name, timestamp, &sender, &recipient);

        let sealed = encryption::seal_detached(&key, &nonce, &plaintext, &aad)
            .map_err(|_| EnvelopeError::PayloadSerialization("encryption failed".into()))?;

        let mut ciphertext = Vec::with_capacity(AES_NONCE_LENGTH + sealed.ciphertext.len());
        ciphertext.extend_from_slice(&sealed.nonce);
        ciphertext.extend_from_slice(&sealed.ciphertext);

        tracing::debug!(
            name,
            sender = %sender_public.fingerprint(),
            recipient = %recipient_public.fingerprint(),
            timestamp,
            "envelope built"
        );

        Ok(Self {
            name: name.to_string(),
            sender,
            recipient,
            timestamp,
            ciphertext,
            auth_tag: sealed.tag.to_vec(),
        })
    }

    /// Seal an application error under the reserved error name.
    pub fn build_error(
        error: &ErrorEnvelope,
        sender_private: &PrivateKey,
        sender_public: &PublicKey,
        recipient_public: &PublicKey,
        now: DateTime<Utc>,
    ) -> Result<Self, EnvelopeError> {
        Self::build(
            ERROR_NAME,
            error,
            sender_private,
            sender_public,
            recipient_public,
            now,
        )
    }

    /// Verify and decrypt.
    ///
    /// `recipient_private` is the opener's key, `sender_public` the key the
    /// opener believes sent this. Both must match what the builder used or
    /// the tag check fails.
    pub fn open(
        &self,
        recipient_private: &PrivateKey,
        sender_public: &PublicKey,
        now: DateTime<Utc>,
        config: &ProtocolConfig,
    ) -> Result<Opened, EnvelopeError> {
        // 1. Structure.
        let (nonce, body) = self.check_structure()?;

        // 2. Authenticate (and only then decrypt).
        let key = agreement::derive_message_key(recipient_private, sender_public, Role::Recipient, &nonce)
            .map_err(|e| {
                tracing::warn!(
                    security = true,
                    name = %self.name,
                    sender = %sender_public.fingerprint(),
                    "envelope key agreement rejected: {}",
                    e
                );
                EnvelopeError::from(e)
            })?;
        let aad = associated_data(&self.name, self.timestamp, &self.sender, &self.recipient);
        let plaintext = Zeroizing::new(
            encryption::open_detached(&key, &nonce, body, &self.auth_tag, &aad).map_err(|e| {
                match e {
                    EncryptionError::InvalidTagLength => {
                        EnvelopeError::Malformed("auth tag has wrong length".into())
                    }
                    _ => {
                        tracing::warn!(
                            security = true,
                            name = %self.name,
                            sender = %sender_public.fingerprint(),
                            "envelope authentication failed"
                        );
                        EnvelopeError::AuthenticationFailure
                    }
                }
            })?,
        );

        // 3. Freshness. Checked after authentication so the timestamp is trusted.
        self.check_freshness(now, config)?;

        // 4. Parse.
        let payload: serde_json::Value = serde_json::from_slice(&plaintext)
            .map_err(|e| EnvelopeError::PayloadDeserialization(e.to_string()))?;

        tracing::debug!(
            name = %self.name,
            sender = %sender_public.fingerprint(),
            timestamp = self.timestamp,
            "envelope opened"
        );

        Ok(Opened {
            name: self.name.clone(),
            sender: *sender_public,
            timestamp: self.timestamp,
            payload,
        })
    }

    /// [`open`](Self::open) and decode the payload in one step.
    pub fn open_as<T: DeserializeOwned>(
        &self,
        recipient_private: &PrivateKey,
        sender_public: &PublicKey,
        now: DateTime<Utc>,
        config: &ProtocolConfig,
    ) -> Result<(String, T), EnvelopeError> {
        let opened = self.open(recipient_private, sender_public, now, config)?;
        let payload = opened.decode()?;
        Ok((opened.name, payload))
    }

    pub fn to_json(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::PayloadSerialization(e.to_string()))
    }

    /// Parse raw transport bytes. Anything that is not an envelope is `Malformed`.
    pub fn from_json(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    fn check_structure(&self) -> Result<([u8; AES_NONCE_LENGTH], &[u8]), EnvelopeError> {
        if self.name.is_empty() || self.name.len() > MAX_NAME_LENGTH {
            return Err(EnvelopeError::Malformed("bad name length".into()));
        }
        if self.sender.is_empty() || self.recipient.is_empty() {
            return Err(EnvelopeError::Malformed("missing key identifier".into()));
        }
        if self.auth_tag.len() != AES_TAG_LENGTH {
            return Err(EnvelopeError::Malformed("auth tag has wrong length".into()));
        }
        if self.ciphertext.len() < AES_NONCE_LENGTH {
            return Err(EnvelopeError::Malformed("ciphertext too short".into()));
        }
        let (nonce_bytes, body) = self.ciphertext.split_at(AES_NONCE_LENGTH);
        let mut nonce = [0u8; AES_NONCE_LENGTH];
        nonce.copy_from_slice(nonce_bytes);
        Ok((nonce, body))
    }

    fn check_freshness(
        &self,
        now: DateTime<Utc>,
        config: &ProtocolConfig,
    ) -> Result<(), EnvelopeError> {
        let max_skew_secs = config.max_clock_skew_secs();
        let now = now.timestamp();
        let age_secs = now.saturating_sub(self.timestamp);
        if age_secs > max_skew_secs {
            tracing::warn!(
                security = true,
                name = %self.name,
                age_secs,
                max_skew_secs,
                "expired envelope rejected"
            );
            return Err(EnvelopeError::Expired {
                age_secs,
                max_skew_secs,
            });
        }
        let ahead_secs = self.timestamp.saturating_sub(now);
        if ahead_secs > max_skew_secs {
            tracing::warn!(
                security = true,
                name = %self.name,
                ahead_secs,
                max_skew_secs,
                "future-dated envelope rejected"
            );
            return Err(EnvelopeError::FromFuture {
                ahead_secs,
                max_skew_secs,
            });
        }
        Ok(())
    }
}

impl Opened {
    /// Decode the payload into the shape the caller expects for this name.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        T::deserialize(&self.payload)
            .map_err(|e| EnvelopeError::PayloadDeserialization(e.to_string()))
    }

    /// Whether this is a tunneled error.
    pub fn is_error(&self) -> bool {
        self.name == ERROR_NAME
    }
}

/// Canonical associated data.
///
/// Length prefixes keep `("ab", "c")` and `("a", "bc")` apart; the domain
/// string keeps envelope tags from ever validating in another context.
pub fn associated_data(name: &str, timestamp: i64, sender: &str, recipient: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        ENVELOPE_AAD_DOMAIN.len() + 1 + 4 * 3 + 8 + name.len() + sender.len() + recipient.len(),
    );
    buf.extend_from_slice(ENVELOPE_AAD_DOMAIN.as_bytes());
    buf.push(0x00);
    push_prefixed(&mut buf, name.as_bytes());
    buf.extend_from_slice(&timestamp.to_be_bytes());
    push_prefixed(&mut buf, sender.as_bytes());
    push_prefixed(&mut buf, recipient.as_bytes());
    buf
}

fn push_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// Serde adapter: `Vec<u8>` as standard base64.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
