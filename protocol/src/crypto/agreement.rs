//! # Per-Message Key Agreement
//!
//! Derives the symmetric key for one envelope from a static X25519 pair.
//!
//! The sender computes `X25519(sender_secret, recipient_public)`, the
//! recipient computes `X25519(recipient_secret, sender_public)`; both land on
//! the same shared secret. The raw DH output is never used as a key. It is
//! fed through BLAKE3's `derive_key` mode together with both public keys and
//! the message nonce:
//!
//! ```text
//! key = BLAKE3-derive-key(
//!     context = "cipherpost v1 envelope key",
//!     input   = shared || sender_pub || recipient_pub || nonce
//! )
//! ```
//!
//! Unlike an ephemeral handshake, the roles here are fixed, so the public
//! keys go in sender-first rather than sorted. Mixing in the nonce makes the
//! key unique per message even though the DH output is the same every time.

use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, ENVELOPE_KEY_CONTEXT};
use crate::crypto::keys::{PrivateKey, PublicKey};

/// Errors in key agreement.
#[derive(Debug, Error)]
pub enum AgreementError {
    /// The peer key is a low-order point; the "shared secret" is all zeros
    /// and would be known to anyone.
    #[error("key agreement failed: non-contributory peer key")]
    NonContributory,

    /// The supplied own public key does not belong to the supplied secret.
    #[error("key agreement failed: public key does not match private key")]
    KeypairMismatch,
}

/// Which side of the exchange the local key plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Recipient,
}

/// Derive the AES key for one envelope.
///
/// `local` is the caller's private key, `peer` the other party's public key.
/// `role` fixes the order of the public keys in the KDF input so that both
/// sides feed the same bytes.
pub fn derive_message_key(
    local: &PrivateKey,
    peer: &PublicKey,
    role: Role,
    nonce: &[u8; AES_NONCE_LENGTH],
) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, AgreementError> {
    let shared = local.diffie_hellman(peer);
    if !shared.was_contributory() {
        return Err(AgreementError::NonContributory);
    }

    let local_public = local.public();
    let (sender_pub, recipient_pub) = match role {
        Role::Sender => (&local_public, peer),
        Role::Recipient => (peer, &local_public),
    };

    Ok(kdf(shared.as_bytes(), sender_pub, recipient_pub, nonce))
}

/// Like [`derive_message_key`] for the sending side, but first checks that
/// the caller's advertised public key really belongs to `local`.
pub fn derive_sender_key(
    local: &PrivateKey,
    local_public: &PublicKey,
    recipient: &PublicKey,
    nonce: &[u8; AES_NONCE_LENGTH],
) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, AgreementError> {
    if local.public() != *local_public {
        return Err(AgreementError::KeypairMismatch);
    }
    derive_message_key(local, recipient, Role::Sender, nonce)
}

fn kdf(
    shared: &[u8; 32],
    sender_pub: &PublicKey,
    recipient_pub: &PublicKey,
    nonce: &[u8; AES_NONCE_LENGTH],
) -> Zeroizing<[u8; AES_KEY_LENGTH]> {
    let mut hasher = blake3::Hasher::new_derive_key(ENVELOPE_KEY_CONTEXT);
    hasher.update(shared);
    hasher.update(sender_pub.as_bytes());
    hasher.update(recipient_pub.as_bytes());
    hasher.update(nonce);

    let mut key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
    hasher.finalize_xof().fill(&mut key[..]);
    key
}
