//! # AES-256-GCM Encryption
//!
//! Authenticated encryption for Cipherpost envelopes and passphrase-protected
//! keys. Every call binds caller-supplied associated data, and the GCM tag is
//! kept *detached* from the ciphertext so that the envelope can carry it in
//! its own `auth_tag` field.
//!
//! ## Nonce management
//!
//! GCM is unforgiving about nonce reuse: two messages under the same key and
//! nonce leak the XOR of the plaintexts and let an attacker forge tags.
//! Callers here always pass a nonce freshly drawn from `OsRng` (see
//! [`random_nonce`]); envelope keys are additionally derived per message, so
//! even a repeated nonce would land under a different key.
//!
//! ## Ordering
//!
//! [`open_detached`] verifies the tag over associated data and ciphertext
//! before a single byte of plaintext is produced. A failed check returns
//! [`EncryptionError::AuthenticationFailed`] and the buffer is discarded.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH};

/// Errors that can occur during encryption/decryption.
///
/// Kept vague on purpose. Whether the key was wrong or the ciphertext was
/// modified is none of an attacker's business.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid tag length: expected {AES_TAG_LENGTH} bytes")]
    InvalidTagLength,
}

/// A sealed message with its tag split out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; AES_NONCE_LENGTH],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; AES_TAG_LENGTH],
}

/// Draw a fresh 96-bit nonce from the OS RNG.
pub fn random_nonce() -> [u8; AES_NONCE_LENGTH] {
    let mut nonce = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext` under `key` and `nonce`, authenticating `aad`.
///
/// The caller owns nonce freshness. Passing the same `(key, nonce)` pair
/// twice is a protocol-breaking bug, not a recoverable error.
pub fn seal_detached(
    key: &[u8; AES_KEY_LENGTH],
    nonce: &[u8; AES_NONCE_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Sealed, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, &mut buffer)
        .map_err(|_| EncryptionError::EncryptFailed)?;

    let mut tag_bytes = [0u8; AES_TAG_LENGTH];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(Sealed {
        nonce: *nonce,
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Verify `tag` over `aad || ciphertext` and, only if it matches, decrypt.
pub fn open_detached(
    key: &[u8; AES_KEY_LENGTH],
    nonce: &[u8; AES_NONCE_LENGTH],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    if tag.len() != AES_TAG_LENGTH {
        return Err(EncryptionError::InvalidTagLength);
    }
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::AuthenticationFailed)?;

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            aad,
            &mut buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| EncryptionError::AuthenticationFailed)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let nonce = random_nonce();
        let sealed = seal_detached(&key, &nonce, b"the quick brown fox", b"aad").unwrap();
        let recovered =
            open_detached(&key, &sealed.nonce, &sealed.ciphertext, &sealed.tag, b"aad").unwrap();
        assert_eq!(recovered, b"the quick brown fox");
    }

    #[test]
    fn test_ciphertext_length_matches_plaintext() {
        // GCM is a stream mode; with the tag detached the lengths line up.
        let key = test_key();
        let sealed = seal_detached(&key, &random_nonce(), b"exactly 26 bytes of input!", b"")
            .unwrap();
        assert_eq!(sealed.ciphertext.len(), 26);
    }

    #[test]
    fn test_empty_plaintext() {
        let key = test_key();
        let sealed = seal_detached(&key, &random_nonce(), b"", b"aad").unwrap();
        assert!(sealed.ciphertext.is_empty());
        let recovered =
            open_detached(&key, &sealed.nonce, &sealed.ciphertext, &sealed.tag, b"aad").unwrap();
        assert!(recovered.is_empty());
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = test_key();
        let sealed = seal_detached(&key, &random_nonce(), b"secret", b"").unwrap();
        let mut wrong = test_key();
        wrong[0] ^= 0xFF;
        assert!(matches!(
            open_detached(&wrong, &sealed.nonce, &sealed.ciphertext, &sealed.tag, b""),
            Err(EncryptionError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = test_key();
        let sealed = seal_detached(&key, &random_nonce(), b"secret", b"correct-aad").unwrap();
        assert!(open_detached(&key, &sealed.nonce, &sealed.ciphertext, &sealed.tag, b"wrong-aad")
            .is_err());
    }

    #[test]
    fn test_modified_tag_fails() {
        let key = test_key();
        let mut sealed = seal_detached(&key, &random_nonce(), b"secret", b"").unwrap();
        sealed.tag[15] ^= 0x01;
        assert!(open_detached(&key, &sealed.nonce, &sealed.ciphertext, &sealed.tag, b"").is_err());
    }

    #[test]
    fn test_modified_ciphertext_fails() {
        let key = test_key();
        let mut sealed = seal_detached(&key, &random_nonce(), b"secret", b"").unwrap();
        sealed.ciphertext[0] ^= 0x80;
        assert!(open_detached(&key, &sealed.nonce, &sealed.ciphertext, &sealed.tag, b"").is_err());
    }

    #[test]
    fn test_short_tag_rejected() {
        let key = test_key();
        let sealed = seal_detached(&key, &random_nonce(), b"secret", b"").unwrap();
        assert!(matches!(
            open_detached(&key, &sealed.nonce, &sealed.ciphertext, &sealed.tag[..8], b""),
            Err(EncryptionError::InvalidTagLength)
        ));
    }

    #[test]
    fn test_unique_nonces() {
        // If this fails, the RNG is broken and we need to burn everything down.
        assert_ne!(random_nonce(), random_nonce());
    }
}
