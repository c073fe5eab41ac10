//! # Key Management
//!
//! X25519 key pairs for Cipherpost parties, their public identifiers, and
//! the text form private keys take on disk.
//!
//! A single static X25519 pair does double duty: it is the key-agreement
//! input for every envelope, and because only the two holders of the
//! matching secrets can derive an envelope key, successful decryption also
//! authenticates the sender.
//!
//! ## Text form
//!
//! ```text
//! cipherpost-key:v1:plain:<secret>
//! cipherpost-key:v1:argon2id:<m_kib>:<t>:<p>:<salt>:<nonce>:<sealed>
//! ```
//!
//! Binary fields are URL-safe base64 without padding. The protected form
//! seals the 32 secret bytes with AES-256-GCM under an Argon2id-stretched
//! passphrase and binds the header (everything up to and including the salt)
//! as associated data. A wrong passphrase therefore fails the GCM tag check
//! deterministically; it can never yield a different but plausible key.
//!
//! ## Security considerations
//!
//! - Secrets are zeroized on drop (x25519-dalek's `zeroize` feature).
//! - Key bytes are never logged. Public identifiers and fingerprints are fine.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::{SharedSecret, StaticSecret};
use zeroize::Zeroizing;

use crate::config::{
    AES_NONCE_LENGTH, AES_TAG_LENGTH, KDF_SALT_LENGTH, KEY_TEXT_PREFIX, KEY_TEXT_VERSION,
    X25519_KEY_LENGTH,
};
use crate::crypto::encryption::{self, EncryptionError};
use crate::crypto::passphrase::{self, KdfParams};

const KIND_PLAIN: &str = "plain";
const KIND_ARGON2ID: &str = "argon2id";

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key identifier")]
    InvalidPublicKey,

    #[error("malformed key text: {0}")]
    MalformedText(&'static str),

    /// Wrong passphrase or tampered key text. Deliberately one variant.
    #[error("key decryption failed")]
    Decryption,

    #[error("key is passphrase-protected but no passphrase was supplied")]
    PassphraseRequired,

    #[error("passphrase key derivation failed")]
    KeyDerivation,

    #[error("key encryption failed")]
    Encryption,
}

/// A long-lived private key.
///
/// `PrivateKey` does NOT implement `Serialize`. Writing a secret out should
/// be a deliberate call to [`PrivateKey::serialize`], not a side effect of
/// shoving a struct into a JSON response.
#[derive(Clone)]
pub struct PrivateKey {
    secret: StaticSecret,
}

/// The public half of a key pair, safe to share.
///
/// On the wire it travels as its identifier: URL-safe base64 of the 32
/// public key bytes.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey {
    bytes: [u8; X25519_KEY_LENGTH],
}

impl PrivateKey {
    /// Generate a fresh key from the OS RNG.
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Generate a fresh key and its passphrase-protected text form in one go.
    pub fn generate_protected(
        passphrase: &str,
        params: &KdfParams,
    ) -> Result<(Self, String), KeyError> {
        let key = Self::generate();
        let text = key.serialize_with(Some(passphrase), params)?;
        Ok((key, text))
    }

    /// Reconstruct a key from raw secret bytes.
    pub fn from_bytes(bytes: [u8; X25519_KEY_LENGTH]) -> Self {
        Self {
            secret: StaticSecret::from(bytes),
        }
    }

    /// Raw secret bytes, wrapped so they are wiped when dropped.
    pub fn to_bytes(&self) -> Zeroizing<[u8; X25519_KEY_LENGTH]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Derive the matching public key. Pure and deterministic.
    pub fn public(&self) -> PublicKey {
        PublicKey {
            bytes: x25519_dalek::PublicKey::from(&self.secret).to_bytes(),
        }
    }

    /// Raw X25519 agreement with a peer.
    pub(crate) fn diffie_hellman(&self, peer: &PublicKey) -> SharedSecret {
        self.secret
            .diffie_hellman(&x25519_dalek::PublicKey::from(peer.bytes))
    }

    /// Serialize with the default KDF cost. `None` writes the plain form.
    pub fn serialize(&self, passphrase: Option<&str>) -> Result<String, KeyError> {
        self.serialize_with(passphrase, &KdfParams::default())
    }

    /// Serialize with explicit KDF cost parameters.
    pub fn serialize_with(
        &self,
        passphrase: Option<&str>,
        params: &KdfParams,
    ) -> Result<String, KeyError> {
        let secret = self.to_bytes();
        let Some(passphrase) = passphrase else {
            return Ok(format!(
                "{KEY_TEXT_PREFIX}:{KEY_TEXT_VERSION}:{KIND_PLAIN}:{}",
                URL_SAFE_NO_PAD.encode(secret.as_slice())
            ));
        };

        let salt = passphrase::random_salt();
        let header = protected_header(params, &salt);
        let wrapping_key = passphrase::derive_wrapping_key(passphrase, &salt, params)?;
        let nonce = encryption::random_nonce();
        let sealed = encryption::seal_detached(&wrapping_key, &nonce, secret.as_slice(), header.as_bytes())
            .map_err(|_| KeyError::Encryption)?;

        let mut body = Vec::with_capacity(sealed.ciphertext.len() + AES_TAG_LENGTH);
        body.extend_from_slice(&sealed.ciphertext);
        body.extend_from_slice(&sealed.tag);

        Ok(format!(
            "{header}:{}:{}",
            URL_SAFE_NO_PAD.encode(nonce),
            URL_SAFE_NO_PAD.encode(body)
        ))
    }

    /// Parse the text form. A passphrase supplied for a plain key is ignored.
    pub fn deserialize(text: &str, passphrase: Option<&str>) -> Result<Self, KeyError> {
        let text = text.trim();
        let parts: Vec<&str> = text.split(':').collect();
        if parts.len() < 3 || parts[0] != KEY_TEXT_PREFIX {
            return Err(KeyError::MalformedText("missing key header"));
        }
        if parts[1] != KEY_TEXT_VERSION {
            return Err(KeyError::MalformedText("unsupported key version"));
        }

        match (parts[2], parts.len()) {
            (KIND_PLAIN, 4) => {
                let bytes = decode_fixed::<X25519_KEY_LENGTH>(parts[3])
                    .ok_or(KeyError::InvalidSecretKey)?;
                Ok(Self::from_bytes(bytes))
            }
            (KIND_ARGON2ID, 9) => {
                let passphrase = passphrase.ok_or(KeyError::PassphraseRequired)?;
                let params = KdfParams::new(
                    parse_u32(parts[3])?,
                    parse_u32(parts[4])?,
                    parse_u32(parts[5])?,
                );
                params.validate()?;
                let salt = decode_fixed::<KDF_SALT_LENGTH>(parts[6])
                    .ok_or(KeyError::MalformedText("bad salt"))?;
                let nonce = decode_fixed::<AES_NONCE_LENGTH>(parts[7])
                    .ok_or(KeyError::MalformedText("bad nonce"))?;
                let body = URL_SAFE_NO_PAD
                    .decode(parts[8])
                    .map_err(|_| KeyError::MalformedText("bad sealed key"))?;
                if body.len() != X25519_KEY_LENGTH + AES_TAG_LENGTH {
                    return Err(KeyError::MalformedText("bad sealed key length"));
                }
                let (ciphertext, tag) = body.split_at(X25519_KEY_LENGTH);

                // The associated data is rebuilt from the parsed values, so any
                // edit to the header also breaks the tag.
                let header = protected_header(&params, &salt);
                let wrapping_key = passphrase::derive_wrapping_key(passphrase, &salt, &params)?;
                let secret = Zeroizing::new(
                    encryption::open_detached(&wrapping_key, &nonce, ciphertext, tag, header.as_bytes())
                        .map_err(|e| match e {
                            EncryptionError::InvalidTagLength => {
                                KeyError::MalformedText("bad sealed key length")
                            }
                            _ => KeyError::Decryption,
                        })?,
                );

                let mut bytes = [0u8; X25519_KEY_LENGTH];
                bytes.copy_from_slice(&secret);
                let key = Self::from_bytes(bytes);
                zeroize::Zeroize::zeroize(&mut bytes);
                Ok(key)
            }
            (KIND_PLAIN, _) | (KIND_ARGON2ID, _) => {
                Err(KeyError::MalformedText("wrong number of fields"))
            }
            _ => Err(KeyError::MalformedText("unknown key kind")),
        }
    }

    /// Whether `text` is the passphrase-protected form.
    pub fn is_protected_text(text: &str) -> bool {
        text.trim()
            .starts_with(&format!("{KEY_TEXT_PREFIX}:{KEY_TEXT_VERSION}:{KIND_ARGON2ID}:"))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print secret material, not even partially.
        write!(f, "PrivateKey(pub={})", self.public().fingerprint())
    }
}

impl PartialEq for PrivateKey {
    /// Compares public halves; no non-constant-time look at secret bytes.
    fn eq(&self, other: &Self) -> bool {
        self.public() == other.public()
    }
}

impl Eq for PrivateKey {}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

impl PublicKey {
    pub fn from_bytes(bytes: [u8; X25519_KEY_LENGTH]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; X25519_KEY_LENGTH] {
        &self.bytes
    }

    /// The wire identifier: URL-safe base64, no padding, 43 characters.
    pub fn to_id(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.bytes)
    }

    /// Parse a wire identifier.
    pub fn from_id(id: &str) -> Result<Self, KeyError> {
        decode_fixed::<X25519_KEY_LENGTH>(id)
            .map(Self::from_bytes)
            .ok_or(KeyError::InvalidPublicKey)
    }

    /// Short hex fingerprint for logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.bytes[..8])
    }
}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_id())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_id(s)
    }
}

impl TryFrom<String> for PublicKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_id(&value)
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.to_id()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn protected_header(params: &KdfParams, salt: &[u8]) -> String {
    format!(
        "{KEY_TEXT_PREFIX}:{KEY_TEXT_VERSION}:{KIND_ARGON2ID}:{}:{}:{}:{}",
        params.memory_kib,
        params.iterations,
        params.parallelism,
        URL_SAFE_NO_PAD.encode(salt)
    )
}

fn parse_u32(s: &str) -> Result<u32, KeyError> {
    s.parse()
        .map_err(|_| KeyError::MalformedText("bad kdf parameter"))
}

fn decode_fixed<const N: usize>(s: &str) -> Option<[u8; N]> {
    let bytes = URL_SAFE_NO_PAD.decode(s).ok()?;
    bytes.as_slice().try_into().ok()
}
