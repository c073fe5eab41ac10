//! # Cryptographic Primitives for Cipherpost
//!
//! Everything the envelope protocol needs, and nothing it doesn't:
//!
//! - **X25519** for key agreement between long-lived key pairs.
//! - **BLAKE3** (`derive_key` mode) to turn a DH output into a per-message key.
//! - **AES-256-GCM** for authenticated encryption with associated data.
//! - **Argon2id** to stretch passphrases that protect private keys at rest.
//!
//! Each is a thin, typed wrapper around an audited implementation. None of
//! these functions hold state; they are safe to call from any number of
//! tasks at once.

pub mod agreement;
pub mod encryption;
pub mod keys;
pub mod passphrase;

pub use agreement::{derive_message_key, AgreementError, Role};
pub use keys::{KeyError, PrivateKey, PublicKey};
pub use passphrase::KdfParams;
