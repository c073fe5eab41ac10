//! # Protocol Configuration & Constants
//!
//! Every magic number in Cipherpost lives here, next to the one tunable
//! value object ([`ProtocolConfig`]) that callers thread through the
//! envelope opener, the dispatcher and the client.
//!
//! Changing a wire constant after deployment breaks every envelope already
//! in flight, so the constants below are versioned through the domain
//! strings rather than edited in place.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::passphrase::KdfParams;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The crate-level protocol version, reported by the node.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Domain-separation prefix for envelope associated data. Bumping the
/// version suffix invalidates every envelope sealed under the old layout.
pub const ENVELOPE_AAD_DOMAIN: &str = "cipherpost/v1/envelope";

/// BLAKE3 `derive_key` context for per-message envelope keys.
pub const ENVELOPE_KEY_CONTEXT: &str = "cipherpost v1 envelope key";

/// Prefix of every serialized private key.
pub const KEY_TEXT_PREFIX: &str = "cipherpost-key";

/// Version tag of the serialized private key format.
pub const KEY_TEXT_VERSION: &str = "v1";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// X25519 for key agreement. The same static pair authenticates the
/// sender: only the two key holders can derive the envelope key.
pub const KEY_AGREEMENT_ALGORITHM: &str = "X25519";

/// AES-256-GCM for the envelope body and for passphrase-protected keys.
pub const SYMMETRIC_ALGORITHM: &str = "AES-256-GCM";

/// X25519 secret and public key length in bytes.
pub const X25519_KEY_LENGTH: usize = 32;

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. Twelve. Always twelve.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// Salt length for the passphrase KDF.
pub const KDF_SALT_LENGTH: usize = 16;

/// Argon2id memory cost in KiB (19 MiB, the OWASP baseline).
pub const KDF_DEFAULT_MEMORY_KIB: u32 = 19 * 1024;

/// Argon2id iteration count.
pub const KDF_DEFAULT_ITERATIONS: u32 = 2;

/// Argon2id lanes.
pub const KDF_DEFAULT_PARALLELISM: u32 = 1;

/// Upper bound on the memory cost accepted from a key file (1 GiB).
/// Key text is attacker-controlled input as far as the parser is concerned.
pub const KDF_MAX_MEMORY_KIB: u32 = 1024 * 1024;

/// Upper bound on the iteration count accepted from a key file.
pub const KDF_MAX_ITERATIONS: u32 = 64;

/// Upper bound on the lane count accepted from a key file.
pub const KDF_MAX_PARALLELISM: u32 = 16;

// ---------------------------------------------------------------------------
// Envelope Limits
// ---------------------------------------------------------------------------

/// Reserved envelope name carrying a tunneled [`ErrorEnvelope`](crate::envelope::ErrorEnvelope).
pub const ERROR_NAME: &str = "error";

/// Default tolerated distance between an envelope's timestamp and the
/// opener's clock. Generous enough for drifting laptops, tight enough that
/// a captured envelope is useless within minutes.
pub const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum envelope name length in bytes. A wire constant, not a tunable:
/// builder, opener and registry must all agree on it.
pub const MAX_NAME_LENGTH: usize = 128;

/// Maximum serialized envelope size accepted by the dispatcher.
pub const MAX_ENVELOPE_BYTES: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Network Defaults
// ---------------------------------------------------------------------------

/// Default HTTP API port.
pub const DEFAULT_API_PORT: u16 = 4780;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 4781;

// ---------------------------------------------------------------------------
// ProtocolConfig
// ---------------------------------------------------------------------------

/// Runtime tunables shared by both ends of an exchange.
///
/// Built once at startup and passed by reference into every entry point;
/// nothing in the crate reads configuration from globals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Freshness window: `|now - envelope.timestamp|` must not exceed this.
    pub max_clock_skew: Duration,
    /// Largest raw request body the dispatcher will attempt to parse.
    pub max_envelope_bytes: usize,
    /// KDF cost used when protecting private keys with a passphrase.
    pub kdf: KdfParams,
}

impl ProtocolConfig {
    /// Returns a copy with a different skew tolerance.
    pub fn with_max_clock_skew(mut self, skew: Duration) -> Self {
        self.max_clock_skew = skew;
        self
    }

    /// Skew tolerance as whole seconds, the unit envelope timestamps use.
    pub fn max_clock_skew_secs(&self) -> i64 {
        i64::try_from(self.max_clock_skew.as_secs()).unwrap_or(i64::MAX)
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_clock_skew: DEFAULT_MAX_CLOCK_SKEW,
            max_envelope_bytes: MAX_ENVELOPE_BYTES,
            kdf: KdfParams::default(),
        }
    }
}
