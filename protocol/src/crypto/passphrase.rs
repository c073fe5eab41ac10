//! Passphrase-derived wrapping keys.
//!
//! A private key written to disk can be sealed under a key stretched from a
//! human passphrase with Argon2id. The cost parameters travel with the
//! serialized key so that old files stay readable after the defaults move.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::config::{
    AES_KEY_LENGTH, KDF_DEFAULT_ITERATIONS, KDF_DEFAULT_MEMORY_KIB, KDF_DEFAULT_PARALLELISM,
    KDF_MAX_ITERATIONS, KDF_MAX_MEMORY_KIB, KDF_MAX_PARALLELISM, KDF_SALT_LENGTH,
};
use crate::crypto::keys::KeyError;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl KdfParams {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            parallelism,
        }
    }

    /// Rejects parameters outside the ceilings in [`crate::config`].
    ///
    /// Applied to every parameter set parsed from key text, since a crafted
    /// file asking for 64 GiB of memory is a cheap denial of service.
    pub fn validate(&self) -> Result<(), KeyError> {
        let ok = (1..=KDF_MAX_MEMORY_KIB).contains(&self.memory_kib)
            && (1..=KDF_MAX_ITERATIONS).contains(&self.iterations)
            && (1..=KDF_MAX_PARALLELISM).contains(&self.parallelism);
        if ok {
            Ok(())
        } else {
            Err(KeyError::MalformedText("kdf parameters out of range"))
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::new(
            KDF_DEFAULT_MEMORY_KIB,
            KDF_DEFAULT_ITERATIONS,
            KDF_DEFAULT_PARALLELISM,
        )
    }
}

/// Fresh random salt.
pub fn random_salt() -> [u8; KDF_SALT_LENGTH] {
    let mut salt = [0u8; KDF_SALT_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Stretch `passphrase` into an AES-256 key.
pub fn derive_wrapping_key(
    passphrase: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, KeyError> {
    params.validate()?;
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(AES_KEY_LENGTH),
    )
    .map_err(|_| KeyError::MalformedText("kdf parameters rejected"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|_| KeyError::KeyDerivation)?;
    Ok(key)
}
