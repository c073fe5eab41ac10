//! In-memory user and email store.
//!
//! Three `DashMap`s: users keyed by client identifier, emails keyed by
//! normalized address, and pending validation tokens. Every check-then-insert
//! goes through the map's `entry` API so two concurrent registrations for the
//! same key can never both succeed.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use async_trait::async_trait;
use cipherpost_protocol::dispatch::{KeyResolver, ResolveError, SessionKeys};
use cipherpost_protocol::{PrivateKey, PublicKey};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("user already exists")]
    UserExists,

    #[error("email address is already registered")]
    EmailExists,
}

/// One enrolled client and the server key dedicated to it.
#[derive(Clone)]
pub struct UserRecord {
    pub client: PublicKey,
    pub server_key: PrivateKey,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailRecord {
    pub email: String,
    /// Identifier of the owning client.
    pub owner: String,
    pub validated: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct Store {
    users: DashMap<String, UserRecord>,
    emails: DashMap<String, EmailRecord>,
    tokens: DashMap<String, String>,
}

/// Lowercase and trim, so `Alice@Example.com ` and `alice@example.com`
/// are the same address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll a client. Returns the public half of its new server key.
    pub fn create_user(&self, client: PublicKey) -> Result<PublicKey, StoreError> {
        match self.users.entry(client.to_id()) {
            Entry::Occupied(_) => Err(StoreError::UserExists),
            Entry::Vacant(slot) => {
                let server_key = PrivateKey::generate();
                let server_public = server_key.public();
                slot.insert(UserRecord {
                    client,
                    server_key,
                    created_at: Utc::now(),
                });
                Ok(server_public)
            }
        }
    }

    pub fn user(&self, client_id: &str) -> Option<UserRecord> {
        self.users.get(client_id).map(|r| r.value().clone())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Register `email` for `owner` and return its validation token.
    pub fn create_email(&self, owner: &PublicKey, email: &str) -> Result<String, StoreError> {
        let email = normalize_email(email);
        match self.emails.entry(email.clone()) {
            Entry::Occupied(_) => Err(StoreError::EmailExists),
            Entry::Vacant(slot) => {
                let token = uuid::Uuid::new_v4().to_string();
                self.tokens.insert(token.clone(), email.clone());
                slot.insert(EmailRecord {
                    email,
                    owner: owner.to_id(),
                    validated: false,
                    created_at: Utc::now(),
                });
                Ok(token)
            }
        }
    }

    /// The record for `email` if `owner` registered it.
    pub fn email_for(&self, owner: &PublicKey, email: &str) -> Option<EmailRecord> {
        let owner = owner.to_id();
        self.emails
            .get(&normalize_email(email))
            .filter(|r| r.owner == owner)
            .map(|r| r.value().clone())
    }

    /// Consume a validation token and mark its address validated.
    ///
    /// Returns the address, or `None` for an unknown or already used token.
    pub fn validate_token(&self, token: &str) -> Option<String> {
        let (_, email) = self.tokens.remove(token)?;
        let mut record = self.emails.get_mut(&email)?;
        record.validated = true;
        Some(email)
    }

    #[cfg(test)]
    pub fn token_for(&self, email: &str) -> Option<String> {
        self.tokens
            .iter()
            .find(|entry| entry.value() == email)
            .map(|entry| entry.key().clone())
    }
}

#[async_trait]
impl KeyResolver for Store {
    async fn resolve(&self, sender_id: &str) -> Result<Option<SessionKeys>, ResolveError> {
        Ok(self.users.get(sender_id).map(|user| SessionKeys {
            local: user.server_key.clone(),
            peer: user.client,
        }))
    }
}
