//! Application handlers behind `POST /encrypted`.
//!
//! | name           | payload             | reply                     | errors                                       |
//! |----------------|---------------------|---------------------------|----------------------------------------------|
//! | `email.create` | `{ "email": str }`  | `{ email, validated }`    | `invalid_email`, `email_exists`              |
//! | `email.fetch`  | `{ "email": str }`  | `{ email, validated }`    | `invalid_email`, `email_not_found`           |
//!
//! Errors are tunneled back to the sender, so "this address is taken" is
//! never visible to anyone else on the wire.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cipherpost_protocol::dispatch::{Handler, Registry, RegistryError, Request};
use cipherpost_protocol::ErrorEnvelope;

use crate::store::{normalize_email, Store, StoreError};

pub const EMAIL_CREATE: &str = "email.create";
pub const EMAIL_FETCH: &str = "email.fetch";

pub mod codes {
    pub const INVALID_EMAIL: &str = "invalid_email";
    pub const EMAIL_EXISTS: &str = "email_exists";
    pub const EMAIL_NOT_FOUND: &str = "email_not_found";
}

const MAX_EMAIL_LENGTH: usize = 254;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailReply {
    pub email: String,
    pub validated: bool,
}

/// Cheap structural check: one `@`, something on both sides, a dot in the
/// domain, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.len() > MAX_EMAIL_LENGTH {
        return false;
    }
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

fn checked_email(request: &Request) -> Result<String, ErrorEnvelope> {
    let EmailRequest { email } = request.decode()?;
    let email = normalize_email(&email);
    if !is_valid_email(&email) {
        return Err(ErrorEnvelope::new(
            codes::INVALID_EMAIL,
            "not a valid email address",
        ));
    }
    Ok(email)
}

pub struct EmailCreate {
    store: Arc<Store>,
}

#[async_trait]
impl Handler for EmailCreate {
    async fn handle(&self, request: Request) -> Result<serde_json::Value, ErrorEnvelope> {
        let email = checked_email(&request)?;
        match self.store.create_email(&request.sender, &email) {
            Ok(token) => {
                // No mailer yet; the link is only in the logs.
                tracing::debug!(%email, %token, "validation token issued");
                reply(EmailReply {
                    email,
                    validated: false,
                })
            }
            Err(StoreError::EmailExists) => Err(ErrorEnvelope::new(
                codes::EMAIL_EXISTS,
                "email address is already registered",
            )),
            Err(e) => Err(ErrorEnvelope::new(
                cipherpost_protocol::envelope::codes::INTERNAL_ERROR,
                e.to_string(),
            )),
        }
    }
}

pub struct EmailFetch {
    store: Arc<Store>,
}

#[async_trait]
impl Handler for EmailFetch {
    async fn handle(&self, request: Request) -> Result<serde_json::Value, ErrorEnvelope> {
        let email = checked_email(&request)?;
        match self.store.email_for(&request.sender, &email) {
            Some(record) => reply(EmailReply {
                email: record.email,
                validated: record.validated,
            }),
            None => Err(ErrorEnvelope::new(
                codes::EMAIL_NOT_FOUND,
                "no such email address for this user",
            )),
        }
    }
}

fn reply<T: Serialize>(value: T) -> Result<serde_json::Value, ErrorEnvelope> {
    serde_json::to_value(value).map_err(|_| ErrorEnvelope::internal())
}

/// The node's handler table.
pub fn registry(store: Arc<Store>) -> Result<Registry, RegistryError> {
    Ok(Registry::builder()
        .register(
            EMAIL_CREATE,
            EmailCreate {
                store: store.clone(),
            },
        )?
        .register(EMAIL_FETCH, EmailFetch { store })?
        .build())
}
