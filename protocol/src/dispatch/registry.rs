//! Name → handler registry.
//!
//! Built once with [`RegistryBuilder`] and frozen into a [`Registry`]; after
//! that it is only ever read, so the dispatcher can share it across any
//! number of concurrent requests behind a plain `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::{ERROR_NAME, MAX_NAME_LENGTH};
use crate::crypto::keys::PublicKey;
use crate::envelope::error::{codes, ErrorEnvelope};

/// An authenticated, fresh request handed to a [`Handler`].
#[derive(Debug, Clone)]
pub struct Request {
    pub name: String,
    /// The sender, as proven by the envelope tag.
    pub sender: PublicKey,
    pub timestamp: i64,
    pub payload: serde_json::Value,
}

impl Request {
    /// Decode the payload into the handler's request type.
    ///
    /// A shape mismatch is reported as an application error, since the
    /// envelope itself was valid.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ErrorEnvelope> {
        T::deserialize(&self.payload).map_err(|e| {
            ErrorEnvelope::new(
                codes::INVALID_PAYLOAD,
                format!("invalid payload for {}: {e}", self.name),
            )
        })
    }
}

/// Application logic for one envelope name.
///
/// `Ok` is sealed back to the sender under the request's name; `Err` is
/// tunneled under the error name.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: Request) -> Result<serde_json::Value, ErrorEnvelope>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("handler name {0:?} is reserved")]
    Reserved(String),

    #[error("handler already registered for {0:?}")]
    Duplicate(String),

    #[error("invalid handler name {0:?}")]
    InvalidName(String),
}

#[derive(Default)]
pub struct RegistryBuilder {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        name: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        if name == ERROR_NAME {
            return Err(RegistryError::Reserved(name));
        }
        if name.is_empty() || name.len() > MAX_NAME_LENGTH {
            return Err(RegistryError::InvalidName(name));
        }
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.handlers.insert(name, Arc::new(handler));
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry {
            handlers: self.handlers,
        }
    }
}

/// Immutable handler table.
pub struct Registry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("handlers", &self.names())
            .finish()
    }
}
