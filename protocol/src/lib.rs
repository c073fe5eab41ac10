// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Cipherpost Protocol — Core Library
//!
//! Encrypted, authenticated, replay-resistant envelopes between two
//! long-lived key holders, plus the request/response plumbing around them.
//!
//! A client and a server each hold an X25519 key pair and know the other's
//! public key. Every message is an [`Envelope`]: a named JSON payload sealed
//! with AES-256-GCM under a key derived fresh for that message, with the
//! name, both identities, and the creation time bound in as associated data.
//! The receiver verifies the tag before decrypting and rejects anything
//! outside the clock-skew window.
//!
//! ## Architecture
//!
//! - **config** — Protocol constants and the [`ProtocolConfig`] value.
//! - **crypto** — Keys, key agreement, AEAD, passphrase protection.
//! - **envelope** — The wire container and the error envelope.
//! - **dispatch** — Server side: handler registry and request pipeline.
//! - **client** — Client side: one exchange and its typed outcome.
//! - **http** — The client's transport to a running node.
//!
//! ## Ground rules
//!
//! 1. Authenticate before decrypting. Always.
//! 2. No global state. Clocks, keys and configuration are passed in.
//! 3. A failure aborts the whole operation; no partial payload escapes.
//! 4. Unauthenticated errors and authenticated ones are different types.
//!
//! [`Envelope`]: envelope::Envelope
//! [`ProtocolConfig`]: config::ProtocolConfig

pub mod client;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod envelope;
pub mod http;

pub use client::{Client, ExchangeError, Transport, TransportError, TransportResponse};
pub use config::ProtocolConfig;
pub use crypto::{KeyError, PrivateKey, PublicKey};
pub use dispatch::{DispatchOutcome, Dispatcher, Handler, KeyResolver, Registry, Request, SessionKeys};
pub use envelope::{Envelope, EnvelopeError, ErrorEnvelope, Opened};
pub use http::HttpTransport;
