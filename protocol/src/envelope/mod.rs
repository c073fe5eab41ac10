//! # Envelopes
//!
//! The unit of exchange between a client and a dispatcher. See
//! [`message`] for the wire format and the order in which an envelope is
//! checked when opened, and [`error`] for how failures are reported.

pub mod error;
pub mod message;

pub use error::{codes, status_for_code, EnvelopeError, ErrorEnvelope};
pub use message::{associated_data, Envelope, Opened};
