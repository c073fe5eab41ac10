//! Envelope failures and the error envelope.
//!
//! Two kinds of error live here and they must never be confused:
//!
//! - [`EnvelopeError`] is local: building or opening an envelope went wrong.
//!   When the dispatcher hits one it answers with a *transport-level*
//!   [`ErrorEnvelope`] in plaintext, because there is no authenticated
//!   channel to tunnel through.
//! - [`ErrorEnvelope`] is the wire shape `{ code, message }`. It travels
//!   either as that plaintext body, or sealed inside a normal envelope named
//!   [`ERROR_NAME`](crate::config::ERROR_NAME) when the failure is an
//!   application decision made after the request was authenticated.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::agreement::AgreementError;

/// Stable machine-readable error codes.
pub mod codes {
    pub const MALFORMED_ENVELOPE: &str = "malformed_envelope";
    pub const UNKNOWN_SENDER: &str = "unknown_sender";
    pub const AUTHENTICATION_FAILED: &str = "authentication_failed";
    pub const MESSAGE_EXPIRED: &str = "message_expired";
    pub const MESSAGE_FROM_FUTURE: &str = "message_from_future";
    pub const INVALID_PAYLOAD: &str = "invalid_payload";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const UNKNOWN_OPERATION: &str = "unknown_operation";
}

/// Errors from building or opening an envelope, in the order the opener
/// checks for them.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("payload serialization failed: {0}")]
    PayloadSerialization(String),

    #[error(transparent)]
    KeyAgreement(#[from] AgreementError),

    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// Tag mismatch: wrong key, wrong peer, or tampering. Never retried.
    #[error("envelope authentication failed")]
    AuthenticationFailure,

    #[error("envelope expired: {age_secs}s old, tolerance {max_skew_secs}s")]
    Expired { age_secs: i64, max_skew_secs: i64 },

    #[error("envelope from the future: {ahead_secs}s ahead, tolerance {max_skew_secs}s")]
    FromFuture { ahead_secs: i64, max_skew_secs: i64 },

    #[error("payload deserialization failed: {0}")]
    PayloadDeserialization(String),
}

impl EnvelopeError {
    /// Transport error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            EnvelopeError::Malformed(_) => codes::MALFORMED_ENVELOPE,
            EnvelopeError::KeyAgreement(_) | EnvelopeError::AuthenticationFailure => {
                codes::AUTHENTICATION_FAILED
            }
            EnvelopeError::Expired { .. } => codes::MESSAGE_EXPIRED,
            EnvelopeError::FromFuture { .. } => codes::MESSAGE_FROM_FUTURE,
            EnvelopeError::PayloadDeserialization(_) => codes::INVALID_PAYLOAD,
            EnvelopeError::PayloadSerialization(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Failures that may indicate tampering and are logged as such.
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self,
            EnvelopeError::AuthenticationFailure | EnvelopeError::KeyAgreement(_)
        )
    }

    /// Freshness violations. A caller may resync its clock and build a new
    /// envelope; resending the old one can never succeed.
    pub fn is_freshness_failure(&self) -> bool {
        matches!(
            self,
            EnvelopeError::Expired { .. } | EnvelopeError::FromFuture { .. }
        )
    }
}

/// The wire error body: a stable code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(codes::MALFORMED_ENVELOPE, detail)
    }

    pub fn unknown_sender() -> Self {
        Self::new(codes::UNKNOWN_SENDER, "unknown sender")
    }

    pub fn unknown_operation(name: &str) -> Self {
        Self::new(codes::UNKNOWN_OPERATION, format!("unknown operation: {name}"))
    }

    pub fn internal() -> Self {
        Self::new(codes::INTERNAL_ERROR, "internal error")
    }

    /// Transport-level body for an opener failure.
    ///
    /// Authentication failures get a fixed message; the local error string
    /// is not echoed back to an unauthenticated peer.
    pub fn from_envelope_error(err: &EnvelopeError) -> Self {
        let message = match err {
            EnvelopeError::KeyAgreement(_) | EnvelopeError::AuthenticationFailure => {
                "envelope authentication failed".to_string()
            }
            EnvelopeError::PayloadSerialization(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        Self::new(err.code(), message)
    }

    /// HTTP status used when this body is sent at the transport level.
    pub fn http_status(&self) -> u16 {
        status_for_code(&self.code)
    }

    pub fn to_json(&self) -> Vec<u8> {
        // A struct of two strings always serializes.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Maps a transport error code to its HTTP status.
pub fn status_for_code(code: &str) -> u16 {
    match code {
        codes::MALFORMED_ENVELOPE | codes::INVALID_PAYLOAD => 400,
        codes::UNKNOWN_SENDER
        | codes::AUTHENTICATION_FAILED
        | codes::MESSAGE_EXPIRED
        | codes::MESSAGE_FROM_FUTURE => 401,
        _ => 500,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_statuses() {
        assert_eq!(status_for_code(codes::MALFORMED_ENVELOPE), 400);
        assert_eq!(status_for_code(codes::AUTHENTICATION_FAILED), 401);
        assert_eq!(status_for_code(codes::MESSAGE_EXPIRED), 401);
        assert_eq!(status_for_code(codes::UNKNOWN_SENDER), 401);
        assert_eq!(status_for_code(codes::INTERNAL_ERROR), 500);
        assert_eq!(status_for_code("something_new"), 500);
    }

    #[test]
    fn authentication_message_is_not_detailed() {
        let body = ErrorEnvelope::from_envelope_error(&EnvelopeError::KeyAgreement(
            AgreementError::NonContributory,
        ));
        assert_eq!(body.code, codes::AUTHENTICATION_FAILED);
        assert!(!body.message.contains("contributory"));
    }

    #[test]
    fn freshness_errors_keep_their_detail() {
        let body = ErrorEnvelope::from_envelope_error(&EnvelopeError::Expired {
            age_secs: 400,
            max_skew_secs: 300,
        });
        assert_eq!(body.code, codes::MESSAGE_EXPIRED);
        assert!(body.message.contains("400"));
    }

    #[test]
    fn error_envelope_json_shape() {
        let body = ErrorEnvelope::new("email_exists", "email address is already registered");
        let json: serde_json::Value = serde_json::from_slice(&body.to_json()).unwrap();
        assert_eq!(json["code"], "email_exists");
        assert_eq!(json["message"], "email address is already registered");
        assert_eq!(ErrorEnvelope::from_json(&body.to_json()).unwrap(), body);
    }

    #[test]
    fn classification_predicates() {
        assert!(EnvelopeError::AuthenticationFailure.is_security_failure());
        assert!(!EnvelopeError::AuthenticationFailure.is_freshness_failure());
        let future = EnvelopeError::FromFuture {
            ahead_secs: 10,
            max_skew_secs: 5,
        };
        assert!(future.is_freshness_failure());
        assert!(!future.is_security_failure());
    }
}
