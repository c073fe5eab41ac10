//! # HTTP API
//!
//! Builds the axum router that exposes the envelope server. All endpoints
//! share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                      | Description                              |
//! |--------|---------------------------|------------------------------------------|
//! | GET    | `/health`                 | Liveness check                           |
//! | POST   | `/users`                  | Enroll a client key, get a server key    |
//! | POST   | `/encrypted`              | Dispatch one envelope                    |
//! | GET    | `/validate_email/:token`  | Confirm an email address                 |
//!
//! Errors outside `/encrypted`'s sealed replies are plaintext
//! `{ code, message }` bodies.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use cipherpost_protocol::dispatch::{Dispatcher, RegistryError};
use cipherpost_protocol::http::KeyBody;
use cipherpost_protocol::{ErrorEnvelope, ProtocolConfig, PublicKey};

use crate::handlers;
use crate::metrics::{self, SharedMetrics};
use crate::store::{Store, StoreError};

pub mod codes {
    pub const INVALID_PUBLIC_KEY: &str = "invalid_public_key";
    pub const USER_EXISTS: &str = "user_exists";
    pub const TOKEN_NOT_FOUND: &str = "token_not_found";
}

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone; everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<Store>,
    pub metrics: SharedMetrics,
}

impl AppState {
    /// Wire store, handler registry and dispatcher together.
    pub fn new(config: ProtocolConfig, metrics: SharedMetrics) -> Result<Self, RegistryError> {
        let store = Arc::new(Store::new());
        let registry = handlers::registry(store.clone())?;
        let dispatcher = Dispatcher::new(Arc::new(registry), store.clone(), config);
        Ok(Self {
            version: format!(
                "{} (protocol {})",
                env!("CARGO_PKG_VERSION"),
                cipherpost_protocol::config::PROTOCOL_VERSION,
            ),
            dispatcher: Arc::new(dispatcher),
            store,
            metrics,
        })
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the API [`Router`] with CORS, a body size cap, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    let body_limit = state.dispatcher.config().max_envelope_bytes;

    Router::new()
        .route("/health", get(health_handler))
        .route("/users", post(create_user_handler))
        .route("/encrypted", post(encrypted_handler))
        .route("/validate_email/:token", get(validate_email_handler))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(middleware::map_response(body_too_large))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds the metrics [`Router`], served on its own port.
pub fn create_metrics_router(metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(metrics)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /validate_email/:token`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidatedResponse {
    pub email: String,
    pub validated: bool,
}

fn error_response(status: StatusCode, error: ErrorEnvelope) -> Response {
    (status, Json(error)).into_response()
}

/// Oversized bodies are cut off before they reach a handler, and the limit
/// answers with a bare 413. Replace it with the same plaintext error the
/// dispatcher gives for an envelope over the size limit.
async fn body_too_large(response: Response) -> Response {
    if response.status() != StatusCode::PAYLOAD_TOO_LARGE {
        return response;
    }
    let error = ErrorEnvelope::malformed("envelope too large");
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
    error_response(status, error)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the node is alive.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": state.version }))
}

/// `POST /users` — enroll a client public key.
///
/// The server generates a private key dedicated to this client and returns
/// its public identifier. Each client key can enroll once.
async fn create_user_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let client = match serde_json::from_slice::<KeyBody>(&body)
        .map_err(|e| e.to_string())
        .and_then(|b| PublicKey::from_id(&b.public_key).map_err(|e| e.to_string()))
    {
        Ok(key) => key,
        Err(detail) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorEnvelope::new(codes::INVALID_PUBLIC_KEY, detail),
            )
        }
    };

    match state.store.create_user(client) {
        Ok(server_public) => {
            state.metrics.users_created_total.inc();
            tracing::info!(client = %client.fingerprint(), "user created");
            (
                StatusCode::CREATED,
                Json(KeyBody {
                    public_key: server_public.to_id(),
                }),
            )
                .into_response()
        }
        Err(StoreError::UserExists) => error_response(
            StatusCode::CONFLICT,
            ErrorEnvelope::new(codes::USER_EXISTS, "user already exists"),
        ),
        Err(e) => {
            tracing::error!(error = %e, "user creation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorEnvelope::internal())
        }
    }
}

/// `POST /encrypted` — run one envelope through the dispatcher.
///
/// 200 with a sealed envelope (a reply or a tunneled error), or the
/// status for the rejection code with a plaintext error body.
async fn encrypted_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let started = Instant::now();
    let outcome = state.dispatcher.dispatch(&body).await;
    state
        .metrics
        .dispatch_latency_seconds
        .observe(started.elapsed().as_secs_f64());
    state.metrics.record_outcome(&outcome);

    let (status, body) = outcome.into_parts();
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// `GET /validate_email/:token` — confirm the address the token was issued for.
async fn validate_email_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Response {
    match state.store.validate_token(&token) {
        Some(email) => {
            tracing::info!(%email, "email validated");
            Json(ValidatedResponse {
                email,
                validated: true,
            })
            .into_response()
        }
        None => error_response(
            StatusCode::NOT_FOUND,
            ErrorEnvelope::new(codes::TOKEN_NOT_FOUND, "unknown or used validation token"),
        ),
    }
}
