//! # Prometheus Metrics
//!
//! Operational metrics for the envelope server. Scraped by Prometheus at
//! `/metrics` on the configured metrics port.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] with the
//! `cipherpost_` prefix so they do not collide with any default global
//! registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use cipherpost_protocol::envelope::codes;
use cipherpost_protocol::DispatchOutcome;

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly (prometheus handles are `Arc`s internally) so it can be
/// shared across request handlers.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Requests that reached the dispatcher.
    pub envelopes_dispatched_total: IntCounter,
    /// Sealed replies sent back, including tunneled errors.
    pub replies_total: IntCounter,
    /// Plaintext transport-level rejections, labelled by error code.
    pub rejections_total: IntCounterVec,
    /// Tag mismatches and failed key agreements.
    pub authentication_failures_total: IntCounter,
    /// Expired and future-dated envelopes.
    pub freshness_failures_total: IntCounter,
    /// Tunneled application errors, labelled by error code.
    pub application_errors_total: IntCounterVec,
    /// Users provisioned through `POST /users`.
    pub users_created_total: IntCounter,
    /// Time spent in the dispatcher per request, in seconds.
    pub dispatch_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("cipherpost".into()), None)?;

        let envelopes_dispatched_total = IntCounter::new(
            "envelopes_dispatched_total",
            "Total number of envelopes received by the dispatcher",
        )?;
        registry.register(Box::new(envelopes_dispatched_total.clone()))?;

        let replies_total = IntCounter::new(
            "replies_total",
            "Total number of sealed replies, including tunneled errors",
        )?;
        registry.register(Box::new(replies_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new(
                "rejections_total",
                "Total number of plaintext transport-level rejections",
            ),
            &["code"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let authentication_failures_total = IntCounter::new(
            "authentication_failures_total",
            "Total number of envelopes that failed authentication",
        )?;
        registry.register(Box::new(authentication_failures_total.clone()))?;

        let freshness_failures_total = IntCounter::new(
            "freshness_failures_total",
            "Total number of envelopes outside the clock-skew window",
        )?;
        registry.register(Box::new(freshness_failures_total.clone()))?;

        let application_errors_total = IntCounterVec::new(
            Opts::new(
                "application_errors_total",
                "Total number of tunneled application errors",
            ),
            &["code"],
        )?;
        registry.register(Box::new(application_errors_total.clone()))?;

        let users_created_total =
            IntCounter::new("users_created_total", "Total number of users provisioned")?;
        registry.register(Box::new(users_created_total.clone()))?;

        let dispatch_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "dispatch_latency_seconds",
                "Time from request body to sealed reply, in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )?;
        registry.register(Box::new(dispatch_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            envelopes_dispatched_total,
            replies_total,
            rejections_total,
            authentication_failures_total,
            freshness_failures_total,
            application_errors_total,
            users_created_total,
            dispatch_latency_seconds,
        })
    }

    /// Count one dispatcher result.
    pub fn record_outcome(&self, outcome: &DispatchOutcome) {
        self.envelopes_dispatched_total.inc();
        match outcome {
            DispatchOutcome::Reply { tunneled_error, .. } => {
                self.replies_total.inc();
                if let Some(code) = tunneled_error {
                    self.application_errors_total
                        .with_label_values(&[code.as_str()])
                        .inc();
                }
            }
            DispatchOutcome::Rejected(err) => {
                self.rejections_total
                    .with_label_values(&[err.code.as_str()])
                    .inc();
                match err.code.as_str() {
                    codes::AUTHENTICATION_FAILED => self.authentication_failures_total.inc(),
                    codes::MESSAGE_EXPIRED | codes::MESSAGE_FROM_FUTURE => {
                        self.freshness_failures_total.inc()
                    }
                    _ => {}
                }
            }
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
