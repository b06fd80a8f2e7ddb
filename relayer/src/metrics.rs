use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use std::sync::OnceLock;

use crate::state::{AppState, SessionStatus};

#[derive(Debug, Clone, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct Outcome {
    pub outcome: &'static str, // "finalized" | "failed"
}

pub struct Metrics {
    registry: Registry,
    pub sessions_queued: Gauge<i64>,
    pub sessions_advancing: Gauge<i64>,
    pub sessions_finalized: Gauge<i64>,
    pub sessions_failed: Gauge<i64>,
    pub sessions_started_total: Counter,
    pub sessions_completed_total: Family<Outcome, Counter>,
    pub bad_payload_total: Counter,
    pub advance_txs_sent_total: Counter,
    pub advance_submission_errors_total: Counter,
    pub advance_iterations: Histogram,
}

fn buckets_iterations() -> Vec<f64> {
    vec![
        1.0, 2.0, 5.0, 10.0, 20.0, 35.0, 50.0, 75.0, 100.0, 150.0, 250.0, 500.0,
    ]
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let mut registry = Registry::default();

        let sessions_queued = Gauge::<i64>::default();
        registry.register(
            "relayer_sessions_queued",
            "Sessions waiting for a permit",
            sessions_queued.clone(),
        );
        let sessions_advancing = Gauge::<i64>::default();
        registry.register(
            "relayer_sessions_advancing",
            "Sessions being advanced",
            sessions_advancing.clone(),
        );
        let sessions_finalized = Gauge::<i64>::default();
        registry.register(
            "relayer_sessions_finalized",
            "Sessions finalized",
            sessions_finalized.clone(),
        );
        let sessions_failed = Gauge::<i64>::default();
        registry.register(
            "relayer_sessions_failed",
            "Sessions failed",
            sessions_failed.clone(),
        );

        let sessions_started_total = Counter::default();
        registry.register(
            "relayer_sessions_started_total",
            "Sessions initialized on-chain",
            sessions_started_total.clone(),
        );
        let sessions_completed_total: Family<Outcome, Counter> = Family::default();
        registry.register(
            "relayer_sessions_completed_total",
            "Background completions (labeled by outcome)",
            sessions_completed_total.clone(),
        );
        let bad_payload_total = Counter::default();
        registry.register(
            "relayer_bad_payload_total",
            "Relay requests rejected before init",
            bad_payload_total.clone(),
        );
        let advance_txs_sent_total = Counter::default();
        registry.register(
            "relayer_advance_txs_sent_total",
            "Advance transactions broadcast",
            advance_txs_sent_total.clone(),
        );
        let advance_submission_errors_total = Counter::default();
        registry.register(
            "relayer_advance_submission_errors_total",
            "Advance transactions the node refused",
            advance_submission_errors_total.clone(),
        );
        let advance_iterations = Histogram::new(buckets_iterations().into_iter());
        registry.register(
            "relayer_advance_iterations",
            "Scheduler iterations per session",
            advance_iterations.clone(),
        );

        Metrics {
            registry,
            sessions_queued,
            sessions_advancing,
            sessions_finalized,
            sessions_failed,
            sessions_started_total,
            sessions_completed_total,
            bad_payload_total,
            advance_txs_sent_total,
            advance_submission_errors_total,
            advance_iterations,
        }
    })
}

pub fn inc_sessions_started_total() {
    metrics().sessions_started_total.inc();
}

pub fn inc_sessions_completed(outcome: &'static str) {
    metrics()
        .sessions_completed_total
        .get_or_create(&Outcome { outcome })
        .inc();
}

pub fn inc_bad_payload_total() {
    metrics().bad_payload_total.inc();
}

pub fn add_advance_sent(n: u64) {
    metrics().advance_txs_sent_total.inc_by(n);
}

pub fn add_advance_errors(n: u64) {
    if n > 0 {
        metrics().advance_submission_errors_total.inc_by(n);
    }
}

pub fn observe_advance_iterations(n: u32) {
    metrics().advance_iterations.observe(n as f64);
}

pub async fn metrics_handler(State(state): State<std::sync::Arc<AppState>>) -> impl IntoResponse {
    // Status gauges are recomputed on scrape.
    let mut q = 0i64;
    let mut a = 0i64;
    let mut f = 0i64;
    let mut x = 0i64;
    {
        let sessions = state.sessions.read().await;
        for s in sessions.values() {
            match s.status {
                SessionStatus::Queued => q += 1,
                SessionStatus::Advancing => a += 1,
                SessionStatus::Finalized => f += 1,
                SessionStatus::Failed => x += 1,
            }
        }
    }
    let m = metrics();
    m.sessions_queued.set(q);
    m.sessions_advancing.set(a);
    m.sessions_finalized.set(f);
    m.sessions_failed.set(x);

    let mut out = String::new();
    if let Err(e) = encode(&mut out, &m.registry) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("encode metrics failed: {e}"),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        out,
    )
        .into_response()
}
