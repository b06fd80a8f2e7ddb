use crate::codec::Proof;
use crate::error::AppError;
use crate::journal::{self, JournalEntry};
use crate::metrics;
use crate::rate_limit::{self, Lane};
use crate::state::{AppState, SessionRecord, SessionStatus};
use crate::types::{RelayProgressEvent, RelayRequest, RelayResponse};
use crate::utils::now_ms;
use crate::validation::validate_relay_economics;
use crate::withdraw;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::Json as AxumJson;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

fn reject(e: AppError) -> (StatusCode, AxumJson<RelayResponse>) {
    (
        e.status(),
        AxumJson(RelayResponse {
            ok: false,
            err: Some(e.message().to_string()),
            withdraw_state: None,
        }),
    )
}

/// `POST /relay`: validate, create the session, answer, then advance and
/// finalize in the background. Failures after the answer are visible only
/// in logs and at `GET /session/:address`.
pub async fn relay_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    AxumJson(req): AxumJson<RelayRequest>,
) -> (StatusCode, AxumJson<RelayResponse>) {
    let proof = match req
        .validate()
        .and_then(|_| Proof::from_hex(&req.proof, &req.public_signals).map_err(AppError::from))
        .and_then(|p| {
            validate_relay_economics(&p, &state.ctx.payer_pubkey(), state.fee_lamports)?;
            Ok(p)
        }) {
        Ok(p) => p,
        Err(e) => {
            metrics::inc_bad_payload_total();
            warn!(peer = %peer.ip(), "relay request rejected: {e}");
            if let Err(rl) = rate_limit::check(&state, Lane::Rejected, peer.ip()) {
                return reject(rl);
            }
            return reject(e);
        }
    };
    if let Err(e) = rate_limit::check(&state, Lane::Accepted, peer.ip()) {
        warn!(peer = %peer.ip(), "relay request throttled");
        return reject(e);
    }

    let outcome = match withdraw::begin(&state.ctx, &proof).await {
        Ok(o) => o,
        Err(e) => {
            error!("session init failed: {e}");
            return reject(e.into());
        }
    };
    metrics::inc_sessions_started_total();
    let session_id = outcome.session.to_string();

    state
        .track_session(
            SessionRecord::new(session_id.clone(), outcome.signature.to_string()),
            now_ms(),
        )
        .await;
    if let Some(path) = state.journal.as_deref() {
        let entry = JournalEntry {
            session: session_id.clone(),
            init_signature: outcome.signature.to_string(),
            ts_ms: now_ms(),
        };
        if let Err(e) = journal::append(path, &entry).await {
            error!(session = %session_id, "journal append failed: {e}");
        }
    }

    let state_bg = state.clone();
    let session_bg = session_id.clone();
    tokio::spawn(async move {
        let Ok(_permit) = state_bg.session_semaphore.acquire().await else {
            state_bg
                .update_session(&session_bg, |s| {
                    s.status = SessionStatus::Failed;
                    s.finished_ts_ms = Some(now_ms());
                    s.error = Some("Failed to acquire concurrency permit".into());
                })
                .await;
            return;
        };

        state_bg
            .update_session(&session_bg, |s| {
                s.status = SessionStatus::Advancing;
                s.started_ts_ms = Some(now_ms());
            })
            .await;

        let (tx, mut rx) = mpsc::channel::<RelayProgressEvent>(256);
        let state_events = state_bg.clone();
        let session_events = session_bg.clone();
        let collector = tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                state_events
                    .update_session(&session_events, |s| s.push_event(ev))
                    .await;
            }
        });

        let res = withdraw::complete(&state_bg.ctx, &outcome.session, &proof, &Some(tx)).await;
        // All senders are dropped once `complete` returns.
        let _ = collector.await;

        match res {
            Ok(settlement) => {
                let signature = settlement.signature().map(|s| s.to_string());
                info!(session = %session_bg, signature = ?signature, "withdrawal complete");
                metrics::inc_sessions_completed("finalized");
                state_bg
                    .update_session(&session_bg, |s| {
                        s.status = SessionStatus::Finalized;
                        s.finished_ts_ms = Some(now_ms());
                        s.finalize_signature = signature;
                    })
                    .await;
            }
            Err(e) => {
                error!(session = %session_bg, "withdrawal failed: {e}");
                metrics::inc_sessions_completed("failed");
                state_bg
                    .update_session(&session_bg, |s| {
                        s.status = SessionStatus::Failed;
                        s.finished_ts_ms = Some(now_ms());
                        s.error = Some(e.to_string());
                    })
                    .await;
            }
        }
    });

    (
        StatusCode::OK,
        AxumJson(RelayResponse {
            ok: true,
            err: None,
            withdraw_state: Some(session_id),
        }),
    )
}
