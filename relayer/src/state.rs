use crate::constants::{DEFAULT_SESSION_RECORD_TTL_SECS, MAX_SESSION_EVENTS};
use crate::context::RelayContext;
use crate::rate_limit::{RateLimiter, RateLimits};
use crate::types::RelayProgressEvent;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};

pub struct AppState {
    pub ctx: RelayContext,
    /// Advertised relayer fee, lamports.
    pub fee_lamports: u64,
    /// Keyed by session address (base58).
    pub sessions: RwLock<HashMap<String, SessionRecord>>,
    pub session_semaphore: Semaphore,
    pub journal: Option<PathBuf>,
    pub rate_limiter: Mutex<RateLimiter>,
    /// How long finalized and failed records are kept.
    pub session_ttl: Duration,
}

impl AppState {
    pub fn new(
        ctx: RelayContext,
        fee_lamports: u64,
        max_concurrent_sessions: usize,
        journal: Option<PathBuf>,
    ) -> Self {
        AppState {
            ctx,
            fee_lamports,
            sessions: RwLock::new(HashMap::new()),
            session_semaphore: Semaphore::new(max_concurrent_sessions.max(1)),
            journal,
            rate_limiter: Mutex::new(RateLimiter::new(RateLimits::default())),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_RECORD_TTL_SECS),
        }
    }

    pub fn with_rate_limits(mut self, limits: RateLimits) -> Self {
        self.rate_limiter = Mutex::new(RateLimiter::new(limits));
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Insert a new record, dropping finished ones older than `session_ttl`.
    pub async fn track_session(&self, record: SessionRecord, now_ms: u128) {
        let mut sessions = self.sessions.write().await;
        prune_finished(&mut sessions, now_ms, self.session_ttl);
        sessions.insert(record.session.clone(), record);
    }

    pub async fn update_session(&self, session: &str, f: impl FnOnce(&mut SessionRecord)) {
        let mut sessions = self.sessions.write().await;
        if let Some(s) = sessions.get_mut(session) {
            f(s);
        }
    }
}

/// Remove finalized and failed records that finished more than `ttl` ago.
/// Queued and advancing sessions are never dropped.
pub fn prune_finished(sessions: &mut HashMap<String, SessionRecord>, now_ms: u128, ttl: Duration) {
    let cutoff = now_ms.saturating_sub(ttl.as_millis());
    sessions.retain(|_, s| match s.finished_ts_ms {
        Some(t) if s.status.is_finished() => t >= cutoff,
        _ => true,
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Initialized, waiting for a concurrency permit.
    Queued,
    Advancing,
    Finalized,
    Failed,
}

impl SessionStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, SessionStatus::Finalized | SessionStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub session: String,
    pub status: SessionStatus,
    pub init_signature: String,
    pub created_ts_ms: u128,
    pub started_ts_ms: Option<u128>,
    pub finished_ts_ms: Option<u128>,
    // Bounded progress log.
    pub events: Vec<RelayProgressEvent>,
    pub finalize_signature: Option<String>,
    pub error: Option<String>,
}

impl SessionRecord {
    pub fn new(session: String, init_signature: String) -> Self {
        SessionRecord {
            session,
            status: SessionStatus::Queued,
            init_signature,
            created_ts_ms: crate::utils::now_ms(),
            started_ts_ms: None,
            finished_ts_ms: None,
            events: vec![],
            finalize_signature: None,
            error: None,
        }
    }

    pub fn push_event(&mut self, ev: RelayProgressEvent) {
        self.events.push(ev);
        if self.events.len() > MAX_SESSION_EVENTS {
            self.events.drain(0..100);
        }
    }
}
