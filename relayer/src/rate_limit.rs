//! Per-IP token buckets in front of `POST /relay`.
//!
//! Every accepted request costs the relayer a session account and a few
//! hundred advance transactions, so accepted and rejected requests are
//! metered separately: rejected payloads get the tighter budget.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::utils::now_ms;
use std::collections::HashMap;
use std::net::IpAddr;

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Requests that passed validation and will create a session.
    Accepted,
    /// Requests rejected before any transaction was sent.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub accepted_per_min: u64,
    pub rejected_per_min: u64,
    pub max_entries: usize,
    pub idle_evict_ms: u128,
}

impl Default for RateLimits {
    fn default() -> Self {
        RateLimits {
            accepted_per_min: 10,
            rejected_per_min: 4,
            max_entries: 20_000,
            idle_evict_ms: 600_000,
        }
    }
}

impl RateLimits {
    pub fn from_env() -> Self {
        let d = RateLimits::default();
        RateLimits {
            accepted_per_min: env_u64("RELAYER_RL_ACCEPTED_PER_MIN", d.accepted_per_min),
            rejected_per_min: env_u64("RELAYER_RL_REJECTED_PER_MIN", d.rejected_per_min),
            max_entries: env_u64("RELAYER_RL_MAX_ENTRIES", d.max_entries as u64) as usize,
            idle_evict_ms: env_u64("RELAYER_RL_IDLE_EVICT_SECS", (d.idle_evict_ms / 1000) as u64)
                as u128
                * 1000,
        }
    }

    fn per_min(&self, lane: Lane) -> u64 {
        match lane {
            Lane::Accepted => self.accepted_per_min,
            Lane::Rejected => self.rejected_per_min,
        }
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    cap: f64,
    refill_per_ms: f64,
    last_ms: u128,
}

impl Bucket {
    fn full(per_min: u64, now_ms: u128) -> Self {
        let cap = per_min.max(1) as f64;
        Bucket {
            tokens: cap,
            cap,
            refill_per_ms: cap / 60_000.0,
            last_ms: now_ms,
        }
    }

    fn take(&mut self, now_ms: u128) -> bool {
        let dt = now_ms.saturating_sub(self.last_ms) as f64;
        if dt > 0.0 {
            self.tokens = (self.tokens + dt * self.refill_per_ms).min(self.cap);
            self.last_ms = now_ms;
        }
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct RateLimiter {
    limits: RateLimits,
    buckets: HashMap<(Lane, IpAddr), Bucket>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        RateLimiter {
            limits,
            buckets: HashMap::new(),
        }
    }

    fn evict_idle(&mut self, now_ms: u128) {
        if self.buckets.len() <= self.limits.max_entries {
            return;
        }
        let cutoff = now_ms.saturating_sub(self.limits.idle_evict_ms);
        self.buckets.retain(|_, b| b.last_ms >= cutoff);
        if self.buckets.len() > self.limits.max_entries * 2 {
            self.buckets.clear();
        }
    }

    /// Take one token from `ip`'s bucket in `lane`.
    pub fn allow(&mut self, lane: Lane, ip: IpAddr, now_ms: u128) -> bool {
        self.evict_idle(now_ms);
        let per_min = self.limits.per_min(lane);
        self.buckets
            .entry((lane, ip))
            .or_insert_with(|| Bucket::full(per_min, now_ms))
            .take(now_ms)
    }

    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

pub fn check(state: &AppState, lane: Lane, ip: IpAddr) -> AppResult<()> {
    let mut rl = state
        .rate_limiter
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if !rl.allow(lane, ip, now_ms()) {
        return Err(AppError::TooManyRequests(match lane {
            Lane::Accepted => "rate limit exceeded".into(),
            Lane::Rejected => "too many bad requests".into(),
        }));
    }
    Ok(())
}
