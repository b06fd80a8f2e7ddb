//! Environment-driven configuration for `otter-relayer`.
//!
//! - RPC endpoint + program id
//! - relayer keypair (fee payer, relayer identity)
//! - advertised fee
//! - advance scheduler policy
//! - `/relay` rate limits and session record retention

use crate::constants::{
    DEFAULT_API_BIND, DEFAULT_MAX_CONCURRENT_SESSIONS, DEFAULT_PROGRAM_ID,
    DEFAULT_RELAYER_FEE_LAMPORTS, DEFAULT_RPC_URL, DEFAULT_SESSION_RECORD_TTL_SECS,
};
use crate::rate_limit::RateLimits;
use anyhow::Context;
use solana_sdk::pubkey::Pubkey;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Tuning of the advance loop and the confirmation waits around it.
///
/// The defaults were tuned empirically against mainnet RPC behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerPolicy {
    /// Above this remaining fraction the scheduler is in its aggressive phase.
    pub taper_threshold: f64,
    /// Node-side retry budget in the aggressive phase = ceil(scale * remaining).
    pub early_retry_scale: f64,
    pub early_backoff: Duration,
    pub late_backoff: Duration,
    /// Hard cap on scheduler iterations before declaring a stall.
    pub max_iterations: u32,
    /// Per-attempt confirmation window for synchronously confirmed transactions.
    pub confirm_timeout: Duration,
    /// Resubmissions of one synchronously confirmed transaction.
    pub max_confirm_attempts: u32,
    /// Node-side retry budget for the remainder group sent first.
    pub final_group_max_retries: usize,
    /// How long to wait for a completed session to be visible before finalizing.
    pub completion_timeout: Duration,
    pub completion_poll: Duration,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        SchedulerPolicy {
            taper_threshold: 0.2,
            early_retry_scale: 64.0,
            early_backoff: Duration::from_millis(100),
            late_backoff: Duration::from_millis(250),
            max_iterations: 500,
            confirm_timeout: Duration::from_secs(120),
            max_confirm_attempts: 8,
            final_group_max_retries: 1024,
            completion_timeout: Duration::from_secs(30),
            completion_poll: Duration::from_millis(500),
        }
    }
}

impl SchedulerPolicy {
    pub fn from_env() -> Self {
        let d = SchedulerPolicy::default();
        let mut taper_threshold = env_f64("ADVANCE_TAPER_THRESHOLD", d.taper_threshold);
        if !(0.0..=1.0).contains(&taper_threshold) {
            tracing::warn!(
                "ADVANCE_TAPER_THRESHOLD={} is invalid (must be within [0, 1]); using {}",
                taper_threshold,
                d.taper_threshold
            );
            taper_threshold = d.taper_threshold;
        }
        let mut early_retry_scale = env_f64("ADVANCE_EARLY_RETRY_SCALE", d.early_retry_scale);
        if !early_retry_scale.is_finite() || early_retry_scale < 0.0 {
            tracing::warn!(
                "ADVANCE_EARLY_RETRY_SCALE={} is invalid; using {}",
                early_retry_scale,
                d.early_retry_scale
            );
            early_retry_scale = d.early_retry_scale;
        }
        let mut max_iterations = env_u64("ADVANCE_MAX_ITERATIONS", d.max_iterations as u64);
        if max_iterations == 0 || max_iterations > u32::MAX as u64 {
            tracing::warn!(
                "ADVANCE_MAX_ITERATIONS={} is invalid; using {}",
                max_iterations,
                d.max_iterations
            );
            max_iterations = d.max_iterations as u64;
        }
        SchedulerPolicy {
            taper_threshold,
            early_retry_scale,
            early_backoff: Duration::from_millis(env_u64(
                "ADVANCE_EARLY_BACKOFF_MS",
                d.early_backoff.as_millis() as u64,
            )),
            late_backoff: Duration::from_millis(env_u64(
                "ADVANCE_LATE_BACKOFF_MS",
                d.late_backoff.as_millis() as u64,
            )),
            max_iterations: max_iterations as u32,
            confirm_timeout: Duration::from_secs(env_u64(
                "CONFIRM_TIMEOUT_SECS",
                d.confirm_timeout.as_secs(),
            )),
            max_confirm_attempts: env_u64("CONFIRM_MAX_ATTEMPTS", d.max_confirm_attempts as u64)
                .clamp(1, 64) as u32,
            final_group_max_retries: env_u64(
                "FINAL_GROUP_MAX_RETRIES",
                d.final_group_max_retries as u64,
            ) as usize,
            completion_timeout: Duration::from_secs(env_u64(
                "COMPLETION_TIMEOUT_SECS",
                d.completion_timeout.as_secs(),
            )),
            completion_poll: Duration::from_millis(
                env_u64("COMPLETION_POLL_MS", d.completion_poll.as_millis() as u64).max(10),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Solana HTTP RPC endpoint.
    pub rpc_url: String,
    /// Verifier program id.
    pub program_id: Pubkey,
    /// JSON keypair file of the relayer (fee payer + relayer identity).
    pub keypair_path: PathBuf,
    /// Axum bind address, host:port.
    pub api_bind: String,
    /// Fee advertised at `/feeAndAddress`, in lamports.
    pub fee_lamports: u64,
    pub max_concurrent_sessions: usize,
    /// Append-only log of created session addresses.
    pub session_journal: Option<PathBuf>,
    /// Finished session records are dropped after this long.
    pub session_ttl: Duration,
    pub rate_limits: RateLimits,
    pub policy: SchedulerPolicy,
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn validate_rpc_url(raw: &str) -> anyhow::Result<String> {
    let u = Url::parse(raw.trim()).with_context(|| format!("Invalid RPC_URL: {raw}"))?;
    if u.scheme() != "https" && u.scheme() != "http" {
        anyhow::bail!("RPC_URL must use http or https: {raw}");
    }
    if u.host_str().is_none() {
        anyhow::bail!("RPC_URL missing host: {raw}");
    }
    Ok(raw.trim().trim_end_matches('/').to_string())
}

fn default_keypair_path() -> PathBuf {
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config/solana/id.json")
}

pub fn load_config() -> anyhow::Result<Config> {
    let rpc_url = validate_rpc_url(
        &env::var("RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string()),
    )?;
    let program_id = Pubkey::from_str(
        env::var("PROGRAM_ID")
            .unwrap_or_else(|_| DEFAULT_PROGRAM_ID.to_string())
            .trim(),
    )
    .context("Invalid PROGRAM_ID")?;

    let keypair_path = env::var("RELAYER_KEYPAIR")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default_keypair_path);
    if keypair_path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        anyhow::bail!("RELAYER_KEYPAIR must not contain '..'");
    }

    let session_journal = env::var("SESSION_JOURNAL_PATH")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);

    Ok(Config {
        rpc_url,
        program_id,
        keypair_path,
        api_bind: env::var("API_BIND").unwrap_or_else(|_| DEFAULT_API_BIND.to_string()),
        fee_lamports: env_u64("RELAYER_FEE_LAMPORTS", DEFAULT_RELAYER_FEE_LAMPORTS),
        max_concurrent_sessions: (env_u64(
            "RELAYER_MAX_CONCURRENT_SESSIONS",
            DEFAULT_MAX_CONCURRENT_SESSIONS as u64,
        ) as usize)
            .max(1),
        session_journal,
        session_ttl: Duration::from_secs(env_u64(
            "SESSION_RECORD_TTL_SECS",
            DEFAULT_SESSION_RECORD_TTL_SECS,
        )),
        rate_limits: RateLimits::from_env(),
        policy: SchedulerPolicy::from_env(),
    })
}
