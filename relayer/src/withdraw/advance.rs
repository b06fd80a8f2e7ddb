//! AdvanceScheduler: packs every `withdraw_advance` step into transactions
//! and re-drives them until the session reports its final phase.
//!
//! The program is the serialization authority. Steps it has already
//! applied are no-ops when resubmitted, so the loop never tracks
//! per-transaction delivery: it only re-reads progress and sends the
//! groups from the current frontier onward.

use super::send_and_confirm;
use crate::config::SchedulerPolicy;
use crate::constants::{IXS_PER_TX_WITHDRAW, MAX_LINEAR_PROGRESS, NUM_ADVANCES_WITHDRAW};
use crate::context::RelayContext;
use crate::error::{RelayError, RelayResult};
use crate::instructions::withdraw_advance;
use crate::metrics;
use crate::session::linear_progress;
use crate::types::ProgressTx;
use crate::utils::progress_with;
use futures::future::join_all;
use solana_sdk::instruction::Instruction;
use solana_sdk::packet::PACKET_DATA_SIZE;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signer;
use solana_sdk::transaction::Transaction;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvanceStep {
    pub step_index: u32,
    /// `step_index / ixs_per_tx`; the transaction this step is packed into.
    pub group_index: u16,
}

/// Full, fixed sequence of advance steps and its packing into transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvancePlan {
    total_steps: u32,
    ixs_per_tx: u32,
}

impl AdvancePlan {
    /// Fails when `total_steps` is a multiple of `ixs_per_tx`: the on-chain
    /// accounting expects a short remainder group.
    pub fn new(total_steps: u32, ixs_per_tx: u32) -> RelayResult<Self> {
        if total_steps == 0 || ixs_per_tx == 0 {
            return Err(RelayError::InvalidPlan(format!(
                "total_steps={total_steps} and ixs_per_tx={ixs_per_tx} must both be > 0"
            )));
        }
        if total_steps % ixs_per_tx == 0 {
            return Err(RelayError::InvalidPlan(format!(
                "total_steps={total_steps} is a multiple of ixs_per_tx={ixs_per_tx}"
            )));
        }
        let groups = total_steps.div_ceil(ixs_per_tx);
        if groups > u16::MAX as u32 + 1 {
            return Err(RelayError::InvalidPlan(format!(
                "{groups} groups do not fit a u16 group index"
            )));
        }
        Ok(AdvancePlan {
            total_steps,
            ixs_per_tx,
        })
    }

    pub fn withdraw() -> RelayResult<Self> {
        Self::new(NUM_ADVANCES_WITHDRAW, IXS_PER_TX_WITHDRAW)
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    pub fn ixs_per_tx(&self) -> u32 {
        self.ixs_per_tx
    }

    pub fn group_count(&self) -> usize {
        self.total_steps.div_ceil(self.ixs_per_tx) as usize
    }

    pub fn steps(&self) -> impl Iterator<Item = AdvanceStep> + '_ {
        (0..self.total_steps).map(|step_index| AdvanceStep {
            step_index,
            group_index: (step_index / self.ixs_per_tx) as u16,
        })
    }

    /// Steps partitioned into transaction groups, in order. Every group has
    /// `ixs_per_tx` steps except the last.
    pub fn groups(&self) -> Vec<Vec<AdvanceStep>> {
        let mut out: Vec<Vec<AdvanceStep>> = Vec::with_capacity(self.group_count());
        for step in self.steps() {
            match out.last_mut() {
                Some(g) if g[0].group_index == step.group_index => g.push(step),
                _ => out.push(vec![step]),
            }
        }
        out
    }

    /// A full group, signed by one fee payer, must fit a legacy transaction.
    pub fn check_fits_packet(&self, program_id: &Pubkey, payer: &Pubkey) -> RelayResult<()> {
        let session = Pubkey::new_unique();
        let ixs: Vec<Instruction> = (0..self.ixs_per_tx.min(self.total_steps))
            .map(|_| withdraw_advance(program_id, &session, u16::MAX))
            .collect();
        let tx = Transaction::new_with_payer(&ixs, Some(payer));
        let len = bincode::serialize(&tx)
            .map_err(|e| RelayError::InvalidPlan(format!("tx serialize failed: {e}")))?
            .len();
        if len > PACKET_DATA_SIZE {
            return Err(RelayError::InvalidPlan(format!(
                "{} advance instructions need {len} bytes > {PACKET_DATA_SIZE}",
                self.ixs_per_tx
            )));
        }
        Ok(())
    }

    pub fn group_instructions(&self, program_id: &Pubkey, session: &Pubkey) -> Vec<Vec<Instruction>> {
        self.groups()
            .iter()
            .map(|g| {
                g.iter()
                    .map(|s| withdraw_advance(program_id, session, s.group_index))
                    .collect()
            })
            .collect()
    }
}

/// One scheduler iteration's sending decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Batch {
    pub first_group: usize,
    pub count: usize,
    /// Node-side rebroadcast budget per transaction.
    pub max_retries: usize,
    pub backoff: Duration,
}

/// Size the next batch from the remaining fraction of work.
///
/// Far from done: many groups, aggressive node retries, short backoff.
/// Near done: few groups, no node retries, longer backoff.
pub fn plan_batch(
    policy: &SchedulerPolicy,
    plan: &AdvancePlan,
    progress: u32,
    max_progress: u32,
) -> Batch {
    let groups = plan.group_count();
    let frac = 1.0 - (progress.min(max_progress) as f64 / max_progress.max(1) as f64);
    let full = groups.saturating_sub(1).max(1);
    let count = ((full as f64 * frac).ceil() as usize).clamp(1, full);
    let first_group = ((progress / plan.ixs_per_tx()) as usize).min(groups - 1);
    // Pairing progress trails the applied step count by up to one step per
    // finished pairing iteration, so the frontier may sit one group early.
    let count = count.max(2).min(groups - first_group);
    let (max_retries, backoff) = if frac > policy.taper_threshold {
        (
            (policy.early_retry_scale * frac).ceil() as usize,
            policy.early_backoff,
        )
    } else {
        (0, policy.late_backoff)
    };
    Batch {
        first_group,
        count,
        max_retries,
        backoff,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvanceReport {
    pub iterations: u32,
    pub transactions_sent: u64,
    pub submission_errors: u64,
}

/// Drive `session` from its current phase to DONE.
///
/// The remainder group is sent and confirmed first. Then each iteration
/// reads progress, fans out one batch without waiting for confirmations,
/// and sleeps. More than `policy.max_iterations` iterations is a `Stall`.
pub async fn run_advance(
    ctx: &RelayContext,
    session: &Pubkey,
    progress_tx: &Option<ProgressTx>,
) -> RelayResult<AdvanceReport> {
    let plan = AdvancePlan::withdraw()?;
    drive(ctx, &plan, MAX_LINEAR_PROGRESS, session, progress_tx).await
}

pub(crate) async fn drive(
    ctx: &RelayContext,
    plan: &AdvancePlan,
    max_progress: u32,
    session: &Pubkey,
    progress_tx: &Option<ProgressTx>,
) -> RelayResult<AdvanceReport> {
    let policy = &ctx.policy;
    let groups = plan.group_instructions(&ctx.program_id, session);
    let mut report = AdvanceReport::default();

    if let Some(last) = groups.last() {
        send_and_confirm(
            ctx,
            last,
            &[],
            policy.final_group_max_retries,
            policy.max_confirm_attempts,
        )
        .await?;
        report.transactions_sent += 1;
        debug!(session = %session, group = groups.len() - 1, "remainder group confirmed");
    }

    let payer = ctx.payer.as_ref();
    let mut last_progress = 0u32;
    let mut previous: Option<u32> = None;
    while report.iterations < policy.max_iterations {
        report.iterations += 1;
        let iteration = report.iterations;

        let p = match ctx.ledger.get_account_data(session).await {
            Ok(data) => linear_progress(data.as_deref())?,
            Err(e) if e.is_retryable() => {
                warn!(session = %session, iteration, "progress read failed: {e}");
                tokio::time::sleep(policy.late_backoff).await;
                continue;
            }
            Err(e) => return Err(e),
        };
        last_progress = p;
        if p >= max_progress {
            metrics::observe_advance_iterations(iteration);
            info!(session = %session, iteration, "session reached final phase");
            return Ok(report);
        }

        let batch = plan_batch(policy, plan, p, max_progress);
        if previous.replace(p) == Some(p) {
            // The whole last batch was a no-op, so its frontier transaction
            // never landed. Confirm the frontier before fanning out again.
            let lead = batch.first_group..(batch.first_group + 2).min(groups.len());
            debug!(session = %session, iteration, progress = p, ?lead, "frontier stalled");
            for g in lead {
                match send_and_confirm(
                    ctx,
                    &groups[g],
                    &[],
                    policy.final_group_max_retries,
                    policy.max_confirm_attempts,
                )
                .await
                {
                    Ok(_) => report.transactions_sent += 1,
                    Err(e) if e.is_retryable() => {
                        warn!(session = %session, iteration, group = g, "frontier group unconfirmed: {e}");
                        report.submission_errors += 1;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            continue;
        }

        let blockhash = match ctx.ledger.latest_blockhash().await {
            Ok(h) => h,
            Err(e) if e.is_retryable() => {
                warn!(session = %session, iteration, "blockhash fetch failed: {e}");
                tokio::time::sleep(batch.backoff).await;
                continue;
            }
            Err(e) => return Err(e),
        };
        let txs: Vec<Transaction> = groups[batch.first_group..batch.first_group + batch.count]
            .iter()
            .map(|ixs| {
                Transaction::new_signed_with_payer(ixs, Some(&payer.pubkey()), &[payer], blockhash)
            })
            .collect();

        let results = join_all(
            txs.iter()
                .map(|tx| ctx.ledger.send_transaction(tx, batch.max_retries)),
        )
        .await;
        let failed = results.iter().filter(|r| r.is_err()).count() as u64;
        for e in results.iter().filter_map(|r| r.as_ref().err()) {
            debug!(session = %session, iteration, "advance send failed: {e}");
        }
        report.transactions_sent += txs.len() as u64;
        report.submission_errors += failed;
        metrics::add_advance_sent(txs.len() as u64);
        metrics::add_advance_errors(failed);

        debug!(
            session = %session,
            iteration,
            progress = p,
            first_group = batch.first_group,
            count = batch.count,
            retries = batch.max_retries,
            failed,
            "advance batch sent"
        );
        progress_with(
            progress_tx,
            "advance",
            format!("progress {p}/{max_progress}"),
            serde_json::json!({
                "iteration": iteration,
                "progress": p,
                "max": max_progress,
                "sent": txs.len(),
                "failed": failed,
            }),
        )
        .await;

        tokio::time::sleep(batch.backoff).await;
    }

    metrics::observe_advance_iterations(report.iterations);
    Err(RelayError::Stall {
        progress: last_progress,
        max: max_progress,
        iterations: report.iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn withdraw_plan_has_a_short_remainder_group() {
        let plan = AdvancePlan::withdraw().unwrap();
        let groups = plan.groups();
        assert_eq!(groups.len(), 366);
        assert!(groups[..365].iter().all(|g| g.len() == 55));
        assert_eq!(groups[365].len(), 11);
        assert_eq!(groups[365][0].step_index, 365 * 55);
        assert_eq!(groups[365][10].step_index, NUM_ADVANCES_WITHDRAW - 1);
        assert!(groups[364].iter().all(|s| s.group_index == 364));
    }

    #[test]
    fn exact_multiple_is_rejected_at_construction() {
        assert!(matches!(
            AdvancePlan::new(110, 55),
            Err(RelayError::InvalidPlan(_))
        ));
        assert!(matches!(
            AdvancePlan::new(10, 0),
            Err(RelayError::InvalidPlan(_))
        ));
        assert!(AdvancePlan::new(111, 55).is_ok());
    }

    #[test]
    fn full_group_fits_one_packet() {
        let plan = AdvancePlan::withdraw().unwrap();
        assert!(plan
            .check_fits_packet(&Pubkey::new_unique(), &Pubkey::new_unique())
            .is_ok());
        let oversized = AdvancePlan::new(10_001, 100).unwrap();
        assert!(matches!(
            oversized.check_fits_packet(&Pubkey::new_unique(), &Pubkey::new_unique()),
            Err(RelayError::InvalidPlan(_))
        ));
    }

    #[test]
    fn group_index_must_fit_u16() {
        assert!(AdvancePlan::new(65_537 * 2 + 1, 2).is_err());
        assert!(AdvancePlan::new(65_536 * 2 - 1, 2).is_ok());
    }

    #[test]
    fn fresh_session_sends_everything_but_one_group_aggressively() {
        let policy = SchedulerPolicy::default();
        let plan = AdvancePlan::withdraw().unwrap();
        let b = plan_batch(&policy, &plan, 0, MAX_LINEAR_PROGRESS);
        assert_eq!(b.first_group, 0);
        assert_eq!(b.count, 365);
        assert_eq!(b.max_retries, 64);
        assert_eq!(b.backoff, Duration::from_millis(100));
    }

    #[test]
    fn batch_tapers_near_completion() {
        let policy = SchedulerPolicy::default();
        let plan = AdvancePlan::withdraw().unwrap();
        let half = plan_batch(&policy, &plan, MAX_LINEAR_PROGRESS / 2, MAX_LINEAR_PROGRESS);
        assert_eq!(half.first_group, (MAX_LINEAR_PROGRESS / 2 / 55) as usize);
        assert_eq!(half.count, 183);
        assert_eq!(half.max_retries, 32);

        let late = plan_batch(&policy, &plan, 19_000, MAX_LINEAR_PROGRESS);
        assert_eq!(late.max_retries, 0);
        assert_eq!(late.backoff, Duration::from_millis(250));
        assert_eq!(late.first_group, 345);
        assert!(late.count <= 20 && late.count >= 1);
    }

    #[test]
    fn batch_never_runs_past_the_last_group() {
        let policy = SchedulerPolicy::default();
        let plan = AdvancePlan::withdraw().unwrap();
        for p in [0, 55, 10_000, 20_074, 20_075, 20_082, 20_085] {
            let b = plan_batch(&policy, &plan, p, MAX_LINEAR_PROGRESS);
            assert!(b.count >= 1);
            assert!(b.first_group + b.count <= plan.group_count());
        }
        let tail = plan_batch(&policy, &plan, 20_082, MAX_LINEAR_PROGRESS);
        assert_eq!(tail.first_group, 365);
        assert_eq!(tail.count, 1);

        // Last full group applied in pairing iteration 3: progress reads 20_072.
        let lagging = plan_batch(&policy, &plan, 20_072, MAX_LINEAR_PROGRESS);
        assert_eq!(lagging.first_group, 364);
        assert_eq!(lagging.count, 2);
    }
}
