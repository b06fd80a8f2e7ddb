//! Incremental withdrawal driver.
//!
//! `begin` creates the verification session; `complete` drives it to the
//! final phase and settles it. The HTTP layer answers between the two.

pub mod advance;
pub mod finalize;
pub mod init;

use crate::codec::Proof;
use crate::context::RelayContext;
use crate::error::{RelayError, RelayResult};
use crate::types::ProgressTx;
use crate::utils::progress;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::Transaction;
use tracing::{info, warn};

pub use advance::{run_advance, AdvancePlan, AdvanceReport};
pub use finalize::{
    derive_finalize_accounts, finalize, wait_for_completion, FinalizeAccounts, Settlement,
};
pub use init::{initiate_session, InitOutcome};

/// Encode the proof and create its session. No retry: a rejected init is
/// returned to the caller as is.
pub async fn begin(ctx: &RelayContext, proof: &Proof) -> RelayResult<InitOutcome> {
    initiate_session(ctx, proof).await
}

/// Advance `session` to completion, wait until the ledger shows it done,
/// then finalize.
pub async fn complete(
    ctx: &RelayContext,
    session: &Pubkey,
    proof: &Proof,
    progress_tx: &Option<ProgressTx>,
) -> RelayResult<Settlement> {
    let report = run_advance(ctx, session, progress_tx).await?;
    info!(
        session = %session,
        iterations = report.iterations,
        sent = report.transactions_sent,
        failed = report.submission_errors,
        "advance complete"
    );
    progress(progress_tx, "await_completion", "waiting for final phase").await;
    wait_for_completion(ctx, session).await?;
    progress(progress_tx, "finalize", "submitting finalize").await;
    finalize(ctx, session, Some(proof)).await
}

/// Sign with the payer plus `extra_signers`, send, and confirm. A dropped or
/// unconfirmed transaction is rebuilt on a fresh blockhash up to `attempts`
/// times; non-retryable errors return immediately.
pub(crate) async fn send_and_confirm(
    ctx: &RelayContext,
    ixs: &[Instruction],
    extra_signers: &[&Keypair],
    max_retries: usize,
    attempts: u32,
) -> RelayResult<Signature> {
    let payer = ctx.payer.as_ref();
    let mut signers: Vec<&Keypair> = Vec::with_capacity(1 + extra_signers.len());
    signers.push(payer);
    signers.extend_from_slice(extra_signers);

    let mut last_err = RelayError::Submission("no attempt made".into());
    for attempt in 1..=attempts.max(1) {
        let blockhash = match ctx.ledger.latest_blockhash().await {
            Ok(h) => h,
            Err(e) if e.is_retryable() => {
                warn!(attempt, "blockhash fetch failed: {e}");
                last_err = e;
                continue;
            }
            Err(e) => return Err(e),
        };
        let tx = Transaction::new_signed_with_payer(
            ixs,
            Some(&payer.pubkey()),
            signers.as_slice(),
            blockhash,
        );
        let sig = match ctx.ledger.send_transaction(&tx, max_retries).await {
            Ok(sig) => sig,
            Err(e) if e.is_retryable() => {
                warn!(attempt, "send failed: {e}");
                last_err = e;
                continue;
            }
            Err(e) => return Err(e),
        };
        match ctx
            .ledger
            .confirm_transaction(&sig, ctx.policy.confirm_timeout)
            .await
        {
            Ok(()) => return Ok(sig),
            Err(e) if e.is_retryable() => {
                warn!(attempt, signature = %sig, "confirm failed: {e}");
                last_err = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err)
}
