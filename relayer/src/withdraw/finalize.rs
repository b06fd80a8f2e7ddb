use super::send_and_confirm;
use crate::codec::{FieldBytes, Proof};
use crate::constants::{MAX_LINEAR_PROGRESS, SIGNAL_NULLIFIER_HASH, SIGNAL_RECIPIENT};
use crate::context::RelayContext;
use crate::error::{RelayError, RelayResult};
use crate::instructions::{nullifier_hash_pda, withdraw_finalize};
use crate::session::{decode_session, linear_progress, SessionSnapshot};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Addresses and arguments of `withdraw_finalize`, derived from a
/// completed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeAccounts {
    /// Big-endian nullifier hash; also the seed of the guard PDA.
    pub nullifier_hash: FieldBytes,
    pub nullifier_pda: Pubkey,
    pub nullifier_bump: u8,
    pub recipient: Pubkey,
}

/// The session record is the source of truth. Signals are stored as
/// little-endian images: the nullifier hash is read back big-endian, the
/// recipient address is the stored image itself.
pub fn derive_finalize_accounts(program_id: &Pubkey, snapshot: &SessionSnapshot) -> FinalizeAccounts {
    let nullifier_hash = snapshot.public_signal_be(SIGNAL_NULLIFIER_HASH);
    let (nullifier_pda, nullifier_bump) = nullifier_hash_pda(program_id, &nullifier_hash);
    FinalizeAccounts {
        nullifier_hash,
        nullifier_pda,
        nullifier_bump,
        recipient: Pubkey::new_from_array(snapshot.public_signals_le[SIGNAL_RECIPIENT]),
    }
}

/// How a finalize ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The finalize transaction was confirmed.
    Confirmed(Signature),
    /// Its confirmation was lost, but the session is closed and the
    /// nullifier guard exists, so an earlier attempt landed.
    Observed,
}

impl Settlement {
    pub fn signature(&self) -> Option<&Signature> {
        match self {
            Settlement::Confirmed(sig) => Some(sig),
            Settlement::Observed => None,
        }
    }
}

/// True when the session account is gone and the nullifier PDA exists.
/// Read errors count as "not settled".
async fn already_settled(ctx: &RelayContext, session: &Pubkey, nullifier_pda: &Pubkey) -> bool {
    if !matches!(ctx.ledger.get_account_data(session).await, Ok(None)) {
        return false;
    }
    matches!(ctx.ledger.get_account_data(nullifier_pda).await, Ok(Some(_)))
}

fn check_against_proof(snapshot: &SessionSnapshot, proof: &Proof) -> RelayResult<()> {
    for slot in [SIGNAL_NULLIFIER_HASH, SIGNAL_RECIPIENT] {
        if snapshot.public_signal_be(slot) != *proof.signal(slot) {
            return Err(RelayError::Precondition(format!(
                "session public signal {slot} differs from the submitted proof"
            )));
        }
    }
    Ok(())
}

/// Poll until the session reports the final phase or
/// `policy.completion_timeout` elapses.
pub async fn wait_for_completion(ctx: &RelayContext, session: &Pubkey) -> RelayResult<u32> {
    let deadline = Instant::now() + ctx.policy.completion_timeout;
    let mut last = 0u32;
    loop {
        match ctx.ledger.get_account_data(session).await {
            Ok(data) => {
                last = linear_progress(data.as_deref())?;
                if last >= MAX_LINEAR_PROGRESS {
                    return Ok(last);
                }
            }
            Err(e) if e.is_retryable() => debug!(session = %session, "completion poll failed: {e}"),
            Err(e) => return Err(e),
        }
        if Instant::now() >= deadline {
            return Err(RelayError::Precondition(format!(
                "session {session} not complete after {}s: progress {last}/{MAX_LINEAR_PROGRESS}",
                ctx.policy.completion_timeout.as_secs()
            )));
        }
        tokio::time::sleep(ctx.policy.completion_poll).await;
    }
}

/// Submit `withdraw_finalize` for a completed session.
///
/// A session that is missing or not DONE is a `Precondition` error and
/// nothing is sent. When `proof` is given, the nullifier and recipient
/// stored on-chain must match it. Before each resend the ledger is checked
/// for an earlier attempt that landed unconfirmed.
pub async fn finalize(
    ctx: &RelayContext,
    session: &Pubkey,
    proof: Option<&Proof>,
) -> RelayResult<Settlement> {
    let data = ctx
        .ledger
        .get_account_data(session)
        .await?
        .ok_or_else(|| RelayError::Precondition(format!("session {session} does not exist")))?;
    let snapshot = decode_session(&data)?;
    if !snapshot.phase.is_done() {
        return Err(RelayError::Precondition(format!(
            "finalize before completion: progress {}/{MAX_LINEAR_PROGRESS}",
            snapshot.phase.linear_progress()
        )));
    }
    if let Some(proof) = proof {
        check_against_proof(&snapshot, proof)?;
    }

    let accounts = derive_finalize_accounts(&ctx.program_id, &snapshot);
    let relayer = ctx.payer_pubkey();
    let ix = withdraw_finalize(
        &ctx.program_id,
        session,
        &accounts.nullifier_pda,
        accounts.nullifier_bump,
        &accounts.nullifier_hash,
        &accounts.recipient,
        &relayer,
    );
    let attempts = ctx.policy.max_confirm_attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        if attempt > 1 && already_settled(ctx, session, &accounts.nullifier_pda).await {
            break;
        }
        match send_and_confirm(
            ctx,
            std::slice::from_ref(&ix),
            &[],
            ctx.policy.final_group_max_retries,
            1,
        )
        .await
        {
            Ok(signature) => {
                info!(
                    session = %session,
                    recipient = %accounts.recipient,
                    nullifier_pda = %accounts.nullifier_pda,
                    %signature,
                    "withdrawal finalized"
                );
                return Ok(Settlement::Confirmed(signature));
            }
            Err(e) if e.is_retryable() => {
                warn!(session = %session, attempt, "finalize unconfirmed: {e}");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    if already_settled(ctx, session, &accounts.nullifier_pda).await {
        info!(
            session = %session,
            recipient = %accounts.recipient,
            nullifier_pda = %accounts.nullifier_pda,
            "withdrawal finalized; confirmation lost"
        );
        return Ok(Settlement::Observed);
    }
    Err(last_err.unwrap_or_else(|| RelayError::Submission("finalize not sent".into())))
}
