use super::send_and_confirm;
use crate::codec::{encode_proof, Proof};
use crate::context::RelayContext;
use crate::error::RelayResult;
use crate::instructions::withdraw_init;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitOutcome {
    /// Address of the new `WithdrawState` account.
    pub session: Pubkey,
    pub signature: Signature,
}

/// Allocate a fresh session keypair and submit `withdraw_init` for `proof`.
///
/// The session address is a random keypair, not a PDA. The transaction is
/// sent and confirmed once; rejection surfaces as `Submission`, an
/// unconfirmed send as `ConfirmationTimeout`.
pub async fn initiate_session(ctx: &RelayContext, proof: &Proof) -> RelayResult<InitOutcome> {
    let encoded = encode_proof(proof)?;
    let session = Keypair::new();
    let ix = withdraw_init(
        &ctx.program_id,
        &session.pubkey(),
        &ctx.payer_pubkey(),
        &encoded,
    );
    let signature = send_and_confirm(
        ctx,
        &[ix],
        &[&session],
        ctx.policy.final_group_max_retries,
        1,
    )
    .await?;
    info!(session = %session.pubkey(), %signature, "session initialized");
    Ok(InitOutcome {
        session: session.pubkey(),
        signature,
    })
}
