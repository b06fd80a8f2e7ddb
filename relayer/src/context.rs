use crate::config::SchedulerPolicy;
use crate::ledger::Ledger;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;

/// Everything a withdrawal needs to talk to the program: the ledger, the
/// signing identity and the program address. Built once, passed by reference.
#[derive(Clone)]
pub struct RelayContext {
    pub ledger: Arc<dyn Ledger>,
    /// Fee payer and relayer identity.
    pub payer: Arc<Keypair>,
    pub program_id: Pubkey,
    pub policy: SchedulerPolicy,
}

impl RelayContext {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        payer: Arc<Keypair>,
        program_id: Pubkey,
        policy: SchedulerPolicy,
    ) -> Self {
        RelayContext {
            ledger,
            payer,
            program_id,
            policy,
        }
    }

    pub fn payer_pubkey(&self) -> Pubkey {
        self.payer.pubkey()
    }
}
