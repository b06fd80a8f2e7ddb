//! Deterministic in-memory ledger for scheduler tests.
//!
//! Models the verifier's phase machine: one step per accepted advance
//! instruction, applied only when the instruction's step index equals the
//! session's next expected step. Everything else is a no-op, which is what
//! makes blind resubmission safe.

use crate::constants::{
    ACC_ITERS, ACC_STEPS_PER_ITER, ANCHOR_DISCRIMINATOR_LEN, FIELD_ELEMENT_LEN,
    IXS_PER_TX_WITHDRAW, PAIRING_ITERS, PAIRING_STEPS_PER_ITER, PROOF_POINTS, PUBLIC_SIGNALS,
    SESSION_ACCOUNT_LEN, SIGNAL_NULLIFIER_HASH,
};
use crate::error::{RelayError, RelayResult};
use crate::instructions::{classify, IxKind};
use crate::ledger::Ledger;
use crate::session::{write_phase, Phase, SessionLayout, Stage};
use async_trait::async_trait;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    pub session: Pubkey,
    pub nullifier_pda: Pubkey,
    pub recipient: Pubkey,
}

struct SimSession {
    steps_applied: u32,
    phase: Phase,
}

#[derive(Default)]
struct SimState {
    accounts: HashMap<Pubkey, Vec<u8>>,
    sessions: HashMap<Pubkey, SimSession>,
    seen: HashSet<Signature>,
    landed: HashSet<Signature>,
    failed: HashMap<Signature, String>,
    submissions: u64,
    dropped: u64,
    premature_finalize: u32,
    finalized: Vec<Finalized>,
}

pub struct SimLedger {
    program_id: Pubkey,
    drop_every: Option<u64>,
    frozen: bool,
    state: Mutex<SimState>,
}

fn step(phase: &mut Phase) {
    match phase.stage {
        Stage::Accumulation => {
            phase.acc_stage_sub_iter += 1;
            if phase.acc_stage_sub_iter as u32 == ACC_STEPS_PER_ITER {
                phase.acc_stage_sub_iter = 0;
                phase.acc_stage_iter += 1;
                if phase.acc_stage_iter as u32 == ACC_ITERS {
                    phase.stage = Stage::Pairing;
                }
            }
        }
        Stage::Pairing => {
            phase.pairing_stage_step += 1;
            if phase.pairing_stage_step as u32 == PAIRING_STEPS_PER_ITER {
                phase.pairing_stage_step = 0;
                phase.pairing_stage_iter += 1;
                if phase.pairing_stage_iter as u32 == PAIRING_ITERS {
                    phase.stage = Stage::Done;
                }
            }
        }
        Stage::Done => {}
    }
}

impl SimLedger {
    pub fn new(program_id: Pubkey) -> Self {
        SimLedger {
            program_id,
            drop_every: None,
            frozen: false,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Silently lose every `k`-th submission.
    pub fn with_drop_every(mut self, k: u64) -> Self {
        self.drop_every = Some(k.max(1));
        self
    }

    /// Accept advance instructions without applying them.
    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    pub fn account(&self, key: &Pubkey) -> Option<Vec<u8>> {
        self.state.lock().unwrap().accounts.get(key).cloned()
    }

    pub fn finalized(&self) -> Vec<Finalized> {
        self.state.lock().unwrap().finalized.clone()
    }

    pub fn premature_finalize_count(&self) -> u32 {
        self.state.lock().unwrap().premature_finalize
    }

    pub fn dropped(&self) -> u64 {
        self.state.lock().unwrap().dropped
    }

    fn execute(&self, st: &mut SimState, tx: &Transaction) -> Result<(), String> {
        let keys = &tx.message.account_keys;
        let mut advance_pos: HashMap<Pubkey, u32> = HashMap::new();
        for ix in &tx.message.instructions {
            if keys[ix.program_id_index as usize] != self.program_id {
                return Err("unknown program".into());
            }
            let acc = |i: usize| keys[ix.accounts[i] as usize];
            match classify(&ix.data).ok_or("unknown instruction")? {
                IxKind::Init => {
                    let session = acc(0);
                    if st.accounts.contains_key(&session) {
                        return Err(format!("account {session} already in use"));
                    }
                    let mut data = vec![0u8; SESSION_ACCOUNT_LEN];
                    // Limbs are borsh u64 LE, identical to the account encoding.
                    let body = &ix.data[9..];
                    let limbs_len = (PROOF_POINTS + PUBLIC_SIGNALS) * FIELD_ELEMENT_LEN;
                    data[ANCHOR_DISCRIMINATOR_LEN..ANCHOR_DISCRIMINATOR_LEN + limbs_len].copy_from_slice(&body[..limbs_len]);
                    write_phase(&mut data, &Phase::INITIAL);
                    st.accounts.insert(session, data);
                    st.sessions.insert(
                        session,
                        SimSession {
                            steps_applied: 0,
                            phase: Phase::INITIAL,
                        },
                    );
                }
                IxKind::Advance { group_index } => {
                    let session = acc(0);
                    let pos = advance_pos.entry(session).or_insert(0);
                    let step_index = group_index as u32 * IXS_PER_TX_WITHDRAW + *pos;
                    *pos += 1;
                    let s = st
                        .sessions
                        .get_mut(&session)
                        .ok_or("advance on missing session")?;
                    if self.frozen || s.phase.is_done() || step_index != s.steps_applied {
                        continue;
                    }
                    step(&mut s.phase);
                    s.steps_applied += 1;
                    let phase = s.phase;
                    if let Some(data) = st.accounts.get_mut(&session) {
                        write_phase(data, &phase);
                    }
                }
                IxKind::Finalize => {
                    let session = acc(1);
                    let pda = acc(2);
                    let recipient = acc(3);
                    let done = st.sessions.get(&session).is_some_and(|s| s.phase.is_done());
                    if !done {
                        st.premature_finalize += 1;
                        return Err("session not complete".into());
                    }
                    let data = st.accounts.get(&session).ok_or("session closed")?;
                    let mut nullifier = [0u8; 32];
                    nullifier.copy_from_slice(SessionLayout::public_signal(SIGNAL_NULLIFIER_HASH).bytes(data));
                    nullifier.reverse();
                    let (expected, _) =
                        Pubkey::find_program_address(&[nullifier.as_ref()], &self.program_id);
                    if pda != expected {
                        return Err("nullifier seeds mismatch".into());
                    }
                    if st.accounts.contains_key(&pda) {
                        return Err("nullifier already spent".into());
                    }
                    st.accounts.insert(pda, vec![1]);
                    st.accounts.remove(&session);
                    st.sessions.remove(&session);
                    st.finalized.push(Finalized {
                        session,
                        nullifier_pda: pda,
                        recipient,
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for SimLedger {
    async fn get_account_data(&self, address: &Pubkey) -> RelayResult<Option<Vec<u8>>> {
        Ok(self.account(address))
    }

    async fn latest_blockhash(&self) -> RelayResult<Hash> {
        Ok(Hash::new_unique())
    }

    async fn send_transaction(
        &self,
        tx: &Transaction,
        _max_retries: usize,
    ) -> RelayResult<Signature> {
        let sig = tx.signatures[0];
        let mut st = self.state.lock().unwrap();
        st.submissions += 1;
        if !st.seen.insert(sig) {
            return Ok(sig);
        }
        if self.drop_every.is_some_and(|k| st.submissions % k == 0) {
            st.dropped += 1;
            return Ok(sig);
        }
        // Transactions are atomic: run against a scratch copy.
        let mut scratch = SimState {
            accounts: st.accounts.clone(),
            sessions: st
                .sessions
                .iter()
                .map(|(k, s)| {
                    (
                        *k,
                        SimSession {
                            steps_applied: s.steps_applied,
                            phase: s.phase,
                        },
                    )
                })
                .collect(),
            finalized: st.finalized.clone(),
            ..SimState::default()
        };
        let result = self.execute(&mut scratch, tx);
        st.premature_finalize += scratch.premature_finalize;
        match result {
            Ok(()) => {
                st.accounts = scratch.accounts;
                st.sessions = scratch.sessions;
                st.finalized = scratch.finalized;
                st.landed.insert(sig);
            }
            Err(e) => {
                st.failed.insert(sig, e);
            }
        }
        Ok(sig)
    }

    async fn confirm_transaction(&self, signature: &Signature, _timeout: Duration) -> RelayResult<()> {
        let st = self.state.lock().unwrap();
        if st.landed.contains(signature) {
            return Ok(());
        }
        if let Some(e) = st.failed.get(signature) {
            return Err(RelayError::Submission(format!("{signature} failed: {e}")));
        }
        Err(RelayError::ConfirmationTimeout {
            signature: signature.to_string(),
            secs: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::fixture_point;
    use crate::codec::Proof;
    use crate::config::SchedulerPolicy;
    use crate::constants::{DEFAULT_PROGRAM_ID, MAX_LINEAR_PROGRESS, NUM_ADVANCES_WITHDRAW};
    use crate::context::RelayContext;
    use crate::instructions::{nullifier_hash_pda, withdraw_advance};
    use crate::session::linear_progress;
    use crate::withdraw::{self, AdvancePlan};
    use solana_sdk::signature::{Keypair, Signer};
    use std::str::FromStr;
    use std::sync::Arc;

    fn fast_policy() -> SchedulerPolicy {
        SchedulerPolicy {
            early_backoff: Duration::from_millis(0),
            late_backoff: Duration::from_millis(1),
            completion_timeout: Duration::from_secs(1),
            completion_poll: Duration::from_millis(1),
            ..SchedulerPolicy::default()
        }
    }

    fn ctx_with(sim: Arc<SimLedger>, program_id: Pubkey, policy: SchedulerPolicy) -> RelayContext {
        RelayContext::new(sim, Arc::new(Keypair::new()), program_id, policy)
    }

    const NULLIFIER_BE: [u8; 32] = [
        0x0a, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
        0xf0, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x10, 0x20, 0x30, 0x40, 0x50,
        0x60, 0x70,
    ];
    const RECIPIENT: [u8; 32] = [
        0xde, 0xad, 0xbe, 0xef, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a,
        0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19,
        0x1a, 0x1b,
    ];

    fn fixture_proof() -> Proof {
        let points: String = (0..8).map(fixture_point).collect();
        let mut recipient_be = RECIPIENT;
        recipient_be.reverse();
        let signals = vec![
            format!("0x{}", fixture_point(0)),
            format!("0x{}", hex::encode(NULLIFIER_BE)),
            format!("0x{}", hex::encode(recipient_be)),
            format!("0x{:064x}", 10_000_000u64),
            format!("0x{}", fixture_point(4)),
            format!("0x{:064x}", 0u64),
        ];
        Proof::from_hex(&format!("0x{points}"), &signals).unwrap()
    }

    fn progress_of(sim: &SimLedger, session: &Pubkey) -> u32 {
        linear_progress(sim.account(session).as_deref()).unwrap()
    }

    #[test]
    fn phase_machine_reaches_done_after_every_advance() {
        let mut phase = Phase::INITIAL;
        for n in 1..=NUM_ADVANCES_WITHDRAW {
            step(&mut phase);
            assert_eq!(phase.is_done(), n == NUM_ADVANCES_WITHDRAW);
        }
        assert_eq!(phase.linear_progress(), MAX_LINEAR_PROGRESS);
    }

    #[tokio::test]
    async fn scheduler_drives_lossy_session_to_completion() {
        let program_id = Pubkey::new_unique();
        let sim = Arc::new(SimLedger::new(program_id).with_drop_every(7));
        let ctx = ctx_with(sim.clone(), program_id, fast_policy());
        let outcome = withdraw::begin(&ctx, &fixture_proof()).await.unwrap();
        assert_eq!(progress_of(&sim, &outcome.session), 0);

        let report = withdraw::run_advance(&ctx, &outcome.session, &None)
            .await
            .unwrap();
        assert_eq!(progress_of(&sim, &outcome.session), MAX_LINEAR_PROGRESS);
        assert!(report.iterations <= ctx.policy.max_iterations);
        assert!(sim.dropped() > 0);
        assert!(sim.finalized().is_empty());
        assert_eq!(sim.premature_finalize_count(), 0);
    }

    #[tokio::test]
    async fn finalize_before_completion_is_refused_without_sending() {
        let program_id = Pubkey::new_unique();
        let sim = Arc::new(SimLedger::new(program_id));
        let ctx = ctx_with(sim.clone(), program_id, fast_policy());
        let outcome = withdraw::begin(&ctx, &fixture_proof()).await.unwrap();

        let err = withdraw::finalize(&ctx, &outcome.session, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Precondition(_)));
        assert_eq!(sim.premature_finalize_count(), 0);
        assert!(sim.finalized().is_empty());

        let policy = SchedulerPolicy {
            completion_timeout: Duration::from_millis(0),
            ..fast_policy()
        };
        let ctx = ctx_with(sim.clone(), program_id, policy);
        assert!(matches!(
            withdraw::wait_for_completion(&ctx, &outcome.session).await,
            Err(RelayError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn resubmitting_applied_advance_is_a_no_op() {
        let program_id = Pubkey::new_unique();
        let sim = Arc::new(SimLedger::new(program_id));
        let ctx = ctx_with(sim.clone(), program_id, fast_policy());
        let session = withdraw::begin(&ctx, &fixture_proof()).await.unwrap().session;

        let plan = AdvancePlan::withdraw().unwrap();
        let group0 = &plan.group_instructions(&program_id, &session)[0];
        let payer = ctx.payer.as_ref();
        let tx = Transaction::new_signed_with_payer(
            group0,
            Some(&payer.pubkey()),
            &[payer],
            sim.latest_blockhash().await.unwrap(),
        );
        sim.send_transaction(&tx, 0).await.unwrap();
        assert_eq!(progress_of(&sim, &session), 55);

        // Same signature.
        sim.send_transaction(&tx, 0).await.unwrap();
        assert_eq!(progress_of(&sim, &session), 55);

        // Same steps, fresh blockhash.
        let again = Transaction::new_signed_with_payer(
            group0,
            Some(&payer.pubkey()),
            &[payer],
            sim.latest_blockhash().await.unwrap(),
        );
        sim.send_transaction(&again, 0).await.unwrap();
        sim.confirm_transaction(&again.signatures[0], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(progress_of(&sim, &session), 55);

        // A step ahead of the frontier is also ignored.
        let ahead = Transaction::new_signed_with_payer(
            &[withdraw_advance(&program_id, &session, 3)],
            Some(&payer.pubkey()),
            &[payer],
            sim.latest_blockhash().await.unwrap(),
        );
        sim.send_transaction(&ahead, 0).await.unwrap();
        assert_eq!(progress_of(&sim, &session), 55);
    }

    #[tokio::test]
    async fn stuck_session_surfaces_stall() {
        let program_id = Pubkey::new_unique();
        let sim = Arc::new(SimLedger::new(program_id).frozen());
        let policy = SchedulerPolicy {
            max_iterations: 3,
            ..fast_policy()
        };
        let ctx = ctx_with(sim.clone(), program_id, policy);
        let session = withdraw::begin(&ctx, &fixture_proof()).await.unwrap().session;
        let err = withdraw::run_advance(&ctx, &session, &None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RelayError::Stall {
                progress: 0,
                iterations: 3,
                ..
            }
        ));
        assert!(sim.account(&session).is_some());
    }

    #[tokio::test]
    async fn end_to_end_derives_fixture_addresses() {
        let program_id = Pubkey::from_str(DEFAULT_PROGRAM_ID).unwrap();
        let sim = Arc::new(SimLedger::new(program_id).with_drop_every(5));
        let ctx = ctx_with(sim.clone(), program_id, fast_policy());
        let proof = fixture_proof();

        let session = withdraw::begin(&ctx, &proof).await.unwrap().session;
        let settlement = withdraw::complete(&ctx, &session, &proof, &None)
            .await
            .unwrap();
        assert!(matches!(settlement, withdraw::Settlement::Confirmed(_)));

        let nullifier_pda = Pubkey::from_str("4w3dmJfjw4qsdDcSJudiNeRTtLYx5ZcsBMJLNkRihwnY").unwrap();
        let recipient = Pubkey::from_str("FzFAtu3bzEoqj6ZbtUDxMjeDGBq2Sfzu5xMaYAW5Gtin").unwrap();
        assert_eq!(recipient, Pubkey::new_from_array(RECIPIENT));
        assert_eq!(
            nullifier_hash_pda(&program_id, &NULLIFIER_BE),
            (nullifier_pda, 255)
        );
        assert_eq!(
            sim.finalized(),
            vec![Finalized {
                session,
                nullifier_pda,
                recipient,
            }]
        );
        assert!(sim.account(&session).is_none());
        assert!(sim.account(&nullifier_pda).is_some());
        assert_eq!(sim.premature_finalize_count(), 0);
    }

    /// Losses whose period divides the batch size used to hit the frontier
    /// transaction of every batch.
    #[tokio::test]
    async fn periodic_loss_in_step_with_batch_size_still_completes() {
        for k in [11, 16] {
            let program_id = Pubkey::new_unique();
            let sim = Arc::new(SimLedger::new(program_id).with_drop_every(k));
            let ctx = ctx_with(sim.clone(), program_id, fast_policy());
            let session = withdraw::begin(&ctx, &fixture_proof()).await.unwrap().session;

            let report = withdraw::run_advance(&ctx, &session, &None)
                .await
                .unwrap_or_else(|e| panic!("drop_every({k}): {e}"));
            assert_eq!(progress_of(&sim, &session), MAX_LINEAR_PROGRESS);
            assert!(report.iterations < ctx.policy.max_iterations / 2);
            assert!(sim.dropped() > 0);
        }
    }

    /// Loses the first confirmation asked for after the session is settled.
    struct LostFinalizeConfirmation {
        inner: Arc<SimLedger>,
        lost: Mutex<bool>,
    }

    #[async_trait]
    impl Ledger for LostFinalizeConfirmation {
        async fn get_account_data(&self, address: &Pubkey) -> RelayResult<Option<Vec<u8>>> {
            self.inner.get_account_data(address).await
        }

        async fn latest_blockhash(&self) -> RelayResult<Hash> {
            self.inner.latest_blockhash().await
        }

        async fn send_transaction(&self, tx: &Transaction, max_retries: usize) -> RelayResult<Signature> {
            self.inner.send_transaction(tx, max_retries).await
        }

        async fn confirm_transaction(&self, signature: &Signature, timeout: Duration) -> RelayResult<()> {
            if !self.inner.finalized().is_empty() {
                let mut lost = self.lost.lock().unwrap();
                if !*lost {
                    *lost = true;
                    return Err(RelayError::ConfirmationTimeout {
                        signature: signature.to_string(),
                        secs: timeout.as_secs(),
                    });
                }
            }
            self.inner.confirm_transaction(signature, timeout).await
        }
    }

    #[tokio::test]
    async fn landed_finalize_with_lost_confirmation_is_settled() {
        let program_id = Pubkey::new_unique();
        let sim = Arc::new(SimLedger::new(program_id));
        let ledger = Arc::new(LostFinalizeConfirmation {
            inner: sim.clone(),
            lost: Mutex::new(false),
        });
        let ctx = RelayContext::new(ledger.clone(), Arc::new(Keypair::new()), program_id, fast_policy());
        let proof = fixture_proof();

        let session = withdraw::begin(&ctx, &proof).await.unwrap().session;
        let settlement = withdraw::complete(&ctx, &session, &proof, &None)
            .await
            .unwrap();
        assert_eq!(settlement, withdraw::Settlement::Observed);
        assert!(settlement.signature().is_none());
        assert!(*ledger.lost.lock().unwrap());
        assert_eq!(sim.finalized().len(), 1);
        assert!(sim.account(&session).is_none());
    }

    #[tokio::test]
    async fn session_record_disagreeing_with_proof_is_not_finalized() {
        let program_id = Pubkey::new_unique();
        let sim = Arc::new(SimLedger::new(program_id));
        let ctx = ctx_with(sim.clone(), program_id, fast_policy());
        let session = withdraw::begin(&ctx, &fixture_proof()).await.unwrap().session;
        withdraw::run_advance(&ctx, &session, &None).await.unwrap();

        let mut other = fixture_proof();
        other.public_signals[1][0] ^= 0xff;
        let err = withdraw::finalize(&ctx, &session, Some(&other))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Precondition(_)));
        assert!(sim.finalized().is_empty());
    }
}
