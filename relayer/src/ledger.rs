//! Ledger access behind a trait, so the withdrawal driver can run against
//! a live RPC node or a simulated ledger.

use crate::error::{RelayError, RelayResult};
use async_trait::async_trait;
use solana_client::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use solana_transaction_status::TransactionConfirmationStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Raw account data, `None` if the account does not exist.
    async fn get_account_data(&self, address: &Pubkey) -> RelayResult<Option<Vec<u8>>>;

    async fn latest_blockhash(&self) -> RelayResult<Hash>;

    /// Broadcast without preflight. `max_retries` is the node-side rebroadcast budget.
    async fn send_transaction(&self, tx: &Transaction, max_retries: usize)
        -> RelayResult<Signature>;

    /// Wait until `signature` is confirmed, failed, or `timeout` elapses.
    async fn confirm_transaction(&self, signature: &Signature, timeout: Duration)
        -> RelayResult<()>;
}

/// [`Ledger`] over the blocking JSON-RPC client. Each call runs on the
/// blocking pool.
pub struct RpcLedger {
    rpc: Arc<RpcClient>,
}

impl RpcLedger {
    pub fn new(rpc_url: String) -> Self {
        RpcLedger {
            rpc: Arc::new(RpcClient::new_with_commitment(
                rpc_url,
                CommitmentConfig::confirmed(),
            )),
        }
    }

    pub fn url(&self) -> String {
        self.rpc.url()
    }

    async fn blocking<T, F>(&self, what: &'static str, f: F) -> RelayResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&RpcClient) -> RelayResult<T> + Send + 'static,
    {
        let rpc = self.rpc.clone();
        tokio::task::spawn_blocking(move || f(&rpc))
            .await
            .map_err(|e| RelayError::Rpc(format!("{what} task failed: {e}")))?
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn get_account_data(&self, address: &Pubkey) -> RelayResult<Option<Vec<u8>>> {
        let address = *address;
        self.blocking("get_account", move |rpc| {
            rpc.get_account_with_commitment(&address, CommitmentConfig::confirmed())
                .map(|r| r.value.map(|acc| acc.data))
                .map_err(|e| RelayError::Rpc(format!("get_account {address} failed: {e}")))
        })
        .await
    }

    async fn latest_blockhash(&self) -> RelayResult<Hash> {
        self.blocking("blockhash", |rpc| {
            rpc.get_latest_blockhash()
                .map_err(|e| RelayError::Rpc(format!("blockhash failed: {e}")))
        })
        .await
    }

    async fn send_transaction(
        &self,
        tx: &Transaction,
        max_retries: usize,
    ) -> RelayResult<Signature> {
        let tx = tx.clone();
        self.blocking("send_transaction", move |rpc| {
            rpc.send_transaction_with_config(
                &tx,
                RpcSendTransactionConfig {
                    skip_preflight: true,
                    max_retries: Some(max_retries),
                    ..RpcSendTransactionConfig::default()
                },
            )
            .map_err(|e| RelayError::Submission(e.to_string()))
        })
        .await
    }

    async fn confirm_transaction(
        &self,
        signature: &Signature,
        timeout: Duration,
    ) -> RelayResult<()> {
        let sig = *signature;
        self.blocking("confirm_transaction", move |rpc| {
            wait_for_signature_confirmed(rpc, &sig, timeout)
        })
        .await
    }
}

/// Block until `sig` is confirmed/finalized, or return an error/timeout.
///
/// Uses RPC polling + thread sleep; call it from `spawn_blocking`.
fn wait_for_signature_confirmed(
    rpc: &RpcClient,
    sig: &Signature,
    timeout: Duration,
) -> RelayResult<()> {
    let t0 = Instant::now();
    let mut backoff_ms: u64 = 250;
    loop {
        if t0.elapsed() > timeout {
            return Err(RelayError::ConfirmationTimeout {
                signature: sig.to_string(),
                secs: timeout.as_secs(),
            });
        }

        // Transient status-poll failures are retried until the deadline.
        match rpc.get_signature_statuses(&[*sig]) {
            Ok(st) => {
                if let Some(s0) = st.value.first().and_then(|v| v.as_ref()) {
                    if let Some(err) = &s0.err {
                        tracing::warn!(signature = %sig, ?err, "tx failed while confirming");
                        return Err(RelayError::Submission(format!("{sig} failed: {err:?}")));
                    }
                    let ok = matches!(
                        s0.confirmation_status,
                        Some(
                            TransactionConfirmationStatus::Confirmed
                                | TransactionConfirmationStatus::Finalized
                        )
                    ) || s0.confirmations.is_none();
                    if ok {
                        return Ok(());
                    }
                }
            }
            Err(e) => tracing::debug!(signature = %sig, "get_signature_statuses failed: {e}"),
        }

        std::thread::sleep(Duration::from_millis(backoff_ms));
        backoff_ms = (backoff_ms.saturating_mul(2)).min(2_000);
    }
}
