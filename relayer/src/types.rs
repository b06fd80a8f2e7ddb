use crate::constants::{MAX_PROOF_HEX_LEN, MAX_SIGNAL_HEX_LEN, PUBLIC_SIGNALS};
use crate::error::AppError;
use crate::validation::ensure_len_le;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Prover output as posted by the client (snarkjs, hex-encoded).
#[derive(Debug, Deserialize, Clone)]
pub struct RelayRequest {
    /// `0x` + eight 32-byte proof points.
    pub proof: String,
    /// `0x`-prefixed 32-byte public signals, in circuit order.
    #[serde(rename = "publicSignals")]
    pub public_signals: Vec<String>,
}

impl RelayRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        let p = self.proof.trim();
        if p.is_empty() {
            return Err(AppError::BadRequest("proof is required".into()));
        }
        ensure_len_le("proof", p, MAX_PROOF_HEX_LEN)?;
        if self.public_signals.len() != PUBLIC_SIGNALS {
            return Err(AppError::BadRequest(format!(
                "publicSignals must have {PUBLIC_SIGNALS} entries, got {}",
                self.public_signals.len()
            )));
        }
        for (i, s) in self.public_signals.iter().enumerate() {
            ensure_len_le(&format!("publicSignals[{i}]"), s.trim(), MAX_SIGNAL_HEX_LEN)?;
        }
        Ok(())
    }
}

/// `POST /relay` response. `withdrawState` is the session address.
#[derive(Debug, Serialize, Clone)]
pub struct RelayResponse {
    pub ok: bool,
    pub err: Option<String>,
    #[serde(rename = "withdrawState")]
    pub withdraw_state: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct FeeAndAddress {
    /// Lamports.
    pub fee: u64,
    /// Relayer address (base58).
    pub address: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct RelayProgressEvent {
    pub kind: &'static str,  // "progress" | "result" | "error"
    pub stage: &'static str, // stable stage identifier
    pub message: String,
    pub ts_ms: u128,
    pub data: Option<Value>,
}

pub type ProgressTx = mpsc::Sender<RelayProgressEvent>;
