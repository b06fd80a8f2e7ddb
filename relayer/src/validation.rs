use crate::codec::{le_image, Proof};
use crate::constants::{SIGNAL_FEE, SIGNAL_REFUND, SIGNAL_RELAYER};
use crate::error::AppError;
use solana_sdk::pubkey::Pubkey;

pub fn ensure_len_le(field: &str, s: &str, max: usize) -> Result<(), AppError> {
    if s.len() > max {
        return Err(AppError::BadRequest(format!(
            "{field} too long: {} chars (max {max})",
            s.len()
        )));
    }
    Ok(())
}

/// Fee signal as lamports. The field element must fit in a u64.
pub fn fee_lamports(proof: &Proof) -> Result<u64, AppError> {
    let be = proof.signal(SIGNAL_FEE);
    if be[..24].iter().any(|b| *b != 0) {
        return Err(AppError::BadRequest("fee signal does not fit in u64".into()));
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&be[24..]);
    Ok(u64::from_be_bytes(low))
}

/// The proof must pay this relayer at least `min_fee` lamports and ask for
/// no refund: the relayer only pays transaction fees.
pub fn validate_relay_economics(
    proof: &Proof,
    relayer: &Pubkey,
    min_fee: u64,
) -> Result<(), AppError> {
    let fee = fee_lamports(proof)?;
    if fee < min_fee {
        return Err(AppError::BadRequest(format!(
            "fee {fee} below relayer fee {min_fee}"
        )));
    }
    if proof.signal(SIGNAL_REFUND).iter().any(|b| *b != 0) {
        return Err(AppError::BadRequest("refund must be zero".into()));
    }
    // Addresses are committed as the little-endian image of their bytes.
    let committed = Pubkey::new_from_array(le_image(proof.signal(SIGNAL_RELAYER)));
    if committed != *relayer {
        return Err(AppError::BadRequest(format!(
            "proof is bound to relayer {committed}, not {relayer}"
        )));
    }
    Ok(())
}
