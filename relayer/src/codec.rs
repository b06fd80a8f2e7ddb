//! Proof re-encoding for the on-chain verifier.
//!
//! The prover emits big-endian 256-bit values as hex. The program wants each
//! value as four `u64` limbs ordered least-significant first, and it uses the
//! ZCash BN coordinate order for G2, which is the reverse of the Ethereum
//! order snarkjs produces.

use crate::constants::{FIELD_ELEMENT_LEN, LIMBS, PROOF_POINTS, PUBLIC_SIGNALS};
use crate::error::{RelayError, RelayResult};

pub type Limbs = [u64; LIMBS];
pub type FieldBytes = [u8; FIELD_ELEMENT_LEN];

/// Immutable prover output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    pub points: [FieldBytes; PROOF_POINTS],
    pub public_signals: [FieldBytes; PUBLIC_SIGNALS],
}

/// Proof in the program's numeric representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedProof {
    pub points: [Limbs; PROOF_POINTS],
    pub public_signals: [Limbs; PUBLIC_SIGNALS],
}

fn strip_0x(s: &str) -> &str {
    let t = s.trim();
    t.strip_prefix("0x").unwrap_or(t)
}

fn field_bytes(field: &str, bytes: &[u8]) -> RelayResult<FieldBytes> {
    bytes.try_into().map_err(|_| {
        RelayError::Encoding(format!(
            "{field} must be {FIELD_ELEMENT_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

impl Proof {
    /// Parse the prover's JSON strings: `proof` is `0x` + eight 32-byte
    /// points, each public signal is `0x` + one 32-byte element.
    pub fn from_hex(proof_hex: &str, public_signals: &[String]) -> RelayResult<Self> {
        let raw = hex::decode(strip_0x(proof_hex))
            .map_err(|e| RelayError::Encoding(format!("proof is not hex: {e}")))?;
        if raw.len() != PROOF_POINTS * FIELD_ELEMENT_LEN {
            return Err(RelayError::Encoding(format!(
                "proof must hold {PROOF_POINTS} points of {FIELD_ELEMENT_LEN} bytes, got {} bytes",
                raw.len()
            )));
        }
        let mut points = [[0u8; FIELD_ELEMENT_LEN]; PROOF_POINTS];
        for (i, chunk) in raw.chunks(FIELD_ELEMENT_LEN).enumerate() {
            points[i] = field_bytes(&format!("proof point {i}"), chunk)?;
        }

        if public_signals.len() != PUBLIC_SIGNALS {
            return Err(RelayError::Encoding(format!(
                "expected {PUBLIC_SIGNALS} public signals, got {}",
                public_signals.len()
            )));
        }
        let mut signals = [[0u8; FIELD_ELEMENT_LEN]; PUBLIC_SIGNALS];
        for (i, s) in public_signals.iter().enumerate() {
            let b = hex::decode(strip_0x(s))
                .map_err(|e| RelayError::Encoding(format!("public signal {i} is not hex: {e}")))?;
            signals[i] = field_bytes(&format!("public signal {i}"), &b)?;
        }
        Ok(Proof {
            points,
            public_signals: signals,
        })
    }

    pub fn signal(&self, slot: usize) -> &FieldBytes {
        &self.public_signals[slot]
    }
}

/// Split a big-endian 32-byte value into four `u64` limbs, least significant first.
///
/// `limb0 = bytes[24..32]`, `limb3 = bytes[0..8]`, each read big-endian.
pub fn decompose_field_element(bytes: &[u8]) -> RelayResult<Limbs> {
    let b = field_bytes("field element", bytes)?;
    let mut limbs = [0u64; LIMBS];
    for (i, limb) in limbs.iter_mut().enumerate() {
        let start = FIELD_ELEMENT_LEN - 8 * (i + 1);
        let mut group = [0u8; 8];
        group.copy_from_slice(&b[start..start + 8]);
        *limb = u64::from_be_bytes(group);
    }
    Ok(limbs)
}

/// Inverse of [`decompose_field_element`].
pub fn recompose_field_element(limbs: &Limbs) -> FieldBytes {
    let mut out = [0u8; FIELD_ELEMENT_LEN];
    for (i, limb) in limbs.iter().enumerate() {
        let start = FIELD_ELEMENT_LEN - 8 * (i + 1);
        out[start..start + 8].copy_from_slice(&limb.to_be_bytes());
    }
    out
}

/// Swap the two G2 coordinate pairs between Ethereum and ZCash BN order.
/// Applying it twice restores the input.
pub fn swap_g2_coordinates(points: &mut [Limbs; PROOF_POINTS]) {
    points.swap(2, 3);
    points.swap(4, 5);
}

/// Re-encode the proof points. Exactly one G2 swap is applied.
pub fn encode_proof_points(proof: &Proof) -> RelayResult<[Limbs; PROOF_POINTS]> {
    let mut points = [[0u64; LIMBS]; PROOF_POINTS];
    for (i, p) in proof.points.iter().enumerate() {
        points[i] = decompose_field_element(p)?;
    }
    swap_g2_coordinates(&mut points);
    Ok(points)
}

pub fn encode_proof(proof: &Proof) -> RelayResult<EncodedProof> {
    let points = encode_proof_points(proof)?;
    let mut public_signals = [[0u64; LIMBS]; PUBLIC_SIGNALS];
    for (i, s) in proof.public_signals.iter().enumerate() {
        public_signals[i] = decompose_field_element(s)?;
    }
    Ok(EncodedProof {
        points,
        public_signals,
    })
}

/// Field element as stored in the session account: the limbs written
/// little-endian one after another, i.e. the value's little-endian image.
pub fn le_image(be: &FieldBytes) -> FieldBytes {
    let mut out = *be;
    out.reverse();
    out
}
