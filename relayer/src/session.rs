//! `WithdrawState` account decoding and linear progress.
//!
//! Offsets are a versioned contract with the on-chain program (Anchor
//! v0.24.2 layout). Any length mismatch is a schema error, never a guess.

use crate::codec::FieldBytes;
use crate::constants::{
    ANCHOR_DISCRIMINATOR_LEN, FIELD_ELEMENT_LEN, LIMBS, MAX_LINEAR_PROGRESS, PROGRESS_ACC_WEIGHT,
    PROGRESS_PAIRING_BASE, PROGRESS_PAIRING_WEIGHT, PROOF_POINTS, PUBLIC_SIGNALS,
    SESSION_ACCOUNT_LEN,
};
use crate::error::{RelayError, RelayResult};

/// Byte order of an integer field. The program only writes little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
}

/// One row of the session schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub width: usize,
    pub endian: Endian,
}

impl Field {
    const fn new(name: &'static str, offset: usize, width: usize, endian: Endian) -> Self {
        Field {
            name,
            offset,
            width,
            endian,
        }
    }

    pub fn bytes<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.offset..self.offset + self.width]
    }

    fn read_uint(&self, data: &[u8]) -> u64 {
        match self.endian {
            Endian::Little => self
                .bytes(data)
                .iter()
                .rev()
                .fold(0u64, |v, b| (v << 8) | *b as u64),
        }
    }
}

const PROOF_OFFSET: usize = ANCHOR_DISCRIMINATOR_LEN;
const SIGNALS_OFFSET: usize = PROOF_OFFSET + PROOF_POINTS * LIMBS * 8;
const PHASE_OFFSET: usize = SIGNALS_OFFSET + PUBLIC_SIGNALS * FIELD_ELEMENT_LEN;

/// Schema of the session account.
pub struct SessionLayout;

impl SessionLayout {
    pub const TOTAL_LEN: usize = SESSION_ACCOUNT_LEN;

    pub const STAGE: Field = Field::new("stage", PHASE_OFFSET, 1, Endian::Little);
    pub const ACC_ITER: Field = Field::new("acc_stage_iter", PHASE_OFFSET + 1, 1, Endian::Little);
    pub const ACC_SUB_ITER: Field =
        Field::new("acc_stage_sub_iter", PHASE_OFFSET + 2, 2, Endian::Little);
    pub const PAIRING_ITER: Field =
        Field::new("pairing_stage_iter", PHASE_OFFSET + 4, 1, Endian::Little);
    pub const PAIRING_STEP: Field =
        Field::new("pairing_stage_step", PHASE_OFFSET + 6, 2, Endian::Little);

    pub const fn proof_point(i: usize) -> Field {
        Field::new("proof_point", PROOF_OFFSET + i * LIMBS * 8, LIMBS * 8, Endian::Little)
    }

    /// Public signal `k`, stored as the little-endian image of the field element.
    pub const fn public_signal(k: usize) -> Field {
        Field::new(
            "public_signal",
            SIGNALS_OFFSET + k * FIELD_ELEMENT_LEN,
            FIELD_ELEMENT_LEN,
            Endian::Little,
        )
    }

    pub fn check_len(data: &[u8]) -> RelayResult<()> {
        if data.len() != Self::TOTAL_LEN {
            return Err(RelayError::SchemaVersion {
                expected: Self::TOTAL_LEN,
                actual: data.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Accumulation,
    Pairing,
    Done,
}

impl TryFrom<u8> for Stage {
    type Error = RelayError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Stage::Accumulation),
            1 => Ok(Stage::Pairing),
            2 => Ok(Stage::Done),
            other => Err(RelayError::ProtocolMismatch(other)),
        }
    }
}

/// Phase descriptor as stored on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Phase {
    pub stage: Stage,
    pub acc_stage_iter: u8,
    pub acc_stage_sub_iter: u16,
    pub pairing_stage_iter: u8,
    pub pairing_stage_step: u16,
}

impl Phase {
    pub const INITIAL: Phase = Phase {
        stage: Stage::Accumulation,
        acc_stage_iter: 0,
        acc_stage_sub_iter: 0,
        pairing_stage_iter: 0,
        pairing_stage_step: 0,
    };

    /// Linear progress in `0..=MAX_LINEAR_PROGRESS`.
    pub fn linear_progress(&self) -> u32 {
        match self.stage {
            Stage::Accumulation => {
                PROGRESS_ACC_WEIGHT * self.acc_stage_iter as u32 + self.acc_stage_sub_iter as u32
            }
            Stage::Pairing => {
                PROGRESS_PAIRING_BASE
                    + PROGRESS_PAIRING_WEIGHT * self.pairing_stage_iter as u32
                    + self.pairing_stage_step as u32
            }
            Stage::Done => MAX_LINEAR_PROGRESS,
        }
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }
}

/// Decoded view of a session account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    /// Little-endian images of the six public signals.
    pub public_signals_le: [FieldBytes; PUBLIC_SIGNALS],
}

impl SessionSnapshot {
    /// Big-endian bytes of public signal `k`.
    pub fn public_signal_be(&self, k: usize) -> FieldBytes {
        let mut out = self.public_signals_le[k];
        out.reverse();
        out
    }
}

pub fn decode_phase(data: &[u8]) -> RelayResult<Phase> {
    SessionLayout::check_len(data)?;
    let stage = Stage::try_from(SessionLayout::STAGE.read_uint(data) as u8)?;
    Ok(Phase {
        stage,
        acc_stage_iter: SessionLayout::ACC_ITER.read_uint(data) as u8,
        acc_stage_sub_iter: SessionLayout::ACC_SUB_ITER.read_uint(data) as u16,
        pairing_stage_iter: SessionLayout::PAIRING_ITER.read_uint(data) as u8,
        pairing_stage_step: SessionLayout::PAIRING_STEP.read_uint(data) as u16,
    })
}

pub fn decode_session(data: &[u8]) -> RelayResult<SessionSnapshot> {
    let phase = decode_phase(data)?;
    let mut public_signals_le = [[0u8; FIELD_ELEMENT_LEN]; PUBLIC_SIGNALS];
    for (k, slot) in public_signals_le.iter_mut().enumerate() {
        slot.copy_from_slice(SessionLayout::public_signal(k).bytes(data));
    }
    Ok(SessionSnapshot {
        phase,
        public_signals_le,
    })
}

/// Progress oracle: `None` means the account does not exist yet.
pub fn linear_progress(account: Option<&[u8]>) -> RelayResult<u32> {
    match account {
        None => Ok(0),
        Some(data) => Ok(decode_phase(data)?.linear_progress()),
    }
}

/// Write a phase descriptor into account bytes (simulated ledgers, fixtures).
#[cfg(test)]
pub(crate) fn write_phase(data: &mut [u8], phase: &Phase) {
    let stage = match phase.stage {
        Stage::Accumulation => 0u8,
        Stage::Pairing => 1,
        Stage::Done => 2,
    };
    data[SessionLayout::STAGE.offset] = stage;
    data[SessionLayout::ACC_ITER.offset] = phase.acc_stage_iter;
    let o = SessionLayout::ACC_SUB_ITER.offset;
    data[o..o + 2].copy_from_slice(&phase.acc_stage_sub_iter.to_le_bytes());
    data[SessionLayout::PAIRING_ITER.offset] = phase.pairing_stage_iter;
    let o = SessionLayout::PAIRING_STEP.offset;
    data[o..o + 2].copy_from_slice(&phase.pairing_stage_step.to_le_bytes());
}
