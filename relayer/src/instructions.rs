//! Instruction builders for the verifier program.
//!
//! Instruction data follows the Anchor ABI: discriminator, then borsh args.

use crate::codec::{EncodedProof, FieldBytes, Limbs};
use crate::constants::{MERKLE_STATE_SEED, PROOF_POINTS, PUBLIC_SIGNALS};
use borsh::BorshSerialize;
use sha2::{Digest, Sha256};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
#[allow(deprecated)]
use solana_sdk::system_program;

pub fn anchor_discriminator(ix_name: &str) -> [u8; 8] {
    // sha256("global:<ix_name>")[..8]
    let mut h = Sha256::new();
    h.update(format!("global:{ix_name}").as_bytes());
    let out = h.finalize();
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&out[..8]);
    disc
}

pub fn merkle_state_pda(program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[MERKLE_STATE_SEED], program_id)
}

/// Double-spend guard PDA, seeded by the raw nullifier-hash bytes.
pub fn nullifier_hash_pda(program_id: &Pubkey, nullifier_hash: &FieldBytes) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[nullifier_hash.as_ref()], program_id)
}

#[derive(BorshSerialize)]
struct WithdrawInitArgs {
    merkle_bump: u8,
    proof: [Limbs; PROOF_POINTS],
    signals: [Limbs; PUBLIC_SIGNALS],
}

#[derive(BorshSerialize)]
struct WithdrawAdvanceArgs {
    group_index: u16,
}

#[derive(BorshSerialize)]
struct WithdrawFinalizeArgs {
    merkle_bump: u8,
    nullifier_bump: u8,
    nullifier_hash: FieldBytes,
}

fn ix_data<T: BorshSerialize>(name: &str, args: &T) -> Vec<u8> {
    let mut data = anchor_discriminator(name).to_vec();
    args.serialize(&mut data).expect("borsh into Vec");
    data
}

/// `withdraw_init(merkle_bump, proof, signal0..signal5)`
pub fn withdraw_init(
    program_id: &Pubkey,
    session: &Pubkey,
    payer: &Pubkey,
    encoded: &EncodedProof,
) -> Instruction {
    let (merkle_state, merkle_bump) = merkle_state_pda(program_id);
    let args = WithdrawInitArgs {
        merkle_bump,
        proof: encoded.points,
        signals: encoded.public_signals,
    };
    Instruction {
        program_id: *program_id,
        // Must match the on-chain `WithdrawInit<'info>` account order.
        accounts: vec![
            AccountMeta::new(*session, true),
            AccountMeta::new_readonly(merkle_state, false),
            AccountMeta::new(*payer, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: ix_data("withdraw_init", &args),
    }
}

/// `withdraw_advance(group_index)`
pub fn withdraw_advance(program_id: &Pubkey, session: &Pubkey, group_index: u16) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![AccountMeta::new(*session, false)],
        data: ix_data("withdraw_advance", &WithdrawAdvanceArgs { group_index }),
    }
}

/// `withdraw_finalize(merkle_bump, nullifier_bump, nullifier_hash)`
pub fn withdraw_finalize(
    program_id: &Pubkey,
    session: &Pubkey,
    nullifier_pda: &Pubkey,
    nullifier_bump: u8,
    nullifier_hash: &FieldBytes,
    recipient: &Pubkey,
    relayer: &Pubkey,
) -> Instruction {
    let (merkle_state, merkle_bump) = merkle_state_pda(program_id);
    let args = WithdrawFinalizeArgs {
        merkle_bump,
        nullifier_bump,
        nullifier_hash: *nullifier_hash,
    };
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(merkle_state, false),
            AccountMeta::new(*session, false),
            AccountMeta::new(*nullifier_pda, false),
            AccountMeta::new(*recipient, false),
            AccountMeta::new(*relayer, true), // relayer (fee recipient)
            AccountMeta::new(*relayer, true), // user (fee payer)
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: ix_data("withdraw_finalize", &args),
    }
}

/// Decoded instruction kinds, keyed by discriminator.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IxKind {
    Init,
    Advance { group_index: u16 },
    Finalize,
}

#[cfg(test)]
pub(crate) fn classify(data: &[u8]) -> Option<IxKind> {
    if data.len() < 8 {
        return None;
    }
    let disc = &data[..8];
    if disc == anchor_discriminator("withdraw_init") {
        Some(IxKind::Init)
    } else if disc == anchor_discriminator("withdraw_advance") && data.len() == 10 {
        Some(IxKind::Advance {
            group_index: u16::from_le_bytes([data[8], data[9]]),
        })
    } else if disc == anchor_discriminator("withdraw_finalize") {
        Some(IxKind::Finalize)
    } else {
        None
    }
}
