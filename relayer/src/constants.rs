// Centralized constants (kept out of `main.rs`).

// ---------------------------------------------------------------------
// Program addressing
// ---------------------------------------------------------------------
pub const DEFAULT_PROGRAM_ID: &str = "otterXYtgZ5DRUGX6JGtcZPg3GoWxEqcLrb9MjeCv3X";
pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";

/// Seed of the global MerkleState PDA.
pub const MERKLE_STATE_SEED: &[u8] = b"merkle";

// ---------------------------------------------------------------------
// Incremental verifier parameters
// ---------------------------------------------------------------------
/// Rounds of the vk_x accumulation folded into one advance instruction.
pub const ROUNDS_PER_IX_VKX: u32 = 1;

/// Accumulation stage: 6 public inputs, each 256 rounds plus one setup step.
pub const ACC_ITERS: u32 = 6;
pub const ACC_STEPS_PER_ITER: u32 = 256_u32.div_ceil(ROUNDS_PER_IX_VKX) + 1;

/// Pairing stage: 4 iterations of the Miller loop + final exponentiation schedule.
pub const PAIRING_ITERS: u32 = 4;
pub const PAIRING_STEPS_PER_ITER: u32 =
    11 + 65 * 11 + 25 + 256 * 5 + 9 + 256 * 5 + 2 + 256 * 5 + 34;

/// Total number of `withdraw_advance` instructions a session needs.
pub const NUM_ADVANCES_WITHDRAW: u32 =
    ACC_ITERS * ACC_STEPS_PER_ITER + PAIRING_ITERS * PAIRING_STEPS_PER_ITER;

/// Advance instructions packed into one transaction.
pub const IXS_PER_TX_WITHDRAW: u32 = 55;

// ---------------------------------------------------------------------
// Linear progress
// ---------------------------------------------------------------------
pub const PROGRESS_ACC_WEIGHT: u32 = 257;
pub const PROGRESS_PAIRING_WEIGHT: u32 = 4635;
pub const PROGRESS_PAIRING_BASE: u32 = PROGRESS_ACC_WEIGHT * ACC_ITERS;
/// Linear progress of a session whose stage is DONE.
pub const MAX_LINEAR_PROGRESS: u32 = PROGRESS_PAIRING_BASE + 4636 * PAIRING_ITERS;

// ---------------------------------------------------------------------
// Session account layout (Anchor v0.24.2 `WithdrawState`)
// ---------------------------------------------------------------------
pub const SESSION_ACCOUNT_LEN: usize = 6536;
pub const ANCHOR_DISCRIMINATOR_LEN: usize = 8;
pub const PROOF_POINTS: usize = 8;
pub const PUBLIC_SIGNALS: usize = 6;
pub const LIMBS: usize = 4;
pub const FIELD_ELEMENT_LEN: usize = 32;

/// Public-signal slot meanings fixed by the circuit. Slot 0 is the Merkle
/// root, checked on-chain only.
pub const SIGNAL_NULLIFIER_HASH: usize = 1;
pub const SIGNAL_RECIPIENT: usize = 2;
pub const SIGNAL_FEE: usize = 3;
pub const SIGNAL_RELAYER: usize = 4;
pub const SIGNAL_REFUND: usize = 5;

// ---------------------------------------------------------------------
// Runtime defaults
// ---------------------------------------------------------------------
pub const DEFAULT_API_BIND: &str = "0.0.0.0:3000";
pub const DEFAULT_RELAYER_FEE_LAMPORTS: u64 = 10_000_000; // 0.01 SOL
pub const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 2;

/// Bounded per-session status log.
pub const MAX_SESSION_EVENTS: usize = 500;
/// Finished session records stay queryable this long.
pub const DEFAULT_SESSION_RECORD_TTL_SECS: u64 = 3_600;

// Input validation limits (spam protection)
pub const MAX_PROOF_HEX_LEN: usize = 2 + 2 * FIELD_ELEMENT_LEN * PROOF_POINTS;
pub const MAX_SIGNAL_HEX_LEN: usize = 2 + 2 * FIELD_ELEMENT_LEN;
