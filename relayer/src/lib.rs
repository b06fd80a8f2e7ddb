//! Off-chain relayer for incremental shielded withdrawals.
//!
//! The verifier program checks a Groth16 proof across ~20k small
//! instructions. This crate re-encodes the prover's output, opens a
//! verification session, drives it to completion over an unreliable
//! transport and settles the withdrawal.

pub mod codec;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod handlers;
pub mod instructions;
pub mod journal;
pub mod ledger;
pub mod metrics;
pub mod rate_limit;
pub mod router;
pub mod session;
pub mod state;
pub mod types;
pub mod utils;
pub mod validation;
pub mod withdraw;

#[cfg(test)]
mod sim;
