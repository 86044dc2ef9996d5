//! Ledger protocol constants

use std::time::Duration;

/// Reward paid to the validator of every block
pub const BLOCK_REWARD: u64 = 50;

/// Wait between signing a candidate block and committing it
pub const SETTLEMENT_DELAY: Duration = Duration::from_millis(2_000);

/// Genesis block timestamp; fixed so every node derives the same genesis
pub const GENESIS_TIMESTAMP: u64 = 0;

/// Validator recorded on the genesis block
pub const GENESIS_VALIDATOR: &str = "genesis-validator";

/// Previous hash of the genesis block
pub const GENESIS_PREVIOUS_HASH: [u8; 32] = [0u8; 32];

/// Maximum number of inputs per transaction
pub const MAX_INPUTS: usize = 1000;

/// Maximum number of outputs per transaction
pub const MAX_OUTPUTS: usize = 1000;

/// Length of a compressed secp256k1 public key
pub const PUBLIC_KEY_SIZE: usize = 33;

/// Length of a compact ECDSA signature
pub const SIGNATURE_SIZE: usize = 64;
