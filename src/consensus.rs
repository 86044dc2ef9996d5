//! Validator registry and stake-weighted selection

use crate::error::{LedgerError, Result};
use crate::types::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A registered validator and its stake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorEntry {
    pub address: Address,
    pub stake: Natural,
}

/// Insertion-ordered stake registry keyed by validator address.
///
/// Iteration order is stable, so a seeded RNG reproduces the same draws.
#[derive(Debug, Clone, Default)]
pub struct ValidatorRegistry {
    entries: Vec<ValidatorEntry>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert `address` with `stake`. A zero stake keeps a zero-weight entry.
    pub fn register_validator(&mut self, address: impl Into<Address>, stake: Natural) {
        let address = address.into();
        match self.entries.iter_mut().find(|e| e.address == address) {
            Some(entry) => entry.stake = stake,
            None => self.entries.push(ValidatorEntry { address, stake }),
        }
    }

    pub fn stake_of(&self, address: &str) -> Option<Natural> {
        self.entries
            .iter()
            .find(|e| e.address == address)
            .map(|e| e.stake)
    }

    /// Σ stake, saturating
    pub fn total_stake(&self) -> Natural {
        self.entries
            .iter()
            .fold(0u64, |acc, e| acc.saturating_add(e.stake))
    }

    pub fn entries(&self) -> &[ValidatorEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// SelectValidator: 𝒱 → 𝔸
    ///
    /// 1. total = Σ stake; total = 0 ⇒ NoValidators
    /// 2. r ← uniform [0, total)
    /// 3. walk entries accumulating stake, return the first whose running
    ///    sum exceeds r
    pub fn select_validator<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Address> {
        let total = self.total_stake();
        if total == 0 {
            return Err(LedgerError::NoValidators);
        }

        let r = rng.gen_range(0..total);
        let mut cumulative = 0u64;
        for entry in &self.entries {
            cumulative = cumulative.saturating_add(entry.stake);
            if cumulative > r {
                debug!(validator = %entry.address, stake = entry.stake, "validator selected");
                return Ok(entry.address.clone());
            }
        }

        Err(LedgerError::NoValidators)
    }
}

/// Coinbase paying `amount` to `validator`
pub fn create_reward_transaction(validator: &str, amount: Natural, timestamp: Natural) -> Transaction {
    Transaction::new(Vec::new(), vec![TxOut::new(validator, amount)], timestamp)
}
