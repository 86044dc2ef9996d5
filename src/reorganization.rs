//! Chain replacement: full-chain validation and the fork-choice rule

use crate::block::{check_block_reward, check_unique_ids, connect_block, is_valid_new_block};
use crate::error::{LedgerError, Result};
use crate::types::*;
use std::collections::HashSet;

/// IsNewChainValid: 𝒞 × ℬ → {valid, invalid}
///
/// For candidate chain c and our genesis g:
/// 1. c[0] = g
/// 2. ∀i > 0: IsValidNewBlock(c[i], c[i-1])
/// 3. every block mints at most `reward`
/// 4. no transaction id appears twice anywhere in c
/// 5. every block connects on the UTXO set replayed so far
///
/// Returns the replayed UTXO set when valid.
pub fn is_new_chain_valid(
    candidate: &[Block],
    genesis: &Block,
    reward: Natural,
) -> (ValidationResult, Option<UtxoSet>) {
    let Some(first) = candidate.first() else {
        return (ValidationResult::Invalid("Empty chain".to_string()), None);
    };
    if first != genesis {
        return (ValidationResult::Invalid("Genesis block mismatch".to_string()), None);
    }

    let (result, mut utxo_set) = connect_block(first, UtxoSet::new());
    if let ValidationResult::Invalid(reason) = result {
        return (ValidationResult::Invalid(format!("Genesis: {}", reason)), None);
    }
    let mut seen: HashSet<Hash> = first.transactions.iter().map(|tx| tx.id).collect();

    for pair in candidate.windows(2) {
        let (previous, block) = (&pair[0], &pair[1]);

        if let ValidationResult::Invalid(reason) = is_valid_new_block(block, previous) {
            return (
                ValidationResult::Invalid(format!("Block {}: {}", block.index, reason)),
                None,
            );
        }
        if let ValidationResult::Invalid(reason) = check_block_reward(block, reward) {
            return (
                ValidationResult::Invalid(format!("Block {}: {}", block.index, reason)),
                None,
            );
        }
        if let ValidationResult::Invalid(reason) = check_unique_ids(block, &mut seen) {
            return (
                ValidationResult::Invalid(format!("Block {}: {}", block.index, reason)),
                None,
            );
        }

        let (result, next) = connect_block(block, utxo_set);
        if let ValidationResult::Invalid(reason) = result {
            return (
                ValidationResult::Invalid(format!("Block {}: {}", block.index, reason)),
                None,
            );
        }
        utxo_set = next;
    }

    (ValidationResult::Valid, Some(utxo_set))
}

/// Fork choice: strictly longer wins
pub fn should_reorganize(new_chain: &[Block], current_chain: &[Block]) -> bool {
    new_chain.len() > current_chain.len()
}

/// Index of the last block shared by both chains, by hash
pub fn find_common_ancestor(new_chain: &[Block], current_chain: &[Block]) -> Option<usize> {
    new_chain
        .iter()
        .zip(current_chain.iter())
        .take_while(|(a, b)| a.hash == b.hash)
        .count()
        .checked_sub(1)
}

/// Result of chain reorganization
#[derive(Debug, Clone)]
pub struct ReorganizationResult {
    pub new_utxo_set: UtxoSet,
    pub new_height: Natural,
    pub common_ancestor: Natural,
    pub reorganization_depth: usize,
}

/// Reorganization: adopt `new_chain` over `current_chain`
///
/// 1. The candidate must win the fork choice and be valid in full
/// 2. The UTXO set is rebuilt by replaying the candidate from genesis
/// 3. The depth is the number of current blocks past the common ancestor
pub fn reorganize_chain(
    new_chain: &[Block],
    current_chain: &[Block],
    reward: Natural,
) -> Result<ReorganizationResult> {
    let genesis = current_chain
        .first()
        .ok_or_else(|| LedgerError::InvalidBlock("Current chain is empty".to_string()))?;

    if !should_reorganize(new_chain, current_chain) {
        return Err(LedgerError::InvalidBlock(format!(
            "Received chain is not longer: {} <= {}",
            new_chain.len(),
            current_chain.len()
        )));
    }

    let (result, utxo_set) = is_new_chain_valid(new_chain, genesis, reward);
    let new_utxo_set = match (result, utxo_set) {
        (ValidationResult::Valid, Some(utxo_set)) => utxo_set,
        (ValidationResult::Invalid(reason), _) => return Err(LedgerError::InvalidBlock(reason)),
        (ValidationResult::Valid, None) => {
            return Err(LedgerError::InvalidBlock("Replay produced no UTXO set".to_string()))
        }
    };

    let common = find_common_ancestor(new_chain, current_chain).unwrap_or(0);

    Ok(ReorganizationResult {
        new_utxo_set,
        new_height: (new_chain.len() - 1) as Natural,
        common_ancestor: common as Natural,
        reorganization_depth: current_chain.len() - (common + 1),
    })
}
