//! Block hashing, linkage validation and the UTXO fold

use crate::constants::*;
use crate::crypto::{sha256_hash, verify_hash};
use crate::transaction::{check_tx_inputs, serialize_transaction, total_output_amount, validate_structure};
use crate::types::*;
use std::collections::HashSet;
use tracing::warn;

/// BlockHash: SHA-256(index ‖ previous_hash ‖ timestamp ‖ txs ‖ validator)
///
/// The signature is not covered; it is computed over this hash.
pub fn calculate_block_hash(block: &Block) -> Hash {
    let mut data = Vec::new();
    data.extend_from_slice(&block.index.to_le_bytes());
    data.extend_from_slice(&block.previous_hash);
    data.extend_from_slice(&block.timestamp.to_le_bytes());
    data.extend_from_slice(&(block.transactions.len() as u64).to_le_bytes());
    for tx in &block.transactions {
        serialize_transaction(tx, &mut data);
    }
    data.extend_from_slice(block.validator.as_bytes());
    sha256_hash(&data)
}

/// Genesis block funding `allocations` in a single coinbase transaction.
///
/// Deterministic for a given allocation list and timestamp, so every node
/// configured alike derives the identical block.
pub fn create_genesis_block(allocations: &[TxOut], timestamp: Natural) -> Block {
    let transactions = if allocations.is_empty() {
        Vec::new()
    } else {
        vec![Transaction::new(Vec::new(), allocations.to_vec(), timestamp)]
    };
    Block::new(
        0,
        GENESIS_PREVIOUS_HASH,
        timestamp,
        transactions,
        GENESIS_VALIDATOR,
    )
}

/// IsValidNewBlock: ℬ × ℬ → {valid, invalid}
///
/// 1. new.index = prev.index + 1
/// 2. new.previous_hash = prev.hash
/// 3. new.hash = BlockHash(new)
pub fn is_valid_new_block(new_block: &Block, previous_block: &Block) -> ValidationResult {
    if previous_block.index + 1 != new_block.index {
        return ValidationResult::Invalid(format!(
            "Invalid index: expected {}, got {}",
            previous_block.index + 1,
            new_block.index
        ));
    }
    if previous_block.hash != new_block.previous_hash {
        return ValidationResult::Invalid("Invalid previous hash".to_string());
    }
    if !new_block.has_valid_hash() {
        return ValidationResult::Invalid(format!(
            "Invalid hash: {} != {}",
            hex::encode(new_block.calculate_hash()),
            hex::encode(new_block.hash)
        ));
    }
    ValidationResult::Valid
}

/// Check the validator's signature over the block hash
pub fn verify_block_signature(block: &Block) -> bool {
    verify_hash(&block.hash, &block.signature, &block.validator)
}

/// Coinbase issuance of a non-genesis block must not exceed `reward`
pub fn check_block_reward(block: &Block, reward: Natural) -> ValidationResult {
    let minted = block
        .transactions
        .iter()
        .filter(|tx| tx.is_coinbase())
        .try_fold(0u64, |acc, tx| total_output_amount(tx).and_then(|v| acc.checked_add(v)));
    match minted {
        Some(minted) if minted <= reward => ValidationResult::Valid,
        Some(minted) => ValidationResult::Invalid(format!(
            "Block mints {} but the reward is {}",
            minted, reward
        )),
        None => ValidationResult::Invalid("Coinbase value overflow".to_string()),
    }
}

/// Record the ids of `block` in `seen`, failing on the first repeat.
///
/// A repeated id would overwrite its own outputs in the UTXO index.
pub fn check_unique_ids(block: &Block, seen: &mut HashSet<Hash>) -> ValidationResult {
    for tx in &block.transactions {
        if !seen.insert(tx.id) {
            return ValidationResult::Invalid(format!(
                "Duplicate transaction id {}",
                hex::encode(tx.id)
            ));
        }
    }
    ValidationResult::Valid
}

/// ApplyTransaction: 𝒯𝒳 × 𝒰𝒮 → 𝒰𝒮
///
/// us' = (us \ {i : i ∈ tx.ins}) ∪ {(tx.id, k) ↦ tx.outs[k]}
pub fn apply_transaction(tx: &Transaction, utxo_set: &mut UtxoSet) {
    for input in &tx.tx_ins {
        utxo_set.remove(&input.outpoint());
    }

    for (index, output) in tx.tx_outs.iter().enumerate() {
        let utxo = UnspentTxOut {
            tx_out_id: tx.id,
            tx_out_index: index as u32,
            address: output.address.clone(),
            amount: output.amount,
        };
        utxo_set.insert(utxo.outpoint(), utxo);
    }
}

/// Fold every transaction of `block` into the UTXO index.
///
/// No validation happens here; callers validate first with [`connect_block`].
pub fn update_unspent_tx_outs(block: &Block, utxo_set: &mut UtxoSet) {
    for tx in &block.transactions {
        apply_transaction(tx, utxo_set);
    }
}

/// ConnectBlock: ℬ × 𝒰𝒮 → {valid, invalid} × 𝒰𝒮
///
/// For block b with UTXO set us:
/// 1. Transaction ids within b are distinct
/// 2. Every transaction is structurally valid
/// 3. Every non-coinbase transaction spends outputs unspent at its position
///    in the block, with valid signatures and sufficient value
/// 4. Apply each transaction in order
///
/// On failure the input set is returned unchanged.
pub fn connect_block(block: &Block, utxo_set: UtxoSet) -> (ValidationResult, UtxoSet) {
    if let ValidationResult::Invalid(reason) = check_unique_ids(block, &mut HashSet::new()) {
        return (ValidationResult::Invalid(reason), utxo_set);
    }

    let mut working = utxo_set.clone();

    for (i, tx) in block.transactions.iter().enumerate() {
        if let ValidationResult::Invalid(reason) = validate_structure(tx) {
            return (
                ValidationResult::Invalid(format!("Invalid transaction at index {}: {}", i, reason)),
                utxo_set,
            );
        }

        let (inputs_valid, _fee) = check_tx_inputs(tx, &working);
        if let ValidationResult::Invalid(reason) = inputs_valid {
            return (
                ValidationResult::Invalid(format!(
                    "Invalid transaction inputs at index {}: {}",
                    i, reason
                )),
                utxo_set,
            );
        }

        apply_transaction(tx, &mut working);
    }

    (ValidationResult::Valid, working)
}

/// Replay `chain` from genesis into a fresh UTXO set.
///
/// Returns `None` if any block fails to connect.
pub fn replay_chain(chain: &[Block]) -> Option<UtxoSet> {
    let mut utxo_set = UtxoSet::new();
    for block in chain {
        let (result, next) = connect_block(block, utxo_set);
        if let ValidationResult::Invalid(reason) = result {
            warn!(index = block.index, %reason, "block failed to replay");
            return None;
        }
        utxo_set = next;
    }
    Some(utxo_set)
}
