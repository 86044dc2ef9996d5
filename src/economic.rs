//! Derived economic queries over a chain

use crate::block::apply_transaction;
use crate::events::MiningStats;
use crate::transaction::total_output_amount;
use crate::types::*;

/// MiningStats: 𝒞 × 𝔸 → ℕ × ℕ
///
/// Blocks produced by `validator`, and the rewards they earned at the
/// protocol-wide `reward`.
pub fn mining_stats(chain: &[Block], validator: &str, reward: Natural) -> MiningStats {
    let mined_blocks = chain
        .iter()
        .filter(|block| block.validator == validator)
        .count() as Natural;
    MiningStats {
        mined_blocks,
        rewards: mined_blocks.saturating_mul(reward),
    }
}

/// Supply accounting for a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SupplyReport {
    /// Value minted by coinbase transactions (genesis and rewards)
    pub issued: Natural,
    /// Input value not claimed by any output
    pub unclaimed: Natural,
    /// Σ of all unspent outputs
    pub circulating: Natural,
}

impl SupplyReport {
    /// circulating = issued − unclaimed
    pub fn is_conserved(&self) -> bool {
        self.issued.checked_sub(self.unclaimed) == Some(self.circulating)
    }
}

/// Replay `chain` and account for every unit of value.
///
/// Assumes the chain is already valid.
pub fn supply_report(chain: &[Block]) -> SupplyReport {
    let mut utxo_set = UtxoSet::new();
    let mut report = SupplyReport::default();

    for tx in chain.iter().flat_map(|block| block.transactions.iter()) {
        let outputs = total_output_amount(tx).unwrap_or(Natural::MAX);
        if tx.is_coinbase() {
            report.issued = report.issued.saturating_add(outputs);
        } else {
            let inputs = tx
                .tx_ins
                .iter()
                .filter_map(|input| utxo_set.get(&input.outpoint()))
                .fold(0u64, |acc, utxo| acc.saturating_add(utxo.amount));
            report.unclaimed = report
                .unclaimed
                .saturating_add(inputs.saturating_sub(outputs));
        }
        apply_transaction(tx, &mut utxo_set);
    }

    report.circulating = total_balance(&utxo_set);
    report
}

/// Σ amount over a UTXO set
pub fn total_balance(utxo_set: &UtxoSet) -> Natural {
    utxo_set
        .values()
        .fold(0u64, |acc, utxo| acc.saturating_add(utxo.amount))
}
