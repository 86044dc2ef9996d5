//! The UTXO ledger: chain storage, UTXO index, pool and validator registry
//!
//! `Blockchain` is a plain single-owner state machine. Every mutating method
//! is all-or-nothing with respect to chain, UTXO index and pool; validation
//! failures return `false` and are logged with the violated rule. Sharing
//! and serialization of access is the job of [`crate::ledger::Ledger`].

use crate::block::{
    check_block_reward, connect_block, create_genesis_block, is_valid_new_block,
    update_unspent_tx_outs,
};
use crate::consensus::{ValidatorEntry, ValidatorRegistry};
use crate::constants::*;
use crate::economic::mining_stats;
use crate::error::Result;
use crate::events::{MiningStats, TransactionRecord, TxStatus};
use crate::mempool::TransactionPool;
use crate::reorganization::reorganize_chain;
use crate::transaction::{check_tx_inputs, validate_structure};
use crate::types::*;
use rand::Rng;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Blockchain {
    chain: Vec<Block>,
    unspent_tx_outs: UtxoSet,
    committed_ids: HashSet<Hash>,
    transaction_pool: TransactionPool,
    validators: ValidatorRegistry,
    block_reward: Natural,
}

impl Blockchain {
    /// Start a chain from a trusted genesis block
    pub fn new(genesis: Block, block_reward: Natural) -> Self {
        let mut unspent_tx_outs = UtxoSet::new();
        update_unspent_tx_outs(&genesis, &mut unspent_tx_outs);
        let committed_ids = genesis.transactions.iter().map(|tx| tx.id).collect();

        Self {
            chain: vec![genesis],
            unspent_tx_outs,
            committed_ids,
            transaction_pool: TransactionPool::new(),
            validators: ValidatorRegistry::new(),
            block_reward,
        }
    }

    /// Chain whose genesis funds `allocations`
    pub fn with_allocations(allocations: &[TxOut]) -> Self {
        Self::new(
            create_genesis_block(allocations, GENESIS_TIMESTAMP),
            BLOCK_REWARD,
        )
    }

    // ---------------------------------------------------------------------
    // Chain
    // ---------------------------------------------------------------------

    pub fn genesis(&self) -> &Block {
        &self.chain[0]
    }

    pub fn latest_block(&self) -> &Block {
        // The chain always holds at least the genesis block.
        &self.chain[self.chain.len() - 1]
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    /// Read-only export for peer gossip
    pub fn chain_snapshot(&self) -> Vec<Block> {
        self.chain.clone()
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn block_reward(&self) -> Natural {
        self.block_reward
    }

    /// Append `candidate` after relinking it onto the current tip.
    ///
    /// The candidate's previous hash and hash are recomputed against the tip,
    /// then index continuity, linkage, hash, reward and every transaction are
    /// validated. Returns `false` without mutating anything on failure.
    pub fn add_block(&mut self, mut candidate: Block) -> bool {
        let tip = self.latest_block();
        candidate.previous_hash = tip.hash;
        candidate.hash = candidate.calculate_hash();

        if let ValidationResult::Invalid(reason) = is_valid_new_block(&candidate, tip) {
            warn!(index = candidate.index, %reason, "block rejected");
            return false;
        }
        if let ValidationResult::Invalid(reason) = check_block_reward(&candidate, self.block_reward) {
            warn!(index = candidate.index, %reason, "block rejected");
            return false;
        }
        if let Some(tx) = candidate
            .transactions
            .iter()
            .find(|tx| self.committed_ids.contains(&tx.id))
        {
            warn!(index = candidate.index, tx = %hex::encode(tx.id), "block rejected: transaction already committed");
            return false;
        }

        let (result, next) = connect_block(&candidate, self.unspent_tx_outs.clone());
        if let ValidationResult::Invalid(reason) = result {
            warn!(index = candidate.index, %reason, "block rejected");
            return false;
        }

        info!(
            index = candidate.index,
            hash = %hex::encode(candidate.hash),
            validator = %candidate.validator,
            transactions = candidate.transactions.len(),
            "block appended"
        );
        self.unspent_tx_outs = next;
        self.committed_ids
            .extend(candidate.transactions.iter().map(|tx| tx.id));
        self.chain.push(candidate);
        true
    }

    /// Adopt `candidate` if it is valid in full and strictly longer.
    ///
    /// The UTXO index is rebuilt by replay; pooled transactions that are now
    /// committed or no longer valid are dropped. Rejection leaves state
    /// untouched.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> bool {
        let result = match reorganize_chain(&candidate, &self.chain, self.block_reward) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "received blockchain rejected");
                return false;
            }
        };

        info!(
            height = result.new_height,
            common_ancestor = result.common_ancestor,
            depth = result.reorganization_depth,
            "replacing current blockchain with received blockchain"
        );

        self.committed_ids = candidate
            .iter()
            .flat_map(|block| block.transactions.iter().map(|tx| tx.id))
            .collect();
        self.chain = candidate;
        self.unspent_tx_outs = result.new_utxo_set;
        self.revalidate_pool();
        true
    }

    /// Drop pooled transactions invalidated by a chain change
    pub fn revalidate_pool(&mut self) {
        let pending: Vec<Transaction> = self.transaction_pool.transactions().to_vec();
        self.transaction_pool.clear();
        for tx in pending {
            let id = hex::encode(tx.id);
            if !self.add_transaction(tx) {
                debug!(tx = %id, "dropped pooled transaction after chain change");
            }
        }
    }

    // ---------------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------------

    /// Economic validation against committed state.
    ///
    /// Rejects replays of committed ids, inputs that are not unspent, unsigned
    /// or wrongly signed inputs, and outputs exceeding inputs.
    pub fn is_valid_transaction(&self, tx: &Transaction) -> bool {
        if self.committed_ids.contains(&tx.id) {
            warn!(tx = %hex::encode(tx.id), "transaction rejected: already in the blockchain");
            return false;
        }

        let (result, _fee) = check_tx_inputs(tx, &self.unspent_tx_outs);
        if let ValidationResult::Invalid(reason) = result {
            warn!(tx = %hex::encode(tx.id), %reason, "transaction rejected");
            return false;
        }
        true
    }

    /// Structure, economic and pool-conflict checks, then admission.
    ///
    /// Transactions without inputs are refused.
    pub fn add_transaction(&mut self, tx: Transaction) -> bool {
        if let ValidationResult::Invalid(reason) = validate_structure(&tx) {
            warn!(%reason, "transaction rejected: invalid structure");
            return false;
        }
        // Coinbase value enters only through genesis or a block reward.
        if tx.is_coinbase() {
            warn!(tx = %hex::encode(tx.id), "transaction rejected: coinbase cannot be submitted");
            return false;
        }
        if !self.is_valid_transaction(&tx) {
            return false;
        }
        if self.transaction_pool.contains(&tx.id) {
            warn!(tx = %hex::encode(tx.id), "transaction rejected: already pending");
            return false;
        }
        if self.transaction_pool.has_conflicts(&tx) {
            warn!(tx = %hex::encode(tx.id), "transaction rejected: input already spent by a pending transaction");
            return false;
        }

        let id = tx.id;
        match self.transaction_pool.add_transaction(tx) {
            Ok(()) => {
                debug!(tx = %hex::encode(id), pool = self.transaction_pool.len(), "transaction pooled");
                true
            }
            Err(e) => {
                warn!(error = %e, "transaction rejected");
                false
            }
        }
    }

    pub fn transaction_pool(&self) -> &TransactionPool {
        &self.transaction_pool
    }

    pub fn get_transaction_pool(&self) -> &[Transaction] {
        self.transaction_pool.transactions()
    }

    /// Remove exactly `ids` from the pool
    pub fn remove_pooled(&mut self, ids: &[Hash]) {
        self.transaction_pool.remove_transactions(ids);
    }

    pub fn get_transaction_by_id(&self, id: &Hash) -> Option<&Transaction> {
        self.chain
            .iter()
            .flat_map(|block| block.transactions.iter())
            .find(|tx| &tx.id == id)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn get_balance(&self, address: &str) -> Natural {
        self.unspent_tx_outs
            .values()
            .filter(|utxo| utxo.address == address)
            .fold(0u64, |acc, utxo| acc.saturating_add(utxo.amount))
    }

    pub fn get_unspent_tx_outs(&self, address: &str) -> Vec<UnspentTxOut> {
        self.unspent_tx_outs
            .values()
            .filter(|utxo| utxo.address == address)
            .cloned()
            .collect()
    }

    pub fn unspent_tx_outs(&self) -> &UtxoSet {
        &self.unspent_tx_outs
    }

    /// Owner of the output an input spends, traced through chain then pool
    pub fn resolve_input_owner(&self, input: &TxIn) -> Option<Address> {
        if let Some(utxo) = self.unspent_tx_outs.get(&input.outpoint()) {
            return Some(utxo.address.clone());
        }
        self.get_transaction_by_id(&input.tx_out_id)
            .or_else(|| self.transaction_pool.find_transaction(&input.tx_out_id))
            .and_then(|tx| tx.tx_outs.get(input.tx_out_index as usize))
            .map(|output| output.address.clone())
    }

    /// Wallet view of `tx`
    pub fn transaction_record(&self, tx: &Transaction, status: TxStatus) -> TransactionRecord {
        let from_address = tx
            .tx_ins
            .first()
            .and_then(|input| self.resolve_input_owner(input));

        let to_address = tx
            .tx_outs
            .iter()
            .find(|o| Some(&o.address) != from_address.as_ref())
            .or_else(|| tx.tx_outs.first())
            .map(|o| o.address.clone())
            .unwrap_or_default();

        let amount = tx
            .tx_outs
            .iter()
            .filter(|o| o.address == to_address)
            .fold(0u64, |acc, o| acc.saturating_add(o.amount));

        TransactionRecord {
            status,
            id: tx.id,
            from_address,
            to_address,
            amount,
            timestamp: tx.timestamp,
        }
    }

    fn involves(&self, tx: &Transaction, address: &str) -> bool {
        tx.tx_outs.iter().any(|o| o.address == address)
            || tx
                .tx_ins
                .iter()
                .any(|input| self.resolve_input_owner(input).as_deref() == Some(address))
    }

    /// Pending transactions first, then confirmed ones in chain order
    pub fn get_transaction_history(&self, address: &str) -> Vec<TransactionRecord> {
        let pending = self
            .transaction_pool
            .transactions()
            .iter()
            .filter(|tx| self.involves(tx, address))
            .map(|tx| self.transaction_record(tx, TxStatus::Pending));

        let confirmed = self
            .chain
            .iter()
            .flat_map(|block| block.transactions.iter())
            .filter(|tx| self.involves(tx, address))
            .map(|tx| self.transaction_record(tx, TxStatus::Confirmed));

        pending.chain(confirmed).collect()
    }

    pub fn transaction_pool_records(&self) -> Vec<TransactionRecord> {
        self.transaction_pool
            .transactions()
            .iter()
            .map(|tx| self.transaction_record(tx, TxStatus::Pending))
            .collect()
    }

    /// Every address paid by or spending in `transactions`
    pub fn touched_addresses(&self, transactions: &[Transaction]) -> BTreeSet<Address> {
        let mut addresses = BTreeSet::new();
        for tx in transactions {
            addresses.extend(tx.tx_outs.iter().map(|o| o.address.clone()));
            addresses.extend(tx.tx_ins.iter().filter_map(|i| self.resolve_input_owner(i)));
        }
        addresses
    }

    // ---------------------------------------------------------------------
    // Validators
    // ---------------------------------------------------------------------

    pub fn register_validator(&mut self, address: impl Into<Address>, stake: Natural) {
        let address = address.into();
        debug!(validator = %address, stake, "validator registered");
        self.validators.register_validator(address, stake);
    }

    pub fn select_validator<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Address> {
        self.validators.select_validator(rng)
    }

    pub fn validators(&self) -> &[ValidatorEntry] {
        self.validators.entries()
    }

    pub fn mining_stats(&self, validator: &str) -> MiningStats {
        mining_stats(&self.chain, validator, self.block_reward)
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::with_allocations(&[])
    }
}
