//! Pending-transaction pool
//!
//! Admission here is structure-only; funding and double-spend checks against
//! the committed UTXO set are layered on top by the ledger.

use crate::error::{LedgerError, Result};
use crate::transaction::validate_structure;
use crate::types::*;
use std::collections::HashSet;

/// Ordered collection of pending transactions
#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    transactions: Vec<Transaction>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `tx` if it is structurally valid
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<()> {
        if let ValidationResult::Invalid(reason) = validate_structure(&tx) {
            return Err(LedgerError::InvalidTransaction(reason));
        }
        self.transactions.push(tx);
        Ok(())
    }

    pub fn remove_transaction(&mut self, id: &Hash) {
        self.transactions.retain(|tx| &tx.id != id);
    }

    /// Remove exactly the transactions whose ids are listed
    pub fn remove_transactions(&mut self, ids: &[Hash]) {
        let ids: HashSet<&Hash> = ids.iter().collect();
        self.transactions.retain(|tx| !ids.contains(&tx.id));
    }

    pub fn find_transaction(&self, id: &Hash) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| &tx.id == id)
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.find_transaction(id).is_some()
    }

    /// Whether some pending transaction already spends `outpoint`
    pub fn spends(&self, outpoint: &OutPoint) -> bool {
        self.transactions
            .iter()
            .flat_map(|tx| tx.tx_ins.iter())
            .any(|input| input.tx_out_id == outpoint.tx_out_id && input.tx_out_index == outpoint.tx_out_index)
    }

    /// Whether `tx` spends an output already claimed by a pending transaction
    pub fn has_conflicts(&self, tx: &Transaction) -> bool {
        tx.tx_ins.iter().any(|input| self.spends(&input.outpoint()))
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
