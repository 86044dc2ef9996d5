//! Shared ledger handle
//!
//! One [`Blockchain`] per process, owned behind a tokio `RwLock`. Every
//! mutation holds the write lock for its whole read-modify-write; readers
//! share the read lock and always observe a fully applied state. Events are
//! built while the lock is held and emitted after it is released.

use crate::blockchain::Blockchain;
use crate::events::{EventSink, LedgerEvent, MiningStats, NullSink, TransactionRecord};
use crate::types::*;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone)]
pub struct Ledger {
    inner: Arc<RwLock<Blockchain>>,
    sink: Arc<dyn EventSink>,
}

impl Ledger {
    /// Ledger whose events go nowhere
    pub fn new(blockchain: Blockchain) -> Self {
        Self::with_sink(blockchain, Arc::new(NullSink))
    }

    pub fn with_sink(blockchain: Blockchain, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(blockchain)),
            sink,
        }
    }

    /// Shared read access
    pub async fn read(&self) -> RwLockReadGuard<'_, Blockchain> {
        self.inner.read().await
    }

    /// Exclusive access for a whole mutation
    pub async fn write(&self) -> RwLockWriteGuard<'_, Blockchain> {
        self.inner.write().await
    }

    pub fn emit(&self, events: &[LedgerEvent]) {
        for event in events {
            self.sink.emit(event);
        }
    }

    /// Events describing a freshly committed `block`
    pub fn block_committed_events(chain: &Blockchain, block: &Block) -> Vec<LedgerEvent> {
        let addresses = chain.touched_addresses(&block.transactions);
        let mut events = vec![LedgerEvent::NewBlock(block.clone())];
        events.extend(balance_and_history_events(chain, &addresses));
        events.push(LedgerEvent::TransactionPoolUpdate(chain.transaction_pool_records()));
        events.push(LedgerEvent::MiningStats {
            validator: block.validator.clone(),
            stats: chain.mining_stats(&block.validator),
        });
        events
    }

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------

    pub async fn add_transaction(&self, tx: Transaction) -> bool {
        let events = {
            let mut chain = self.write().await;
            let addresses = chain.touched_addresses(std::slice::from_ref(&tx));
            if !chain.add_transaction(tx) {
                return false;
            }
            let mut events = vec![LedgerEvent::TransactionPoolUpdate(chain.transaction_pool_records())];
            events.extend(addresses.iter().map(|address| LedgerEvent::TransactionHistoryUpdate {
                address: address.clone(),
                history: chain.get_transaction_history(address),
            }));
            events
        };
        self.emit(&events);
        true
    }

    /// Peer entry point: append one block.
    ///
    /// Pooled transactions the block committed or invalidated are dropped.
    pub async fn add_block(&self, block: Block) -> bool {
        let events = {
            let mut chain = self.write().await;
            if !chain.add_block(block) {
                return false;
            }
            chain.revalidate_pool();
            let committed = chain.latest_block().clone();
            Self::block_committed_events(&chain, &committed)
        };
        self.emit(&events);
        true
    }

    /// Peer entry point: adopt a longer valid chain
    pub async fn replace_chain(&self, candidate: Vec<Block>) -> bool {
        let events = {
            let mut chain = self.write().await;
            let previous = chain.chain_snapshot();
            if !chain.replace_chain(candidate) {
                return false;
            }

            let old_hashes: HashSet<Hash> = previous.iter().map(|b| b.hash).collect();
            let new_hashes: HashSet<Hash> = chain.chain().iter().map(|b| b.hash).collect();
            let changed: Vec<Transaction> = chain
                .chain()
                .iter()
                .filter(|b| !old_hashes.contains(&b.hash))
                .chain(previous.iter().filter(|b| !new_hashes.contains(&b.hash)))
                .flat_map(|b| b.transactions.iter().cloned())
                .collect();
            let addresses = chain.touched_addresses(&changed);

            let mut events = vec![LedgerEvent::NewBlock(chain.latest_block().clone())];
            events.extend(balance_and_history_events(&chain, &addresses));
            events.push(LedgerEvent::TransactionPoolUpdate(chain.transaction_pool_records()));
            events
        };
        self.emit(&events);
        true
    }

    pub async fn register_validator(&self, address: impl Into<Address>, stake: Natural) {
        self.write().await.register_validator(address, stake);
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    pub async fn get_balance(&self, address: &str) -> Natural {
        self.read().await.get_balance(address)
    }

    pub async fn get_unspent_tx_outs(&self, address: &str) -> Vec<UnspentTxOut> {
        self.read().await.get_unspent_tx_outs(address)
    }

    pub async fn get_transaction_by_id(&self, id: &Hash) -> Option<Transaction> {
        self.read().await.get_transaction_by_id(id).cloned()
    }

    pub async fn get_transaction_history(&self, address: &str) -> Vec<TransactionRecord> {
        self.read().await.get_transaction_history(address)
    }

    pub async fn get_transaction_pool(&self) -> Vec<Transaction> {
        self.read().await.get_transaction_pool().to_vec()
    }

    pub async fn chain_snapshot(&self) -> Vec<Block> {
        self.read().await.chain_snapshot()
    }

    pub async fn latest_block(&self) -> Block {
        self.read().await.latest_block().clone()
    }

    pub async fn len(&self) -> usize {
        self.read().await.len()
    }

    pub async fn mining_stats(&self, validator: &str) -> MiningStats {
        self.read().await.mining_stats(validator)
    }
}

fn balance_and_history_events(chain: &Blockchain, addresses: &BTreeSet<Address>) -> Vec<LedgerEvent> {
    let mut events = Vec::with_capacity(addresses.len() * 2);
    for address in addresses {
        events.push(LedgerEvent::BalanceUpdate {
            address: address.clone(),
            balance: chain.get_balance(address),
        });
    }
    for address in addresses {
        events.push(LedgerEvent::TransactionHistoryUpdate {
            address: address.clone(),
            history: chain.get_transaction_history(address),
        });
    }
    events
}
