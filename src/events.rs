//! Notification boundary between the ledger and external broadcasters

use crate::types::*;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tokio::sync::broadcast;

/// Status of a transaction as seen by a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
}

/// History/pool projection of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub status: TxStatus,
    #[serde(with = "hex")]
    pub id: Hash,
    /// `None` for coinbase transactions
    pub from_address: Option<Address>,
    pub to_address: Address,
    pub amount: Natural,
    pub timestamp: Natural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningStats {
    pub mined_blocks: Natural,
    pub rewards: Natural,
}

/// Domain events forwarded to whoever notifies clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEvent {
    NewBlock(Block),
    BalanceUpdate {
        address: Address,
        balance: Natural,
    },
    TransactionHistoryUpdate {
        address: Address,
        history: Vec<TransactionRecord>,
    },
    TransactionPoolUpdate(Vec<TransactionRecord>),
    MiningStats {
        validator: Address,
        stats: MiningStats,
    },
}

/// Consumer of ledger events. Called after the ledger lock is released.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LedgerEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &LedgerEvent) {}
}

type Listener = Box<dyn Fn(&LedgerEvent) + Send + Sync>;

/// Synchronous fan-out to registered listeners.
///
/// Listeners run inline on the emitting task; keep them fast.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Listener) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: &LedgerEvent) {
        if let Ok(listeners) = self.listeners.read() {
            for listener in listeners.iter() {
                listener(event);
            }
        }
    }
}

/// Forwards events onto a tokio broadcast channel for async consumers
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: broadcast::Sender<LedgerEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &LedgerEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event.clone());
    }
}
