//! Peer message handling and chain-sync decisions
//!
//! Transport-agnostic: callers own the sockets, this module decides what a
//! received message does to the ledger and what should be sent back.

use crate::error::{LedgerError, Result};
use crate::ledger::Ledger;
use crate::types::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Messages exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerMessage {
    QueryLatest,
    QueryAll,
    ResponseBlockchain(Vec<Block>),
    Transaction(Transaction),
}

/// Outcome of a received chain response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Nothing newer than what we hold
    Ignored,
    /// Received tip extended our tip
    Appended,
    /// Received chain adopted wholesale
    Replaced,
    /// Only a tip arrived and it does not link; ask for everything
    QueryAll,
    /// Received data failed validation
    Rejected,
}

/// What the caller should send after processing a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkResponse {
    Ok,
    /// Reply to the peer that sent the message
    SendMessage(PeerMessage),
    /// Relay to every connected peer
    Broadcast(PeerMessage),
    Reject(String),
}

pub fn encode_message(message: &PeerMessage) -> Result<String> {
    serde_json::to_string(message).map_err(|e| LedgerError::Serialization(e.to_string()))
}

pub fn decode_message(data: &str) -> Result<PeerMessage> {
    serde_json::from_str(data).map_err(|e| LedgerError::Serialization(e.to_string()))
}

/// HandleChainResponse: ℬ* × 𝒞 → SyncAction
///
/// With r the last received block and h our tip:
/// 1. r.index ≤ h.index ⇒ Ignored
/// 2. r.previous_hash = h.hash ⇒ AddBlock(r)
/// 3. one block received ⇒ QueryAll
/// 4. otherwise ⇒ ReplaceChain(received)
pub async fn process_chain_response(ledger: &Ledger, blocks: Vec<Block>) -> SyncAction {
    let Some(received) = blocks.last() else {
        return SyncAction::Ignored;
    };
    let held = ledger.latest_block().await;

    if received.index <= held.index {
        debug!(received = received.index, held = held.index, "received chain is not ahead");
        return SyncAction::Ignored;
    }

    if received.previous_hash == held.hash {
        let block = received.clone();
        return if ledger.add_block(block).await {
            SyncAction::Appended
        } else {
            SyncAction::Rejected
        };
    }

    if blocks.len() == 1 {
        info!(received = received.index, held = held.index, "peer is ahead, querying full chain");
        return SyncAction::QueryAll;
    }

    if ledger.replace_chain(blocks).await {
        SyncAction::Replaced
    } else {
        SyncAction::Rejected
    }
}

/// Process one peer message against the ledger
pub async fn process_peer_message(ledger: &Ledger, message: PeerMessage) -> NetworkResponse {
    match message {
        PeerMessage::QueryLatest => {
            let tip = ledger.latest_block().await;
            NetworkResponse::SendMessage(PeerMessage::ResponseBlockchain(vec![tip]))
        }
        PeerMessage::QueryAll => {
            NetworkResponse::SendMessage(PeerMessage::ResponseBlockchain(ledger.chain_snapshot().await))
        }
        PeerMessage::ResponseBlockchain(blocks) => match process_chain_response(ledger, blocks).await {
            SyncAction::Appended => {
                let tip = ledger.latest_block().await;
                NetworkResponse::Broadcast(PeerMessage::ResponseBlockchain(vec![tip]))
            }
            SyncAction::QueryAll => NetworkResponse::Broadcast(PeerMessage::QueryAll),
            SyncAction::Rejected => NetworkResponse::Reject("received chain rejected".to_string()),
            SyncAction::Ignored | SyncAction::Replaced => NetworkResponse::Ok,
        },
        PeerMessage::Transaction(tx) => {
            if ledger.add_transaction(tx.clone()).await {
                NetworkResponse::Broadcast(PeerMessage::Transaction(tx))
            } else {
                NetworkResponse::Reject(format!("transaction {} rejected", hex::encode(tx.id)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Blockchain;
    use crate::crypto::{derive_public_key, parse_secret_key};
    use crate::transaction::create_transfer;

    fn address(byte: u8) -> Address {
        derive_public_key(&parse_secret_key(&[byte; 32]).unwrap())
    }

    fn ledger() -> Ledger {
        Ledger::new(Blockchain::with_allocations(&[TxOut::new(address(1), 1000)]))
    }

    fn extend(chain: &mut Vec<Block>, validator: u8) {
        let tip = chain.last().unwrap();
        let block = Block::new(tip.index + 1, tip.hash, tip.timestamp + 1, vec![], address(validator));
        chain.push(block);
    }

    #[tokio::test]
    async fn test_stale_response_ignored() {
        let ledger = ledger();
        let chain = ledger.chain_snapshot().await;
        assert_eq!(process_chain_response(&ledger, chain).await, SyncAction::Ignored);
        assert_eq!(process_chain_response(&ledger, vec![]).await, SyncAction::Ignored);
    }

    #[tokio::test]
    async fn test_linking_tip_appended() {
        let ledger = ledger();
        let mut chain = ledger.chain_snapshot().await;
        extend(&mut chain, 9);
        let tip = chain.last().cloned().unwrap();

        assert_eq!(process_chain_response(&ledger, vec![tip]).await, SyncAction::Appended);
        assert_eq!(ledger.len().await, 2);
    }

    #[tokio::test]
    async fn test_unlinked_single_block_queries_all() {
        let ledger = ledger();
        let mut chain = ledger.chain_snapshot().await;
        extend(&mut chain, 9);
        extend(&mut chain, 9);
        let tip = chain.last().cloned().unwrap();

        assert_eq!(process_chain_response(&ledger, vec![tip]).await, SyncAction::QueryAll);
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_longer_chain_replaces() {
        let ledger = ledger();
        let mut chain = ledger.chain_snapshot().await;
        for _ in 0..3 {
            extend(&mut chain, 9);
        }

        assert_eq!(process_chain_response(&ledger, chain.clone()).await, SyncAction::Replaced);
        assert_eq!(ledger.chain_snapshot().await, chain);
    }

    #[tokio::test]
    async fn test_invalid_chain_rejected() {
        let ledger = ledger();
        let mut chain = ledger.chain_snapshot().await;
        extend(&mut chain, 9);
        extend(&mut chain, 9);
        chain[1].timestamp += 5;

        assert_eq!(process_chain_response(&ledger, chain).await, SyncAction::Rejected);
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_queries_answered_with_chain() {
        let ledger = ledger();
        let genesis = ledger.latest_block().await;

        assert_eq!(
            process_peer_message(&ledger, PeerMessage::QueryLatest).await,
            NetworkResponse::SendMessage(PeerMessage::ResponseBlockchain(vec![genesis.clone()]))
        );
        assert_eq!(
            process_peer_message(&ledger, PeerMessage::QueryAll).await,
            NetworkResponse::SendMessage(PeerMessage::ResponseBlockchain(vec![genesis]))
        );
    }

    #[tokio::test]
    async fn test_transaction_relayed_once() {
        let ledger = ledger();
        let utxos = ledger.get_unspent_tx_outs(&address(1)).await;
        let secret = parse_secret_key(&[1; 32]).unwrap();
        let tx = create_transfer(&utxos, &secret, &address(2), 10, 1).unwrap();

        let first = process_peer_message(&ledger, PeerMessage::Transaction(tx.clone())).await;
        assert_eq!(first, NetworkResponse::Broadcast(PeerMessage::Transaction(tx.clone())));
        let again = process_peer_message(&ledger, PeerMessage::Transaction(tx)).await;
        assert!(matches!(again, NetworkResponse::Reject(_)));
    }

    #[test]
    fn test_message_wire_format() {
        let json = encode_message(&PeerMessage::QueryLatest).unwrap();
        assert_eq!(json, r#"{"type":"QUERY_LATEST"}"#);
        assert_eq!(decode_message(&json).unwrap(), PeerMessage::QueryLatest);
        assert!(decode_message("{\"type\":\"NOPE\"}").is_err());
    }
}
