//! Async node behaviour: mining pipeline, notifications and peer sync

use stake_ledger::crypto::{derive_public_key, parse_secret_key};
use stake_ledger::events::{ChannelSink, TxStatus};
use stake_ledger::network::{process_peer_message, NetworkResponse, PeerMessage};
use stake_ledger::transaction::create_transfer;
use stake_ledger::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn addr(byte: u8) -> Address {
    derive_public_key(&parse_secret_key(&[byte; 32]).unwrap())
}

fn keyring(bytes: &[u8]) -> Arc<Keyring> {
    let mut keyring = Keyring::new();
    for byte in bytes {
        keyring.insert(parse_secret_key(&[*byte; 32]).unwrap());
    }
    Arc::new(keyring)
}

async fn transfer(ledger: &Ledger, from: u8, to: u8, amount: Natural, timestamp: Natural) -> Transaction {
    let utxos = ledger.get_unspent_tx_outs(&addr(from)).await;
    let secret = parse_secret_key(&[from; 32]).unwrap();
    create_transfer(&utxos, &secret, &addr(to), amount, timestamp).unwrap()
}

fn drain(rx: &mut broadcast::Receiver<LedgerEvent>) -> Vec<LedgerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_mined_block_notifies_everyone() {
    let sink = Arc::new(ChannelSink::new(64));
    let mut rx = sink.subscribe();
    let ledger = Ledger::with_sink(
        Blockchain::with_allocations(&[TxOut::new(addr(1), 1000)]),
        sink,
    );
    ledger.register_validator(addr(7), 5).await;

    let tx = transfer(&ledger, 1, 2, 100, 1).await;
    assert!(ledger.add_transaction(tx.clone()).await);
    let pending = drain(&mut rx);
    assert!(pending.iter().any(|e| matches!(
        e,
        LedgerEvent::TransactionHistoryUpdate { address, history }
            if *address == addr(2) && history[0].status == TxStatus::Pending
    )));

    let miner = Miner::with_seed(ledger.clone(), keyring(&[7]), Duration::from_millis(5), 42);
    let shutdown = ShutdownController::new();
    let block = miner.mine_block(&mut shutdown.subscribe()).await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(events.first(), Some(&LedgerEvent::NewBlock(block)));
    for (who, balance) in [(1u8, 900u64), (2, 100), (7, BLOCK_REWARD)] {
        assert!(
            events.contains(&LedgerEvent::BalanceUpdate { address: addr(who), balance }),
            "missing balance update for {}",
            who
        );
    }
    assert!(events.contains(&LedgerEvent::TransactionPoolUpdate(vec![])));
    assert!(events.iter().any(|e| matches!(
        e,
        LedgerEvent::MiningStats { validator, stats }
            if *validator == addr(7) && stats.mined_blocks == 1 && stats.rewards == BLOCK_REWARD
    )));

    let history = ledger.get_transaction_history(&addr(2)).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, TxStatus::Confirmed);
    assert_eq!(history[0].from_address.as_deref(), Some(addr(1).as_str()));
    assert_eq!(history[0].amount, 100);
}

#[tokio::test]
async fn test_mining_without_validators_fails_cleanly() {
    let ledger = Ledger::new(Blockchain::with_allocations(&[TxOut::new(addr(1), 1000)]));
    let tx = transfer(&ledger, 1, 2, 100, 1).await;
    assert!(ledger.add_transaction(tx).await);

    let miner = Miner::with_seed(ledger.clone(), keyring(&[7]), Duration::ZERO, 1);
    let shutdown = ShutdownController::new();
    let result = miner.mine_block(&mut shutdown.subscribe()).await;

    assert_eq!(result, Err(LedgerError::NoValidators));
    assert_eq!(ledger.len().await, 1);
    assert_eq!(ledger.get_transaction_pool().await.len(), 1);
    assert_eq!(miner.state(), MinerState::Idle);
}

#[tokio::test]
async fn test_concurrent_miners_never_fork_local_chain() {
    let ledger = Ledger::new(Blockchain::with_allocations(&[]));
    ledger.register_validator(addr(7), 1).await;
    ledger.register_validator(addr(8), 1).await;
    let signer = keyring(&[7, 8]);

    let first = Miner::with_seed(ledger.clone(), signer.clone(), Duration::from_millis(10), 1);
    let second = Miner::with_seed(ledger.clone(), signer, Duration::from_millis(10), 2);
    let shutdown = ShutdownController::new();
    let (mut a, mut b) = (shutdown.subscribe(), shutdown.subscribe());

    let (left, right) = tokio::join!(first.mine_block(&mut a), second.mine_block(&mut b));

    // Both assembled on the same tip; only one can commit
    let committed = [left.is_ok(), right.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(committed, 1);
    assert!(matches!(
        left.err().or(right.err()),
        Some(LedgerError::BlockRejected(_))
    ));
    assert_eq!(ledger.len().await, 2);
}

#[tokio::test]
async fn test_peers_converge_on_longest_chain() {
    let allocations = [TxOut::new(addr(1), 1000)];
    let alpha = Ledger::new(Blockchain::with_allocations(&allocations));
    let beta = Ledger::new(Blockchain::with_allocations(&allocations));
    alpha.register_validator(addr(7), 1).await;

    let miner = Miner::with_seed(alpha.clone(), keyring(&[7]), Duration::ZERO, 3);
    let shutdown = ShutdownController::new();
    let mut signal = shutdown.subscribe();
    for _ in 0..3 {
        miner.mine_block(&mut signal).await.unwrap();
    }

    // beta only hears alpha's tip first, which does not link
    let tip = match process_peer_message(&alpha, PeerMessage::QueryLatest).await {
        NetworkResponse::SendMessage(message) => message,
        other => panic!("unexpected response {:?}", other),
    };
    assert_eq!(
        process_peer_message(&beta, tip).await,
        NetworkResponse::Broadcast(PeerMessage::QueryAll)
    );

    let full = match process_peer_message(&alpha, PeerMessage::QueryAll).await {
        NetworkResponse::SendMessage(message) => message,
        other => panic!("unexpected response {:?}", other),
    };
    assert_eq!(process_peer_message(&beta, full).await, NetworkResponse::Ok);
    assert_eq!(beta.chain_snapshot().await, alpha.chain_snapshot().await);
    assert_eq!(beta.get_balance(&addr(7)).await, 3 * BLOCK_REWARD);

    // One more block on alpha reaches beta as a simple append
    miner.mine_block(&mut signal).await.unwrap();
    let tip = alpha.latest_block().await;
    let response = process_peer_message(&beta, PeerMessage::ResponseBlockchain(vec![tip.clone()])).await;
    assert_eq!(response, NetworkResponse::Broadcast(PeerMessage::ResponseBlockchain(vec![tip])));
    assert_eq!(beta.len().await, 5);
}

#[tokio::test]
async fn test_config_driven_node() {
    let secret = "0707070707070707070707070707070707070707070707070707070707070707";
    let validator = addr(7);
    let toml = format!(
        r#"
        settlement_delay_ms = 0
        block_reward = 10

        [[genesis_allocations]]
        address = "{validator}"
        amount = 500

        [[validators]]
        secret_key_hex = "{secret}"
        stake = 4
        "#
    );
    let config = LedgerConfig::from_toml_str(&toml).unwrap();
    let ledger = Ledger::new(config.blockchain().unwrap());
    let miner = Miner::with_seed(
        ledger.clone(),
        Arc::new(config.keyring().unwrap()),
        config.settlement_delay(),
        9,
    );

    let shutdown = ShutdownController::new();
    miner.mine_block(&mut shutdown.subscribe()).await.unwrap();
    assert_eq!(ledger.get_balance(&validator).await, 510);
}
