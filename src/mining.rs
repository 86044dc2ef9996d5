//! Block production: stake-weighted validator draw, assembly, signing and a
//! cancellable settlement delay before commit.

use crate::consensus::create_reward_transaction;
use crate::crypto::Signer;
use crate::error::{LedgerError, Result};
use crate::ledger::Ledger;
use crate::shutdown::ShutdownController;
use crate::transaction::current_timestamp;
use crate::types::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// CreateNewBlock: ℬ × 𝒯𝒳* × 𝔸 × ℕ × ℕ → ℬ
///
/// For chain tip t, pooled transactions txs, validator v:
/// 1. transactions = txs ‖ reward(v)
/// 2. index = t.index + 1, previous_hash = t.hash
/// 3. timestamp is kept strictly after t.timestamp
/// 4. hash derived, signature left empty
pub fn create_new_block(
    tip: &Block,
    pool_txs: &[Transaction],
    validator: &str,
    reward: Natural,
    timestamp: Natural,
) -> Block {
    let timestamp = timestamp.max(tip.timestamp.saturating_add(1));
    let mut transactions = pool_txs.to_vec();
    transactions.push(create_reward_transaction(validator, reward, timestamp));
    Block::new(tip.index + 1, tip.hash, timestamp, transactions, validator)
}

/// Where the miner is in its current attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerState {
    Idle,
    Assembling,
    Signed,
    Committing,
}

pub struct Miner {
    ledger: Ledger,
    signer: Arc<dyn Signer>,
    settlement_delay: Duration,
    rng: Mutex<StdRng>,
    state: Mutex<MinerState>,
}

impl Miner {
    pub fn new(ledger: Ledger, signer: Arc<dyn Signer>, settlement_delay: Duration) -> Self {
        Self::with_rng(ledger, signer, settlement_delay, StdRng::from_entropy())
    }

    /// Deterministic validator draws
    pub fn with_seed(
        ledger: Ledger,
        signer: Arc<dyn Signer>,
        settlement_delay: Duration,
        seed: u64,
    ) -> Self {
        Self::with_rng(ledger, signer, settlement_delay, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        ledger: Ledger,
        signer: Arc<dyn Signer>,
        settlement_delay: Duration,
        rng: StdRng,
    ) -> Self {
        Self {
            ledger,
            signer,
            settlement_delay,
            rng: Mutex::new(rng),
            state: Mutex::new(MinerState::Idle),
        }
    }

    pub fn state(&self) -> MinerState {
        *lock(&self.state)
    }

    fn set_state(&self, state: MinerState) {
        *lock(&self.state) = state;
    }

    /// Run one mining attempt to completion.
    ///
    /// Idle → Assembling → Signed → Committing → Idle. Every exit path
    /// returns the miner to `Idle`. A signal on `shutdown` during the
    /// settlement delay aborts with `Cancelled` and leaves chain and pool
    /// as they were.
    pub async fn mine_block(&self, shutdown: &mut broadcast::Receiver<()>) -> Result<Block> {
        let result = self.attempt(shutdown).await;
        self.set_state(MinerState::Idle);
        result
    }

    async fn attempt(&self, shutdown: &mut broadcast::Receiver<()>) -> Result<Block> {
        self.set_state(MinerState::Assembling);
        let (mut candidate, snapshot) = {
            let chain = self.ledger.write().await;
            let validator = {
                let mut rng = lock(&self.rng);
                chain.select_validator(&mut *rng)?
            };
            let pool = chain.get_transaction_pool();
            let snapshot: Vec<Hash> = pool.iter().map(|tx| tx.id).collect();
            let candidate = create_new_block(
                chain.latest_block(),
                pool,
                &validator,
                chain.block_reward(),
                current_timestamp(),
            );
            (candidate, snapshot)
        };
        debug!(
            index = candidate.index,
            validator = %candidate.validator,
            transactions = candidate.transactions.len(),
            "block assembled"
        );

        candidate.signature = self.signer.sign(&candidate.validator, &candidate.hash)?;
        self.set_state(MinerState::Signed);

        self.set_state(MinerState::Committing);
        tokio::select! {
            _ = tokio::time::sleep(self.settlement_delay) => {}
            _ = shutdown.recv() => {
                info!(index = candidate.index, "mining cancelled during settlement delay");
                return Err(LedgerError::Cancelled);
            }
        }

        let (committed, events) = {
            let mut chain = self.ledger.write().await;
            let index = candidate.index;
            if !chain.add_block(candidate) {
                return Err(LedgerError::BlockRejected(format!(
                    "block {} was not accepted by the chain",
                    index
                )));
            }
            chain.remove_pooled(&snapshot);
            let committed = chain.latest_block().clone();
            let events = Ledger::block_committed_events(&chain, &committed);
            (committed, events)
        };
        self.ledger.emit(&events);

        info!(
            index = committed.index,
            validator = %committed.validator,
            hash = %hex::encode(committed.hash),
            "block mined"
        );
        Ok(committed)
    }

    /// Mine every `interval` until `shutdown` fires.
    ///
    /// Failed attempts are logged and retried at the next tick.
    pub async fn run(&self, interval: Duration, shutdown: &ShutdownController) {
        let mut signal = shutdown.subscribe();
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !shutdown.is_triggered() {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = signal.recv() => break,
            }
            match self.mine_block(&mut signal).await {
                Ok(_) => {}
                Err(LedgerError::Cancelled) => break,
                Err(e) => warn!(error = %e, "mining attempt failed"),
            }
        }
        debug!("miner stopped");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
