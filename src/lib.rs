//! # Stake-Ledger
//!
//! A minimal proof-of-stake UTXO ledger.
//!
//! Value lives in unspent transaction outputs. Transfers are signed per
//! input and validated against the UTXO set before they enter the pool.
//! Blocks are produced by a validator drawn with probability proportional
//! to its stake, and peers converge on the longest valid chain.
//!
//! ## Layers
//!
//! - Pure validation functions: [`transaction`], [`block`],
//!   [`reorganization`], [`consensus`], [`economic`]
//! - The single-owner state machine: [`blockchain::Blockchain`]
//! - Shared access and notifications: [`ledger::Ledger`], [`events`]
//! - Block production and peer sync: [`mining`], [`network`]
//!
//! ## Usage
//!
//! ```rust
//! use stake_ledger::blockchain::Blockchain;
//! use stake_ledger::crypto::{derive_public_key, parse_secret_key};
//! use stake_ledger::transaction::create_transfer;
//! use stake_ledger::types::*;
//!
//! let alice_key = parse_secret_key(&[1u8; 32]).unwrap();
//! let alice = derive_public_key(&alice_key);
//! let bob = derive_public_key(&parse_secret_key(&[2u8; 32]).unwrap());
//!
//! let mut chain = Blockchain::with_allocations(&[TxOut::new(alice.clone(), 1000)]);
//! let utxos = chain.get_unspent_tx_outs(&alice);
//! let tx = create_transfer(&utxos, &alice_key, &bob, 100, 1).unwrap();
//!
//! assert!(chain.add_transaction(tx));
//! assert_eq!(chain.get_transaction_pool().len(), 1);
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod crypto;
pub mod transaction;
pub mod block;
pub mod mempool;
pub mod consensus;
pub mod reorganization;
pub mod economic;
pub mod events;
pub mod blockchain;
pub mod ledger;
pub mod shutdown;
pub mod mining;
pub mod network;
pub mod logging;
pub mod config;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{LedgerError, Result};
pub use blockchain::Blockchain;
pub use config::LedgerConfig;
pub use crypto::{Keyring, Signer};
pub use events::{EventSink, LedgerEvent};
pub use ledger::Ledger;
pub use mining::{Miner, MinerState};
pub use shutdown::ShutdownController;
