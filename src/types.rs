//! Core ledger types: blocks, transactions and the unspent-output index

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hash type: 256-bit SHA-256 digest
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Address: hex-encoded compressed secp256k1 public key
pub type Address = String;

/// Compact ECDSA signature; empty when absent
pub type Signature = ByteString;

/// Natural number type
pub type Natural = u64;

/// OutPoint: 𝒪 = ℍ × ℕ
///
/// Reference to a single output of a previously committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    #[serde(with = "hex")]
    pub tx_out_id: Hash,
    pub tx_out_index: u32,
}

/// Transaction Input: ℐ = 𝒪 × 𝕊
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    #[serde(with = "hex")]
    pub tx_out_id: Hash,
    pub tx_out_index: u32,
    #[serde(with = "hex")]
    pub signature: Signature,
}

impl TxIn {
    /// Unsigned input spending `outpoint`
    pub fn unsigned(outpoint: &OutPoint) -> Self {
        Self {
            tx_out_id: outpoint.tx_out_id,
            tx_out_index: outpoint.tx_out_index,
            signature: Vec::new(),
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            tx_out_id: self.tx_out_id,
            tx_out_index: self.tx_out_index,
        }
    }
}

/// Transaction Output: 𝒯 = 𝔸 × ℕ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub address: Address,
    pub amount: Natural,
}

impl TxOut {
    pub fn new(address: impl Into<Address>, amount: Natural) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }
}

/// Transaction: 𝒯𝒳 = ℍ × ℕ × ℐ* × 𝒯*
///
/// `id` is derived from the timestamp, the spent outpoints and the outputs.
/// Signatures are not part of the id, so the id is the base of every
/// per-input signing digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(with = "hex")]
    pub id: Hash,
    pub timestamp: Natural,
    pub tx_ins: Vec<TxIn>,
    pub tx_outs: Vec<TxOut>,
}

impl Transaction {
    /// Build a transaction and derive its id
    pub fn new(tx_ins: Vec<TxIn>, tx_outs: Vec<TxOut>, timestamp: Natural) -> Self {
        let mut tx = Self {
            id: [0u8; 32],
            timestamp,
            tx_ins,
            tx_outs,
        };
        tx.id = crate::transaction::calculate_tx_id(&tx);
        tx
    }

    /// A transaction without inputs mints new value
    pub fn is_coinbase(&self) -> bool {
        self.tx_ins.is_empty()
    }
}

/// Block: ℬ = ℕ × ℍ × ℕ × 𝒯𝒳* × 𝔸 × 𝕊 × ℍ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: Natural,
    #[serde(with = "hex")]
    pub previous_hash: Hash,
    pub timestamp: Natural,
    pub transactions: Vec<Transaction>,
    pub validator: Address,
    #[serde(with = "hex")]
    pub signature: Signature,
    #[serde(with = "hex")]
    pub hash: Hash,
}

impl Block {
    /// Build an unsigned block; the hash is always derived
    pub fn new(
        index: Natural,
        previous_hash: Hash,
        timestamp: Natural,
        transactions: Vec<Transaction>,
        validator: impl Into<Address>,
    ) -> Self {
        let mut block = Self {
            index,
            previous_hash,
            timestamp,
            transactions,
            validator: validator.into(),
            signature: Vec::new(),
            hash: [0u8; 32],
        };
        block.hash = block.calculate_hash();
        block
    }

    pub fn calculate_hash(&self) -> Hash {
        crate::block::calculate_block_hash(self)
    }

    /// `hash == recompute(self)`
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }
}

/// UnspentTxOut: 𝒰 = 𝒪 × 𝔸 × ℕ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentTxOut {
    #[serde(with = "hex")]
    pub tx_out_id: Hash,
    pub tx_out_index: u32,
    pub address: Address,
    pub amount: Natural,
}

impl UnspentTxOut {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            tx_out_id: self.tx_out_id,
            tx_out_index: self.tx_out_index,
        }
    }
}

/// UTXO Set: 𝒰𝒮 = 𝒪 → 𝒰
pub type UtxoSet = BTreeMap<OutPoint, UnspentTxOut>;

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}
