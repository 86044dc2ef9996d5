//! Ledger configuration with TOML file support.

use crate::block::create_genesis_block;
use crate::blockchain::Blockchain;
use crate::constants::{BLOCK_REWARD, GENESIS_TIMESTAMP, SETTLEMENT_DELAY};
use crate::crypto::{derive_public_key, is_valid_address, parse_secret_key_hex, Keyring};
use crate::error::{LedgerError, Result};
use crate::logging::LogFormat;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Funds placed in the genesis coinbase
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub address: Address,
    pub amount: Natural,
}

/// A validator this node can sign for
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub secret_key_hex: String,
    pub stake: Natural,
}

impl std::fmt::Debug for ValidatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorConfig")
            .field("secret_key_hex", &"<redacted>")
            .field("stake", &self.stake)
            .finish()
    }
}

/// Configuration for a ledger node.
///
/// Loaded from TOML via [`LedgerConfig::from_toml_file`] or built in code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Coinbase minted per block for the validator
    #[serde(default = "default_block_reward")]
    pub block_reward: Natural,

    /// Wait between signing a block and committing it
    #[serde(default = "default_settlement_delay_ms")]
    pub settlement_delay_ms: u64,

    #[serde(default)]
    pub genesis_timestamp: Natural,

    #[serde(default)]
    pub genesis_allocations: Vec<GenesisAllocation>,

    #[serde(default)]
    pub validators: Vec<ValidatorConfig>,

    /// Period of the node's mining loop
    #[serde(default = "default_mining_interval_ms")]
    pub mining_interval_ms: u64,

    /// "human" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_block_reward() -> Natural {
    BLOCK_REWARD
}

fn default_settlement_delay_ms() -> u64 {
    SETTLEMENT_DELAY.as_millis() as u64
}

fn default_mining_interval_ms() -> u64 {
    10_000
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LedgerConfig {
    pub fn from_toml_file(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| LedgerError::Config(format!("{}: {}", path, e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| LedgerError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    pub fn settlement_delay(&self) -> Duration {
        Duration::from_millis(self.settlement_delay_ms)
    }

    pub fn mining_interval(&self) -> Duration {
        Duration::from_millis(self.mining_interval_ms)
    }

    pub fn log_format(&self) -> Result<LogFormat> {
        self.log_format.parse()
    }

    /// Deterministic genesis from the configured allocations
    pub fn genesis_block(&self) -> Block {
        let allocations: Vec<TxOut> = self
            .genesis_allocations
            .iter()
            .map(|a| TxOut::new(a.address.clone(), a.amount))
            .collect();
        create_genesis_block(&allocations, self.genesis_timestamp)
    }

    /// Signing keys for every configured validator
    pub fn keyring(&self) -> Result<Keyring> {
        let mut keyring = Keyring::new();
        for validator in &self.validators {
            keyring.insert(parse_secret_key_hex(&validator.secret_key_hex)?);
        }
        Ok(keyring)
    }

    /// Fresh chain at genesis with the configured validators registered
    pub fn blockchain(&self) -> Result<Blockchain> {
        if let Some(bad) = self
            .genesis_allocations
            .iter()
            .find(|a| !is_valid_address(&a.address))
        {
            return Err(LedgerError::Config(format!(
                "genesis allocation to invalid address {:?}",
                bad.address
            )));
        }
        let mut blockchain = Blockchain::new(self.genesis_block(), self.block_reward);
        for validator in &self.validators {
            let secret = parse_secret_key_hex(&validator.secret_key_hex)?;
            blockchain.register_validator(derive_public_key(&secret), validator.stake);
        }
        Ok(blockchain)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            block_reward: default_block_reward(),
            settlement_delay_ms: default_settlement_delay_ms(),
            genesis_timestamp: GENESIS_TIMESTAMP,
            genesis_allocations: Vec::new(),
            validators: Vec::new(),
            mining_interval_ms: default_mining_interval_ms(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}
