//! Hashing and key-management capabilities consumed by the ledger
//!
//! The ledger only needs three operations from key management: sign a
//! 32-byte digest, verify a signature against an address, and derive the
//! address of a secret key. Addresses are hex-encoded compressed secp256k1
//! public keys.

use crate::error::{LedgerError, Result};
use crate::types::*;
use secp256k1::{ecdsa, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// SHA-256 of `data`
pub fn sha256_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Parse a 32-byte secret key
pub fn parse_secret_key(bytes: &[u8]) -> Result<SecretKey> {
    SecretKey::from_slice(bytes).map_err(|e| LedgerError::InvalidKey(e.to_string()))
}

/// Parse a hex-encoded 32-byte secret key
pub fn parse_secret_key_hex(secret_hex: &str) -> Result<SecretKey> {
    let bytes = hex::decode(secret_hex).map_err(|e| LedgerError::InvalidKey(e.to_string()))?;
    parse_secret_key(&bytes)
}

/// derivePublicKey: secret → address
pub fn derive_public_key(secret: &SecretKey) -> Address {
    let secp = Secp256k1::signing_only();
    hex::encode(PublicKey::from_secret_key(&secp, secret).serialize())
}

/// sign: ℍ × secret → 𝕊
pub fn sign_hash(hash: &Hash, secret: &SecretKey) -> Result<Signature> {
    let secp = Secp256k1::signing_only();
    let message =
        Message::from_digest_slice(hash).map_err(|e| LedgerError::Signing(e.to_string()))?;
    let signature = secp.sign_ecdsa(&message, secret);
    Ok(signature.serialize_compact().to_vec())
}

/// verify: ℍ × 𝕊 × 𝔸 → {true, false}
///
/// Any malformed address or signature simply fails verification.
pub fn verify_hash(hash: &Hash, signature: &[u8], address: &str) -> bool {
    let Some(public_key) = parse_address(address) else {
        return false;
    };
    let Ok(signature) = ecdsa::Signature::from_compact(signature) else {
        return false;
    };
    let Ok(message) = Message::from_digest_slice(hash) else {
        return false;
    };
    Secp256k1::verification_only()
        .verify_ecdsa(&message, &signature, &public_key)
        .is_ok()
}

/// Decode an address into a public key
pub fn parse_address(address: &str) -> Option<PublicKey> {
    let bytes = hex::decode(address).ok()?;
    PublicKey::from_slice(&bytes).ok()
}

pub fn is_valid_address(address: &str) -> bool {
    parse_address(address).is_some()
}

/// Signing capability resolved out-of-band from the validator registry.
///
/// The registry only knows public addresses; whoever assembles a block asks
/// the signer to produce a signature on behalf of the selected validator.
pub trait Signer: Send + Sync {
    fn sign(&self, validator: &Address, hash: &Hash) -> Result<Signature>;
}

/// In-memory map from validator address to secret key
#[derive(Default, Clone)]
pub struct Keyring {
    keys: HashMap<Address, SecretKey>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `secret` and return its address
    pub fn insert(&mut self, secret: SecretKey) -> Address {
        let address = derive_public_key(&secret);
        self.keys.insert(address.clone(), secret);
        address
    }

    pub fn contains(&self, address: &str) -> bool {
        self.keys.contains_key(address)
    }

    pub fn secret_key(&self, address: &str) -> Option<&SecretKey> {
        self.keys.get(address)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Signer for Keyring {
    fn sign(&self, validator: &Address, hash: &Hash) -> Result<Signature> {
        let secret = self
            .keys
            .get(validator)
            .ok_or_else(|| LedgerError::Signing(format!("no key held for validator {}", validator)))?;
        sign_hash(hash, secret)
    }
}

// Only addresses are printed.
impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring")
            .field("addresses", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}
