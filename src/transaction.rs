//! Transaction identity, structural validation and input validation

use crate::constants::*;
use crate::crypto::{is_valid_address, sha256_hash, sign_hash, verify_hash};
use crate::error::{LedgerError, Result};
use crate::types::*;
use secp256k1::SecretKey;
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

/// Canonical encoding of the id preimage: timestamp, spent outpoints, outputs
fn encode_id_preimage(tx: &Transaction, out: &mut Vec<u8>) {
    out.extend_from_slice(&tx.timestamp.to_le_bytes());
    out.extend_from_slice(&(tx.tx_ins.len() as u64).to_le_bytes());
    for input in &tx.tx_ins {
        out.extend_from_slice(&input.tx_out_id);
        out.extend_from_slice(&input.tx_out_index.to_le_bytes());
    }
    out.extend_from_slice(&(tx.tx_outs.len() as u64).to_le_bytes());
    for output in &tx.tx_outs {
        out.extend_from_slice(&(output.address.len() as u64).to_le_bytes());
        out.extend_from_slice(output.address.as_bytes());
        out.extend_from_slice(&output.amount.to_le_bytes());
    }
}

/// Transaction id: SHA-256 over the canonical preimage (signatures excluded)
pub fn calculate_tx_id(tx: &Transaction) -> Hash {
    let mut data = Vec::new();
    encode_id_preimage(tx, &mut data);
    sha256_hash(&data)
}

/// Full canonical serialization, signatures included. Used for block hashing.
pub fn serialize_transaction(tx: &Transaction, out: &mut Vec<u8>) {
    out.extend_from_slice(&tx.id);
    encode_id_preimage(tx, out);
    for input in &tx.tx_ins {
        out.extend_from_slice(&(input.signature.len() as u64).to_le_bytes());
        out.extend_from_slice(&input.signature);
    }
}

/// Digest signed by the owner of the output spent at `outpoint`
pub fn input_digest(tx_id: &Hash, outpoint: &OutPoint) -> Hash {
    let mut data = Vec::with_capacity(68);
    data.extend_from_slice(tx_id);
    data.extend_from_slice(&outpoint.tx_out_id);
    data.extend_from_slice(&outpoint.tx_out_index.to_le_bytes());
    sha256_hash(&data)
}

/// Structural check of a single input
pub fn validate_tx_in(input: &TxIn) -> ValidationResult {
    if !input.signature.is_empty() && input.signature.len() != SIGNATURE_SIZE {
        return ValidationResult::Invalid(format!(
            "Invalid signature length {}",
            input.signature.len()
        ));
    }
    ValidationResult::Valid
}

/// Structural check of a single output
pub fn validate_tx_out(output: &TxOut) -> ValidationResult {
    if output.address != GENESIS_VALIDATOR && !is_valid_address(&output.address) {
        return ValidationResult::Invalid(format!("Invalid address {:?}", output.address));
    }
    ValidationResult::Valid
}

/// CheckTransaction: 𝒯𝒳 → {valid, invalid}
///
/// Soft validation, nothing is raised:
/// 1. id == calculate_tx_id(tx)
/// 2. |ins| ≤ M_max_inputs ∧ |outs| ≤ M_max_outputs
/// 3. coinbase ⇒ |outs| > 0
/// 4. no outpoint is spent twice within tx
/// 5. every input and output is well formed
pub fn validate_structure(tx: &Transaction) -> ValidationResult {
    // 1. Check id
    if tx.id != calculate_tx_id(tx) {
        return ValidationResult::Invalid("Transaction id does not match contents".to_string());
    }

    // 2. Check count limits
    if tx.tx_ins.len() > MAX_INPUTS {
        return ValidationResult::Invalid(format!("Too many inputs: {}", tx.tx_ins.len()));
    }
    if tx.tx_outs.len() > MAX_OUTPUTS {
        return ValidationResult::Invalid(format!("Too many outputs: {}", tx.tx_outs.len()));
    }

    // 3. Coinbase must mint something
    if tx.is_coinbase() && tx.tx_outs.is_empty() {
        return ValidationResult::Invalid("Coinbase transaction without outputs".to_string());
    }

    // 4. Duplicate inputs
    let mut seen = HashSet::new();
    for input in &tx.tx_ins {
        if !seen.insert(input.outpoint()) {
            return ValidationResult::Invalid(format!(
                "Outpoint {}:{} spent twice",
                hex::encode(input.tx_out_id),
                input.tx_out_index
            ));
        }
    }

    // 5. Field checks
    for (i, input) in tx.tx_ins.iter().enumerate() {
        if let ValidationResult::Invalid(reason) = validate_tx_in(input) {
            return ValidationResult::Invalid(format!("Input {}: {}", i, reason));
        }
    }
    for (i, output) in tx.tx_outs.iter().enumerate() {
        if let ValidationResult::Invalid(reason) = validate_tx_out(output) {
            return ValidationResult::Invalid(format!("Output {}: {}", i, reason));
        }
    }

    ValidationResult::Valid
}

/// Σ o.amount, `None` on overflow
pub fn total_output_amount(tx: &Transaction) -> Option<Natural> {
    tx.tx_outs
        .iter()
        .try_fold(0u64, |acc, o| acc.checked_add(o.amount))
}

/// CheckTxInputs: 𝒯𝒳 × 𝒰𝒮 → {valid, invalid} × ℕ
///
/// For transaction tx with UTXO set us:
/// 1. If tx is coinbase: return (valid, 0)
/// 2. Every input must reference an unspent output
/// 3. Every input must carry a signature that verifies against the
///    referenced output's owner over `input_digest`
/// 4. Let total_in = Σᵢ us(i).amount, total_out = Σₒ o.amount
/// 5. If total_in < total_out: return (invalid, 0)
/// 6. Return (valid, total_in - total_out)
pub fn check_tx_inputs(tx: &Transaction, utxo_set: &UtxoSet) -> (ValidationResult, Natural) {
    if tx.is_coinbase() {
        return (ValidationResult::Valid, 0);
    }

    let mut total_input = 0u64;

    for (i, input) in tx.tx_ins.iter().enumerate() {
        let outpoint = input.outpoint();
        let utxo = match utxo_set.get(&outpoint) {
            Some(utxo) => utxo,
            None => {
                return (
                    ValidationResult::Invalid(format!("Input {} not found in UTXO set", i)),
                    0,
                )
            }
        };

        if input.signature.is_empty() {
            return (
                ValidationResult::Invalid(format!("Input {} is not signed", i)),
                0,
            );
        }

        if !verify_hash(&input_digest(&tx.id, &outpoint), &input.signature, &utxo.address) {
            return (
                ValidationResult::Invalid(format!("Invalid signature on input {}", i)),
                0,
            );
        }

        total_input = match total_input.checked_add(utxo.amount) {
            Some(total) => total,
            None => {
                return (
                    ValidationResult::Invalid("Input value overflow".to_string()),
                    0,
                )
            }
        };
    }

    let total_output = match total_output_amount(tx) {
        Some(total) => total,
        None => {
            return (
                ValidationResult::Invalid("Output value overflow".to_string()),
                0,
            )
        }
    };

    if total_input < total_output {
        return (
            ValidationResult::Invalid(format!(
                "Insufficient input value: {} < {}",
                total_input, total_output
            )),
            0,
        );
    }

    (ValidationResult::Valid, total_input - total_output)
}

/// Sign every input of `tx` with `secret`
pub fn sign_inputs(tx: &mut Transaction, secret: &SecretKey) -> Result<()> {
    let tx_id = tx.id;
    for input in tx.tx_ins.iter_mut() {
        let digest = input_digest(&tx_id, &input.outpoint());
        input.signature = sign_hash(&digest, secret)?;
    }
    Ok(())
}

/// Build and sign a transfer of `amount` from the owner of `secret`.
///
/// Outputs are consumed in order until `amount` is covered; any excess is
/// returned to the sender as a change output.
pub fn create_transfer(
    unspent: &[UnspentTxOut],
    secret: &SecretKey,
    to: &str,
    amount: Natural,
    timestamp: Natural,
) -> Result<Transaction> {
    if amount == 0 {
        return Err(LedgerError::InvalidTransaction(
            "Transfer amount must be positive".to_string(),
        ));
    }
    let from = crate::crypto::derive_public_key(secret);

    let mut accumulated = 0u64;
    let mut tx_ins = Vec::new();
    for utxo in unspent.iter().filter(|u| u.address == from) {
        if accumulated >= amount {
            break;
        }
        accumulated = accumulated
            .checked_add(utxo.amount)
            .ok_or_else(|| LedgerError::InvalidTransaction("Input value overflow".to_string()))?;
        tx_ins.push(TxIn::unsigned(&utxo.outpoint()));
    }

    if accumulated < amount {
        return Err(LedgerError::InvalidTransaction(format!(
            "Insufficient balance: need {}, have {}",
            amount, accumulated
        )));
    }

    let mut tx_outs = vec![TxOut::new(to, amount)];
    if accumulated > amount {
        tx_outs.push(TxOut::new(from, accumulated - amount));
    }

    let mut tx = Transaction::new(tx_ins, tx_outs, timestamp);
    sign_inputs(&mut tx, secret)?;
    Ok(tx)
}

/// Milliseconds since the Unix epoch
pub fn current_timestamp() -> Natural {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Natural)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_public_key, parse_secret_key};

    fn secret(byte: u8) -> SecretKey {
        parse_secret_key(&[byte; 32]).unwrap()
    }

    fn funded(owner: &str, amount: u64) -> (UtxoSet, UnspentTxOut) {
        let utxo = UnspentTxOut {
            tx_out_id: [9; 32],
            tx_out_index: 0,
            address: owner.to_string(),
            amount,
        };
        let mut set = UtxoSet::new();
        set.insert(utxo.outpoint(), utxo.clone());
        (set, utxo)
    }

    #[test]
    fn test_tx_id_ignores_signatures() {
        let sk = secret(1);
        let (_, utxo) = funded(&derive_public_key(&sk), 100);
        let mut tx = Transaction::new(
            vec![TxIn::unsigned(&utxo.outpoint())],
            vec![TxOut::new(derive_public_key(&secret(2)), 100)],
            42,
        );
        let before = tx.id;
        sign_inputs(&mut tx, &sk).unwrap();

        assert_eq!(before, calculate_tx_id(&tx));
    }

    #[test]
    fn test_tx_id_changes_with_timestamp() {
        let to = derive_public_key(&secret(2));
        let a = Transaction::new(vec![], vec![TxOut::new(to.clone(), 10)], 1);
        let b = Transaction::new(vec![], vec![TxOut::new(to, 10)], 2);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_validate_structure_valid_coinbase() {
        let tx = Transaction::new(vec![], vec![TxOut::new(derive_public_key(&secret(2)), 50)], 0);
        assert_eq!(validate_structure(&tx), ValidationResult::Valid);
    }

    #[test]
    fn test_validate_structure_tampered_id() {
        let mut tx = Transaction::new(vec![], vec![TxOut::new(derive_public_key(&secret(2)), 50)], 0);
        tx.tx_outs[0].amount = 5000;
        assert!(!validate_structure(&tx).is_valid());
    }

    #[test]
    fn test_validate_structure_empty_coinbase() {
        let tx = Transaction::new(vec![], vec![], 0);
        assert!(!validate_structure(&tx).is_valid());
    }

    #[test]
    fn test_validate_structure_duplicate_inputs() {
        let outpoint = OutPoint { tx_out_id: [1; 32], tx_out_index: 0 };
        let tx = Transaction::new(
            vec![TxIn::unsigned(&outpoint), TxIn::unsigned(&outpoint)],
            vec![TxOut::new(derive_public_key(&secret(2)), 1)],
            0,
        );
        assert!(!validate_structure(&tx).is_valid());
    }

    #[test]
    fn test_validate_structure_bad_address() {
        let tx = Transaction::new(vec![], vec![TxOut::new("bob", 1)], 0);
        assert!(!validate_structure(&tx).is_valid());
    }

    #[test]
    fn test_validate_tx_in_signature_length() {
        let mut input = TxIn::unsigned(&OutPoint { tx_out_id: [1; 32], tx_out_index: 0 });
        assert!(validate_tx_in(&input).is_valid());
        input.signature = vec![1, 2, 3];
        assert!(!validate_tx_in(&input).is_valid());
    }

    #[test]
    fn test_check_tx_inputs_valid_with_fee() {
        let sk = secret(1);
        let (set, utxo) = funded(&derive_public_key(&sk), 100);
        let tx = create_transfer(&[utxo], &sk, &derive_public_key(&secret(2)), 60, 1).unwrap();

        let (result, fee) = check_tx_inputs(&tx, &set);
        assert_eq!(result, ValidationResult::Valid);
        assert_eq!(fee, 0); // change output returns the excess
        assert_eq!(tx.tx_outs.len(), 2);
        assert_eq!(tx.tx_outs[1].amount, 40);
    }

    #[test]
    fn test_check_tx_inputs_missing_utxo() {
        let sk = secret(1);
        let (_, utxo) = funded(&derive_public_key(&sk), 100);
        let tx = create_transfer(&[utxo], &sk, &derive_public_key(&secret(2)), 60, 1).unwrap();

        let (result, _) = check_tx_inputs(&tx, &UtxoSet::new());
        assert!(!result.is_valid());
    }

    #[test]
    fn test_check_tx_inputs_unsigned() {
        let sk = secret(1);
        let (set, utxo) = funded(&derive_public_key(&sk), 100);
        let tx = Transaction::new(
            vec![TxIn::unsigned(&utxo.outpoint())],
            vec![TxOut::new(derive_public_key(&secret(2)), 10)],
            1,
        );
        let (result, _) = check_tx_inputs(&tx, &set);
        assert!(matches!(result, ValidationResult::Invalid(ref r) if r.contains("not signed")));
    }

    #[test]
    fn test_check_tx_inputs_signed_by_stranger() {
        let owner = secret(1);
        let thief = secret(3);
        let (set, utxo) = funded(&derive_public_key(&owner), 100);
        let mut tx = Transaction::new(
            vec![TxIn::unsigned(&utxo.outpoint())],
            vec![TxOut::new(derive_public_key(&thief), 100)],
            1,
        );
        sign_inputs(&mut tx, &thief).unwrap();

        let (result, _) = check_tx_inputs(&tx, &set);
        assert!(matches!(result, ValidationResult::Invalid(ref r) if r.contains("signature")));
    }

    #[test]
    fn test_check_tx_inputs_overspend() {
        let sk = secret(1);
        let (set, utxo) = funded(&derive_public_key(&sk), 100);
        let mut tx = Transaction::new(
            vec![TxIn::unsigned(&utxo.outpoint())],
            vec![TxOut::new(derive_public_key(&secret(2)), 101)],
            1,
        );
        sign_inputs(&mut tx, &sk).unwrap();

        let (result, _) = check_tx_inputs(&tx, &set);
        assert!(!result.is_valid());
    }

    #[test]
    fn test_create_transfer_insufficient_balance() {
        let sk = secret(1);
        let (_, utxo) = funded(&derive_public_key(&sk), 100);
        let result = create_transfer(&[utxo], &sk, &derive_public_key(&secret(2)), 101, 1);
        assert!(matches!(result, Err(LedgerError::InvalidTransaction(_))));
    }

    #[test]
    fn test_create_transfer_exact_amount_has_no_change() {
        let sk = secret(1);
        let (_, utxo) = funded(&derive_public_key(&sk), 100);
        let tx = create_transfer(&[utxo], &sk, &derive_public_key(&secret(2)), 100, 1).unwrap();
        assert_eq!(tx.tx_outs.len(), 1);
    }

    #[test]
    fn test_create_transfer_zero_amount() {
        let sk = secret(1);
        let (_, utxo) = funded(&derive_public_key(&sk), 100);
        let result = create_transfer(&[utxo], &sk, &derive_public_key(&secret(2)), 0, 1);
        assert!(matches!(result, Err(LedgerError::InvalidTransaction(_))));
    }
}
