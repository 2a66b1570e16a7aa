//! Transaction validation functions from Orange Paper Section 5.1

use crate::coins::CoinView;
use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::script::{self, ScriptCheck, ScriptVerifier};
use crate::serialize::stripped_size;
use crate::types::*;
use std::collections::HashSet;

/// MoneyRange: ℤ → 𝔹
pub fn money_range(value: Integer) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

/// CheckTransaction: 𝒯𝒳 → {valid, invalid}
///
/// A transaction tx = (v, ins, outs, lt) is valid if and only if:
/// 1. |ins| > 0 ∧ |outs| > 0
/// 2. |tx|_stripped ≤ M_block_base
/// 3. ∀o ∈ outs: 0 ≤ o.value ≤ M_max ∧ Σ o.value ≤ M_max
/// 4. No two inputs spend the same outpoint
/// 5. Coinbase: 2 ≤ |ins[0].scriptSig| ≤ 100
/// 6. Otherwise: no input spends the null outpoint
pub fn check_transaction(tx: &Transaction) -> Result<()> {
    // 1. Check inputs and outputs are not empty
    if tx.inputs.is_empty() {
        return Err(ConsensusError::NoInputs);
    }
    if tx.outputs.is_empty() {
        return Err(ConsensusError::NoOutputs);
    }

    // 2. Check size limit
    let size = stripped_size(tx);
    if size > MAX_BLOCK_BASE_SIZE {
        return Err(ConsensusError::OversizedTransaction { size });
    }

    // 3. Check output values and their running total
    let mut value_out: Integer = 0;
    for (index, output) in tx.outputs.iter().enumerate() {
        if output.value < 0 {
            return Err(ConsensusError::NegativeOutput { index });
        }
        if output.value > MAX_MONEY {
            return Err(ConsensusError::OutputTooLarge { index });
        }
        value_out += output.value;
        if !money_range(value_out) {
            return Err(ConsensusError::OutputTotalTooLarge);
        }
    }

    // 4. Check for duplicate inputs
    let mut seen = HashSet::with_capacity(tx.inputs.len());
    if !tx.inputs.iter().all(|input| seen.insert(input.prevout)) {
        return Err(ConsensusError::DuplicateInputs);
    }

    // 5./6. Coinbase scriptSig bounds, or no null prevouts
    if is_coinbase(tx) {
        let length = tx.inputs[0].script_sig.len();
        if !(MIN_COINBASE_SCRIPT_SIG_SIZE..=MAX_COINBASE_SCRIPT_SIG_SIZE).contains(&length) {
            return Err(ConsensusError::BadCoinbaseLength { length });
        }
    } else if let Some(index) = tx.inputs.iter().position(|input| input.prevout.is_null()) {
        return Err(ConsensusError::NullPrevout { index });
    }

    Ok(())
}

/// Check if transaction is coinbase
pub fn is_coinbase(tx: &Transaction) -> bool {
    tx.inputs.len() == 1 && tx.inputs[0].prevout.is_null()
}

/// IsFinalTx: 𝒯𝒳 × ℕ × ℕ → 𝔹
///
/// 1. lt = 0: final
/// 2. lt below the threshold is a height, otherwise a time; final if lt < bound
/// 3. Otherwise final only if every input has the final sequence
pub fn is_final_tx(tx: &Transaction, block_height: Natural, block_time: Natural) -> bool {
    if tx.lock_time == 0 {
        return true;
    }

    let bound = if tx.lock_time < LOCKTIME_THRESHOLD {
        block_height
    } else {
        block_time
    };
    if (tx.lock_time as Natural) < bound {
        return true;
    }

    tx.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// Sigops in all scriptSigs and scriptPubKeys, counted without context
pub fn get_legacy_sigop_count(tx: &Transaction) -> u32 {
    let inputs: u32 = tx.inputs.iter().map(|input| script::get_sigop_count(&input.script_sig, false)).sum();
    let outputs: u32 = tx.outputs.iter().map(|output| script::get_sigop_count(&output.script_pubkey, false)).sum();
    inputs + outputs
}

/// Sigops in the redeem scripts of P2SH inputs
pub fn get_p2sh_sigop_count<V: CoinView + ?Sized>(tx: &Transaction, view: &V) -> u32 {
    if is_coinbase(tx) {
        return 0;
    }
    tx.inputs
        .iter()
        .filter_map(|input| {
            let coin = view.get(&input.prevout)?;
            if !script::is_pay_to_script_hash(&coin.script_pubkey) || !script::is_push_only(&input.script_sig) {
                return None;
            }
            script::last_push(&input.script_sig).map(|redeem| script::get_sigop_count(redeem, true))
        })
        .sum()
}

fn count_witness_sigops(input: &TransactionInput, script_pubkey: &[u8], flags: u32) -> u32 {
    if flags & SCRIPT_VERIFY_WITNESS == 0 {
        return 0;
    }
    if let Some((version, program)) = script::witness_program(script_pubkey) {
        return script::witness_sigop_count(version, program, &input.witness);
    }
    if script::is_pay_to_script_hash(script_pubkey) && script::is_push_only(&input.script_sig) {
        if let Some((version, program)) = script::last_push(&input.script_sig).and_then(script::witness_program) {
            return script::witness_sigop_count(version, program, &input.witness);
        }
    }
    0
}

/// GetTransactionSigOpCost: 𝒯𝒳 × 𝒰𝒮 × ℕ → ℕ
///
/// 1. Legacy sigops scaled by the witness factor
/// 2. Coinbase: stop there
/// 3. P2SH sigops scaled by the witness factor (if P2SH is active)
/// 4. Witness sigops counted once each (if witness is active)
pub fn get_transaction_sigop_cost<V: CoinView + ?Sized>(tx: &Transaction, view: &V, flags: u32) -> u64 {
    let mut cost = get_legacy_sigop_count(tx) as u64 * WITNESS_SCALE_FACTOR;

    if is_coinbase(tx) {
        return cost;
    }

    if flags & SCRIPT_VERIFY_P2SH != 0 {
        cost += get_p2sh_sigop_count(tx, view) as u64 * WITNESS_SCALE_FACTOR;
    }

    for input in &tx.inputs {
        if let Some(coin) = view.get(&input.prevout) {
            cost += count_witness_sigops(input, &coin.script_pubkey, flags) as u64;
        }
    }

    cost
}

/// CheckTxInputs: 𝒯𝒳 × 𝒰𝒮 × ℕ → ℤ
///
/// For transaction tx with UTXO set us at spend height h:
/// 1. If tx is coinbase: return 0
/// 2. ∀i ∈ ins: us(i.prevout) exists, and coinbase coins have ≥ 100 confirmations
/// 3. Let total_in = Σᵢ us(i.prevout).value, within money range
/// 4. If total_in < total_out: invalid
/// 5. Return total_in - total_out
pub fn check_tx_inputs<V: CoinView + ?Sized>(tx: &Transaction, view: &V, spend_height: Natural) -> Result<Integer> {
    if is_coinbase(tx) {
        return Ok(0);
    }

    let mut value_in: Integer = 0;
    for (index, input) in tx.inputs.iter().enumerate() {
        let coin = view.get(&input.prevout).ok_or(ConsensusError::MissingInputs { index })?;

        if coin.is_coinbase {
            let depth = spend_height.saturating_sub(coin.height);
            if depth < COINBASE_MATURITY {
                return Err(ConsensusError::PrematureCoinbaseSpend { depth });
            }
        }

        value_in = value_in.saturating_add(coin.value);
        if !money_range(coin.value) || !money_range(value_in) {
            return Err(ConsensusError::InputValuesOutOfRange);
        }
    }

    let mut value_out: Integer = 0;
    for output in &tx.outputs {
        value_out = output
            .value
            .checked_add(value_out)
            .filter(|total| money_range(output.value) && money_range(*total))
            .ok_or(ConsensusError::OutputTotalTooLarge)?;
    }
    if value_in < value_out {
        return Err(ConsensusError::InputsBelowOutputs { value_in, value_out });
    }

    let fee = value_in - value_out;
    if !money_range(fee) {
        return Err(ConsensusError::FeeOutOfRange);
    }
    Ok(fee)
}

/// Run the script verifier over every input.
///
/// Returns the index of the first failing input (or of the first input
/// whose coin cannot be found).
pub fn verify_input_scripts<V: CoinView + ?Sized>(
    tx: &Transaction,
    view: &V,
    flags: u32,
    verifier: &dyn ScriptVerifier,
) -> std::result::Result<(), usize> {
    for (index, input) in tx.inputs.iter().enumerate() {
        let coin = view.get(&input.prevout).ok_or(index)?;
        let check = ScriptCheck { tx, input_index: index, amount: coin.value };
        if !verifier.verify(&input.script_sig, &coin.script_pubkey, flags, &check) {
            return Err(index);
        }
    }
    Ok(())
}
