//! Relay policy: fee rates, standardness, dust and priority
//!
//! None of these rules are consensus. A transaction failing them can still
//! be valid in a block; the mempool just refuses to relay it.

use crate::coins::CoinView;
use crate::config::MempoolConfig;
use crate::constants::*;
use crate::script::{self, ScriptType};
use crate::segwit::calculate_transaction_weight;
use crate::serialize::varint_len;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fee rate in satoshis per 1000 bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeeRate {
    satoshis_per_k: Integer,
}

impl FeeRate {
    pub fn from_per_k(satoshis_per_k: Integer) -> Self {
        FeeRate { satoshis_per_k }
    }

    /// Rate of paying `fee` for `size` bytes
    pub fn new(fee: Integer, size: u64) -> Self {
        if size == 0 {
            return FeeRate::default();
        }
        FeeRate { satoshis_per_k: (fee as i128 * 1000 / size as i128) as Integer }
    }

    pub fn per_k(&self) -> Integer {
        self.satoshis_per_k
    }

    /// Fee for `size` bytes; never rounds a positive rate down to zero
    pub fn get_fee(&self, size: u64) -> Integer {
        let fee = (self.satoshis_per_k as i128 * size as i128 / 1000) as Integer;
        if fee == 0 && self.satoshis_per_k > 0 {
            self.satoshis_per_k
        } else {
            fee
        }
    }
}

impl std::ops::Add for FeeRate {
    type Output = FeeRate;

    fn add(self, other: FeeRate) -> FeeRate {
        FeeRate { satoshis_per_k: self.satoshis_per_k + other.satoshis_per_k }
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat/kB", self.satoshis_per_k)
    }
}

/// Size used for priority: inputs are discounted by their outpoint and
/// (up to 110 bytes of) scriptSig so spending many coins is not penalized.
pub fn calculate_modified_size(tx: &Transaction, size: u64) -> u64 {
    let discount: u64 = tx
        .inputs
        .iter()
        .map(|input| 41 + (input.script_sig.len() as u64).min(110))
        .sum();
    if size > discount {
        size - discount
    } else {
        size
    }
}

/// Coin-age priority: Σ value × depth / modified size
pub fn compute_priority(coin_age: f64, modified_size: u64) -> f64 {
    if modified_size == 0 {
        return 0.0;
    }
    coin_age / modified_size as f64
}

/// High enough priority to relay without a fee
pub fn allow_free(priority: f64) -> bool {
    priority > FREE_PRIORITY_THRESHOLD
}

/// Outputs worth less than three times the fee to spend them are dust
pub fn is_dust(output: &TransactionOutput, min_relay_fee: FeeRate) -> bool {
    if script::is_null_data(&output.script_pubkey) {
        return false;
    }
    let output_size = 8 + varint_len(output.script_pubkey.len() as u64) + output.script_pubkey.len();
    // Spending input: outpoint, sequence and a typical signature, witness-discounted when possible
    let spend_size = if script::witness_program(&output.script_pubkey).is_some() {
        32 + 4 + 1 + (107 / WITNESS_SCALE_FACTOR as usize) + 4
    } else {
        32 + 4 + 1 + 107 + 4
    };
    output.value < 3 * min_relay_fee.get_fee((output_size + spend_size) as u64)
}

/// IsStandardTx: 𝒯𝒳 → {standard, reason}
///
/// 1. Version within the relayed range
/// 2. Weight ≤ 400,000
/// 3. Every scriptSig is push-only and ≤ 1,650 bytes
/// 4. Every output matches a known template; bare multisig only up to 3 keys
/// 5. At most one null-data output, and no dust
pub fn is_standard_tx(tx: &Transaction, config: &MempoolConfig) -> std::result::Result<(), &'static str> {
    if tx.version < MIN_STANDARD_TX_VERSION || tx.version > MAX_STANDARD_TX_VERSION {
        return Err("version");
    }

    if calculate_transaction_weight(tx) > MAX_STANDARD_TX_WEIGHT {
        return Err("tx-size");
    }

    for input in &tx.inputs {
        if input.script_sig.len() > MAX_STANDARD_SCRIPTSIG_SIZE {
            return Err("scriptsig-size");
        }
        if !script::is_push_only(&input.script_sig) {
            return Err("scriptsig-not-pushonly");
        }
    }

    let min_relay_fee = config.min_relay_fee();
    let mut null_data = 0;
    for output in &tx.outputs {
        match script::classify_script(&output.script_pubkey) {
            ScriptType::NonStandard => return Err("scriptpubkey"),
            ScriptType::MultiSig { required, keys } => {
                if keys > 3 || required < 1 {
                    return Err("scriptpubkey");
                }
                if !config.permit_bare_multisig {
                    return Err("bare-multisig");
                }
            }
            ScriptType::NullData => {
                if output.script_pubkey.len() > config.max_op_return_bytes {
                    return Err("scriptpubkey");
                }
                null_data += 1;
                continue;
            }
            _ => {}
        }
        if is_dust(output, min_relay_fee) {
            return Err("dust");
        }
    }

    if null_data > 1 {
        return Err("multi-op-return");
    }

    Ok(())
}

/// AreInputsStandard: spent outputs match known templates, and P2SH
/// redeem scripts stay within the standard sigop budget.
pub fn are_inputs_standard<V: CoinView + ?Sized>(tx: &Transaction, view: &V) -> bool {
    if crate::transaction::is_coinbase(tx) {
        return true;
    }

    tx.inputs.iter().all(|input| {
        let Some(coin) = view.get(&input.prevout) else {
            return false;
        };
        match script::classify_script(&coin.script_pubkey) {
            ScriptType::NonStandard | ScriptType::NullData => false,
            ScriptType::ScriptHash => match script::last_push(&input.script_sig) {
                Some(redeem) => script::get_sigop_count(redeem, true) <= MAX_P2SH_SIGOPS,
                None => false,
            },
            _ => true,
        }
    })
}
