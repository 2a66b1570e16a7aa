//! Block validation functions from Orange Paper Section 5.3
//!
//! Split the way block acceptance runs them: context-free header and block
//! checks first, then the checks that need the chain tip.

use crate::config::ConsensusParams;
use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::merkle::block_merkle_root;
use crate::pow::check_proof_of_work;
use crate::script::push_int;
use crate::segwit::{calculate_block_weight, check_witness_commitment};
use crate::serialize::block_stripped_size;
use crate::transaction::{check_transaction, get_legacy_sigop_count, is_coinbase, is_final_tx};
use crate::types::*;

/// CheckBlockHeader: ℋ → {valid, invalid}
///
/// The header hash must meet the target its own `bits` encode, and that
/// target may not be easier than the network limit.
pub fn check_block_header(header: &BlockHeader, params: &ConsensusParams) -> Result<()> {
    check_proof_of_work(header, params.pow_limit_bits)
}

/// CheckBlock: ℬ → {valid, invalid}
///
/// For block b = (h, txs):
/// 1. MerkleRoot(txs) = h.merkle_root and the tree is not mutated
/// 2. 1 ≤ |txs| ≤ 1,000,000 and |b|_stripped ≤ 1,000,000
/// 3. txs[0] is coinbase and no other tx is
/// 4. ∀ tx ∈ txs: CheckTransaction(tx)
/// 5. Σ legacy sigops × 4 ≤ 80,000
pub fn check_block(block: &Block) -> Result<()> {
    let (root, mutated) = block_merkle_root(block);
    if root != block.header.merkle_root {
        return Err(ConsensusError::BadMerkleRoot);
    }
    // A duplicated subtree yields the same root as the honest block, so the
    // block hash must not be marked invalid on this error.
    if mutated {
        return Err(ConsensusError::DuplicateTransactions);
    }

    if block.transactions.is_empty()
        || block.transactions.len() > MAX_BLOCK_BASE_SIZE
        || block_stripped_size(block) > MAX_BLOCK_BASE_SIZE
    {
        return Err(ConsensusError::BadBlockLength);
    }

    if !is_coinbase(&block.transactions[0]) {
        return Err(ConsensusError::MissingCoinbase);
    }
    if let Some(index) = block.transactions.iter().skip(1).position(is_coinbase) {
        return Err(ConsensusError::MultipleCoinbase { index: index + 1 });
    }

    for tx in &block.transactions {
        check_transaction(tx)?;
    }

    let sigops: u64 = block.transactions.iter().map(|tx| get_legacy_sigop_count(tx) as u64).sum();
    let cost = sigops * WITNESS_SCALE_FACTOR;
    if cost > MAX_BLOCK_SIGOPS_COST {
        return Err(ConsensusError::BadBlockSigops { cost });
    }

    Ok(())
}

/// ContextualCheckBlockHeader: ℋ × 𝒞 → {valid, invalid}
///
/// 1. h.bits = next work required
/// 2. MTP < h.timestamp ≤ adjusted time + 2 hours
/// 3. h.version ≥ minimum version for the height
pub fn contextual_check_block_header(header: &BlockHeader, flags: &ConsensusFlags, ctx: &ChainContext) -> Result<()> {
    if header.bits != ctx.next_work_required {
        return Err(ConsensusError::BadDiffBits { actual: header.bits, expected: ctx.next_work_required });
    }

    let timestamp = header.timestamp as Natural;
    if timestamp <= ctx.median_time_past {
        return Err(ConsensusError::TimeTooOld);
    }
    if timestamp > ctx.adjusted_time + MAX_FUTURE_BLOCK_TIME {
        return Err(ConsensusError::TimeTooNew);
    }

    if header.version < flags.min_block_version {
        return Err(ConsensusError::BadVersion { version: header.version, minimum: flags.min_block_version });
    }

    Ok(())
}

/// ContextualCheckBlock: ℬ × 𝒞 → {valid, invalid}
///
/// For block b at height n = tip + 1:
/// 1. ∀ tx ∈ txs: IsFinalTx(tx, n, cutoff), cutoff = MTP under BIP113, else h.timestamp
/// 2. BIP34: coinbase scriptSig starts with the push of n
/// 3. Witness commitment valid (or no witness data when witness is inactive)
/// 4. Weight(b) ≤ 4,000,000
pub fn contextual_check_block(block: &Block, flags: &ConsensusFlags, ctx: &ChainContext) -> Result<()> {
    let height = ctx.next_height();
    let cutoff = if flags.locktime_median_time_past {
        ctx.median_time_past
    } else {
        block.header.timestamp as Natural
    };

    for (index, tx) in block.transactions.iter().enumerate() {
        if !is_final_tx(tx, height, cutoff) {
            return Err(ConsensusError::NonFinalTransaction { index });
        }
    }

    if flags.enforce_bip34 {
        let expected = push_int(height as i64);
        let starts_with_height = block
            .transactions
            .first()
            .and_then(|coinbase| coinbase.inputs.first())
            .is_some_and(|input| input.script_sig.starts_with(&expected));
        if !starts_with_height {
            return Err(ConsensusError::BadCoinbaseHeight);
        }
    }

    if flags.witness_active() {
        check_witness_commitment(block)?;
    } else if block.transactions.iter().any(Transaction::has_witness) {
        return Err(ConsensusError::UnexpectedWitness);
    }

    let weight = calculate_block_weight(block);
    if weight > MAX_BLOCK_WEIGHT {
        return Err(ConsensusError::BadBlockWeight { weight });
    }

    Ok(())
}
