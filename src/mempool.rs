//! Mempool admission: AcceptToMemoryPool
//!
//! Admission runs in two phases against the shared index. The read phase
//! holds a read guard and performs every check; it never mutates the pool.
//! The write phase takes the write guard, re-runs the read phase if the pool
//! changed in between, then evicts conflicts, inserts the entry and trims the
//! pool back under its size limit.

use crate::coins::{CoinView, MempoolCoinView};
use crate::config::MempoolConfig;
use crate::constants::*;
use crate::error::MempoolError;
use crate::policy::{allow_free, are_inputs_standard, calculate_modified_size, compute_priority, is_standard_tx, FeeRate};
use crate::script::ScriptVerifier;
use crate::serialize::{calculate_tx_id, hash_to_hex, stripped_size};
use crate::transaction::{
    check_transaction, check_tx_inputs, get_transaction_sigop_cost, is_coinbase, is_final_tx, verify_input_scripts,
};
use crate::txmempool::{MempoolEntry, TxMemPool};
use crate::types::*;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Per-call admission switches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptOptions {
    /// Apply the free-transaction rate limiter to below-relay-fee transactions
    pub limit_free: bool,
    /// Skip expiry and trimming after insertion
    pub override_mempool_limit: bool,
    /// Reject when the fee exceeds this many satoshis
    pub absurd_fee: Option<Integer>,
    /// Entry time; defaults to the chain's adjusted time
    pub accept_time: Option<Natural>,
}

impl Default for AcceptOptions {
    fn default() -> Self {
        AcceptOptions { limit_free: true, override_mempool_limit: false, absurd_fee: None, accept_time: None }
    }
}

/// Result of an admission attempt that was not rejected
#[derive(Debug, Clone, PartialEq)]
pub enum AcceptOutcome {
    Accepted {
        txid: Hash,
        fee: Integer,
        vsize: u64,
        /// Pool transactions evicted by this replacement
        replaced: Vec<Hash>,
    },
    /// Some inputs refer to transactions neither confirmed nor pooled.
    /// Not a rejection: retry once the parents arrive.
    MissingInputs { parents: Vec<Hash> },
}

/// Outcome of the read phase
#[derive(Debug, Clone)]
pub enum Admission {
    Ready(MempoolValidationContext),
    MissingInputs { parents: Vec<Hash> },
}

/// Everything the read phase established about one transaction
#[derive(Debug, Clone)]
pub struct MempoolValidationContext {
    txid: Hash,
    entry: MempoolEntry,
    modified_fees: Integer,
    conflicts: HashSet<Hash>,
    ancestors: HashSet<Hash>,
    replacement: Replacement,
    is_free: bool,
}

impl MempoolValidationContext {
    pub fn txid(&self) -> &Hash {
        &self.txid
    }

    pub fn entry(&self) -> &MempoolEntry {
        &self.entry
    }

    pub fn fees(&self) -> Integer {
        self.entry.fee()
    }

    pub fn modified_fees(&self) -> Integer {
        self.modified_fees
    }

    /// Virtual size
    pub fn entry_size(&self) -> u64 {
        self.entry.size()
    }

    /// Pool transactions spending the same outpoints
    pub fn conflicts(&self) -> &HashSet<Hash> {
        &self.conflicts
    }

    pub fn ancestors(&self) -> &HashSet<Hash> {
        &self.ancestors
    }

    /// Conflicts plus all their descendants
    pub fn all_conflicting(&self) -> &HashSet<Hash> {
        &self.replacement.all_conflicting
    }

    pub fn conflicting_fees(&self) -> Integer {
        self.replacement.conflicting_fees
    }

    pub fn conflicting_size(&self) -> u64 {
        self.replacement.conflicting_size
    }

    /// Pays less than the minimum relay fee
    pub fn is_free(&self) -> bool {
        self.is_free
    }
}

#[derive(Debug, Clone, Default)]
struct Replacement {
    all_conflicting: HashSet<Hash>,
    conflicting_fees: Integer,
    conflicting_size: u64,
}

/// What the input stage learned from the coin view
struct InputSummary {
    fee: Integer,
    priority: f64,
    in_chain_input_value: Integer,
    spends_coinbase: bool,
    sigop_cost: u64,
}

pub struct MempoolValidator {
    pool: Arc<RwLock<TxMemPool>>,
    verifier: Arc<dyn ScriptVerifier>,
    config: MempoolConfig,
}

impl MempoolValidator {
    pub fn new(pool: Arc<RwLock<TxMemPool>>, verifier: Arc<dyn ScriptVerifier>, config: MempoolConfig) -> Self {
        MempoolValidator { pool, verifier, config }
    }

    /// Fresh empty pool configured from `config`
    pub fn with_config(verifier: Arc<dyn ScriptVerifier>, config: MempoolConfig) -> Self {
        let pool = Arc::new(RwLock::new(TxMemPool::new(config.incremental_fee())));
        MempoolValidator::new(pool, verifier, config)
    }

    pub fn pool(&self) -> &Arc<RwLock<TxMemPool>> {
        &self.pool
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    /// AcceptToMemoryPool: 𝒯𝒳 × 𝒰𝒮 → {accepted, missing-inputs, rejected}
    ///
    /// `coins` is the confirmed UTXO set; pool outputs are layered on top.
    pub fn accept_to_memory_pool<V: CoinView + ?Sized>(
        &self,
        tx: &Transaction,
        coins: &V,
        chain: &ChainContext,
        options: AcceptOptions,
    ) -> Result<AcceptOutcome, MempoolError> {
        let result = self.accept_worker(tx, coins, chain, &options);
        if let Err(e) = &result {
            debug!(
                txid = %hash_to_hex(&calculate_tx_id(tx)),
                reason = e.reject_reason(),
                category = ?e.category(),
                "transaction rejected: {}", e
            );
        }
        result
    }

    /// Run only the read phase, leaving the pool untouched
    pub fn check_admission<V: CoinView + ?Sized>(
        &self,
        tx: &Transaction,
        coins: &V,
        chain: &ChainContext,
        options: &AcceptOptions,
    ) -> Result<Admission, MempoolError> {
        let pool = self.pool.read();
        self.read_phase(&pool, tx, coins, chain, options)
    }

    fn accept_worker<V: CoinView + ?Sized>(
        &self,
        tx: &Transaction,
        coins: &V,
        chain: &ChainContext,
        options: &AcceptOptions,
    ) -> Result<AcceptOutcome, MempoolError> {
        let (context, revision) = {
            let pool = self.pool.read();
            match self.read_phase(&pool, tx, coins, chain, options)? {
                Admission::Ready(context) => (context, pool.revision()),
                Admission::MissingInputs { parents } => return Ok(AcceptOutcome::MissingInputs { parents }),
            }
        };

        let mut pool = self.pool.write();
        let context = if pool.revision() == revision {
            context
        } else {
            debug!(txid = %hash_to_hex(context.txid()), "mempool changed during validation, rechecking");
            match self.read_phase(&pool, tx, coins, chain, options)? {
                Admission::Ready(context) => context,
                Admission::MissingInputs { parents } => return Ok(AcceptOutcome::MissingInputs { parents }),
            }
        };

        let now = options.accept_time.unwrap_or(chain.adjusted_time);
        self.write_phase(&mut pool, context, options, now)
    }

    // ========================================================================
    // READ PHASE
    // ========================================================================

    fn read_phase<V: CoinView + ?Sized>(
        &self,
        pool: &TxMemPool,
        tx: &Transaction,
        coins: &V,
        chain: &ChainContext,
        options: &AcceptOptions,
    ) -> Result<Admission, MempoolError> {
        let now = options.accept_time.unwrap_or(chain.adjusted_time);
        let txid = calculate_tx_id(tx);

        check_transaction(tx)?;

        // Coinbase is only valid in a block
        if is_coinbase(tx) {
            return Err(MempoolError::Coinbase);
        }

        if self.config.require_standard {
            is_standard_tx(tx, &self.config).map_err(|reason| MempoolError::NonStandard { reason })?;
        }

        // Only transactions that could be mined in the next block
        if !is_final_tx(tx, chain.next_height(), chain.median_time_past) {
            return Err(MempoolError::NonFinal);
        }

        if pool.exists(&txid) {
            return Err(MempoolError::AlreadyInMempool);
        }

        let conflicts = self.find_conflicts(pool, tx)?;

        let view = MempoolCoinView::new(coins, pool);
        if view.have_coins(&txid) {
            return Err(MempoolError::AlreadyKnown);
        }
        let mut parents = Vec::new();
        for input in &tx.inputs {
            if view.have_coin(&input.prevout) || parents.contains(&input.prevout.hash) {
                continue;
            }
            if !view.have_coins(&input.prevout.hash) {
                parents.push(input.prevout.hash);
            }
        }
        if !parents.is_empty() {
            return Ok(Admission::MissingInputs { parents });
        }

        let inputs = self.check_inputs(tx, &view, chain)?;

        let mut entry = MempoolEntry::new(
            tx.clone(),
            inputs.fee,
            now,
            inputs.priority,
            chain.height,
            inputs.in_chain_input_value,
            inputs.spends_coinbase,
            inputs.sigop_cost,
        );
        let entry_size = entry.size();

        let mut priority_delta = 0.0;
        let mut modified_fees = inputs.fee;
        pool.apply_deltas(&txid, &mut priority_delta, &mut modified_fees);
        if priority_delta != 0.0 {
            entry = MempoolEntry::new(
                tx.clone(),
                inputs.fee,
                now,
                inputs.priority + priority_delta,
                chain.height,
                inputs.in_chain_input_value,
                inputs.spends_coinbase,
                inputs.sigop_cost,
            );
        }

        let is_free = self.check_fees(pool, &entry, modified_fees, chain, now)?;

        if let Some(limit) = options.absurd_fee {
            if inputs.fee > limit {
                return Err(MempoolError::AbsurdFee { fee: inputs.fee, limit });
            }
        }

        let ancestors = pool
            .calculate_mempool_ancestors(tx, entry_size, &self.config.ancestor_limits())
            .map_err(|detail| MempoolError::TooLongChain { detail })?;

        // A transaction may not spend outputs of what it replaces
        if let Some(ancestor) = ancestors.iter().find(|a| conflicts.contains(*a)) {
            return Err(MempoolError::SpendsConflictingTx { ancestor: *ancestor });
        }

        let replacement = self.check_replacement(pool, tx, &conflicts, modified_fees, entry_size)?;

        self.check_scripts(tx, &view, &txid)?;

        Ok(Admission::Ready(MempoolValidationContext {
            txid,
            entry,
            modified_fees,
            conflicts,
            ancestors,
            replacement,
            is_free,
        }))
    }

    /// Pool transactions spending any of the same outpoints.
    ///
    /// A conflict may be replaced only if every one of its inputs opts in
    /// with a sequence below `0xfffffffe`.
    fn find_conflicts(&self, pool: &TxMemPool, tx: &Transaction) -> Result<HashSet<Hash>, MempoolError> {
        let mut conflicts = HashSet::new();
        for input in &tx.inputs {
            let Some(conflict) = pool.spender(&input.prevout) else {
                continue;
            };
            if conflicts.contains(conflict) {
                continue;
            }

            let replaceable = self.config.enable_replacement
                && pool.get(conflict).is_some_and(|entry| {
                    entry.tx().inputs.iter().all(|txin| txin.sequence <= MAX_BIP125_RBF_SEQUENCE)
                });
            if !replaceable {
                return Err(MempoolError::ReplacementDisabled);
            }
            conflicts.insert(*conflict);
        }
        Ok(conflicts)
    }

    fn check_inputs<V: CoinView + ?Sized>(
        &self,
        tx: &Transaction,
        view: &MempoolCoinView<'_, V>,
        chain: &ChainContext,
    ) -> Result<InputSummary, MempoolError> {
        if !view.have_inputs(tx) {
            return Err(MempoolError::InputsSpent);
        }
        if self.config.require_standard && !are_inputs_standard(tx, view) {
            return Err(MempoolError::NonStandardInputs);
        }

        let fee = check_tx_inputs(tx, view, chain.next_height())?;

        let mut coin_age = 0.0;
        let mut in_chain_input_value: Integer = 0;
        let mut spends_coinbase = false;
        for coin in view.spent_coins(tx).into_iter().flatten() {
            spends_coinbase |= coin.is_coinbase;
            if coin.height <= chain.height {
                coin_age += coin.value as f64 * (chain.height - coin.height) as f64;
                in_chain_input_value += coin.value;
            }
        }
        let modified_size = calculate_modified_size(tx, stripped_size(tx) as u64);
        let priority = compute_priority(coin_age, modified_size);

        let sigop_cost = get_transaction_sigop_cost(tx, view, STANDARD_SCRIPT_VERIFY_FLAGS);
        if sigop_cost > MAX_BLOCK_SIGOPS_COST {
            return Err(MempoolError::TooManySigops { cost: sigop_cost });
        }

        Ok(InputSummary { fee, priority, in_chain_input_value, spends_coinbase, sigop_cost })
    }

    /// Dynamic minimum fee, then the relay fee or enough priority to go free.
    /// Returns whether the transaction pays below the relay fee.
    fn check_fees(
        &self,
        pool: &TxMemPool,
        entry: &MempoolEntry,
        modified_fees: Integer,
        chain: &ChainContext,
        now: Natural,
    ) -> Result<bool, MempoolError> {
        let size = entry.size();
        let reject_fee = pool.get_min_fee(self.config.max_mempool_bytes(), now).get_fee(size);
        let relay_fee = self.config.min_relay_fee().get_fee(size);

        if reject_fee > 0 && modified_fees < reject_fee {
            return Err(MempoolError::MinFeeNotMet { fee: modified_fees, required: reject_fee });
        }
        if self.config.relay_priority && modified_fees < relay_fee && !allow_free(entry.priority(chain.next_height())) {
            return Err(MempoolError::InsufficientPriority);
        }
        Ok(modified_fees < relay_fee)
    }

    /// Replace-by-fee economics (BIP125 rules 2 to 4)
    fn check_replacement(
        &self,
        pool: &TxMemPool,
        tx: &Transaction,
        conflicts: &HashSet<Hash>,
        modified_fees: Integer,
        entry_size: u64,
    ) -> Result<Replacement, MempoolError> {
        let mut replacement = Replacement::default();
        if conflicts.is_empty() {
            return Ok(replacement);
        }

        let new_fee_rate = FeeRate::new(modified_fees, entry_size);
        let mut conflict_parents = HashSet::new();
        let mut conflicting_count = 0u64;

        for conflict in conflicts {
            let Some(entry) = pool.get(conflict) else {
                continue;
            };

            // Replacements may not lower the feerate of the pool
            let old_fee_rate = entry.fee_rate();
            if new_fee_rate <= old_fee_rate {
                return Err(MempoolError::ReplacementFeeRateTooLow {
                    conflict: *conflict,
                    new_rate: new_fee_rate.per_k(),
                    old_rate: old_fee_rate.per_k(),
                });
            }

            conflict_parents.extend(entry.tx().inputs.iter().map(|input| input.prevout.hash));
            conflicting_count += entry.count_with_descendants();
        }

        if conflicting_count > self.config.max_replacement_evictions {
            return Err(MempoolError::TooManyReplacements {
                count: conflicting_count,
                max: self.config.max_replacement_evictions,
            });
        }

        for conflict in conflicts {
            pool.calculate_descendants(conflict, &mut replacement.all_conflicting);
        }
        for entry in replacement.all_conflicting.iter().filter_map(|txid| pool.get(txid)) {
            replacement.conflicting_fees += entry.modified_fee();
            replacement.conflicting_size += entry.size();
        }

        // New inputs must be confirmed
        for (index, input) in tx.inputs.iter().enumerate() {
            if !conflict_parents.contains(&input.prevout.hash) && pool.exists(&input.prevout.hash) {
                return Err(MempoolError::ReplacementAddsUnconfirmed { index });
            }
        }

        if modified_fees < replacement.conflicting_fees {
            return Err(MempoolError::ReplacementFeeTooLow {
                fee: modified_fees,
                conflicting_fees: replacement.conflicting_fees,
            });
        }

        // The replacement pays for its own relay
        let delta = modified_fees - replacement.conflicting_fees;
        let required = self.config.min_relay_fee().get_fee(entry_size);
        if delta < required {
            return Err(MempoolError::ReplacementRelayFeeNotPaid { delta, required });
        }

        Ok(replacement)
    }

    /// Verify under standard flags, then again under the mandatory flags alone.
    /// Passing standard but failing mandatory means the verifier is broken.
    fn check_scripts<V: CoinView + ?Sized>(
        &self,
        tx: &Transaction,
        view: &MempoolCoinView<'_, V>,
        txid: &Hash,
    ) -> Result<(), MempoolError> {
        let verifier = self.verifier.as_ref();
        if let Err(index) = verify_input_scripts(tx, view, STANDARD_SCRIPT_VERIFY_FLAGS, verifier) {
            return match verify_input_scripts(tx, view, MANDATORY_SCRIPT_VERIFY_FLAGS, verifier) {
                Err(index) => Err(crate::error::ConsensusError::MandatoryScriptVerifyFailed { index }.into()),
                Ok(()) => Err(MempoolError::NonMandatoryScriptFailure { index }),
            };
        }

        if let Err(index) = verify_input_scripts(tx, view, MANDATORY_SCRIPT_VERIFY_FLAGS, verifier) {
            let detail = format!(
                "input {} of {} failed mandatory flags after passing standard flags",
                index,
                hash_to_hex(txid)
            );
            error!(txid = %hash_to_hex(txid), index, "script verification diverged between flag sets");
            return Err(MempoolError::InternalInvariant { detail });
        }
        Ok(())
    }

    // ========================================================================
    // WRITE PHASE
    // ========================================================================

    fn write_phase(
        &self,
        pool: &mut TxMemPool,
        context: MempoolValidationContext,
        options: &AcceptOptions,
        now: Natural,
    ) -> Result<AcceptOutcome, MempoolError> {
        let entry_size = context.entry_size();

        // Penny-flooding guard for transactions below the relay fee
        if options.limit_free && context.is_free {
            let limit = self.config.limit_free_relay_kb_per_min;
            if !pool.free_limiter_mut().allow(now, entry_size, limit) {
                return Err(MempoolError::RateLimited);
            }
        }

        for replaced in &context.replacement.all_conflicting {
            info!(
                replaced = %hash_to_hex(replaced),
                by = %hash_to_hex(&context.txid),
                fee_delta = context.modified_fees - context.replacement.conflicting_fees,
                size_delta = entry_size as i64 - context.replacement.conflicting_size as i64,
                "replacing transaction"
            );
        }
        pool.remove_staged(&context.replacement.all_conflicting, false);

        let txid = context.txid;
        let fee = context.entry.fee();
        let mut replaced: Vec<Hash> = context.replacement.all_conflicting.into_iter().collect();
        replaced.sort_unstable();
        pool.add_unchecked(context.entry, &context.ancestors);

        if !options.override_mempool_limit {
            self.limit_mempool_size(pool, now);
            if !pool.exists(&txid) {
                return Err(MempoolError::MempoolFull);
            }
        }

        debug!(txid = %hash_to_hex(&txid), fee, vsize = entry_size, pool_size = pool.size(), "accepted to mempool");
        Ok(AcceptOutcome::Accepted { txid, fee, vsize: entry_size, replaced })
    }

    fn limit_mempool_size(&self, pool: &mut TxMemPool, now: Natural) {
        let expired = pool.expire(now.saturating_sub(self.config.expiry_seconds()));
        if expired > 0 {
            info!(expired, "expired transactions from the memory pool");
        }

        let limit = self.config.max_mempool_bytes();
        pool.update_rolling_fee(limit, now);
        pool.trim_to_size(limit);
    }
}
