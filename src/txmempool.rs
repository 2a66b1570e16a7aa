//! The pending-transaction index
//!
//! Entries are linked to their in-pool parents and children. Each entry
//! caches the aggregate count, size and modified fee of itself plus all of
//! its descendants, and of itself plus all of its ancestors, so package
//! limits are checked without re-walking the graph. An ordered index by
//! descendant score (the better of the entry's own fee rate and its
//! package fee rate) drives eviction: the lowest-scoring package goes first.

use crate::constants::*;
use crate::policy::FeeRate;
use crate::serialize::{calculate_tx_id, hash_to_hex, stripped_size};
use crate::segwit::virtual_size;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// Package ceilings applied when a transaction joins the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorLimits {
    /// Maximum in-pool ancestors, counting the transaction itself
    pub ancestor_count: u64,
    /// Maximum virtual size of the transaction plus its ancestors
    pub ancestor_size: u64,
    /// Maximum descendants of any ancestor, counting the ancestor itself
    pub descendant_count: u64,
    pub descendant_size: u64,
}

impl AncestorLimits {
    pub fn unlimited() -> Self {
        AncestorLimits {
            ancestor_count: u64::MAX,
            ancestor_size: u64::MAX,
            descendant_count: u64::MAX,
            descendant_size: u64::MAX,
        }
    }
}

/// A transaction in the pool together with its cached package aggregates
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    tx: Transaction,
    txid: Hash,
    fee: Integer,
    size: u64,
    modified_size: u64,
    time: Natural,
    entry_priority: f64,
    entry_height: Natural,
    in_chain_input_value: Integer,
    spends_coinbase: bool,
    sigop_cost: u64,
    fee_delta: Integer,

    count_with_descendants: u64,
    size_with_descendants: u64,
    mod_fees_with_descendants: Integer,

    count_with_ancestors: u64,
    size_with_ancestors: u64,
    mod_fees_with_ancestors: Integer,
    sigop_cost_with_ancestors: u64,
}

impl MempoolEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tx: Transaction,
        fee: Integer,
        time: Natural,
        entry_priority: f64,
        entry_height: Natural,
        in_chain_input_value: Integer,
        spends_coinbase: bool,
        sigop_cost: u64,
    ) -> Self {
        let txid = calculate_tx_id(&tx);
        let size = virtual_size(&tx) as u64;
        let modified_size = crate::policy::calculate_modified_size(&tx, stripped_size(&tx) as u64);
        MempoolEntry {
            tx,
            txid,
            fee,
            size,
            modified_size,
            time,
            entry_priority,
            entry_height,
            in_chain_input_value,
            spends_coinbase,
            sigop_cost,
            fee_delta: 0,
            count_with_descendants: 1,
            size_with_descendants: size,
            mod_fees_with_descendants: fee,
            count_with_ancestors: 1,
            size_with_ancestors: size,
            mod_fees_with_ancestors: fee,
            sigop_cost_with_ancestors: sigop_cost,
        }
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn txid(&self) -> &Hash {
        &self.txid
    }

    pub fn fee(&self) -> Integer {
        self.fee
    }

    /// Fee including any prioritisation delta
    pub fn modified_fee(&self) -> Integer {
        self.fee + self.fee_delta
    }

    /// Virtual size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn time(&self) -> Natural {
        self.time
    }

    pub fn entry_height(&self) -> Natural {
        self.entry_height
    }

    pub fn spends_coinbase(&self) -> bool {
        self.spends_coinbase
    }

    pub fn sigop_cost(&self) -> u64 {
        self.sigop_cost
    }

    pub fn fee_rate(&self) -> FeeRate {
        FeeRate::new(self.modified_fee(), self.size)
    }

    /// Coin-age priority as of `current_height`
    pub fn priority(&self, current_height: Natural) -> f64 {
        if self.modified_size == 0 {
            return self.entry_priority;
        }
        let age = current_height.saturating_sub(self.entry_height) as f64;
        self.entry_priority + age * self.in_chain_input_value as f64 / self.modified_size as f64
    }

    pub fn count_with_descendants(&self) -> u64 {
        self.count_with_descendants
    }

    pub fn size_with_descendants(&self) -> u64 {
        self.size_with_descendants
    }

    pub fn mod_fees_with_descendants(&self) -> Integer {
        self.mod_fees_with_descendants
    }

    pub fn count_with_ancestors(&self) -> u64 {
        self.count_with_ancestors
    }

    pub fn size_with_ancestors(&self) -> u64 {
        self.size_with_ancestors
    }

    pub fn mod_fees_with_ancestors(&self) -> Integer {
        self.mod_fees_with_ancestors
    }

    pub fn sigop_cost_with_ancestors(&self) -> u64 {
        self.sigop_cost_with_ancestors
    }

    fn descendant_score(&self) -> DescendantScore {
        let own = DescendantScore { fee: self.modified_fee(), size: self.size };
        let package = DescendantScore { fee: self.mod_fees_with_descendants, size: self.size_with_descendants };
        own.max(package)
    }
}

/// A fee/size pair ordered by ratio without rounding
#[derive(Debug, Clone, Copy)]
struct DescendantScore {
    fee: Integer,
    size: u64,
}

impl Ord for DescendantScore {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.fee as i128 * other.size as i128;
        let rhs = other.fee as i128 * self.size as i128;
        lhs.cmp(&rhs)
    }
}

impl PartialOrd for DescendantScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DescendantScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DescendantScore {}

#[derive(Debug, Clone, Default)]
struct TxLinks {
    parents: HashSet<Hash>,
    children: HashSet<Hash>,
}

/// Decaying byte budget for transactions paying less than the relay fee
#[derive(Debug, Clone, Default)]
pub struct FreeLimiter {
    free_count: f64,
    last_time: Natural,
}

impl FreeLimiter {
    /// Decay the counter to `now`, then admit `size` bytes if the budget allows
    pub fn allow(&mut self, now: Natural, size: u64, limit_kb_per_min: u64) -> bool {
        let elapsed = now.saturating_sub(self.last_time) as f64;
        let before = self.free_count;
        self.free_count *= (1.0 - 1.0 / FREE_LIMITER_WINDOW_SECS).powf(elapsed);
        self.last_time = now;
        debug!(before, after = self.free_count, "free limiter decay");

        if self.free_count + size as f64 >= limit_kb_per_min.saturating_mul(10 * 1000) as f64 {
            return false;
        }
        self.free_count += size as f64;
        true
    }

    pub fn free_count(&self) -> f64 {
        self.free_count
    }
}

/// Summary counters of the pool
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MempoolInfo {
    pub size: usize,
    pub bytes: u64,
    pub total_fee: Integer,
    pub rolling_min_fee: FeeRate,
}

#[derive(Debug)]
pub struct TxMemPool {
    entries: HashMap<Hash, MempoolEntry>,
    links: HashMap<Hash, TxLinks>,
    spent_by: HashMap<OutPoint, Hash>,
    by_descendant_score: BTreeSet<(DescendantScore, Hash)>,
    deltas: HashMap<Hash, (f64, Integer)>,

    total_tx_size: u64,
    total_fee: Integer,

    incremental_relay_fee: FeeRate,
    rolling_minimum_fee_rate: f64,
    last_rolling_fee_update: Natural,
    block_since_last_rolling_fee_bump: bool,

    revision: u64,
    free_limiter: FreeLimiter,
}

impl TxMemPool {
    pub fn new(incremental_relay_fee: FeeRate) -> Self {
        TxMemPool {
            entries: HashMap::new(),
            links: HashMap::new(),
            spent_by: HashMap::new(),
            by_descendant_score: BTreeSet::new(),
            deltas: HashMap::new(),
            total_tx_size: 0,
            total_fee: 0,
            incremental_relay_fee,
            rolling_minimum_fee_rate: 0.0,
            last_rolling_fee_update: 0,
            block_since_last_rolling_fee_bump: false,
            revision: 0,
            free_limiter: FreeLimiter::default(),
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of virtual sizes of all entries
    pub fn total_tx_size(&self) -> u64 {
        self.total_tx_size
    }

    pub fn total_fee(&self) -> Integer {
        self.total_fee
    }

    /// Bumped on every mutation
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn exists(&self, txid: &Hash) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn entries(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    /// The pool transaction spending `outpoint`, if any
    pub fn spender(&self, outpoint: &OutPoint) -> Option<&Hash> {
        self.spent_by.get(outpoint)
    }

    pub fn parents_of(&self, txid: &Hash) -> Option<&HashSet<Hash>> {
        self.links.get(txid).map(|links| &links.parents)
    }

    pub fn children_of(&self, txid: &Hash) -> Option<&HashSet<Hash>> {
        self.links.get(txid).map(|links| &links.children)
    }

    /// True if `tx` spends no output of a pool transaction
    pub fn has_no_inputs_of(&self, tx: &Transaction) -> bool {
        tx.inputs.iter().all(|input| !self.exists(&input.prevout.hash))
    }

    pub fn info(&self) -> MempoolInfo {
        MempoolInfo {
            size: self.entries.len(),
            bytes: self.total_tx_size,
            total_fee: self.total_fee,
            rolling_min_fee: FeeRate::from_per_k(self.rolling_minimum_fee_rate.round() as Integer),
        }
    }

    pub(crate) fn free_limiter_mut(&mut self) -> &mut FreeLimiter {
        &mut self.free_limiter
    }

    // ========================================================================
    // GRAPH
    // ========================================================================

    /// In-pool ancestors of a prospective entry, enforcing `limits`.
    ///
    /// `tx` need not be in the pool; `size` is its virtual size. Returns the
    /// full ancestor set, or a description of the first limit exceeded.
    pub fn calculate_mempool_ancestors(
        &self,
        tx: &Transaction,
        size: u64,
        limits: &AncestorLimits,
    ) -> std::result::Result<HashSet<Hash>, String> {
        let parents: HashSet<Hash> = tx
            .inputs
            .iter()
            .map(|input| input.prevout.hash)
            .filter(|hash| self.exists(hash))
            .collect();
        if parents.len() as u64 + 1 > limits.ancestor_count {
            return Err(format!("too many unconfirmed parents [limit: {}]", limits.ancestor_count));
        }

        let mut staged: Vec<Hash> = parents.into_iter().collect();
        let mut ancestors = HashSet::new();
        let mut total_size = size;

        while let Some(stage) = staged.pop() {
            let Some(entry) = self.entries.get(&stage) else {
                continue;
            };
            ancestors.insert(stage);
            total_size += entry.size;

            if entry.size_with_descendants.saturating_add(size) > limits.descendant_size {
                return Err(format!(
                    "exceeds descendant size limit for tx {} [limit: {}]",
                    hash_to_hex(&stage),
                    limits.descendant_size
                ));
            }
            if entry.count_with_descendants.saturating_add(1) > limits.descendant_count {
                return Err(format!(
                    "too many descendants for tx {} [limit: {}]",
                    hash_to_hex(&stage),
                    limits.descendant_count
                ));
            }
            if total_size > limits.ancestor_size {
                return Err(format!("exceeds ancestor size limit [limit: {}]", limits.ancestor_size));
            }

            if let Some(links) = self.links.get(&stage) {
                for parent in &links.parents {
                    if !ancestors.contains(parent) && !staged.contains(parent) {
                        staged.push(*parent);
                    }
                }
            }
            if (staged.len() + ancestors.len()) as u64 + 1 > limits.ancestor_count {
                return Err(format!("too many unconfirmed ancestors [limit: {}]", limits.ancestor_count));
            }
        }

        Ok(ancestors)
    }

    /// Add `txid` and everything descending from it to `descendants`
    pub fn calculate_descendants(&self, txid: &Hash, descendants: &mut HashSet<Hash>) {
        let mut stack = vec![*txid];
        while let Some(current) = stack.pop() {
            if !descendants.insert(current) {
                continue;
            }
            if let Some(links) = self.links.get(&current) {
                stack.extend(links.children.iter().filter(|child| !descendants.contains(*child)));
            }
        }
    }

    fn ancestors_of(&self, txid: &Hash) -> HashSet<Hash> {
        let mut ancestors = HashSet::new();
        let mut stack: Vec<Hash> = self.parents_of(txid).map(|p| p.iter().copied().collect()).unwrap_or_default();
        while let Some(current) = stack.pop() {
            if ancestors.insert(current) {
                if let Some(parents) = self.parents_of(&current) {
                    stack.extend(parents.iter().copied());
                }
            }
        }
        ancestors
    }

    /// Mutate an entry, keeping the eviction index in step
    fn update_entry<F: FnOnce(&mut MempoolEntry)>(&mut self, txid: &Hash, f: F) {
        if let Some(entry) = self.entries.get_mut(txid) {
            self.by_descendant_score.remove(&(entry.descendant_score(), *txid));
            f(entry);
            self.by_descendant_score.insert((entry.descendant_score(), *txid));
        }
    }

    // ========================================================================
    // INSERTION AND REMOVAL
    // ========================================================================

    /// Insert an entry whose ancestor set was computed by
    /// [`calculate_mempool_ancestors`](Self::calculate_mempool_ancestors).
    pub fn add_unchecked(&mut self, mut entry: MempoolEntry, ancestors: &HashSet<Hash>) {
        let txid = entry.txid;

        if let Some(&(_, fee_delta)) = self.deltas.get(&txid) {
            entry.fee_delta = fee_delta;
        }
        entry.count_with_descendants = 1;
        entry.size_with_descendants = entry.size;
        entry.mod_fees_with_descendants = entry.modified_fee();

        entry.count_with_ancestors = 1 + ancestors.len() as u64;
        entry.size_with_ancestors = entry.size;
        entry.mod_fees_with_ancestors = entry.modified_fee();
        entry.sigop_cost_with_ancestors = entry.sigop_cost;
        for ancestor in ancestors.iter().filter_map(|a| self.entries.get(a)) {
            entry.size_with_ancestors += ancestor.size;
            entry.mod_fees_with_ancestors += ancestor.modified_fee();
            entry.sigop_cost_with_ancestors += ancestor.sigop_cost;
        }

        let mut links = TxLinks::default();
        for input in &entry.tx.inputs {
            self.spent_by.insert(input.prevout, txid);
            if self.entries.contains_key(&input.prevout.hash) {
                links.parents.insert(input.prevout.hash);
            }
        }
        for parent in &links.parents {
            if let Some(parent_links) = self.links.get_mut(parent) {
                parent_links.children.insert(txid);
            }
        }
        self.links.insert(txid, links);

        let (size, modified_fee) = (entry.size, entry.modified_fee());
        self.total_tx_size += size;
        self.total_fee += entry.fee;
        self.by_descendant_score.insert((entry.descendant_score(), txid));
        self.entries.insert(txid, entry);

        for ancestor in ancestors {
            self.update_entry(ancestor, |a| {
                a.count_with_descendants += 1;
                a.size_with_descendants += size;
                a.mod_fees_with_descendants += modified_fee;
            });
        }

        self.revision += 1;
        debug!(txid = %hash_to_hex(&txid), size, fee = modified_fee, "added to mempool");
    }

    fn remove_unchecked(&mut self, txid: &Hash) {
        let Some(entry) = self.entries.remove(txid) else {
            return;
        };
        self.by_descendant_score.remove(&(entry.descendant_score(), *txid));

        for input in &entry.tx.inputs {
            if self.spent_by.get(&input.prevout) == Some(txid) {
                self.spent_by.remove(&input.prevout);
            }
        }

        if let Some(links) = self.links.remove(txid) {
            for parent in &links.parents {
                if let Some(parent_links) = self.links.get_mut(parent) {
                    parent_links.children.remove(txid);
                }
            }
            for child in &links.children {
                if let Some(child_links) = self.links.get_mut(child) {
                    child_links.parents.remove(txid);
                }
            }
        }

        self.total_tx_size = self.total_tx_size.saturating_sub(entry.size);
        self.total_fee -= entry.fee;
        self.revision += 1;
        debug!(txid = %hash_to_hex(txid), "removed from mempool");
    }

    /// Remove a set of entries, fixing up the aggregates of everything left.
    ///
    /// Set `update_descendants` when descendants of the staged entries stay
    /// in the pool (a confirmed transaction); leave it unset when the stage
    /// is closed under descendants (evictions and conflicts).
    pub fn remove_staged(&mut self, stage: &HashSet<Hash>, update_descendants: bool) {
        if update_descendants {
            for txid in stage {
                let Some(removed) = self.entries.get(txid) else {
                    continue;
                };
                let (size, fee, sigops) = (removed.size, removed.modified_fee(), removed.sigop_cost);
                let mut descendants = HashSet::new();
                self.calculate_descendants(txid, &mut descendants);
                for descendant in descendants.iter().filter(|d| *d != txid && !stage.contains(*d)) {
                    self.update_entry(descendant, |e| {
                        e.count_with_ancestors = e.count_with_ancestors.saturating_sub(1);
                        e.size_with_ancestors = e.size_with_ancestors.saturating_sub(size);
                        e.mod_fees_with_ancestors -= fee;
                        e.sigop_cost_with_ancestors = e.sigop_cost_with_ancestors.saturating_sub(sigops);
                    });
                }
            }
        }

        for txid in stage {
            let Some(removed) = self.entries.get(txid) else {
                continue;
            };
            let (size, fee) = (removed.size, removed.modified_fee());
            for ancestor in self.ancestors_of(txid).iter().filter(|a| !stage.contains(*a)) {
                self.update_entry(ancestor, |e| {
                    e.count_with_descendants = e.count_with_descendants.saturating_sub(1);
                    e.size_with_descendants = e.size_with_descendants.saturating_sub(size);
                    e.mod_fees_with_descendants -= fee;
                });
            }
        }

        for txid in stage {
            self.remove_unchecked(txid);
        }
    }

    /// Remove `tx` (or, if it is not pooled, the pool spenders of its
    /// outputs) together with all descendants.
    pub fn remove_recursive(&mut self, tx: &Transaction) {
        let txid = calculate_tx_id(tx);
        let mut roots = Vec::new();
        if self.exists(&txid) {
            roots.push(txid);
        } else {
            for index in 0..tx.outputs.len() as u32 {
                if let Some(spender) = self.spender(&OutPoint { hash: txid, index }) {
                    roots.push(*spender);
                }
            }
        }

        let mut stage = HashSet::new();
        for root in &roots {
            self.calculate_descendants(root, &mut stage);
        }
        self.remove_staged(&stage, false);
    }

    fn remove_conflicts(&mut self, tx: &Transaction, txid: &Hash) {
        let conflicts: Vec<Hash> = tx
            .inputs
            .iter()
            .filter_map(|input| self.spender(&input.prevout).copied())
            .filter(|spender| spender != txid)
            .collect();
        for conflict in conflicts {
            if let Some(entry) = self.entries.get(&conflict) {
                let conflicting_tx = entry.tx.clone();
                debug!(txid = %hash_to_hex(&conflict), "removing conflict of block transaction");
                self.remove_recursive(&conflicting_tx);
            }
        }
    }

    /// Drop transactions confirmed by a block, and whatever they conflict with
    pub fn remove_for_block(&mut self, txs: &[Transaction], now: Natural) {
        for tx in txs {
            let txid = calculate_tx_id(tx);
            if self.exists(&txid) {
                let stage = HashSet::from([txid]);
                self.remove_staged(&stage, true);
            }
            self.remove_conflicts(tx, &txid);
            self.clear_prioritisation(&txid);
        }
        self.last_rolling_fee_update = now;
        self.block_since_last_rolling_fee_bump = true;
        self.revision += 1;
    }

    /// Remove entries that entered before `cutoff`, with their descendants.
    /// Returns the number of entries removed.
    pub fn expire(&mut self, cutoff: Natural) -> usize {
        let expired: Vec<Hash> = self.entries.values().filter(|e| e.time < cutoff).map(|e| e.txid).collect();
        let mut stage = HashSet::new();
        for txid in &expired {
            self.calculate_descendants(txid, &mut stage);
        }
        self.remove_staged(&stage, false);
        stage.len()
    }

    /// Evict lowest-descendant-score packages until the pool fits `size_limit`.
    ///
    /// Returns the outpoints spent by evicted transactions that are not
    /// outputs of transactions still in the pool.
    pub fn trim_to_size(&mut self, size_limit: u64) -> Vec<OutPoint> {
        let mut txn_removed = 0usize;
        let mut max_fee_rate_removed = FeeRate::default();
        let mut no_spends_remaining = Vec::new();

        while self.total_tx_size > size_limit {
            let Some(&(_, worst)) = self.by_descendant_score.iter().next() else {
                break;
            };
            let Some(entry) = self.entries.get(&worst) else {
                break;
            };

            let removed =
                FeeRate::new(entry.mod_fees_with_descendants, entry.size_with_descendants) + self.incremental_relay_fee;
            self.track_package_removed(removed);
            max_fee_rate_removed = max_fee_rate_removed.max(removed);

            let mut stage = HashSet::new();
            self.calculate_descendants(&worst, &mut stage);
            txn_removed += stage.len();

            let evicted: Vec<Transaction> =
                stage.iter().filter_map(|txid| self.entries.get(txid)).map(|e| e.tx.clone()).collect();
            self.remove_staged(&stage, false);

            for tx in &evicted {
                for input in &tx.inputs {
                    if !self.exists(&input.prevout.hash) {
                        no_spends_remaining.push(input.prevout);
                    }
                }
            }
        }

        if max_fee_rate_removed > FeeRate::default() {
            info!(
                txn_removed,
                max_fee_rate_removed = %max_fee_rate_removed,
                "removed transactions to trim mempool"
            );
        }
        no_spends_remaining
    }

    // ========================================================================
    // ROLLING MINIMUM FEE
    // ========================================================================

    fn track_package_removed(&mut self, rate: FeeRate) {
        if rate.per_k() as f64 > self.rolling_minimum_fee_rate {
            self.rolling_minimum_fee_rate = rate.per_k() as f64;
            self.block_since_last_rolling_fee_bump = false;
        }
    }

    fn decayed_minimum_fee_rate(&self, size_limit: u64, now: Natural) -> f64 {
        let elapsed = now.saturating_sub(self.last_rolling_fee_update);
        if elapsed <= 10 {
            return self.rolling_minimum_fee_rate;
        }

        let mut halflife = ROLLING_FEE_HALFLIFE as f64;
        if self.total_tx_size < size_limit / 4 {
            halflife /= 4.0;
        } else if self.total_tx_size < size_limit / 2 {
            halflife /= 2.0;
        }
        let rate = self.rolling_minimum_fee_rate / 2f64.powf(elapsed as f64 / halflife);
        if rate < self.incremental_relay_fee.per_k() as f64 / 2.0 {
            0.0
        } else {
            rate
        }
    }

    /// Fee rate a new transaction must pay to enter a pool limited to `size_limit`.
    ///
    /// After a trim the minimum is the evicted package rate plus the
    /// incremental relay fee. Once a block has been seen since, it halves every
    /// 12 hours (faster while the pool is small) and falls to zero below half
    /// an increment.
    pub fn get_min_fee(&self, size_limit: u64, now: Natural) -> FeeRate {
        if !self.block_since_last_rolling_fee_bump || self.rolling_minimum_fee_rate == 0.0 {
            return FeeRate::from_per_k(self.rolling_minimum_fee_rate.round() as Integer);
        }
        let rate = self.decayed_minimum_fee_rate(size_limit, now);
        if rate == 0.0 {
            return FeeRate::default();
        }
        FeeRate::from_per_k(rate.round() as Integer).max(self.incremental_relay_fee)
    }

    /// Persist the decay computed by [`get_min_fee`](Self::get_min_fee)
    pub fn update_rolling_fee(&mut self, size_limit: u64, now: Natural) {
        if !self.block_since_last_rolling_fee_bump || self.rolling_minimum_fee_rate == 0.0 {
            return;
        }
        if now.saturating_sub(self.last_rolling_fee_update) > 10 {
            self.rolling_minimum_fee_rate = self.decayed_minimum_fee_rate(size_limit, now);
            self.last_rolling_fee_update = now;
        }
    }

    // ========================================================================
    // PRIORITISATION
    // ========================================================================

    /// Adjust the effective priority and fee of `txid`, pooled or not
    pub fn prioritise_transaction(&mut self, txid: &Hash, priority_delta: f64, fee_delta: Integer) {
        let deltas = self.deltas.entry(*txid).or_insert((0.0, 0));
        deltas.0 += priority_delta;
        deltas.1 += fee_delta;

        if self.exists(txid) {
            self.update_entry(txid, |e| {
                e.fee_delta += fee_delta;
                e.mod_fees_with_descendants += fee_delta;
                e.mod_fees_with_ancestors += fee_delta;
            });
            for ancestor in self.ancestors_of(txid) {
                self.update_entry(&ancestor, |e| e.mod_fees_with_descendants += fee_delta);
            }
            let mut descendants = HashSet::new();
            self.calculate_descendants(txid, &mut descendants);
            descendants.remove(txid);
            for descendant in descendants {
                self.update_entry(&descendant, |e| e.mod_fees_with_ancestors += fee_delta);
            }
        }
        // Pending deltas feed the fee checks of later admissions
        self.revision += 1;

        info!(txid = %hash_to_hex(txid), priority_delta, fee_delta, "prioritised transaction");
    }

    /// Add any recorded deltas for `txid` to `priority` and `fee`
    pub fn apply_deltas(&self, txid: &Hash, priority: &mut f64, fee: &mut Integer) {
        if let Some(&(priority_delta, fee_delta)) = self.deltas.get(txid) {
            *priority += priority_delta;
            *fee += fee_delta;
        }
    }

    pub fn clear_prioritisation(&mut self, txid: &Hash) {
        self.deltas.remove(txid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================================
    // HELPER FUNCTIONS
    // ============================================================================

    fn create_tx(spends: &[OutPoint], outputs: usize, tag: u8) -> Transaction {
        Transaction {
            version: 1,
            inputs: spends
                .iter()
                .map(|prevout| TransactionInput {
                    prevout: *prevout,
                    script_sig: vec![0x01, tag],
                    sequence: SEQUENCE_FINAL,
                    witness: vec![],
                })
                .collect(),
            outputs: (0..outputs)
                .map(|_| TransactionOutput { value: 10_000, script_pubkey: vec![0x51] })
                .collect(),
            lock_time: 0,
        }
    }

    fn confirmed(n: u8) -> OutPoint {
        OutPoint { hash: [n; 32], index: 0 }
    }

    fn out(tx: &Transaction, index: u32) -> OutPoint {
        OutPoint { hash: calculate_tx_id(tx), index }
    }

    fn add(pool: &mut TxMemPool, tx: &Transaction, fee: Integer, time: Natural) -> Hash {
        let entry = MempoolEntry::new(tx.clone(), fee, time, 0.0, 1, 0, false, 4);
        let ancestors = pool
            .calculate_mempool_ancestors(tx, entry.size(), &AncestorLimits::unlimited())
            .unwrap();
        let txid = *entry.txid();
        pool.add_unchecked(entry, &ancestors);
        txid
    }

    fn new_pool() -> TxMemPool {
        TxMemPool::new(FeeRate::from_per_k(1000))
    }

    // ============================================================================
    // GRAPH AND AGGREGATES
    // ============================================================================

    #[test]
    fn test_add_and_links() {
        let mut pool = new_pool();
        let parent = create_tx(&[confirmed(1)], 2, 1);
        let child = create_tx(&[out(&parent, 0)], 1, 2);
        let p = add(&mut pool, &parent, 1000, 0);
        let c = add(&mut pool, &child, 2000, 0);

        assert_eq!(pool.size(), 2);
        assert!(pool.parents_of(&c).unwrap().contains(&p));
        assert!(pool.children_of(&p).unwrap().contains(&c));
        assert_eq!(pool.spender(&out(&parent, 0)), Some(&c));
        assert_eq!(pool.spender(&confirmed(1)), Some(&p));
        assert!(!pool.has_no_inputs_of(&child));
        assert!(pool.has_no_inputs_of(&parent));

        let parent_entry = pool.get(&p).unwrap();
        assert_eq!(parent_entry.count_with_descendants(), 2);
        assert_eq!(parent_entry.mod_fees_with_descendants(), 3000);
        let child_entry = pool.get(&c).unwrap();
        assert_eq!(child_entry.count_with_ancestors(), 2);
        assert_eq!(child_entry.mod_fees_with_ancestors(), 3000);
        assert_eq!(child_entry.sigop_cost_with_ancestors(), 8);
        assert_eq!(pool.total_fee(), 3000);
    }

    #[test]
    fn test_ancestor_limits() {
        let mut pool = new_pool();
        let a = create_tx(&[confirmed(1)], 1, 1);
        let b = create_tx(&[out(&a, 0)], 1, 2);
        add(&mut pool, &a, 1000, 0);
        add(&mut pool, &b, 1000, 0);

        let limits = AncestorLimits { ancestor_count: 3, ..AncestorLimits::unlimited() };
        let c = create_tx(&[out(&b, 0)], 1, 3);
        let ancestors = pool.calculate_mempool_ancestors(&c, 100, &limits).unwrap();
        assert_eq!(ancestors.len(), 2);
        add(&mut pool, &c, 1000, 0);

        let d = create_tx(&[out(&c, 0)], 1, 4);
        let err = pool.calculate_mempool_ancestors(&d, 100, &limits).unwrap_err();
        assert!(err.contains("too many unconfirmed ancestors"));
    }

    #[test]
    fn test_descendant_limits() {
        let mut pool = new_pool();
        let a = create_tx(&[confirmed(1)], 3, 1);
        add(&mut pool, &a, 1000, 0);
        add(&mut pool, &create_tx(&[out(&a, 0)], 1, 2), 1000, 0);

        let limits = AncestorLimits { descendant_count: 2, ..AncestorLimits::unlimited() };
        let err = pool
            .calculate_mempool_ancestors(&create_tx(&[out(&a, 1)], 1, 3), 100, &limits)
            .unwrap_err();
        assert!(err.contains("too many descendants"));

        let size_limits = AncestorLimits { ancestor_size: 150, ..AncestorLimits::unlimited() };
        let err = pool
            .calculate_mempool_ancestors(&create_tx(&[out(&a, 2)], 1, 4), 100, &size_limits)
            .unwrap_err();
        assert!(err.contains("exceeds ancestor size limit"));
    }

    #[test]
    fn test_remove_staged_updates_ancestors() {
        let mut pool = new_pool();
        let a = create_tx(&[confirmed(1)], 1, 1);
        let b = create_tx(&[out(&a, 0)], 1, 2);
        let ta = add(&mut pool, &a, 1000, 0);
        let tb = add(&mut pool, &b, 5000, 0);

        let mut stage = HashSet::new();
        pool.calculate_descendants(&tb, &mut stage);
        pool.remove_staged(&stage, false);

        let entry = pool.get(&ta).unwrap();
        assert_eq!(entry.count_with_descendants(), 1);
        assert_eq!(entry.mod_fees_with_descendants(), 1000);
        assert!(pool.children_of(&ta).unwrap().is_empty());
        assert!(pool.spender(&out(&a, 0)).is_none());
    }

    #[test]
    fn test_remove_for_block_keeps_children() {
        let mut pool = new_pool();
        let a = create_tx(&[confirmed(1)], 1, 1);
        let b = create_tx(&[out(&a, 0)], 1, 2);
        let ta = add(&mut pool, &a, 1000, 0);
        let tb = add(&mut pool, &b, 5000, 0);

        // A conflicting spend of another confirmed coin
        let loser = create_tx(&[confirmed(2)], 1, 3);
        add(&mut pool, &loser, 1000, 0);
        let winner = create_tx(&[confirmed(2)], 1, 4);

        pool.remove_for_block(&[a.clone(), winner], 100);
        assert!(!pool.exists(&ta));
        assert!(!pool.exists(&calculate_tx_id(&loser)));
        assert_eq!(pool.size(), 1);
        let child = pool.get(&tb).unwrap();
        assert_eq!(child.count_with_ancestors(), 1);
        assert_eq!(child.mod_fees_with_ancestors(), 5000);
        assert!(pool.parents_of(&tb).unwrap().is_empty());
    }

    #[test]
    fn test_expire_removes_descendants() {
        let mut pool = new_pool();
        let a = create_tx(&[confirmed(1)], 1, 1);
        let b = create_tx(&[out(&a, 0)], 1, 2);
        let c = create_tx(&[confirmed(3)], 1, 3);
        add(&mut pool, &a, 1000, 10);
        add(&mut pool, &b, 1000, 500);
        add(&mut pool, &c, 1000, 500);

        assert_eq!(pool.expire(100), 2);
        assert_eq!(pool.size(), 1);
        assert!(pool.exists(&calculate_tx_id(&c)));
    }

    // ============================================================================
    // TRIMMING AND MINIMUM FEE
    // ============================================================================

    #[test]
    fn test_trim_evicts_lowest_package() {
        let mut pool = new_pool();
        let cheap = create_tx(&[confirmed(1)], 1, 1);
        let rich = create_tx(&[confirmed(2)], 1, 2);
        let t_cheap = add(&mut pool, &cheap, 100, 0);
        let t_rich = add(&mut pool, &rich, 100_000, 0);

        let limit = pool.total_tx_size() - 1;
        let no_spends = pool.trim_to_size(limit);
        assert!(!pool.exists(&t_cheap));
        assert!(pool.exists(&t_rich));
        assert!(pool.total_tx_size() <= limit);
        assert_eq!(no_spends, vec![confirmed(1)]);
    }

    #[test]
    fn test_child_pays_for_parent_protects_package() {
        let mut pool = new_pool();
        let parent = create_tx(&[confirmed(1)], 1, 1);
        let child = create_tx(&[out(&parent, 0)], 1, 2);
        let other = create_tx(&[confirmed(2)], 1, 3);
        let tp = add(&mut pool, &parent, 100, 0);
        add(&mut pool, &child, 100_000, 0);
        let to = add(&mut pool, &other, 5_000, 0);

        pool.trim_to_size(pool.total_tx_size() - 1);
        assert!(pool.exists(&tp));
        assert!(!pool.exists(&to));
    }

    #[test]
    fn test_rolling_min_fee() {
        let mut pool = new_pool();
        assert_eq!(pool.get_min_fee(1_000_000, 0), FeeRate::default());

        let cheap = create_tx(&[confirmed(1)], 1, 1);
        add(&mut pool, &cheap, 1000, 0);
        let size = pool.total_tx_size();
        pool.trim_to_size(0);
        let bumped = pool.get_min_fee(1_000_000, 0);
        assert_eq!(bumped, FeeRate::new(1000, size) + FeeRate::from_per_k(1000));

        // No decay until a block has been seen
        assert_eq!(pool.get_min_fee(1_000_000, 1_000_000), bumped);

        pool.remove_for_block(&[], 1000);
        // Empty pool: quarter half-life (3 h); after 3 h the rate halves
        let halved = pool.get_min_fee(1_000_000, 1000 + 3 * 3600);
        assert!(halved < bumped);
        assert!(halved >= FeeRate::from_per_k(1000));

        // Long after, it drops to zero
        assert_eq!(pool.get_min_fee(1_000_000, 1000 + 30 * 24 * 3600), FeeRate::default());
        pool.update_rolling_fee(1_000_000, 1000 + 30 * 24 * 3600);
        assert_eq!(pool.info().rolling_min_fee, FeeRate::default());
    }

    // ============================================================================
    // PRIORITISATION
    // ============================================================================

    #[test]
    fn test_prioritise_transaction() {
        let mut pool = new_pool();
        let parent = create_tx(&[confirmed(1)], 1, 1);
        let child = create_tx(&[out(&parent, 0)], 1, 2);
        let tp = add(&mut pool, &parent, 1000, 0);
        let tc = add(&mut pool, &child, 1000, 0);

        pool.prioritise_transaction(&tc, 0.0, 500);
        assert_eq!(pool.get(&tc).unwrap().modified_fee(), 1500);
        assert_eq!(pool.get(&tc).unwrap().fee(), 1000);
        assert_eq!(pool.get(&tp).unwrap().mod_fees_with_descendants(), 2500);

        pool.prioritise_transaction(&tp, 0.0, -200);
        assert_eq!(pool.get(&tc).unwrap().mod_fees_with_ancestors(), 2300);

        // Deltas for unknown transactions are remembered
        let later = [9u8; 32];
        pool.prioritise_transaction(&later, 10.0, 42);
        let (mut priority, mut fee) = (1.0, 100);
        pool.apply_deltas(&later, &mut priority, &mut fee);
        assert_eq!((priority, fee), (11.0, 142));
        pool.clear_prioritisation(&later);
        let mut fee = 100;
        pool.apply_deltas(&later, &mut priority, &mut fee);
        assert_eq!(fee, 100);
    }

    #[test]
    fn test_revision_tracks_admission_inputs() {
        let mut pool = new_pool();
        let start = pool.revision();

        // A delta for a transaction not yet pooled changes its future fee checks
        pool.prioritise_transaction(&[9u8; 32], 0.0, -500);
        let after_delta = pool.revision();
        assert!(after_delta > start);
        assert!(pool.is_empty());

        // A block with nothing to remove still lets the fee floor decay
        pool.remove_for_block(&[], 100);
        assert!(pool.revision() > after_delta);
    }

    #[test]
    fn test_free_limiter_decays() {
        let mut limiter = FreeLimiter::default();
        // 1 kB/min -> 10,000 byte window
        assert!(limiter.allow(0, 6_000, 1));
        assert!(!limiter.allow(0, 6_000, 1));
        // After ten minutes the counter has decayed by ~63%
        assert!(limiter.allow(600, 6_000, 1));
        assert!(limiter.free_count() > 6_000.0);
        // Disabled budget rejects everything
        assert!(!FreeLimiter::default().allow(0, 1, 0));
    }

    #[test]
    fn test_free_limiter_huge_budget_saturates() {
        let mut limiter = FreeLimiter::default();
        assert!(limiter.allow(0, 1_000_000, u64::MAX));
        assert!(limiter.allow(1, 1_000_000, u64::MAX / 1000));
    }

    #[test]
    fn test_entry_priority_grows_with_depth() {
        let tx = create_tx(&[confirmed(1)], 1, 1);
        let entry = MempoolEntry::new(tx, 0, 0, 100.0, 10, 1_000_000, false, 0);
        assert_eq!(entry.priority(10), 100.0);
        assert!(entry.priority(20) > 100.0);
    }
}
