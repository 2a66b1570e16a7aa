//! Coin lookups for input validation
//!
//! [`CoinView`] abstracts the confirmed UTXO set owned by chain state. The
//! mempool layers its own unconfirmed outputs on top with
//! [`MempoolCoinView`], so a transaction may spend outputs of transactions
//! that are themselves still waiting in the pool.

use crate::constants::MEMPOOL_HEIGHT;
use crate::txmempool::TxMemPool;
use crate::types::*;
use std::collections::HashMap;

/// Read access to unspent outputs
pub trait CoinView {
    /// The unspent output at `outpoint`, if any
    fn get(&self, outpoint: &OutPoint) -> Option<UTXO>;

    /// True if any unspent output of transaction `txid` is known
    fn have_coins(&self, txid: &Hash) -> bool;

    fn have_coin(&self, outpoint: &OutPoint) -> bool {
        self.get(outpoint).is_some()
    }

    /// Every input of `tx` resolves to an unspent output
    fn have_inputs(&self, tx: &Transaction) -> bool {
        tx.inputs.iter().all(|input| self.have_coin(&input.prevout))
    }

    /// Resolve all prevouts of `tx` in input order
    fn spent_coins(&self, tx: &Transaction) -> Vec<Option<UTXO>> {
        tx.inputs.iter().map(|input| self.get(&input.prevout)).collect()
    }
}

/// Plain map view. `have_coins` scans every key, so this impl suits tests
/// and small sets; use [`IndexedUtxoSet`] for a full chainstate.
impl CoinView for UtxoSet {
    fn get(&self, outpoint: &OutPoint) -> Option<UTXO> {
        HashMap::get(self, outpoint).cloned()
    }

    fn have_coins(&self, txid: &Hash) -> bool {
        self.keys().any(|outpoint| outpoint.hash == *txid)
    }
}

/// UTXO set with a per-transaction count of unspent outputs, so
/// `have_coins` is a single lookup
#[derive(Debug, Clone, Default)]
pub struct IndexedUtxoSet {
    coins: UtxoSet,
    unspent_per_tx: HashMap<Hash, usize>,
}

impl IndexedUtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    /// Add or overwrite the coin at `outpoint`
    pub fn insert(&mut self, outpoint: OutPoint, coin: UTXO) -> Option<UTXO> {
        let previous = self.coins.insert(outpoint, coin);
        if previous.is_none() {
            *self.unspent_per_tx.entry(outpoint.hash).or_insert(0) += 1;
        }
        previous
    }

    /// Spend the coin at `outpoint`
    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<UTXO> {
        let removed = self.coins.remove(outpoint)?;
        if let Some(count) = self.unspent_per_tx.get_mut(&outpoint.hash) {
            *count -= 1;
            if *count == 0 {
                self.unspent_per_tx.remove(&outpoint.hash);
            }
        }
        Some(removed)
    }
}

impl FromIterator<(OutPoint, UTXO)> for IndexedUtxoSet {
    fn from_iter<I: IntoIterator<Item = (OutPoint, UTXO)>>(iter: I) -> Self {
        let mut set = IndexedUtxoSet::new();
        for (outpoint, coin) in iter {
            set.insert(outpoint, coin);
        }
        set
    }
}

impl CoinView for IndexedUtxoSet {
    fn get(&self, outpoint: &OutPoint) -> Option<UTXO> {
        self.coins.get(outpoint).cloned()
    }

    fn have_coins(&self, txid: &Hash) -> bool {
        self.unspent_per_tx.contains_key(txid)
    }
}

/// Confirmed coins overlaid with the outputs of mempool transactions.
///
/// Mempool outputs are reported at [`MEMPOOL_HEIGHT`]. Whether another pool
/// transaction already spends them is a conflict question answered by the
/// pool itself, not by this view.
pub struct MempoolCoinView<'a, V: CoinView + ?Sized> {
    base: &'a V,
    pool: &'a TxMemPool,
}

impl<'a, V: CoinView + ?Sized> MempoolCoinView<'a, V> {
    pub fn new(base: &'a V, pool: &'a TxMemPool) -> Self {
        MempoolCoinView { base, pool }
    }
}

impl<V: CoinView + ?Sized> CoinView for MempoolCoinView<'_, V> {
    fn get(&self, outpoint: &OutPoint) -> Option<UTXO> {
        match self.pool.get(&outpoint.hash) {
            Some(entry) => entry.tx().outputs.get(outpoint.index as usize).map(|output| UTXO {
                value: output.value,
                script_pubkey: output.script_pubkey.clone(),
                height: MEMPOOL_HEIGHT,
                is_coinbase: false,
            }),
            None => self.base.get(outpoint),
        }
    }

    fn have_coins(&self, txid: &Hash) -> bool {
        self.pool.exists(txid) || self.base.have_coins(txid)
    }
}
