//! The in-memory mutation buffer layered over a backing view.
//!
//! Every coin read through the cache materializes a local entry; every
//! mutation tags entries with the two bookkeeping flags that make a later
//! merge into the parent correct:
//!
//! - `dirty` — the entry differs from the parent and must be written down.
//! - `fresh` — the parent holds no live coin for this outpoint, so a coin
//!   created and spent entirely inside this cache can vanish without a trace.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::mem;

use bitcoin::{BlockHash, OutPoint, Transaction, Txid};
use namechain_primitives::{memusage, Coin, Name, NameData, NameHistory, MAX_OUTPUTS_PER_BLOCK};

use crate::name_cache::NameCache;
use crate::view::{CoinsCursor, CoinsView, InterruptionPoint};
use crate::{Error, Result};

/// One cached coin plus its merge bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheEntry {
    pub coin: Coin,
    /// The entry differs from what the parent view holds.
    pub dirty: bool,
    /// The parent view holds no live coin for this outpoint.
    pub fresh: bool,
}

/// The cache's working set. Lookups are average-O(1); no ordering is kept.
pub type CoinsMap = HashMap<OutPoint, CacheEntry>;

/// A mutation buffer over a parent [`CoinsView`].
///
/// The parent reference is non-owning; the embedder guarantees it outlives
/// the cache. Caches stack freely: a cache over a cache is how a block is
/// evaluated speculatively and thrown away.
pub struct CoinsViewCache<'a> {
    base: &'a mut dyn CoinsView,
    cache_coins: CoinsMap,
    cache_names: NameCache,
    hash_block: Option<BlockHash>,
    /// Sum of `dynamic_memory_usage` over all coins currently in the map.
    cached_coins_usage: usize,
    /// Whether name updates maintain the per-name history stack.
    name_history: bool,
}

impl<'a> CoinsViewCache<'a> {
    /// A cache over `base` with name history tracking disabled.
    pub fn new(base: &'a mut dyn CoinsView) -> Self {
        Self {
            base,
            cache_coins: CoinsMap::default(),
            cache_names: NameCache::default(),
            hash_block: None,
            cached_coins_usage: 0,
            name_history: false,
        }
    }

    /// A cache over `base` that maintains per-name history stacks.
    pub fn with_name_history(base: &'a mut dyn CoinsView) -> Self {
        Self {
            name_history: true,
            ..Self::new(base)
        }
    }

    /// Look the outpoint up locally, reading through to the parent on a miss.
    ///
    /// A spent record obtained from the parent is materialized as `fresh`:
    /// the parent effectively has nothing live there.
    fn fetch_coin(&mut self, outpoint: &OutPoint) -> Result<Option<&mut CacheEntry>> {
        let Self {
            base,
            cache_coins,
            cached_coins_usage,
            ..
        } = self;

        match cache_coins.entry(*outpoint) {
            Entry::Occupied(entry) => Ok(Some(entry.into_mut())),
            Entry::Vacant(slot) => {
                let Some(coin) = base.get_coin(outpoint)? else {
                    return Ok(None);
                };
                let fresh = coin.is_spent();
                *cached_coins_usage += coin.dynamic_memory_usage();
                Ok(Some(slot.insert(CacheEntry {
                    coin,
                    dirty: false,
                    fresh,
                })))
            }
        }
    }

    /// A reference to the coin at `outpoint`, or to the spent sentinel if
    /// nothing is known. Lets call sites chain accesses without unwrapping.
    pub fn access_coin(&mut self, outpoint: &OutPoint) -> Result<&Coin> {
        Ok(match self.fetch_coin(outpoint)? {
            Some(entry) => &entry.coin,
            None => Coin::empty(),
        })
    }

    /// Like [`CoinsView::have_coin`], but never reads through to the parent.
    ///
    /// For callers that must not pay backend I/O while holding a lock.
    pub fn have_coin_in_cache(&self, outpoint: &OutPoint) -> bool {
        self.cache_coins
            .get(outpoint)
            .is_some_and(|entry| !entry.coin.is_spent())
    }

    /// Add a coin created by a confirmed transaction.
    ///
    /// Provably unspendable outputs are dropped silently: they can never be
    /// spent, so tracking them only wastes memory.
    ///
    /// With `possible_overwrite` unset, hitting a live coin is a logic error
    /// ([`Error::OverwriteUnspent`]). Overwrites are only legal for the
    /// historical duplicate-coinbase cases and for re-connects the caller
    /// has checked itself.
    pub fn add_coin(
        &mut self,
        outpoint: OutPoint,
        coin: Coin,
        possible_overwrite: bool,
    ) -> Result<()> {
        assert!(!coin.is_spent(), "adding an already spent coin");
        if coin.output.script_pubkey.is_op_return() {
            return Ok(());
        }

        let Self {
            cache_coins,
            cached_coins_usage,
            ..
        } = self;

        let mut fresh = false;
        let entry = match cache_coins.entry(outpoint) {
            Entry::Occupied(slot) => {
                let entry = slot.into_mut();
                if !possible_overwrite {
                    if !entry.coin.is_spent() {
                        return Err(Error::OverwriteUnspent(outpoint));
                    }
                    // A dirty spent entry still owes the parent a deletion.
                    // Were this new coin marked fresh, a later spend would
                    // collapse the entry and the parent's deletion would be
                    // lost. A spent entry that is not dirty carries no such
                    // debt, so the new coin is as good as never-seen.
                    //
                    // Re-adding a spent coin happens during reorgs: the coin
                    // is spent when its creating block disconnects and added
                    // again when a newly connected block recreates it.
                    fresh = !entry.dirty;
                }
                *cached_coins_usage -= entry.coin.dynamic_memory_usage();
                entry
            }
            Entry::Vacant(slot) => {
                if !possible_overwrite {
                    fresh = true;
                }
                slot.insert(CacheEntry::default())
            }
        };

        entry.coin = coin;
        entry.dirty = true;
        entry.fresh = entry.fresh || fresh;
        *cached_coins_usage += entry.coin.dynamic_memory_usage();

        tracing::trace!(
            target: "utxocache",
            txid = %outpoint.txid,
            vout = outpoint.vout,
            height = entry.coin.height,
            value = entry.coin.value().to_sat(),
            is_coinbase = entry.coin.is_coinbase,
            "add"
        );
        Ok(())
    }

    /// Insert a coin with no flag discipline: marked dirty, nothing fetched,
    /// no overwrite check.
    ///
    /// DANGER: only sound if no live coin for `outpoint` exists anywhere in
    /// the view stack; otherwise later flushes corrupt the parent.
    pub fn emplace_coin_internal_danger(&mut self, outpoint: OutPoint, coin: Coin) {
        self.cached_coins_usage += coin.dynamic_memory_usage();
        self.cache_coins.insert(
            outpoint,
            CacheEntry {
                coin,
                dirty: true,
                fresh: false,
            },
        );
    }

    /// Spend the coin at `outpoint`, returning it, or `None` if no coin is
    /// known there.
    ///
    /// A fresh entry is erased outright: the parent never saw the coin, so
    /// create-then-spend leaves no trace. Anything else stays behind as a
    /// dirty spent record the next flush writes down.
    pub fn spend_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        if self.fetch_coin(outpoint)?.is_none() {
            return Ok(None);
        }

        let Self {
            cache_coins,
            cached_coins_usage,
            ..
        } = self;
        let Entry::Occupied(mut slot) = cache_coins.entry(*outpoint) else {
            return Ok(None);
        };

        let entry = slot.get_mut();
        *cached_coins_usage -= entry.coin.dynamic_memory_usage();
        tracing::trace!(
            target: "utxocache",
            txid = %outpoint.txid,
            vout = outpoint.vout,
            height = entry.coin.height,
            value = entry.coin.value().to_sat(),
            is_coinbase = entry.coin.is_coinbase,
            "spent"
        );

        let coin = if entry.fresh {
            slot.remove().coin
        } else {
            entry.dirty = true;
            mem::take(&mut entry.coin)
        };
        Ok(Some(coin))
    }

    /// Drop the entry at `outpoint` if it is a pure read-through image.
    ///
    /// Entries with flags are retained: dropping them would lose data the
    /// parent has not seen yet.
    pub fn uncache(&mut self, outpoint: &OutPoint) {
        let Entry::Occupied(slot) = self.cache_coins.entry(*outpoint) else {
            return;
        };
        let entry = slot.get();
        if entry.dirty || entry.fresh {
            return;
        }

        self.cached_coins_usage -= entry.coin.dynamic_memory_usage();
        tracing::trace!(
            target: "utxocache",
            txid = %outpoint.txid,
            vout = outpoint.vout,
            height = entry.coin.height,
            value = entry.coin.value().to_sat(),
            is_coinbase = entry.coin.is_coinbase,
            "uncache"
        );
        slot.remove();
    }

    /// Push all accumulated coin and name changes into the parent with one
    /// batch, then start over empty.
    ///
    /// An empty cache with no best block flushes as a no-op; mempool
    /// validation relies on that. The local maps are cleared whether or not
    /// the parent accepts the batch.
    pub fn flush(&mut self) -> Result<()> {
        if self.hash_block.is_none() && self.cache_coins.is_empty() && self.cache_names.is_empty()
        {
            return Ok(());
        }

        let coins = mem::take(&mut self.cache_coins);
        let names = mem::take(&mut self.cache_names);
        self.cached_coins_usage = 0;
        tracing::debug!(
            target: "utxocache",
            entries = coins.len(),
            best_block = ?self.hash_block,
            "flush"
        );
        self.base.batch_write(coins, self.hash_block, names)
    }

    /// Record the block hash the cache's state now corresponds to.
    pub fn set_best_block(&mut self, hash: BlockHash) {
        self.hash_block = Some(hash);
    }

    /// Number of coin entries held. Name operations are not counted.
    pub fn cache_size(&self) -> usize {
        self.cache_coins.len()
    }

    /// Estimated heap footprint: the map's table plus every coin's owned
    /// bytes.
    pub fn dynamic_memory_usage(&self) -> usize {
        memusage::hash_map_usage(&self.cache_coins) + self.cached_coins_usage
    }

    /// Release the map's allocation. Only valid once the cache is empty,
    /// typically right after a full flush.
    pub fn reallocate_cache(&mut self) {
        assert!(
            self.cache_coins.is_empty(),
            "reallocating a non-empty coin cache"
        );
        self.cache_coins = CoinsMap::default();
    }

    /// Whether every input of `tx` refers to a live coin. Coinbases have no
    /// previous outputs and always pass.
    pub fn have_inputs(&mut self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        for input in &tx.input {
            if !self.have_coin(&input.previous_output)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Register or update `name`.
    ///
    /// `undo` distinguishes going back in time (block disconnect) from the
    /// ordinary forward update. Forward updates push the replaced record on
    /// the history stack; undo pops it and checks it matches the record now
    /// being restored.
    pub fn set_name(&mut self, name: &[u8], data: NameData, undo: bool) {
        match self.get_name(name) {
            Some(old) => {
                self.cache_names.remove_expire_index(name, old.height);
                if self.name_history {
                    let mut history = self.get_name_history(name).unwrap_or_default();
                    if undo {
                        history.pop(&data);
                    } else {
                        history.push(old);
                    }
                    self.cache_names.set_history(name, history);
                }
            }
            None => assert!(!undo, "cannot undo an update of an unregistered name"),
        }

        self.cache_names.add_expire_index(name, data.height);
        self.cache_names.set(name, data);
    }

    /// Remove `name` from the registry. The name must exist, and its history
    /// must already have been unwound.
    pub fn delete_name(&mut self, name: &[u8]) {
        let old = self
            .get_name(name)
            .expect("deleting a name that was never registered");
        self.cache_names.remove_expire_index(name, old.height);

        if self.name_history {
            let history = self.get_name_history(name);
            assert!(
                history.map_or(true, |h| h.is_empty()),
                "deleting a name whose history is not empty"
            );
        }

        self.cache_names.remove(name);
    }
}

impl CoinsView for CoinsViewCache<'_> {
    fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        Ok(self
            .fetch_coin(outpoint)?
            .filter(|entry| !entry.coin.is_spent())
            .map(|entry| entry.coin.clone()))
    }

    fn have_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        Ok(self
            .fetch_coin(outpoint)?
            .is_some_and(|entry| !entry.coin.is_spent()))
    }

    fn best_block(&mut self) -> Option<BlockHash> {
        if self.hash_block.is_none() {
            self.hash_block = self.base.best_block();
        }
        self.hash_block
    }

    fn head_blocks(&mut self) -> Vec<BlockHash> {
        self.base.head_blocks()
    }

    /// Fold a child cache's batch into this one.
    ///
    /// Only dirty child entries matter; the rest are read-through images.
    /// The merge rules are the heart of multi-level stacking: see each
    /// branch.
    fn batch_write(
        &mut self,
        coins: CoinsMap,
        best_block: Option<BlockHash>,
        names: NameCache,
    ) -> Result<()> {
        tracing::trace!(
            target: "utxocache",
            entries = coins.len(),
            best_block = ?best_block,
            "batch_write"
        );

        let Self {
            cache_coins,
            cached_coins_usage,
            ..
        } = self;

        for (outpoint, child) in coins {
            if !child.dirty {
                continue;
            }
            match cache_coins.entry(outpoint) {
                Entry::Vacant(slot) => {
                    // A coin created and spent below us, that we never held:
                    // the grandparent lacks it too, so it collapses away.
                    if !(child.fresh && child.coin.is_spent()) {
                        *cached_coins_usage += child.coin.dynamic_memory_usage();
                        slot.insert(CacheEntry {
                            coin: child.coin,
                            dirty: true,
                            // FRESH survives the hop only if the child knew
                            // the parent chain had nothing live; if we merely
                            // flushed our copy out earlier, the grandparent
                            // may still hold it.
                            fresh: child.fresh,
                        });
                    }
                }
                Entry::Occupied(mut slot) => {
                    if child.fresh && !slot.get().coin.is_spent() {
                        return Err(Error::FreshAppliedToExisting(outpoint));
                    }

                    if slot.get().fresh && child.coin.is_spent() {
                        // We were the only holder and the child spent it:
                        // erase rather than remember a deletion nobody needs.
                        *cached_coins_usage -= slot.get().coin.dynamic_memory_usage();
                        slot.remove();
                    } else {
                        let entry = slot.get_mut();
                        *cached_coins_usage -= entry.coin.dynamic_memory_usage();
                        entry.coin = child.coin;
                        *cached_coins_usage += entry.coin.dynamic_memory_usage();
                        entry.dirty = true;
                        // Never adopt the child's FRESH here: a spent copy of
                        // this entry may already sit in the level above us.
                    }
                }
            }
        }

        self.hash_block = best_block;
        self.cache_names.apply(names);
        Ok(())
    }

    fn cursor(&self) -> Option<Box<dyn CoinsCursor + '_>> {
        self.base.cursor()
    }

    fn estimate_size(&self) -> usize {
        self.base.estimate_size()
    }

    fn get_name(&mut self, name: &[u8]) -> Option<NameData> {
        if self.cache_names.is_deleted(name) {
            return None;
        }
        if let Some(data) = self.cache_names.get(name) {
            return Some(data.clone());
        }
        // The name cache only tracks changes; plain reads fall through.
        self.base.get_name(name)
    }

    fn get_name_history(&mut self, name: &[u8]) -> Option<NameHistory> {
        if let Some(history) = self.cache_names.history(name) {
            return Some(history.clone());
        }
        self.base.get_name_history(name)
    }

    fn names_for_height(&mut self, height: u32) -> BTreeSet<Name> {
        // The base view answers first and the cached delta overlays it. A
        // tombstone the base cannot see yet is not filtered here; expiration
        // processing runs after a flush.
        let mut names = self.base.names_for_height(height);
        self.cache_names.update_names_for_height(height, &mut names);
        names
    }

    fn iterate_names(&self) -> Box<dyn Iterator<Item = (Name, NameData)> + '_> {
        Box::new(self.cache_names.iterate(self.base.iterate_names()))
    }

    fn validate_name_db(&mut self, interruption_point: InterruptionPoint<'_>) -> Result<bool> {
        self.base.validate_name_db(interruption_point)
    }
}

/// Add every output of `tx` to `cache` at `height`.
///
/// Coinbase outputs always pass the overwrite allowance, to absorb the
/// historical duplicate-coinbase blocks. For other transactions the caller
/// chooses between trusting its own bookkeeping (`check_for_overwrite`
/// false) and probing the cache per output.
pub fn add_coins(
    cache: &mut CoinsViewCache<'_>,
    tx: &Transaction,
    height: u32,
    check_for_overwrite: bool,
) -> Result<()> {
    let is_coinbase = tx.is_coinbase();
    let txid = tx.compute_txid();

    for (vout, output) in tx.output.iter().enumerate() {
        let outpoint = OutPoint::new(txid, vout as u32);
        let overwrite = if check_for_overwrite {
            cache.have_coin(&outpoint)?
        } else {
            is_coinbase
        };
        cache.add_coin(
            outpoint,
            Coin::new(output.clone(), height, is_coinbase),
            overwrite,
        )?;
    }
    Ok(())
}

/// Scan output indices of `txid` until a live coin turns up, bounded by the
/// largest number of outputs a block can create. Answers the spent sentinel
/// on a miss.
pub fn access_by_txid<'c>(
    view: &'c mut CoinsViewCache<'_>,
    txid: &Txid,
) -> Result<&'c Coin> {
    for vout in 0..MAX_OUTPUTS_PER_BLOCK {
        let outpoint = OutPoint::new(*txid, vout);
        if view.have_coin(&outpoint)? {
            return view.access_coin(&outpoint);
        }
    }
    Ok(Coin::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCoinsView;
    use bitcoin::absolute::LockTime;
    use bitcoin::blockdata::transaction::{TxIn, Version as TxVersion};
    use bitcoin::hashes::Hash;
    use bitcoin::{Amount, PubkeyHash, ScriptBuf, Sequence, TxOut, Witness};

    fn p2pkh() -> ScriptBuf {
        ScriptBuf::new_p2pkh(&PubkeyHash::all_zeros())
    }

    fn coin(value: u64, height: u32) -> Coin {
        Coin::new(
            TxOut {
                value: Amount::from_sat(value),
                script_pubkey: p2pkh(),
            },
            height,
            false,
        )
    }

    fn outpoint(tag: u8) -> OutPoint {
        OutPoint::new(Txid::from_byte_array([tag; 32]), 0)
    }

    fn coinbase_tx(tag: u8) -> Transaction {
        Transaction {
            version: TxVersion::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(vec![0x03, tag, 0, 0]),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(5_000_000_000),
                script_pubkey: p2pkh(),
            }],
        }
    }

    fn spending_tx(prevouts: &[OutPoint]) -> Transaction {
        Transaction {
            version: TxVersion::TWO,
            lock_time: LockTime::ZERO,
            input: prevouts
                .iter()
                .map(|prevout| TxIn {
                    previous_output: *prevout,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: vec![TxOut {
                value: Amount::from_sat(1_000_000),
                script_pubkey: p2pkh(),
            }],
        }
    }

    fn assert_usage_consistent(cache: &CoinsViewCache<'_>) {
        let expected: usize = cache
            .cache_coins
            .values()
            .map(|entry| entry.coin.dynamic_memory_usage())
            .sum();
        assert_eq!(cache.cached_coins_usage, expected);
    }

    #[test]
    fn test_spend_through_fresh_collapses() {
        let mut backend = InMemoryCoinsView::new();
        let mut cache = CoinsViewCache::new(&mut backend);

        cache.add_coin(outpoint(1), coin(100, 1), false).unwrap();
        let entry = &cache.cache_coins[&outpoint(1)];
        assert!(entry.dirty && entry.fresh);
        assert_usage_consistent(&cache);

        let spent = cache.spend_coin(&outpoint(1)).unwrap();
        assert_eq!(spent.unwrap(), coin(100, 1));
        assert!(cache.cache_coins.is_empty());
        assert_usage_consistent(&cache);

        cache.flush().unwrap();
        drop(cache);
        assert_eq!(backend.coin_count(), 0);
    }

    #[test]
    fn test_spend_through_dirty_persists() {
        let mut backend = InMemoryCoinsView::new();
        backend.put_coin(outpoint(1), coin(100, 1));

        let mut cache = CoinsViewCache::new(&mut backend);
        let spent = cache.spend_coin(&outpoint(1)).unwrap();
        assert_eq!(spent.unwrap(), coin(100, 1));

        let entry = &cache.cache_coins[&outpoint(1)];
        assert!(entry.dirty && !entry.fresh);
        assert!(entry.coin.is_spent());
        assert_usage_consistent(&cache);

        cache.flush().unwrap();
        drop(cache);
        assert_eq!(backend.coin_count(), 0);
    }

    #[test]
    fn test_two_level_merge_of_fresh_and_spend() {
        let mut grandparent = InMemoryCoinsView::new();
        let mut parent = CoinsViewCache::new(&mut grandparent);

        {
            let mut child = CoinsViewCache::new(&mut parent);
            child.add_coin(outpoint(1), coin(100, 1), false).unwrap();
            child.flush().unwrap();
        }

        let entry = &parent.cache_coins[&outpoint(1)];
        assert!(entry.dirty && entry.fresh);

        parent.spend_coin(&outpoint(1)).unwrap().unwrap();
        assert!(parent.cache_coins.is_empty());

        parent.flush().unwrap();
        drop(parent);
        assert_eq!(grandparent.coin_count(), 0);
    }

    #[test]
    fn test_coinbase_overwrite_allowed() {
        let mut backend = InMemoryCoinsView::new();
        let mut cache = CoinsViewCache::new(&mut backend);

        let tx = coinbase_tx(1);
        add_coins(&mut cache, &tx, 10, false).unwrap();
        // The historical duplicate-coinbase case: same txid added again.
        add_coins(&mut cache, &tx, 11, false).unwrap();

        let outpoint = OutPoint::new(tx.compute_txid(), 0);
        assert!(cache.have_coin(&outpoint).unwrap());
        assert_eq!(cache.get_coin(&outpoint).unwrap().unwrap().height, 11);
    }

    #[test]
    fn test_duplicate_non_coinbase_rejected() {
        let mut backend = InMemoryCoinsView::new();
        let mut cache = CoinsViewCache::new(&mut backend);

        let tx = spending_tx(&[outpoint(9)]);
        add_coins(&mut cache, &tx, 10, false).unwrap();

        let result = add_coins(&mut cache, &tx, 11, false);
        assert!(matches!(result, Err(Error::OverwriteUnspent(_))));

        // Probing first makes the overwrite explicit and legal.
        add_coins(&mut cache, &tx, 11, true).unwrap();
    }

    #[test]
    fn test_fresh_misapplied_detected() {
        let mut backend = InMemoryCoinsView::new();
        let mut parent = CoinsViewCache::new(&mut backend);
        parent.add_coin(outpoint(1), coin(100, 1), false).unwrap();

        let mut batch = CoinsMap::default();
        batch.insert(
            outpoint(1),
            CacheEntry {
                coin: coin(200, 2),
                dirty: true,
                fresh: true,
            },
        );

        let result = parent.batch_write(batch, None, NameCache::default());
        assert!(matches!(result, Err(Error::FreshAppliedToExisting(_))));
    }

    #[test]
    fn test_unspendable_coin_dropped() {
        let mut backend = InMemoryCoinsView::new();
        let mut cache = CoinsViewCache::new(&mut backend);

        let unspendable = Coin::new(
            TxOut {
                value: Amount::from_sat(1),
                script_pubkey: ScriptBuf::from_bytes(vec![0x6a]),
            },
            1,
            false,
        );
        cache.add_coin(outpoint(1), unspendable, false).unwrap();

        assert!(cache.cache_coins.is_empty());
        assert_eq!(cache.cached_coins_usage, 0);
        assert!(!cache.have_coin(&outpoint(1)).unwrap());
    }

    #[test]
    fn test_uncache_only_drops_plain_entries() {
        let mut backend = InMemoryCoinsView::new();
        backend.put_coin(outpoint(1), coin(100, 1));

        let mut cache = CoinsViewCache::new(&mut backend);

        // Read-through image: uncache drops it, a re-read restores it.
        assert!(cache.have_coin(&outpoint(1)).unwrap());
        cache.uncache(&outpoint(1));
        assert!(!cache.have_coin_in_cache(&outpoint(1)));
        assert_usage_consistent(&cache);
        assert!(cache.have_coin(&outpoint(1)).unwrap());

        // Flagged entry: uncache must not lose it.
        cache.add_coin(outpoint(2), coin(200, 2), false).unwrap();
        cache.uncache(&outpoint(2));
        assert!(cache.have_coin_in_cache(&outpoint(2)));
        assert_usage_consistent(&cache);
    }

    #[test]
    fn test_have_coin_in_cache_does_not_fetch() {
        let mut backend = InMemoryCoinsView::new();
        backend.put_coin(outpoint(1), coin(100, 1));

        let mut cache = CoinsViewCache::new(&mut backend);
        assert!(!cache.have_coin_in_cache(&outpoint(1)));

        assert!(cache.have_coin(&outpoint(1)).unwrap());
        assert!(cache.have_coin_in_cache(&outpoint(1)));
    }

    #[test]
    fn test_memory_accounting_over_mixed_ops() {
        let mut backend = InMemoryCoinsView::new();
        backend.put_coin(outpoint(1), coin(100, 1));

        let mut cache = CoinsViewCache::new(&mut backend);
        assert_usage_consistent(&cache);

        assert!(cache.get_coin(&outpoint(1)).unwrap().is_some());
        assert_usage_consistent(&cache);

        let big_script = Coin::new(
            TxOut {
                value: Amount::from_sat(7),
                script_pubkey: ScriptBuf::from_bytes(vec![0x51; 80]),
            },
            2,
            false,
        );
        cache.add_coin(outpoint(2), big_script, false).unwrap();
        assert_usage_consistent(&cache);

        cache.add_coin(outpoint(2), coin(8, 3), true).unwrap();
        assert_usage_consistent(&cache);

        cache.spend_coin(&outpoint(1)).unwrap().unwrap();
        assert_usage_consistent(&cache);

        cache.spend_coin(&outpoint(2)).unwrap().unwrap();
        assert_usage_consistent(&cache);

        cache.flush().unwrap();
        assert_eq!(cache.cached_coins_usage, 0);
    }

    #[test]
    fn test_access_coin_answers_sentinel() {
        let mut backend = InMemoryCoinsView::new();
        let mut cache = CoinsViewCache::new(&mut backend);

        let missing = cache.access_coin(&outpoint(1)).unwrap();
        assert!(missing.is_spent());
    }

    #[test]
    fn test_access_by_txid_scans_outputs() {
        let mut backend = InMemoryCoinsView::new();
        let mut cache = CoinsViewCache::new(&mut backend);

        let txid = Txid::from_byte_array([5; 32]);
        cache
            .add_coin(OutPoint::new(txid, 2), coin(300, 4), false)
            .unwrap();

        let found = access_by_txid(&mut cache, &txid).unwrap();
        assert_eq!(found.value(), Amount::from_sat(300));

        let missing = access_by_txid(&mut cache, &Txid::from_byte_array([6; 32])).unwrap();
        assert!(missing.is_spent());
    }

    #[test]
    fn test_have_inputs() {
        let mut backend = InMemoryCoinsView::new();
        backend.put_coin(outpoint(1), coin(100, 1));
        backend.put_coin(outpoint(2), coin(200, 1));

        let mut cache = CoinsViewCache::new(&mut backend);

        let tx = spending_tx(&[outpoint(1), outpoint(2)]);
        assert!(cache.have_inputs(&tx).unwrap());

        let missing = spending_tx(&[outpoint(1), outpoint(3)]);
        assert!(!cache.have_inputs(&missing).unwrap());

        assert!(cache.have_inputs(&coinbase_tx(1)).unwrap());
    }

    #[test]
    fn test_spent_parent_record_materializes_fresh() {
        let mut backend = InMemoryCoinsView::new();
        backend.put_coin(outpoint(1), Coin::default());

        let mut cache = CoinsViewCache::new(&mut backend);
        assert!(cache.get_coin(&outpoint(1)).unwrap().is_none());

        let entry = &cache.cache_coins[&outpoint(1)];
        assert!(entry.fresh && !entry.dirty);

        // Re-creating over a non-dirty spent slot keeps FRESH, so the
        // subsequent spend collapses and nothing reaches the backend.
        cache.add_coin(outpoint(1), coin(100, 1), false).unwrap();
        cache.spend_coin(&outpoint(1)).unwrap().unwrap();
        assert!(cache.cache_coins.is_empty());
        cache.flush().unwrap();
    }

    #[test]
    fn test_readd_over_dirty_spend_stays_unfresh() {
        let mut backend = InMemoryCoinsView::new();
        backend.put_coin(outpoint(1), coin(100, 1));

        let mut cache = CoinsViewCache::new(&mut backend);
        cache.spend_coin(&outpoint(1)).unwrap().unwrap();

        // Reorg shape: the spent coin is re-added before any flush. The
        // entry still owes the parent a write, so it must not be FRESH.
        cache.add_coin(outpoint(1), coin(100, 1), false).unwrap();
        let entry = &cache.cache_coins[&outpoint(1)];
        assert!(entry.dirty && !entry.fresh);

        // Spending again must now keep a dirty spent record.
        cache.spend_coin(&outpoint(1)).unwrap().unwrap();
        assert!(cache.cache_coins[&outpoint(1)].coin.is_spent());

        cache.flush().unwrap();
        drop(cache);
        assert_eq!(backend.coin_count(), 0);
    }

    #[test]
    fn test_best_block_lazy_and_set() {
        let mut backend = InMemoryCoinsView::new();
        let hash = BlockHash::from_byte_array([9; 32]);
        backend
            .batch_write(CoinsMap::default(), Some(hash), NameCache::default())
            .unwrap();

        let mut cache = CoinsViewCache::new(&mut backend);
        assert_eq!(cache.best_block(), Some(hash));

        let newer = BlockHash::from_byte_array([10; 32]);
        cache.set_best_block(newer);
        assert_eq!(cache.best_block(), Some(newer));

        cache.flush().unwrap();
        drop(cache);
        assert_eq!(backend.best_block(), Some(newer));
    }

    #[test]
    fn test_flush_on_empty_cache_is_a_noop() {
        let mut backend = InMemoryCoinsView::new();
        let mut cache = CoinsViewCache::new(&mut backend);
        cache.flush().unwrap();
        drop(cache);
        assert_eq!(backend.best_block(), None);
    }

    #[test]
    fn test_emplace_coin_internal_danger_marks_dirty_only() {
        let mut backend = InMemoryCoinsView::new();
        let mut cache = CoinsViewCache::new(&mut backend);

        cache.emplace_coin_internal_danger(outpoint(1), coin(100, 1));
        let entry = &cache.cache_coins[&outpoint(1)];
        assert!(entry.dirty && !entry.fresh);
        assert_usage_consistent(&cache);
    }

    #[test]
    fn test_reallocate_cache_after_flush() {
        let mut backend = InMemoryCoinsView::new();
        let mut cache = CoinsViewCache::new(&mut backend);
        cache.add_coin(outpoint(1), coin(100, 1), false).unwrap();
        cache.flush().unwrap();
        cache.reallocate_cache();
        assert_eq!(cache.cache_size(), 0);
    }

    #[test]
    #[should_panic(expected = "non-empty")]
    fn test_reallocate_cache_panics_when_occupied() {
        let mut backend = InMemoryCoinsView::new();
        let mut cache = CoinsViewCache::new(&mut backend);
        cache.add_coin(outpoint(1), coin(100, 1), false).unwrap();
        cache.reallocate_cache();
    }

    #[test]
    fn test_backend_read_error_propagates() {
        let mut backend = InMemoryCoinsView::new();
        backend.set_read_failure(true);

        let mut cache = CoinsViewCache::new(&mut backend);
        assert!(matches!(
            cache.get_coin(&outpoint(1)),
            Err(Error::BackendRead(_))
        ));
    }

    fn name_record(value: &[u8], height: u32) -> NameData {
        NameData::new(value.to_vec(), height, outpoint(0xaa))
    }

    #[test]
    fn test_set_name_then_undo_restores_prior_state() {
        let mut backend = InMemoryCoinsView::new();
        let d0 = name_record(b"value-0", 50);
        backend.put_name(b"d/name", d0.clone());

        let mut cache = CoinsViewCache::with_name_history(&mut backend);

        let d1 = name_record(b"value-1", 90);
        cache.set_name(b"d/name", d1.clone(), false);
        assert_eq!(cache.get_name(b"d/name"), Some(d1.clone()));
        assert_eq!(
            cache.get_name_history(b"d/name").unwrap().top(),
            Some(&d0)
        );
        assert!(cache.names_for_height(90).contains(&b"d/name".to_vec()));
        assert!(!cache.names_for_height(50).contains(&b"d/name".to_vec()));

        // Disconnecting the block restores the old record and pops it off
        // the history again.
        cache.set_name(b"d/name", d0.clone(), true);
        assert_eq!(cache.get_name(b"d/name"), Some(d0.clone()));
        assert!(cache.get_name_history(b"d/name").unwrap().is_empty());
        assert!(cache.names_for_height(50).contains(&b"d/name".to_vec()));
        assert!(!cache.names_for_height(90).contains(&b"d/name".to_vec()));

        cache.flush().unwrap();
        drop(cache);
        assert_eq!(backend.get_name(b"d/name"), Some(d0));
        assert!(backend
            .get_name_history(b"d/name")
            .map_or(true, |h| h.is_empty()));
        assert_eq!(
            backend.names_for_height(50),
            [b"d/name".to_vec()].into_iter().collect()
        );
        assert!(backend.names_for_height(90).is_empty());
        assert!(backend.validate_name_db(&mut || Ok(())).unwrap());
    }

    #[test]
    fn test_register_name_without_prior_record() {
        let mut backend = InMemoryCoinsView::new();
        let mut cache = CoinsViewCache::with_name_history(&mut backend);

        cache.set_name(b"d/new", name_record(b"v", 10), false);
        assert!(cache.get_name(b"d/new").is_some());
        // First registration has nothing to push.
        assert!(cache.get_name_history(b"d/new").is_none());
    }

    #[test]
    #[should_panic(expected = "unregistered")]
    fn test_undo_of_unregistered_name_panics() {
        let mut backend = InMemoryCoinsView::new();
        let mut cache = CoinsViewCache::with_name_history(&mut backend);
        cache.set_name(b"d/ghost", name_record(b"v", 10), true);
    }

    #[test]
    fn test_delete_name() {
        let mut backend = InMemoryCoinsView::new();
        backend.put_name(b"d/name", name_record(b"v", 20));

        let mut cache = CoinsViewCache::with_name_history(&mut backend);
        cache.delete_name(b"d/name");

        assert!(cache.get_name(b"d/name").is_none());
        assert!(cache.names_for_height(20).is_empty());

        cache.flush().unwrap();
        drop(cache);
        assert!(backend.get_name(b"d/name").is_none());
        assert!(backend.names_for_height(20).is_empty());
    }

    #[test]
    #[should_panic(expected = "never registered")]
    fn test_delete_of_unknown_name_panics() {
        let mut backend = InMemoryCoinsView::new();
        let mut cache = CoinsViewCache::new(&mut backend);
        cache.delete_name(b"d/ghost");
    }

    #[test]
    fn test_stacked_caches_carry_name_changes() {
        let mut backend = InMemoryCoinsView::new();
        let mut parent = CoinsViewCache::with_name_history(&mut backend);

        {
            let mut child = CoinsViewCache::with_name_history(&mut parent);
            child.set_name(b"d/a", name_record(b"v", 5), false);
            child.flush().unwrap();
        }

        assert_eq!(parent.get_name(b"d/a"), Some(name_record(b"v", 5)));
        assert!(parent.names_for_height(5).contains(&b"d/a".to_vec()));
    }

    #[test]
    fn test_iterate_names_merges_cache_over_base() {
        let mut backend = InMemoryCoinsView::new();
        backend.put_name(b"d/a", name_record(b"base-a", 1));
        backend.put_name(b"d/b", name_record(b"base-b", 1));

        let mut cache = CoinsViewCache::new(&mut backend);
        cache.set_name(b"d/b", name_record(b"cache-b", 2), false);
        cache.set_name(b"d/c", name_record(b"cache-c", 2), false);
        cache.delete_name(b"d/a");

        let names: Vec<Name> = cache.iterate_names().map(|(name, _)| name).collect();
        assert_eq!(names, vec![b"d/b".to_vec(), b"d/c".to_vec()]);

        let values: Vec<Vec<u8>> = cache.iterate_names().map(|(_, data)| data.value).collect();
        assert_eq!(values, vec![b"cache-b".to_vec(), b"cache-c".to_vec()]);
    }
}
