//! An in-memory realization of the full view contract.
//!
//! This is the reference backend: ordered tables for coins, names, history
//! and the expiration index, with batch application matching what a durable
//! store does. It backs the test suites and any embedder that wants a
//! throwaway chainstate.

use std::collections::{btree_map, BTreeMap, BTreeSet};

use bitcoin::{BlockHash, OutPoint};
use namechain_primitives::{Coin, Name, NameData, NameHistory};

use crate::cache::CoinsMap;
use crate::name_cache::{ExpireEntry, NameCache};
use crate::view::{CoinsCursor, CoinsView, InterruptionPoint};
use crate::{Error, Result};

/// How often validation walks call the interruption probe.
const INTERRUPT_INTERVAL: usize = 64;

/// In-memory backing store for a view stack.
#[derive(Default)]
pub struct InMemoryCoinsView {
    coins: BTreeMap<OutPoint, Coin>,
    best_block: Option<BlockHash>,
    names: BTreeMap<Name, NameData>,
    histories: BTreeMap<Name, NameHistory>,
    expire_index: BTreeSet<ExpireEntry>,
    /// When set, coin reads answer with an error, for exercising the failure
    /// path of the layers above.
    fail_reads: bool,
}

impl InMemoryCoinsView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a coin verbatim, spent or not.
    ///
    /// A durable store never keeps spent records, but a parent view
    /// answering a spent coin is part of the contract, and tests exercise
    /// the cache's handling of it through this.
    pub fn put_coin(&mut self, outpoint: OutPoint, coin: Coin) {
        self.coins.insert(outpoint, coin);
    }

    /// Seed a name record, keeping the expiration index consistent.
    pub fn put_name(&mut self, name: &[u8], data: NameData) {
        if let Some(old) = self.names.get(name) {
            self.expire_index.remove(&ExpireEntry::new(name, old.height));
        }
        self.expire_index.insert(ExpireEntry::new(name, data.height));
        self.names.insert(name.to_vec(), data);
    }

    /// Seed a history stack.
    pub fn put_history(&mut self, name: &[u8], history: NameHistory) {
        self.histories.insert(name.to_vec(), history);
    }

    /// Make subsequent coin reads fail, as a broken backend would.
    pub fn set_read_failure(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Number of live coins held.
    pub fn coin_count(&self) -> usize {
        self.coins.len()
    }
}

struct MemoryCursor<'a> {
    iter: btree_map::Iter<'a, OutPoint, Coin>,
    best_block: Option<BlockHash>,
}

impl Iterator for MemoryCursor<'_> {
    type Item = (OutPoint, Coin);

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|(outpoint, coin)| (*outpoint, coin.clone()))
    }
}

impl CoinsCursor for MemoryCursor<'_> {
    fn best_block(&self) -> Option<BlockHash> {
        self.best_block
    }
}

impl CoinsView for InMemoryCoinsView {
    fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        if self.fail_reads {
            return Err(Error::BackendRead(format!(
                "simulated read failure for {outpoint}"
            )));
        }
        Ok(self.coins.get(outpoint).cloned())
    }

    fn best_block(&mut self) -> Option<BlockHash> {
        self.best_block
    }

    fn batch_write(
        &mut self,
        coins: CoinsMap,
        best_block: Option<BlockHash>,
        names: NameCache,
    ) -> Result<()> {
        for (outpoint, entry) in coins {
            if !entry.dirty {
                continue;
            }
            if entry.coin.is_spent() {
                self.coins.remove(&outpoint);
            } else {
                self.coins.insert(outpoint, entry.coin);
            }
        }

        if let Some(hash) = best_block {
            self.best_block = Some(hash);
        }

        let (entries, histories, expire_index) = names.into_parts();
        for (name, update) in entries {
            match update {
                Some(data) => {
                    self.names.insert(name, data);
                }
                None => {
                    self.names.remove(&name);
                }
            }
        }
        for (name, history) in histories {
            if history.is_empty() {
                self.histories.remove(&name);
            } else {
                self.histories.insert(name, history);
            }
        }
        for (slot, add) in expire_index {
            if add {
                self.expire_index.insert(slot);
            } else {
                self.expire_index.remove(&slot);
            }
        }

        Ok(())
    }

    fn cursor(&self) -> Option<Box<dyn CoinsCursor + '_>> {
        Some(Box::new(MemoryCursor {
            iter: self.coins.iter(),
            best_block: self.best_block,
        }))
    }

    fn estimate_size(&self) -> usize {
        self.coins
            .values()
            .map(|coin| 36 + 16 + coin.output.script_pubkey.len())
            .sum()
    }

    fn get_name(&mut self, name: &[u8]) -> Option<NameData> {
        self.names.get(name).cloned()
    }

    fn get_name_history(&mut self, name: &[u8]) -> Option<NameHistory> {
        self.histories.get(name).cloned()
    }

    fn names_for_height(&mut self, height: u32) -> BTreeSet<Name> {
        let start = ExpireEntry {
            height,
            name: Name::new(),
        };
        self.expire_index
            .range(start..)
            .take_while(|entry| entry.height == height)
            .map(|entry| entry.name.clone())
            .collect()
    }

    fn iterate_names(&self) -> Box<dyn Iterator<Item = (Name, NameData)> + '_> {
        Box::new(
            self.names
                .iter()
                .map(|(name, data)| (name.clone(), data.clone())),
        )
    }

    fn validate_name_db(&mut self, interruption_point: InterruptionPoint<'_>) -> Result<bool> {
        let mut steps = 0usize;

        for (name, data) in &self.names {
            steps += 1;
            if steps % INTERRUPT_INTERVAL == 0 {
                interruption_point()?;
            }
            if !self.expire_index.contains(&ExpireEntry::new(name, data.height)) {
                tracing::warn!(
                    "name registry inconsistency: record at height {} missing from expire index",
                    data.height
                );
                return Ok(false);
            }
        }

        for slot in &self.expire_index {
            steps += 1;
            if steps % INTERRUPT_INTERVAL == 0 {
                interruption_point()?;
            }
            match self.names.get(&slot.name) {
                Some(data) if data.height == slot.height => {}
                _ => {
                    tracing::warn!(
                        "name registry inconsistency: stale expire entry at height {}",
                        slot.height
                    );
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}
