//! A view that turns backend read failures into a process abort.

use std::collections::BTreeSet;

use bitcoin::{BlockHash, OutPoint};
use namechain_primitives::{Coin, Name, NameData, NameHistory};

use crate::cache::CoinsMap;
use crate::name_cache::NameCache;
use crate::view::{CoinsCursor, CoinsView, InterruptionPoint};
use crate::Result;

/// Wraps the view over the persistent store and intercepts coin read
/// failures.
///
/// A failed read runs every registered callback (to kick off shutdown) and
/// then aborts the process. Returning the error instead would reach callers
/// as "coin absent", which at consensus level is a lie; writes downstream
/// are atomic, so aborting leaves no half-flushed state behind.
pub struct CoinsViewErrorCatcher<'a> {
    base: &'a mut dyn CoinsView,
    err_callbacks: Vec<Box<dyn Fn() + Send>>,
}

impl<'a> CoinsViewErrorCatcher<'a> {
    pub fn new(base: &'a mut dyn CoinsView) -> Self {
        Self {
            base,
            err_callbacks: Vec::new(),
        }
    }

    /// Register a callback to run, in registration order, before an abort
    /// triggered by a read failure.
    pub fn add_read_err_callback(&mut self, callback: Box<dyn Fn() + Send>) {
        self.err_callbacks.push(callback);
    }
}

impl CoinsView for CoinsViewErrorCatcher<'_> {
    fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        match self.base.get_coin(outpoint) {
            Ok(coin) => Ok(coin),
            Err(err) => {
                for callback in &self.err_callbacks {
                    callback();
                }
                tracing::error!("Error reading from database: {err}");
                std::process::abort();
            }
        }
    }

    fn have_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        Ok(self
            .get_coin(outpoint)?
            .is_some_and(|coin| !coin.is_spent()))
    }

    fn best_block(&mut self) -> Option<BlockHash> {
        self.base.best_block()
    }

    fn head_blocks(&mut self) -> Vec<BlockHash> {
        self.base.head_blocks()
    }

    fn batch_write(
        &mut self,
        coins: CoinsMap,
        best_block: Option<BlockHash>,
        names: NameCache,
    ) -> Result<()> {
        self.base.batch_write(coins, best_block, names)
    }

    fn cursor(&self) -> Option<Box<dyn CoinsCursor + '_>> {
        self.base.cursor()
    }

    fn estimate_size(&self) -> usize {
        self.base.estimate_size()
    }

    fn get_name(&mut self, name: &[u8]) -> Option<NameData> {
        self.base.get_name(name)
    }

    fn get_name_history(&mut self, name: &[u8]) -> Option<NameHistory> {
        self.base.get_name_history(name)
    }

    fn names_for_height(&mut self, height: u32) -> BTreeSet<Name> {
        self.base.names_for_height(height)
    }

    fn iterate_names(&self) -> Box<dyn Iterator<Item = (Name, NameData)> + '_> {
        self.base.iterate_names()
    }

    fn validate_name_db(&mut self, interruption_point: InterruptionPoint<'_>) -> Result<bool> {
        self.base.validate_name_db(interruption_point)
    }
}
