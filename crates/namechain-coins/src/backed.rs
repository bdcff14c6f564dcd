//! A view that forwards everything to a rebindable parent.

use std::collections::BTreeSet;

use bitcoin::{BlockHash, OutPoint};
use namechain_primitives::{Coin, Name, NameData, NameHistory};

use crate::cache::CoinsMap;
use crate::name_cache::NameCache;
use crate::view::{CoinsCursor, CoinsView, InterruptionPoint};
use crate::Result;

/// Forwarding proxy over a parent view.
///
/// The parent reference can be swapped with [`CoinsViewBacked::set_backend`],
/// so a layer written against this proxy can be retargeted, e.g. from the
/// persistent store to a cache over it.
pub struct CoinsViewBacked<'a> {
    base: &'a mut dyn CoinsView,
}

impl<'a> CoinsViewBacked<'a> {
    pub fn new(base: &'a mut dyn CoinsView) -> Self {
        Self { base }
    }

    /// Rebind the parent.
    pub fn set_backend(&mut self, base: &'a mut dyn CoinsView) {
        self.base = base;
    }
}

impl CoinsView for CoinsViewBacked<'_> {
    fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        self.base.get_coin(outpoint)
    }

    fn have_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        self.base.have_coin(outpoint)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCoinsView;
    use bitcoin::hashes::Hash;
    use bitcoin::{Amount, ScriptBuf, Txid};

    #[test]
    fn test_forwards_and_rebinds() {
        let outpoint = OutPoint::new(Txid::all_zeros(), 0);
        let coin = Coin::new(
            bitcoin::TxOut {
                value: Amount::from_sat(1_000),
                script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
            },
            3,
            false,
        );

        let mut first = InMemoryCoinsView::new();
        first.put_coin(outpoint, coin.clone());
        let mut second = InMemoryCoinsView::new();

        let mut backed = CoinsViewBacked::new(&mut first);
        assert!(backed.have_coin(&outpoint).unwrap());

        backed.set_backend(&mut second);
        assert!(!backed.have_coin(&outpoint).unwrap());
    }
}
