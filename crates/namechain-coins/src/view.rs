//! The abstract contract every layer of the view stack implements.

use std::collections::BTreeSet;

use bitcoin::{BlockHash, OutPoint};
use namechain_primitives::{Coin, Name, NameData, NameHistory};

use crate::cache::CoinsMap;
use crate::name_cache::NameCache;
use crate::{Error, Result};

/// Probe evaluated periodically by long-running validation; returning an
/// error aborts the validation cleanly.
pub type InterruptionPoint<'a> = &'a mut dyn FnMut() -> Result<()>;

/// Ordered iteration over a view's coins, for auditing.
pub trait CoinsCursor: Iterator<Item = (OutPoint, Coin)> {
    /// The best block the iterated state reflects.
    fn best_block(&self) -> Option<BlockHash>;
}

/// Read/write contract for coins, names, name history and the best-block
/// marker.
///
/// Reads take `&mut self`: a layered view materializes entries in its local
/// map on first read, and callers are required to hold exclusive access to
/// any one view anyway (the surrounding validator serializes on a
/// process-wide mutex).
///
/// The base definitions answer "nothing here": `None`, `false`, empty. Only
/// `have_coin` has real logic, composed from `get_coin`.
pub trait CoinsView {
    /// Retrieve the coin at `outpoint`, if this view knows about it.
    ///
    /// Backends that retain spent records may return a spent coin; callers
    /// that need liveness use [`CoinsView::have_coin`].
    fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        let _ = outpoint;
        Ok(None)
    }

    /// Whether a live (unspent) coin exists at `outpoint`.
    fn have_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        Ok(self
            .get_coin(outpoint)?
            .is_some_and(|coin| !coin.is_spent()))
    }

    /// Hash of the block whose state this view reflects, once known.
    fn best_block(&mut self) -> Option<BlockHash> {
        None
    }

    /// Hashes of the chain heads recorded while a flush is in progress, for
    /// crash recovery bookkeeping. Empty outside of a flush.
    fn head_blocks(&mut self) -> Vec<BlockHash> {
        Vec::new()
    }

    /// Consume a batch of coin changes, the new best block, and the name
    /// registry delta that belongs to the same state transition.
    fn batch_write(
        &mut self,
        coins: CoinsMap,
        best_block: Option<BlockHash>,
        names: NameCache,
    ) -> Result<()> {
        let _ = (coins, best_block, names);
        Err(Error::BatchWriteUnsupported)
    }

    /// Ordered iteration over all coins, if this view supports it.
    fn cursor(&self) -> Option<Box<dyn CoinsCursor + '_>> {
        None
    }

    /// Implementation-defined size scalar used by flush heuristics.
    fn estimate_size(&self) -> usize {
        0
    }

    /// The current record for `name`, if registered.
    fn get_name(&mut self, name: &[u8]) -> Option<NameData> {
        let _ = name;
        None
    }

    /// The history stack for `name`, if any updates were recorded.
    fn get_name_history(&mut self, name: &[u8]) -> Option<NameHistory> {
        let _ = name;
        None
    }

    /// All names whose current record was set at `height`.
    fn names_for_height(&mut self, height: u32) -> BTreeSet<Name> {
        let _ = height;
        BTreeSet::new()
    }

    /// Iterate all registered names in name order.
    fn iterate_names(&self) -> Box<dyn Iterator<Item = (Name, NameData)> + '_> {
        Box::new(std::iter::empty())
    }

    /// Cross-check the name registry for internal consistency.
    ///
    /// `interruption_point` is evaluated periodically; an error from it
    /// aborts the validation cleanly. Returns `Ok(false)` if this view has
    /// nothing to validate or found an inconsistency.
    fn validate_name_db(&mut self, interruption_point: InterruptionPoint<'_>) -> Result<bool> {
        let _ = interruption_point;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    struct BareView;

    impl CoinsView for BareView {}

    #[test]
    fn test_base_definitions_are_empty() {
        let mut view = BareView;
        let outpoint = OutPoint::new(Txid::all_zeros(), 0);

        assert!(view.get_coin(&outpoint).unwrap().is_none());
        assert!(!view.have_coin(&outpoint).unwrap());
        assert!(view.best_block().is_none());
        assert!(view.head_blocks().is_empty());
        assert!(view.cursor().is_none());
        assert_eq!(view.estimate_size(), 0);
        assert!(view.get_name(b"d/name").is_none());
        assert!(view.names_for_height(100).is_empty());
        assert_eq!(view.iterate_names().count(), 0);
        assert!(!view.validate_name_db(&mut || Ok(())).unwrap());

        let write = view.batch_write(CoinsMap::default(), None, NameCache::default());
        assert!(matches!(write, Err(Error::BatchWriteUnsupported)));
    }
}
