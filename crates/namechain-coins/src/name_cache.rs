//! Delta buffer for the auxiliary name registry.
//!
//! The cache only tracks *changes* relative to its backing view: an entry
//! map with tombstones, per-name history replacements, and an add/remove
//! delta over the (height, name) expiration index. It never caches plain
//! reads.

use std::cmp::Ordering;
use std::collections::{btree_map, BTreeMap, BTreeSet};
use std::iter::Peekable;

use namechain_primitives::{Name, NameData, NameHistory};

/// One slot of the expiration index: the height a record was set at,
/// together with the name. Ordered by height first so a height range scan is
/// a contiguous walk.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExpireEntry {
    pub height: u32,
    pub name: Name,
}

impl ExpireEntry {
    pub fn new(name: &[u8], height: u32) -> Self {
        Self {
            height,
            name: name.to_vec(),
        }
    }
}

/// Buffered name-registry mutations.
///
/// `entries` maps a name to its new record, or to a tombstone (`None`) if the
/// name was deleted. `histories` holds full replacement history stacks.
/// `expire_index` records additions (`true`) and removals (`false`) against
/// the backing view's expiration index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NameCache {
    entries: BTreeMap<Name, Option<NameData>>,
    histories: BTreeMap<Name, NameHistory>,
    expire_index: BTreeMap<ExpireEntry, bool>,
}

impl NameCache {
    /// The buffered record for `name`, if one was set (tombstones answer
    /// `None` here; use [`NameCache::is_deleted`] to tell them apart from
    /// "no buffered change").
    pub fn get(&self, name: &[u8]) -> Option<&NameData> {
        self.entries.get(name).and_then(|entry| entry.as_ref())
    }

    /// Whether `name` was tombstoned in this cache.
    pub fn is_deleted(&self, name: &[u8]) -> bool {
        matches!(self.entries.get(name), Some(None))
    }

    /// Buffer a new record for `name`, clearing any tombstone.
    pub fn set(&mut self, name: &[u8], data: NameData) {
        self.entries.insert(name.to_vec(), Some(data));
    }

    /// Tombstone `name`.
    pub fn remove(&mut self, name: &[u8]) {
        self.entries.insert(name.to_vec(), None);
    }

    /// The buffered replacement history for `name`.
    pub fn history(&self, name: &[u8]) -> Option<&NameHistory> {
        self.histories.get(name)
    }

    /// Buffer a replacement history stack for `name`. An empty stack is kept
    /// and tells the backend to drop its row.
    pub fn set_history(&mut self, name: &[u8], history: NameHistory) {
        self.histories.insert(name.to_vec(), history);
    }

    /// Record that (`height`, `name`) belongs in the expiration index.
    pub fn add_expire_index(&mut self, name: &[u8], height: u32) {
        self.expire_index.insert(ExpireEntry::new(name, height), true);
    }

    /// Record that (`height`, `name`) must leave the expiration index.
    pub fn remove_expire_index(&mut self, name: &[u8], height: u32) {
        self.expire_index.insert(ExpireEntry::new(name, height), false);
    }

    /// Overlay this cache's expiration delta for one height onto `names`,
    /// which the caller filled from the backing view first.
    pub fn update_names_for_height(&self, height: u32, names: &mut BTreeSet<Name>) {
        let start = ExpireEntry {
            height,
            name: Name::new(),
        };
        for (entry, add) in self.expire_index.range(start..) {
            if entry.height != height {
                break;
            }
            if *add {
                names.insert(entry.name.clone());
            } else {
                names.remove(&entry.name);
            }
        }
    }

    /// Fold a child cache into this one. Child changes win: tombstones
    /// override records, histories replace wholesale, and later expiration
    /// deltas supersede earlier ones for the same slot.
    pub fn apply(&mut self, child: NameCache) {
        let NameCache {
            entries,
            histories,
            expire_index,
        } = child;

        for (name, entry) in entries {
            self.entries.insert(name, entry);
        }
        for (name, history) in histories {
            self.histories.insert(name, history);
        }
        for (slot, add) in expire_index {
            self.expire_index.insert(slot, add);
        }
    }

    /// Merge this cache's deltas over an iterator of the backing view's
    /// records. `base` must be ordered by name; the result is too.
    pub fn iterate<'a>(
        &'a self,
        base: Box<dyn Iterator<Item = (Name, NameData)> + 'a>,
    ) -> impl Iterator<Item = (Name, NameData)> + 'a {
        MergedNameIter {
            base: base.peekable(),
            cache: self.entries.iter().peekable(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.histories.is_empty() && self.expire_index.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.histories.clear();
        self.expire_index.clear();
    }

    /// Decompose into the three underlying maps, for backends applying a
    /// batch.
    #[allow(clippy::type_complexity)]
    pub fn into_parts(
        self,
    ) -> (
        BTreeMap<Name, Option<NameData>>,
        BTreeMap<Name, NameHistory>,
        BTreeMap<ExpireEntry, bool>,
    ) {
        (self.entries, self.histories, self.expire_index)
    }
}

/// Ordered merge of a base name iterator with a cache delta: cache records
/// override base records of the same name, tombstones suppress them.
struct MergedNameIter<'a> {
    base: Peekable<Box<dyn Iterator<Item = (Name, NameData)> + 'a>>,
    cache: Peekable<btree_map::Iter<'a, Name, Option<NameData>>>,
}

impl Iterator for MergedNameIter<'_> {
    type Item = (Name, NameData);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let take_cache = match (self.cache.peek(), self.base.peek()) {
                (None, None) => return None,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (Some((cache_name, _)), Some((base_name, _))) => {
                    match (*cache_name).cmp(base_name) {
                        Ordering::Less => true,
                        Ordering::Greater => false,
                        Ordering::Equal => {
                            // Cache wins; drop the shadowed base record.
                            let _ = self.base.next();
                            true
                        }
                    }
                }
            };

            if !take_cache {
                return self.base.next();
            }

            let (name, entry) = self.cache.next().expect("peeked above; qed");
            match entry {
                Some(data) => return Some((name.clone(), data.clone())),
                // Tombstone: nothing to yield for this name.
                None => continue,
            }
        }
    }
}
