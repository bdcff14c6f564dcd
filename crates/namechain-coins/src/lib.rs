//! Layered views over the UTXO set and the auxiliary name registry.
//!
//! The chainstate is organized as a stack of *coin views*. Each view answers
//! lookups for coins and names and accepts batched writes; a view is either a
//! backend (the persistent store, or [`InMemoryCoinsView`] here), a cache
//! layered on top of another view, or a proxy.
//!
//! ## Architecture
//!
//! - **[`CoinsView`]**: the read/write contract every layer implements.
//! - **[`CoinsViewBacked`]**: forwarding proxy holding a rebindable reference
//!   to its parent.
//! - **[`CoinsViewCache`]**: in-memory mutation buffer with per-entry
//!   dirty/fresh bookkeeping. Block processing spends and creates coins in a
//!   cache and folds the result into the parent with one [`CoinsViewCache::flush`].
//! - **[`CoinsViewErrorCatcher`]**: converts backend read failures into a
//!   process abort, after running registered shutdown callbacks.
//! - **[`NameCache`]**: delta buffer of name-registry mutations that travels
//!   with every coin batch so the registry stays consistent with the UTXO set
//!   across reorgs.
//!
//! Caches stack: a short-lived cache over another cache is the normal way to
//! evaluate a block speculatively and discard the result.

mod backed;
mod cache;
mod catcher;
mod error;
mod memory;
mod name_cache;
mod view;

pub use backed::CoinsViewBacked;
pub use cache::{access_by_txid, add_coins, CacheEntry, CoinsMap, CoinsViewCache};
pub use catcher::CoinsViewErrorCatcher;
pub use error::Error;
pub use memory::InMemoryCoinsView;
pub use name_cache::{ExpireEntry, NameCache};
pub use view::{CoinsCursor, CoinsView, InterruptionPoint};

/// Result type for coin view operations.
pub type Result<T> = std::result::Result<T, Error>;
