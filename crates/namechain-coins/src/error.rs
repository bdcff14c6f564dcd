//! Error types for the coin view stack.

use bitcoin::OutPoint;

/// Errors surfaced by coin view operations.
///
/// The first two variants are logic errors: a caller violated the cache's
/// flag discipline. They abort validation of the block being processed but
/// are recoverable for the process. `BackendRead` is different: once it
/// crosses a [`CoinsViewErrorCatcher`](crate::CoinsViewErrorCatcher) it ends
/// the process, because treating it as "coin absent" would corrupt consensus.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `add_coin` without overwrite permission hit a live coin.
    #[error("attempted to overwrite an unspent coin: {0}")]
    OverwriteUnspent(OutPoint),

    /// A batch carried a FRESH entry for an outpoint the parent holds live.
    #[error("FRESH flag misapplied to a coin that exists in the parent cache: {0}")]
    FreshAppliedToExisting(OutPoint),

    /// The backing store failed to answer a read.
    #[error("backend read failed: {0}")]
    BackendRead(String),

    /// The view does not accept batched writes.
    #[error("coin view does not accept batch writes")]
    BatchWriteUnsupported,

    /// A long-running validation was interrupted by its interruption probe.
    #[error("operation interrupted")]
    Interrupted,
}
