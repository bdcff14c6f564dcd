//! Core data types shared across the namechain state layer.
//!
//! This crate holds the dumb data the chainstate operates on: the [`Coin`]
//! record kept per unspent transaction output, the [`NameData`] and
//! [`NameHistory`] records of the auxiliary name registry, and rough memory
//! accounting helpers used by the caching layer.

mod coin;
mod names;
pub mod memusage;

pub use coin::Coin;
pub use names::{Name, NameData, NameHistory};

use bitcoin::constants::WITNESS_SCALE_FACTOR;
use bitcoin::Weight;

/// Serialized size of the smallest possible transaction output: an 8-byte
/// value plus a 1-byte script length prefix for an empty script.
const MIN_TX_OUTPUT_SIZE: u64 = 9;

/// Weight of the smallest possible transaction output.
const MIN_TX_OUTPUT_WEIGHT: u64 = WITNESS_SCALE_FACTOR as u64 * MIN_TX_OUTPUT_SIZE;

/// Upper bound on the number of outputs a single block can create.
///
/// Used by scans that probe consecutive output indices of one transaction.
pub const MAX_OUTPUTS_PER_BLOCK: u32 = (Weight::MAX_BLOCK.to_wu() / MIN_TX_OUTPUT_WEIGHT) as u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_outputs_per_block() {
        // 4,000,000 weight units / 36 per output.
        assert_eq!(MAX_OUTPUTS_PER_BLOCK, 111_111);
    }
}
