//! The per-output record kept by the chainstate.

use std::sync::LazyLock;

use bitcoin::{Amount, ScriptBuf, TxOut};
use serde::{Deserialize, Serialize};

static EMPTY_COIN: LazyLock<Coin> = LazyLock::new(Coin::default);

/// A transaction output together with the metadata the chainstate needs:
/// the height of the block that created it and whether that block's coinbase
/// created it.
///
/// A coin whose output has been cleared to the sentinel (zero value, empty
/// script) is *spent*; spent coins are kept around by the caching layer to
/// record that the parent view still has to be told about the spend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// The unspent output itself.
    pub output: TxOut,
    /// Height of the block that created this output.
    pub height: u32,
    /// Whether the creating transaction was a coinbase.
    pub is_coinbase: bool,
}

impl Coin {
    /// Create a coin from a freshly confirmed output.
    pub fn new(output: TxOut, height: u32, is_coinbase: bool) -> Self {
        Self {
            output,
            height,
            is_coinbase,
        }
    }

    /// A shared reference to the sentinel, for call sites that want to chain
    /// accesses without unwrapping an `Option`.
    pub fn empty() -> &'static Coin {
        &EMPTY_COIN
    }

    /// Whether this coin has been cleared to the spent sentinel.
    pub fn is_spent(&self) -> bool {
        self.output.value == Amount::ZERO && self.output.script_pubkey.is_empty()
    }

    /// The output value.
    pub fn value(&self) -> Amount {
        self.output.value
    }

    /// Heap memory owned by this coin, i.e. the locking script bytes.
    ///
    /// The spent sentinel owns nothing.
    pub fn dynamic_memory_usage(&self) -> usize {
        self.output.script_pubkey.len()
    }
}

/// The default coin is the spent sentinel, so `mem::take` on a cache slot
/// leaves a coin that already reads as spent.
impl Default for Coin {
    fn default() -> Self {
        Self {
            output: TxOut {
                value: Amount::ZERO,
                script_pubkey: ScriptBuf::new(),
            },
            height: 0,
            is_coinbase: false,
        }
    }
}
