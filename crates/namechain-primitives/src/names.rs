//! Records of the auxiliary name registry.

use bitcoin::OutPoint;
use serde::{Deserialize, Serialize};

/// Names are raw byte strings; no encoding is imposed at this layer.
pub type Name = Vec<u8>;

/// The current record for a registered name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameData {
    /// The value attached to the name.
    pub value: Vec<u8>,
    /// Height of the block that last updated the name.
    pub height: u32,
    /// The output that currently owns the name.
    pub outpoint: OutPoint,
}

impl NameData {
    /// Create a record from an update confirmed at `height` by `outpoint`.
    pub fn new(value: Vec<u8>, height: u32, outpoint: OutPoint) -> Self {
        Self {
            value,
            height,
            outpoint,
        }
    }
}

/// Stack of superseded [`NameData`] records for one name, oldest first.
///
/// Forward updates push the value they replace; disconnecting a block pops
/// and checks that the popped record matches the value being restored, which
/// ties undo structurally to the update it reverts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameHistory(Vec<NameData>);

impl NameHistory {
    /// Record a superseded value.
    pub fn push(&mut self, old: NameData) {
        self.0.push(old);
    }

    /// Remove the most recent entry, which must equal `expected`.
    ///
    /// Panics if the stack is empty or the top does not match; either means
    /// the undo being applied does not correspond to the update that was made.
    pub fn pop(&mut self, expected: &NameData) {
        let top = self
            .0
            .pop()
            .expect("popping from an empty name history");
        assert_eq!(
            &top, expected,
            "name history top does not match the record being restored"
        );
    }

    /// The most recent superseded value, if any.
    pub fn top(&self) -> Option<&NameData> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
