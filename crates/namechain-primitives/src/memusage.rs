//! Rough accounting of heap memory owned by chainstate containers.
//!
//! The numbers here are estimates, not allocator truth: they only have to be
//! stable and monotone in the data held, since they feed flush heuristics
//! rather than any consensus rule.

use std::collections::HashMap;
use std::mem;

/// Approximate heap usage of a hash map's table, excluding heap owned by the
/// values themselves (callers account for that separately).
pub fn hash_map_usage<K, V>(map: &HashMap<K, V>) -> usize {
    // One bucket per slot of capacity: key, value, and control/hash overhead.
    map.capacity() * (mem::size_of::<K>() + mem::size_of::<V>() + mem::size_of::<usize>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_grows_with_capacity() {
        let mut map: HashMap<u64, u64> = HashMap::new();
        assert_eq!(hash_map_usage(&map), 0);

        for i in 0..64 {
            map.insert(i, i);
        }
        assert!(hash_map_usage(&map) > 0);
    }
}
