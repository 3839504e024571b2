//! Thin collection aliases used throughout the crate, so the hasher
//! and map implementation can be swapped via feature flag without
//! touching call sites.

use linked_hash_map::LinkedHashMap;

#[cfg(feature = "collections_randomstate_twox_hash")]
pub type RandomState = std::hash::BuildHasherDefault<twox_hash::XxHash64>;

#[cfg(feature = "collections_randomstate_std")]
pub type RandomState = std::collections::hash_map::RandomState;

/// A `HashMap` using this crate's chosen hasher.
pub type HashMap<K, V> = std::collections::HashMap<K, V, RandomState>;

/// A `HashMap` preserving insertion order, used for the request log's
/// FIFO batching of pending client requests.
pub type OrderedMap<K, V> = LinkedHashMap<K, V>;

pub fn hash_map_capacity<K, V>(capacity: usize) -> HashMap<K, V> {
    HashMap::with_capacity_and_hasher(capacity, RandomState::default())
}

pub fn ordered_map<K, V>() -> OrderedMap<K, V> {
    LinkedHashMap::new()
}
