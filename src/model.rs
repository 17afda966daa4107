//! Work item capability.
//!
//! The executor never looks inside an item. All it needs is a stable key:
//! items sharing a key run one at a time in submission order, items with
//! different keys may run concurrently.

use std::fmt::Display;
use std::hash::Hash;

/// Bound for keys used in equality and ordering decisions.
///
/// `Display` is required so failures can be reported with the key.
pub trait ItemKey: Eq + Hash + Clone + Display + Send + Sync + 'static {}

impl<K> ItemKey for K where K: Eq + Hash + Clone + Display + Send + Sync + 'static {}

/// A work item that exposes its partition key.
pub trait Keyed: Send + 'static {
    type Key: ItemKey;

    /// The key must not change while the item is owned by the executor.
    fn key(&self) -> &Self::Key;
}

/// `(key, payload)` pairs are keyed by their first element.
impl<K, V> Keyed for (K, V)
where
    K: ItemKey,
    V: Send + 'static,
{
    type Key = K;

    fn key(&self) -> &K {
        &self.0
    }
}
