//! Keyed cell families.
//!
//! A family maps an external key to a lazily created, cached cell, so that
//! repeated requests for "the cell for entity X" return the same cell
//! identity. Eviction (explicit removal or the LRU bound) only affects
//! future lookups: a cell already handed out stays fully usable against any
//! store, it just stops being the canonical cell for its key.

use std::hash::Hash;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::store::Cell;

/// A keyed, lazily populated cache of cells.
pub struct CellFamily<K, T, A = T> {
    make: Box<dyn Fn(&K) -> Cell<T, A> + Send + Sync>,
    cells: Mutex<IndexMap<K, Cell<T, A>>>,
    capacity: Option<usize>,
}

impl<K, T, A> CellFamily<K, T, A>
where
    K: Eq + Hash + Clone,
{
    /// An unbounded family: cells live until [`remove`](CellFamily::remove)d.
    pub fn new(make: impl Fn(&K) -> Cell<T, A> + Send + Sync + 'static) -> Self {
        Self {
            make: Box::new(make),
            cells: Mutex::new(IndexMap::new()),
            capacity: None,
        }
    }

    /// A family bounded to `capacity` cells; the least recently requested
    /// key is evicted when the bound is exceeded.
    pub fn bounded(
        capacity: usize,
        make: impl Fn(&K) -> Cell<T, A> + Send + Sync + 'static,
    ) -> Self {
        assert!(capacity > 0, "family capacity must be at least 1");
        Self {
            make: Box::new(make),
            cells: Mutex::new(IndexMap::new()),
            capacity: Some(capacity),
        }
    }

    /// The cell for `key`, creating it on first request.
    pub fn get(&self, key: K) -> Cell<T, A> {
        let mut cells = self.cells.lock();
        if let Some(cell) = cells.shift_remove(&key) {
            // Re-insert at the back: most recently requested.
            cells.insert(key, cell.clone());
            return cell;
        }
        let cell = (self.make)(&key);
        cells.insert(key, cell.clone());
        if let Some(capacity) = self.capacity {
            while cells.len() > capacity {
                if let Some((_, evicted)) = cells.shift_remove_index(0) {
                    trace!(cell = %evicted.id(), "family: evicted");
                }
            }
        }
        cell
    }

    /// Forget the cell for `key`. The next `get` creates a fresh one.
    pub fn remove(&self, key: &K) -> bool {
        self.cells.lock().shift_remove(key).is_some()
    }

    /// Whether a cell is currently cached for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.cells.lock().contains_key(key)
    }

    /// Number of cached cells.
    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.lock().is_empty()
    }

    /// Drop every cached cell.
    pub fn clear(&self) {
        self.cells.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn user_family() -> CellFamily<String, String> {
        CellFamily::new(|key: &String| Cell::new(format!("user:{key}")))
    }

    #[test]
    fn same_key_returns_same_cell() {
        let family = user_family();
        let a = family.get("user1".to_string());
        let b = family.get("user1".to_string());
        let c = family.get("user2".to_string());

        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn removal_only_affects_future_lookups() {
        let store = Store::new();
        let family = user_family();

        let before = family.get("user1".to_string());
        store.write(&before, "renamed".to_string()).unwrap();

        assert!(family.remove(&"user1".to_string()));
        let after = family.get("user1".to_string());

        // A fresh cell was created, and the evicted one still works.
        assert_ne!(before.id(), after.id());
        assert_eq!(store.read(&before), "renamed");
        assert_eq!(store.read(&after), "user:user1");
    }

    #[test]
    fn bounded_family_evicts_least_recently_requested() {
        let family: CellFamily<u32, u32> = CellFamily::bounded(2, |key| Cell::new(*key));

        let one = family.get(1);
        let _two = family.get(2);
        // Touch 1 so that 2 is now least recently requested.
        let one_again = family.get(1);
        assert_eq!(one.id(), one_again.id());

        let _three = family.get(3);
        assert_eq!(family.len(), 2);
        assert!(family.contains(&1));
        assert!(!family.contains(&2));
        assert!(family.contains(&3));
    }
}
