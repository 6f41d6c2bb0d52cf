//! Connection Table
//!
//! A fixed-capacity registry of everything the reactor waits on: listening
//! sockets, the signal bridge and client connections. Occupied slots are always
//! the contiguous range `[0, len)`; removal swaps the last slot into the hole,
//! so it is O(1) and keeps that invariant.
//!
//! Each slot also carries the readiness event recorded for it by the last
//! wait, the equivalent of `revents` in a `pollfd` array. [`ReadyCursor`] walks
//! those events in table order while the table is being mutated:
//!
//! ```text
//!   before:  [ L ][ S ][ c1* ][ c2 ][ c3* ]      * = ready, cursor at c1
//!   remove c1 ─────────┘
//!   after:   [ L ][ S ][ c3* ][ c2 ]             cursor still at slot 2,
//!                                                 so c3 is visited next
//! ```

use thiserror::Error;

/// Default number of slots, including the signal bridge and the listener or input.
pub const DEFAULT_CAPACITY: usize = 16;

/// Returned when registering into a table with no free slot.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("connection table full ({capacity} slots)")]
pub struct TableFull {
    pub capacity: usize,
}

/// One occupied slot.
#[derive(Debug)]
pub struct Slot<T, E> {
    pub entry: T,
    ready: Option<E>,
}

impl<T, E> Slot<T, E> {
    /// Records a readiness event for this slot, replacing any unconsumed one.
    pub fn mark_ready(&mut self, event: E) {
        self.ready = Some(event);
    }
}

/// Fixed-capacity slot table with swap-with-last removal.
#[derive(Debug)]
pub struct ConnectionTable<T, E> {
    slots: Vec<Slot<T, E>>,
    capacity: usize,
}

impl<T, E> ConnectionTable<T, E> {
    /// Creates an empty table holding at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Adds an entry in the first free slot and returns its index.
    pub fn register(&mut self, entry: T) -> Result<usize, TableFull> {
        if self.is_full() {
            return Err(TableFull {
                capacity: self.capacity,
            });
        }
        self.slots.push(Slot { entry, ready: None });
        Ok(self.slots.len() - 1)
    }

    /// Removes slot `index`, moving the last slot (and its pending event) into it.
    ///
    /// Returns the removed entry; dropping it releases the descriptor.
    pub fn unregister(&mut self, index: usize) -> Option<T> {
        if index >= self.slots.len() {
            return None;
        }
        Some(self.slots.swap_remove(index).entry)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Maximum number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if no more entries can be registered.
    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    /// Number of slots still free.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.slots.len())
    }

    /// Returns the entry in slot `index`.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).map(|s| &s.entry)
    }

    /// Returns the entry in slot `index` mutably.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).map(|s| &mut s.entry)
    }

    /// Iterates over entries in table order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().map(|s| &s.entry)
    }

    /// Mutable access to whole slots, used while collecting readiness.
    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut Slot<T, E>> {
        self.slots.iter_mut()
    }

    /// Starts a pass over the `ready` events recorded by the last wait.
    pub fn ready_cursor(&self, ready: usize) -> ReadyCursor {
        ReadyCursor {
            next: 0,
            remaining: ready,
        }
    }

    /// Takes the next pending event in table order.
    ///
    /// The cursor stays on the returned slot: if the caller unregisters it, the
    /// slot swapped into its place is examined next; otherwise the following
    /// call finds no event there and moves on.
    pub fn next_ready(&mut self, cursor: &mut ReadyCursor) -> Option<(usize, E)> {
        while cursor.remaining > 0 && cursor.next < self.slots.len() {
            if let Some(event) = self.slots[cursor.next].ready.take() {
                cursor.remaining -= 1;
                return Some((cursor.next, event));
            }
            cursor.next += 1;
        }
        None
    }
}

/// Position of an in-progress pass over ready slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyCursor {
    next: usize,
    remaining: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn table_with(ids: &[u32], capacity: usize) -> ConnectionTable<u32, &'static str> {
        let mut table = ConnectionTable::with_capacity(capacity);
        for &id in ids {
            table.register(id).unwrap();
        }
        table
    }

    fn entries(table: &ConnectionTable<u32, &'static str>) -> Vec<u32> {
        table.iter().copied().collect()
    }

    #[test]
    fn test_register_until_full() {
        let mut table = table_with(&[], 3);
        assert_eq!(table.register(10), Ok(0));
        assert_eq!(table.register(11), Ok(1));
        assert_eq!(table.available(), 1);
        assert_eq!(table.register(12), Ok(2));
        assert!(table.is_full());
        assert_eq!(table.register(13), Err(TableFull { capacity: 3 }));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_unregister_swaps_last_into_hole() {
        let mut table = table_with(&[1, 2, 3, 4], 8);
        assert_eq!(table.unregister(1), Some(2));
        assert_eq!(entries(&table), vec![1, 4, 3]);
        assert_eq!(table.unregister(2), Some(3));
        assert_eq!(entries(&table), vec![1, 4]);
        assert_eq!(table.unregister(5), None);
    }

    #[test]
    fn test_unregister_frees_capacity() {
        let mut table = table_with(&[1, 2], 2);
        assert!(table.register(3).is_err());
        table.unregister(0);
        assert_eq!(table.register(3), Ok(1));
        assert_eq!(entries(&table), vec![2, 3]);
    }

    #[test]
    fn test_contiguous_distinct_after_mixed_operations() {
        let mut table = table_with(&[], 16);
        let mut next_id = 0u32;
        let mut live: HashSet<u32> = HashSet::new();
        // Deterministic interleaving of registrations and removals.
        for step in 0..200usize {
            if step % 3 == 2 && !table.is_empty() {
                let index = (step * 7) % table.len();
                let removed = table.unregister(index).unwrap();
                assert!(live.remove(&removed));
            } else if !table.is_full() {
                table.register(next_id).unwrap();
                live.insert(next_id);
                next_id += 1;
            }

            let seen: HashSet<u32> = table.iter().copied().collect();
            assert_eq!(seen.len(), table.len(), "duplicate entry");
            assert_eq!(seen, live);
            for i in 0..table.len() {
                assert!(table.get(i).is_some());
            }
            assert!(table.get(table.len()).is_none());
        }
    }

    #[test]
    fn test_ready_pass_in_table_order() {
        let mut table = table_with(&[1, 2, 3, 4], 8);
        for (i, slot) in table.slots_mut().enumerate() {
            if i != 1 {
                slot.mark_ready("in");
            }
        }
        let mut cursor = table.ready_cursor(3);
        let mut visited = Vec::new();
        while let Some((index, _)) = table.next_ready(&mut cursor) {
            visited.push(*table.get(index).unwrap());
        }
        assert_eq!(visited, vec![1, 3, 4]);
    }

    #[test]
    fn test_ready_pass_survives_removal() {
        let mut table = table_with(&[1, 2, 3, 4], 8);
        for slot in table.slots_mut() {
            slot.mark_ready("in");
        }

        let mut cursor = table.ready_cursor(4);
        let mut visited = Vec::new();
        while let Some((index, _)) = table.next_ready(&mut cursor) {
            let id = *table.get(index).unwrap();
            visited.push(id);
            // Remove every even id while the pass is running.
            if id % 2 == 0 {
                table.unregister(index);
            }
        }

        visited.sort_unstable();
        assert_eq!(visited, vec![1, 2, 3, 4], "slot skipped or visited twice");
        assert_eq!(entries(&table), vec![1, 3]);
    }

    #[test]
    fn test_entries_added_during_pass_are_not_visited() {
        let mut table = table_with(&[1, 2], 8);
        for slot in table.slots_mut() {
            slot.mark_ready("in");
        }
        let mut cursor = table.ready_cursor(2);
        let mut visited = Vec::new();
        while let Some((index, _)) = table.next_ready(&mut cursor) {
            visited.push(*table.get(index).unwrap());
            table.register(100 + index as u32).unwrap();
        }
        assert_eq!(visited, vec![1, 2]);
        assert_eq!(table.len(), 4);
    }
}
