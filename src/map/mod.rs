//! Map module - Shared state keyed by 64-bit ids
//!
//! `ConcurrentMap` is an open-addressing table behind a reader-writer lock.
//! Lookups take the shared lock, mutations the exclusive one, and neither is
//! held across an iteration pass: cursors re-lock for every step. A caller
//! that needs a stable view while others mutate should iterate a `clone()`.
//!
//! The map never drops payloads on its own: `put`, `delete` and `clear`
//! hand whatever they displace back to the caller.

mod iter;

pub use iter::MapIterator;

use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

/// Map key
pub type MapId = i64;

const MIN_CAPACITY: usize = 8;

#[derive(Clone)]
enum Slot<V> {
    Empty,
    Tombstone,
    Occupied(MapId, V),
}

impl<V> Slot<V> {
    fn is_occupied(&self) -> bool {
        matches!(self, Slot::Occupied(..))
    }
}

#[derive(Clone)]
struct Table<V> {
    slots: Vec<Slot<V>>,
    /// Occupied slots
    live: usize,
    /// Occupied slots plus tombstones
    used: usize,
}

fn hash(key: MapId) -> u64 {
    // splitmix64 finalizer
    let mut z = (key as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl<V> Table<V> {
    fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        Self {
            slots: (0..capacity).map(|_| Slot::Empty).collect(),
            live: 0,
            used: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn home(&self, key: MapId) -> usize {
        (hash(key) as usize) & (self.capacity() - 1)
    }

    fn find(&self, key: MapId) -> Option<usize> {
        let mask = self.capacity() - 1;
        let mut index = self.home(key);

        loop {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Occupied(k, _) if *k == key => return Some(index),
                _ => index = (index + 1) & mask,
            }
        }
    }

    fn insert(&mut self, key: MapId, value: V) -> Option<V> {
        let mask = self.capacity() - 1;
        let mut index = self.home(key);
        let mut reuse = None;

        loop {
            match &mut self.slots[index] {
                Slot::Occupied(k, existing) if *k == key => {
                    return Some(std::mem::replace(existing, value));
                }
                Slot::Tombstone if reuse.is_none() => reuse = Some(index),
                Slot::Empty => break,
                _ => {}
            }
            index = (index + 1) & mask;
        }

        let target = match reuse {
            Some(tombstone) => tombstone,
            None => {
                self.used += 1;
                index
            }
        };
        self.slots[target] = Slot::Occupied(key, value);
        self.live += 1;
        None
    }

    fn remove(&mut self, key: MapId) -> Option<V> {
        let index = self.find(key)?;
        match std::mem::replace(&mut self.slots[index], Slot::Tombstone) {
            Slot::Occupied(_, value) => {
                self.live -= 1;
                Some(value)
            }
            _ => None,
        }
    }

    /// Rebuild into a table of `capacity` slots, dropping tombstones
    fn rehash(&mut self, capacity: usize) {
        let old = std::mem::replace(self, Table::with_capacity(capacity));
        for slot in old.slots {
            if let Slot::Occupied(key, value) = slot {
                self.insert(key, value);
            }
        }
    }

    /// Next occupied slot at or after `from`
    fn occupied_from(&self, from: usize) -> Option<usize> {
        (from..self.capacity()).find(|i| self.slots[*i].is_occupied())
    }

    /// Last occupied slot strictly before `before`
    fn occupied_before(&self, before: usize) -> Option<usize> {
        (0..before.min(self.capacity()))
            .rev()
            .find(|i| self.slots[*i].is_occupied())
    }
}

/// Concurrent `i64`-keyed map
pub struct ConcurrentMap<V> {
    table: RwLock<Table<V>>,
    iterating: AtomicUsize,
}

impl<V: Clone> ConcurrentMap<V> {
    /// Create an empty map
    pub fn new() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            table: RwLock::new(Table::with_capacity(capacity)),
            iterating: AtomicUsize::new(0),
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.table.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_key(&self, key: MapId) -> bool {
        self.table.read().find(key).is_some()
    }

    /// Payload stored under `key`
    pub fn get(&self, key: MapId) -> Option<V> {
        let table = self.table.read();
        let index = table.find(key)?;
        match &table.slots[index] {
            Slot::Occupied(_, value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Store `value` under `key`, returning the payload it replaces
    pub fn put(&self, key: MapId, value: V) -> Option<V> {
        let mut table = self.table.write();

        if table.find(key).is_none() {
            self.reserve_one(&mut table);
        }
        table.insert(key, value)
    }

    /// Remove `key`, returning its payload
    pub fn delete(&self, key: MapId) -> Option<V> {
        self.table.write().remove(key)
    }

    /// Payload in the first occupied slot
    pub fn first(&self) -> Option<V> {
        let table = self.table.read();
        let index = table.occupied_from(0)?;
        match &table.slots[index] {
            Slot::Occupied(_, value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Payload in the last occupied slot
    pub fn last(&self) -> Option<V> {
        let table = self.table.read();
        let index = table.occupied_before(table.capacity())?;
        match &table.slots[index] {
            Slot::Occupied(_, value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Empty the map and return every payload it held
    ///
    /// Cursors still in use stop being valid and their passes end at the
    /// next step.
    pub fn clear(&self) -> Vec<V> {
        let mut table = self.table.write();

        let depth = self.iterating.load(Ordering::Acquire);
        if depth > 0 {
            tracing::debug!("Map cleared while {} iteration(s) in progress", depth);
        }

        // Keep the slot count so positions held by live cursors stay in range
        let capacity = table.capacity();
        let old = std::mem::replace(&mut *table, Table::with_capacity(capacity));

        old.slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Occupied(_, value) => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Enter an iteration pass
    ///
    /// Returns false for an empty map, in which case the pass must not run
    /// and `stop_iterating` must not be called. Passes nest.
    pub fn start_iterating(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        self.iterating.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Leave an iteration pass, passing the loop's decision through
    pub fn stop_iterating(&self, should_continue: bool) -> bool {
        let _ = self
            .iterating
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        should_continue
    }

    /// Number of passes currently in progress
    pub fn iterating(&self) -> usize {
        self.iterating.load(Ordering::Acquire)
    }

    /// Cursor at the first live entry, or `end()` if there is none
    pub fn begin(&self) -> MapIterator<'_, V> {
        let slot = self.table.read().occupied_from(0);
        MapIterator::new(self, slot)
    }

    /// Cursor one past the last entry
    pub fn end(&self) -> MapIterator<'_, V> {
        MapIterator::new(self, None)
    }

    /// Visit every live entry until `f` breaks
    ///
    /// Returns true if the pass ran to the end.
    pub fn for_each<F>(&self, mut f: F) -> bool
    where
        F: FnMut(MapId, V) -> ControlFlow<()>,
    {
        if !self.start_iterating() {
            return true;
        }

        // Walk positions, not entries: a slot vacated between two steps is
        // skipped while the rest of the pass goes on
        let end = self.end();
        let mut it = self.begin();
        while it != end {
            if let Some((key, value)) = it.entry() {
                if f(key, value).is_break() {
                    return self.stop_iterating(false);
                }
            }
            it = it.next();
        }

        self.stop_iterating(true)
    }

    /// Payload handles in slot order
    pub fn values(&self) -> Vec<V> {
        self.table
            .read()
            .slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Occupied(_, value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// Make room for one more key
    ///
    /// Growth is held back while a pass is running so cursors keep their
    /// positions; it still happens if the table would otherwise run out of
    /// empty slots, which probing relies on.
    fn reserve_one(&self, table: &mut Table<V>) {
        let capacity = table.capacity();
        let crowded = (table.used + 1) * 4 > capacity * 3;
        let full = table.used + 1 >= capacity;

        if full || (crowded && self.iterating() == 0) {
            let target = ((table.live + 1) * 2).max(MIN_CAPACITY);
            table.rehash(target);
            tracing::trace!("Map rehashed: {} -> {} slots", capacity, table.capacity());
        }
    }

    pub(crate) fn slot_entry(&self, slot: usize) -> Option<(MapId, V)> {
        match self.table.read().slots.get(slot) {
            Some(Slot::Occupied(key, value)) => Some((*key, value.clone())),
            _ => None,
        }
    }

    pub(crate) fn occupied_after(&self, slot: usize) -> Option<usize> {
        self.table.read().occupied_from(slot + 1)
    }

    pub(crate) fn occupied_before(&self, slot: Option<usize>) -> Option<usize> {
        let table = self.table.read();
        let before = slot.unwrap_or(table.capacity());
        table.occupied_before(before)
    }
}

impl<V: Clone> Default for ConcurrentMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shallow snapshot: the new map shares payload handles but not structure
impl<V: Clone> Clone for ConcurrentMap<V> {
    fn clone(&self) -> Self {
        Self {
            table: RwLock::new(self.table.read().clone()),
            iterating: AtomicUsize::new(0),
        }
    }
}

impl<V> fmt::Debug for ConcurrentMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.read();
        f.debug_struct("ConcurrentMap")
            .field("len", &table.live)
            .field("capacity", &table.slots.len())
            .field("iterating", &self.iterating.load(Ordering::Relaxed))
            .finish()
    }
}
