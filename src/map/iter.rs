use std::fmt;

use super::{ConcurrentMap, MapId};

/// Cursor over a `ConcurrentMap`
///
/// A cursor holds a slot position, not a lock. Each step takes the shared
/// lock briefly and skips empty and tombstoned slots. `None` is the
/// one-past-the-end position.
pub struct MapIterator<'a, V> {
    slot: Option<usize>,
    parent: &'a ConcurrentMap<V>,
}

impl<'a, V: Clone> MapIterator<'a, V> {
    pub(super) fn new(parent: &'a ConcurrentMap<V>, slot: Option<usize>) -> Self {
        Self { slot, parent }
    }

    /// Cursor at the next live entry
    pub fn next(&self) -> Self {
        let slot = self.slot.and_then(|slot| self.parent.occupied_after(slot));
        Self::new(self.parent, slot)
    }

    /// Cursor at the previous live entry
    ///
    /// Stepping back from `end()` lands on the last entry; stepping back from
    /// the first entry gives `end()`.
    pub fn previous(&self) -> Self {
        Self::new(self.parent, self.parent.occupied_before(self.slot))
    }

    /// True while the cursor points at a live entry
    pub fn is_valid(&self) -> bool {
        self.entry().is_some()
    }

    pub fn key(&self) -> Option<MapId> {
        self.entry().map(|(key, _)| key)
    }

    pub fn value(&self) -> Option<V> {
        self.entry().map(|(_, value)| value)
    }

    /// Key and payload under the cursor
    pub fn entry(&self) -> Option<(MapId, V)> {
        self.parent.slot_entry(self.slot?)
    }
}

impl<V> Clone for MapIterator<'_, V> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot,
            parent: self.parent,
        }
    }
}

impl<V> PartialEq for MapIterator<'_, V> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && std::ptr::eq(self.parent, other.parent)
    }
}

impl<V> Eq for MapIterator<'_, V> {}

impl<V> fmt::Debug for MapIterator<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapIterator").field("slot", &self.slot).finish()
    }
}
