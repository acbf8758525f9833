//! Per-table ordered map from partition-key ranges to cache entries.
//!
//! Entries are keyed by their inclusive lower bound; lookup is a floor
//! search for the greatest lower bound at or below the key. The map keeps
//! entries non-overlapping: before an entry learned from a fresh master
//! response is inserted, everything intersecting its range is erased.

use std::collections::BTreeMap;
use std::ops::Bound;

use strata_core::PartitionKey;

use crate::entry::CacheEntry;

/// Ordered map from lower-bound partition key to [`CacheEntry`].
#[derive(Debug, Default)]
pub struct RangeMap {
    entries: BTreeMap<PartitionKey, CacheEntry>,
}

impl RangeMap {
    /// Creates an empty range map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns the entry with the greatest lower bound at or below `key`.
    ///
    /// The returned entry does not necessarily contain `key`; callers check
    /// [`CacheEntry::contains`].
    #[must_use]
    pub fn floor(&self, key: &PartitionKey) -> Option<&CacheEntry> {
        self.entries
            .range((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(|(_, e)| e)
    }

    /// Returns a mutable reference to the entry keyed exactly at `lower`.
    #[must_use]
    pub fn get_mut(&mut self, lower: &PartitionKey) -> Option<&mut CacheEntry> {
        self.entries.get_mut(lower)
    }

    /// Inserts an entry, keyed by its lower bound.
    ///
    /// The caller is responsible for erasing overlap first; insertion over
    /// an identical lower bound replaces the previous entry.
    pub fn insert(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.lower_bound().clone(), entry);
    }

    /// Erases every entry whose range intersects `[lower, upper)`, where an
    /// empty `upper` means unbounded above.
    pub fn erase_overlapping(&mut self, lower: &PartitionKey, upper: &PartitionKey) {
        // An entry starting below `lower` can still reach into the range.
        let predecessor = self
            .entries
            .range((Bound::Unbounded, Bound::Excluded(lower)))
            .next_back()
            .filter(|(_, e)| {
                let e_upper = e.upper_bound();
                e_upper.is_empty() || *e_upper > *lower
            })
            .map(|(k, _)| k.clone());
        if let Some(key) = predecessor {
            self.entries.remove(&key);
        }

        let upper_bound = if upper.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(upper)
        };
        let doomed: Vec<PartitionKey> = self
            .entries
            .range((Bound::Included(lower), upper_bound))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            self.entries.remove(&key);
        }
    }

    /// Removes every non-covered entry, leaving covered entries intact.
    pub fn clear_non_covered(&mut self) {
        self.entries.retain(|_, entry| !entry.is_non_covered());
    }

    /// Iterates entries in lower-bound order.
    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }
}
