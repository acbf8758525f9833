//! Cache entries: covered tablets and non-covered ranges.
//!
//! The range map stores two kinds of entry: a *covered* entry pointing at a
//! [`RemoteTablet`] whose bounds it inherits, and a *non-covered* entry
//! recording a gap in the partition key space that currently belongs to no
//! tablet. Caching gaps explicitly lets point lookups into them answer
//! NotFound without contacting the master.

use std::fmt;
use std::sync::Arc;

use strata_core::PartitionKey;
use tokio::time::Instant;

use crate::tablet::RemoteTablet;

/// The two kinds of range-map entry.
#[derive(Debug, Clone)]
pub enum CacheEntryKind {
    /// The range is covered by a tablet; bounds come from its partition.
    Covered(Arc<RemoteTablet>),
    /// The range belongs to no tablet; bounds are explicit.
    NonCovered {
        /// Inclusive lower bound; empty means unbounded below.
        lower: PartitionKey,
        /// Exclusive upper bound; empty means unbounded above.
        upper: PartitionKey,
    },
}

/// A TTL-carrying entry in a table's range map or the by-id index.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    expiration: Instant,
    kind: CacheEntryKind,
}

impl CacheEntry {
    /// Creates a covered entry for the given tablet.
    #[must_use]
    pub const fn covered(expiration: Instant, tablet: Arc<RemoteTablet>) -> Self {
        Self {
            expiration,
            kind: CacheEntryKind::Covered(tablet),
        }
    }

    /// Creates a non-covered entry for the range `[lower, upper)`.
    #[must_use]
    pub const fn non_covered(expiration: Instant, lower: PartitionKey, upper: PartitionKey) -> Self {
        Self {
            expiration,
            kind: CacheEntryKind::NonCovered { lower, upper },
        }
    }

    /// Returns the entry kind.
    #[must_use]
    pub const fn kind(&self) -> &CacheEntryKind {
        &self.kind
    }

    /// Returns true for a non-covered entry.
    #[must_use]
    pub const fn is_non_covered(&self) -> bool {
        matches!(self.kind, CacheEntryKind::NonCovered { .. })
    }

    /// Returns the covered tablet, if any.
    #[must_use]
    pub const fn tablet(&self) -> Option<&Arc<RemoteTablet>> {
        match &self.kind {
            CacheEntryKind::Covered(tablet) => Some(tablet),
            CacheEntryKind::NonCovered { .. } => None,
        }
    }

    /// Returns the entry's inclusive lower bound.
    #[must_use]
    pub fn lower_bound(&self) -> &PartitionKey {
        match &self.kind {
            CacheEntryKind::Covered(tablet) => tablet.partition().key_start(),
            CacheEntryKind::NonCovered { lower, .. } => lower,
        }
    }

    /// Returns the entry's exclusive upper bound; empty means unbounded.
    #[must_use]
    pub fn upper_bound(&self) -> &PartitionKey {
        match &self.kind {
            CacheEntryKind::Covered(tablet) => tablet.partition().key_end(),
            CacheEntryKind::NonCovered { upper, .. } => upper,
        }
    }

    /// Returns true if the entry's range contains the given key.
    #[must_use]
    pub fn contains(&self, key: &PartitionKey) -> bool {
        let upper = self.upper_bound();
        *self.lower_bound() <= *key && (upper.is_empty() || *key < *upper)
    }

    /// Returns true if the entry must be re-fetched: its TTL has passed, or
    /// its covered tablet has been marked stale.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        if self.expiration < Instant::now() {
            return true;
        }
        match &self.kind {
            CacheEntryKind::Covered(tablet) => tablet.is_stale(),
            CacheEntryKind::NonCovered { .. } => false,
        }
    }

    /// Extends the entry's lifetime from a fresh master response.
    pub fn refresh_expiration(&mut self, expiration: Instant) {
        self.expiration = expiration;
    }
}

impl fmt::Display for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ttl_ms = self
            .expiration
            .saturating_duration_since(Instant::now())
            .as_millis();
        match &self.kind {
            CacheEntryKind::NonCovered { lower, upper } => write!(
                f,
                "NonCoveredRange {{ lower_bound: ({}), upper_bound: ({}), ttl: {}ms }}",
                lower.debug_lower_bound(),
                upper.debug_upper_bound(),
                ttl_ms
            ),
            CacheEntryKind::Covered(tablet) => write!(
                f,
                "Tablet {{ id: {}, lower_bound: ({}), upper_bound: ({}), ttl: {}ms }}",
                tablet.tablet_id(),
                tablet.partition().key_start().debug_lower_bound(),
                tablet.partition().key_end().debug_upper_bound(),
                ttl_ms
            ),
        }
    }
}
