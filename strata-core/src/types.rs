//! Strongly-typed identifiers for Strata entities.
//!
//! Explicit types prevent bugs from mixing up identifiers. All Strata
//! identifiers are opaque strings assigned by the master (UUIDs in
//! practice), so the wrappers share an `Arc<str>` to keep clones cheap:
//! a tablet id is held by the cache, by in-flight lookups, and by callers
//! at the same time.

use std::fmt;
use std::sync::Arc;

/// Macro to generate strongly-typed string identifier wrappers.
///
/// Each ID type wraps an `Arc<str>` and provides:
/// - Type safety (can't mix `TabletId` with `TableId`)
/// - Debug/Display formatting
/// - Cheap cloning (reference count bump, no allocation)
macro_rules! define_string_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Creates a new ID from a raw string value.
            #[must_use]
            pub fn new(value: impl Into<Arc<str>>) -> Self {
                Self(value.into())
            }

            /// Returns the raw string value.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }
    };
}

define_string_id!(TableId, "table", "Unique identifier for a table.");
define_string_id!(TabletId, "tablet", "Unique identifier for a tablet (a contiguous partition-key range of a table).");
define_string_id!(
    ServerUuid,
    "tserver",
    "Permanent unique identifier for a tablet server, stable across restarts."
);
