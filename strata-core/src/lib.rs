//! Strata Core - Strongly-typed identifiers and common types for Strata.
//!
//! This crate provides the identifier, status, and partition-bound types
//! shared between the Strata client crates. It does NOT provide transport,
//! DNS, or RPC abstractions - those live behind traits in the crates that
//! consume them.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: Prevent mixing up a `TabletId` with a `TableId`
//! - **Opaque partition keys**: Byte strings ordered lexicographically
//! - **One status taxonomy**: Every error a caller can observe is a `Status`
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod partition;
mod types;

pub use error::{Result, Status};
pub use partition::{Partition, PartitionKey};
pub use types::{ServerUuid, TableId, TabletId};
