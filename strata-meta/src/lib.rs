//! Strata Meta - Client-side tablet metadata cache and leader selection.
//!
//! This crate answers, for every row operation a Strata client performs,
//! which tablet covers a partition key and which tablet server currently
//! leads it - with low latency, bounded master load, and correct
//! convergence after leadership changes and range changes.
//!
//! # Design
//!
//! - **Fast path / slow path**: cache hits answer under a shared lock
//!   without allocation; misses dispatch a permit-bounded master lookup
//! - **Non-covered ranges cached explicitly**: point lookups into gaps
//!   answer NotFound without master traffic
//! - **Client-side leadership beliefs**: "not leader" rejections demote
//!   and re-guess locally, avoiding a master round-trip per failover
//! - **Traits at the seams**: master RPC and DNS are injected, so tests
//!   drive the cache against mock collaborators

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod cache;
mod config;
mod entry;
mod lookup;
mod picker;
mod proto;
mod proxy;
mod range_map;
mod server;
mod tablet;
mod throttle;

pub use cache::{LookupType, MetaCache, ReplicaVisibility, TableHandle};
pub use config::{
    MetaCacheConfig, LOOKUP_RETRY_BACKOFF_DEFAULT, LOOKUP_RETRY_BACKOFF_MAX_DEFAULT,
    MASTER_LOOKUP_PERMITS_DEFAULT, PERMIT_RETRY_DELAY_DEFAULT,
    TABLET_LOCATIONS_BY_ID_TTL_DEFAULT,
};
pub use entry::{CacheEntry, CacheEntryKind};
pub use lookup::{FETCH_TABLETS_PER_POINT_LOOKUP, FETCH_TABLETS_PER_RANGE_LOOKUP};
pub use picker::LeaderPicker;
pub use proto::{
    GetTableLocationsRequest, GetTableLocationsResponse, GetTabletLocationsRequest,
    GetTabletLocationsResponse, HostPort, InlineReplica, InternedReplica, ReplicaRole,
    ReplicaTypeFilter, TabletLocations, TsInfo,
};
pub use proxy::{
    CredentialsPolicy, DnsResolver, MasterService, ResolvedAddr, TabletServerAdminProxy,
    TabletServerProxy,
};
pub use range_map::RangeMap;
pub use server::{RemoteTabletServer, TabletServerRegistry};
pub use tablet::{RemoteReplica, RemoteTablet};
