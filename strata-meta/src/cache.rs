//! The client metadata cache.
//!
//! `MetaCache` answers two questions with low latency and bounded master
//! load: which tablet covers a partition key, and which servers replicate
//! a tablet. Fast-path lookups read the in-memory indexes under a shared
//! lock; misses dispatch a master lookup whose response is normalized and
//! merged back in under the write lock.
//!
//! # Indexes
//!
//! - `ts_cache`: UUID → tablet server, repopulated from every response;
//!   backed by the never-cleared interning registry.
//! - `tablets_by_id`: tablet id → shared [`RemoteTablet`].
//! - `tablets_by_table_and_key`: table id → [`RangeMap`] of covered tablets
//!   and non-covered ranges.
//! - `entry_by_tablet_id`: tablet id → TTL-carrying entry for id-keyed
//!   lookups.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use strata_core::{PartitionKey, Result, ServerUuid, Status, TableId, TabletId};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::config::MetaCacheConfig;
use crate::entry::{CacheEntry, CacheEntryKind};
use crate::lookup::{IdLookup, KeyLookup};
use crate::proto::{GetTableLocationsResponse, GetTabletLocationsResponse, TsInfo};
use crate::proxy::{DnsResolver, MasterService, TabletServerProxy};
use crate::range_map::RangeMap;
use crate::server::{RemoteTabletServer, TabletServerRegistry};
use crate::tablet::RemoteTablet;

/// Whether a lookup asks for the exact covering tablet of a key or for the
/// first tablet at or after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupType {
    /// The key must fall inside the returned tablet; a non-covered range is
    /// NotFound.
    Point,
    /// Return the tablet covering the key, or the next tablet above it;
    /// used by scans to skip across non-covered ranges.
    LowerBound,
}

/// Which replica types lookups should surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaVisibility {
    /// Voting replicas only.
    Voters,
    /// All replicas, including learners and non-participants.
    All,
}

/// A cheap handle naming a table for lookups and log output.
#[derive(Debug, Clone)]
pub struct TableHandle {
    id: TableId,
    name: Arc<str>,
}

impl TableHandle {
    /// Creates a handle from a table id and human-readable name.
    #[must_use]
    pub fn new(id: impl Into<TableId>, name: impl Into<Arc<str>>) -> Self {
        Self { id: id.into(), name: name.into() }
    }

    /// Returns the table id.
    #[must_use]
    pub const fn id(&self) -> &TableId {
        &self.id
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Outcome of a fast-path cache consultation.
#[derive(Debug)]
pub(crate) enum FastPathResult {
    /// Cache hit on a covered tablet with a live leader.
    Hit(Arc<RemoteTablet>),
    /// The key definitively falls in a non-covered range.
    NotFound(Status),
    /// The cache cannot answer; the master must be consulted.
    Incomplete,
}

/// The mutable indexes, guarded by the cache's reader-writer lock.
#[derive(Debug, Default)]
struct CacheState {
    ts_cache: HashMap<ServerUuid, Arc<RemoteTabletServer>>,
    tablets_by_id: HashMap<TabletId, Arc<RemoteTablet>>,
    tablets_by_table_and_key: HashMap<TableId, RangeMap>,
    entry_by_tablet_id: HashMap<TabletId, CacheEntry>,
}

/// The client-side tablet metadata cache.
pub struct MetaCache {
    master: Arc<dyn MasterService>,
    resolver: Arc<dyn DnsResolver>,
    config: MetaCacheConfig,
    replica_visibility: ReplicaVisibility,
    /// Owns every tablet server ever seen; never cleared, so handles held
    /// by replica lists and callers outlive cache invalidation.
    registry: TabletServerRegistry,
    state: RwLock<CacheState>,
    /// Bounds concurrent in-flight master lookups across all tables.
    master_lookup_sem: Arc<Semaphore>,
}

impl fmt::Debug for MetaCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaCache")
            .field("registry_len", &self.registry.len())
            .field("replica_visibility", &self.replica_visibility)
            .finish_non_exhaustive()
    }
}

impl MetaCache {
    /// Creates a cache over the given master connection and resolver,
    /// surfacing voting replicas only.
    #[must_use]
    pub fn new(
        master: Arc<dyn MasterService>,
        resolver: Arc<dyn DnsResolver>,
        config: MetaCacheConfig,
    ) -> Arc<Self> {
        Self::with_replica_visibility(master, resolver, config, ReplicaVisibility::Voters)
    }

    /// Creates a cache with explicit replica visibility.
    #[must_use]
    pub fn with_replica_visibility(
        master: Arc<dyn MasterService>,
        resolver: Arc<dyn DnsResolver>,
        config: MetaCacheConfig,
        replica_visibility: ReplicaVisibility,
    ) -> Arc<Self> {
        let permits = config.master_lookup_permits;
        Arc::new(Self {
            master,
            resolver,
            config,
            replica_visibility,
            registry: TabletServerRegistry::new(),
            state: RwLock::new(CacheState::default()),
            master_lookup_sem: Arc::new(Semaphore::new(permits)),
        })
    }

    /// Returns the tablet server registry.
    #[must_use]
    pub const fn registry(&self) -> &TabletServerRegistry {
        &self.registry
    }

    /// Returns the cache configuration.
    #[must_use]
    pub const fn config(&self) -> &MetaCacheConfig {
        &self.config
    }

    pub(crate) const fn master(&self) -> &Arc<dyn MasterService> {
        &self.master
    }

    pub(crate) const fn replica_visibility(&self) -> ReplicaVisibility {
        self.replica_visibility
    }

    /// Resolves the tablet for `(table, partition_key)`, consulting the
    /// master on a cache miss.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key falls in a non-covered range (point mode) or
    /// past the table's end; `TimedOut` past the deadline; terminal master
    /// statuses otherwise.
    pub async fn lookup_tablet_by_key(
        &self,
        table: &TableHandle,
        partition_key: PartitionKey,
        deadline: Instant,
        lookup_type: LookupType,
    ) -> Result<Arc<RemoteTablet>> {
        // Try the fast path without allocating a lookup driver.
        let mut key = partition_key;
        match self.fast_path_lookup_by_key(table, &mut key, lookup_type) {
            FastPathResult::Hit(tablet) => return Ok(tablet),
            FastPathResult::NotFound(status) => return Err(status),
            FastPathResult::Incomplete => {}
        }
        KeyLookup::new(self, table.clone(), key, lookup_type, deadline)
            .run()
            .await
    }

    /// Resolves a tablet by id, consulting the master on a cache miss.
    ///
    /// # Errors
    ///
    /// `NotFound` if the master does not know the tablet; `TimedOut` past
    /// the deadline; terminal master statuses otherwise.
    pub async fn lookup_tablet_by_id(
        &self,
        tablet_id: &TabletId,
        deadline: Instant,
    ) -> Result<Arc<RemoteTablet>> {
        match self.fast_path_lookup_by_id(tablet_id) {
            FastPathResult::Hit(tablet) => return Ok(tablet),
            FastPathResult::NotFound(status) => return Err(status),
            FastPathResult::Incomplete => {}
        }
        IdLookup::new(self, tablet_id.clone(), deadline).run().await
    }

    /// Ensures the server's RPC proxies exist, resolving its address if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError` on resolution failure.
    pub async fn init_server_proxy(
        &self,
        server: &RemoteTabletServer,
    ) -> Result<Arc<TabletServerProxy>> {
        server.init_proxy(self.resolver.as_ref(), &self.config).await
    }

    /// Returns the floor entry for `partition_key` iff it exists, is not
    /// stale, and contains the key.
    fn lookup_entry_by_key_fast_path(
        &self,
        table: &TableHandle,
        partition_key: &PartitionKey,
    ) -> Option<CacheEntry> {
        let state = self.state.read().unwrap();
        let entry = state
            .tablets_by_table_and_key
            .get(table.id())?
            .floor(partition_key)?;
        if entry.is_stale() || !entry.contains(partition_key) {
            return None;
        }
        Some(entry.clone())
    }

    /// Consults the cache for `(table, partition_key)`, advancing the key
    /// across contiguous non-covered gaps in lower-bound mode.
    ///
    /// A covered entry is only accepted if its tablet currently has a
    /// non-failed leader; otherwise a slow-path refresh is forced so
    /// leadership is re-learned from the master.
    pub(crate) fn fast_path_lookup_by_key(
        &self,
        table: &TableHandle,
        partition_key: &mut PartitionKey,
        lookup_type: LookupType,
    ) -> FastPathResult {
        loop {
            let Some(entry) = self.lookup_entry_by_key_fast_path(table, partition_key) else {
                return FastPathResult::Incomplete;
            };
            trace!(table = %table, entry = %entry, "fast-path entry found");
            match entry.kind() {
                CacheEntryKind::Covered(tablet) => {
                    if !tablet.has_leader() {
                        return FastPathResult::Incomplete;
                    }
                    return FastPathResult::Hit(Arc::clone(tablet));
                }
                CacheEntryKind::NonCovered { upper, .. } => {
                    if lookup_type == LookupType::Point || upper.is_empty() {
                        return FastPathResult::NotFound(Status::not_found(format!(
                            "no tablet covering the requested range partition: {entry}"
                        )));
                    }
                    *partition_key = upper.clone();
                }
            }
        }
    }

    /// Consults the by-id index; the cached entry must be fresh and its
    /// tablet must have a leader.
    pub(crate) fn fast_path_lookup_by_id(&self, tablet_id: &TabletId) -> FastPathResult {
        let entry = {
            let state = self.state.read().unwrap();
            state.entry_by_tablet_id.get(tablet_id).cloned()
        };
        match entry {
            Some(entry) if !entry.is_stale() => {
                let tablet = entry.tablet().expect("by-id entries are always covered");
                if tablet.has_leader() {
                    FastPathResult::Hit(Arc::clone(tablet))
                } else {
                    FastPathResult::Incomplete
                }
            }
            _ => FastPathResult::Incomplete,
        }
    }

    /// Merges a table-locations response into the cache and returns the
    /// entry answering `partition_key`.
    ///
    /// Installation is atomic under the write lock: readers observe either
    /// the pre-response or post-response range map.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if the response violates protocol invariants;
    /// the affected tablet's cached replica list is left unmodified.
    pub(crate) fn process_table_locations(
        &self,
        table: &TableHandle,
        partition_key: &PartitionKey,
        is_exact_lookup: bool,
        resp: &GetTableLocationsResponse,
        max_returned_locations: u32,
    ) -> Result<CacheEntry> {
        let expiration = Instant::now() + resp.ttl;

        let mut guard = self.state.write().unwrap();
        let state = &mut *guard;
        let range_map = state
            .tablets_by_table_and_key
            .entry(table.id().clone())
            .or_default();

        if resp.tablet_locations.is_empty() {
            // The master returns the tablet preceding any non-covered range,
            // and the request left the end key unset; an empty response
            // therefore means the table has no tablets at all.
            range_map.clear();
            let entry =
                CacheEntry::non_covered(expiration, PartitionKey::empty(), PartitionKey::empty());
            trace!(table = %table, entry = %entry, "caching empty-table entry");
            range_map.insert(entry);
        } else {
            // Update the tablet server indexes first; replica refresh below
            // resolves server UUIDs through them. The inline replica form is
            // kept for backward compatibility.
            for tablet in &resp.tablet_locations {
                for replica in &tablet.deprecated_replicas {
                    update_tablet_server(&self.registry, &mut state.ts_cache, &replica.ts_info);
                }
            }
            for ts_info in &resp.ts_infos {
                update_tablet_server(&self.registry, &mut state.ts_cache, ts_info);
            }

            let first_lower = resp.tablet_locations[0].partition.key_start();
            if partition_key < first_lower {
                // The first returned tablet starts past the requested key:
                // the key falls in an initial non-covered range. Its
                // existence can only be inferred because the lookup key
                // fell inside it.
                range_map.erase_overlapping(&PartitionKey::empty(), first_lower);
                let entry =
                    CacheEntry::non_covered(expiration, PartitionKey::empty(), first_lower.clone());
                trace!(table = %table, entry = %entry, "caching initial non-covered range");
                range_map.insert(entry);
            }

            // Tracks the upper bound of the previously processed tablet so
            // gaps between consecutive tablets become non-covered entries.
            let mut last_upper = first_lower.clone();
            for tablet in &resp.tablet_locations {
                let lower = tablet.partition.key_start();
                let upper = tablet.partition.key_end();

                if last_upper < *lower {
                    range_map.erase_overlapping(&last_upper, lower);
                    let entry =
                        CacheEntry::non_covered(expiration, last_upper.clone(), lower.clone());
                    trace!(table = %table, entry = %entry, "caching non-covered range");
                    range_map.insert(entry);
                }
                last_upper = upper.clone();

                if let Some(remote) = state.tablets_by_id.get(&tablet.tablet_id) {
                    // Known tablet: bounds are immutable, so only the
                    // replica list and the entry TTL need refreshing.
                    debug_assert_eq!(remote.partition(), &tablet.partition);
                    remote
                        .refresh(&state.ts_cache, tablet, &resp.ts_infos)
                        .map_err(|status| {
                            status.prepend(format!(
                                "failed to refresh replicas for tablet {}",
                                tablet.tablet_id
                            ))
                        })?;
                    if let Some(entry) = range_map.get_mut(lower) {
                        debug_assert!(!entry.is_non_covered());
                        entry.refresh_expiration(expiration);
                    } else {
                        // The tablet exists but is not indexed for key-based
                        // lookups; this happens when its entry was erased by
                        // an overlapping non-covered range and the range has
                        // since been re-covered. Index it now.
                        range_map.erase_overlapping(lower, upper);
                        let entry = CacheEntry::covered(expiration, Arc::clone(remote));
                        trace!(table = %table, entry = %entry, "re-indexing known tablet");
                        range_map.insert(entry);
                    }
                    continue;
                }

                range_map.erase_overlapping(lower, upper);
                let remote = Arc::new(RemoteTablet::new(
                    tablet.tablet_id.clone(),
                    tablet.partition.clone(),
                ));
                remote
                    .refresh(&state.ts_cache, tablet, &resp.ts_infos)
                    .map_err(|status| {
                        status.prepend(format!(
                            "failed to refresh replicas for tablet {}",
                            tablet.tablet_id
                        ))
                    })?;
                let entry = CacheEntry::covered(expiration, Arc::clone(&remote));
                trace!(table = %table, entry = %entry, "caching tablet");
                state.tablets_by_id.insert(tablet.tablet_id.clone(), remote);
                range_map.insert(entry);
            }

            let returned = u32::try_from(resp.tablet_locations.len()).unwrap_or(u32::MAX);
            if !last_upper.is_empty() && returned < max_returned_locations {
                // A short read means the master ran out of tablets, not that
                // it hit the response cap: everything past the last upper
                // bound is a non-covered range. A full read allows no such
                // inference.
                range_map.erase_overlapping(&last_upper, &PartitionKey::empty());
                let entry = CacheEntry::non_covered(expiration, last_upper, PartitionKey::empty());
                trace!(table = %table, entry = %entry, "caching trailing non-covered range");
                range_map.insert(entry);
            }
        }

        let mut entry = range_map
            .floor(partition_key)
            .expect("lookup key has a floor entry after response ingestion")
            .clone();
        if !is_exact_lookup && entry.is_non_covered() && !entry.upper_bound().is_empty() {
            let upper = entry.upper_bound().clone();
            entry = range_map
                .floor(&upper)
                .expect("a non-covered range with an upper bound has a successor entry")
                .clone();
            debug_assert!(!entry.is_non_covered());
        }
        Ok(entry)
    }

    /// Merges a tablet-locations (by-id) response into the cache and
    /// returns the entry for `tablet_id`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the response carries no locations; `Corruption` if it
    /// names a different tablet or violates replica invariants.
    pub(crate) fn process_tablet_locations(
        &self,
        tablet_id: &TabletId,
        resp: &GetTabletLocationsResponse,
    ) -> Result<CacheEntry> {
        let expiration = Instant::now() + self.config.tablet_locations_by_id_ttl;

        if resp.tablet_locations.is_empty() {
            return Err(Status::not_found(format!("tablet {tablet_id} not known to the master")));
        }
        debug_assert_eq!(resp.tablet_locations.len(), 1);
        let tablet = &resp.tablet_locations[0];
        if tablet.tablet_id != *tablet_id {
            return Err(Status::corruption(format!(
                "invalid response from master: requested locations for tablet {tablet_id}, got {}",
                tablet.tablet_id
            )));
        }

        let mut guard = self.state.write().unwrap();
        let state = &mut *guard;
        for ts_info in &resp.ts_infos {
            update_tablet_server(&self.registry, &mut state.ts_cache, ts_info);
        }

        if let Some(remote) = state.tablets_by_id.get(tablet_id) {
            // Bounds are immutable for a tablet id; the cached bounds win.
            debug_assert_eq!(remote.partition(), &tablet.partition);
            trace!(tablet = %tablet_id, "refreshing tablet");
            remote
                .refresh(&state.ts_cache, tablet, &resp.ts_infos)
                .map_err(|status| {
                    status.prepend(format!("failed to refresh replicas for tablet {tablet_id}"))
                })?;
            let entry = state
                .entry_by_tablet_id
                .entry(tablet_id.clone())
                .or_insert_with(|| CacheEntry::covered(expiration, Arc::clone(remote)));
            entry.refresh_expiration(expiration);
        } else {
            let remote = Arc::new(RemoteTablet::new(
                tablet_id.clone(),
                tablet.partition.clone(),
            ));
            remote
                .refresh(&state.ts_cache, tablet, &resp.ts_infos)
                .map_err(|status| {
                    status.prepend(format!("failed to refresh replicas for tablet {tablet_id}"))
                })?;
            let entry = CacheEntry::covered(expiration, Arc::clone(&remote));
            trace!(tablet = %tablet_id, entry = %entry, "caching tablet by id");
            state.tablets_by_id.insert(tablet_id.clone(), remote);
            state.entry_by_tablet_id.insert(tablet_id.clone(), entry);
        }

        Ok(state.entry_by_tablet_id[tablet_id].clone())
    }

    /// Removes every non-covered entry from the table's range map, leaving
    /// covered entries intact.
    ///
    /// Applications call this when they learn out-of-band that new ranges
    /// have been added server-side.
    pub fn clear_non_covered_range_entries(&self, table_id: &TableId) {
        debug!(table = %table_id, "clearing non-covered range entries");
        let mut state = self.state.write().unwrap();
        if let Some(range_map) = state.tablets_by_table_and_key.get_mut(table_id) {
            range_map.clear_non_covered();
        }
    }

    /// Drops every cached index entry. The tablet server registry is
    /// retained, so previously handed-out server handles stay valid.
    pub fn clear_cache(&self) {
        debug!("clearing meta cache");
        let mut state = self.state.write().unwrap();
        state.ts_cache.clear();
        state.tablets_by_id.clear();
        state.tablets_by_table_and_key.clear();
        state.entry_by_tablet_id.clear();
    }

    /// Marks the server's replicas as failed on every cached tablet.
    pub fn mark_ts_failed(&self, server: &Arc<RemoteTabletServer>, status: &Status) {
        info!(tserver = %server, status = %status, "marking tablet server as failed");
        let ts_status = status.clone().prepend("tablet server failed");

        let state = self.state.read().unwrap();
        for tablet in state.tablets_by_id.values() {
            tablet.mark_replica_failed(server, &ts_status);
        }
    }

    /// Tries to acquire a master-lookup permit without blocking.
    pub(crate) fn try_acquire_master_lookup_permit(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.master_lookup_sem).try_acquire_owned().ok()
    }

    /// Returns the number of master-lookup permits currently available.
    #[must_use]
    pub fn available_master_lookup_permits(&self) -> usize {
        self.master_lookup_sem.available_permits()
    }
}

/// Updates the server in the registry and the `ts_cache` index; the
/// registry entry survives [`MetaCache::clear_cache`].
fn update_tablet_server(
    registry: &TabletServerRegistry,
    ts_cache: &mut HashMap<ServerUuid, Arc<RemoteTabletServer>>,
    info: &TsInfo,
) {
    if let Some(server) = ts_cache.get(&info.permanent_uuid) {
        server.update(info);
        return;
    }
    let server = registry.upsert(info);
    ts_cache.insert(info.permanent_uuid.clone(), server);
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use async_trait::async_trait;

    use crate::proto::{
        GetTableLocationsRequest, GetTabletLocationsRequest, HostPort, InternedReplica,
        ReplicaRole, TabletLocations,
    };
    use crate::proxy::CredentialsPolicy;
    use strata_core::Partition;

    /// A master that must never be reached; ingestion tests feed responses
    /// directly into the cache.
    struct UnreachableMaster;

    #[async_trait]
    impl MasterService for UnreachableMaster {
        async fn get_table_locations(
            &self,
            _req: GetTableLocationsRequest,
        ) -> Result<GetTableLocationsResponse> {
            panic!("unexpected master call");
        }

        async fn get_tablet_locations(
            &self,
            _req: GetTabletLocationsRequest,
        ) -> Result<GetTabletLocationsResponse> {
            panic!("unexpected master call");
        }

        async fn reconnect_to_leader(&self, _policy: CredentialsPolicy) -> Result<()> {
            panic!("unexpected master call");
        }
    }

    struct UnreachableResolver;

    #[async_trait]
    impl DnsResolver for UnreachableResolver {
        async fn resolve(&self, _host_port: &HostPort) -> Result<Vec<std::net::SocketAddr>> {
            panic!("unexpected resolution");
        }
    }

    fn test_cache() -> Arc<MetaCache> {
        MetaCache::new(
            Arc::new(UnreachableMaster),
            Arc::new(UnreachableResolver),
            MetaCacheConfig::fast_for_testing(),
        )
    }

    fn ts_infos(uuids: &[&str]) -> Vec<TsInfo> {
        uuids
            .iter()
            .map(|uuid| TsInfo::new(*uuid, vec![HostPort::new(format!("{uuid}.example.com"), 7050)]))
            .collect()
    }

    fn tablet_locations(id: &str, lower: &[u8], upper: &[u8], num_replicas: usize) -> TabletLocations {
        TabletLocations {
            tablet_id: TabletId::new(id),
            partition: Partition::new(PartitionKey::from(lower), PartitionKey::from(upper)),
            deprecated_replicas: Vec::new(),
            interned_replicas: (0..num_replicas)
                .map(|idx| InternedReplica {
                    ts_info_idx: idx,
                    role: if idx == 0 { ReplicaRole::Leader } else { ReplicaRole::Follower },
                })
                .collect(),
        }
    }

    fn response(tablets: Vec<TabletLocations>, ts: &[&str]) -> GetTableLocationsResponse {
        GetTableLocationsResponse {
            ttl: Duration::from_secs(60),
            tablet_locations: tablets,
            ts_infos: ts_infos(ts),
        }
    }

    fn table() -> TableHandle {
        TableHandle::new("table-1", "test_table")
    }

    fn key(bytes: &[u8]) -> PartitionKey {
        PartitionKey::from(bytes)
    }

    fn range_map_bounds(cache: &MetaCache, table_id: &TableId) -> Vec<(String, String, bool)> {
        let state = cache.state.read().unwrap();
        state.tablets_by_table_and_key[table_id]
            .iter()
            .map(|e| {
                (
                    e.lower_bound().debug_lower_bound(),
                    e.upper_bound().debug_upper_bound(),
                    e.is_non_covered(),
                )
            })
            .collect()
    }

    #[test]
    fn test_initial_and_interior_non_covered_ranges() {
        let cache = test_cache();
        let resp = response(
            vec![
                tablet_locations("B", b"c1", b"c3", 1),
                tablet_locations("D", b"c5", b"c7", 1),
            ],
            &["ts-1"],
        );

        let entry = cache
            .process_table_locations(&table(), &key(b"c"), false, &resp, 10)
            .unwrap();

        // Lower-bound mode advances out of the initial non-covered range.
        assert_eq!(entry.tablet().unwrap().tablet_id().as_str(), "B");

        assert_eq!(
            range_map_bounds(&cache, table().id()),
            vec![
                ("<start>".into(), "c1".into(), true),
                ("c1".into(), "c3".into(), false),
                ("c3".into(), "c5".into(), true),
                ("c5".into(), "c7".into(), false),
                ("c7".into(), "<end>".into(), true),
            ]
        );
    }

    #[test]
    fn test_point_lookup_returns_non_covered_entry() {
        let cache = test_cache();
        let resp = response(
            vec![
                tablet_locations("B", b"c1", b"c3", 1),
                tablet_locations("D", b"c5", b"c7", 1),
            ],
            &["ts-1"],
        );
        cache
            .process_table_locations(&table(), &key(b"c"), false, &resp, 10)
            .unwrap();

        // Fast path: point lookup into the interior gap is NotFound without
        // master traffic.
        let mut k = key(b"c4");
        let result = cache.fast_path_lookup_by_key(&table(), &mut k, LookupType::Point);
        assert!(matches!(result, FastPathResult::NotFound(ref s) if s.is_not_found()));
    }

    #[test]
    fn test_fast_path_advances_across_gap() {
        let cache = test_cache();
        let resp = response(
            vec![
                tablet_locations("B", b"c1", b"c3", 1),
                tablet_locations("D", b"c5", b"c7", 1),
            ],
            &["ts-1"],
        );
        cache
            .process_table_locations(&table(), &key(b"c"), false, &resp, 10)
            .unwrap();

        let mut k = key(b"c4");
        let result = cache.fast_path_lookup_by_key(&table(), &mut k, LookupType::LowerBound);
        match result {
            FastPathResult::Hit(tablet) => assert_eq!(tablet.tablet_id().as_str(), "D"),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn test_fast_path_range_mode_past_end_is_not_found() {
        let cache = test_cache();
        let resp = response(vec![tablet_locations("B", b"c1", b"c3", 1)], &["ts-1"]);
        cache
            .process_table_locations(&table(), &key(b"c1"), false, &resp, 10)
            .unwrap();

        let mut k = key(b"c9");
        let result = cache.fast_path_lookup_by_key(&table(), &mut k, LookupType::LowerBound);
        assert!(matches!(result, FastPathResult::NotFound(_)));
    }

    #[test]
    fn test_short_read_infers_trailing_non_covered_range() {
        let cache = test_cache();
        let resp = response(vec![tablet_locations("B", b"c1", b"c3", 1)], &["ts-1"]);
        cache
            .process_table_locations(&table(), &key(b"c1"), false, &resp, 10)
            .unwrap();

        assert_eq!(
            range_map_bounds(&cache, table().id()),
            vec![
                ("c1".into(), "c3".into(), false),
                ("c3".into(), "<end>".into(), true),
            ]
        );
    }

    #[test]
    fn test_full_read_infers_no_trailing_range() {
        let cache = test_cache();
        let resp = response(
            vec![
                tablet_locations("A", b"a", b"b", 1),
                tablet_locations("B", b"b", b"c", 1),
            ],
            &["ts-1"],
        );
        // The response hit the cap: the master may simply have stopped.
        cache
            .process_table_locations(&table(), &key(b"a"), false, &resp, 2)
            .unwrap();

        assert_eq!(
            range_map_bounds(&cache, table().id()),
            vec![
                ("a".into(), "b".into(), false),
                ("b".into(), "c".into(), false),
            ]
        );

        // The uncached key past the end must go to the master.
        let mut k = key(b"c");
        let result = cache.fast_path_lookup_by_key(&table(), &mut k, LookupType::Point);
        assert!(matches!(result, FastPathResult::Incomplete));
    }

    #[test]
    fn test_empty_table_caches_unbounded_non_covered_range() {
        let cache = test_cache();
        let resp = response(Vec::new(), &[]);

        let entry = cache
            .process_table_locations(&table(), &key(b"x"), true, &resp, 1)
            .unwrap();
        assert!(entry.is_non_covered());

        // All subsequent point lookups answer NotFound from the cache.
        for k_bytes in [&b""[..], b"a", b"zzz"] {
            let mut k = key(k_bytes);
            let result = cache.fast_path_lookup_by_key(&table(), &mut k, LookupType::Point);
            assert!(matches!(result, FastPathResult::NotFound(_)));
        }
    }

    #[test]
    fn test_ingestion_is_idempotent() {
        let cache = test_cache();
        let resp = response(
            vec![
                tablet_locations("B", b"c1", b"c3", 1),
                tablet_locations("D", b"c5", b"c7", 1),
            ],
            &["ts-1"],
        );

        cache
            .process_table_locations(&table(), &key(b"c"), false, &resp, 10)
            .unwrap();
        let first = range_map_bounds(&cache, table().id());

        cache
            .process_table_locations(&table(), &key(b"c"), false, &resp, 10)
            .unwrap();
        let second = range_map_bounds(&cache, table().id());

        assert_eq!(first, second);
    }

    #[test]
    fn test_non_overlap_after_refresh_with_new_tablets() {
        let cache = test_cache();
        // First response: one tablet [a, e).
        let resp = response(vec![tablet_locations("A", b"a", b"e", 1)], &["ts-1"]);
        cache
            .process_table_locations(&table(), &key(b"a"), false, &resp, 10)
            .unwrap();

        // The range was dropped and re-added as [a, c) + [c, e).
        let resp = response(
            vec![
                tablet_locations("A2", b"a", b"c", 1),
                tablet_locations("A3", b"c", b"e", 1),
            ],
            &["ts-1"],
        );
        cache
            .process_table_locations(&table(), &key(b"a"), false, &resp, 10)
            .unwrap();

        let bounds = range_map_bounds(&cache, table().id());
        // No two entries may overlap.
        for window in bounds.windows(2) {
            assert!(window[0].1 <= window[1].0 || window[0].1 == "<end>");
        }
        assert!(bounds.iter().any(|(lower, _, _)| lower == "a"));
        assert!(bounds.iter().any(|(lower, _, _)| lower == "c"));
    }

    #[test]
    fn test_corrupt_response_leaves_tablet_unmodified() {
        let cache = test_cache();
        let resp = response(vec![tablet_locations("B", b"c1", b"c3", 1)], &["ts-1"]);
        cache
            .process_table_locations(&table(), &key(b"c1"), false, &resp, 10)
            .unwrap();

        // Second response references an interned index out of range.
        let mut bad = response(vec![tablet_locations("B", b"c1", b"c3", 3)], &["ts-1"]);
        bad.tablet_locations[0].interned_replicas[2].ts_info_idx = 9;
        let err = cache
            .process_table_locations(&table(), &key(b"c1"), false, &bad, 10)
            .unwrap_err();

        assert!(err.is_corruption());
        let state = cache.state.read().unwrap();
        let tablet = &state.tablets_by_id[&TabletId::new("B")];
        assert_eq!(tablet.servers().len(), 1);
    }

    #[test]
    fn test_by_id_response_ingestion() {
        let cache = test_cache();
        let tablet_id = TabletId::new("B");
        let resp = GetTabletLocationsResponse {
            tablet_locations: vec![tablet_locations("B", b"c1", b"c3", 1)],
            ts_infos: ts_infos(&["ts-1"]),
        };

        let entry = cache.process_tablet_locations(&tablet_id, &resp).unwrap();
        assert_eq!(entry.tablet().unwrap().tablet_id().as_str(), "B");

        match cache.fast_path_lookup_by_id(&tablet_id) {
            FastPathResult::Hit(tablet) => assert_eq!(tablet.tablet_id().as_str(), "B"),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn test_by_id_empty_response_is_not_found() {
        let cache = test_cache();
        let resp = GetTabletLocationsResponse {
            tablet_locations: Vec::new(),
            ts_infos: Vec::new(),
        };
        let err = cache
            .process_tablet_locations(&TabletId::new("nope"), &resp)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_by_id_wrong_tablet_is_corruption() {
        let cache = test_cache();
        let resp = GetTabletLocationsResponse {
            tablet_locations: vec![tablet_locations("other", b"a", b"b", 1)],
            ts_infos: ts_infos(&["ts-1"]),
        };
        let err = cache
            .process_tablet_locations(&TabletId::new("B"), &resp)
            .unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_fast_path_rejects_leaderless_tablet() {
        let cache = test_cache();
        let resp = response(vec![tablet_locations("B", b"c1", b"c3", 2)], &["ts-1", "ts-2"]);
        cache
            .process_table_locations(&table(), &key(b"c1"), false, &resp, 10)
            .unwrap();

        let tablet = {
            let state = cache.state.read().unwrap();
            Arc::clone(&state.tablets_by_id[&TabletId::new("B")])
        };
        let leader = tablet.leader_server().unwrap();
        tablet.mark_server_as_follower(&leader);

        let mut k = key(b"c2");
        let result = cache.fast_path_lookup_by_key(&table(), &mut k, LookupType::Point);
        assert!(matches!(result, FastPathResult::Incomplete));
    }

    #[test]
    fn test_clear_cache_retains_registry() {
        let cache = test_cache();
        let resp = response(vec![tablet_locations("B", b"c1", b"c3", 1)], &["ts-1"]);
        cache
            .process_table_locations(&table(), &key(b"c1"), false, &resp, 10)
            .unwrap();
        assert_eq!(cache.registry().len(), 1);

        cache.clear_cache();

        let mut k = key(b"c2");
        let result = cache.fast_path_lookup_by_key(&table(), &mut k, LookupType::Point);
        assert!(matches!(result, FastPathResult::Incomplete));
        // The registry still interns the server.
        assert_eq!(cache.registry().len(), 1);
    }

    #[test]
    fn test_clear_non_covered_range_entries() {
        let cache = test_cache();
        let resp = response(
            vec![
                tablet_locations("B", b"c1", b"c3", 1),
                tablet_locations("D", b"c5", b"c7", 1),
            ],
            &["ts-1"],
        );
        cache
            .process_table_locations(&table(), &key(b"c"), false, &resp, 10)
            .unwrap();

        cache.clear_non_covered_range_entries(table().id());

        let bounds = range_map_bounds(&cache, table().id());
        assert_eq!(bounds.len(), 2);
        assert!(bounds.iter().all(|(_, _, non_covered)| !non_covered));
    }

    #[test]
    fn test_mark_ts_failed_hits_all_tablets() {
        let cache = test_cache();
        let resp = response(
            vec![
                tablet_locations("B", b"c1", b"c3", 2),
                tablet_locations("D", b"c5", b"c7", 2),
            ],
            &["ts-1", "ts-2"],
        );
        cache
            .process_table_locations(&table(), &key(b"c"), false, &resp, 10)
            .unwrap();

        let server = cache.registry().get(&ServerUuid::new("ts-1")).unwrap();
        cache.mark_ts_failed(&server, &Status::network_error("connection refused"));

        let state = cache.state.read().unwrap();
        for id in ["B", "D"] {
            let tablet = &state.tablets_by_id[&TabletId::new(id)];
            assert_eq!(tablet.num_failed_replicas(), 1);
        }
    }

    #[test]
    fn test_ttl_expiry_forces_slow_path() {
        let cache = test_cache();
        let mut resp = response(vec![tablet_locations("B", b"c1", b"c3", 1)], &["ts-1"]);
        resp.ttl = Duration::ZERO;
        cache
            .process_table_locations(&table(), &key(b"c1"), false, &resp, 10)
            .unwrap();

        let mut k = key(b"c2");
        let result = cache.fast_path_lookup_by_key(&table(), &mut k, LookupType::Point);
        assert!(matches!(result, FastPathResult::Incomplete));
    }

    #[test]
    fn test_permits_are_bounded() {
        let cache = test_cache();
        assert_eq!(cache.available_master_lookup_permits(), 50);

        let permits: Vec<_> = (0..50)
            .map(|_| cache.try_acquire_master_lookup_permit().unwrap())
            .collect();
        assert!(cache.try_acquire_master_lookup_permit().is_none());

        drop(permits);
        assert_eq!(cache.available_master_lookup_permits(), 50);
    }
}
