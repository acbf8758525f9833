//! Shared test fixtures: a scriptable mock master and a canned resolver.

// Each integration test binary uses a different subset of these fixtures.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use strata_core::{Partition, PartitionKey, Result, Status, TableId, TabletId};
use strata_meta::{
    DnsResolver, GetTableLocationsRequest, GetTableLocationsResponse, GetTabletLocationsRequest,
    GetTabletLocationsResponse, HostPort, InternedReplica, MasterService, ReplicaRole,
    TabletLocations, TsInfo,
};

/// Builds a tablet location with interned replicas.
///
/// `replicas` pairs an index into the mock master's server table with a
/// role.
pub fn tablet(id: &str, lower: &[u8], upper: &[u8], replicas: &[(usize, ReplicaRole)]) -> TabletLocations {
    TabletLocations {
        tablet_id: TabletId::new(id),
        partition: Partition::new(PartitionKey::from(lower), PartitionKey::from(upper)),
        deprecated_replicas: Vec::new(),
        interned_replicas: replicas
            .iter()
            .map(|&(ts_info_idx, role)| InternedReplica { ts_info_idx, role })
            .collect(),
    }
}

#[derive(Default)]
struct MasterState {
    /// Per-table tablet locations, sorted by lower bound.
    tables: HashMap<TableId, Vec<TabletLocations>>,
    /// The master-wide server table; interned indices refer into it.
    ts_infos: Vec<TsInfo>,
    /// Statuses to return (one per call) before serving normally.
    fail_queue: VecDeque<Status>,
    /// TTL stamped on table-locations responses.
    ttl: Duration,
    /// Simulated service time per locations call.
    response_delay: Duration,
}

/// A scriptable in-memory master.
///
/// Serves locations the way the real master does: tablets are returned in
/// partition-key order starting from the tablet covering (or preceding)
/// the requested key, capped at the request's maximum.
pub struct MockMaster {
    state: Mutex<MasterState>,
    table_lookups: AtomicUsize,
    tablet_lookups: AtomicUsize,
    reconnects: AtomicUsize,
    inflight: AtomicUsize,
    inflight_high_water: AtomicUsize,
}

impl MockMaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MasterState {
                ttl: Duration::from_secs(60),
                ..MasterState::default()
            }),
            table_lookups: AtomicUsize::new(0),
            tablet_lookups: AtomicUsize::new(0),
            reconnects: AtomicUsize::new(0),
            inflight: AtomicUsize::new(0),
            inflight_high_water: AtomicUsize::new(0),
        })
    }

    /// Registers a tablet server and returns its interned index.
    pub fn add_ts(&self, uuid: &str) -> usize {
        let mut state = self.state.lock().unwrap();
        state.ts_infos.push(TsInfo::new(
            uuid,
            vec![HostPort::new(format!("{uuid}.example.com"), 7050)],
        ));
        state.ts_infos.len() - 1
    }

    /// Installs the authoritative tablet list for a table.
    pub fn set_table(&self, table_id: &TableId, mut tablets: Vec<TabletLocations>) {
        tablets.sort_by(|a, b| a.partition.key_start().cmp(b.partition.key_start()));
        self.state.lock().unwrap().tables.insert(table_id.clone(), tablets);
    }

    pub fn set_ttl(&self, ttl: Duration) {
        self.state.lock().unwrap().ttl = ttl;
    }

    pub fn set_response_delay(&self, delay: Duration) {
        self.state.lock().unwrap().response_delay = delay;
    }

    /// Queues a status to be returned by the next locations call.
    pub fn push_error(&self, status: Status) {
        self.state.lock().unwrap().fail_queue.push_back(status);
    }

    pub fn table_lookups(&self) -> usize {
        self.table_lookups.load(Ordering::SeqCst)
    }

    pub fn tablet_lookups(&self) -> usize {
        self.tablet_lookups.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// The maximum number of locations calls ever in flight at once.
    pub fn inflight_high_water(&self) -> usize {
        self.inflight_high_water.load(Ordering::SeqCst)
    }

    fn enter(&self) -> (Duration, Option<Status>) {
        let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inflight_high_water.fetch_max(current, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        (state.response_delay, state.fail_queue.pop_front())
    }

    fn exit(&self) {
        self.inflight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MasterService for MockMaster {
    async fn get_table_locations(
        &self,
        req: GetTableLocationsRequest,
    ) -> Result<GetTableLocationsResponse> {
        self.table_lookups.fetch_add(1, Ordering::SeqCst);
        let (delay, injected) = self.enter();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = injected.map_or_else(
            || {
                let state = self.state.lock().unwrap();
                let tablets = state.tables.get(&req.table_id).ok_or_else(|| {
                    Status::not_found(format!("table {} not known to the master", req.table_id))
                })?;

                // Start from the tablet covering or preceding the key, so a
                // key in a non-covered range still sees its predecessor.
                let below = tablets
                    .partition_point(|t| t.partition.key_start() <= &req.partition_key_start);
                let start_idx = below.saturating_sub(1);
                let end_idx =
                    (start_idx + req.max_returned_locations as usize).min(tablets.len());
                Ok(GetTableLocationsResponse {
                    ttl: state.ttl,
                    tablet_locations: tablets[start_idx..end_idx].to_vec(),
                    ts_infos: state.ts_infos.clone(),
                })
            },
            Err,
        );
        self.exit();
        result
    }

    async fn get_tablet_locations(
        &self,
        req: GetTabletLocationsRequest,
    ) -> Result<GetTabletLocationsResponse> {
        self.tablet_lookups.fetch_add(1, Ordering::SeqCst);
        let (delay, injected) = self.enter();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = injected.map_or_else(
            || {
                let state = self.state.lock().unwrap();
                let tablet_locations: Vec<TabletLocations> = state
                    .tables
                    .values()
                    .flatten()
                    .filter(|t| req.tablet_ids.contains(&t.tablet_id))
                    .cloned()
                    .collect();
                Ok(GetTabletLocationsResponse {
                    tablet_locations,
                    ts_infos: state.ts_infos.clone(),
                })
            },
            Err,
        );
        self.exit();
        result
    }

    async fn reconnect_to_leader(
        &self,
        _policy: strata_meta::CredentialsPolicy,
    ) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A resolver that answers every host with a fixed loopback address.
pub struct MockResolver {
    resolutions: AtomicUsize,
}

impl MockResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            resolutions: AtomicUsize::new(0),
        })
    }

    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsResolver for MockResolver {
    async fn resolve(&self, _host_port: &HostPort) -> Result<Vec<SocketAddr>> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        Ok(vec!["127.0.0.1:7050".parse().expect("valid literal addr")])
    }
}
