//! Per-tablet replica state.
//!
//! A [`RemoteTablet`] is the client's mutable view of one tablet: which
//! servers replicate it, which of them leads, and which have failed. The
//! replica list is rebuilt from each master response; between refreshes the
//! client updates its beliefs locally when servers reject requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use strata_core::{Partition, Result, ServerUuid, Status, TabletId};
use tracing::{trace, warn};

use crate::proto::{ReplicaRole, TabletLocations, TsInfo};
use crate::server::RemoteTabletServer;
use crate::throttle::LogThrottle;

/// Minimum interval between replica-failure warnings per tablet.
const REPLICA_FAILED_WARN_PERIOD: Duration = Duration::from_secs(1);

/// One replica of a tablet.
#[derive(Debug, Clone)]
pub struct RemoteReplica {
    /// The server hosting the replica. A non-owning handle; the registry is
    /// the retention root.
    pub server: Arc<RemoteTabletServer>,
    /// The replica's consensus role as last learned or guessed.
    pub role: ReplicaRole,
    /// Whether the replica has been marked failed; failed replicas are
    /// skipped by all selection paths until the next refresh.
    pub failed: bool,
}

/// Mutable tablet state, guarded by the tablet's lock.
#[derive(Debug, Default)]
struct TabletState {
    replicas: Vec<RemoteReplica>,
    /// One-way until the next successful refresh clears it.
    stale: bool,
}

/// The client's view of one tablet.
///
/// The id and partition bounds are immutable; the replica list is guarded
/// by a lock held only around list reads and mutations, never across RPC,
/// DNS, or the cache lock.
#[derive(Debug)]
pub struct RemoteTablet {
    tablet_id: TabletId,
    partition: Partition,
    state: Mutex<TabletState>,
    failed_warn_throttle: LogThrottle,
}

impl RemoteTablet {
    /// Creates a tablet with no replicas; [`Self::refresh`] populates them.
    #[must_use]
    pub fn new(tablet_id: TabletId, partition: Partition) -> Self {
        Self {
            tablet_id,
            partition,
            state: Mutex::new(TabletState::default()),
            failed_warn_throttle: LogThrottle::new(REPLICA_FAILED_WARN_PERIOD),
        }
    }

    /// Returns the tablet id.
    #[must_use]
    pub const fn tablet_id(&self) -> &TabletId {
        &self.tablet_id
    }

    /// Returns the tablet's partition bounds.
    #[must_use]
    pub const fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Rebuilds the replica list from a master-reported location.
    ///
    /// Both the deprecated inline replica form and the interned form are
    /// accepted. The new list is built outside the lock and swapped in
    /// atomically on success, clearing the stale flag; on error the
    /// existing list is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if an interned index is out of range, a replica
    /// references an unknown server, or the location carries no replicas.
    pub fn refresh(
        &self,
        servers: &HashMap<ServerUuid, Arc<RemoteTabletServer>>,
        locations: &TabletLocations,
        ts_info_dict: &[TsInfo],
    ) -> Result<()> {
        let mut replicas = Vec::with_capacity(
            locations.deprecated_replicas.len() + locations.interned_replicas.len(),
        );

        // The inline form is kept for backward compatibility with masters
        // that do not intern server info.
        for replica in &locations.deprecated_replicas {
            replicas.push(RemoteReplica {
                server: lookup_server(servers, &replica.ts_info.permanent_uuid)?,
                role: replica.role,
                failed: false,
            });
        }
        for replica in &locations.interned_replicas {
            let Some(ts_info) = ts_info_dict.get(replica.ts_info_idx) else {
                return Err(Status::corruption(format!(
                    "invalid response from master: referenced tablet server index {} but only {} present",
                    replica.ts_info_idx,
                    ts_info_dict.len()
                )));
            };
            replicas.push(RemoteReplica {
                server: lookup_server(servers, &ts_info.permanent_uuid)?,
                role: replica.role,
                failed: false,
            });
        }

        if replicas.is_empty() {
            return Err(Status::corruption(format!(
                "master returned no replicas for tablet {}",
                self.tablet_id
            )));
        }

        let mut state = self.state.lock().unwrap();
        state.replicas = replicas;
        state.stale = false;
        trace!(tablet = %self.tablet_id, replicas = %replicas_as_string(&state.replicas), "refreshed replicas");
        Ok(())
    }

    /// Marks the tablet's cached state as stale, forcing the next lookup to
    /// refresh from the master. Idempotent.
    pub fn mark_stale(&self) {
        self.state.lock().unwrap().stale = true;
    }

    /// Returns true if the tablet's cached state is stale.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.state.lock().unwrap().stale
    }

    /// Marks every replica hosted by `server` as failed.
    pub fn mark_replica_failed(&self, server: &Arc<RemoteTabletServer>, status: &Status) {
        let mut state = self.state.lock().unwrap();
        if self.failed_warn_throttle.should_log() {
            warn!(
                tablet = %self.tablet_id,
                tserver = %server,
                status = %status,
                "replica has failed"
            );
        }
        for replica in &mut state.replicas {
            if Arc::ptr_eq(&replica.server, server) {
                replica.failed = true;
            }
        }
    }

    /// Returns the number of failed replicas.
    #[must_use]
    pub fn num_failed_replicas(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .replicas
            .iter()
            .filter(|r| r.failed)
            .count()
    }

    /// Returns the first non-failed leader replica's server, if any.
    #[must_use]
    pub fn leader_server(&self) -> Option<Arc<RemoteTabletServer>> {
        self.state
            .lock()
            .unwrap()
            .replicas
            .iter()
            .find(|r| !r.failed && r.role == ReplicaRole::Leader)
            .map(|r| Arc::clone(&r.server))
    }

    /// Returns true if the tablet has a non-failed leader replica.
    #[must_use]
    pub fn has_leader(&self) -> bool {
        self.leader_server().is_some()
    }

    /// Returns the servers of all non-failed replicas, preserving list
    /// order.
    #[must_use]
    pub fn servers(&self) -> Vec<Arc<RemoteTabletServer>> {
        self.state
            .lock()
            .unwrap()
            .replicas
            .iter()
            .filter(|r| !r.failed)
            .map(|r| Arc::clone(&r.server))
            .collect()
    }

    /// Returns all non-failed replicas, preserving list order.
    #[must_use]
    pub fn replicas(&self) -> Vec<RemoteReplica> {
        self.state
            .lock()
            .unwrap()
            .replicas
            .iter()
            .filter(|r| !r.failed)
            .cloned()
            .collect()
    }

    /// Marks `server`'s replica as the leader and demotes any other leader
    /// to follower, so at most one leader remains.
    ///
    /// This is a client-side belief update: when a server reports "not
    /// leader", the client preemptively picks a new leader and installs it
    /// without a master round-trip.
    pub fn mark_server_as_leader(&self, server: &Arc<RemoteTabletServer>) {
        let mut state = self.state.lock().unwrap();
        for replica in &mut state.replicas {
            if Arc::ptr_eq(&replica.server, server) {
                replica.role = ReplicaRole::Leader;
            } else if replica.role == ReplicaRole::Leader {
                replica.role = ReplicaRole::Follower;
            }
        }
        trace!(tablet = %self.tablet_id, replicas = %replicas_as_string(&state.replicas), "marked leader");
    }

    /// Demotes `server`'s replica to follower; other replicas are
    /// untouched.
    pub fn mark_server_as_follower(&self, server: &Arc<RemoteTabletServer>) {
        let mut state = self.state.lock().unwrap();
        for replica in &mut state.replicas {
            if Arc::ptr_eq(&replica.server, server) {
                replica.role = ReplicaRole::Follower;
            }
        }
        trace!(tablet = %self.tablet_id, replicas = %replicas_as_string(&state.replicas), "marked follower");
    }

    /// Renders the replica list for log output.
    #[must_use]
    pub fn replicas_as_string(&self) -> String {
        replicas_as_string(&self.state.lock().unwrap().replicas)
    }
}

fn lookup_server(
    servers: &HashMap<ServerUuid, Arc<RemoteTabletServer>>,
    uuid: &ServerUuid,
) -> Result<Arc<RemoteTabletServer>> {
    servers.get(uuid).map(Arc::clone).ok_or_else(|| {
        Status::corruption(format!(
            "invalid response from master: replica references unknown tablet server {uuid}"
        ))
    })
}

fn replicas_as_string(replicas: &[RemoteReplica]) -> String {
    let mut out = String::new();
    for replica in replicas {
        if !out.is_empty() {
            out.push_str(", ");
        }
        out.push_str(&format!(
            "{} ({}, {})",
            replica.server.uuid(),
            replica.role.name(),
            if replica.failed { "FAILED" } else { "OK" }
        ));
    }
    out
}
