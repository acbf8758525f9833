//! Wire types of the master location protocol.
//!
//! Plain structs mirroring the master's location RPCs. Replica lists come
//! in two forms: the deprecated inline form embeds a full [`TsInfo`] per
//! replica, while the interned form indexes into the response's shared
//! `ts_infos` table. Clients request interning; both forms are accepted on
//! ingestion for backward compatibility.

use std::fmt;

use strata_core::{Partition, PartitionKey, ServerUuid, TableId, TabletId};

/// Consensus role of a tablet replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaRole {
    /// The replica currently leading the tablet's consensus config.
    Leader,
    /// A voting follower.
    Follower,
    /// A non-voting replica catching up.
    Learner,
    /// A replica outside the active consensus config.
    NonParticipant,
}

impl ReplicaRole {
    /// Returns the role name for log output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Leader => "LEADER",
            Self::Follower => "FOLLOWER",
            Self::Learner => "LEARNER",
            Self::NonParticipant => "NON_PARTICIPANT",
        }
    }
}

impl fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A host and port advertised by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    /// The hostname or address.
    pub host: String,
    /// The port.
    pub port: u16,
}

impl HostPort {
    /// Creates a new host/port pair.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Master-reported information about one tablet server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsInfo {
    /// The server's permanent UUID.
    pub permanent_uuid: ServerUuid,
    /// RPC addresses, ordered by preference.
    pub rpc_addresses: Vec<HostPort>,
    /// Opaque placement location assigned by the master.
    pub location: String,
    /// Path of a UNIX domain socket the server listens on, if any.
    pub unix_domain_socket_path: Option<String>,
}

impl TsInfo {
    /// Creates server info with the given UUID and addresses.
    #[must_use]
    pub fn new(permanent_uuid: impl Into<ServerUuid>, rpc_addresses: Vec<HostPort>) -> Self {
        Self {
            permanent_uuid: permanent_uuid.into(),
            rpc_addresses,
            location: String::new(),
            unix_domain_socket_path: None,
        }
    }
}

/// A replica in the deprecated inline form.
#[derive(Debug, Clone)]
pub struct InlineReplica {
    /// Full server info, embedded per replica.
    pub ts_info: TsInfo,
    /// The replica's consensus role.
    pub role: ReplicaRole,
}

/// A replica in the interned form, indexing the response's `ts_infos` table.
#[derive(Debug, Clone, Copy)]
pub struct InternedReplica {
    /// Index into the response-level `ts_infos` table.
    pub ts_info_idx: usize,
    /// The replica's consensus role.
    pub role: ReplicaRole,
}

/// Location of one tablet: its partition bounds and replica list.
#[derive(Debug, Clone)]
pub struct TabletLocations {
    /// The tablet id.
    pub tablet_id: TabletId,
    /// The tablet's partition-key bounds.
    pub partition: Partition,
    /// Replicas in the deprecated inline form; empty when interning is used.
    pub deprecated_replicas: Vec<InlineReplica>,
    /// Replicas in the interned form.
    pub interned_replicas: Vec<InternedReplica>,
}

/// Which replica types a locations request should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaTypeFilter {
    /// Voting replicas only (the default master behavior).
    VoterReplica,
    /// All replicas, including learners and non-participants.
    AnyReplica,
}

/// Request for the locations of a table's tablets from a start key onward.
#[derive(Debug, Clone)]
pub struct GetTableLocationsRequest {
    /// The table to look up.
    pub table_id: TableId,
    /// Return tablets from this partition key onward. The end key is left
    /// unset so the master prefetches additional tablets.
    pub partition_key_start: PartitionKey,
    /// Maximum number of tablet locations to return.
    pub max_returned_locations: u32,
    /// Request the interned replica form.
    pub intern_ts_infos: bool,
    /// Optional replica-type filter; `None` keeps the master default.
    pub replica_type_filter: Option<ReplicaTypeFilter>,
}

/// Response carrying tablet locations for a table.
///
/// The master returns tablets in partition-key order starting from the
/// tablet covering (or preceding) the requested key, capped at
/// `max_returned_locations`. A response shorter than the cap means there
/// are no further tablets past the last returned upper bound.
#[derive(Debug, Clone)]
pub struct GetTableLocationsResponse {
    /// How long the returned locations may be cached.
    pub ttl: std::time::Duration,
    /// Tablet locations in partition-key order.
    pub tablet_locations: Vec<TabletLocations>,
    /// Interned tablet server table referenced by `InternedReplica`.
    pub ts_infos: Vec<TsInfo>,
}

/// Request for the locations of specific tablets by id.
#[derive(Debug, Clone)]
pub struct GetTabletLocationsRequest {
    /// The tablet ids to look up.
    pub tablet_ids: Vec<TabletId>,
    /// Request the interned replica form.
    pub intern_ts_infos: bool,
}

/// Response carrying locations for tablets requested by id.
#[derive(Debug, Clone)]
pub struct GetTabletLocationsResponse {
    /// Locations of the requested tablets; missing tablets are omitted.
    pub tablet_locations: Vec<TabletLocations>,
    /// Interned tablet server table referenced by `InternedReplica`.
    pub ts_infos: Vec<TsInfo>,
}
