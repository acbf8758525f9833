//! Leader selection for outgoing tablet requests.
//!
//! A [`LeaderPicker`] chooses the destination replica for one tablet's
//! requests. It trusts the cached leader until the RPC layer reports a
//! rejection, learns from "not leader" rejections through a picker-local
//! follower set, preemptively installs its next guess as the leader in the
//! cache, and falls back to a fresh master lookup once every replica has
//! been ruled out.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use strata_core::{Result, ServerUuid, Status};
use tokio::time::Instant;
use tracing::debug;

use crate::cache::{LookupType, MetaCache, TableHandle};
use crate::server::RemoteTabletServer;
use crate::tablet::RemoteTablet;

/// Picks a leader replica for one tablet's outgoing requests.
///
/// The `followers` set is picker-scoped, not tablet-scoped: the belief
/// "this server rejected me as a follower" is only meaningful until the
/// next fresh consensus-config fetch, so the set is cleared after every
/// completed lookup.
pub struct LeaderPicker {
    cache: Arc<MetaCache>,
    tablet: Arc<RemoteTablet>,
    /// When set, exhaustion re-looks-up by key; otherwise by tablet id.
    table: Option<TableHandle>,
    /// Servers that rejected a recent request for not being the leader.
    followers: Mutex<HashSet<ServerUuid>>,
}

impl LeaderPicker {
    /// Creates a picker for a tablet resolved from a key-based lookup.
    #[must_use]
    pub fn new(cache: Arc<MetaCache>, tablet: Arc<RemoteTablet>, table: TableHandle) -> Self {
        Self {
            cache,
            tablet,
            table: Some(table),
            followers: Mutex::new(HashSet::new()),
        }
    }

    /// Creates a picker for a tablet resolved by id.
    #[must_use]
    pub fn new_by_id(cache: Arc<MetaCache>, tablet: Arc<RemoteTablet>) -> Self {
        Self {
            cache,
            tablet,
            table: None,
            followers: Mutex::new(HashSet::new()),
        }
    }

    /// Returns the tablet this picker selects replicas for.
    #[must_use]
    pub const fn tablet(&self) -> &Arc<RemoteTablet> {
        &self.tablet
    }

    /// Picks the replica the next request should go to, with its proxy
    /// initialized.
    ///
    /// Selection algorithm:
    /// 1. If the tablet's metadata is stale, refresh it (step 5).
    /// 2. Take the cached leader, unless it has failed or previously
    ///    rejected us as a follower; a rejected leader is demoted in the
    ///    cache so it stays ruled out until a full metadata refresh.
    /// 3. Otherwise guess: take the first non-failed replica not in the
    ///    follower set.
    /// 4. Preemptively mark the guess as leader in the cache, so selection
    ///    is sticky across picks.
    /// 5. Out of candidates: force a master lookup, clear the follower set
    ///    when it completes, and restart.
    ///
    /// # Errors
    ///
    /// Surfaces lookup errors, proxy initialization errors, and `TimedOut`
    /// past the deadline.
    pub async fn pick_leader(&self, deadline: Instant) -> Result<Arc<RemoteTabletServer>> {
        loop {
            if Instant::now() >= deadline {
                return Err(Status::timed_out(format!(
                    "deadline exceeded picking a leader replica for tablet {}",
                    self.tablet.tablet_id()
                )));
            }

            let mut leader = None;
            if !self.tablet.is_stale() {
                leader = self.tablet.leader_server();
                if let Some(server) = &leader {
                    let marked_as_follower =
                        self.followers.lock().unwrap().contains(server.uuid());
                    if marked_as_follower {
                        debug!(
                            tablet = %self.tablet.tablet_id(),
                            tserver = %server,
                            "cached leader previously rejected us as a follower, demoting"
                        );
                        // Demote it in the cache so the next go-round does
                        // not re-select it, and so the key-based fast path
                        // stops treating the tablet as having a live leader.
                        self.tablet.mark_server_as_follower(server);
                        leader = None;
                    }
                }
                if leader.is_none() {
                    // Guess the next leader: first non-failed replica that
                    // has not rejected us. The follower set is re-read
                    // under its lock for every candidate, so a server added
                    // concurrently is still excluded.
                    let replicas = self.tablet.servers();
                    let followers = self.followers.lock().unwrap();
                    leader = replicas
                        .into_iter()
                        .find(|server| !followers.contains(server.uuid()));
                    drop(followers);
                    if let Some(server) = &leader {
                        debug!(
                            tablet = %self.tablet.tablet_id(),
                            tserver = %server,
                            "preemptively marking replica as leader"
                        );
                        self.tablet.mark_server_as_leader(server);
                    }
                }
            }

            let Some(server) = leader else {
                // Every replica has been ruled out: only a fresh consensus
                // config from the master can help. The lookup result itself
                // is irrelevant; the slow path refreshes the looked-up
                // tablet in place.
                let result = match &self.table {
                    Some(table) => {
                        self.cache
                            .lookup_tablet_by_key(
                                table,
                                self.tablet.partition().key_start().clone(),
                                deadline,
                                LookupType::Point,
                            )
                            .await
                    }
                    None => {
                        self.cache
                            .lookup_tablet_by_id(self.tablet.tablet_id(), deadline)
                            .await
                    }
                };
                // Whenever a lookup completes, the follower beliefs are
                // obsolete.
                self.followers.lock().unwrap().clear();
                result?;
                continue;
            };

            self.cache.init_server_proxy(&server).await?;
            return Ok(server);
        }
    }

    /// Reports that a request to `server` failed at the transport level.
    pub fn mark_server_failed(&self, server: &Arc<RemoteTabletServer>, status: &Status) {
        self.tablet.mark_replica_failed(server, status);
    }

    /// Reports that `server` rejected a request for not being the leader.
    pub fn mark_replica_not_leader(&self, server: &Arc<RemoteTabletServer>) {
        self.followers.lock().unwrap().insert(server.uuid().clone());
    }

    /// Reports that `server` does not host the tablet at all; the cached
    /// metadata is stale and the next pick refreshes from the master.
    pub fn mark_resource_not_found(&self, _server: &Arc<RemoteTabletServer>) {
        self.tablet.mark_stale();
    }
}

impl std::fmt::Debug for LeaderPicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderPicker")
            .field("tablet", self.tablet.tablet_id())
            .field("followers", &self.followers.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}
