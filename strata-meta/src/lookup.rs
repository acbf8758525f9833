//! Slow-path lookup drivers.
//!
//! A lookup fuses the fast-path cache consultation with a master RPC:
//! every retry re-checks the cache first, since a concurrent lookup may
//! already have installed the answer. Master calls are admission-controlled
//! by the cache's permit semaphore; a lookup acquires at most one permit,
//! holds it across its retries, and releases it exactly once when it
//! terminates.
//!
//! Retry classification: a master leadership change or a transport failure
//! triggers leader re-resolution (first with the credentials in hand, then
//! accepting any); `ServiceUnavailable` backs off linearly; every other
//! error is terminal. All retrying is bounded by the lookup's deadline.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use strata_core::{PartitionKey, Result, Status, TabletId};
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

use crate::cache::{FastPathResult, LookupType, MetaCache, ReplicaVisibility, TableHandle};
use crate::proto::{GetTableLocationsRequest, GetTabletLocationsRequest, ReplicaTypeFilter};
use crate::proxy::CredentialsPolicy;
use crate::tablet::RemoteTablet;
use crate::throttle::LogThrottle;

/// Tablets fetched per range (lower-bound) lookup; prefetching neighbours
/// amortises future lookups during scans.
pub const FETCH_TABLETS_PER_RANGE_LOOKUP: u32 = 10;

/// Tablets fetched per point lookup.
pub const FETCH_TABLETS_PER_POINT_LOOKUP: u32 = 1;

/// Throttles terminal lookup-failure warnings across all lookups.
static LOOKUP_ERROR_THROTTLE: LogThrottle = LogThrottle::new(Duration::from_secs(1));

/// Shared retry bookkeeping for the lookup drivers.
struct RetryState {
    deadline: Instant,
    attempt: u32,
    /// Whether a leader re-resolution with primary credentials has already
    /// been tried; the next one accepts any credentials.
    reconnected_primary: bool,
}

impl RetryState {
    const fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            attempt: 0,
            reconnected_primary: false,
        }
    }

    /// Linear per-attempt backoff, capped.
    fn backoff(&self, cache: &MetaCache) -> Duration {
        let config = cache.config();
        config
            .lookup_retry_backoff
            .saturating_mul(self.attempt.max(1))
            .min(config.lookup_retry_backoff_max)
    }

    /// Sleeps for `delay`, never past the deadline.
    async fn sleep_bounded(&self, delay: Duration) {
        let wake = Instant::now() + delay;
        tokio::time::sleep_until(wake.min(self.deadline)).await;
    }

    /// Handles a master RPC error: `Ok(())` means the caller should retry,
    /// `Err` is terminal.
    async fn handle_rpc_error(&mut self, cache: &MetaCache, status: Status) -> Result<()> {
        if status.is_not_leader() || status.is_network_error() {
            // The master leadership may have moved; chase it first with the
            // credentials in hand, then accepting any.
            let policy = if self.reconnected_primary {
                CredentialsPolicy::AnyCredentials
            } else {
                CredentialsPolicy::PrimaryCredentials
            };
            self.reconnected_primary = true;
            debug!(status = %status, policy = ?policy, "re-resolving leader master");
            match timeout_at(self.deadline, cache.master().reconnect_to_leader(policy)).await {
                Err(_) => {
                    return Err(Status::timed_out(
                        "deadline exceeded re-resolving the leader master",
                    ))
                }
                Ok(Ok(())) => return Ok(()),
                Ok(Err(reconnect_status)) => {
                    debug!(status = %reconnect_status, "leader master re-resolution failed");
                    self.sleep_bounded(self.backoff(cache)).await;
                    return Ok(());
                }
            }
        }
        if status.is_service_unavailable() {
            self.sleep_bounded(self.backoff(cache)).await;
            return Ok(());
        }
        Err(status)
    }
}

/// A `(table, partition_key)` → tablet lookup, possibly in flight to the
/// master.
pub(crate) struct KeyLookup<'a> {
    cache: &'a MetaCache,
    table: TableHandle,
    partition_key: PartitionKey,
    lookup_type: LookupType,
    retry: RetryState,
    permit: Option<OwnedSemaphorePermit>,
}

impl fmt::Display for KeyLookup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LookupByKey {{ table: '{}', partition-key: ({}), attempt: {} }}",
            self.table,
            self.partition_key.debug_lower_bound(),
            self.retry.attempt
        )
    }
}

impl<'a> KeyLookup<'a> {
    pub(crate) fn new(
        cache: &'a MetaCache,
        table: TableHandle,
        partition_key: PartitionKey,
        lookup_type: LookupType,
        deadline: Instant,
    ) -> Self {
        Self {
            cache,
            table,
            partition_key,
            lookup_type,
            retry: RetryState::new(deadline),
            permit: None,
        }
    }

    const fn locations_to_fetch(&self) -> u32 {
        match self.lookup_type {
            LookupType::LowerBound => FETCH_TABLETS_PER_RANGE_LOOKUP,
            LookupType::Point => FETCH_TABLETS_PER_POINT_LOOKUP,
        }
    }

    /// Drives the lookup to completion. The permit, if one was acquired, is
    /// released when the driver is dropped on return.
    pub(crate) async fn run(mut self) -> Result<Arc<RemoteTablet>> {
        loop {
            // A concurrent lookup may have installed the answer while this
            // one was waiting; every retry re-checks the cache first.
            match self.cache.fast_path_lookup_by_key(
                &self.table,
                &mut self.partition_key,
                self.lookup_type,
            ) {
                FastPathResult::Hit(tablet) => return Ok(tablet),
                FastPathResult::NotFound(status) => return Err(status),
                FastPathResult::Incomplete => {}
            }

            if self.permit.is_none() {
                match self.cache.try_acquire_master_lookup_permit() {
                    Some(permit) => self.permit = Some(permit),
                    None => {
                        let status = Status::timed_out(
                            "client has too many outstanding requests to the master",
                        );
                        if Instant::now() >= self.retry.deadline {
                            return Err(self.terminal(status));
                        }
                        trace!(lookup = %self, "master lookup permit denied, delaying retry");
                        let delay = self.cache.config().permit_retry_delay;
                        self.retry.sleep_bounded(delay).await;
                        continue;
                    }
                }
            }

            if Instant::now() >= self.retry.deadline {
                return Err(self.terminal(Status::timed_out(
                    "deadline exceeded before tablet locations could be refreshed",
                )));
            }

            self.retry.attempt += 1;
            debug!(lookup = %self, "no usable cache entry, refreshing tablet locations from the master");
            let req = GetTableLocationsRequest {
                table_id: self.table.id().clone(),
                partition_key_start: self.partition_key.clone(),
                max_returned_locations: self.locations_to_fetch(),
                intern_ts_infos: true,
                replica_type_filter: match self.cache.replica_visibility() {
                    ReplicaVisibility::All => Some(ReplicaTypeFilter::AnyReplica),
                    ReplicaVisibility::Voters => None,
                },
            };
            let resp = match timeout_at(
                self.retry.deadline,
                self.cache.master().get_table_locations(req),
            )
            .await
            {
                Err(_) => {
                    return Err(self.terminal(Status::timed_out(
                        "deadline exceeded waiting for the master",
                    )))
                }
                Ok(Ok(resp)) => resp,
                Ok(Err(status)) => {
                    match self.retry.handle_rpc_error(self.cache, status).await {
                        Ok(()) => continue,
                        Err(terminal) => return Err(self.terminal(terminal)),
                    }
                }
            };

            let entry = self.cache.process_table_locations(
                &self.table,
                &self.partition_key,
                self.lookup_type == LookupType::Point,
                &resp,
                self.locations_to_fetch(),
            )?;
            if entry.is_non_covered() {
                return Err(Status::not_found(format!(
                    "no tablet covering the requested range partition: {entry}"
                )));
            }
            let tablet = entry.tablet().expect("covered entry carries a tablet");
            return Ok(Arc::clone(tablet));
        }
    }

    /// Prepends the lookup description to a terminal status and logs it,
    /// throttled.
    fn terminal(&self, status: Status) -> Status {
        let status = status.prepend(format!("{self} failed"));
        if LOOKUP_ERROR_THROTTLE.should_log() {
            warn!(status = %status, "lookup failed");
        }
        status
    }
}

/// A tablet-id → tablet lookup, possibly in flight to the master.
///
/// Identical to [`KeyLookup`] minus the permit and the response parsing:
/// by-id lookups are rare (scan-token rehydration, follower reads) and are
/// not admission-controlled.
pub(crate) struct IdLookup<'a> {
    cache: &'a MetaCache,
    tablet_id: TabletId,
    retry: RetryState,
}

impl fmt::Display for IdLookup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LookupById {{ tablet: '{}', attempt: {} }}",
            self.tablet_id, self.retry.attempt
        )
    }
}

impl<'a> IdLookup<'a> {
    pub(crate) fn new(cache: &'a MetaCache, tablet_id: TabletId, deadline: Instant) -> Self {
        Self {
            cache,
            tablet_id,
            retry: RetryState::new(deadline),
        }
    }

    /// Drives the lookup to completion.
    pub(crate) async fn run(mut self) -> Result<Arc<RemoteTablet>> {
        loop {
            match self.cache.fast_path_lookup_by_id(&self.tablet_id) {
                FastPathResult::Hit(tablet) => return Ok(tablet),
                FastPathResult::NotFound(status) => return Err(status),
                FastPathResult::Incomplete => {}
            }

            if Instant::now() >= self.retry.deadline {
                return Err(self.terminal(Status::timed_out(
                    "deadline exceeded before tablet locations could be refreshed",
                )));
            }

            self.retry.attempt += 1;
            debug!(lookup = %self, "no usable cache entry, refreshing tablet locations from the master");
            let req = GetTabletLocationsRequest {
                tablet_ids: vec![self.tablet_id.clone()],
                intern_ts_infos: true,
            };
            let resp = match timeout_at(
                self.retry.deadline,
                self.cache.master().get_tablet_locations(req),
            )
            .await
            {
                Err(_) => {
                    return Err(self.terminal(Status::timed_out(
                        "deadline exceeded waiting for the master",
                    )))
                }
                Ok(Ok(resp)) => resp,
                Ok(Err(status)) => {
                    match self.retry.handle_rpc_error(self.cache, status).await {
                        Ok(()) => continue,
                        Err(terminal) => return Err(self.terminal(terminal)),
                    }
                }
            };

            let entry = match self.cache.process_tablet_locations(&self.tablet_id, &resp) {
                Ok(entry) => entry,
                Err(status) => return Err(self.terminal(status)),
            };
            let tablet = entry.tablet().expect("by-id entries are always covered");
            return Ok(Arc::clone(tablet));
        }
    }

    fn terminal(&self, status: Status) -> Status {
        let status = status.prepend(format!("{self} failed"));
        if LOOKUP_ERROR_THROTTLE.should_log() {
            warn!(status = %status, "lookup failed");
        }
        status
    }
}
