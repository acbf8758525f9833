//! Seams to the external collaborators: the master RPC surface and DNS.
//!
//! This module defines traits for the operations the cache consumes but
//! does not implement, allowing different implementations for production
//! (real RPC transport, system resolver) and tests (mock master, canned
//! addresses).
//!
//! # Implementation Notes
//!
//! Implementations must be `Send + Sync` for use across async tasks. An
//! error embedded in an otherwise-successful master response must be
//! surfaced as `Err(Status)` by the implementation, so the lookup retry
//! classification has a single input.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use strata_core::Result;

use crate::proto::{
    GetTableLocationsRequest, GetTableLocationsResponse, GetTabletLocationsRequest,
    GetTabletLocationsResponse, HostPort,
};

/// Credentials to use when re-resolving the leader master.
///
/// A leadership change is first chased with the credentials already in
/// hand; if the new leader rejects them, the connection is re-established
/// accepting any credentials the cluster offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsPolicy {
    /// Reuse the primary credentials of the current connection.
    PrimaryCredentials,
    /// Accept any credentials, re-negotiating if necessary.
    AnyCredentials,
}

/// The master RPC surface consumed by the cache.
#[async_trait]
pub trait MasterService: Send + Sync + 'static {
    /// Fetches tablet locations for a table from a start key onward.
    ///
    /// # Errors
    ///
    /// Returns the status reported by the master, including statuses
    /// embedded in the response body (`ServiceUnavailable`, `NotLeader`),
    /// or a transport-level status.
    async fn get_table_locations(
        &self,
        req: GetTableLocationsRequest,
    ) -> Result<GetTableLocationsResponse>;

    /// Fetches tablet locations by tablet id.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::get_table_locations`].
    async fn get_tablet_locations(
        &self,
        req: GetTabletLocationsRequest,
    ) -> Result<GetTabletLocationsResponse>;

    /// Re-resolves the leader master after a leadership change.
    ///
    /// # Errors
    ///
    /// Returns a status if no leader could be determined.
    async fn reconnect_to_leader(&self, policy: CredentialsPolicy) -> Result<()>;
}

/// Asynchronous DNS resolution.
#[async_trait]
pub trait DnsResolver: Send + Sync + 'static {
    /// Resolves a host/port pair to socket addresses, preferred first.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError` if resolution fails.
    async fn resolve(&self, host_port: &HostPort) -> Result<Vec<SocketAddr>>;
}

/// A resolved tablet server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAddr {
    /// A TCP socket address.
    Tcp(SocketAddr),
    /// A UNIX domain socket path (absolute, or abstract with a leading `@`).
    Unix(PathBuf),
}

impl fmt::Display for ResolvedAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// A handle to a tablet server's data-path RPC endpoint.
///
/// Construction of the underlying RPC channel is owned by the transport
/// layer; the cache only resolves the address once and hands the shared
/// handle to callers.
#[derive(Debug, Clone)]
pub struct TabletServerProxy {
    addr: ResolvedAddr,
    hostname: String,
}

impl TabletServerProxy {
    /// Creates a proxy handle for the given resolved address.
    #[must_use]
    pub fn new(addr: ResolvedAddr, hostname: impl Into<String>) -> Self {
        Self { addr, hostname: hostname.into() }
    }

    /// Returns the resolved address.
    #[must_use]
    pub const fn addr(&self) -> &ResolvedAddr {
        &self.addr
    }

    /// Returns the hostname the address was resolved from, for TLS
    /// verification by the transport layer.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

/// A handle to a tablet server's admin RPC endpoint.
#[derive(Debug, Clone)]
pub struct TabletServerAdminProxy {
    addr: ResolvedAddr,
    hostname: String,
}

impl TabletServerAdminProxy {
    /// Creates an admin proxy handle for the given resolved address.
    #[must_use]
    pub fn new(addr: ResolvedAddr, hostname: impl Into<String>) -> Self {
        Self { addr, hostname: hostname.into() }
    }

    /// Returns the resolved address.
    #[must_use]
    pub const fn addr(&self) -> &ResolvedAddr {
        &self.addr
    }

    /// Returns the hostname the address was resolved from.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}
