//! Remote tablet servers and the interning registry.
//!
//! A [`RemoteTabletServer`] carries the client's view of one tablet
//! server: its advertised addresses, placement location, optional UNIX
//! domain socket path, and lazily-initialized RPC proxies. Servers are
//! interned by UUID in a [`TabletServerRegistry`] and retained for the
//! process lifetime, so replica lists can hold non-owning shared handles
//! that never dangle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use strata_core::{Result, ServerUuid, Status};
use tracing::{debug, warn};

use crate::config::MetaCacheConfig;
use crate::proto::{HostPort, TsInfo};
use crate::proxy::{
    DnsResolver, ResolvedAddr, TabletServerAdminProxy, TabletServerProxy,
};
use crate::throttle::LogThrottle;

/// Minimum interval between warnings about an invalid advertised UNIX
/// domain socket path.
const UDS_WARN_PERIOD: Duration = Duration::from_secs(60);

/// Mutable per-server state, guarded by the server's lock.
#[derive(Debug, Default)]
struct ServerState {
    /// Advertised RPC addresses, preferred first.
    rpc_hostports: Vec<HostPort>,
    /// Opaque placement location assigned by the master.
    location: String,
    /// Advertised UNIX domain socket path, if any.
    unix_domain_socket_path: Option<String>,
    /// Data-path proxy, built on first use.
    proxy: Option<Arc<TabletServerProxy>>,
    /// Admin proxy, built together with the data-path proxy.
    admin_proxy: Option<Arc<TabletServerAdminProxy>>,
}

/// The client's view of one tablet server.
///
/// The lock is held only around field mutation and proxy publication,
/// never across DNS or RPC.
#[derive(Debug)]
pub struct RemoteTabletServer {
    uuid: ServerUuid,
    state: Mutex<ServerState>,
    uds_warn_throttle: LogThrottle,
}

impl RemoteTabletServer {
    /// Creates a server from master-reported info.
    #[must_use]
    pub fn new(info: &TsInfo) -> Self {
        let server = Self {
            uuid: info.permanent_uuid.clone(),
            state: Mutex::new(ServerState::default()),
            uds_warn_throttle: LogThrottle::new(UDS_WARN_PERIOD),
        };
        server.update(info);
        server
    }

    /// Returns the server's permanent UUID.
    #[must_use]
    pub const fn uuid(&self) -> &ServerUuid {
        &self.uuid
    }

    /// Updates the mutable fields from a fresh master report.
    ///
    /// # Panics
    ///
    /// Panics if the report carries a different UUID.
    pub fn update(&self, info: &TsInfo) {
        assert_eq!(
            info.permanent_uuid, self.uuid,
            "tablet server info UUID mismatch"
        );
        let mut state = self.state.lock().unwrap();
        state.rpc_hostports = info.rpc_addresses.clone();
        state.location = info.location.clone();
        state.unix_domain_socket_path = info.unix_domain_socket_path.clone();
    }

    /// Returns the placement location.
    #[must_use]
    pub fn location(&self) -> String {
        self.state.lock().unwrap().location.clone()
    }

    /// Returns the advertised RPC addresses, preferred first.
    #[must_use]
    pub fn host_ports(&self) -> Vec<HostPort> {
        self.state.lock().unwrap().rpc_hostports.clone()
    }

    /// Returns the data-path proxy if one has been initialized.
    #[must_use]
    pub fn proxy(&self) -> Option<Arc<TabletServerProxy>> {
        self.state.lock().unwrap().proxy.clone()
    }

    /// Returns the admin proxy if one has been initialized.
    #[must_use]
    pub fn admin_proxy(&self) -> Option<Arc<TabletServerAdminProxy>> {
        self.state.lock().unwrap().admin_proxy.clone()
    }

    /// Ensures the RPC proxies exist, resolving the server's address if
    /// needed, and returns the data-path proxy.
    ///
    /// When UNIX domain sockets are enabled, the server advertises a socket
    /// path, and its first advertised host is local, the socket address is
    /// used directly and DNS is skipped. An invalid advertised path logs a
    /// throttled warning and falls back to TCP.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError` if resolution fails or yields no addresses,
    /// with the server UUID prepended.
    ///
    /// # Panics
    ///
    /// Panics if the server has no advertised addresses.
    pub async fn init_proxy(
        &self,
        resolver: &dyn DnsResolver,
        config: &MetaCacheConfig,
    ) -> Result<Arc<TabletServerProxy>> {
        let (hp, uds_path) = {
            let state = self.state.lock().unwrap();
            if let Some(proxy) = &state.proxy {
                return Ok(Arc::clone(proxy));
            }
            assert!(
                !state.rpc_hostports.is_empty(),
                "tablet server {} has no advertised addresses",
                self.uuid
            );
            // TODO: if the server advertises multiple host/ports, pick one
            // based on locality instead of always using the first.
            (
                state.rpc_hostports[0].clone(),
                state.unix_domain_socket_path.clone(),
            )
        };

        if config.use_unix_domain_sockets && config.is_local_host(&hp.host) {
            if let Some(path) = uds_path {
                if is_valid_uds_path(&path) {
                    debug!(
                        tserver = %self.uuid,
                        path = %path,
                        "connecting to local tablet server over UNIX socket"
                    );
                    return Ok(self.install_proxies(ResolvedAddr::Unix(PathBuf::from(path)), &hp.host));
                }
                if self.uds_warn_throttle.should_log() {
                    warn!(
                        tserver = %self.uuid,
                        addr = %hp,
                        path = %path,
                        "tablet server reported an invalid UNIX domain socket path"
                    );
                }
                // Fall through to the normal TCP path.
            }
        }

        let addrs = resolver.resolve(&hp).await.map_err(|status| {
            status.prepend(format!("failed to resolve address for tablet server {}", self.uuid))
        })?;
        let Some(addr) = addrs.first() else {
            return Err(Status::network_error(format!("no addresses for {hp}"))
                .prepend(format!("failed to resolve address for tablet server {}", self.uuid)));
        };

        debug!(tserver = %self.uuid, addr = %addr, host = %hp.host, "resolved tablet server address");
        Ok(self.install_proxies(ResolvedAddr::Tcp(*addr), &hp.host))
    }

    /// Publishes the proxy pair under the server lock.
    fn install_proxies(&self, addr: ResolvedAddr, hostname: &str) -> Arc<TabletServerProxy> {
        let proxy = Arc::new(TabletServerProxy::new(addr.clone(), hostname));
        let admin_proxy = Arc::new(TabletServerAdminProxy::new(addr, hostname));

        let mut state = self.state.lock().unwrap();
        state.proxy = Some(Arc::clone(&proxy));
        state.admin_proxy = Some(admin_proxy);
        proxy
    }
}

impl std::fmt::Display for RemoteTabletServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uuid)?;
        let state = self.state.lock().unwrap();
        if let Some(hp) = state.rpc_hostports.first() {
            write!(f, " ({hp})")?;
        }
        Ok(())
    }
}

/// Interns [`RemoteTabletServer`]s by UUID.
///
/// The registry is the single owner of every server the client has ever
/// seen; entries are updated in place and never removed, so handles held
/// by replica lists and callers remain valid for the process lifetime.
#[derive(Debug, Default)]
pub struct TabletServerRegistry {
    servers: Mutex<HashMap<ServerUuid, Arc<RemoteTabletServer>>>,
}

impl TabletServerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the registered server in place, or interns a new one.
    pub fn upsert(&self, info: &TsInfo) -> Arc<RemoteTabletServer> {
        let mut servers = self.servers.lock().unwrap();
        if let Some(server) = servers.get(&info.permanent_uuid) {
            server.update(info);
            return Arc::clone(server);
        }
        debug!(tserver = %info.permanent_uuid, "caching new tablet server");
        let server = Arc::new(RemoteTabletServer::new(info));
        servers.insert(info.permanent_uuid.clone(), Arc::clone(&server));
        server
    }

    /// Returns the registered server for the given UUID, if any.
    #[must_use]
    pub fn get(&self, uuid: &ServerUuid) -> Option<Arc<RemoteTabletServer>> {
        self.servers.lock().unwrap().get(uuid).cloned()
    }

    /// Returns the number of registered servers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.lock().unwrap().len()
    }

    /// Returns true if no servers have been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.lock().unwrap().is_empty()
    }
}

/// Returns true for an absolute path or an abstract-namespace path
/// (leading `@`).
fn is_valid_uds_path(path: &str) -> bool {
    path.starts_with('/') || path.starts_with('@')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts_info(uuid: &str, host: &str) -> TsInfo {
        TsInfo::new(uuid, vec![HostPort::new(host, 7050)])
    }

    #[test]
    fn test_registry_interns_by_uuid() {
        let registry = TabletServerRegistry::new();

        let a = registry.upsert(&ts_info("ts-1", "host-a"));
        let b = registry.upsert(&ts_info("ts-1", "host-b"));

        // Same object, updated in place.
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert_eq!(a.host_ports()[0].host, "host-b");
    }

    #[test]
    fn test_registry_never_removes() {
        let registry = TabletServerRegistry::new();
        registry.upsert(&ts_info("ts-1", "host-a"));
        registry.upsert(&ts_info("ts-2", "host-b"));

        assert_eq!(registry.len(), 2);
        assert!(registry.get(&ServerUuid::new("ts-1")).is_some());
        assert!(registry.get(&ServerUuid::new("ts-3")).is_none());
    }

    #[test]
    fn test_update_replaces_addresses() {
        let server = RemoteTabletServer::new(&ts_info("ts-1", "old-host"));

        let mut info = ts_info("ts-1", "new-host");
        info.location = "/rack0".to_string();
        info.unix_domain_socket_path = Some("/run/ts.sock".to_string());
        server.update(&info);

        assert_eq!(server.host_ports(), vec![HostPort::new("new-host", 7050)]);
        assert_eq!(server.location(), "/rack0");
    }

    #[test]
    #[should_panic(expected = "UUID mismatch")]
    fn test_update_uuid_mismatch_panics() {
        let server = RemoteTabletServer::new(&ts_info("ts-1", "host"));
        server.update(&ts_info("ts-2", "host"));
    }

    #[test]
    fn test_uds_path_validity() {
        assert!(is_valid_uds_path("/run/strata/ts.sock"));
        assert!(is_valid_uds_path("@strata-ts"));
        assert!(!is_valid_uds_path("relative/path.sock"));
        assert!(!is_valid_uds_path(""));
    }

    #[test]
    fn test_display_includes_first_address() {
        let server = RemoteTabletServer::new(&ts_info("ts-1", "host-a"));
        assert_eq!(format!("{server}"), "ts-1 (host-a:7050)");
    }
}
