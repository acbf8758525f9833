//! Meta cache configuration.
//!
//! Process-wide tunables for the client metadata cache. Defaults match the
//! production deployments; tests shrink the delays with
//! [`MetaCacheConfig::fast_for_testing`].

use std::time::Duration;

/// Default TTL for tablet locations cached by tablet id (60 minutes).
pub const TABLET_LOCATIONS_BY_ID_TTL_DEFAULT: Duration = Duration::from_secs(60 * 60);

/// Default number of concurrent in-flight master lookups permitted
/// process-wide.
pub const MASTER_LOOKUP_PERMITS_DEFAULT: usize = 50;

/// Default base delay for the linear lookup retry backoff.
pub const LOOKUP_RETRY_BACKOFF_DEFAULT: Duration = Duration::from_millis(10);

/// Default cap on the lookup retry backoff.
pub const LOOKUP_RETRY_BACKOFF_MAX_DEFAULT: Duration = Duration::from_secs(1);

/// Default delay before re-trying to acquire a denied master-lookup permit.
pub const PERMIT_RETRY_DELAY_DEFAULT: Duration = Duration::from_millis(20);

/// Configuration for the client metadata cache.
#[derive(Debug, Clone)]
pub struct MetaCacheConfig {
    /// Whether to connect to tablet servers over UNIX domain sockets. Only
    /// attempted when the server advertises a socket path and its first
    /// advertised host is local.
    pub use_unix_domain_sockets: bool,

    /// TTL for tablet locations cached by tablet id. Key-based entries use
    /// the TTL carried in each master response instead.
    pub tablet_locations_by_id_ttl: Duration,

    /// Number of concurrent in-flight master lookups permitted across all
    /// tables.
    pub master_lookup_permits: usize,

    /// Base delay of the linear per-attempt lookup retry backoff.
    pub lookup_retry_backoff: Duration,

    /// Cap on the lookup retry backoff.
    pub lookup_retry_backoff_max: Duration,

    /// Delay before re-trying to acquire a denied master-lookup permit.
    pub permit_retry_delay: Duration,

    /// Hostnames considered local for the UNIX-domain-socket fast path.
    pub local_hostnames: Vec<String>,
}

impl MetaCacheConfig {
    /// Creates a configuration with production defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            use_unix_domain_sockets: false,
            tablet_locations_by_id_ttl: TABLET_LOCATIONS_BY_ID_TTL_DEFAULT,
            master_lookup_permits: MASTER_LOOKUP_PERMITS_DEFAULT,
            lookup_retry_backoff: LOOKUP_RETRY_BACKOFF_DEFAULT,
            lookup_retry_backoff_max: LOOKUP_RETRY_BACKOFF_MAX_DEFAULT,
            permit_retry_delay: PERMIT_RETRY_DELAY_DEFAULT,
            local_hostnames: vec!["localhost".to_string(), "127.0.0.1".to_string()],
        }
    }

    /// Enables or disables UNIX domain sockets for local tablet servers.
    #[must_use]
    pub fn with_unix_domain_sockets(mut self, enabled: bool) -> Self {
        self.use_unix_domain_sockets = enabled;
        self
    }

    /// Sets the TTL for tablet locations cached by tablet id.
    #[must_use]
    pub fn with_tablet_locations_by_id_ttl(mut self, ttl: Duration) -> Self {
        self.tablet_locations_by_id_ttl = ttl;
        self
    }

    /// Sets the master-lookup permit count.
    #[must_use]
    pub fn with_master_lookup_permits(mut self, permits: usize) -> Self {
        self.master_lookup_permits = permits;
        self
    }

    /// Sets the hostnames considered local for the UDS fast path.
    #[must_use]
    pub fn with_local_hostnames(mut self, hostnames: Vec<String>) -> Self {
        self.local_hostnames = hostnames;
        self
    }

    /// Creates a configuration suitable for testing (short delays).
    #[must_use]
    pub fn fast_for_testing() -> Self {
        Self {
            lookup_retry_backoff: Duration::from_millis(1),
            lookup_retry_backoff_max: Duration::from_millis(20),
            permit_retry_delay: Duration::from_millis(1),
            ..Self::new()
        }
    }

    /// Returns true if the given hostname is considered local.
    #[must_use]
    pub fn is_local_host(&self, host: &str) -> bool {
        self.local_hostnames.iter().any(|h| h == host)
    }
}

impl Default for MetaCacheConfig {
    fn default() -> Self {
        Self::new()
    }
}
