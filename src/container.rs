//! Composition root. Wires the tracker, storage, provider, server, and
//! client pool into one object, or hands out an inert stand-in when the
//! subsystem is disabled.

use crate::clients::{ClientPool, ReconnectBackoff};
use crate::clock::{Clock, ClockError, SystemClock};
use crate::config::{Config, ConfigError};
use crate::logging::SubsystemLog;
use crate::provider::{CloseLoopProvider, Subscription};
use crate::roles::{Clients, Dialer, Provider, Server, Storage, Tracker};
use crate::server::{AccessError, EntryServer, ServerAccess};
use crate::storage::MemStorage;
use crate::telemetry::SubsystemTelemetry;
use crate::tracker::{CloseRefused, ShardedTracker};
use crate::transport::{DialError, EntryStream, HttpEntryDialer};
use crate::types::{
    CloseSummary, Entry, Epoch, Lai, NodeId, RangeId, Timestamp, TrackedWrite,
};
use std::sync::Arc;

/// All roles of the subsystem behind one handle.
pub struct Container {
    pub config: Config,
    pub tracker: Arc<dyn Tracker>,
    pub storage: Arc<dyn Storage>,
    pub provider: Arc<dyn Provider>,
    pub server: Arc<dyn Server>,
    pub clients: Arc<dyn Clients>,
    pub telemetry: Arc<SubsystemTelemetry>,
    pub log: SubsystemLog,
    noop: bool,
    pool: Option<Arc<ClientPool>>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("config", &self.config)
            .field("noop", &self.noop)
            .finish_non_exhaustive()
    }
}

impl Container {
    /// Production wiring against the system clock and the HTTP dialer.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let clock = Arc::new(SystemClock::new(Epoch(1)));
        let dialer = Arc::new(HttpEntryDialer::new(
            config.node,
            config.peers.clone(),
            config.shared_secret.clone(),
        ));
        Self::with_parts(config, clock, dialer)
    }

    /// Wiring with injected clock and dialer. Tests drive deterministic
    /// clocks and scripted dialers through this.
    pub fn with_parts(
        config: Config,
        clock: Arc<dyn Clock>,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let telemetry = SubsystemTelemetry::shared();
        let log = SubsystemLog::new(config.node);

        let tracker: Arc<dyn Tracker> = Arc::new(ShardedTracker::new(
            clock.clone(),
            config.shard_count,
            telemetry.clone(),
            log.clone(),
        ));
        let storage: Arc<dyn Storage> = Arc::new(MemStorage::new(
            config.entries_per_node,
            telemetry.clone(),
        ));
        let pool = Arc::new(ClientPool::new(
            dialer,
            storage.clone(),
            ReconnectBackoff::new(config.backoff_base(), config.backoff_max()),
            config.full_resync_failures,
            telemetry.clone(),
            log.clone(),
        ));
        let clients: Arc<dyn Clients> = pool.clone();
        let provider: Arc<dyn Provider> = Arc::new(CloseLoopProvider::new(
            config.clone(),
            clock,
            tracker.clone(),
            storage.clone(),
            clients.clone(),
            telemetry.clone(),
            log.clone(),
        ));
        let access = ServerAccess::new(
            config.peers.keys().copied().collect(),
            config.shared_secret.as_deref(),
        );
        let server: Arc<dyn Server> =
            Arc::new(EntryServer::new(provider.clone(), access, log.clone()));

        Ok(Self {
            config,
            tracker,
            storage,
            provider,
            server,
            clients,
            telemetry,
            log,
            noop: false,
            pool: Some(pool),
        })
    }

    /// Inert wiring: every role is present but refuses its operation. Range
    /// logic holds the same handles either way and never branches on
    /// whether closed timestamps are enabled.
    pub fn noop() -> Self {
        let inert = Arc::new(NoopEverything);
        Self {
            config: Config::default(),
            tracker: inert.clone(),
            storage: inert.clone(),
            provider: inert.clone(),
            server: inert.clone(),
            clients: inert,
            telemetry: SubsystemTelemetry::shared(),
            log: SubsystemLog::new(NodeId(0)),
            noop: true,
            pool: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.noop
    }

    /// Starts the close cycle. A no-op for the inert configuration.
    pub fn start(&self) {
        self.provider.start();
    }

    /// Stops the close cycle and the client pool, joining their threads.
    pub fn stop(&self) {
        self.provider.stop();
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One object implementing every role as a refusal. Stands in for the
/// whole subsystem when it is disabled.
pub struct NoopEverything;

impl Tracker for NoopEverything {
    fn track(&self, _range: RangeId) -> Result<TrackedWrite, ClockError> {
        Err(ClockError::Disabled)
    }

    fn release(&self, _write: TrackedWrite, _epoch: Epoch, _range: RangeId, _lai: Lai) {}

    fn abandon(&self, _write: TrackedWrite, _range: RangeId) {}

    fn close(
        &self,
        _next: Timestamp,
        _expected_epoch: Epoch,
    ) -> Result<CloseSummary, CloseRefused> {
        Err(CloseRefused::Disabled)
    }
}

impl Storage for NoopEverything {
    fn add(&self, _node: NodeId, _entry: Entry) {}

    fn visit_ascending(&self, _node: NodeId, _visitor: crate::roles::EntryVisitor<'_>) {}

    fn visit_descending(&self, _node: NodeId, _visitor: crate::roles::EntryVisitor<'_>) {}

    fn clear(&self) {}
}

impl Provider for NoopEverything {
    fn start(&self) {}

    fn stop(&self) {}

    fn max_closed(&self, _node: NodeId, _range: RangeId, _epoch: Epoch, _lai: Lai) -> Timestamp {
        Timestamp::ZERO
    }

    fn request(&self, _node: NodeId, _range: RangeId) {}

    fn subscribe(&self, peer: NodeId) -> Subscription {
        Subscription::cancelled(peer)
    }
}

impl Server for NoopEverything {
    fn subscribe(&self, _peer: NodeId, _token: Option<&str>) -> Result<Subscription, AccessError> {
        Err(AccessError::Disabled)
    }

    fn request(
        &self,
        _peer: NodeId,
        _token: Option<&str>,
        _node: NodeId,
        _range: RangeId,
    ) -> Result<(), AccessError> {
        Err(AccessError::Disabled)
    }
}

impl Clients for NoopEverything {
    fn ensure_client(&self, _node: NodeId) {}

    fn ready(&self, _node: NodeId) -> bool {
        false
    }
}

impl Dialer for NoopEverything {
    fn dial(&self, _node: NodeId) -> Result<Box<dyn EntryStream>, DialError> {
        Err(DialError::Disabled)
    }
}
