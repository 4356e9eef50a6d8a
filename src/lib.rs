//! Closed-timestamp tracking and propagation.
//!
//! Each node periodically closes a timestamp: a promise that no further
//! write at or below it will be accepted. Closed timestamps, together with
//! the lease-applied indexes of the writes in flight when they were closed,
//! propagate to peer nodes so replicas can serve consistent historical
//! reads without a lease.
//!
//! The subsystem is composed from six roles wired by
//! [`container::Container`]:
//!
//! * [`tracker::ShardedTracker`] admits in-flight writes and computes how
//!   far the floor can move.
//! * [`storage::MemStorage`] retains a bounded log of entries per node.
//! * [`provider::CloseLoopProvider`] drives the close cycle, fans entries
//!   out to subscribers, and answers [`roles::Provider::max_closed`].
//! * [`server::EntryServer`] checks inbound peers against the access
//!   policy.
//! * [`clients::ClientPool`] maintains outbound sessions with reconnect
//!   backoff.
//! * [`transport::HttpEntryDialer`] carries entries between nodes.
//!
//! [`container::Container::noop`] builds the same surface in an inert
//! configuration for deployments with closed timestamps disabled.

pub mod clients;
pub mod clock;
pub mod config;
pub mod container;
pub mod logging;
pub mod provider;
pub mod roles;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod tracker;
pub mod transport;
pub mod types;

pub use clients::{ClientPool, ReconnectBackoff};
pub use clock::{Clock, ClockError, ManualClock, SystemClock};
pub use config::{Config, ConfigError};
pub use container::{Container, NoopEverything};
pub use logging::{LogLevel, LogRotationPolicy, SubsystemLog};
pub use provider::{CloseLoopProvider, ShutdownSignal, Subscription};
pub use roles::{Clients, Dialer, EntryVisitor, Provider, Server, Storage, Tracker};
pub use server::{AccessError, EntryServer, ServerAccess};
pub use storage::MemStorage;
pub use telemetry::{SubsystemTelemetry, TelemetrySnapshot};
pub use tracker::{CloseRefused, ShardedTracker};
pub use transport::{
    DialError, EntryStream, HttpEntryDialer, TransportError, WireEntry, WireEntryBatch,
    WireSubscribeRequest,
};
pub use types::{
    CloseSummary, Entry, Epoch, Lai, NodeId, RangeId, Timestamp, TrackedWrite,
};
