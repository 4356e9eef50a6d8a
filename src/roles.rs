//! Role contracts composed by the [`crate::container::Container`].
//!
//! Each role is a separate capability so the inert configuration can stand
//! in one object for all of them while production wiring composes distinct
//! types.

use crate::clock::ClockError;
use crate::provider::Subscription;
use crate::server::AccessError;
use crate::tracker::CloseRefused;
use crate::transport::{DialError, EntryStream};
use crate::types::{CloseSummary, Entry, Epoch, Lai, NodeId, RangeId, Timestamp, TrackedWrite};

/// Visitor callback for storage iteration. Returning `true` stops the walk.
pub type EntryVisitor<'a> = &'a mut dyn FnMut(&Entry) -> bool;

/// Per-node admission control over in-flight writes.
pub trait Tracker: Send + Sync {
    /// Registers an in-flight write against `range` and returns its
    /// provisional timestamp. A clock failure is fatal to this call and
    /// registers nothing.
    fn track(&self, range: RangeId) -> Result<TrackedWrite, ClockError>;

    /// Releases a reservation once the write has durably committed,
    /// recording the LAI it was assigned.
    fn release(&self, write: TrackedWrite, epoch: Epoch, range: RangeId, lai: Lai);

    /// Implicit release for a write that was cancelled before committing.
    fn abandon(&self, write: TrackedWrite, range: RangeId);

    /// Attempts to advance the closed-timestamp floor to `next`. Refused on
    /// an epoch mismatch or when advancing would regress the floor;
    /// otherwise the floor moved as far as outstanding writes allow.
    fn close(&self, next: Timestamp, expected_epoch: Epoch)
        -> Result<CloseSummary, CloseRefused>;
}

/// Append-only log of closed-timestamp entries, indexed by originating node.
pub trait Storage: Send + Sync {
    fn add(&self, node: NodeId, entry: Entry);
    fn visit_ascending(&self, node: NodeId, visitor: EntryVisitor<'_>);
    fn visit_descending(&self, node: NodeId, visitor: EntryVisitor<'_>);
    /// Drops all nodes' history. Used for full-resync recovery.
    fn clear(&self);
}

/// Owner of the close cycle, the fan-out set, and the MaxClosed query.
pub trait Provider: Send + Sync {
    /// Starts the periodic close-and-publish driver.
    fn start(&self);
    /// Stops the driver and joins it.
    fn stop(&self);

    /// Highest closed timestamp for `(node, range)` that the caller's
    /// applied `lai` satisfies. [`Timestamp::ZERO`] means no follower read
    /// may be served: the epoch is stale or nothing usable is closed.
    fn max_closed(&self, node: NodeId, range: RangeId, epoch: Epoch, lai: Lai) -> Timestamp;

    /// Signals consumer interest in closed timestamps for `(node, range)`,
    /// ensuring an outbound session exists for a remote node.
    fn request(&self, node: NodeId, range: RangeId);

    /// Attaches `peer` to the fan-out set. The first entry delivered on the
    /// returned subscription is always full.
    fn subscribe(&self, peer: NodeId) -> Subscription;
}

/// Inbound endpoint handlers. Transport framing is mounted elsewhere.
pub trait Server: Send + Sync {
    fn subscribe(&self, peer: NodeId, token: Option<&str>) -> Result<Subscription, AccessError>;
    fn request(
        &self,
        peer: NodeId,
        token: Option<&str>,
        node: NodeId,
        range: RangeId,
    ) -> Result<(), AccessError>;
}

/// Pool of outbound sessions keyed by node identity.
pub trait Clients: Send + Sync {
    /// Lazily establishes a session to `node` (with reconnect-and-backoff).
    fn ensure_client(&self, node: NodeId);
    /// Non-blocking liveness probe. Consulted by the request path and by
    /// range-read logic deciding whether a remote node's entries can be
    /// expected soon; fan-out never blocks on it since subscription queues
    /// are bounded.
    fn ready(&self, node: NodeId) -> bool;
}

/// Establishes one outbound session to a remote node.
pub trait Dialer: Send + Sync {
    fn dial(&self, node: NodeId) -> Result<Box<dyn EntryStream>, DialError>;
}
