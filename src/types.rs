use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a node in the cluster.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identity of a data range.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct RangeId(pub u64);

impl fmt::Display for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Lease generation counter. Bumped whenever the node's liveness lease is
/// lost and re-acquired; guards against stale closed-timestamp state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Epoch(pub u64);

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Lease-applied index: per-range sequence number of the last write command
/// applied under the current lease.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Lai(pub u64);

impl Lai {
    /// Tombstone value inside an incremental entry: the range's
    /// outstanding-write requirement is cleared. Real requirements are
    /// always at least 1.
    pub const CLEARED: Lai = Lai(0);

    /// Whether this value is the incremental-entry tombstone.
    pub fn is_cleared(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Lai {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lai{}", self.0)
    }
}

/// Hybrid timestamp: wall-clock nanoseconds plus a logical tick for
/// intra-nanosecond ordering. `Timestamp::ZERO` doubles as the invalid
/// sentinel returned when no timestamp can be relied upon.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp {
    pub wall_ns: u64,
    pub logical: u32,
}

impl Timestamp {
    /// The invalid/unclosed sentinel.
    pub const ZERO: Timestamp = Timestamp {
        wall_ns: 0,
        logical: 0,
    };

    /// Creates a timestamp from wall nanoseconds with no logical component.
    pub fn from_ns(wall_ns: u64) -> Self {
        Self {
            wall_ns,
            logical: 0,
        }
    }

    /// Whether this is the invalid sentinel.
    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    /// The largest timestamp strictly below `self`. Used to cap a closed
    /// timestamp below an outstanding write's provisional timestamp.
    pub fn prev(self) -> Self {
        if self.logical > 0 {
            Self {
                wall_ns: self.wall_ns,
                logical: self.logical - 1,
            }
        } else {
            Self {
                wall_ns: self.wall_ns.saturating_sub(1),
                logical: u32::MAX,
            }
        }
    }

    /// Steps back by a wall-clock duration, dropping the logical component.
    /// Used to derive the close target from the staleness bound.
    pub fn sub_ns(self, ns: u64) -> Self {
        Self {
            wall_ns: self.wall_ns.saturating_sub(ns),
            logical: 0,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:010}", self.wall_ns, self.logical)
    }
}

/// Immutable closed-timestamp announcement produced by one node's provider.
///
/// For a fixed `(node, epoch)` the `closed` timestamps of successive entries
/// are non-decreasing. `lai_by_range` carries the per-range LAI requirement a
/// follower must have applied before relying on `closed` for that range; in
/// an incremental entry [`Lai::CLEARED`] removes a prior requirement, and in
/// a full entry absence means clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub epoch: Epoch,
    pub closed: Timestamp,
    pub lai_by_range: BTreeMap<RangeId, Lai>,
    pub full: bool,
}

impl Entry {
    /// Creates a full entry carrying a complete requirement snapshot.
    pub fn full(epoch: Epoch, closed: Timestamp, lai_by_range: BTreeMap<RangeId, Lai>) -> Self {
        Self {
            epoch,
            closed,
            lai_by_range,
            full: true,
        }
    }

    /// Creates an incremental entry carrying a delta against the previous
    /// entry for the same epoch.
    pub fn incremental(
        epoch: Epoch,
        closed: Timestamp,
        lai_by_range: BTreeMap<RangeId, Lai>,
    ) -> Self {
        Self {
            epoch,
            closed,
            lai_by_range,
            full: false,
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ranges={}",
            self.epoch,
            self.closed,
            if self.full { "full" } else { "incr" },
            self.lai_by_range.len()
        )
    }
}

/// Open reservation for an in-flight write. Returned by `track`; must be
/// handed back through `release` (after the write commits) or `abandon`
/// (when the write is cancelled) exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedWrite {
    /// Provisional commit timestamp of the write. The closed timestamp
    /// cannot advance to or past this value while the reservation is open.
    pub timestamp: Timestamp,
    pub(crate) token: u64,
}

impl TrackedWrite {
    pub(crate) fn new(timestamp: Timestamp, token: u64) -> Self {
        Self { timestamp, token }
    }
}

/// Result of a successful close: the timestamp that is now closed and the
/// LAI requirements for ranges still holding an outstanding write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseSummary {
    pub closed: Timestamp,
    pub lai_by_range: BTreeMap<RangeId, Lai>,
}
