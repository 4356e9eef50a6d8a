use crate::clock::{Clock, ClockError};
use crate::logging::SubsystemLog;
use crate::roles::Tracker;
use crate::telemetry::SubsystemTelemetry;
use crate::types::{CloseSummary, Epoch, Lai, RangeId, Timestamp, TrackedWrite};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Why a close attempt made no progress. Only a stale epoch invalidates
/// previously published state; a regressed target leaves it intact.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CloseRefused {
    #[error("close attempted under a superseded epoch")]
    StaleEpoch,
    #[error("close target below the published floor")]
    TargetRegressed,
    #[error("closed timestamps disabled")]
    Disabled,
}

/// In-flight write registry gating how far a timestamp may be closed.
///
/// Reservations live in an array of shards keyed by range so concurrent
/// writers contend only per shard. The close snapshot visits each shard
/// briefly; writers never wait for the whole cycle.
///
/// Admission protocol: `close` first raises the floor hint to its target,
/// then scans the shards. A writer clamps its provisional timestamp above
/// the hint while holding its shard lock, so every write is either seen by
/// the scan or timestamped above the target — the closed timestamp can
/// never step over an unseen write.
pub struct ShardedTracker {
    clock: Arc<dyn Clock>,
    telemetry: Arc<SubsystemTelemetry>,
    log: SubsystemLog,
    next_token: AtomicU64,
    shards: Vec<Shard>,
    state: Mutex<CloseState>,
}

#[derive(Default)]
struct Shard {
    writes: Mutex<HashMap<u64, PendingWrite>>,
}

struct PendingWrite {
    range: RangeId,
    timestamp: Timestamp,
}

struct CloseState {
    epoch: Epoch,
    closed: Timestamp,
    /// Raised before a close scan; writers admit above this.
    floor_hint: Timestamp,
    /// Highest LAI released per range under the current epoch. Feeds the
    /// requirement (`last + 1`) reported for ranges with an open write.
    last_released: BTreeMap<RangeId, Lai>,
}

impl ShardedTracker {
    pub fn new(
        clock: Arc<dyn Clock>,
        shard_count: usize,
        telemetry: Arc<SubsystemTelemetry>,
        log: SubsystemLog,
    ) -> Self {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        shards.resize_with(shard_count, Shard::default);
        Self {
            clock,
            telemetry,
            log,
            next_token: AtomicU64::new(1),
            shards,
            state: Mutex::new(CloseState {
                epoch: Epoch(0),
                closed: Timestamp::ZERO,
                floor_hint: Timestamp::ZERO,
                last_released: BTreeMap::new(),
            }),
        }
    }

    fn shard_for(&self, range: RangeId) -> &Shard {
        let mut hasher = DefaultHasher::new();
        range.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Number of currently open reservations. Diagnostic only.
    pub fn outstanding(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.writes.lock().unwrap().len())
            .sum()
    }

    fn unknown_release(&self, what: &str, range: RangeId) {
        self.telemetry.record_double_release();
        self.log.error(
            "tracker",
            &format!("{what} for unknown reservation on {range}"),
        );
    }
}

impl Tracker for ShardedTracker {
    fn track(&self, range: RangeId) -> Result<TrackedWrite, ClockError> {
        let (now, _epoch) = self.clock.now()?;
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let shard = self.shard_for(range);
        let mut writes = shard.writes.lock().unwrap();
        // Clamp above any close in progress; see the admission protocol in
        // the type docs. The state lock is held only for the read.
        let timestamp = {
            let state = self.state.lock().unwrap();
            let floor = state.floor_hint.max(state.closed);
            if now > floor {
                now
            } else {
                Timestamp {
                    wall_ns: floor.wall_ns,
                    logical: floor.logical.saturating_add(1),
                }
            }
        };
        writes.insert(token, PendingWrite { range, timestamp });
        Ok(TrackedWrite::new(timestamp, token))
    }

    fn release(&self, write: TrackedWrite, epoch: Epoch, range: RangeId, lai: Lai) {
        let shard = self.shard_for(range);
        let removed = shard.writes.lock().unwrap().remove(&write.token);
        if removed.is_none() {
            self.unknown_release("release", range);
            return;
        }
        let mut state = self.state.lock().unwrap();
        if epoch < state.epoch {
            // The lease this write ran under is gone; its LAI no longer
            // constrains anything.
            return;
        }
        if epoch > state.epoch {
            state.epoch = epoch;
            state.last_released.clear();
        }
        let slot = state.last_released.entry(range).or_insert(Lai(0));
        if lai > *slot {
            *slot = lai;
        }
    }

    fn abandon(&self, write: TrackedWrite, range: RangeId) {
        let shard = self.shard_for(range);
        let removed = shard.writes.lock().unwrap().remove(&write.token);
        if removed.is_none() {
            self.unknown_release("abandon", range);
            return;
        }
        self.telemetry.record_abandoned_write();
    }

    fn close(&self, next: Timestamp, expected_epoch: Epoch) -> Result<CloseSummary, CloseRefused> {
        {
            let mut state = self.state.lock().unwrap();
            if expected_epoch < state.epoch {
                self.telemetry.record_close_failure();
                return Err(CloseRefused::StaleEpoch);
            }
            if expected_epoch > state.epoch {
                state.epoch = expected_epoch;
                state.last_released.clear();
            }
            if next < state.closed {
                // Advancing backwards would regress the published floor.
                self.telemetry.record_close_failure();
                return Err(CloseRefused::TargetRegressed);
            }
            if next > state.floor_hint {
                state.floor_hint = next;
            }
        }

        // Snapshot outstanding writes shard by shard. Writers admitted
        // after a shard was visited clamp above the floor hint instead.
        let mut min_outstanding: Option<Timestamp> = None;
        let mut blocked: BTreeSet<RangeId> = BTreeSet::new();
        for shard in &self.shards {
            let writes = shard.writes.lock().unwrap();
            for write in writes.values() {
                blocked.insert(write.range);
                min_outstanding = Some(match min_outstanding {
                    Some(current) => current.min(write.timestamp),
                    None => write.timestamp,
                });
            }
        }

        let mut state = self.state.lock().unwrap();
        if state.epoch != expected_epoch {
            // A newer lease raced the scan.
            self.telemetry.record_close_failure();
            return Err(CloseRefused::StaleEpoch);
        }
        let mut closed = next;
        if let Some(min) = min_outstanding {
            closed = closed.min(min.prev());
        }
        closed = closed.max(state.closed);
        state.closed = closed;

        let lai_by_range: BTreeMap<RangeId, Lai> = blocked
            .into_iter()
            .map(|range| {
                let last = state.last_released.get(&range).copied().unwrap_or(Lai(0));
                (range, Lai(last.0 + 1))
            })
            .collect();

        self.telemetry.record_close();
        Ok(CloseSummary {
            closed,
            lai_by_range,
        })
    }
}
