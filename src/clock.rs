use crate::types::{Epoch, Timestamp};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Error surfaced when the local clock cannot produce a timestamp. Fatal to
/// the current track/close attempt, never to the process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClockError {
    /// The subsystem is wired to the inert configuration.
    #[error("closed timestamps disabled")]
    Disabled,
    /// The liveness record backing the epoch is not usable right now.
    #[error("clock unavailable: {0}")]
    Unavailable(String),
}

/// Source of the local node's hybrid timestamp and liveness epoch.
///
/// The broader system supplies this from its HLC and liveness service; the
/// subsystem only consumes it. A failed reading must degrade to "no
/// timestamp ever closes", never to an incorrect guarantee.
pub trait Clock: Send + Sync {
    fn now(&self) -> Result<(Timestamp, Epoch), ClockError>;
}

/// Wall-clock implementation pinned to a fixed epoch. Suitable for
/// single-process deployments and examples; clustered deployments inject an
/// adapter over their liveness service instead.
#[derive(Debug)]
pub struct SystemClock {
    epoch: Epoch,
    last: Mutex<Timestamp>,
}

impl SystemClock {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            last: Mutex::new(Timestamp::ZERO),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Result<(Timestamp, Epoch), ClockError> {
        let wall_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| ClockError::Unavailable(err.to_string()))?
            .as_nanos()
            .min(u64::MAX as u128) as u64;
        let mut last = self
            .last
            .lock()
            .map_err(|_| ClockError::Unavailable("clock state poisoned".into()))?;
        // Ticks the logical component when the wall clock stands still.
        let now = if wall_ns > last.wall_ns {
            Timestamp::from_ns(wall_ns)
        } else {
            Timestamp {
                wall_ns: last.wall_ns,
                logical: last.logical.saturating_add(1),
            }
        };
        *last = now;
        Ok((now, self.epoch))
    }
}

/// Hand-driven clock used by tests and deterministic harnesses.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    now: Timestamp,
    epoch: Epoch,
    error: Option<ClockError>,
}

impl ManualClock {
    pub fn new(now: Timestamp, epoch: Epoch) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now,
                epoch,
                error: None,
            }),
        }
    }

    /// Moves the reading forward; readings never regress.
    pub fn advance_to(&self, now: Timestamp) {
        let mut state = self.state.lock().unwrap();
        if now > state.now {
            state.now = now;
        }
    }

    /// Simulates a lease loss and re-acquisition.
    pub fn bump_epoch(&self) {
        let mut state = self.state.lock().unwrap();
        state.epoch = Epoch(state.epoch.0 + 1);
    }

    pub fn set_epoch(&self, epoch: Epoch) {
        self.state.lock().unwrap().epoch = epoch;
    }

    /// Forces subsequent readings to fail until cleared.
    pub fn fail_with(&self, error: Option<ClockError>) {
        self.state.lock().unwrap().error = error;
    }

    pub fn epoch(&self) -> Epoch {
        self.state.lock().unwrap().epoch
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Result<(Timestamp, Epoch), ClockError> {
        let state = self.state.lock().unwrap();
        if let Some(error) = &state.error {
            return Err(error.clone());
        }
        Ok((state.now, state.epoch))
    }
}
