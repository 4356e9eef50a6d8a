use crate::clock::{Clock, ClockError};
use crate::config::Config;
use crate::logging::SubsystemLog;
use crate::roles::{Clients, Provider, Storage, Tracker};
use crate::telemetry::SubsystemTelemetry;
use crate::tracker::CloseRefused;
use crate::types::{Entry, Epoch, Lai, NodeId, RangeId, Timestamp};
use crossbeam_queue::ArrayQueue;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// Cooperative stop signal shared by background threads. Waiters sleep on a
/// condvar so a stop request interrupts a backoff or interval wait
/// immediately.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn signal(&self) {
        let mut stopped = self.stopped.lock().unwrap();
        *stopped = true;
        self.cv.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock().unwrap()
    }

    /// Sleeps up to `timeout`; returns true when stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock().unwrap();
        loop {
            if *stopped {
                return true;
            }
            let (guard, wait) = self.cv.wait_timeout(stopped, timeout).unwrap();
            stopped = guard;
            if wait.timed_out() {
                return *stopped;
            }
        }
    }
}

#[derive(Debug)]
struct SubscriptionInner {
    peer: NodeId,
    queue: ArrayQueue<Entry>,
    cancelled: AtomicBool,
    needs_full: AtomicBool,
}

/// One subscriber's view of the local entry feed.
///
/// Backed by a bounded queue so a slow consumer can never stall the close
/// cycle: on overflow the queued entries are superseded by the latest full
/// entry, which carries everything the dropped increments did.
#[derive(Clone, Debug)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    pub(crate) fn new(peer: NodeId, depth: usize) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                peer,
                queue: ArrayQueue::new(depth.max(1)),
                cancelled: AtomicBool::new(false),
                needs_full: AtomicBool::new(true),
            }),
        }
    }

    /// A subscription that was dead on arrival; the inert configuration
    /// hands these out.
    pub fn cancelled(peer: NodeId) -> Self {
        let sub = Self::new(peer, 1);
        sub.cancel();
        sub
    }

    pub fn peer(&self) -> NodeId {
        self.inner.peer
    }

    /// Next undelivered entry, if any. Non-blocking.
    pub fn next(&self) -> Option<Entry> {
        self.inner.queue.pop()
    }

    /// Retires the subscription from the fan-out set.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Delivers one cycle's entry. Returns false when the subscription is
    /// cancelled and should be dropped from the fan-out set.
    fn offer(&self, incremental: &Entry, full: &Entry, telemetry: &SubsystemTelemetry) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let wants_full = self.inner.needs_full.swap(false, Ordering::SeqCst);
        let deliver = if wants_full {
            full.clone()
        } else {
            incremental.clone()
        };
        if self.inner.queue.push(deliver).is_ok() {
            return true;
        }
        // Queue overflow: the consumer is behind. Drop the backlog and hand
        // it the latest full entry instead; the increments it missed are
        // subsumed.
        let mut dropped = 0u64;
        while self.inner.queue.pop().is_some() {
            dropped += 1;
        }
        telemetry.record_entries_superseded(dropped);
        if self.inner.queue.push(full.clone()).is_err() {
            self.inner.needs_full.store(true, Ordering::SeqCst);
        }
        true
    }
}

struct PublishState {
    epoch: Epoch,
    blocked: BTreeMap<RangeId, Lai>,
    cycles_since_full: u32,
    force_full: bool,
    published_any: bool,
}

struct ProviderInner {
    config: Config,
    clock: Arc<dyn Clock>,
    tracker: Arc<dyn Tracker>,
    storage: Arc<dyn Storage>,
    clients: Arc<dyn Clients>,
    telemetry: Arc<SubsystemTelemetry>,
    log: SubsystemLog,
    subscribers: Mutex<Vec<Subscription>>,
    interest: Mutex<BTreeSet<RangeId>>,
    publish: Mutex<PublishState>,
    shutdown: Arc<ShutdownSignal>,
}

/// Production provider: runs the periodic close-and-publish cycle, owns the
/// fan-out set, and answers MaxClosed queries from range-read logic.
pub struct CloseLoopProvider {
    inner: Arc<ProviderInner>,
    driver: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CloseLoopProvider {
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        tracker: Arc<dyn Tracker>,
        storage: Arc<dyn Storage>,
        clients: Arc<dyn Clients>,
        telemetry: Arc<SubsystemTelemetry>,
        log: SubsystemLog,
    ) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                config,
                clock,
                tracker,
                storage,
                clients,
                telemetry,
                log,
                subscribers: Mutex::new(Vec::new()),
                interest: Mutex::new(BTreeSet::new()),
                publish: Mutex::new(PublishState {
                    epoch: Epoch(0),
                    blocked: BTreeMap::new(),
                    cycles_since_full: 0,
                    force_full: false,
                    published_any: false,
                }),
                shutdown: ShutdownSignal::new(),
            }),
            driver: Mutex::new(None),
        }
    }

    /// Runs one close-and-publish cycle. The background driver calls this on
    /// the configured interval; tests call it directly for determinism.
    pub fn publish_cycle(&self) -> Result<Option<Entry>, ClockError> {
        Self::cycle(&self.inner)
    }

    /// Active (non-cancelled) subscriber count.
    pub fn subscriber_count(&self) -> usize {
        let subs = self.inner.subscribers.lock().unwrap();
        subs.iter().filter(|sub| !sub.is_cancelled()).count()
    }

    fn cycle(inner: &ProviderInner) -> Result<Option<Entry>, ClockError> {
        let (now, epoch) = match inner.clock.now() {
            Ok(reading) => reading,
            Err(err) => {
                inner.telemetry.record_clock_error();
                inner
                    .log
                    .warn("provider", &format!("close cycle skipped: {err}"));
                return Err(err);
            }
        };
        let target = now.sub_ns(inner.config.target_staleness_ns());

        let summary = match inner.tracker.close(target, epoch) {
            Ok(summary) => summary,
            Err(refused) => {
                if refused == CloseRefused::StaleEpoch {
                    // Prior entries are void under the newer lease; resync
                    // subscribers on the next successful cycle.
                    inner.telemetry.record_stale_epoch();
                    inner.publish.lock().unwrap().force_full = true;
                }
                inner
                    .log
                    .warn("provider", &format!("close skipped at {epoch}: {refused}"));
                return Ok(None);
            }
        };

        let (entry, full_variant) = {
            let mut publish = inner.publish.lock().unwrap();
            let epoch_changed = publish.epoch != epoch;
            let full_due = publish.force_full
                || epoch_changed
                || !publish.published_any
                || publish.cycles_since_full + 1 >= inner.config.full_refresh_every;

            let blocked = summary.lai_by_range;
            let full_map = Self::trimmed_full_map(inner, &blocked);
            let full_variant = Entry::full(epoch, summary.closed, full_map.clone());

            let entry = if full_due {
                full_variant.clone()
            } else {
                let mut delta: BTreeMap<RangeId, Lai> = BTreeMap::new();
                for (range, lai) in &blocked {
                    if publish.blocked.get(range) != Some(lai) {
                        delta.insert(*range, *lai);
                    }
                }
                for range in publish.blocked.keys() {
                    if !blocked.contains_key(range) {
                        delta.insert(*range, Lai::CLEARED);
                    }
                }
                Entry::incremental(epoch, summary.closed, delta)
            };

            publish.epoch = epoch;
            publish.blocked = blocked;
            publish.cycles_since_full = if full_due {
                0
            } else {
                publish.cycles_since_full + 1
            };
            publish.force_full = false;
            publish.published_any = true;
            (entry, full_variant)
        };

        inner.storage.add(inner.config.node, entry.clone());
        inner.telemetry.record_entry_published();

        let mut subs = inner.subscribers.lock().unwrap();
        subs.retain(|sub| sub.offer(&entry, &full_variant, &inner.telemetry));
        Ok(Some(entry))
    }

    fn trimmed_full_map(
        inner: &ProviderInner,
        blocked: &BTreeMap<RangeId, Lai>,
    ) -> BTreeMap<RangeId, Lai> {
        if inner.config.publish_all_ranges {
            return blocked.clone();
        }
        let interest = inner.interest.lock().unwrap();
        blocked
            .iter()
            .filter(|(range, _)| interest.contains(range))
            .map(|(range, lai)| (*range, *lai))
            .collect()
    }
}

impl Provider for CloseLoopProvider {
    fn start(&self) {
        let mut driver = self.driver.lock().unwrap();
        if driver.is_some() {
            return;
        }
        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name("closedts_close_cycle".into())
            .spawn(move || {
                let interval = inner.config.close_interval();
                loop {
                    if inner.shutdown.wait_timeout(interval) {
                        break;
                    }
                    // Errors are already counted and logged; the driver
                    // keeps ticking so a recovering clock resumes closing.
                    let _ = Self::cycle(&inner);
                }
            })
            .expect("failed to spawn close cycle driver");
        *driver = Some(handle);
        self.inner.log.info("provider", "close cycle started");
    }

    fn stop(&self) {
        self.inner.shutdown.signal();
        if let Some(handle) = self.driver.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn max_closed(&self, node: NodeId, range: RangeId, epoch: Epoch, lai: Lai) -> Timestamp {
        let mut result = Timestamp::ZERO;
        let mut candidate = Timestamp::ZERO;
        let mut latest_checked = false;
        self.inner.storage.visit_descending(node, &mut |entry| {
            if !latest_checked {
                latest_checked = true;
                if entry.epoch != epoch {
                    // Caller's epoch is not the node's latest; nothing it
                    // knows can be trusted.
                    return true;
                }
            } else if entry.epoch != epoch {
                return true;
            }
            if candidate.is_zero() {
                candidate = entry.closed;
            }
            match entry.lai_by_range.get(&range) {
                Some(required) if required.is_cleared() || *required <= lai => {
                    result = candidate;
                    true
                }
                Some(_) => {
                    // Requirement unmet back to this entry; older entries
                    // may still qualify at their own timestamps.
                    candidate = Timestamp::ZERO;
                    false
                }
                None if entry.full => {
                    result = candidate;
                    true
                }
                None => false,
            }
        });
        result
    }

    fn request(&self, node: NodeId, range: RangeId) {
        self.inner.interest.lock().unwrap().insert(range);
        if node != self.inner.config.node {
            self.inner.clients.ensure_client(node);
            if !self.inner.clients.ready(node) {
                // Interest is registered either way; entries arrive once
                // the session comes up.
                self.inner
                    .log
                    .debug("provider", &format!("session to {node} not ready yet"));
            }
        }
    }

    fn subscribe(&self, peer: NodeId) -> Subscription {
        let sub = Subscription::new(peer, self.inner.config.subscription_queue_depth);
        self.inner.subscribers.lock().unwrap().push(sub.clone());
        self.inner
            .log
            .info("provider", &format!("subscription attached for {peer}"));
        sub
    }
}

impl Drop for CloseLoopProvider {
    fn drop(&mut self) {
        self.stop();
    }
}
