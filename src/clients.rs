use crate::logging::SubsystemLog;
use crate::provider::ShutdownSignal;
use crate::roles::{Clients, Dialer, Storage};
use crate::telemetry::SubsystemTelemetry;
use crate::transport::DialError;
use crate::types::NodeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Exponential reconnect schedule: `base * 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Delay before the next dial after `attempt` consecutive failures.
    /// Zero failures means the regular poll delay, which is the base.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.min(16);
        let scaled = self
            .base
            .checked_mul(1u32 << shift)
            .unwrap_or(Duration::MAX);
        scaled.min(self.max)
    }
}

struct SlotHandle {
    ready: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

struct PoolInner {
    dialer: Arc<dyn Dialer>,
    storage: Arc<dyn Storage>,
    telemetry: Arc<SubsystemTelemetry>,
    log: SubsystemLog,
    backoff: ReconnectBackoff,
    full_resync_failures: u32,
    shutdown: Arc<ShutdownSignal>,
}

/// Pool of outbound sessions, one receive thread per peer.
///
/// Each thread dials with backoff, drains the peer's entry stream into
/// storage, and redials when the session breaks. Connectivity failures stay
/// inside the pool; writers and the close cycle never see them.
pub struct ClientPool {
    inner: Arc<PoolInner>,
    slots: Mutex<HashMap<NodeId, SlotHandle>>,
}

impl ClientPool {
    pub fn new(
        dialer: Arc<dyn Dialer>,
        storage: Arc<dyn Storage>,
        backoff: ReconnectBackoff,
        full_resync_failures: u32,
        telemetry: Arc<SubsystemTelemetry>,
        log: SubsystemLog,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                dialer,
                storage,
                telemetry,
                log,
                backoff,
                full_resync_failures: full_resync_failures.max(1),
                shutdown: ShutdownSignal::new(),
            }),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Stops every receive thread and joins it. Called on container stop.
    pub fn shutdown(&self) {
        self.inner.shutdown.signal();
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.values_mut() {
            if let Some(handle) = slot.join.take() {
                let _ = handle.join();
            }
        }
    }

    fn run_session(inner: Arc<PoolInner>, node: NodeId, ready: Arc<AtomicBool>) {
        let mut attempts: u32 = 0;
        let mut resynced = false;
        loop {
            if inner.shutdown.is_stopped() {
                break;
            }
            match inner.dialer.dial(node) {
                Ok(mut stream) => {
                    ready.store(true, Ordering::SeqCst);
                    if attempts > 0 {
                        inner
                            .log
                            .info("clients", &format!("session to {node} restored"));
                    }
                    attempts = 0;
                    resynced = false;
                    loop {
                        if inner.shutdown.is_stopped() {
                            return;
                        }
                        match stream.recv() {
                            Ok(batch) => {
                                for entry in batch {
                                    inner.storage.add(node, entry);
                                    inner.telemetry.record_entry_received();
                                }
                            }
                            Err(err) => {
                                ready.store(false, Ordering::SeqCst);
                                inner.telemetry.record_reconnect();
                                inner.log.warn("clients", &err.to_string());
                                break;
                            }
                        }
                    }
                }
                Err(DialError::Disabled) => {
                    // Inert dialer; there will never be a session.
                    ready.store(false, Ordering::SeqCst);
                    return;
                }
                Err(err) => {
                    ready.store(false, Ordering::SeqCst);
                    attempts = attempts.saturating_add(1);
                    inner
                        .log
                        .debug("clients", &format!("dial attempt {attempts}: {err}"));
                    if attempts >= inner.full_resync_failures && !resynced {
                        // The peer has been gone long enough that our view
                        // of the cluster may be arbitrarily stale.
                        inner.telemetry.record_full_resync();
                        inner.log.warn(
                            "clients",
                            &format!("prolonged disconnect from {node}; clearing history"),
                        );
                        inner.storage.clear();
                        resynced = true;
                    }
                }
            }
            if inner.shutdown.wait_timeout(inner.backoff.delay(attempts)) {
                break;
            }
        }
    }
}

impl Clients for ClientPool {
    fn ensure_client(&self, node: NodeId) {
        let mut slots = self.slots.lock().unwrap();
        if slots.contains_key(&node) {
            return;
        }
        let ready = Arc::new(AtomicBool::new(false));
        let inner = self.inner.clone();
        let thread_ready = ready.clone();
        let join = thread::Builder::new()
            .name(format!("closedts_client_{node}"))
            .spawn(move || Self::run_session(inner, node, thread_ready))
            .expect("failed to spawn client session");
        slots.insert(
            node,
            SlotHandle {
                ready,
                join: Some(join),
            },
        );
    }

    fn ready(&self, node: NodeId) -> bool {
        let slots = self.slots.lock().unwrap();
        slots
            .get(&node)
            .map(|slot| slot.ready.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

impl Drop for ClientPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
