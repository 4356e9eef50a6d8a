use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Atomic counters exported by the subsystem. Background propagation errors
/// are observable only here and in the log; they never reach writers.
#[derive(Debug, Default)]
pub struct SubsystemTelemetry {
    closes: AtomicU64,
    close_failures: AtomicU64,
    stale_epochs: AtomicU64,
    clock_errors: AtomicU64,
    entries_published: AtomicU64,
    entries_received: AtomicU64,
    entries_superseded: AtomicU64,
    entries_rejected: AtomicU64,
    reconnects: AtomicU64,
    full_resyncs: AtomicU64,
    double_releases: AtomicU64,
    abandoned_writes: AtomicU64,
}

impl SubsystemTelemetry {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_close(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close_failure(&self) {
        self.close_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_epoch(&self) {
        self.stale_epochs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clock_error(&self) {
        self.clock_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entry_published(&self) {
        self.entries_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entry_received(&self) {
        self.entries_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entries_superseded(&self, count: u64) {
        self.entries_superseded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_entry_rejected(&self) {
        self.entries_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_full_resync(&self) {
        self.full_resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_double_release(&self) {
        self.double_releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned_write(&self) {
        self.abandoned_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            closes_total: self.closes.load(Ordering::Relaxed),
            close_failures_total: self.close_failures.load(Ordering::Relaxed),
            stale_epochs_total: self.stale_epochs.load(Ordering::Relaxed),
            clock_errors_total: self.clock_errors.load(Ordering::Relaxed),
            entries_published_total: self.entries_published.load(Ordering::Relaxed),
            entries_received_total: self.entries_received.load(Ordering::Relaxed),
            entries_superseded_total: self.entries_superseded.load(Ordering::Relaxed),
            entries_rejected_total: self.entries_rejected.load(Ordering::Relaxed),
            reconnects_total: self.reconnects.load(Ordering::Relaxed),
            full_resyncs_total: self.full_resyncs.load(Ordering::Relaxed),
            double_releases_total: self.double_releases.load(Ordering::Relaxed),
            abandoned_writes_total: self.abandoned_writes.load(Ordering::Relaxed),
        }
    }

    /// Renders the counters in Prometheus exposition text.
    pub fn render_metrics(&self) -> String {
        self.snapshot().render_metrics()
    }
}

/// Plain-data view of [`SubsystemTelemetry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub closes_total: u64,
    pub close_failures_total: u64,
    pub stale_epochs_total: u64,
    pub clock_errors_total: u64,
    pub entries_published_total: u64,
    pub entries_received_total: u64,
    pub entries_superseded_total: u64,
    pub entries_rejected_total: u64,
    pub reconnects_total: u64,
    pub full_resyncs_total: u64,
    pub double_releases_total: u64,
    pub abandoned_writes_total: u64,
}

impl TelemetrySnapshot {
    pub fn render_metrics(&self) -> String {
        format!(
            "closedts_closes_total {}\n\
             closedts_close_failures_total {}\n\
             closedts_stale_epochs_total {}\n\
             closedts_clock_errors_total {}\n\
             closedts_entries_published_total {}\n\
             closedts_entries_received_total {}\n\
             closedts_entries_superseded_total {}\n\
             closedts_entries_rejected_total {}\n\
             closedts_reconnects_total {}\n\
             closedts_full_resyncs_total {}\n\
             closedts_double_releases_total {}\n\
             closedts_abandoned_writes_total {}\n",
            self.closes_total,
            self.close_failures_total,
            self.stale_epochs_total,
            self.clock_errors_total,
            self.entries_published_total,
            self.entries_received_total,
            self.entries_superseded_total,
            self.entries_rejected_total,
            self.reconnects_total,
            self.full_resyncs_total,
            self.double_releases_total,
            self.abandoned_writes_total,
        )
    }
}
