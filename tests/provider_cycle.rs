use closedts::{
    Clients, ClockError, CloseLoopProvider, Config, Epoch, Lai, ManualClock, MemStorage, NodeId,
    NoopEverything, Provider, RangeId, ShardedTracker, SubsystemLog, SubsystemTelemetry,
    Timestamp, Tracker,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const LOCAL: NodeId = NodeId(1);

struct Harness {
    clock: Arc<ManualClock>,
    tracker: Arc<ShardedTracker>,
    storage: Arc<MemStorage>,
    telemetry: Arc<SubsystemTelemetry>,
    provider: CloseLoopProvider,
}

fn harness(mutate: impl FnOnce(&mut Config)) -> Harness {
    let mut config = Config::for_node(LOCAL);
    config.target_staleness_ms = 0;
    mutate(&mut config);

    let clock = Arc::new(ManualClock::new(Timestamp::from_ns(1_000), Epoch(1)));
    let telemetry = SubsystemTelemetry::shared();
    let log = SubsystemLog::new(LOCAL);
    let tracker = Arc::new(ShardedTracker::new(
        clock.clone(),
        config.shard_count,
        telemetry.clone(),
        log.clone(),
    ));
    let storage = Arc::new(MemStorage::new(config.entries_per_node, telemetry.clone()));
    let provider = CloseLoopProvider::new(
        config,
        clock.clone(),
        tracker.clone(),
        storage.clone(),
        Arc::new(NoopEverything),
        telemetry.clone(),
        log,
    );
    Harness {
        clock,
        tracker,
        storage,
        telemetry,
        provider,
    }
}

#[test]
fn first_published_entry_is_full() {
    let h = harness(|_| {});
    let sub = h.provider.subscribe(NodeId(2));

    let entry = h.provider.publish_cycle().expect("cycle").expect("entry");
    assert!(entry.full);
    assert_eq!(entry.epoch, Epoch(1));
    assert_eq!(entry.closed, Timestamp::from_ns(1_000));

    let delivered = sub.next().expect("delivered");
    assert_eq!(delivered, entry);
    assert_eq!(h.storage.latest_epoch(LOCAL), Some(Epoch(1)));
}

#[test]
fn full_entries_recur_on_the_refresh_cadence() {
    let h = harness(|config| config.full_refresh_every = 3);

    let mut kinds = Vec::new();
    for step in 0..4u64 {
        h.clock.advance_to(Timestamp::from_ns(1_000 + step * 100));
        let entry = h.provider.publish_cycle().expect("cycle").expect("entry");
        kinds.push(entry.full);
    }
    assert_eq!(kinds, vec![true, false, false, true]);
}

#[test]
fn incremental_entry_carries_only_the_delta() {
    let h = harness(|_| {});
    h.provider.publish_cycle().expect("cycle").expect("entry");

    h.clock.advance_to(Timestamp::from_ns(2_000));
    let open = h.tracker.track(RangeId(5)).expect("track");
    let entry = h.provider.publish_cycle().expect("cycle").expect("entry");
    assert!(!entry.full);
    assert_eq!(entry.lai_by_range.get(&RangeId(5)), Some(&Lai(1)));

    // Releasing the write clears the range with a tombstone on the next
    // incremental entry.
    h.tracker.release(open, Epoch(1), RangeId(5), Lai(3));
    h.clock.advance_to(Timestamp::from_ns(3_000));
    let entry = h.provider.publish_cycle().expect("cycle").expect("entry");
    assert!(!entry.full);
    assert_eq!(entry.lai_by_range.get(&RangeId(5)), Some(&Lai::CLEARED));

    // Steady state: nothing changed, the delta is empty.
    h.clock.advance_to(Timestamp::from_ns(4_000));
    let entry = h.provider.publish_cycle().expect("cycle").expect("entry");
    assert!(!entry.full);
    assert!(entry.lai_by_range.is_empty());
}

#[test]
fn slow_subscriber_is_superseded_with_a_full_entry() {
    let h = harness(|config| config.subscription_queue_depth = 1);
    let sub = h.provider.subscribe(NodeId(2));

    for step in 0..3u64 {
        h.clock.advance_to(Timestamp::from_ns(1_000 + step * 100));
        h.provider.publish_cycle().expect("cycle").expect("entry");
    }

    // The queue held one entry; the overflowing cycles replaced it with the
    // latest full snapshot rather than wedging the feed.
    let delivered = sub.next().expect("delivered");
    assert!(delivered.full);
    assert_eq!(delivered.closed, Timestamp::from_ns(1_200));
    assert!(sub.next().is_none());
    assert!(h.telemetry.snapshot().entries_superseded_total >= 1);
}

#[test]
fn stale_epoch_forces_a_full_resync_entry() {
    let h = harness(|_| {});
    h.clock.set_epoch(Epoch(2));
    h.provider.publish_cycle().expect("cycle").expect("entry");

    // The clock regressed to a dead epoch; the cycle degrades to a skip.
    h.clock.set_epoch(Epoch(1));
    h.clock.advance_to(Timestamp::from_ns(2_000));
    assert!(h.provider.publish_cycle().expect("cycle").is_none());
    assert_eq!(h.telemetry.snapshot().stale_epochs_total, 1);

    // Recovery under a live epoch republishes a full snapshot.
    h.clock.set_epoch(Epoch(3));
    h.clock.advance_to(Timestamp::from_ns(3_000));
    let entry = h.provider.publish_cycle().expect("cycle").expect("entry");
    assert!(entry.full);
    assert_eq!(entry.epoch, Epoch(3));
}

#[test]
fn clock_failure_skips_the_cycle_and_is_counted() {
    let h = harness(|_| {});
    h.clock
        .fail_with(Some(ClockError::Unavailable("liveness lost".into())));
    assert!(h.provider.publish_cycle().is_err());
    assert_eq!(h.telemetry.snapshot().clock_errors_total, 1);

    h.clock.fail_with(None);
    let entry = h.provider.publish_cycle().expect("cycle").expect("entry");
    assert!(entry.full);
}

#[test]
fn interest_trims_full_entries_when_configured() {
    let h = harness(|config| config.publish_all_ranges = false);
    let _a = h.tracker.track(RangeId(1)).expect("track");
    let _b = h.tracker.track(RangeId(2)).expect("track");
    h.provider.request(LOCAL, RangeId(1));

    let entry = h.provider.publish_cycle().expect("cycle").expect("entry");
    assert!(entry.full);
    assert_eq!(entry.lai_by_range.get(&RangeId(1)), Some(&Lai(1)));
    assert!(!entry.lai_by_range.contains_key(&RangeId(2)));
}

#[test]
fn regressed_target_is_not_mistaken_for_a_stale_epoch() {
    let h = harness(|_| {});
    // The floor is already past anything the clock can target.
    h.tracker
        .close(Timestamp::from_ns(5_000), Epoch(1))
        .expect("close");

    assert!(h.provider.publish_cycle().expect("cycle").is_none());
    let snapshot = h.telemetry.snapshot();
    assert_eq!(snapshot.stale_epochs_total, 0);
    assert_eq!(snapshot.close_failures_total, 1);
}

/// Clients stub recording which peers the provider touches.
#[derive(Default)]
struct RecordingClients {
    ensured: Mutex<Vec<NodeId>>,
    ready_probes: AtomicU64,
}

impl Clients for RecordingClients {
    fn ensure_client(&self, node: NodeId) {
        self.ensured.lock().unwrap().push(node);
    }

    fn ready(&self, _node: NodeId) -> bool {
        self.ready_probes.fetch_add(1, Ordering::Relaxed);
        false
    }
}

#[test]
fn remote_request_dials_and_probes_the_peer() {
    let clients = Arc::new(RecordingClients::default());
    let telemetry = SubsystemTelemetry::shared();
    let clock = Arc::new(ManualClock::new(Timestamp::from_ns(1_000), Epoch(1)));
    let provider = CloseLoopProvider::new(
        Config::for_node(LOCAL),
        clock,
        Arc::new(NoopEverything),
        Arc::new(MemStorage::new(8, telemetry.clone())),
        clients.clone(),
        telemetry,
        SubsystemLog::new(LOCAL),
    );

    provider.request(NodeId(2), RangeId(7));
    assert_eq!(*clients.ensured.lock().unwrap(), vec![NodeId(2)]);
    assert_eq!(clients.ready_probes.load(Ordering::Relaxed), 1);

    // Local interest needs no session.
    provider.request(LOCAL, RangeId(8));
    assert_eq!(clients.ensured.lock().unwrap().len(), 1);
    assert_eq!(clients.ready_probes.load(Ordering::Relaxed), 1);
}

#[test]
fn cancelled_subscriptions_retire_from_the_fanout_set() {
    let h = harness(|_| {});
    let sub = h.provider.subscribe(NodeId(2));
    assert_eq!(h.provider.subscriber_count(), 1);

    sub.cancel();
    h.provider.publish_cycle().expect("cycle").expect("entry");
    assert_eq!(h.provider.subscriber_count(), 0);
    assert!(sub.next().is_none());
}

#[test]
fn local_reads_resolve_through_the_published_chain() {
    let h = harness(|_| {});
    let open = h.tracker.track(RangeId(9)).expect("track");
    let entry = h.provider.publish_cycle().expect("cycle").expect("entry");
    let capped = entry.closed;
    assert!(capped < Timestamp::from_ns(1_000));

    // Behind the requirement: no follower read.
    assert_eq!(
        h.provider.max_closed(LOCAL, RangeId(9), Epoch(1), Lai(0)),
        Timestamp::ZERO
    );

    h.tracker.release(open, Epoch(1), RangeId(9), Lai(1));
    h.clock.advance_to(Timestamp::from_ns(2_000));
    h.provider.publish_cycle().expect("cycle").expect("entry");
    assert_eq!(
        h.provider.max_closed(LOCAL, RangeId(9), Epoch(1), Lai(1)),
        Timestamp::from_ns(2_000)
    );
}
