use closedts::{
    ClockError, CloseRefused, Epoch, Lai, ManualClock, NodeId, RangeId, ShardedTracker,
    SubsystemLog, SubsystemTelemetry, Timestamp, Tracker,
};
use std::sync::Arc;
use std::thread;

fn harness(start_ns: u64) -> (Arc<ManualClock>, ShardedTracker, Arc<SubsystemTelemetry>) {
    let clock = Arc::new(ManualClock::new(Timestamp::from_ns(start_ns), Epoch(1)));
    let telemetry = SubsystemTelemetry::shared();
    let tracker = ShardedTracker::new(
        clock.clone(),
        16,
        telemetry.clone(),
        SubsystemLog::new(NodeId(1)),
    );
    (clock, tracker, telemetry)
}

#[test]
fn close_without_writes_reaches_target() {
    let (_clock, tracker, telemetry) = harness(100);
    let summary = tracker
        .close(Timestamp::from_ns(90), Epoch(1))
        .expect("close");
    assert_eq!(summary.closed, Timestamp::from_ns(90));
    assert!(summary.lai_by_range.is_empty());
    assert_eq!(telemetry.snapshot().closes_total, 1);
}

#[test]
fn outstanding_write_caps_the_close() {
    let (_clock, tracker, _telemetry) = harness(100);
    let write = tracker.track(RangeId(7)).expect("track");
    assert_eq!(write.timestamp, Timestamp::from_ns(100));

    let summary = tracker
        .close(Timestamp::from_ns(150), Epoch(1))
        .expect("close");
    assert!(summary.closed < write.timestamp);
    assert_eq!(summary.closed, write.timestamp.prev());
    assert_eq!(summary.lai_by_range.get(&RangeId(7)), Some(&Lai(1)));
}

#[test]
fn released_range_disappears_from_the_summary() {
    let (clock, tracker, _telemetry) = harness(100);
    let write = tracker.track(RangeId(7)).expect("track");
    tracker.release(write, Epoch(1), RangeId(7), Lai(5));

    let summary = tracker
        .close(Timestamp::from_ns(200), Epoch(1))
        .expect("close");
    assert_eq!(summary.closed, Timestamp::from_ns(200));
    assert!(summary.lai_by_range.is_empty());

    // A later write on the same range requires one past the released LAI.
    clock.advance_to(Timestamp::from_ns(300));
    let _open = tracker.track(RangeId(7)).expect("track");
    let summary = tracker
        .close(Timestamp::from_ns(300), Epoch(1))
        .expect("close");
    assert_eq!(summary.lai_by_range.get(&RangeId(7)), Some(&Lai(6)));
}

#[test]
fn track_admits_above_the_closed_floor() {
    let (_clock, tracker, _telemetry) = harness(100);
    tracker
        .close(Timestamp::from_ns(1_000), Epoch(1))
        .expect("close");

    // The clock is behind the floor; the reservation clamps above it.
    let write = tracker.track(RangeId(3)).expect("track");
    assert!(write.timestamp > Timestamp::from_ns(1_000));
}

#[test]
fn close_target_below_floor_is_rejected() {
    let (_clock, tracker, telemetry) = harness(100);
    tracker
        .close(Timestamp::from_ns(200), Epoch(1))
        .expect("close");
    assert_eq!(
        tracker.close(Timestamp::from_ns(150), Epoch(1)).unwrap_err(),
        CloseRefused::TargetRegressed
    );
    assert_eq!(telemetry.snapshot().close_failures_total, 1);

    // Re-closing the same target is a no-op, not a failure.
    let summary = tracker
        .close(Timestamp::from_ns(200), Epoch(1))
        .expect("close");
    assert_eq!(summary.closed, Timestamp::from_ns(200));
}

#[test]
fn stale_epoch_close_is_refused() {
    let (_clock, tracker, telemetry) = harness(100);
    tracker
        .close(Timestamp::from_ns(200), Epoch(2))
        .expect("close");
    assert_eq!(
        tracker.close(Timestamp::from_ns(300), Epoch(1)).unwrap_err(),
        CloseRefused::StaleEpoch
    );
    assert_eq!(telemetry.snapshot().close_failures_total, 1);
}

#[test]
fn epoch_bump_wipes_released_history() {
    let (clock, tracker, _telemetry) = harness(100);
    let write = tracker.track(RangeId(7)).expect("track");
    tracker.release(write, Epoch(1), RangeId(7), Lai(9));

    clock.advance_to(Timestamp::from_ns(400));
    let _open = tracker.track(RangeId(7)).expect("track");
    let summary = tracker
        .close(Timestamp::from_ns(400), Epoch(2))
        .expect("close");
    // Requirements restart at 1 under the new lease.
    assert_eq!(summary.lai_by_range.get(&RangeId(7)), Some(&Lai(1)));
}

#[test]
fn release_under_an_older_epoch_is_ignored() {
    let (clock, tracker, _telemetry) = harness(100);
    tracker
        .close(Timestamp::from_ns(100), Epoch(2))
        .expect("close");

    clock.advance_to(Timestamp::from_ns(200));
    let write = tracker.track(RangeId(4)).expect("track");
    tracker.release(write, Epoch(1), RangeId(4), Lai(50));

    let _open = tracker.track(RangeId(4)).expect("track");
    let summary = tracker
        .close(Timestamp::from_ns(200), Epoch(2))
        .expect("close");
    assert_eq!(summary.lai_by_range.get(&RangeId(4)), Some(&Lai(1)));
}

#[test]
fn abandon_unblocks_and_is_counted() {
    let (_clock, tracker, telemetry) = harness(100);
    let write = tracker.track(RangeId(2)).expect("track");
    tracker.abandon(write, RangeId(2));

    let summary = tracker
        .close(Timestamp::from_ns(150), Epoch(1))
        .expect("close");
    assert_eq!(summary.closed, Timestamp::from_ns(150));
    assert!(summary.lai_by_range.is_empty());
    assert_eq!(telemetry.snapshot().abandoned_writes_total, 1);
}

#[test]
fn double_release_is_counted_not_fatal() {
    let (_clock, tracker, telemetry) = harness(100);
    let write = tracker.track(RangeId(2)).expect("track");
    tracker.release(write, Epoch(1), RangeId(2), Lai(1));
    tracker.release(write, Epoch(1), RangeId(2), Lai(1));
    assert_eq!(telemetry.snapshot().double_releases_total, 1);
}

#[test]
fn clock_failure_registers_nothing() {
    let (clock, tracker, _telemetry) = harness(100);
    clock.fail_with(Some(ClockError::Unavailable("liveness lost".into())));
    assert!(tracker.track(RangeId(1)).is_err());
    assert_eq!(tracker.outstanding(), 0);

    clock.fail_with(None);
    assert!(tracker.track(RangeId(1)).is_ok());
    assert_eq!(tracker.outstanding(), 1);
}

#[test]
fn concurrent_writers_never_stall_the_cycle() {
    let (clock, tracker, _telemetry) = harness(1_000);
    let tracker = Arc::new(tracker);

    let mut workers = Vec::new();
    for worker in 0..4u64 {
        let tracker = tracker.clone();
        workers.push(thread::spawn(move || {
            for i in 0..200u64 {
                let range = RangeId(worker * 1_000 + (i % 5));
                let write = tracker.track(range).expect("track");
                if i % 3 == 0 {
                    tracker.abandon(write, range);
                } else {
                    tracker.release(write, Epoch(1), range, Lai(i + 1));
                }
            }
        }));
    }

    let mut last_closed = Timestamp::ZERO;
    for step in 0..100u64 {
        clock.advance_to(Timestamp::from_ns(1_000 + step * 10));
        if let Ok(summary) = tracker.close(Timestamp::from_ns(1_000 + step * 10), Epoch(1)) {
            assert!(summary.closed >= last_closed);
            last_closed = summary.closed;
        }
    }

    for worker in workers {
        worker.join().expect("worker");
    }
    assert_eq!(tracker.outstanding(), 0);

    let summary = tracker
        .close(Timestamp::from_ns(5_000), Epoch(1))
        .expect("close");
    assert_eq!(summary.closed, Timestamp::from_ns(5_000));
    assert!(summary.lai_by_range.is_empty());
}
