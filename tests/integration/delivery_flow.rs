//! Sampling through to the remote writer, online and offline.

use crate::helpers::Harness;
use fieldtrack::TrackerEvent;
use fieldtrack::runtime::DropReason;
use fieldtrack::service::SampleTick;
use fieldtrack::sync::SubmitOutcome;

#[tokio::test]
async fn unchanged_position_is_delivered_once() {
    let h = Harness::new();
    h.enable().await;

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(h.engine().sampling_tick().await);
        h.advance(15);
    }

    assert_eq!(outcomes[0], SampleTick::Submitted(SubmitOutcome::Delivered));
    assert!(
        outcomes[1..]
            .iter()
            .all(|o| *o == SampleTick::Submitted(SubmitOutcome::Duplicate))
    );
    assert_eq!(h.writer.delivered().len(), 1);
    let payload = &h.writer.delivered()[0];
    assert_eq!(payload.email, "asha@example.com");
    assert_eq!(payload.user_role, "staff");
    assert!(!payload.is_background);
}

#[tokio::test]
async fn offline_samples_replay_in_capture_order() {
    let h = Harness::new();
    h.sim.script([(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]);
    h.writer.set_offline(true);
    h.enable().await;

    for _ in 0..3 {
        assert_eq!(
            h.engine().sampling_tick().await,
            SampleTick::Submitted(SubmitOutcome::Queued)
        );
        h.advance(15);
    }
    assert_eq!(h.engine().pipeline().queue_len().await, 3);
    assert!(h.writer.delivered().is_empty());

    h.writer.set_offline(false);
    h.advance(30);
    let report = h.engine().drain_tick().await;

    assert_eq!(report.delivered, 3);
    assert_eq!(report.remaining, 0);
    assert_eq!(h.writer.latitudes(), vec![1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn drain_waits_while_endpoint_is_down() {
    let h = Harness::new();
    h.writer.set_offline(true);
    h.enable().await;
    h.engine().sampling_tick().await;

    h.advance(60);
    let report = h.engine().drain_tick().await;
    assert_eq!(report.delivered, 0);
    assert_eq!(report.remaining, 1);
    assert_eq!(h.engine().pipeline().queue_len().await, 1);
}

#[tokio::test]
async fn samples_older_than_staleness_are_dropped() {
    let mut h = Harness::new();
    h.sim.script([(1.0, 1.0), (2.0, 2.0)]);
    h.writer.set_offline(true);
    h.enable().await;

    h.engine().sampling_tick().await;
    h.advance(1860);
    h.engine().sampling_tick().await;

    h.writer.set_offline(false);
    let report = h.engine().drain_tick().await;

    assert_eq!(report.delivered, 1);
    assert_eq!(report.dropped, 1);
    assert_eq!(h.writer.latitudes(), vec![2.0]);
    let drops: Vec<_> = h
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            TrackerEvent::SampleDropped { reason } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(drops, vec![DropReason::Stale { age_secs: 1860 }]);
}
