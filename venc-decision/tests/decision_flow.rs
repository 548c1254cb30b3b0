//! Decision stage integration tests.
//!
//! Drives the full subsystem the way the surrounding pipeline would:
//! pictures submitted in display order, decided pictures dispatched to a
//! mock downstream that reports consumption, buffers reclaimed through the
//! shared pool.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use venc_core::config::DecisionConfig;
use venc_core::error::Error as CoreError;
use venc_core::picture::{PictureMetadata, PictureRole};
use venc_core::pool::SharedPicturePool;
use venc_decision::{
    DecidedPicture, DecisionError, DecisionStage, ReferenceEntry, ReferenceQueue,
};

fn make_stage(config: DecisionConfig) -> (DecisionStage, SharedPicturePool) {
    let pool = SharedPicturePool::new();
    let stage = DecisionStage::new(config, pool.clone()).expect("valid config");
    (stage, pool)
}

/// Submit `count` pictures and run the stream to completion, returning
/// every decided picture in coding order.
fn run_stream(
    stage: &mut DecisionStage,
    pool: &SharedPicturePool,
    count: u64,
) -> Vec<DecidedPicture> {
    let mut decided = Vec::new();
    for d in 0..count {
        decided.extend(
            stage
                .submit_picture(d, pool.acquire(), PictureMetadata::default())
                .expect("in-order submission"),
        );
    }
    decided.extend(stage.finish().expect("flush"));
    decided
}

/// Report consumption of every bound reference, one consumer at a time.
fn report_all(stage: &mut DecisionStage, decided: &[DecidedPicture]) {
    for picture in decided {
        let consumer = picture.descriptor.coding_order.unwrap();
        for reference in picture.bound_references() {
            stage
                .report_consumed(reference, consumer)
                .expect("first report per edge");
        }
    }
}

// =============================================================================
// Scenario A: dyadic structure for a full group
// =============================================================================

#[test]
fn scenario_a_dyadic_eight_picture_group() {
    let config = DecisionConfig {
        mini_gop_size: 8,
        max_temporal_layers: 4,
        ..Default::default()
    };
    let (mut stage, pool) = make_stage(config);
    let decided = run_stream(&mut stage, &pool, 8);
    assert_eq!(decided.len(), 8);

    let find = |d: u64| {
        decided
            .iter()
            .find(|p| p.descriptor.display_order == d)
            .unwrap()
    };

    // The anchor is coded first; the far boundary is the secondary layer-0
    // anchor.
    assert_eq!(find(0).descriptor.coding_order, Some(0));
    assert_eq!(find(0).descriptor.temporal_layer, 0);
    assert_eq!(find(0).descriptor.role, PictureRole::Key);
    assert_eq!(find(7).descriptor.coding_order, Some(1));
    assert_eq!(find(7).descriptor.temporal_layer, 0);
    assert_eq!(find(7).descriptor.role, PictureRole::Base);

    // Midpoints fill layers 1..3 per dyadic split.
    assert_eq!(find(3).descriptor.temporal_layer, 1);
    assert_eq!(find(1).descriptor.temporal_layer, 2);
    assert_eq!(find(5).descriptor.temporal_layer, 2);
    for d in [2, 4, 6] {
        assert_eq!(find(d).descriptor.temporal_layer, 3);
        assert_eq!(find(d).descriptor.role, PictureRole::NonReferenceB);
    }
}

// =============================================================================
// Scenario B: undersized reference window
// =============================================================================

#[test]
fn scenario_b_window_of_one_fails_on_second_reference() {
    // At the queue level the second concurrently live reference must be a
    // capacity error, surfaced with occupancy context.
    let pool = SharedPicturePool::new();
    let mut queue = ReferenceQueue::with_capacity(1);
    let inner = pool.clone();

    queue
        .allocate(ReferenceEntry::new(0, 0, 0, inner.acquire()))
        .expect("first reference fits");
    let err = queue
        .allocate(ReferenceEntry::new(1, 7, 0, inner.acquire()))
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        DecisionError::Core(CoreError::CapacityExhausted {
            coding_order: 1,
            occupied: 1,
            capacity: 1,
        })
    ));

    // The stage refuses the same mis-sizing up front, before any picture.
    let config = DecisionConfig {
        mini_gop_size: 8,
        reference_window_capacity: 1,
        ..Default::default()
    };
    let err = DecisionStage::new(config, pool).unwrap_err();
    assert!(err.is_fatal());
}

// =============================================================================
// Scenario C: end-of-stream flush with a partial group
// =============================================================================

#[test]
fn scenario_c_partial_group_flush() {
    let config = DecisionConfig {
        mini_gop_size: 8,
        max_temporal_layers: 4,
        ..Default::default()
    };
    let (mut stage, pool) = make_stage(config);

    let mut decided = Vec::new();
    for d in 0..3 {
        decided.extend(
            stage
                .submit_picture(d, pool.acquire(), PictureMetadata::default())
                .unwrap(),
        );
    }
    // No full group: nothing decided until the flush.
    assert!(decided.is_empty());
    decided.extend(stage.finish().unwrap());
    assert_eq!(decided.len(), 3);

    for picture in &decided {
        assert!(picture.descriptor.temporal_layer < 4);
    }
    let find = |d: u64| {
        decided
            .iter()
            .find(|p| p.descriptor.display_order == d)
            .unwrap()
    };
    assert_eq!(find(0).descriptor.temporal_layer, 0);
    assert_eq!(find(2).descriptor.temporal_layer, 0);
    assert_eq!(find(1).descriptor.temporal_layer, 1);

    report_all(&mut stage, &decided);
    stage.assert_drained().expect("truncated stream drains");
}

// =============================================================================
// Scenario D: shared reference, duplicate report rejection
// =============================================================================

#[test]
fn scenario_d_slot_frees_after_both_consumers_report() {
    let (mut stage, pool) = make_stage(DecisionConfig::default());
    let decided = run_stream(&mut stage, &pool, 8);
    let queue = stage.queue();

    // The key anchor (coding order 0) is referenced by several pictures;
    // take the first two consumers.
    let consumers: Vec<u64> = decided
        .iter()
        .filter(|p| p.bound_references().contains(&0))
        .map(|p| p.descriptor.coding_order.unwrap())
        .collect();
    assert!(consumers.len() >= 2);
    let expected = consumers.len();
    assert_eq!(queue.dependency_count(0), Some(expected));

    stage.report_consumed(0, consumers[0]).unwrap();
    assert_eq!(queue.dependency_count(0), Some(expected - 1));

    // A second report from the same consumer must not double-decrement.
    let err = stage.report_consumed(0, consumers[0]).unwrap_err();
    assert!(matches!(
        err,
        DecisionError::DuplicateReport { coding_order: 0, .. }
    ));
    assert_eq!(queue.dependency_count(0), Some(expected - 1));

    // Only after every consumer reports does the slot free.
    for &consumer in &consumers[1..] {
        assert!(queue.lookup(0).is_some());
        stage.report_consumed(0, consumer).unwrap();
    }
    assert!(queue.lookup(0).is_none());
}

// =============================================================================
// Round-trip, determinism, drain
// =============================================================================

#[test]
fn round_trip_every_picture_released_exactly_once() {
    // Downstream keeps pace with the decision stage: each batch reports as
    // soon as it is dispatched, so the default window never fills.
    let (mut stage, pool) = make_stage(DecisionConfig::default());

    let mut total = 0u64;
    for d in 0..25 {
        let batch = stage
            .submit_picture(d, pool.acquire(), PictureMetadata::default())
            .unwrap();
        total += batch.len() as u64;
        report_all(&mut stage, &batch);
    }
    let batch = stage.finish().unwrap();
    total += batch.len() as u64;
    report_all(&mut stage, &batch);

    assert_eq!(total, 25);
    assert_eq!(stage.pictures_decided(), 25);
    assert_eq!(stage.pictures_released(), 25);
    stage.assert_drained().expect("all slots free");
    assert_eq!(pool.in_flight(), 0);
}

#[test]
fn lazy_downstream_overflows_the_window() {
    // With no consumption reports at all, the rolling window must
    // eventually exhaust; the failure is the configured capacity error,
    // not a silent drop.
    let (mut stage, pool) = make_stage(DecisionConfig::default());
    let mut result = Ok(Vec::new());
    for d in 0..64 {
        result = stage.submit_picture(d, pool.acquire(), PictureMetadata::default());
        if result.is_err() {
            break;
        }
    }
    let err = result.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        DecisionError::Core(CoreError::CapacityExhausted { .. })
    ));
}

#[test]
fn round_trip_survives_shuffled_report_order() {
    // A deliberately oversized window lets every report wait until end of
    // stream and arrive in arbitrary order.
    let config = DecisionConfig {
        reference_window_capacity: 64,
        ..Default::default()
    };
    let (mut stage, pool) = make_stage(config);
    let decided = run_stream(&mut stage, &pool, 17);

    let mut edges: Vec<(u64, u64)> = decided
        .iter()
        .flat_map(|p| {
            let consumer = p.descriptor.coding_order.unwrap();
            p.bound_references()
                .into_iter()
                .map(move |r| (r, consumer))
        })
        .collect();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    edges.shuffle(&mut rng);

    for (reference, consumer) in edges {
        stage.report_consumed(reference, consumer).unwrap();
    }
    assert_eq!(stage.pictures_released(), 17);
    stage.assert_drained().unwrap();
    assert_eq!(pool.in_flight(), 0);
}

#[test]
fn single_picture_stream_releases_without_reports() {
    let (mut stage, pool) = make_stage(DecisionConfig::default());
    let decided = run_stream(&mut stage, &pool, 1);
    assert_eq!(decided.len(), 1);
    assert_eq!(decided[0].descriptor.role, PictureRole::Key);

    // A lone key picture binds nothing, so the flush drains everything.
    stage.assert_drained().unwrap();
    assert_eq!(stage.pictures_released(), 1);
    assert_eq!(pool.in_flight(), 0);
}

#[test]
fn identical_streams_decide_identically() {
    let run = || {
        let config = DecisionConfig {
            reference_window_capacity: 64,
            ..Default::default()
        };
        let (mut stage, pool) = make_stage(config);
        run_stream(&mut stage, &pool, 21)
            .iter()
            .map(|p| {
                (
                    p.descriptor.display_order,
                    p.descriptor.coding_order.unwrap(),
                    p.descriptor.temporal_layer,
                    p.descriptor.role,
                    p.list0.clone(),
                    p.list1.clone(),
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn decided_pictures_hold_their_references_live() {
    let (mut stage, pool) = make_stage(DecisionConfig::default());
    let decided = run_stream(&mut stage, &pool, 16);
    let queue = stage.queue();

    // Until a picture reports, every one of its references keeps a
    // dependency attributable to it.
    for picture in &decided {
        let consumer = picture.descriptor.coding_order.unwrap();
        for reference in picture.bound_references() {
            assert!(queue.lookup(reference).is_some(), "reference still live");
            assert!(queue.dependency_count(reference).unwrap() >= 1);
        }
        for reference in picture.bound_references() {
            stage.report_consumed(reference, consumer).unwrap();
        }
    }
    stage.assert_drained().unwrap();
}

#[test]
fn abort_reports_outstanding_dependencies() {
    let (mut stage, pool) = make_stage(DecisionConfig::default());
    let decided = run_stream(&mut stage, &pool, 8);
    assert!(!decided.is_empty());

    // Nobody reported: the shutdown check must surface the live window
    // rather than force-release it.
    let err = stage.abort().unwrap_err();
    assert!(matches!(
        err,
        DecisionError::OutstandingDependencies { count, .. } if count > 0
    ));
    let err = stage.assert_drained().unwrap_err();
    assert!(matches!(err, DecisionError::NotDrained { .. }));
}

#[test]
fn out_of_order_submission_is_rejected_and_recoverable() {
    let (mut stage, pool) = make_stage(DecisionConfig::default());
    stage
        .submit_picture(0, pool.acquire(), PictureMetadata::default())
        .unwrap();

    let stray = pool.acquire();
    let err = stage
        .submit_picture(0, stray, PictureMetadata::default())
        .unwrap_err();
    assert!(matches!(
        err,
        DecisionError::Core(CoreError::Sequencing { expected: 0, got: 0 })
    ));
    pool.release(stray).unwrap();

    // The session continues with correctly ordered input.
    let mut decided = Vec::new();
    for d in 1..8 {
        decided.extend(
            stage
                .submit_picture(d, pool.acquire(), PictureMetadata::default())
                .unwrap(),
        );
    }
    decided.extend(stage.finish().unwrap());
    assert_eq!(stage.pictures_decided(), 8);
    report_all(&mut stage, &decided);
    stage.assert_drained().unwrap();
}
