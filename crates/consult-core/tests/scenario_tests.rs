//! End-to-end lifecycle scenarios driven through the engine with a manual clock

mod common;

use chrono::Duration;
use common::*;
use consult_core::{BookingStatus, CallEvent, CallStatus, DeviceInfo, Error};

#[tokio::test]
async fn scenario_a_join_opens_five_minutes_early() {
    let env = create_test_env().await;
    let booking = env.book(base_time() + Duration::minutes(10), 30).await;

    env.advance(Duration::minutes(4));
    let early = env
        .engine
        .request_join(&booking.id, CLIENT, &DeviceInfo::default())
        .await;
    match early {
        Err(Error::TooEarly { minutes_until_start }) => assert_eq!(minutes_until_start, 1),
        other => panic!("expected TooEarly, got {:?}", other),
    }
    assert_eq!(env.transport.calls(), 0);

    env.advance(Duration::minutes(2));
    let grant = env
        .engine
        .request_join(&booking.id, CLIENT, &DeviceInfo::default())
        .await
        .unwrap();
    assert_eq!(grant.channel_name, format!("consult-{}", booking.id));
    assert!(grant.uid != 0);

    let stored = env.engine.get_booking_detail(&booking.id, CLIENT).await.unwrap();
    assert_eq!(stored.booking.status, BookingStatus::InProgress);
    assert_eq!(stored.participants.len(), 1);
}

#[tokio::test]
async fn scenario_b_concurrent_overlapping_bookings() {
    let env = create_test_env().await;

    let first = {
        let engine = env.engine.clone();
        tokio::spawn(async move {
            engine
                .create_booking("client-1", PROVIDER, at(10, 0), 30)
                .await
        })
    };
    let second = {
        let engine = env.engine.clone();
        tokio::spawn(async move {
            engine
                .create_booking("client-2", PROVIDER, at(10, 15), 30)
                .await
        })
    };

    let results = vec![first.await.unwrap(), second.await.unwrap()];
    let created: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let rejected: Vec<_> = results
        .iter()
        .filter(|r| matches!(r, Err(Error::SlotTaken { .. })))
        .collect();

    assert_eq!(created.len(), 1);
    assert_eq!(rejected.len(), 1);
    match results.iter().find_map(|r| r.as_ref().err()) {
        Some(Error::SlotTaken {
            conflicting_booking_id,
        }) => assert_eq!(conflicting_booking_id, &created[0].id),
        other => panic!("expected SlotTaken, got {:?}", other),
    }

    let lists = env.engine.list_bookings_for(PROVIDER).await.unwrap();
    assert_eq!(lists.as_provider.len(), 1);
}

#[tokio::test]
async fn scenario_c_early_leave_keeps_booking_in_progress() {
    let env = create_test_env().await;
    let booking = env.book(at(10, 0), 60).await;

    env.set_time(at(10, 5));
    let client = env
        .engine
        .request_join(&booking.id, CLIENT, &DeviceInfo::default())
        .await
        .unwrap();
    let provider = env
        .engine
        .request_join(&booking.id, PROVIDER, &DeviceInfo::default())
        .await
        .unwrap();
    assert_eq!(client.call_id, provider.call_id);

    env.set_time(at(10, 20));
    env.engine
        .record_call_event(&booking.id, CLIENT, CallEvent::Leave)
        .await
        .unwrap();
    env.engine
        .record_call_event(&booking.id, PROVIDER, CallEvent::Leave)
        .await
        .unwrap();

    let detail = env.engine.get_booking_detail(&booking.id, CLIENT).await.unwrap();
    let call = detail.call.expect("call should be recorded");
    assert_eq!(call.status, CallStatus::Completed);
    assert_eq!(call.ended_at, Some(at(10, 20)));
    assert_eq!(call.duration_secs, 15 * 60);
    assert_eq!(detail.booking.status, BookingStatus::InProgress);
}

#[tokio::test]
async fn scenario_d_sweep_completes_unjoined_booking() {
    let env = create_test_env().await;
    let booking = env.book(at(10, 0), 60).await;

    env.set_time(at(11, 5));
    let report = env.engine.sweep_expired(at(11, 5)).await.unwrap();
    assert_eq!(report.completed, vec![booking.id.clone()]);

    let detail = env.engine.get_booking_detail(&booking.id, PROVIDER).await.unwrap();
    assert_eq!(detail.booking.status, BookingStatus::Completed);
}

#[tokio::test]
async fn scenario_d_sweep_leaves_joined_booking_alone() {
    let env = create_test_env().await;
    let booking = env.book(at(10, 0), 60).await;

    env.set_time(at(10, 5));
    env.engine
        .request_join(&booking.id, CLIENT, &DeviceInfo::default())
        .await
        .unwrap();
    env.set_time(at(10, 20));
    env.engine
        .record_call_event(&booking.id, CLIENT, CallEvent::Leave)
        .await
        .unwrap();

    env.set_time(at(11, 5));
    let report = env.engine.sweep_expired(at(11, 5)).await.unwrap();
    assert!(report.completed.is_empty());

    let detail = env.engine.get_booking_detail(&booking.id, CLIENT).await.unwrap();
    assert_eq!(detail.booking.status, BookingStatus::InProgress);
}

#[tokio::test]
async fn scenario_d_last_leave_after_end_completes_booking() {
    let env = create_test_env().await;
    let booking = env.book(at(10, 0), 60).await;

    env.set_time(at(10, 5));
    env.engine
        .request_join(&booking.id, PROVIDER, &DeviceInfo::default())
        .await
        .unwrap();

    env.set_time(at(11, 0));
    env.engine
        .record_call_event(&booking.id, PROVIDER, CallEvent::Leave)
        .await
        .unwrap();

    let detail = env.engine.get_booking_detail(&booking.id, PROVIDER).await.unwrap();
    assert_eq!(detail.booking.status, BookingStatus::Completed);
}

#[tokio::test]
async fn scenario_e_cancelled_booking_is_never_joinable() {
    let env = create_test_env().await;
    let booking = env.book(at(10, 0), 30).await;
    env.engine.cancel_booking(&booking.id, CLIENT).await.unwrap();

    for now in [at(9, 30), at(9, 58), at(10, 15), at(11, 0)] {
        env.set_time(now);
        for actor in [CLIENT, PROVIDER] {
            let result = env
                .engine
                .request_join(&booking.id, actor, &DeviceInfo::default())
                .await;
            assert!(
                matches!(
                    result,
                    Err(Error::NotJoinable {
                        status: BookingStatus::Cancelled
                    })
                ),
                "{} at {}: {:?}",
                actor,
                now,
                result
            );
        }
    }
    assert_eq!(env.transport.calls(), 0);
}
