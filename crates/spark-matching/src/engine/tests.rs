use std::collections::HashSet;

use super::*;
use crate::types::RoomState;

fn p(id: &str) -> ParticipantId {
    ParticipantId::from(id)
}

fn evt() -> EventId {
    EventId::from("evt1")
}

#[tokio::test]
async fn two_waiters_are_paired_into_one_room() {
    let engine = MatchingEngine::default();
    let (a, b) = (p("a1"), p("b2"));

    let joined = engine.join(&evt(), &a).await;
    assert_eq!(joined.status, QueueStatus::Waiting);
    engine.join(&evt(), &b).await;

    let response = engine.trigger_match(&evt()).await;
    assert!(response.matched);
    let room_id = response.room_id.clone().unwrap();
    assert_eq!(response.participant_ids, Some([a.clone(), b.clone()]));

    for who in [&a, &b] {
        let status = engine.status(&evt(), who).await;
        assert_eq!(status.status, QueueStatus::Matched);
        assert_eq!(status.room_id.as_ref(), Some(&room_id));
    }
    assert_eq!(engine.entry(&evt(), &a).await.unwrap().matched_with, Some(b.clone()));
    assert_eq!(engine.entry(&evt(), &b).await.unwrap().matched_with, Some(a));
    assert!(engine.room(&room_id).await.is_some());
}

#[tokio::test]
async fn join_while_matched_returns_current_room() {
    let engine = MatchingEngine::default();
    engine.join(&evt(), &p("a1")).await;
    engine.join(&evt(), &p("b2")).await;
    let room = engine.try_match(&evt()).await.unwrap();

    let again = engine.join(&evt(), &p("a1")).await;
    assert!(again.matched);
    assert_eq!(again.room_id, Some(room.id));
}

#[tokio::test]
async fn participant_who_left_is_never_paired() {
    let engine = MatchingEngine::default();
    engine.join(&evt(), &p("a1")).await;
    engine.leave(&evt(), &p("a1")).await;
    engine.join(&evt(), &p("b2")).await;

    assert!(!engine.trigger_match(&evt()).await.matched);
    assert_eq!(
        engine.status(&evt(), &p("a1")).await.status,
        QueueStatus::NotInQueue
    );
}

#[tokio::test]
async fn leaving_a_room_ends_it_and_requeues_partner() {
    let engine = MatchingEngine::default();
    engine.join(&evt(), &p("a1")).await;
    engine.join(&evt(), &p("b2")).await;
    let room = engine.try_match(&evt()).await.unwrap();

    let outcome = engine.leave(&evt(), &p("a1")).await;
    let ended = outcome.ended_room.unwrap();
    assert_eq!(ended.id, room.id);
    assert_eq!(ended.state, RoomState::Ended);
    assert!(engine.room_index.read().await.is_empty());
    assert_eq!(outcome.requeued, Some(p("b2")));
    assert!(engine.room(&room.id).await.is_none());

    let b = engine.status(&evt(), &p("b2")).await;
    assert_eq!(b.status, QueueStatus::Waiting);
    assert_eq!(b.room_id, None);
}

#[tokio::test]
async fn next_match_pairs_with_the_next_waiter() {
    let engine = MatchingEngine::default();
    for id in ["a1", "b2", "c3"] {
        engine.join(&evt(), &p(id)).await;
    }
    engine.try_match(&evt()).await.unwrap();

    // b2's partner skips; b2 is requeued ahead of c3 and a1 goes to the back.
    let response = engine.next_match(&evt(), &p("a1")).await;
    assert!(!response.matched);

    let room = engine.active_rooms(&evt()).await;
    assert_eq!(room.len(), 1);
    assert!(room[0].contains(&p("b2")));
    assert!(room[0].contains(&p("c3")));
    assert_eq!(engine.status(&evt(), &p("a1")).await.status, QueueStatus::Waiting);
}

#[tokio::test]
async fn next_match_reports_the_room_it_lands_in() {
    let engine = MatchingEngine::default();
    engine.join(&evt(), &p("b2")).await;

    let response = engine.next_match(&evt(), &p("a1")).await;
    assert!(response.matched);
    let ids = response.participant_ids.unwrap();
    assert!(ids.contains(&p("a1")) && ids.contains(&p("b2")));
}

#[tokio::test]
async fn events_are_isolated() {
    let engine = MatchingEngine::default();
    engine.join(&EventId::from("e1"), &p("a1")).await;
    engine.join(&EventId::from("e2"), &p("b2")).await;

    assert!(engine.try_match(&EventId::from("e1")).await.is_none());
    assert!(engine.try_match(&EventId::from("e2")).await.is_none());
    assert!(engine.try_match(&EventId::from("unknown")).await.is_none());
}

#[tokio::test]
async fn subscribers_see_pairing_changes_for_both_sides() {
    let engine = MatchingEngine::default();
    let mut changes = engine.subscribe();

    engine.join(&evt(), &p("a1")).await;
    engine.join(&evt(), &p("b2")).await;
    let room = engine.try_match(&evt()).await.unwrap();

    let mut matched = Vec::new();
    while let Ok(change) = changes.try_recv() {
        if change.is_matched {
            assert_eq!(change.current_room_id.as_ref(), Some(&room.id));
            matched.push(change.participant_id);
        }
    }
    matched.sort();
    assert_eq!(matched, vec![p("a1"), p("b2")]);
}

#[tokio::test]
async fn leave_everywhere_clears_every_event() {
    let engine = MatchingEngine::default();
    let (e1, e2) = (EventId::from("e1"), EventId::from("e2"));
    engine.join(&e1, &p("a1")).await;
    engine.join(&e2, &p("a1")).await;
    engine.join(&e2, &p("b2")).await;
    engine.try_match(&e2).await.unwrap();

    let left = engine.leave_everywhere(&p("a1")).await;
    assert_eq!(left.len(), 2);
    assert_eq!(engine.status(&e1, &p("a1")).await.status, QueueStatus::NotInQueue);
    assert_eq!(engine.status(&e2, &p("b2")).await.status, QueueStatus::Waiting);
    assert_eq!(engine.stats(&e2).await.active_rooms, 0);
}

#[tokio::test]
async fn reaper_drops_only_old_waiters() {
    let engine = MatchingEngine::default();
    engine.join(&evt(), &p("a1")).await;
    engine.join(&evt(), &p("b2")).await;
    engine.try_match(&evt()).await.unwrap();
    engine.join(&evt(), &p("c3")).await;

    assert_eq!(engine.reap_stale(Duration::from_secs(3600)).await, 0);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(engine.reap_stale(Duration::ZERO).await, 1);
    assert_eq!(engine.status(&evt(), &p("c3")).await.status, QueueStatus::NotInQueue);
    assert_eq!(engine.stats(&evt()).await.active_rooms, 1);
}

#[tokio::test]
async fn execute_dispatches_queue_ops() {
    let engine = MatchingEngine::default();
    let join = QueueOp::Join { event_id: evt() };
    match engine.execute(&p("a1"), &join).await {
        QueueReply::Join(r) => assert_eq!(r.status, QueueStatus::Waiting),
        other => panic!("unexpected reply: {other:?}"),
    }
    engine.execute(&p("b2"), &join).await;

    let trigger = QueueOp::TriggerMatch { event_id: evt() };
    let QueueReply::TriggerMatch(matched) = engine.execute(&p("b2"), &trigger).await else {
        panic!("expected trigger_match reply");
    };
    assert!(matched.matched);

    let leave = QueueOp::Leave { event_id: evt() };
    assert_eq!(engine.execute(&p("a1"), &leave).await, QueueReply::Leave);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_traffic_never_double_books() {
    let engine = Arc::new(MatchingEngine::default());
    let mut tasks = Vec::new();

    for i in 0..24 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            let me = ParticipantId::new(format!("p{i:02}"));
            for round in 0..25 {
                engine.join(&evt(), &me).await;
                engine.try_match(&evt()).await;
                if (i + round) % 3 == 0 {
                    engine.leave(&evt(), &me).await;
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut seen = HashSet::new();
    for room in engine.active_rooms(&evt()).await {
        let [a, b] = &room.participant_ids;
        assert_ne!(a, b);
        for (me, partner) in [(a, b), (b, a)] {
            assert!(seen.insert(me.clone()), "{me} is in two active rooms");
            let entry = engine.entry(&evt(), me).await.unwrap();
            assert_eq!(entry.status(), QueueStatus::Matched);
            assert_eq!(entry.room_id.as_ref(), Some(&room.id));
            assert_eq!(entry.matched_with.as_ref(), Some(partner));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn leave_racing_a_matching_pass_wins_or_ends_the_room() {
    for _ in 0..50 {
        let engine = Arc::new(MatchingEngine::default());
        engine.join(&evt(), &p("a1")).await;
        engine.join(&evt(), &p("b2")).await;

        let matcher = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.try_match(&evt()).await })
        };
        let leaver = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.leave(&evt(), &p("a1")).await })
        };
        matcher.await.unwrap();
        leaver.await.unwrap();

        assert_eq!(engine.status(&evt(), &p("a1")).await.status, QueueStatus::NotInQueue);
        assert!(engine.active_rooms(&evt()).await.is_empty());
        assert!(engine.room_index.read().await.is_empty());
        assert_eq!(engine.status(&evt(), &p("b2")).await.status, QueueStatus::Waiting);
    }
}

#[tokio::test]
async fn reaper_spares_a_partner_requeued_after_a_long_conversation() {
    let engine = MatchingEngine::default();
    engine.join(&evt(), &p("a1")).await;
    engine.join(&evt(), &p("b2")).await;
    engine.try_match(&evt()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    engine.leave(&evt(), &p("a1")).await;

    assert_eq!(engine.reap_stale(Duration::from_millis(30)).await, 0);
    assert_eq!(engine.status(&evt(), &p("b2")).await.status, QueueStatus::Waiting);

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(engine.reap_stale(Duration::from_millis(30)).await, 1);
    assert_eq!(engine.status(&evt(), &p("b2")).await.status, QueueStatus::NotInQueue);
}
