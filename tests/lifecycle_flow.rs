use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ulid::Ulid;

use studyhall::clock::ManualClock;
use studyhall::engine::{Engine, EngineError};
use studyhall::limits::NO_SHOW_GRACE_MS;
use studyhall::model::*;
use studyhall::reaper;

const H: Ms = 3_600_000;
const M: Ms = 60_000;

// ── Test infrastructure ──────────────────────────────────────

fn test_wal_path() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("studyhall_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("engine.wal")
}

fn open_engine(path: PathBuf, now: Ms) -> (Arc<Engine>, Arc<ManualClock>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let clock = Arc::new(ManualClock::new(now));
    let engine = Arc::new(Engine::open(path, clock.clone()).unwrap());
    (engine, clock)
}

async fn register(engine: &Engine, name: &str, capacity: u32, kind: SpaceType) -> Ulid {
    engine
        .register_space(
            name.into(),
            Location {
                building: "Science Library".into(),
                floor: 3,
                room_number: name.into(),
            },
            capacity,
            kind,
            vec![Facility::Whiteboard, Facility::PowerOutlet],
            Some("integration fixture".into()),
        )
        .await
        .unwrap()
}

fn requester(id: &str) -> Requester {
    Requester {
        id: id.into(),
        name: format!("User {id}"),
        email: format!("{id}@example.edu"),
    }
}

/// Wait for the next event on a subscription, with timeout.
async fn recv_event(
    rx: &mut tokio::sync::broadcast::Receiver<Event>,
    timeout: Duration,
) -> Option<Event> {
    tokio::time::timeout(timeout, rx.recv()).await.ok()?.ok()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn full_day_flow_survives_restart() {
    let path = test_wal_path();
    let (engine, clock) = open_engine(path.clone(), 8 * H);

    let study = register(&engine, "S-301", 6, SpaceType::Group).await;
    let solo = register(&engine, "S-302", 1, SpaceType::Individual).await;

    // Morning: a group books 09:00-11:00, a student books the solo desk
    let group = engine
        .create_reservation(
            study,
            requester("s-10"),
            9 * H,
            11 * H,
            5,
            Purpose::GroupStudy,
            Some("midterm prep".into()),
        )
        .await
        .unwrap();
    let desk = engine
        .create_reservation(
            solo,
            requester("s-11"),
            9 * H,
            10 * H,
            1,
            Purpose::IndividualStudy,
            None,
        )
        .await
        .unwrap();

    // The group shrinks and moves up half an hour
    let mut patch = ReservationPatch::default();
    patch.start = Some(9 * H + 30 * M);
    patch.end = Some(11 * H + 30 * M);
    patch.participants = Some(4);
    let group = engine
        .modify_reservation(group.id, "s-10", Role::Student, patch, Some(group.version))
        .await
        .unwrap();
    assert_eq!(group.version, 2);

    // The desk booking is abandoned
    engine
        .cancel_reservation(desk.id, "s-11", Role::Student, None)
        .await
        .unwrap();

    // The group shows up and works their slot
    clock.set(9 * H + 30 * M);
    engine.check_in(group.id, "s-10", Role::Student).await.unwrap();
    assert_eq!(
        engine.room_status(study).await.unwrap().space.status,
        SpaceStatus::InUse
    );
    clock.set(11 * H + 15 * M);
    engine.check_out(group.id, "s-10", Role::Student).await.unwrap();
    assert_eq!(
        engine.room_status(study).await.unwrap().space.status,
        SpaceStatus::Empty
    );

    // Afternoon search sees both spaces free
    let page = engine
        .find_available(&SearchFilter::default(), 14 * H, 15 * H, 1, 10)
        .await
        .unwrap();
    assert_eq!(page.total, 2);

    let stats = engine.stats().await;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.in_use, 0);

    // Restart: every record and derived fact is still there
    drop(engine);
    let (engine, _clock) = open_engine(path, 12 * H);

    let group_after = engine
        .get_reservation(group.id, "s-10", Role::Student)
        .await
        .unwrap();
    assert_eq!(group_after.status, ReservationStatus::CheckedOut);
    assert_eq!(group_after.check_in_time, Some(9 * H + 30 * M));
    assert_eq!(group_after.check_out_time, Some(11 * H + 15 * M));
    assert_eq!(group_after.version, 4);

    let desk_after = engine
        .get_reservation(desk.id, "s-11", Role::Student)
        .await
        .unwrap();
    assert_eq!(desk_after.status, ReservationStatus::Cancelled);

    let mine = engine.reservations_for("s-10").await;
    assert_eq!(mine.len(), 1);

    // The worked slot is history now; the window is bookable again
    engine
        .create_reservation(
            study,
            requester("s-12"),
            9 * H + 30 * M,
            11 * H + 30 * M,
            2,
            Purpose::ProjectWork,
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn subscription_streams_lifecycle_events() {
    let (engine, clock) = open_engine(test_wal_path(), 8 * H);
    let space = register(&engine, "S-310", 4, SpaceType::Group).await;
    let other = register(&engine, "S-311", 4, SpaceType::Group).await;

    let mut rx = engine.subscribe(space);

    let r = engine
        .create_reservation(
            space,
            requester("s-20"),
            9 * H,
            10 * H,
            2,
            Purpose::GroupStudy,
            None,
        )
        .await
        .unwrap();

    let event = recv_event(&mut rx, Duration::from_secs(5)).await;
    assert!(
        matches!(event, Some(Event::ReservationCreated { ref reservation }) if reservation.id == r.id),
        "expected the creation event, got {event:?}"
    );

    // Check-in inside the window emits the transition and then the
    // projection that flips the room to in-use
    clock.set(9 * H);
    engine.check_in(r.id, "s-20", Role::Student).await.unwrap();

    let event = recv_event(&mut rx, Duration::from_secs(5)).await;
    assert!(matches!(event, Some(Event::CheckedIn { id, .. }) if id == r.id));
    let event = recv_event(&mut rx, Duration::from_secs(5)).await;
    assert!(matches!(
        event,
        Some(Event::StatusProjected {
            status: SpaceStatus::InUse,
            ..
        })
    ));

    // Activity on another space never reaches this channel
    engine
        .create_reservation(
            other,
            requester("s-21"),
            9 * H,
            10 * H,
            2,
            Purpose::GroupStudy,
            None,
        )
        .await
        .unwrap();
    let event = recv_event(&mut rx, Duration::from_millis(300)).await;
    assert!(event.is_none(), "unsubscribed space leaked an event: {event:?}");
}

#[tokio::test]
async fn sweeper_task_expires_no_shows() {
    let (engine, clock) = open_engine(test_wal_path(), 8 * H);
    let space = register(&engine, "S-320", 4, SpaceType::Group).await;

    let r = engine
        .create_reservation(
            space,
            requester("s-30"),
            9 * H,
            10 * H,
            2,
            Purpose::GroupStudy,
            None,
        )
        .await
        .unwrap();

    // Nobody checks in; the grace period elapses before the sweep runs
    clock.set(9 * H + NO_SHOW_GRACE_MS);
    let sweeper = tokio::spawn(reaper::run_sweeper(engine.clone()));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = engine
            .get_reservation(r.id, "s-30", Role::Student)
            .await
            .unwrap()
            .status;
        if status == ReservationStatus::NoShow {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "sweeper did not expire the reservation, still {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    sweeper.abort();

    // The freed window books cleanly
    engine
        .create_reservation(
            space,
            requester("s-31"),
            9 * H,
            10 * H,
            2,
            Purpose::GroupStudy,
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn compactor_task_rewrites_wal() {
    let (engine, _clock) = open_engine(test_wal_path(), 8 * H);
    let space = register(&engine, "S-330", 4, SpaceType::Group).await;
    for i in 0..5 {
        engine
            .create_reservation(
                space,
                requester("s-40"),
                (10 + i) * H,
                (11 + i) * H,
                2,
                Purpose::GroupStudy,
                None,
            )
            .await
            .unwrap();
    }
    assert!(engine.wal_appends_since_compact().await >= 6);

    let compactor = tokio::spawn(reaper::run_compactor(engine.clone(), 1));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if engine.wal_appends_since_compact().await == 0 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "compactor never rewrote the WAL"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    compactor.abort();

    // Compacted state still answers queries
    assert_eq!(engine.space_reservations(space, None).await.unwrap().len(), 5);
}

#[tokio::test]
async fn maintenance_override_blocks_booking_visibility() {
    let (engine, _clock) = open_engine(test_wal_path(), 8 * H);
    let space = register(&engine, "S-340", 4, SpaceType::Group).await;
    register(&engine, "S-341", 4, SpaceType::Group).await;

    engine.set_maintenance(space).await.unwrap();

    // Search never offers a space under maintenance
    let page = engine
        .find_available(&SearchFilter::default(), 10 * H, 11 * H, 1, 10)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].name, "S-341");

    // Booking is still allowed (the invariant is about overlap, not status);
    // status stays pinned until the override is cleared
    engine
        .create_reservation(
            space,
            requester("s-50"),
            10 * H,
            11 * H,
            2,
            Purpose::GroupStudy,
            None,
        )
        .await
        .unwrap();
    assert_eq!(
        engine.room_status(space).await.unwrap().space.status,
        SpaceStatus::Maintenance
    );

    engine.clear_maintenance(space).await.unwrap();
    assert_eq!(
        engine.room_status(space).await.unwrap().space.status,
        SpaceStatus::Empty
    );
}

#[tokio::test]
async fn double_booking_race_with_staggered_writers() {
    let (engine, _clock) = open_engine(test_wal_path(), 8 * H);
    let space = register(&engine, "S-350", 4, SpaceType::Group).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_reservation(
                    space,
                    requester(&format!("s-6{i}")),
                    10 * H,
                    11 * H,
                    2,
                    Purpose::GroupStudy,
                    None,
                )
                .await
        }));
    }

    let mut winners = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => winners += 1,
            Err(EngineError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error in race: {e}"),
        }
    }
    assert_eq!(winners, 1, "exactly one racing writer may hold the slot");
    assert_eq!(conflicts, 7);
}
