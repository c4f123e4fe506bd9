use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use ulid::Ulid;

use slotwise::engine::{find_available, find_conflict, validate};
use slotwise::model::naive_to_ms;
use slotwise::{
    AvailabilityWindow, Engine, EngineConfig, EngineError, Ms, RejectionReason, Resource,
    ResourceOrder, Span, TimeOfDay,
};

// ── Test infrastructure ──────────────────────────────────────

fn dt(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2031, 6, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn span(day: u32, from: (u32, u32), to: (u32, u32)) -> Span {
    Span::from_naive(dt(day, from.0, from.1), dt(day, to.0, to.1))
}

fn office_hours() -> AvailabilityWindow {
    AvailabilityWindow::new(TimeOfDay::parse("05:00").unwrap(), TimeOfDay::parse("17:00").unwrap())
        .unwrap()
}

fn now() -> Ms {
    naive_to_ms(dt(10, 0, 0))
}

fn open_engine() -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("slotwise_int_test_{}", Ulid::new()));
    let config = EngineConfig {
        data_dir: dir,
        ..EngineConfig::default()
    };
    Arc::new(Engine::open(&config).unwrap())
}

// ── Pure decision functions ──────────────────────────────────

#[test]
fn validator_scenarios() {
    let resource = Resource {
        id: Ulid::new(),
        owner_id: Ulid::new(),
        name: "Lab bench".into(),
        window: office_hours(),
        last_reserved_at: None,
    };
    let existing = [span(10, (9, 0), (10, 0))];
    let check = |candidate: Span, on_resource: &[Span], on_user: &[Span]| {
        validate(&candidate, &resource, on_resource, on_user, now())
    };

    assert_eq!(check(span(10, (9, 0), (10, 0)), &[], &[]), Ok(()));
    assert_eq!(
        check(span(10, (4, 0), (6, 0)), &[], &[]),
        Err(RejectionReason::BeforeWindowOpen)
    );
    assert_eq!(
        check(span(10, (16, 30), (18, 0)), &[], &[]),
        Err(RejectionReason::AfterWindowClose)
    );
    assert_eq!(
        check(span(10, (9, 30), (10, 30)), &existing, &[]),
        Err(RejectionReason::ResourceConflict)
    );
    assert_eq!(
        check(span(10, (9, 30), (10, 30)), &[], &existing),
        Err(RejectionReason::UserDoubleBooking)
    );
    assert_eq!(
        check(Span::from_naive(dt(9, 23, 0), dt(10, 1, 0)), &[], &[]),
        Err(RejectionReason::StartInPast)
    );
    assert_eq!(
        check(Span::from_naive(dt(9, 23, 0), dt(9, 22, 0)), &[], &[]),
        Err(RejectionReason::EndBeforeStart)
    );
}

#[test]
fn search_over_snapshot() {
    let owner = Ulid::new();
    let make = |name: &str| Resource {
        id: Ulid::new(),
        owner_id: owner,
        name: name.into(),
        window: office_hours(),
        last_reserved_at: None,
    };
    let resources = vec![make("a"), make("b"), make("c")];
    let mut booked = HashMap::new();
    booked.insert(resources[1].id, vec![span(10, (9, 0), (10, 0))]);

    let candidate = span(10, (9, 0), (10, 0));
    let found = find_available(&candidate, &resources, &booked, &[], now());
    let names: Vec<&str> = found.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["a", "c"]);
    assert_eq!(found, find_available(&candidate, &resources, &booked, &[], now()));
}

fn arb_span() -> impl Strategy<Value = Span> {
    (0i64..10_000, 0i64..10_000).prop_map(|(a, b)| Span::new(a, b))
}

proptest! {
    #[test]
    fn overlap_is_symmetric(a in arb_span(), b in arb_span()) {
        prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
    }

    #[test]
    fn adjacency_never_conflicts(start in 0i64..10_000, first in 1i64..500, second in 1i64..500) {
        let a = Span::new(start, start + first);
        let b = Span::new(start + first, start + first + second);
        prop_assert!(find_conflict(&b, &[a]).is_none());
        prop_assert!(find_conflict(&a, &[b]).is_none());
    }

    #[test]
    fn conflict_found_regardless_of_order(
        candidate in arb_span(),
        mut existing in prop::collection::vec(arb_span(), 0..8),
    ) {
        let forward = find_conflict(&candidate, &existing).is_some();
        existing.reverse();
        let backward = find_conflict(&candidate, &existing).is_some();
        prop_assert_eq!(forward, backward);
    }
}

// ── Engine end to end ────────────────────────────────────────

#[tokio::test]
async fn book_browse_cancel() {
    let engine = open_engine();
    let owner = Ulid::new();
    let alice = Ulid::new();
    let bob = Ulid::new();

    let room = Ulid::new();
    let lab = Ulid::new();
    engine.create_resource(room, owner, "Room 101".into(), office_hours()).await.unwrap();
    engine.create_resource(lab, owner, "Lab".into(), office_hours()).await.unwrap();

    let morning = span(10, (9, 0), (10, 0));
    let booking = engine.reserve(Ulid::new(), room, alice, morning, now()).await.unwrap();

    // Bob cannot take the room, but can take the lab.
    let err = engine.reserve(Ulid::new(), room, bob, morning, now()).await.unwrap_err();
    assert_eq!(err.rejection(), Some(RejectionReason::ResourceConflict));
    assert_eq!(err.to_string(), "Reservation in that period");
    let available: Vec<Ulid> = engine
        .find_available(morning, bob, now())
        .await
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(available, vec![lab]);

    // Alice cannot be in two places at once.
    let err = engine.reserve(Ulid::new(), lab, alice, morning, now()).await.unwrap_err();
    assert_eq!(err.rejection(), Some(RejectionReason::UserDoubleBooking));
    assert!(engine.find_available(morning, alice, now()).await.is_empty());

    let recent = engine.list_resources(ResourceOrder::RecentlyReserved).await;
    assert_eq!(recent[0].id, room);

    // Bob is not allowed to cancel Alice's booking; Alice is.
    assert!(matches!(
        engine.cancel_reservation(booking.id, bob).await,
        Err(EngineError::NotOwner(_))
    ));
    engine.cancel_reservation(booking.id, alice).await.unwrap();
    engine.reserve(Ulid::new(), room, bob, morning, now()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_overlaps_never_double_book() {
    let engine = open_engine();
    let room = Ulid::new();
    engine
        .create_resource(room, Ulid::new(), "Room".into(), office_hours())
        .await
        .unwrap();

    // Staggered, overlapping 90-minute requests from different users.
    let mut tasks = Vec::new();
    for i in 0..24u32 {
        let engine = engine.clone();
        let start = dt(10, 8 + i / 4, (i % 4) * 15);
        let end = start + chrono::Duration::minutes(90);
        tasks.push(tokio::spawn(async move {
            engine
                .reserve(Ulid::new(), room, Ulid::new(), Span::from_naive(start, end), now())
                .await
        }));
    }
    for task in tasks {
        let _ = task.await.unwrap();
    }

    let booked = engine.reservations_for_resource(room).await.unwrap();
    assert!(!booked.is_empty());
    for pair in booked.windows(2) {
        assert!(!pair[0].span.overlaps(&pair[1].span), "double booked: {pair:?}");
    }
}

/// Fresh engine holding one room busy 09:00-10:00 on day 10 and one booking
/// of `user` in another room at 13:00-14:00.
async fn seeded(user: Ulid) -> (Arc<Engine>, Vec<Ulid>) {
    let engine = open_engine();
    let owner = Ulid::new();
    let mut rooms = Vec::new();
    for name in ["a", "b", "c"] {
        let room = Ulid::new();
        engine.create_resource(room, owner, name.into(), office_hours()).await.unwrap();
        rooms.push(room);
    }
    engine
        .reserve(Ulid::new(), rooms[0], Ulid::new(), span(10, (9, 0), (10, 0)), now())
        .await
        .unwrap();
    engine
        .reserve(Ulid::new(), rooms[2], user, span(10, (13, 0), (14, 0)), now())
        .await
        .unwrap();
    (engine, rooms)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn search_lists_exactly_what_reserve_accepts(
        start_hours in -48i64..72,
        length_hours in -2i64..(24 * 400),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let candidate = Span::new(
            naive_to_ms(dt(10, 0, 0)) + start_hours * 3_600_000,
            naive_to_ms(dt(10, 0, 0)) + (start_hours + length_hours) * 3_600_000,
        );

        let (listed, accepted) = runtime.block_on(async {
            let user = Ulid::new();
            let (engine, rooms) = seeded(user).await;
            let found: Vec<Ulid> = engine
                .find_available(candidate, user, now())
                .await
                .iter()
                .map(|r| r.id)
                .collect();
            let listed: Vec<bool> = rooms.iter().map(|room| found.contains(room)).collect();

            let mut accepted = Vec::new();
            for index in 0..rooms.len() {
                let (fresh, fresh_rooms) = seeded(user).await;
                let result = fresh
                    .reserve(Ulid::new(), fresh_rooms[index], user, candidate, now())
                    .await;
                accepted.push(result.is_ok());
            }
            (listed, accepted)
        });

        prop_assert_eq!(listed, accepted);
    }
}
