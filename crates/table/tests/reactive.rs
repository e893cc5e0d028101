//! Predicate/trigger engine behavior against live tables.

mod common;

use common::{ids, init_tracing, wait_until};
use parking_lot::Mutex;
use rowsync_table::{FailureEvent, PredicateKind, Table, TableBuilder, TableHandle, TableOptions};
use rowsync_transport::{LocalRendezvous, MemHub};
use rowsync_types::{Membership, ParticipantId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const FIRING_TIMEOUT: Duration = Duration::from_secs(2);

/// A one-participant table: predicates run without any remote traffic.
fn solo_table(options: TableOptions) -> TableHandle {
    init_tracing();
    let membership = Membership::new(vec![ParticipantId(0)], ParticipantId(0)).unwrap();
    let mut builder = TableBuilder::new(
        membership,
        Arc::new(MemHub::new()),
        Arc::new(LocalRendezvous::new()),
    );
    let _pad = builder.scalar::<u64>("pad");
    builder.build(options).unwrap()
}

#[test]
fn test_one_time_predicate_fires_exactly_once() {
    let table = solo_table(TableOptions::default());
    let fired = Arc::new(AtomicU64::new(0));

    let counter = Arc::clone(&fired);
    table.predicates().insert(
        "always-true",
        |_table: &Table| true,
        move |_table: &Table| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        PredicateKind::OneTime,
    );

    assert!(wait_until(FIRING_TIMEOUT, || fired.load(Ordering::SeqCst) == 1));
    // The condition stays true forever; the entry must not be re-evaluated.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_recurrent_predicate_refires_without_debounce() {
    let table = solo_table(TableOptions::default());
    let fired = Arc::new(AtomicU64::new(0));

    let counter = Arc::clone(&fired);
    table.predicates().insert(
        "always-true",
        |_table: &Table| true,
        move |_table: &Table| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        PredicateKind::Recurrent,
    );

    // No debouncing: a constantly-true recurrent predicate fires every pass.
    assert!(wait_until(FIRING_TIMEOUT, || {
        fired.load(Ordering::SeqCst) >= 10
    }));
}

#[test]
fn test_deferred_start_holds_evaluation() {
    let table = solo_table(TableOptions {
        start_evaluation: false,
        ..Default::default()
    });
    let fired = Arc::new(AtomicU64::new(0));

    let counter = Arc::clone(&fired);
    table.predicates().insert(
        "always-true",
        |_table: &Table| true,
        move |_table: &Table| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        PredicateKind::OneTime,
    );

    thread::sleep(Duration::from_millis(50));
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    table.start_predicate_evaluation();
    assert!(wait_until(FIRING_TIMEOUT, || fired.load(Ordering::SeqCst) == 1));
}

#[test]
fn test_removed_entry_stops_firing() {
    let table = solo_table(TableOptions::default());
    let fired = Arc::new(AtomicU64::new(0));

    let counter = Arc::clone(&fired);
    let handle = table.predicates().insert(
        "always-true",
        |_table: &Table| true,
        move |_table: &Table| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        PredicateKind::Recurrent,
    );

    assert!(wait_until(FIRING_TIMEOUT, || fired.load(Ordering::SeqCst) >= 1));
    table.predicates().remove(handle);

    // Removal lands at the next pass; after a settling delay the count is flat.
    thread::sleep(Duration::from_millis(20));
    let settled = fired.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(fired.load(Ordering::SeqCst), settled);
}

#[test]
fn test_trigger_may_insert_predicates() {
    let table = solo_table(TableOptions::default());
    let fired = Arc::new(AtomicU64::new(0));

    let outer_counter = Arc::clone(&fired);
    table.predicates().insert(
        "outer",
        |_table: &Table| true,
        move |table: &Table| {
            outer_counter.fetch_add(1, Ordering::SeqCst);
            let inner_counter = Arc::clone(&outer_counter);
            table.predicates().insert(
                "inner",
                |_table: &Table| true,
                move |_table: &Table| {
                    inner_counter.fetch_add(1, Ordering::SeqCst);
                },
                PredicateKind::OneTime,
            );
        },
        PredicateKind::OneTime,
    );

    // The inner entry becomes visible no later than the next full pass.
    assert!(wait_until(FIRING_TIMEOUT, || fired.load(Ordering::SeqCst) == 2));
}

#[test]
fn test_panicking_trigger_is_isolated_and_reported() {
    let events: Arc<Mutex<Vec<FailureEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&events);
    let table = solo_table(TableOptions {
        failure_upcall: Some(Arc::new(move |event| recorded.lock().push(event))),
        ..Default::default()
    });

    let healthy_fires = Arc::new(AtomicU64::new(0));

    table.predicates().insert(
        "faulty",
        |_table: &Table| true,
        |_table: &Table| panic!("reactor exploded"),
        PredicateKind::Recurrent,
    );
    let counter = Arc::clone(&healthy_fires);
    table.predicates().insert(
        "healthy",
        |_table: &Table| true,
        move |_table: &Table| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        PredicateKind::Recurrent,
    );

    assert!(wait_until(FIRING_TIMEOUT, || !events.lock().is_empty()));

    // The healthy reactor keeps firing after the faulty one is removed.
    let baseline = healthy_fires.load(Ordering::SeqCst);
    assert!(wait_until(FIRING_TIMEOUT, || {
        healthy_fires.load(Ordering::SeqCst) > baseline + 10
    }));

    let events = events.lock();
    assert_eq!(events.len(), 1);
    match &events[0] {
        FailureEvent::TriggerPanicked { name, message, .. } => {
            assert_eq!(name, "faulty");
            assert!(message.contains("reactor exploded"));
        }
        other => panic!("unexpected failure event: {other:?}"),
    }
}

#[test]
fn test_recurrent_round_predicate_fires_once_per_round() {
    init_tracing();
    let hub = Arc::new(MemHub::new());
    let rendezvous = Arc::new(LocalRendezvous::new());
    let members = ids(2);

    let build = |local: ParticipantId| {
        let membership = Membership::new(members.clone(), local).unwrap();
        let mut builder = TableBuilder::new(membership, hub.clone(), rendezvous.clone());
        let round = builder.scalar::<u64>("round");
        let ack = builder.scalar::<u64>("ack");
        (builder.build(TableOptions::default()).unwrap(), round, ack)
    };
    let (writer, round, ack) = build(ParticipantId(0));
    let (reader, _, _) = build(ParticipantId(1));

    let observed: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let last_seen = Arc::new(AtomicU64::new(0));

    let reader_round = reader.scalar_view(round);
    let reader_ack = reader.scalar_view(ack);
    {
        let log = Arc::clone(&observed);
        let seen = Arc::clone(&last_seen);
        let predicate_round = reader_round.clone();
        let predicate_seen = Arc::clone(&last_seen);
        reader.predicates().insert(
            "round-advanced",
            move |_table: &Table| predicate_round.get(0) > predicate_seen.load(Ordering::SeqCst),
            move |table: &Table| {
                let current = reader_round.get(0);
                log.lock().push(current);
                seen.store(current, Ordering::SeqCst);
                reader_ack.set(current);
                table.put();
            },
            PredicateKind::Recurrent,
        );
    }

    let writer_round = writer.scalar_view(round);
    let writer_ack = writer.scalar_view(ack);
    for r in 1..=3u64 {
        writer_round.set(r);
        writer.put();
        // Wait for the reader's trigger to acknowledge before advancing, so
        // every round is distinctly observable.
        assert!(wait_until(FIRING_TIMEOUT, || writer_ack.get(1) == r));
    }

    assert_eq!(*observed.lock(), vec![1, 2, 3]);
}

#[test]
fn test_counting_protocol_converges() {
    init_tracing();
    const LIMIT: u64 = 100;

    let hub = Arc::new(MemHub::new());
    let rendezvous = Arc::new(LocalRendezvous::new());
    let members = ids(3);

    let mut participants = Vec::new();
    for &local in &members {
        let hub = hub.clone();
        let rendezvous = rendezvous.clone();
        let members = members.clone();
        participants.push(thread::spawn(move || {
            let membership = Membership::new(members, local).unwrap();
            let mut builder = TableBuilder::new(membership, hub, rendezvous);
            let count = builder.scalar::<u64>("count");
            let table = builder
                .build(TableOptions {
                    start_evaluation: false,
                    ..Default::default()
                })
                .unwrap();
            let view = table.scalar_view(count);

            // Initial values land everywhere before predicates may observe
            // remote rows.
            view.set(0);
            table.put_with_completion();
            table.sync_with_members().unwrap();

            let rows = table.num_rows();
            {
                let predicate_view = view.clone();
                let trigger_view = view.clone();
                table.predicates().insert(
                    "count-up",
                    move |_table: &Table| {
                        let local = predicate_view.local();
                        local < LIMIT && (0..rows).all(|row| predicate_view.get(row) >= local)
                    },
                    move |table: &Table| {
                        trigger_view.set(trigger_view.local() + 1);
                        let (offset, len) = trigger_view.byte_range();
                        table.put_range(offset, len);
                    },
                    PredicateKind::Recurrent,
                );
            }
            table.start_predicate_evaluation();

            assert!(wait_until(Duration::from_secs(10), || {
                (0..rows).all(|row| view.get(row) >= LIMIT)
            }));

            // Everyone drains before any table is torn down.
            table.sync_with_members().unwrap();
            table
        }));
    }

    for participant in participants {
        let table = participant.join().unwrap();
        drop(table);
    }
}
