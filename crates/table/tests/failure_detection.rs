//! Failure detection, row freezing, and put target exclusion.

mod common;

use common::{ids, init_tracing, wait_until};
use parking_lot::Mutex;
use rowsync_table::{FailureEvent, TableBuilder, TableOptions};
use rowsync_transport::{LocalRendezvous, MemHub, MemHubConfig};
use rowsync_types::{Membership, ParticipantId};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const DETECT_TIMEOUT: Duration = Duration::from_secs(2);

#[test]
fn test_detected_failure_freezes_row_and_excludes_it_from_puts() {
    init_tracing();
    let hub = Arc::new(MemHub::new());
    let rendezvous = Arc::new(LocalRendezvous::new());
    let members = ids(2);

    let events: Arc<Mutex<Vec<FailureEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&events);

    let build = |local: ParticipantId, upcall: Option<rowsync_table::FailureUpcall>| {
        let membership = Membership::new(members.clone(), local).unwrap();
        let mut builder = TableBuilder::new(membership, hub.clone(), rendezvous.clone());
        let value = builder.scalar::<u64>("value");
        (
            builder
                .build(TableOptions {
                    failure_upcall: upcall,
                    ..Default::default()
                })
                .unwrap(),
            value,
        )
    };
    let (a, value) = build(
        ParticipantId(0),
        Some(Arc::new(move |event| recorded.lock().push(event))),
    );
    let (b, _) = build(ParticipantId(1), None);

    let a_value = a.scalar_view(value);
    let b_value = b.scalar_view(value);

    a_value.set(1);
    a.put_with_completion();
    assert_eq!(b_value.get(0), 1);

    hub.fail(ParticipantId(1));
    assert!(wait_until(DETECT_TIMEOUT, || a.is_frozen(1)));

    // Exactly one upcall, even though the detector keeps polling.
    thread::sleep(Duration::from_millis(20));
    {
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            FailureEvent::PeerFailed {
                participant: ParticipantId(1),
                row: 1
            }
        ));
    }

    // Frozen rows are skipped: the peer's copy stays at last-received state.
    a_value.set(2);
    a.put();
    a.put_with_completion();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(a_value.local(), 2);
    assert_eq!(b_value.get(0), 1);
}

#[test]
fn test_write_failure_during_put_freezes_row() {
    init_tracing();
    // The peer never constructs its table, so the first write cannot resolve
    // the remote arena and reports the peer unavailable.
    let hub = Arc::new(MemHub::with_config(MemHubConfig {
        attach_timeout: Duration::from_millis(50),
        ..Default::default()
    }));
    let rendezvous = Arc::new(LocalRendezvous::new());

    let events: Arc<Mutex<Vec<FailureEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&events);

    let membership = Membership::new(ids(2), ParticipantId(0)).unwrap();
    let mut builder = TableBuilder::new(membership, hub, rendezvous);
    let value = builder.scalar::<u64>("value");
    let table = builder
        .build(TableOptions {
            failure_upcall: Some(Arc::new(move |event| recorded.lock().push(event))),
            ..Default::default()
        })
        .unwrap();

    table.scalar_view(value).set(3);
    // Returns normally: transport failures freeze the row instead of
    // escalating to the caller.
    table.put();

    assert!(table.is_frozen(1));
    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        FailureEvent::PeerFailed {
            participant: ParticipantId(1),
            row: 1
        }
    ));
}

#[test]
fn test_explicitly_frozen_row_is_skipped() {
    init_tracing();
    let hub = Arc::new(MemHub::new());
    let rendezvous = Arc::new(LocalRendezvous::new());
    let members = ids(3);

    let build = |local: ParticipantId| {
        let membership = Membership::new(members.clone(), local).unwrap();
        let mut builder = TableBuilder::new(membership, hub.clone(), rendezvous.clone());
        let value = builder.scalar::<u64>("value");
        (builder.build(TableOptions::default()).unwrap(), value)
    };
    let (a, value) = build(ParticipantId(0));
    let (b, _) = build(ParticipantId(1));
    let (c, _) = build(ParticipantId(2));

    a.freeze(2);
    a.scalar_view(value).set(9);
    a.put_with_completion();

    assert_eq!(b.scalar_view(value).get(0), 9);
    assert_eq!(c.scalar_view(value).get(0), 0);
}

#[test]
fn test_frozen_row_remains_readable() {
    init_tracing();
    let hub = Arc::new(MemHub::new());
    let rendezvous = Arc::new(LocalRendezvous::new());
    let members = ids(2);

    let build = |local: ParticipantId| {
        let membership = Membership::new(members.clone(), local).unwrap();
        let mut builder = TableBuilder::new(membership, hub.clone(), rendezvous.clone());
        let value = builder.scalar::<u64>("value");
        (builder.build(TableOptions::default()).unwrap(), value)
    };
    let (a, value) = build(ParticipantId(0));
    let (b, _) = build(ParticipantId(1));

    b.scalar_view(value).set(77);
    b.put_with_completion();

    let a_view = a.scalar_view(value);
    assert_eq!(a_view.get(1), 77);

    hub.fail(ParticipantId(1));
    assert!(wait_until(DETECT_TIMEOUT, || a.is_frozen(1)));

    // Stale but stable: the last-received value stays readable indefinitely.
    assert_eq!(a_view.get(1), 77);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(a_view.get(1), 77);
}
