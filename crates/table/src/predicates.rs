//! The reactive predicate/trigger engine.
//!
//! A registry of `(predicate, trigger, kind)` entries evaluated against the
//! live table by a dedicated background thread. The loop busy-polls: remote
//! writes land asynchronously, and the cost of spinning buys minimum latency
//! between a write becoming visible and the matching trigger firing.
//!
//! Entries may be inserted from any thread, including from inside a running
//! trigger. Inserts and removals land in a pending set behind a mutex and are
//! drained at the start of the next pass, so the evaluator itself iterates an
//! unshared list and new entries become visible no later than one full pass
//! after insertion.
//!
//! A panicking trigger is caught, logged, reported through the table's
//! failure upcall, and its entry removed, so one misbehaving reactor cannot
//! take down every protocol sharing the loop.

use crate::metrics;
use crate::table::{FailureEvent, Table};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Lifetime of a predicate entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateKind {
    /// Removed after its trigger fires once; never evaluated again.
    OneTime,
    /// Re-evaluated on every pass. The predicate is responsible for its own
    /// debouncing state (e.g. a last-seen round number); the engine re-fires
    /// whenever the predicate reads true.
    Recurrent,
}

/// Handle returned by [`Predicates::insert`], used for explicit removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PredicateHandle(u64);

pub(crate) type PredicateFn = Box<dyn Fn(&Table) -> bool + Send>;
pub(crate) type TriggerFn = Box<dyn FnMut(&Table) + Send>;

pub(crate) struct Entry {
    handle: PredicateHandle,
    name: String,
    predicate: PredicateFn,
    trigger: TriggerFn,
    kind: PredicateKind,
}

#[derive(Default)]
struct Pending {
    inserts: Vec<Entry>,
    removals: HashSet<PredicateHandle>,
    next_id: u64,
}

/// Registry of predicate entries, shared between application threads and the
/// evaluator loop.
#[derive(Default)]
pub struct Predicates {
    pending: Mutex<Pending>,
}

impl Predicates {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a predicate and its trigger.
    ///
    /// The entry becomes visible to the evaluator no later than the start of
    /// its next pass. Safe to call from any thread, including from inside a
    /// trigger body.
    pub fn insert<P, T>(
        &self,
        name: impl Into<String>,
        predicate: P,
        trigger: T,
        kind: PredicateKind,
    ) -> PredicateHandle
    where
        P: Fn(&Table) -> bool + Send + 'static,
        T: FnMut(&Table) + Send + 'static,
    {
        let name = name.into();
        let mut pending = self.pending.lock();
        let handle = PredicateHandle(pending.next_id);
        pending.next_id += 1;
        pending.inserts.push(Entry {
            handle,
            name: name.clone(),
            predicate: Box::new(predicate),
            trigger: Box::new(trigger),
            kind,
        });
        trace!(name = %name, ?handle, ?kind, "predicate registered");
        handle
    }

    /// Request removal of an entry.
    ///
    /// Takes effect at the start of the evaluator's next pass. Removing a
    /// handle that already fired (one-time) or was already removed is a no-op.
    pub fn remove(&self, handle: PredicateHandle) {
        let mut pending = self.pending.lock();
        pending.inserts.retain(|entry| entry.handle != handle);
        pending.removals.insert(handle);
    }

    fn drain(&self) -> (Vec<Entry>, HashSet<PredicateHandle>) {
        let mut pending = self.pending.lock();
        (
            std::mem::take(&mut pending.inserts),
            std::mem::take(&mut pending.removals),
        )
    }
}

enum Outcome {
    Idle,
    Fired,
    Panicked(String),
}

fn evaluate_entry(table: &Table, entry: &mut Entry) -> Outcome {
    match catch_unwind(AssertUnwindSafe(|| {
        if (entry.predicate)(table) {
            (entry.trigger)(table);
            true
        } else {
            false
        }
    })) {
        Ok(true) => Outcome::Fired,
        Ok(false) => Outcome::Idle,
        Err(payload) => Outcome::Panicked(panic_message(payload)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Body of the evaluator thread.
///
/// Waits on the table's start gate, then loops until shutdown: drain pending
/// registry operations, evaluate every entry in insertion order, run
/// newly-true predicates' triggers inline on this thread.
pub(crate) fn run_evaluator(table: Arc<Table>) {
    table.wait_for_start();
    debug!("predicate evaluator started");

    let mut active: Vec<Entry> = Vec::new();
    while !table.is_shutdown() {
        let (inserts, removals) = table.predicates().drain();
        if !removals.is_empty() {
            active.retain(|entry| !removals.contains(&entry.handle));
        }
        active.extend(inserts);

        let mut index = 0;
        while index < active.len() {
            match evaluate_entry(&table, &mut active[index]) {
                Outcome::Idle => index += 1,
                Outcome::Fired => {
                    metrics::record_predicate_fire();
                    let entry = &active[index];
                    trace!(name = %entry.name, handle = ?entry.handle, "trigger fired");
                    if entry.kind == PredicateKind::OneTime {
                        active.remove(index);
                    } else {
                        index += 1;
                    }
                }
                Outcome::Panicked(message) => {
                    metrics::record_trigger_panic();
                    let entry = active.remove(index);
                    warn!(
                        name = %entry.name,
                        handle = ?entry.handle,
                        message = %message,
                        "removing predicate entry after panic"
                    );
                    table.report_failure(FailureEvent::TriggerPanicked {
                        handle: entry.handle,
                        name: entry.name,
                        message,
                    });
                }
            }
        }

        metrics::record_evaluator_pass(active.len());
        std::hint::spin_loop();
    }

    debug!("predicate evaluator stopped");
}
