//! The table: row memory, put propagation, row freezing, barrier sync.
//!
//! A table owns one contiguous arena of `rows * stride` bytes, one row per
//! participant in membership order. The local participant writes only its own
//! row and propagates it with one-sided writes over a per-peer channel; remote
//! rows are written by peers through the transport and read locally as
//! eventually consistent.
//!
//! Construction returns a [`TableHandle`], an owning handle whose `Drop`
//! stops the two background threads (predicate evaluator, failure detector)
//! and joins them before the arena and channels are released.

use crate::field::{FieldValue, ScalarDecl, ScalarField, VectorDecl, VectorField};
use crate::layout::{FieldSpec, LayoutError, RowLayout};
use crate::metrics;
use crate::predicates::{self, PredicateHandle, Predicates};
use parking_lot::{Condvar, Mutex};
use rowsync_transport::{Channel, ChannelConfig, Rendezvous, RendezvousError, Transport, TransportError};
use rowsync_types::{Membership, ParticipantId, SchemaFingerprint, SharedBytes};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Poll interval of the failure detector thread. Failure latency is transport
/// policy; the detector only has to notice it eventually.
const DETECT_INTERVAL: Duration = Duration::from_millis(1);

/// Errors from table construction and synchronization.
#[derive(Debug, Error)]
pub enum TableError {
    /// A field declaration was invalid.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// `already_failed` must have one entry per row when present.
    #[error("already_failed has {got} entries for a table of {expected} rows")]
    AlreadyFailedLength { expected: usize, got: usize },

    /// A channel could not be opened at construction time.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The construction barrier failed.
    #[error(transparent)]
    Rendezvous(#[from] RendezvousError),

    /// A background thread could not be spawned.
    #[error("failed to spawn background thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Notification delivered through the failure upcall.
#[derive(Debug, Clone)]
pub enum FailureEvent {
    /// A remote peer's channel reported failure and its row was frozen.
    PeerFailed {
        participant: ParticipantId,
        row: usize,
    },
    /// A trigger panicked and its entry was removed from the engine.
    TriggerPanicked {
        handle: PredicateHandle,
        name: String,
        message: String,
    },
}

/// The single notification channel for remote-liveness problems and reactor
/// faults. Invoked from background threads; must not block for long.
pub type FailureUpcall = Arc<dyn Fn(FailureEvent) + Send + Sync>;

/// Construction options for a table.
pub struct TableOptions {
    /// Called once per frozen row and once per removed panicking trigger.
    pub failure_upcall: Option<FailureUpcall>,
    /// Rows already known dead at construction, one flag per row. Pre-failed
    /// rows are frozen from birth: no channel is opened to them and no upcall
    /// fires. Empty means no row is pre-failed.
    pub already_failed: Vec<bool>,
    /// Whether the predicate evaluator starts immediately. When false, no
    /// predicate is evaluated until [`Table::start_predicate_evaluation`] is
    /// called, so initial row values can be written and synchronized first.
    pub start_evaluation: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            failure_upcall: None,
            already_failed: Vec::new(),
            start_evaluation: true,
        }
    }
}

/// Declares fields and builds a [`TableHandle`].
///
/// Fields must be declared in the same order on every participant; the layout
/// fingerprint presented at the construction barrier fails the whole group if
/// declarations diverge. The builder is consumed by [`TableBuilder::build`],
/// so declaring fields after construction is unrepresentable.
pub struct TableBuilder {
    membership: Membership,
    transport: Arc<dyn Transport>,
    rendezvous: Arc<dyn Rendezvous>,
    specs: Vec<FieldSpec>,
}

impl TableBuilder {
    /// Start building a table for one membership epoch.
    pub fn new(
        membership: Membership,
        transport: Arc<dyn Transport>,
        rendezvous: Arc<dyn Rendezvous>,
    ) -> Self {
        Self {
            membership,
            transport,
            rendezvous,
            specs: Vec::new(),
        }
    }

    /// Declare a scalar field. Order of declaration determines byte offsets.
    pub fn scalar<T: FieldValue>(&mut self, name: &str) -> ScalarDecl<T> {
        let field = self.specs.len();
        self.specs.push(FieldSpec {
            name: name.to_owned(),
            type_tag: T::TAG,
            elem_size: T::SIZE,
            elem_count: 1,
        });
        ScalarDecl {
            field,
            _ty: PhantomData,
        }
    }

    /// Declare a fixed-length vector field. The length never changes after
    /// construction.
    pub fn vector<T: FieldValue>(&mut self, name: &str, len: usize) -> VectorDecl<T> {
        let field = self.specs.len();
        self.specs.push(FieldSpec {
            name: name.to_owned(),
            type_tag: T::TAG,
            elem_size: T::SIZE,
            elem_count: len,
        });
        VectorDecl {
            field,
            _ty: PhantomData,
        }
    }

    /// Allocate the arena, open one channel per live remote, and start the
    /// background threads.
    pub fn build(self, options: TableOptions) -> Result<TableHandle, TableError> {
        let layout = RowLayout::new(self.specs)?;
        let fingerprint = layout.fingerprint();
        let rows = self.membership.len();
        if !options.already_failed.is_empty() && options.already_failed.len() != rows {
            return Err(TableError::AlreadyFailedLength {
                expected: rows,
                got: options.already_failed.len(),
            });
        }

        let stride = layout.stride();
        let arena = SharedBytes::zeroed(rows * stride);
        let local = self.membership.local_index();
        let local_id = self.membership.local_id();

        let mut frozen = Vec::with_capacity(rows);
        let mut frozen_rows = 0;
        for row in 0..rows {
            let pre_failed =
                row != local && options.already_failed.get(row).copied().unwrap_or(false);
            if pre_failed {
                frozen_rows += 1;
            }
            frozen.push(AtomicBool::new(pre_failed));
        }

        // One channel per live remote. Pre-failed rows get no channel at all,
        // matching their exclusion from every future put.
        let mut channels: Vec<Option<Box<dyn Channel>>> = Vec::with_capacity(rows);
        for (row, flag) in frozen.iter().enumerate() {
            if row == local || flag.load(Ordering::Relaxed) {
                channels.push(None);
                continue;
            }
            let peer = self.membership.id_at(row);
            let channel = self.transport.open_channel(ChannelConfig {
                local: local_id,
                peer,
                source: arena.clone(),
                source_base: local * stride,
                remote_base: local * stride,
                span: stride,
                initiator: local_id < peer,
            })?;
            channels.push(Some(channel));
        }

        let table = Arc::new(Table {
            arena,
            layout,
            fingerprint,
            membership: self.membership,
            channels,
            frozen,
            frozen_rows: AtomicUsize::new(frozen_rows),
            freeze_lock: Mutex::new(()),
            upcall: options.failure_upcall,
            predicates: Predicates::new(),
            rendezvous: self.rendezvous,
            shutdown: AtomicBool::new(false),
            start_gate: StartGate::new(),
        });

        info!(
            participant = %local_id,
            rows,
            stride,
            local_row = local,
            fingerprint = %fingerprint,
            "table constructed"
        );

        // Threads are pushed as they spawn so an error drops the handle and
        // joins whatever already started.
        let mut handle = TableHandle {
            table: Arc::clone(&table),
            threads: Vec::with_capacity(2),
        };
        handle.threads.push(
            thread::Builder::new()
                .name("rowsync-evaluator".to_owned())
                .spawn({
                    let table = Arc::clone(&table);
                    move || predicates::run_evaluator(table)
                })?,
        );
        handle.threads.push(
            thread::Builder::new()
                .name("rowsync-detector".to_owned())
                .spawn({
                    let table = Arc::clone(&table);
                    move || Table::detect(table)
                })?,
        );

        if options.start_evaluation {
            table.start_predicate_evaluation();
        }

        Ok(handle)
    }
}

struct StartGate {
    started: Mutex<bool>,
    condvar: Condvar,
}

impl StartGate {
    fn new() -> Self {
        Self {
            started: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn open(&self) {
        *self.started.lock() = true;
        self.condvar.notify_all();
    }
}

/// The replicated shared-state table.
///
/// Obtained through a [`TableHandle`]; application code, triggers, and the
/// background threads all operate on `&Table`.
pub struct Table {
    arena: SharedBytes,
    layout: RowLayout,
    fingerprint: SchemaFingerprint,
    membership: Membership,
    channels: Vec<Option<Box<dyn Channel>>>,
    frozen: Vec<AtomicBool>,
    frozen_rows: AtomicUsize,
    freeze_lock: Mutex<()>,
    upcall: Option<FailureUpcall>,
    predicates: Predicates,
    rendezvous: Arc<dyn Rendezvous>,
    shutdown: AtomicBool,
    start_gate: StartGate,
}

impl Table {
    /// Bind a scalar declaration to a typed view.
    pub fn scalar_view<T: FieldValue>(&self, decl: ScalarDecl<T>) -> ScalarField<T> {
        let info = self.layout.field(decl.field);
        ScalarField::new(
            self.arena.clone(),
            info.offset,
            self.layout.stride(),
            self.num_rows(),
            self.local_index(),
        )
    }

    /// Bind a vector declaration to a typed view.
    pub fn vector_view<T: FieldValue>(&self, decl: VectorDecl<T>) -> VectorField<T> {
        let info = self.layout.field(decl.field);
        VectorField::new(
            self.arena.clone(),
            info.offset,
            self.layout.stride(),
            self.num_rows(),
            self.local_index(),
            info.elem_count,
        )
    }

    /// The predicate/trigger registry.
    pub fn predicates(&self) -> &Predicates {
        &self.predicates
    }

    /// Number of rows (and participants).
    pub fn num_rows(&self) -> usize {
        self.membership.len()
    }

    /// Row index of the local participant.
    pub fn local_index(&self) -> usize {
        self.membership.local_index()
    }

    /// Identity of the participant owning a row.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of range.
    pub fn member_id(&self, row: usize) -> ParticipantId {
        self.membership.id_at(row)
    }

    /// Length of one row in bytes.
    pub fn stride(&self) -> usize {
        self.layout.stride()
    }

    /// The computed row layout: every field's placement, in declaration order.
    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    /// Digest of the field declarations, as presented at the barrier.
    pub fn fingerprint(&self) -> SchemaFingerprint {
        self.fingerprint
    }

    /// Whether a row has been frozen.
    pub fn is_frozen(&self, row: usize) -> bool {
        self.frozen[row].load(Ordering::Relaxed)
    }

    /// Number of rows currently frozen, pre-failed rows included.
    pub fn num_frozen(&self) -> usize {
        self.frozen_rows.load(Ordering::Relaxed)
    }

    /// Write the entire local row to all remote participants.
    ///
    /// Fire-and-forget: returns once the writes are issued, not once they are
    /// visible remotely. Frozen rows are skipped silently.
    pub fn put(&self) {
        self.put_inner(None, 0, self.stride(), false);
    }

    /// Write the entire local row to the given rows.
    pub fn put_targets(&self, rows: &[usize]) {
        self.put_inner(Some(rows), 0, self.stride(), false);
    }

    /// Write a byte subrange of the local row to all remote participants.
    pub fn put_range(&self, offset: usize, len: usize) {
        self.put_inner(None, offset, len, false);
    }

    /// Write a byte subrange of the local row to the given rows.
    pub fn put_range_targets(&self, rows: &[usize], offset: usize, len: usize) {
        self.put_inner(Some(rows), offset, len, false);
    }

    /// Like [`Table::put`], but blocks until the transport confirms the write
    /// landed at every addressed live remote.
    pub fn put_with_completion(&self) {
        self.put_inner(None, 0, self.stride(), true);
    }

    /// Like [`Table::put_targets`], with completion acknowledgment.
    pub fn put_with_completion_targets(&self, rows: &[usize]) {
        self.put_inner(Some(rows), 0, self.stride(), true);
    }

    /// Like [`Table::put_range`], with completion acknowledgment.
    pub fn put_with_completion_range(&self, offset: usize, len: usize) {
        self.put_inner(None, offset, len, true);
    }

    /// Like [`Table::put_range_targets`], with completion acknowledgment.
    pub fn put_with_completion_range_targets(&self, rows: &[usize], offset: usize, len: usize) {
        self.put_inner(Some(rows), offset, len, true);
    }

    fn put_inner(&self, targets: Option<&[usize]>, offset: usize, len: usize, completion: bool) {
        assert!(
            offset
                .checked_add(len)
                .is_some_and(|end| end <= self.stride()),
            "put range {}+{} exceeds row stride of {} bytes",
            offset,
            len,
            self.stride()
        );

        let mut written = 0;
        let mut write_to = |row: usize| {
            if row == self.local_index() || self.is_frozen(row) {
                return;
            }
            let Some(channel) = &self.channels[row] else {
                return;
            };
            let result = if completion {
                channel.write_with_completion(offset, len)
            } else {
                channel.write(offset, len)
            };
            match result {
                Ok(()) => written += 1,
                // Transport failures never escalate to the caller: the row is
                // frozen, the upcall fires, and the put moves on.
                Err(error) => {
                    warn!(row, %error, "one-sided write failed");
                    self.freeze(row);
                }
            }
        };

        match targets {
            Some(rows) => {
                for &row in rows {
                    assert!(
                        row < self.num_rows(),
                        "put target row {} out of range for table of {} rows",
                        row,
                        self.num_rows()
                    );
                    write_to(row);
                }
            }
            None => {
                for row in 0..self.num_rows() {
                    write_to(row);
                }
            }
        }

        metrics::record_put(len, written);
    }

    /// Mark a remote row as frozen.
    ///
    /// Idempotent; the first call invokes the failure upcall exactly once.
    /// The row's last-received values remain readable indefinitely, and the
    /// row is excluded from all future put targets. Frozen is terminal for
    /// this table instance: recovery means a new table over a new membership.
    ///
    /// # Panics
    ///
    /// Panics if `row` is the local row or out of range.
    pub fn freeze(&self, row: usize) {
        assert!(
            row < self.num_rows(),
            "row {} out of range for table of {} rows",
            row,
            self.num_rows()
        );
        assert!(row != self.local_index(), "cannot freeze the local row");

        {
            let _guard = self.freeze_lock.lock();
            if self.frozen[row].load(Ordering::Relaxed) {
                return;
            }
            self.frozen[row].store(true, Ordering::Relaxed);
            self.frozen_rows.fetch_add(1, Ordering::Relaxed);
        }

        metrics::record_row_frozen();
        let participant = self.member_id(row);
        warn!(row, %participant, "freezing row after peer failure");
        self.report_failure(FailureEvent::PeerFailed { participant, row });
    }

    /// Block until every other live member has reached the same call.
    ///
    /// Establishes the point after which predicates may rely on remote rows
    /// being initialized. Fails for the whole group if any participant
    /// declared a different field layout.
    pub fn sync_with_members(&self) -> Result<(), TableError> {
        let rows: Vec<usize> = self.membership.remote_indices().collect();
        self.sync_with_subset(&rows)
    }

    /// Block until the given rows' members have reached the same call with
    /// the same subset. Frozen and local rows are ignored.
    pub fn sync_with_subset(&self, rows: &[usize]) -> Result<(), TableError> {
        let peers: Vec<ParticipantId> = rows
            .iter()
            .filter(|&&row| row != self.local_index() && !self.is_frozen(row))
            .map(|&row| self.member_id(row))
            .collect();
        debug!(peers = peers.len(), "entering barrier");
        self.rendezvous
            .sync(self.membership.local_id(), &peers, self.fingerprint)?;
        debug!("barrier released");
        Ok(())
    }

    /// Open the start gate for the predicate evaluator.
    ///
    /// A no-op when the table was built with `start_evaluation: true` or the
    /// gate was already opened.
    pub fn start_predicate_evaluation(&self) {
        self.start_gate.open();
    }

    pub(crate) fn wait_for_start(&self) {
        let mut started = self.start_gate.started.lock();
        while !*started && !self.shutdown.load(Ordering::Relaxed) {
            self.start_gate.condvar.wait(&mut started);
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub(crate) fn report_failure(&self, event: FailureEvent) {
        if let Some(upcall) = &self.upcall {
            upcall(event);
        }
    }

    /// Body of the failure detector thread: poll each live remote channel and
    /// freeze rows whose channel reports failure.
    fn detect(table: Arc<Table>) {
        debug!("failure detector started");
        while !table.is_shutdown() {
            for row in 0..table.num_rows() {
                if row == table.local_index() || table.is_frozen(row) {
                    continue;
                }
                if let Some(channel) = &table.channels[row] {
                    if channel.is_failed() {
                        table.freeze(row);
                    }
                }
            }
            thread::sleep(DETECT_INTERVAL);
        }
        debug!("failure detector stopped");
    }
}

/// Owning handle for a table and its background threads.
///
/// `Drop` sets the shutdown flag, opens the start gate so a never-started
/// evaluator can observe it, and joins both threads before the arena and
/// channels are released. Transport writes into freed memory are therefore
/// impossible as long as the handle outlives in-flight local puts, which the
/// blocking put APIs guarantee for the calling thread.
pub struct TableHandle {
    table: Arc<Table>,
    threads: Vec<JoinHandle<()>>,
}

impl Deref for TableHandle {
    type Target = Table;

    fn deref(&self) -> &Table {
        &self.table
    }
}

impl fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableHandle")
            .field("threads", &self.threads.len())
            .finish()
    }
}

impl Drop for TableHandle {
    fn drop(&mut self) {
        self.table.shutdown.store(true, Ordering::SeqCst);
        self.table.start_gate.open();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("background thread panicked during shutdown");
            }
        }
        debug!("table torn down");
    }
}
