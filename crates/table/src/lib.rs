//! Replicated shared-state table with a reactive predicate/trigger engine.
//!
//! A table gives each participant one row of typed fields in a shared,
//! row-major byte arena. The local participant writes only its own row and
//! propagates it to peers with one-sided writes ([`Table::put`] and friends);
//! peers' rows arrive the same way and are read as eventually consistent. A
//! dedicated background thread continuously evaluates registered predicates
//! against the live table and fires their triggers the moment a remote write
//! makes one true, which is what higher layers (multicast delivery, parameter
//! averaging, membership protocols) build their reactivity on.
//!
//! # Usage
//!
//! ```no_run
//! use rowsync_table::{PredicateKind, TableBuilder, TableOptions};
//! use rowsync_transport::{LocalRendezvous, MemHub};
//! use rowsync_types::{Membership, ParticipantId};
//! use std::sync::Arc;
//!
//! let membership = Membership::new(
//!     vec![ParticipantId(0), ParticipantId(1)],
//!     ParticipantId(0),
//! )?;
//! let mut builder = TableBuilder::new(
//!     membership,
//!     Arc::new(MemHub::new()),
//!     Arc::new(LocalRendezvous::new()),
//! );
//! let round = builder.scalar::<u64>("round");
//! let table = builder.build(TableOptions::default())?;
//!
//! let view = table.scalar_view(round);
//! view.set(1);
//! table.put();
//! table.sync_with_members()?;
//!
//! table.predicates().insert(
//!     "round-advanced",
//!     {
//!         let view = view.clone();
//!         move |table| (0..table.num_rows()).all(|row| view.get(row) >= 1)
//!     },
//!     |_table| println!("everyone reached round 1"),
//!     PredicateKind::OneTime,
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Lifecycle
//!
//! A table is built once per membership epoch. [`TableHandle`] owns the two
//! background threads (predicate evaluator, failure detector) and joins them
//! on drop before releasing the arena. Membership changes mean building a new
//! table; rows and field offsets never change within one instance.

pub mod metrics;

mod field;
mod layout;
mod predicates;
mod table;

pub use field::{FieldValue, ScalarDecl, ScalarField, VectorDecl, VectorField};
pub use layout::{FieldInfo, LayoutError, RowLayout, ALIGN};
pub use predicates::{PredicateHandle, PredicateKind, Predicates};
pub use table::{
    FailureEvent, FailureUpcall, Table, TableBuilder, TableError, TableHandle, TableOptions,
};
