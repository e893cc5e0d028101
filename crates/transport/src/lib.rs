//! Transport and rendezvous boundary for the rowsync table.
//!
//! The table propagates its local row with one-sided writes and synchronizes
//! construction with an out-of-band barrier. Both are external collaborators
//! specified here as traits:
//!
//! - [`Transport`] / [`Channel`]: a per-peer one-sided byte-range write with
//!   optional completion acknowledgment and a liveness poll
//! - [`Rendezvous`]: a barrier keyed by participant identity that also
//!   compares schema fingerprints to fail fast on layout divergence
//!
//! The [`mem`] module provides a deterministic in-process implementation of
//! both, used by tests and multi-participant harnesses. It supports failure
//! injection and seeded latency jitter.

mod channel;
mod rendezvous;

pub mod mem;

pub use channel::{Channel, ChannelConfig, Transport, TransportError};
pub use mem::{LocalRendezvous, MemHub, MemHubConfig};
pub use rendezvous::{Rendezvous, RendezvousError};
