//! Out-of-band barrier synchronization.

use rowsync_types::{ParticipantId, SchemaFingerprint};
use thiserror::Error;

/// Errors from barrier synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RendezvousError {
    /// Participants reached the barrier with different schema fingerprints,
    /// meaning their tables declared fields in different orders or with
    /// different types. Continuing would silently misinterpret remote rows.
    #[error("schema fingerprint mismatch across barrier participants")]
    SchemaMismatch,
}

/// A synchronous barrier keyed by participant identity.
///
/// Used at table construction time to establish a point after which every
/// participant's initial row values have been written, so predicates never
/// observe uninitialized remote rows. The barrier doubles as the schema
/// agreement check: each caller presents its layout fingerprint and the
/// barrier fails for everyone if any two differ.
pub trait Rendezvous: Send + Sync {
    /// Block until every participant in `peers` has made the same call with
    /// the same peer set. Returns [`RendezvousError::SchemaMismatch`] for all
    /// callers if fingerprints diverge.
    fn sync(
        &self,
        local: ParticipantId,
        peers: &[ParticipantId],
        fingerprint: SchemaFingerprint,
    ) -> Result<(), RendezvousError>;
}
