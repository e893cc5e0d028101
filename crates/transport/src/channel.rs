//! One-sided write channel traits.

use rowsync_types::{ParticipantId, SharedBytes};
use thiserror::Error;

/// Errors from transport operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer never became reachable.
    #[error("peer {0} is unavailable")]
    PeerUnavailable(ParticipantId),

    /// The channel's peer has failed; no further writes will land.
    #[error("channel to peer {0} has failed")]
    ChannelFailed(ParticipantId),

    /// The requested byte range exceeds the channel's configured span.
    #[error("write range {offset}+{len} exceeds channel span of {span} bytes")]
    OutOfRange {
        offset: usize,
        len: usize,
        span: usize,
    },
}

/// Configuration for a channel between the local participant and one peer.
///
/// A channel is bound at construction to exactly one byte span: the local
/// row's range in the local arena, mapped onto the same logical range on the
/// peer's side. Writes are expressed relative to that span.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// The local participant.
    pub local: ParticipantId,
    /// The remote participant this channel writes to.
    pub peer: ParticipantId,
    /// The local arena containing the source bytes.
    pub source: SharedBytes,
    /// Byte offset of the local row within `source`.
    pub source_base: usize,
    /// Byte offset of the local row within the peer's arena. Identical row
    /// layouts on both sides make this equal to `source_base` in practice.
    pub remote_base: usize,
    /// Length of the addressable span (the row stride).
    pub span: usize,
    /// Symmetry flag for transports whose connection handshake is ordered
    /// (e.g. the lower-id side initiates).
    pub initiator: bool,
}

/// Factory for per-peer channels.
pub trait Transport: Send + Sync {
    /// Open a one-sided write channel described by `config`.
    fn open_channel(&self, config: ChannelConfig) -> Result<Box<dyn Channel>, TransportError>;
}

/// A one-sided write channel to a single peer.
///
/// Offsets are relative to the span the channel was configured with.
pub trait Channel: Send + Sync {
    /// Issue a one-sided write of `len` bytes at `offset`. Returns once the
    /// write is issued, not once it is visible remotely.
    fn write(&self, offset: usize, len: usize) -> Result<(), TransportError>;

    /// Like [`Channel::write`], but blocks until the transport confirms the
    /// write landed at the peer.
    fn write_with_completion(&self, offset: usize, len: usize) -> Result<(), TransportError>;

    /// Poll whether the peer has been reported failed.
    fn is_failed(&self) -> bool;
}
