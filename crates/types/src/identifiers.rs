//! Participant identifiers.

use std::fmt;

/// The identity of a participant in a table.
///
/// Participant IDs are assigned by the surrounding deployment (they are node
/// identities, not row numbers). A participant's row index is its position in
/// the [`Membership`](crate::Membership) list, which need not match its ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticipantId(pub u32);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl From<u32> for ParticipantId {
    fn from(id: u32) -> Self {
        ParticipantId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ParticipantId(7).to_string(), "p7");
    }

    #[test]
    fn test_ordering() {
        assert!(ParticipantId(1) < ParticipantId(2));
        assert_eq!(ParticipantId(3), ParticipantId::from(3));
    }
}
