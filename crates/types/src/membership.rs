//! Ordered membership list for a table epoch.

use crate::ParticipantId;
use thiserror::Error;

/// Errors from membership construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipError {
    /// The membership list was empty.
    #[error("membership list is empty")]
    Empty,

    /// A participant appeared more than once.
    #[error("duplicate participant {0} in membership list")]
    Duplicate(ParticipantId),

    /// The local participant is not in the list.
    #[error("local participant {0} not found in membership list")]
    LocalNotFound(ParticipantId),
}

/// The ordered set of participants sharing a table, plus the local identity.
///
/// The order of this list is the row order of the table: participant `i` in
/// the list owns row `i`. Every participant must construct its table from an
/// identical list or row interpretation diverges; the schema fingerprint
/// exchanged at rendezvous catches field-layout divergence, but member order
/// is validated only by convention.
///
/// A membership is immutable. Membership changes require a new epoch, which
/// means constructing a new table over the updated list.
#[derive(Debug, Clone)]
pub struct Membership {
    members: Vec<ParticipantId>,
    local_index: usize,
}

impl Membership {
    /// Validate and build a membership from an ordered participant list.
    pub fn new(
        members: Vec<ParticipantId>,
        local_id: ParticipantId,
    ) -> Result<Self, MembershipError> {
        if members.is_empty() {
            return Err(MembershipError::Empty);
        }
        for (i, id) in members.iter().enumerate() {
            if members[..i].contains(id) {
                return Err(MembershipError::Duplicate(*id));
            }
        }
        let local_index = members
            .iter()
            .position(|id| *id == local_id)
            .ok_or(MembershipError::LocalNotFound(local_id))?;

        Ok(Self {
            members,
            local_index,
        })
    }

    /// Number of participants (and therefore rows).
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false; construction rejects empty lists.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Row index of the local participant.
    pub fn local_index(&self) -> usize {
        self.local_index
    }

    /// Identity of the local participant.
    pub fn local_id(&self) -> ParticipantId {
        self.members[self.local_index]
    }

    /// Identity of the participant owning a row.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of range.
    pub fn id_at(&self, row: usize) -> ParticipantId {
        self.members[row]
    }

    /// Row index of a participant, if it is a member.
    pub fn index_of(&self, id: ParticipantId) -> Option<usize> {
        self.members.iter().position(|m| *m == id)
    }

    /// Iterate over members in row order.
    pub fn iter(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.members.iter().copied()
    }

    /// All row indices except the local one.
    pub fn remote_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.members.len()).filter(move |row| *row != self.local_index)
    }

    /// All row indices, local included.
    pub fn all_indices(&self) -> impl Iterator<Item = usize> {
        0..self.members.len()
    }
}
