//! Room membership registry.
//!
//! Rooms exist only while they have members: the first join creates one and
//! the last leave removes it. A participant is in at most one room.

use std::collections::HashMap;

use huddle_common::{ParticipantId, RoomId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// The participant already joined a room on this connection.
    AlreadyJoined(RoomId),
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub room_id: RoomId,
    /// Members present before the joiner, in join order.
    pub existing: Vec<ParticipantId>,
}

/// Result of a leave that actually removed someone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room_id: RoomId,
    pub remaining: Vec<ParticipantId>,
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    /// room -> members in join order
    rooms: HashMap<RoomId, Vec<ParticipantId>>,
    /// participant -> the room it joined
    memberships: HashMap<ParticipantId, RoomId>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(
        &mut self,
        participant: &ParticipantId,
        room_id: &RoomId,
    ) -> Result<Admission, JoinError> {
        if let Some(current) = self.memberships.get(participant) {
            return Err(JoinError::AlreadyJoined(current.clone()));
        }

        let members = self.rooms.entry(room_id.clone()).or_default();
        let existing = members.clone();
        members.push(participant.clone());
        self.memberships
            .insert(participant.clone(), room_id.clone());

        Ok(Admission {
            room_id: room_id.clone(),
            existing,
        })
    }

    /// Removes `participant` from its room. Returns `None` if it was not in one.
    pub fn leave(&mut self, participant: &ParticipantId) -> Option<Departure> {
        let room_id = self.memberships.remove(participant)?;

        let remaining = match self.rooms.get_mut(&room_id) {
            Some(members) => {
                members.retain(|member| member != participant);
                members.clone()
            }
            None => Vec::new(),
        };
        if remaining.is_empty() {
            self.rooms.remove(&room_id);
        }

        Some(Departure { room_id, remaining })
    }

    pub fn room_of(&self, participant: &ParticipantId) -> Option<&RoomId> {
        self.memberships.get(participant)
    }

    pub fn members(&self, room_id: &RoomId) -> &[ParticipantId] {
        self.rooms
            .get(room_id)
            .map(|members| members.as_slice())
            .unwrap_or(&[])
    }

    pub fn shares_room(&self, a: &ParticipantId, b: &ParticipantId) -> bool {
        match (self.memberships.get(a), self.memberships.get(b)) {
            (Some(room_a), Some(room_b)) => room_a == room_b,
            _ => false,
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn participant_count(&self) -> usize {
        self.memberships.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(id: &str) -> ParticipantId {
        ParticipantId::from(id)
    }

    #[test]
    fn test_join_returns_existing_members_in_order() {
        let mut registry = RoomRegistry::new();
        let room = RoomId::from("r1");

        let first = registry.join(&pid("a"), &room).unwrap();
        assert!(first.existing.is_empty());

        registry.join(&pid("b"), &room).unwrap();
        let third = registry.join(&pid("c"), &room).unwrap();
        assert_eq!(third.existing, vec![pid("a"), pid("b")]);
        assert_eq!(registry.members(&room), &[pid("a"), pid("b"), pid("c")]);
    }

    #[test]
    fn test_second_join_is_rejected() {
        let mut registry = RoomRegistry::new();
        registry.join(&pid("a"), &RoomId::from("r1")).unwrap();

        let err = registry.join(&pid("a"), &RoomId::from("r2")).unwrap_err();
        assert_eq!(err, JoinError::AlreadyJoined(RoomId::from("r1")));
        assert_eq!(registry.room_count(), 1);
        assert_eq!(registry.room_of(&pid("a")), Some(&RoomId::from("r1")));
    }

    #[test]
    fn test_leave_reports_remaining_and_drops_empty_room() {
        let mut registry = RoomRegistry::new();
        let room = RoomId::from("r1");
        registry.join(&pid("a"), &room).unwrap();
        registry.join(&pid("b"), &room).unwrap();

        let departure = registry.leave(&pid("a")).unwrap();
        assert_eq!(departure.room_id, room);
        assert_eq!(departure.remaining, vec![pid("b")]);

        let departure = registry.leave(&pid("b")).unwrap();
        assert!(departure.remaining.is_empty());
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.participant_count(), 0);
    }

    #[test]
    fn test_leave_is_idempotent() {
        let mut registry = RoomRegistry::new();
        assert!(registry.leave(&pid("ghost")).is_none());

        registry.join(&pid("a"), &RoomId::from("r1")).unwrap();
        assert!(registry.leave(&pid("a")).is_some());
        assert!(registry.leave(&pid("a")).is_none());
    }

    #[test]
    fn test_shares_room() {
        let mut registry = RoomRegistry::new();
        registry.join(&pid("a"), &RoomId::from("r1")).unwrap();
        registry.join(&pid("b"), &RoomId::from("r1")).unwrap();
        registry.join(&pid("c"), &RoomId::from("r2")).unwrap();

        assert!(registry.shares_room(&pid("a"), &pid("b")));
        assert!(!registry.shares_room(&pid("a"), &pid("c")));
        assert!(!registry.shares_room(&pid("a"), &pid("nobody")));
    }
}
