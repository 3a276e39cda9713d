//! Peer session table.
//!
//! One entry per remote participant. Entries are only ever added through
//! [`PeerSessionTable::get_or_insert`] and dropped through
//! [`PeerSessionTable::remove`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use huddle_common::ParticipantId;

use crate::peer::PeerSinks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    /// A local offer is out and no answer has come back yet.
    Negotiating,
    Stable,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We sent the first offer.
    Caller,
    /// The first offer came from the peer.
    Callee,
}

pub struct PeerSession<C, R> {
    pub peer_id: ParticipantId,
    pub connection: Arc<C>,
    pub sinks: PeerSinks<R>,
    pub state: SessionState,
    pub role: Role,
    /// Local media changed while an offer was outstanding; send one more
    /// offer once the answer lands.
    pub renegotiation_pending: bool,
}

impl<C, R> PeerSession<C, R> {
    pub fn new(peer_id: ParticipantId, connection: Arc<C>, sinks: PeerSinks<R>, role: Role) -> Self {
        Self {
            peer_id,
            connection,
            sinks,
            state: SessionState::New,
            role,
            renegotiation_pending: false,
        }
    }
}

pub struct PeerSessionTable<C, R> {
    sessions: HashMap<ParticipantId, PeerSession<C, R>>,
}

impl<C, R> Default for PeerSessionTable<C, R> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }
}

impl<C, R> PeerSessionTable<C, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `session.peer_id`, inserting `session` only if
    /// none exists yet. The second value is true when `session` was inserted.
    pub fn get_or_insert(&mut self, session: PeerSession<C, R>) -> (&mut PeerSession<C, R>, bool) {
        match self.sessions.entry(session.peer_id.clone()) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => (entry.insert(session), true),
        }
    }

    /// Removes the session and marks it closed.
    pub fn remove(&mut self, peer: &ParticipantId) -> Option<PeerSession<C, R>> {
        let mut session = self.sessions.remove(peer)?;
        session.state = SessionState::Closed;
        Some(session)
    }

    pub fn get(&self, peer: &ParticipantId) -> Option<&PeerSession<C, R>> {
        self.sessions.get(peer)
    }

    pub fn get_mut(&mut self, peer: &ParticipantId) -> Option<&mut PeerSession<C, R>> {
        self.sessions.get_mut(peer)
    }

    pub fn contains(&self, peer: &ParticipantId) -> bool {
        self.sessions.contains_key(peer)
    }

    pub fn state_of(&self, peer: &ParticipantId) -> Option<SessionState> {
        self.sessions.get(peer).map(|session| session.state)
    }

    /// Peer ids in a stable order.
    pub fn peer_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
