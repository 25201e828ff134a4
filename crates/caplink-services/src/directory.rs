//! Peer directory: the roster's view of who we track and how they are
//! connected.
//!
//! Peers are added and removed by the roster, never by the capability
//! logic. Presence for a peer we do not track is ignored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use caplink_core::{BareAddress, FullAddress, Reachability};

/// One live session of a peer.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Presence priority. Higher wins when picking a session to query.
    pub priority: i32,
    /// Last presence seen on this session.
    pub last_seen: Instant,
}

/// Tracked state for a roster peer.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub identity: BareAddress,
    /// Live sessions keyed by resource. Empty = offline.
    pub sessions: HashMap<String, SessionState>,
}

impl PeerEntry {
    pub fn new(identity: BareAddress) -> Self {
        Self {
            identity,
            sessions: HashMap::new(),
        }
    }

    /// Online iff at least one session is live.
    pub fn reachability(&self) -> Reachability {
        if self.sessions.is_empty() {
            Reachability::Offline
        } else {
            Reachability::Online
        }
    }

    /// The session to query for features: highest priority, then most
    /// recently seen.
    pub fn preferred_session(&self) -> Option<FullAddress> {
        self.sessions
            .iter()
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.last_seen.cmp(&b.last_seen))
            })
            .and_then(|(resource, _)| self.identity.with_resource(resource).ok())
    }

    pub fn has_session(&self, session: &FullAddress) -> bool {
        self.sessions.contains_key(session.resource())
    }
}

/// Directory of roster peers, shared between the host and the dispatcher.
#[derive(Clone, Default)]
pub struct PeerDirectory {
    peers: Arc<DashMap<BareAddress, PeerEntry>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a peer. Returns false if it was already tracked.
    pub fn add(&self, identity: BareAddress) -> bool {
        if self.peers.contains_key(&identity) {
            return false;
        }
        self.peers
            .entry(identity.clone())
            .or_insert_with(|| PeerEntry::new(identity));
        true
    }

    pub fn remove(&self, identity: &BareAddress) -> Option<PeerEntry> {
        self.peers.remove(identity).map(|(_, entry)| entry)
    }

    pub fn contains(&self, identity: &BareAddress) -> bool {
        self.peers.contains_key(identity)
    }

    /// Apply a presence update for one session.
    ///
    /// Returns the peer's overall reachability afterwards, or `None` if the
    /// peer is not in the directory.
    pub fn set_session(
        &self,
        session: &FullAddress,
        reachability: Reachability,
        priority: i32,
    ) -> Option<Reachability> {
        let mut entry = self.peers.get_mut(session.bare())?;
        match reachability {
            Reachability::Online => {
                entry.sessions.insert(
                    session.resource().to_string(),
                    SessionState {
                        priority,
                        last_seen: Instant::now(),
                    },
                );
            }
            Reachability::Offline => {
                entry.sessions.remove(session.resource());
            }
        }
        Some(entry.reachability())
    }

    pub fn reachability(&self, identity: &BareAddress) -> Option<Reachability> {
        self.peers.get(identity).map(|e| e.reachability())
    }

    pub fn preferred_session(&self, identity: &BareAddress) -> Option<FullAddress> {
        self.peers.get(identity).and_then(|e| e.preferred_session())
    }

    pub fn has_session(&self, session: &FullAddress) -> bool {
        self.peers
            .get(session.bare())
            .map(|e| e.has_session(session))
            .unwrap_or(false)
    }

    pub fn sessions(&self, identity: &BareAddress) -> Vec<FullAddress> {
        self.peers
            .get(identity)
            .map(|e| {
                e.sessions
                    .keys()
                    .filter_map(|r| e.identity.with_resource(r).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
