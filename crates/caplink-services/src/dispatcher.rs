//! Change notification dispatcher.
//!
//! Turns presence and caps-node notifications into one `CapabilitiesChanged`
//! event per peer transition. Each tracked peer gets its own actor task fed
//! by an unbounded channel, which gives us two properties for free:
//!
//! - notifications for one peer are handled in arrival order, so events for
//!   that peer are published in the same order;
//! - at most one resolution per peer is ever in flight.
//!
//! Per-peer state machine:
//!
//! ```text
//!   Unknown ──available + discovered──▶ Online ◀──────────────┐
//!      │                                  │  ▲                  │
//!      │ unavailable           unavailable│  │ available        │ available
//!      ▼                                  ▼  │                  │
//!   OfflinePending ◀──────────────── OfflinePending ──settle──▶ Offline
//! ```
//!
//! Going offline is not resolved immediately: the discovery cache may still
//! describe the dead session. The actor arms a settle deadline instead and
//! races it against its inbox, so the caller's thread is never blocked and a
//! reconnect before the deadline simply disarms it.
//!
//! A peer in `Unknown` goes online once the gateway can answer for the
//! session. Only `DiscoveryError::Unknown` means discovery is still pending;
//! a gateway timeout or outage counts as completed with no features.
//!
//! `forget` and `shutdown` cancel the actor under its liveness lock. A
//! cancelled actor neither publishes nor records state, so nothing reaches
//! a sink for a peer once `forget` has returned.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use caplink_core::config::MAX_SETTLE_DELAY_MS;
use caplink_core::{
    BareAddress, CapabilitiesChanged, CapabilitySnapshot, FeatureSet, FullAddress, Reachability,
};

use crate::directory::PeerDirectory;
use crate::discovery::{features_or_empty, CapsChange, Change, DiscoveryError, FeatureDiscovery};
use crate::events::{EventSink, SubscriptionHandle, Subscribers};
use crate::resolver::CapabilityResolver;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatcher must be created inside a tokio runtime")]
    NoRuntime,
    #[error("settle delay {0:?} exceeds the {max}ms bound", max = MAX_SETTLE_DELAY_MS)]
    SettleDelayTooLong(Duration),
}

/// Where a peer is in its capability lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    Unknown,
    Online,
    OfflinePending,
    Offline,
}

#[derive(Debug)]
enum Notification {
    /// A session's presence changed; `reachability` is the peer's overall
    /// reachability after the change.
    Presence {
        session: FullAddress,
        reachability: Reachability,
    },
    Caps(CapsChange),
    Refresh,
}

/// Sending side of a peer actor.
struct Inbox {
    tx: mpsc::UnboundedSender<Notification>,
    live: Arc<Mutex<bool>>,
}

impl Inbox {
    /// Blocks until the actor is between publications.
    fn cancel(&self) {
        *lock(&self.live) = false;
    }
}

fn lock(live: &Mutex<bool>) -> MutexGuard<'_, bool> {
    match live.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// State shared by the dispatcher handle and every peer actor.
struct Shared {
    resolver: CapabilityResolver,
    directory: PeerDirectory,
    discovery: Arc<dyn FeatureDiscovery>,
    subscribers: Subscribers,
    snapshots: DashMap<BareAddress, CapabilitySnapshot>,
    states: DashMap<BareAddress, PeerState>,
    settle_delay: Duration,
}

impl Shared {
    /// Resolve a peer from the directory's current view.
    fn resolve(
        &self,
        peer: &BareAddress,
        reachability: Reachability,
        hint: Option<&FullAddress>,
    ) -> CapabilitySnapshot {
        if !reachability.is_online() {
            return self
                .resolver
                .resolve(peer, None, Reachability::Offline, &FeatureSet::new());
        }
        let session = hint
            .filter(|s| self.directory.has_session(s))
            .cloned()
            .or_else(|| self.directory.preferred_session(peer));
        let features = session
            .as_ref()
            .map(|s| features_or_empty(self.discovery.as_ref(), s))
            .unwrap_or_default();
        self.resolver
            .resolve(peer, session.as_ref(), Reachability::Online, &features)
    }
}

/// Handle to the dispatcher. Cheap to clone; all clones drive the same
/// actors.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
    inboxes: Arc<DashMap<BareAddress, Inbox>>,
    runtime: tokio::runtime::Handle,
}

impl Dispatcher {
    /// Must be called from within a tokio runtime; actors are spawned on it.
    pub fn new(
        resolver: CapabilityResolver,
        directory: PeerDirectory,
        discovery: Arc<dyn FeatureDiscovery>,
        settle_delay: Duration,
    ) -> Result<Self, DispatchError> {
        if settle_delay > Duration::from_millis(MAX_SETTLE_DELAY_MS) {
            return Err(DispatchError::SettleDelayTooLong(settle_delay));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;
        Ok(Self {
            shared: Arc::new(Shared {
                resolver,
                directory,
                discovery,
                subscribers: Subscribers::new(),
                snapshots: DashMap::new(),
                states: DashMap::new(),
                settle_delay,
            }),
            inboxes: Arc::new(DashMap::new()),
            runtime,
        })
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionHandle {
        self.shared.subscribers.subscribe(sink)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.shared.subscribers.unsubscribe(handle)
    }

    /// Presence changed for one session.
    ///
    /// Returns false if the peer is not in the directory.
    pub fn on_presence(&self, session: FullAddress, reachability: Reachability, priority: i32) -> bool {
        let peer = session.bare().clone();
        if !self.shared.directory.contains(&peer) {
            tracing::trace!(session = %session, "presence for untracked peer ignored");
            return false;
        }
        // Hold the peer's inbox entry while updating the directory so the
        // directory update and the notification are observed in one order.
        let inbox = self.inbox(&peer);
        let Some(overall) = self.shared.directory.set_session(&session, reachability, priority) else {
            return false;
        };
        tracing::debug!(
            session = %session,
            session_reachability = %reachability,
            peer_reachability = %overall,
            "presence changed"
        );
        deliver(
            &peer,
            &inbox.tx,
            Notification::Presence {
                session,
                reachability: overall,
            },
        )
    }

    /// The discovery gateway added or removed a caps node for a session.
    pub fn on_caps_changed(&self, change: CapsChange) -> bool {
        let peer = change.session.bare().clone();
        if !self.shared.directory.contains(&peer) {
            tracing::trace!(session = %change.session, "caps change for untracked peer ignored");
            return false;
        }
        let inbox = self.inbox(&peer);
        deliver(&peer, &inbox.tx, Notification::Caps(change))
    }

    /// Fresh discovery information arrived for `peer`; re-resolve it.
    pub fn refresh(&self, peer: &BareAddress) -> bool {
        if !self.shared.directory.contains(peer) {
            return false;
        }
        let inbox = self.inbox(peer);
        deliver(peer, &inbox.tx, Notification::Refresh)
    }

    /// Stop tracking `peer`. Queued notifications and any pending settle
    /// deadline are discarded with the actor.
    pub fn forget(&self, peer: &BareAddress) -> bool {
        // The entry stays locked until the old actor is cancelled and its
        // state cleared, so a new actor for the same peer starts clean.
        match self.inboxes.entry(peer.clone()) {
            Entry::Occupied(entry) => {
                entry.get().cancel();
                self.shared.snapshots.remove(peer);
                self.shared.states.remove(peer);
                entry.remove();
                true
            }
            Entry::Vacant(_) => {
                self.shared.snapshots.remove(peer);
                self.shared.states.remove(peer);
                false
            }
        }
    }

    /// Last published snapshot. Stays as it was until the peer's next
    /// trigger, even if the registry changed in between.
    pub fn current(&self, peer: &BareAddress) -> Option<CapabilitySnapshot> {
        self.shared.snapshots.get(peer).map(|s| s.value().clone())
    }

    /// Resolve `peer` right now from the directory, without publishing.
    pub fn query(&self, peer: &BareAddress) -> Option<CapabilitySnapshot> {
        let reachability = self.shared.directory.reachability(peer)?;
        Some(self.shared.resolve(peer, reachability, None))
    }

    pub fn state(&self, peer: &BareAddress) -> PeerState {
        self.shared
            .states
            .get(peer)
            .map(|s| *s.value())
            .unwrap_or(PeerState::Unknown)
    }

    /// Number of peers with a live actor.
    pub fn active_peers(&self) -> usize {
        self.inboxes.len()
    }

    /// Stop every actor. Pending offline resolutions are discarded.
    pub fn shutdown(&self) {
        let count = self.inboxes.len();
        self.inboxes.retain(|_, inbox| {
            inbox.cancel();
            false
        });
        tracing::info!(peers = count, "dispatcher shut down");
    }

    fn inbox(
        &self,
        peer: &BareAddress,
    ) -> dashmap::mapref::one::RefMut<'_, BareAddress, Inbox> {
        let mut entry = self
            .inboxes
            .entry(peer.clone())
            .or_insert_with(|| self.spawn_actor(peer.clone()));
        if entry.tx.is_closed() {
            tracing::warn!(peer = %peer, "peer actor exited, restarting");
            entry.cancel();
            *entry = self.spawn_actor(peer.clone());
        }
        entry
    }

    fn spawn_actor(&self, peer: BareAddress) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        let live = Arc::new(Mutex::new(true));
        let actor = PeerActor {
            peer,
            shared: self.shared.clone(),
            live: live.clone(),
            state: PeerState::Unknown,
            settle_deadline: None,
        };
        self.runtime.spawn(actor.run(rx));
        Inbox { tx, live }
    }
}

fn deliver(
    peer: &BareAddress,
    inbox: &mpsc::UnboundedSender<Notification>,
    notification: Notification,
) -> bool {
    match inbox.send(notification) {
        Ok(()) => true,
        Err(_) => {
            tracing::warn!(peer = %peer, "peer actor gone, notification dropped");
            false
        }
    }
}

// ── Peer actor ────────────────────────────────────────────────────────────────

enum Step {
    Notify(Notification),
    Settled,
}

struct PeerActor {
    peer: BareAddress,
    shared: Arc<Shared>,
    /// Cleared by `forget` and `shutdown`.
    live: Arc<Mutex<bool>>,
    state: PeerState,
    settle_deadline: Option<Instant>,
}

impl PeerActor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Notification>) {
        tracing::trace!(peer = %self.peer, "peer actor started");
        loop {
            let step = match self.settle_deadline {
                Some(deadline) => tokio::select! {
                    // Notifications observed before the deadline go first.
                    biased;
                    n = inbox.recv() => n.map(Step::Notify),
                    _ = time::sleep_until(deadline) => Some(Step::Settled),
                },
                None => inbox.recv().await.map(Step::Notify),
            };
            if !*lock(&self.live) {
                tracing::trace!(peer = %self.peer, "peer actor cancelled");
                break;
            }
            match step {
                Some(Step::Notify(n)) => self.handle(n),
                Some(Step::Settled) => self.settle(),
                None => break,
            }
        }
        tracing::trace!(peer = %self.peer, "peer actor stopped");
    }

    fn handle(&mut self, notification: Notification) {
        match notification {
            Notification::Presence {
                session,
                reachability,
            } => self.on_presence(session, reachability),
            Notification::Caps(change) => self.on_caps(change),
            Notification::Refresh => self.on_refresh(),
        }
    }

    fn on_presence(&mut self, session: FullAddress, reachability: Reachability) {
        use PeerState::*;
        match (self.state, reachability) {
            (Unknown, Reachability::Online) => {
                // Wait for discovery unless the gateway can already answer.
                match self.shared.discovery.features(&session) {
                    Err(DiscoveryError::Unknown(_)) => {
                        tracing::trace!(peer = %self.peer, "available, awaiting discovery");
                    }
                    _ => self.go_online(Some(&session)),
                }
            }
            (Online, Reachability::Online) => self.publish_online(Some(&session)),
            (OfflinePending | Offline, Reachability::Online) => self.go_online(Some(&session)),
            (Unknown | Online, Reachability::Offline) => self.begin_settle(),
            // Another session dropped while already going offline.
            (OfflinePending | Offline, Reachability::Offline) => {}
        }
    }

    fn on_caps(&mut self, change: CapsChange) {
        match self.state {
            PeerState::Unknown => {
                let available = self.shared.directory.reachability(&self.peer)
                    == Some(Reachability::Online);
                if change.change == Change::Added && available {
                    self.go_online(Some(&change.session));
                }
            }
            PeerState::Online => {
                let hint = (change.change == Change::Added).then_some(&change.session);
                self.publish_online(hint);
            }
            PeerState::OfflinePending | PeerState::Offline => {
                tracing::trace!(peer = %self.peer, "caps change while offline ignored");
            }
        }
    }

    fn on_refresh(&mut self) {
        match self.state {
            PeerState::Online => self.publish_online(None),
            PeerState::Offline => self.publish(Reachability::Offline, None),
            PeerState::Unknown => {
                if self.shared.directory.reachability(&self.peer) == Some(Reachability::Online) {
                    self.go_online(None);
                }
            }
            PeerState::OfflinePending => {}
        }
    }

    fn go_online(&mut self, hint: Option<&FullAddress>) {
        if self.settle_deadline.take().is_some() {
            tracing::debug!(peer = %self.peer, "reconnected before settle, offline resolution cancelled");
        }
        self.set_state(PeerState::Online);
        self.publish_online(hint);
    }

    fn begin_settle(&mut self) {
        self.set_state(PeerState::OfflinePending);
        self.settle_deadline = Some(Instant::now() + self.shared.settle_delay);
        tracing::debug!(
            peer = %self.peer,
            delay_ms = self.shared.settle_delay.as_millis() as u64,
            "offline, settling"
        );
    }

    fn settle(&mut self) {
        self.settle_deadline = None;
        self.set_state(PeerState::Offline);
        self.publish(Reachability::Offline, None);
    }

    fn publish_online(&self, hint: Option<&FullAddress>) {
        self.publish(Reachability::Online, hint);
    }

    fn publish(&self, reachability: Reachability, hint: Option<&FullAddress>) {
        let snapshot = self.shared.resolve(&self.peer, reachability, hint);
        let live = lock(&self.live);
        if !*live {
            return;
        }
        tracing::debug!(
            peer = %self.peer,
            reachability = %reachability,
            granted = ?snapshot.granted,
            "capabilities changed"
        );
        self.shared
            .snapshots
            .insert(self.peer.clone(), snapshot.clone());
        self.shared.subscribers.publish(&CapabilitiesChanged {
            peer: self.peer.clone(),
            snapshot,
        });
    }

    fn set_state(&mut self, state: PeerState) {
        self.state = state;
        if *lock(&self.live) {
            self.shared.states.insert(self.peer.clone(), state);
        }
    }
}
