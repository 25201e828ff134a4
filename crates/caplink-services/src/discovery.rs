//! Feature discovery: what each live session advertises.
//!
//! The real gateway is the host's service-discovery layer. `DiscoveryCache`
//! is an in-memory implementation modelled on entity capabilities: feature
//! sets are stored once per caps digest and sessions point at a digest, so
//! a roster full of identical clients costs one entry.
//!
//! Each node counts the sessions pointing at it. The count is taken before
//! a session is mapped to the node and dropped after it is unmapped, both
//! inside the node's entry guard, so a node is never removed while a
//! session can still reach it.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use caplink_core::{CapsDigest, FeatureSet, FullAddress};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no discovery information for {0}")]
    Unknown(FullAddress),
    #[error("discovery gateway unavailable: {0}")]
    Unavailable(String),
    #[error("discovery request for {0} timed out")]
    Timeout(FullAddress),
}

/// Source of per-session feature sets.
///
/// Implementations may return cached, possibly stale data. Callers treat any
/// error as an empty feature set.
pub trait FeatureDiscovery: Send + Sync {
    fn features(&self, session: &FullAddress) -> Result<FeatureSet, DiscoveryError>;
}

/// Direction of a caps-node change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Change {
    Added,
    Removed,
}

/// Notification that the gateway's knowledge about a session changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsChange {
    pub session: FullAddress,
    pub change: Change,
}

/// Look up features, failing closed.
pub fn features_or_empty(gateway: &dyn FeatureDiscovery, session: &FullAddress) -> FeatureSet {
    match gateway.features(session) {
        Ok(features) => features,
        Err(DiscoveryError::Unknown(_)) => {
            tracing::trace!(session = %session, "no discovery info yet");
            FeatureSet::new()
        }
        Err(e) => {
            tracing::warn!(session = %session, error = %e, "feature discovery failed");
            FeatureSet::new()
        }
    }
}

struct CapsNode {
    features: FeatureSet,
    refs: usize,
}

/// In-memory caps cache, shared between the host and the dispatcher.
#[derive(Clone, Default)]
pub struct DiscoveryCache {
    nodes: Arc<DashMap<CapsDigest, CapsNode>>,
    sessions: Arc<DashMap<FullAddress, CapsDigest>>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the features a session advertises.
    ///
    /// Returns the notification to forward to the dispatcher, or `None` if
    /// the session already pointed at the same feature set.
    pub fn record(&self, session: FullAddress, features: FeatureSet) -> Option<CapsChange> {
        let digest = features.digest();
        self.nodes
            .entry(digest)
            .and_modify(|node| node.refs += 1)
            .or_insert(CapsNode { features, refs: 1 });

        let previous = self.sessions.insert(session.clone(), digest);
        if previous == Some(digest) {
            self.release(digest);
            return None;
        }
        if let Some(old) = previous {
            self.release(old);
        }

        tracing::debug!(session = %session, caps = %digest, "caps node recorded");
        Some(CapsChange {
            session,
            change: Change::Added,
        })
    }

    /// Drop what we know about a session.
    pub fn forget(&self, session: &FullAddress) -> Option<CapsChange> {
        let (session, digest) = self.sessions.remove(session)?;
        self.release(digest);
        tracing::debug!(session = %session, caps = %digest, "caps node removed");
        Some(CapsChange {
            session,
            change: Change::Removed,
        })
    }

    pub fn contains(&self, session: &FullAddress) -> bool {
        self.sessions.contains_key(session)
    }

    /// Distinct feature sets currently referenced.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Drop one session's reference; the last one removes the node.
    fn release(&self, digest: CapsDigest) {
        if let Entry::Occupied(mut node) = self.nodes.entry(digest) {
            node.get_mut().refs -= 1;
            if node.get().refs == 0 {
                node.remove();
            }
        }
    }
}

impl FeatureDiscovery for DiscoveryCache {
    fn features(&self, session: &FullAddress) -> Result<FeatureSet, DiscoveryError> {
        let digest = *self
            .sessions
            .get(session)
            .ok_or_else(|| DiscoveryError::Unknown(session.clone()))?;
        self.nodes
            .get(&digest)
            .map(|node| node.features.clone())
            .ok_or_else(|| DiscoveryError::Unknown(session.clone()))
    }
}
