//! Capability resolver: turns presence and discovered features into a
//! capability snapshot.
//!
//! Resolution is a pure function of (reachability, discovered features,
//! requirement table). Over-claiming is worse than under-claiming, so any
//! missing evidence denies a feature-gated capability. The one exception is
//! a kind the table knows nothing about: absence of data is not absence of
//! capability, and such kinds are granted to online peers.

use std::collections::BTreeSet;

use caplink_core::{
    BareAddress, CapabilityKind, CapabilitySnapshot, FeatureSet, FullAddress, Reachability,
    Requirement,
};

use crate::registry::{CapabilityRegistry, RequirementTable};

/// Resolves capabilities over a fixed universe of kinds.
#[derive(Clone)]
pub struct CapabilityResolver {
    registry: CapabilityRegistry,
    /// Kinds the local account supports. A peer can never be granted a kind
    /// outside this set, since we could not use it anyway.
    universe: Vec<CapabilityKind>,
}

impl CapabilityResolver {
    pub fn new(registry: CapabilityRegistry, universe: impl IntoIterator<Item = CapabilityKind>) -> Self {
        let mut kinds: Vec<CapabilityKind> = Vec::new();
        for kind in universe {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Self {
            registry,
            universe: kinds,
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn universe(&self) -> &[CapabilityKind] {
        &self.universe
    }

    /// Resolve every kind in the universe for one peer.
    ///
    /// `discovered` is not consulted when the peer is offline.
    pub fn resolve(
        &self,
        peer: &BareAddress,
        session: Option<&FullAddress>,
        reachability: Reachability,
        discovered: &FeatureSet,
    ) -> CapabilitySnapshot {
        let table = self.registry.snapshot();
        let granted: BTreeSet<CapabilityKind> = self
            .universe
            .iter()
            .filter(|kind| self.grant(&table, kind, reachability, discovered))
            .cloned()
            .collect();

        tracing::trace!(
            peer = %peer,
            reachability = %reachability,
            features = discovered.len(),
            granted = granted.len(),
            "capabilities resolved"
        );

        CapabilitySnapshot {
            peer: peer.clone(),
            session: if reachability.is_online() { session.cloned() } else { None },
            reachability,
            granted,
        }
    }

    /// Does a peer in this state possess `kind`?
    pub fn supports(
        &self,
        kind: &CapabilityKind,
        reachability: Reachability,
        discovered: &FeatureSet,
    ) -> bool {
        self.universe.contains(kind)
            && self.grant(&self.registry.snapshot(), kind, reachability, discovered)
    }

    fn grant(
        &self,
        table: &RequirementTable,
        kind: &CapabilityKind,
        reachability: Reachability,
        discovered: &FeatureSet,
    ) -> bool {
        if !reachability.is_online() {
            // A disabled kind stays denied even if it is on the allow-list.
            return self.registry.offline_allowed(kind)
                && !matches!(table.get(kind), Some(Requirement::Disabled));
        }
        match table.get(kind) {
            None => true,
            Some(Requirement::Disabled) => false,
            Some(Requirement::Features(required)) => discovered.contains_all(required),
        }
    }
}
