//! Capability registry: which features prove which capability.
//!
//! Three outcomes per kind:
//! - No entry:            unknown, granted by default to online peers
//! - `Disabled`:          never granted
//! - `Features(list)`:    granted when every listed feature was discovered
//!                        (empty list = unconditional)
//!
//! The table is copy-on-write. A writer clones the current map, edits the
//! clone and swaps it in under a short write lock; readers take an `Arc` to
//! whichever map is current. A resolution pass holds one such `Arc` for its
//! whole duration, so it never sees a half-applied update.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use caplink_core::config::CapabilitiesConfig;
use caplink_core::config::ConfigError;
use caplink_core::features;
use caplink_core::{CapabilityKind, Requirement};

/// Immutable view of the requirement table at one instant.
#[derive(Debug, Clone, Default)]
pub struct RequirementTable {
    entries: Arc<HashMap<CapabilityKind, Requirement>>,
}

impl RequirementTable {
    /// `None` means the kind is unknown to the table.
    pub fn get(&self, kind: &CapabilityKind) -> Option<&Requirement> {
        self.entries.get(kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Requirement table plus the offline allow-list for one account.
///
/// Clones share the same table, so the dispatcher and the resolver see each
/// other's updates.
#[derive(Clone)]
pub struct CapabilityRegistry {
    table: Arc<RwLock<RequirementTable>>,
    offline_allowed: Arc<HashSet<CapabilityKind>>,
}

impl CapabilityRegistry {
    /// Empty requirement table with a fixed offline allow-list.
    pub fn new(offline_allowed: impl IntoIterator<Item = CapabilityKind>) -> Self {
        Self {
            table: Arc::new(RwLock::new(RequirementTable::default())),
            offline_allowed: Arc::new(offline_allowed.into_iter().collect()),
        }
    }

    /// The built-in XMPP table: Jingle for calls and desktop sharing,
    /// message correction, and chat states for typing notifications.
    pub fn xmpp_defaults() -> Self {
        let registry = Self::new([
            CapabilityKind::BasicMessaging,
            CapabilityKind::MessageCorrection,
            CapabilityKind::ContactInfo,
        ]);
        registry.install(xmpp_requirements());
        registry
    }

    /// Built-in table with config overrides applied on top.
    pub fn from_config(config: &CapabilitiesConfig) -> Result<Self, ConfigError> {
        let registry = Self::new(config.offline_kinds()?);
        registry.install(xmpp_requirements());
        registry.install(config.requirement_overrides()?);
        registry.set_typing_notifications(config.typing_notifications);
        Ok(registry)
    }

    /// Replace the requirement for `kind`.
    pub fn set_requirement(&self, kind: CapabilityKind, requirement: Requirement) {
        tracing::debug!(kind = %kind, requirement = ?requirement, "capability requirement set");
        self.update(|entries| {
            entries.insert(kind, requirement);
        });
    }

    /// Forget `kind`, reverting it to the default-grant policy.
    pub fn clear_requirement(&self, kind: &CapabilityKind) {
        tracing::debug!(kind = %kind, "capability requirement cleared");
        self.update(|entries| {
            entries.remove(kind);
        });
    }

    /// Current requirement for `kind`, or `None` if the kind is unknown.
    pub fn requirement(&self, kind: &CapabilityKind) -> Option<Requirement> {
        self.snapshot().get(kind).cloned()
    }

    /// Is `kind` presumed present while the peer is offline?
    pub fn offline_allowed(&self, kind: &CapabilityKind) -> bool {
        self.offline_allowed.contains(kind)
    }

    /// Toggle typing notifications. Disabling installs the `Disabled`
    /// sentinel so the capability is denied rather than falling back to
    /// default-grant.
    pub fn set_typing_notifications(&self, enabled: bool) {
        let requirement = if enabled {
            Requirement::features([features::CHAT_STATES])
        } else {
            Requirement::Disabled
        };
        tracing::info!(enabled, "typing notifications toggled");
        self.set_requirement(CapabilityKind::TypingNotification, requirement);
    }

    /// Consistent view of the whole table.
    pub fn snapshot(&self) -> RequirementTable {
        match self.table.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn install(&self, requirements: impl IntoIterator<Item = (CapabilityKind, Requirement)>) {
        self.update(|entries| entries.extend(requirements));
    }

    fn update(&self, edit: impl FnOnce(&mut HashMap<CapabilityKind, Requirement>)) {
        let mut guard = match self.table.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut entries = HashMap::clone(&guard.entries);
        edit(&mut entries);
        guard.entries = Arc::new(entries);
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::xmpp_defaults()
    }
}

fn xmpp_requirements() -> Vec<(CapabilityKind, Requirement)> {
    vec![
        (
            CapabilityKind::VoiceCall,
            Requirement::features([features::JINGLE, features::JINGLE_RTP, features::JINGLE_RTP_AUDIO]),
        ),
        (
            CapabilityKind::VideoCall,
            Requirement::features([features::JINGLE, features::JINGLE_RTP, features::JINGLE_RTP_VIDEO]),
        ),
        (
            CapabilityKind::DesktopShare,
            Requirement::features([features::JINGLE, features::JINGLE_RTP, features::JINGLE_RTP_VIDEO]),
        ),
        (
            CapabilityKind::MessageCorrection,
            Requirement::features([features::MESSAGE_CORRECT]),
        ),
        (
            CapabilityKind::TypingNotification,
            Requirement::features([features::CHAT_STATES]),
        ),
    ]
}
