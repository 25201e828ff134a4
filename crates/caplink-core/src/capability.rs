//! Capability model: what a peer can do, and what evidence proves it.
//!
//! A capability is granted from three inputs only: the peer's reachability,
//! the feature set discovered for its session, and the requirement table.
//! Everything in this module is plain data; the decision logic lives in
//! `caplink-services`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::address::{BareAddress, FullAddress};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability kind must have a non-empty name")]
    EmptyKind,
}

// ── Capability kinds ──────────────────────────────────────────────────────────

/// An abstract feature a peer may or may not support.
///
/// The built-in kinds cover what a chat/call client needs. `Custom` tags let
/// an embedding application register its own kinds; they must be created
/// through [`CapabilityKind::custom`] or parsing, both of which reject empty
/// names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CapabilityKind {
    BasicMessaging,
    VoiceCall,
    VideoCall,
    DesktopShare,
    TypingNotification,
    MessageCorrection,
    ContactInfo,
    Custom(String),
}

impl CapabilityKind {
    /// Every built-in kind, in declaration order.
    pub const BUILTIN: [CapabilityKind; 7] = [
        CapabilityKind::BasicMessaging,
        CapabilityKind::VoiceCall,
        CapabilityKind::VideoCall,
        CapabilityKind::DesktopShare,
        CapabilityKind::TypingNotification,
        CapabilityKind::MessageCorrection,
        CapabilityKind::ContactInfo,
    ];

    pub fn custom(name: impl Into<String>) -> Result<Self, CapabilityError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CapabilityError::EmptyKind);
        }
        Ok(match Self::builtin_from_name(&name) {
            Some(kind) => kind,
            None => CapabilityKind::Custom(name),
        })
    }

    /// Canonical snake_case name.
    pub fn as_str(&self) -> &str {
        match self {
            CapabilityKind::BasicMessaging => "basic_messaging",
            CapabilityKind::VoiceCall => "voice_call",
            CapabilityKind::VideoCall => "video_call",
            CapabilityKind::DesktopShare => "desktop_share",
            CapabilityKind::TypingNotification => "typing_notification",
            CapabilityKind::MessageCorrection => "message_correction",
            CapabilityKind::ContactInfo => "contact_info",
            CapabilityKind::Custom(name) => name,
        }
    }

    fn builtin_from_name(name: &str) -> Option<Self> {
        Self::BUILTIN.into_iter().find(|k| k.as_str() == name)
    }
}

impl FromStr for CapabilityKind {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::custom(s)
    }
}

impl TryFrom<String> for CapabilityKind {
    type Error = CapabilityError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::custom(s)
    }
}

impl From<CapabilityKind> for String {
    fn from(kind: CapabilityKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Requirements ──────────────────────────────────────────────────────────────

/// Evidence required before a capability is claimed for an online peer.
///
/// A kind with no entry in the requirement table has no `Requirement` at all
/// and is granted by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// Never granted, online or offline.
    Disabled,
    /// Granted when every listed feature was discovered. Empty = unconditional.
    Features(Vec<String>),
}

impl Requirement {
    /// Build a feature requirement, dropping duplicates but keeping order.
    pub fn features<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = Vec::new();
        for feature in features {
            let feature = feature.into();
            if !list.contains(&feature) {
                list.push(feature);
            }
        }
        Requirement::Features(list)
    }

    pub fn unconditional() -> Self {
        Requirement::Features(Vec::new())
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Requirement::Disabled)
    }
}

// ── Discovered features ───────────────────────────────────────────────────────

/// Entity-capabilities verification digest of a feature set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapsDigest(pub [u8; 32]);

impl fmt::Display for CapsDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Feature identifiers advertised by one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(BTreeSet<String>);

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feature: impl Into<String>) -> bool {
        self.0.insert(feature.into())
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.0.contains(feature)
    }

    /// All-of match. An empty list is trivially satisfied.
    pub fn contains_all<S: AsRef<str>>(&self, features: &[S]) -> bool {
        features.iter().all(|f| self.0.contains(f.as_ref()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Digest over the sorted features, each terminated by `<`.
    ///
    /// Two sessions advertising the same features share a digest, so the
    /// discovery cache stores each distinct feature set once.
    pub fn digest(&self) -> CapsDigest {
        let mut hasher = blake3::Hasher::new();
        for feature in &self.0 {
            hasher.update(feature.as_bytes());
            hasher.update(b"<");
        }
        CapsDigest(*hasher.finalize().as_bytes())
    }
}

impl<S: Into<String>> FromIterator<S> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

// ── Reachability and snapshots ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Online,
    Offline,
}

impl Reachability {
    pub fn is_online(self) -> bool {
        matches!(self, Reachability::Online)
    }
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reachability::Online => f.write_str("online"),
            Reachability::Offline => f.write_str("offline"),
        }
    }
}

/// Capabilities granted to one peer at one instant.
///
/// Snapshots are never updated in place; re-resolution produces a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub peer: BareAddress,
    /// Session whose features were consulted. `None` when offline or when the
    /// peer had no live session.
    pub session: Option<FullAddress>,
    pub reachability: Reachability,
    pub granted: BTreeSet<CapabilityKind>,
}

impl CapabilitySnapshot {
    pub fn supports(&self, kind: &CapabilityKind) -> bool {
        self.granted.contains(kind)
    }
}

/// Published once per peer transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitiesChanged {
    pub peer: BareAddress,
    pub snapshot: CapabilitySnapshot,
}
