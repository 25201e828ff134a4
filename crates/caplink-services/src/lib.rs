//! caplink-services: capability registry, resolver, and change dispatch.

pub mod directory;
pub mod discovery;
pub mod dispatcher;
pub mod events;
pub mod registry;
pub mod resolver;

pub use directory::{PeerDirectory, PeerEntry, SessionState};
pub use discovery::{
    features_or_empty, CapsChange, Change, DiscoveryCache, DiscoveryError, FeatureDiscovery,
};
pub use dispatcher::{DispatchError, Dispatcher, PeerState};
pub use events::{EventSink, SubscriptionHandle, Subscribers};
pub use registry::{CapabilityRegistry, RequirementTable};
pub use resolver::CapabilityResolver;
