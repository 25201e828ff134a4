//! caplink-core: shared types, capability model, and configuration.
//! All other caplink crates depend on this one.

pub mod address;
pub mod capability;
pub mod config;
pub mod features;

pub use address::{AddressError, BareAddress, FullAddress};
pub use capability::{
    CapabilitiesChanged, CapabilityError, CapabilityKind, CapabilitySnapshot, CapsDigest,
    FeatureSet, Reachability, Requirement,
};
