//! Peer addresses.
//!
//! A peer is identified by its bare address (`local@domain`). Each live
//! connection of that peer has a full address (`local@domain/resource`).
//! Addresses are compared verbatim; no case folding or stringprep is done
//! here, the host is expected to hand us normalised strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("address {0:?} has an empty local part")]
    EmptyLocal(String),
    #[error("address {0:?} has an empty domain")]
    EmptyDomain(String),
    #[error("bare address {0:?} must not carry a resource")]
    UnexpectedResource(String),
    #[error("full address {0:?} is missing a resource")]
    MissingResource(String),
}

/// Stable identity key of a peer. Immutable for the peer's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BareAddress(String);

impl BareAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Attach a resource, producing a session address for this peer.
    pub fn with_resource(&self, resource: &str) -> Result<FullAddress, AddressError> {
        if resource.is_empty() {
            return Err(AddressError::MissingResource(self.0.clone()));
        }
        Ok(FullAddress {
            bare: self.clone(),
            resource: resource.to_string(),
        })
    }

    fn validate(s: &str) -> Result<(), AddressError> {
        if s.trim().is_empty() {
            return Err(AddressError::Empty);
        }
        if s.contains('/') {
            return Err(AddressError::UnexpectedResource(s.to_string()));
        }
        match s.split_once('@') {
            Some(("", _)) => Err(AddressError::EmptyLocal(s.to_string())),
            Some((_, "")) => Err(AddressError::EmptyDomain(s.to_string())),
            _ => Ok(()),
        }
    }
}

impl FromStr for BareAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s)?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for BareAddress {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<BareAddress> for String {
    fn from(addr: BareAddress) -> Self {
        addr.0
    }
}

impl fmt::Display for BareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of one live session of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FullAddress {
    bare: BareAddress,
    resource: String,
}

impl FullAddress {
    /// The peer this session belongs to.
    pub fn bare(&self) -> &BareAddress {
        &self.bare
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl FromStr for FullAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(AddressError::Empty);
        }
        // The resource may itself contain '/', so split on the first one only.
        match s.split_once('/') {
            Some((bare, resource)) if !resource.is_empty() => {
                let bare: BareAddress = bare.parse()?;
                bare.with_resource(resource)
            }
            _ => Err(AddressError::MissingResource(s.to_string())),
        }
    }
}

impl TryFrom<String> for FullAddress {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FullAddress> for String {
    fn from(addr: FullAddress) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for FullAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bare, self.resource)
    }
}
