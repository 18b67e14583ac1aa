//! Strongly-typed identifiers.
//!
//! Each identifier is a thin wrapper around a UUID with a phantom marker so
//! identifiers for different entities cannot be mixed up. Capability
//! identities are *not* UUIDs; they are interned tokens, see
//! [`crate::symbol`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

/// A type-safe identifier based on UUID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Id<T> {
    uuid: Uuid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    /// Create a new random identifier.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Create an identifier from a specific UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            _marker: PhantomData,
        }
    }

    /// Get the underlying UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl<T> FromStr for Id<T> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_uuid(Uuid::parse_str(s)?))
    }
}

/// Marker type for live module instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceMarker;

/// Identifier of one instantiation of a module.
///
/// Every load produces a fresh `InstanceId`, so reloading the same module
/// path yields an observably different instance.
pub type InstanceId = Id<InstanceMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_new_is_unique() {
        assert_ne!(InstanceId::new(), InstanceId::new());
    }

    #[test]
    fn test_id_round_trips_through_str() {
        let uuid_str = "550e8400-e29b-41d4-a716-446655440000";
        let id = InstanceId::from_str(uuid_str).unwrap();
        assert_eq!(id.to_string(), uuid_str);
        assert_eq!(id.uuid(), Uuid::parse_str(uuid_str).unwrap());
    }
}
