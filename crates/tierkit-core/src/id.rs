//! Assembly identifiers and derived provider identities.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Identifies a single assembly pass.
/// Uses UUIDv7 so manifests sort by synthesis time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct AssemblyId(Uuid);

impl AssemblyId {
    /// Create a new unique AssemblyId using UUIDv7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create an AssemblyId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Lowercase hex digest unique to this assembly, a node, and one of its attributes.
    ///
    /// Stands in for the identifiers a provider assigns at creation time. The
    /// same inputs always produce the same digest.
    pub fn digest(&self, node: &str, attribute: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hasher.update(node.as_bytes());
        hasher.update([0u8]);
        hasher.update(attribute.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl Default for AssemblyId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for AssemblyId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<AssemblyId> for Uuid {
    fn from(id: AssemblyId) -> Self {
        id.0
    }
}

impl std::str::FromStr for AssemblyId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}
