//! Identity and state-root types.

use serde::{Deserialize, Serialize};

/// Opaque handle naming a distributed identity (a chain tree) in the community.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    /// Wrap an identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an identity from a public address (`did:murmur:<hex>`).
    pub fn from_address(address: &[u8; 32]) -> Self {
        Self(format!("did:murmur:{}", hex::encode(address)))
    }

    /// Get the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Did {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Did {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A content address (Blake3 hash) identifying one value of a chain tree.
///
/// Roots are compared structurally: two roots are equal when their bytes are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateRoot(pub [u8; 32]);

impl StateRoot {
    /// Create a root from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Decode a root from an untrusted byte slice.
    ///
    /// Returns `None` unless the slice is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// The root of a freshly created, empty tree for `did`.
    pub fn genesis(did: &Did) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"murmur:genesis:");
        hasher.update(did.as_str().as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }
}

impl std::fmt::Display for StateRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 hex chars
        write!(f, "{}...", &self.to_hex()[..8])
    }
}

/// Result of playing transactions against a tree.
///
/// The new root is known as soon as the write is applied locally; it still
/// has to converge across the community before other nodes report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// The tree the transactions were applied to.
    pub did: Did,
    /// Root of the tree after the transactions.
    pub new_root: StateRoot,
}
