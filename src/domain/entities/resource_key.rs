//! Identity of a cached resource.

use serde::Serialize;

/// Unique identity of a cached image.
///
/// Local images are keyed by file path, in-memory buffers by a caller supplied
/// id (or a content hash), network images by the caller supplied id. Two logical
/// images sharing a key collide: the first one decoded wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Creates a key from any string-like input.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Creates a key from a file path.
    #[must_use]
    pub fn from_path(path: &std::path::Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }

    /// Creates a key from the content of an in-memory buffer.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(format!("mem:{}", short_hash(bytes)))
    }

    /// Returns a filesystem-safe digest of the key.
    #[must_use]
    pub fn digest(&self) -> String {
        short_hash(self.0.as_bytes())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn short_hash(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ResourceKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&std::path::Path> for ResourceKey {
    fn from(path: &std::path::Path) -> Self {
        Self::from_path(path)
    }
}

/// Category of store an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Still images decoded from files or memory.
    Image,
    /// Animated images decoded from files or memory.
    Animated,
    /// Still images fetched over HTTP.
    Network,
    /// Animated images fetched over HTTP.
    AnimatedNetwork,
}

impl StoreKind {
    /// All store kinds, in sweep order.
    pub const ALL: [Self; 4] = [
        Self::Animated,
        Self::Network,
        Self::AnimatedNetwork,
        Self::Image,
    ];

    /// Returns true for the animated categories.
    #[must_use]
    pub const fn is_animated(self) -> bool {
        matches!(self, Self::Animated | Self::AnimatedNetwork)
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "images"),
            Self::Animated => write!(f, "animated images"),
            Self::Network => write!(f, "network images"),
            Self::AnimatedNetwork => write!(f, "animated network images"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_keys_are_stable() {
        let a = ResourceKey::from_bytes(b"abc");
        let b = ResourceKey::from_bytes(b"abc");
        let c = ResourceKey::from_bytes(b"abd");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("mem:"));
    }

    #[test]
    fn test_digest_is_filesystem_safe() {
        let key = ResourceKey::new("../avatars/user 1?.png");
        let digest = key.digest();

        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
