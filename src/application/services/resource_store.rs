//! Keyed store of cached entries with lifetime-based eviction.

use std::collections::HashMap;

use tracing::debug;

use crate::domain::entities::{CacheEntry, ResourceKey, StoreKind};
use crate::domain::ports::TextureBackend;

/// Maps resource keys to cached entries of one category.
///
/// Not synchronized: only the foreground thread touches a store.
pub struct ResourceStore<E> {
    kind: StoreKind,
    entries: HashMap<ResourceKey, E>,
}

impl<E: CacheEntry> ResourceStore<E> {
    /// Creates an empty store.
    #[must_use]
    pub fn new(kind: StoreKind) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// Category of this store.
    #[must_use]
    pub const fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks if `key` is cached.
    #[must_use]
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Looks up an entry.
    #[must_use]
    pub fn lookup(&self, key: &ResourceKey) -> Option<&E> {
        self.entries.get(key)
    }

    /// Looks up an entry for mutation.
    pub fn lookup_mut(&mut self, key: &ResourceKey) -> Option<&mut E> {
        self.entries.get_mut(key)
    }

    /// Inserts an entry, releasing the texture of any entry it displaces.
    pub fn insert(&mut self, key: ResourceKey, entry: E, default: &dyn TextureBackend) {
        debug!(kind = ?self.kind, key = %key, "Caching entry");
        if let Some(mut old) = self.entries.insert(key, entry) {
            old.core_mut().release(default);
        }
    }

    /// Removes an entry and releases its texture. Returns true if it existed.
    pub fn remove(&mut self, key: &ResourceKey, default: &dyn TextureBackend) -> bool {
        match self.entries.remove(key) {
            Some(mut entry) => {
                entry.core_mut().release(default);
                debug!(kind = ?self.kind, key = %key, "Removed entry");
                true
            }
            None => false,
        }
    }

    /// Iterates over all entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKey, &E)> {
        self.entries.iter()
    }

    /// Ages every entry by `dt` seconds, evicting those whose lifetime drops below zero.
    ///
    /// Returns the number of evicted entries.
    pub fn sweep(&mut self, dt: f32, default: &dyn TextureBackend) -> usize {
        let kind = self.kind;
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            if entry.core_mut().age(dt) {
                entry.core_mut().release(default);
                debug!(kind = ?kind, key = %key, "Evicted expired entry");
                false
            } else {
                entry.on_tick(dt);
                true
            }
        });
        before - self.entries.len()
    }

    /// Releases and removes every entry. Returns the number removed.
    pub fn clear(&mut self, default: &dyn TextureBackend) -> usize {
        let count = self.entries.len();
        for (_, mut entry) in self.entries.drain() {
            entry.core_mut().release(default);
        }
        count
    }
}

impl<E> std::fmt::Debug for ResourceStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore")
            .field("kind", &self.kind)
            .field("len", &self.entries.len())
            .finish()
    }
}
