//! Read-only snapshot of the cache for debugging panels and the CLI.

use std::fmt;

use serde::Serialize;

use crate::domain::entities::{
    AnimatedResourceEntry, CacheEntry, ResourceEntry, ResourceKey, StoreKind, TextureId,
};

use super::fetch_coordinator::FetchKey;
use super::resource_store::ResourceStore;

/// Snapshot of every store and background job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceReport {
    /// One section per store, in sweep order.
    pub stores: Vec<StoreReport>,
    /// Textures held by the static registry.
    pub static_textures: Vec<TextureId>,
    /// Jobs whose result has not been claimed.
    pub in_flight: Vec<JobReport>,
    /// Finished jobs waiting to be claimed.
    pub pending_handoff: Vec<JobReport>,
    /// Jobs spawned since the manager was created.
    pub background_jobs_spawned: u64,
    /// Tasks still alive on the runtime.
    pub running_tasks: usize,
}

impl ResourceReport {
    /// Total number of cached entries across all stores.
    #[must_use]
    pub fn total_entries(&self) -> usize {
        self.stores.iter().map(|s| s.entries.len()).sum()
    }

    /// The section for `kind`.
    #[must_use]
    pub fn store(&self, kind: StoreKind) -> Option<&StoreReport> {
        self.stores.iter().find(|s| s.kind == kind)
    }
}

/// Entries of one store, sorted by key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreReport {
    /// Store category.
    pub kind: StoreKind,
    /// Entries sorted by key.
    pub entries: Vec<EntryReport>,
}

impl StoreReport {
    /// Builds the section for `store`.
    pub fn from_store<E: CacheEntry + Describe>(store: &ResourceStore<E>) -> Self {
        let mut entries: Vec<_> = store
            .iter()
            .map(|(key, entry)| entry.describe(key))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            kind: store.kind(),
            entries,
        }
    }
}

/// One cached entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryReport {
    /// Resource key.
    pub key: ResourceKey,
    /// Current texture.
    pub texture: TextureId,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Source channel count.
    pub channels: u8,
    /// Seconds left before eviction.
    pub remaining_lifetime: f32,
    /// Playback state of animated entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation: Option<AnimationReport>,
}

/// Playback state of an animated entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnimationReport {
    /// Number of frames.
    pub frame_count: usize,
    /// Next frame to upload.
    pub current_frame: usize,
    /// Seconds accumulated towards the next swap.
    pub accumulated_time: f32,
    /// Bytes held for all frames.
    pub frame_buffer_bytes: usize,
}

/// A background job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    /// Target store.
    pub kind: StoreKind,
    /// Resource key.
    pub key: ResourceKey,
}

impl From<FetchKey> for JobReport {
    fn from((kind, key): FetchKey) -> Self {
        Self { kind, key }
    }
}

/// Turns a cached entry into its report line.
pub trait Describe {
    /// Describes the entry stored under `key`.
    fn describe(&self, key: &ResourceKey) -> EntryReport;
}

fn describe_core(entry: &ResourceEntry, key: &ResourceKey) -> EntryReport {
    let image = entry.image();
    EntryReport {
        key: key.clone(),
        texture: image.texture,
        width: image.meta.width,
        height: image.meta.height,
        channels: image.meta.channels,
        remaining_lifetime: entry.remaining_lifetime(),
        animation: None,
    }
}

impl Describe for ResourceEntry {
    fn describe(&self, key: &ResourceKey) -> EntryReport {
        describe_core(self, key)
    }
}

impl Describe for AnimatedResourceEntry {
    fn describe(&self, key: &ResourceKey) -> EntryReport {
        EntryReport {
            animation: Some(AnimationReport {
                frame_count: self.frame_count(),
                current_frame: self.current_frame(),
                accumulated_time: self.accumulated_time(),
                frame_buffer_bytes: self.frame_buffer_len(),
            }),
            ..describe_core(self.core(), key)
        }
    }
}

impl fmt::Display for EntryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{}x{} tex={} ttl={:.2}",
            self.key, self.width, self.height, self.channels, self.texture, self.remaining_lifetime
        )?;
        if let Some(animation) = &self.animation {
            write!(
                f,
                " frame {}/{} +{:.3}s ({} bytes)",
                animation.current_frame,
                animation.frame_count,
                animation.accumulated_time,
                animation.frame_buffer_bytes
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for ResourceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for store in &self.stores {
            writeln!(f, "{} ({}):", store.kind, store.entries.len())?;
            for entry in &store.entries {
                writeln!(f, "  {entry}")?;
            }
        }
        writeln!(f, "static textures ({}):", self.static_textures.len())?;
        for texture in &self.static_textures {
            writeln!(f, "  {texture}")?;
        }
        writeln!(
            f,
            "background jobs: {} in flight, {} awaiting handoff, {} tasks alive, {} spawned",
            self.in_flight.len(),
            self.pending_handoff.len(),
            self.running_tasks,
            self.background_jobs_spawned
        )?;
        for job in &self.in_flight {
            writeln!(f, "  {} {}", job.kind, job.key)?;
        }
        Ok(())
    }
}
