//! Foreground entry point of the cache.
//!
//! Every request runs synchronously on the thread that owns the manager.
//! Decoding of local stills happens inline; animated images and network
//! images are produced by background jobs and installed by the first request
//! that finds their result waiting.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{
    AnimatedImage, AnimatedResourceEntry, CacheEntry, CachedImage, DecodedImage, ImageState, Rect,
    ResourceEntry, ResourceKey, StoreKind, TextureId,
};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{HttpFetcher, ImageDecoder, PlaceholderPainter, TextureBackend};
use crate::infrastructure::config::CacheConfig;
use crate::infrastructure::image::{DiskImageCache, ImageCrateDecoder, ReqwestFetcher};
use crate::presentation::placeholder::placeholder_geometry;

use super::animation;
use super::diagnostics::{JobReport, ResourceReport, StoreReport};
use super::fetch_coordinator::{
    FetchCoordinator, FetchPoll, FetchSettings, Payload, RuntimeHandle, run_blocking,
};
use super::resource_store::ResourceStore;
use super::static_registry::StaticImageRegistry;

/// Per-request overrides.
#[derive(Clone, Default)]
pub struct LoadOptions {
    /// Lifetime in seconds. Defaults to the configured lifetime.
    pub lifetime: Option<f32>,
    /// Playback speed of animations. Defaults to the configured speed.
    pub speed: Option<f32>,
    /// Backend that creates, and later destroys, this entry's textures.
    pub backend: Option<Arc<dyn TextureBackend>>,
}

impl LoadOptions {
    /// Options with every value defaulted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lifetime.
    #[must_use]
    pub const fn lifetime(mut self, seconds: f32) -> Self {
        self.lifetime = Some(seconds);
        self
    }

    /// Sets the playback speed.
    #[must_use]
    pub const fn speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Sets the texture backend for this entry.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn TextureBackend>) -> Self {
        self.backend = Some(backend);
        self
    }
}

impl std::fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOptions")
            .field("lifetime", &self.lifetime)
            .field("speed", &self.speed)
            .field("has_backend", &self.backend.is_some())
            .finish()
    }
}

/// A network image request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    /// Scheme and host, e.g. `https://cdn.example.com`.
    pub url: String,
    /// Path on the host.
    pub path: String,
    /// Cache key.
    pub id: ResourceKey,
    /// Read and write the disk cache.
    pub cache_file: bool,
}

impl NetworkRequest {
    /// Creates a request that bypasses the disk cache.
    #[must_use]
    pub fn new(url: impl Into<String>, path: impl Into<String>, id: impl Into<ResourceKey>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            id: id.into(),
            cache_file: false,
        }
    }

    /// Enables or disables the disk cache for this request.
    #[must_use]
    pub const fn cache_file(mut self, cache_file: bool) -> Self {
        self.cache_file = cache_file;
        self
    }
}

/// Builds an [`ImageManager`].
pub struct ImageManagerBuilder {
    config: CacheConfig,
    backend: Arc<dyn TextureBackend>,
    decoder: Option<Arc<dyn ImageDecoder>>,
    fetcher: Option<Arc<dyn HttpFetcher>>,
    placeholder: Option<Arc<dyn PlaceholderPainter>>,
    disk_cache: Option<DiskImageCache>,
    runtime: Option<Handle>,
}

impl ImageManagerBuilder {
    /// Starts a builder around the host's default texture backend.
    #[must_use]
    pub fn new(backend: Arc<dyn TextureBackend>) -> Self {
        Self {
            config: CacheConfig::default(),
            backend,
            decoder: None,
            fetcher: None,
            placeholder: None,
            disk_cache: None,
            runtime: None,
        }
    }

    /// Uses `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the `image` crate decoder.
    #[must_use]
    pub fn decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Replaces the reqwest fetcher.
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn HttpFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Sets the default loading indicator.
    #[must_use]
    pub fn placeholder(mut self, painter: Arc<dyn PlaceholderPainter>) -> Self {
        self.placeholder = Some(painter);
        self
    }

    /// Uses `cache` for network requests that ask for the disk cache.
    #[must_use]
    pub fn disk_cache(mut self, cache: DiskImageCache) -> Self {
        self.disk_cache = Some(cache);
        self
    }

    /// Spawns background jobs onto `handle`.
    #[must_use]
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Builds the manager.
    ///
    /// Without an explicit runtime the current one is used; outside of any
    /// runtime a private one is started and shut down with the manager.
    ///
    /// # Errors
    /// Returns `CacheError::Config` for invalid settings, or an error if the
    /// HTTP client or the runtime cannot be created.
    pub fn build(self) -> CacheResult<ImageManager> {
        self.config.validate()?;

        let decoder: Arc<dyn ImageDecoder> = match self.decoder {
            Some(decoder) => decoder,
            None => Arc::new(ImageCrateDecoder),
        };
        let fetcher: Arc<dyn HttpFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(ReqwestFetcher::new(self.config.max_fetch_duration())?),
        };
        let runtime = match self.runtime {
            Some(handle) => RuntimeHandle::Borrowed(handle),
            None => RuntimeHandle::current_or_owned(self.config.max_concurrent_fetches())?,
        };

        let settings = FetchSettings::from(&self.config);
        info!(
            max_concurrent = settings.max_concurrent,
            max_duration_secs = settings.max_duration.as_secs(),
            "Image cache ready"
        );

        Ok(ImageManager {
            backend: self.backend,
            decoder,
            fetcher,
            placeholder: self.placeholder,
            disk_cache: self.disk_cache.map(Arc::new),
            images: ResourceStore::new(StoreKind::Image),
            animated: ResourceStore::new(StoreKind::Animated),
            network_images: ResourceStore::new(StoreKind::Network),
            animated_network: ResourceStore::new(StoreKind::AnimatedNetwork),
            statics: StaticImageRegistry::new(),
            fetches: FetchCoordinator::new(settings, runtime),
            config: self.config,
        })
    }
}

/// Time-to-live cache of decoded images and their textures.
pub struct ImageManager {
    config: CacheConfig,
    backend: Arc<dyn TextureBackend>,
    decoder: Arc<dyn ImageDecoder>,
    fetcher: Arc<dyn HttpFetcher>,
    placeholder: Option<Arc<dyn PlaceholderPainter>>,
    disk_cache: Option<Arc<DiskImageCache>>,
    images: ResourceStore<ResourceEntry>,
    animated: ResourceStore<AnimatedResourceEntry>,
    network_images: ResourceStore<ResourceEntry>,
    animated_network: ResourceStore<AnimatedResourceEntry>,
    statics: StaticImageRegistry,
    fetches: FetchCoordinator,
}

impl ImageManager {
    /// Starts a builder.
    #[must_use]
    pub fn builder(backend: Arc<dyn TextureBackend>) -> ImageManagerBuilder {
        ImageManagerBuilder::new(backend)
    }

    /// Creates a manager with default settings and adapters.
    ///
    /// # Errors
    /// See [`ImageManagerBuilder::build`].
    pub fn new(backend: Arc<dyn TextureBackend>) -> CacheResult<Self> {
        Self::builder(backend).build()
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns a still image from a file, decoding it on a miss.
    pub fn get_image(&mut self, path: impl AsRef<Path>, options: &LoadOptions) -> ImageState<'_> {
        let path = path.as_ref();
        let key = ResourceKey::from_path(path);
        let decoder = Arc::clone(&self.decoder);
        self.get_still(StoreKind::Image, &key, options, || decoder.decode_file(path))
    }

    /// Returns a still image decoded from `bytes`, cached under `key`.
    ///
    /// The bytes are only read on a miss.
    pub fn get_image_from_memory(
        &mut self,
        key: &ResourceKey,
        bytes: &[u8],
        options: &LoadOptions,
    ) -> ImageState<'_> {
        let decoder = Arc::clone(&self.decoder);
        self.get_still(StoreKind::Image, key, options, || decoder.decode(bytes))
    }

    /// Returns an animated image from a file, decoding it in the background.
    pub fn get_animated(&mut self, path: impl AsRef<Path>, options: &LoadOptions) -> ImageState<'_> {
        let path = path.as_ref().to_path_buf();
        let key = ResourceKey::from_path(&path);
        let decoder = Arc::clone(&self.decoder);
        self.get_animation(StoreKind::Animated, &key, options, move |_| async move {
            run_blocking(move || decoder.decode_animated_file(&path))
                .await
                .map(Payload::Animated)
        })
    }

    /// Returns an animated image decoded in the background from `bytes`.
    pub fn get_animated_from_memory(
        &mut self,
        key: &ResourceKey,
        bytes: Bytes,
        options: &LoadOptions,
    ) -> ImageState<'_> {
        let decoder = Arc::clone(&self.decoder);
        self.get_animation(StoreKind::Animated, key, options, move |_| async move {
            run_blocking(move || decoder.decode_animated(&bytes))
                .await
                .map(Payload::Animated)
        })
    }

    /// Returns a still image fetched over HTTP.
    ///
    /// With `cache_file` set, a fresh copy on disk is decoded synchronously
    /// instead of starting a fetch, and fetched bytes are written to disk.
    /// The disk is not consulted while a fetch for the id is in flight, since
    /// that job may be rewriting the file.
    pub fn get_network_image(
        &mut self,
        request: &NetworkRequest,
        options: &LoadOptions,
    ) -> ImageState<'_> {
        let kind = StoreKind::Network;
        let key = &request.id;
        let lifetime = self.lifetime(options);

        if let Some(entry) = self.network_images.lookup_mut(key) {
            entry.refresh(lifetime);
            trace!(key = %key, "Network image cache hit");
            return Self::ready(&self.network_images, key);
        }

        if !self.fetches.is_in_flight(kind, key)
            && let Some(bytes) = self.read_disk(request)
        {
            match self.decoder.decode(&bytes) {
                Ok(image) => {
                    debug!(key = %key, "Loaded network image from disk");
                    self.install_still(kind, key.clone(), image, lifetime, options);
                    return Self::ready(&self.network_images, key);
                }
                Err(e) => self.discard_disk_copy(key, &e),
            }
        }

        match self.fetches.poll(kind, key) {
            FetchPoll::Completed(Ok(payload)) => {
                self.install_still(kind, key.clone(), payload.into_still(), lifetime, options);
                Self::ready(&self.network_images, key)
            }
            FetchPoll::Completed(Err(e)) | FetchPoll::CoolingDown(e) => ImageState::Failed(e),
            FetchPoll::Pending => ImageState::Loading,
            FetchPoll::Idle => {
                debug!(key = %key, url = %request.url, path = %request.path, "Spawning fetch");
                let job = self.network_job(request, false);
                self.fetches.spawn(kind, key.clone(), job);
                ImageState::Loading
            }
        }
    }

    /// Returns an animated image fetched over HTTP.
    ///
    /// Disk handling matches [`Self::get_network_image`].
    pub fn get_network_animated(
        &mut self,
        request: &NetworkRequest,
        options: &LoadOptions,
    ) -> ImageState<'_> {
        let kind = StoreKind::AnimatedNetwork;
        let key = &request.id;

        if !self.animated_network.contains(key)
            && !self.fetches.is_in_flight(kind, key)
            && let Some(bytes) = self.read_disk(request)
        {
            match self.decoder.decode_animated(&bytes) {
                Ok(image) => {
                    debug!(key = %key, "Loaded animated network image from disk");
                    let lifetime = self.lifetime(options);
                    if let Err(e) = self.install_animated(kind, key.clone(), image, lifetime, options) {
                        return ImageState::Failed(e);
                    }
                }
                Err(e) => self.discard_disk_copy(key, &e),
            }
        }

        self.get_animation(kind, key, options, |this| this.network_job(request, true))
    }

    /// Ages every entry by `dt` seconds and evicts the expired ones.
    ///
    /// Also ages unclaimed background results and advances the clocks of
    /// animated entries. Returns the number of evicted entries.
    pub fn tick(&mut self, dt: f32) -> usize {
        self.fetches.drain();
        self.fetches.age(dt);

        let default = self.backend.as_ref();
        let evicted = self.animated.sweep(dt, default)
            + self.network_images.sweep(dt, default)
            + self.animated_network.sweep(dt, default)
            + self.images.sweep(dt, default);
        if evicted > 0 {
            debug!(evicted, "Swept expired entries");
        }
        evicted
    }

    /// Loads a texture that is never evicted.
    ///
    /// # Errors
    /// Returns `CacheError::Decode` if the file cannot be read or decoded.
    pub fn load_static(
        &mut self,
        path: impl AsRef<Path>,
        backend: Option<&Arc<dyn TextureBackend>>,
    ) -> CacheResult<TextureId> {
        let path = path.as_ref();
        let image = self.decoder.decode_file(path).inspect_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to load static image");
        })?;
        let owner = backend.map_or(self.backend.as_ref(), |b| b.as_ref());
        let texture = owner.create_texture(image.upload());
        self.statics.register(texture, backend.cloned());
        Ok(texture)
    }

    /// Destroys a texture returned by [`Self::load_static`] through the
    /// backend that created it.
    ///
    /// Returns false, and does nothing, if the handle is not registered (for
    /// example on a second call).
    pub fn delete_static(&mut self, texture: TextureId) -> bool {
        let Some(registered) = self.statics.take(texture) else {
            debug!(texture = %texture, "Static texture not registered");
            return false;
        };
        registered.destroy(self.backend.as_ref());
        true
    }

    /// Destroys every cached texture, including static ones, and cancels
    /// background jobs.
    pub fn clear(&mut self) {
        self.fetches.cancel_all();
        let default = self.backend.as_ref();
        let removed = self.images.clear(default)
            + self.animated.clear(default)
            + self.network_images.clear(default)
            + self.animated_network.clear(default);
        let statics = self.statics.take_all();
        for texture in &statics {
            texture.destroy(default);
        }
        info!(removed, statics = statics.len(), "Cleared image cache");
    }

    /// Aborts background jobs. Their keys may be requested again immediately.
    pub fn cancel_all(&mut self) {
        self.fetches.cancel_all();
    }

    /// Moves finished background results into the handoff table.
    ///
    /// Requests and ticks already do this; hosts only need it to observe
    /// completion without making a request. Returns the number received.
    pub fn poll_background(&mut self) -> usize {
        self.fetches.drain()
    }

    /// Returns true if `key` is cached in the `kind` store.
    #[must_use]
    pub fn contains(&self, kind: StoreKind, key: &ResourceKey) -> bool {
        match kind {
            StoreKind::Image => self.images.contains(key),
            StoreKind::Animated => self.animated.contains(key),
            StoreKind::Network => self.network_images.contains(key),
            StoreKind::AnimatedNetwork => self.animated_network.contains(key),
        }
    }

    /// Returns true if a background job for `key` has not been claimed yet.
    #[must_use]
    pub fn is_in_flight(&self, kind: StoreKind, key: &ResourceKey) -> bool {
        self.fetches.is_in_flight(kind, key)
    }

    /// Returns true if a finished result for `key` is waiting to be claimed.
    #[must_use]
    pub fn is_completed(&self, kind: StoreKind, key: &ResourceKey) -> bool {
        self.fetches.is_completed(kind, key)
    }

    /// Looks up a cached animated entry.
    #[must_use]
    pub fn animated_entry(&self, kind: StoreKind, key: &ResourceKey) -> Option<&AnimatedResourceEntry> {
        match kind {
            StoreKind::AnimatedNetwork => self.animated_network.lookup(key),
            _ => self.animated.lookup(key),
        }
    }

    /// Snapshot of every store and background job.
    #[must_use]
    pub fn report(&self) -> ResourceReport {
        ResourceReport {
            stores: vec![
                StoreReport::from_store(&self.animated),
                StoreReport::from_store(&self.network_images),
                StoreReport::from_store(&self.animated_network),
                StoreReport::from_store(&self.images),
            ],
            static_textures: self.statics.textures(),
            in_flight: self
                .fetches
                .in_flight_keys()
                .into_iter()
                .map(JobReport::from)
                .collect(),
            pending_handoff: self
                .fetches
                .completed_keys()
                .into_iter()
                .map(JobReport::from)
                .collect(),
            background_jobs_spawned: self.fetches.spawned_total(),
            running_tasks: self.fetches.running_tasks(),
        }
    }

    /// Draws the loading indicator centred in `rect`.
    ///
    /// `painter` overrides the configured one; without either nothing is drawn.
    pub fn draw_placeholder(&self, rect: Rect, painter: Option<&dyn PlaceholderPainter>) {
        let painter = match (painter, &self.placeholder) {
            (Some(painter), _) => painter,
            (None, Some(default)) => default.as_ref(),
            (None, None) => return,
        };
        let (center, radius) = placeholder_geometry(rect);
        painter.draw_placeholder(center, radius);
    }

    /// Requests an animated file and draws the indicator unless it is ready.
    pub fn show_animated(
        &mut self,
        path: impl AsRef<Path>,
        options: &LoadOptions,
        rect: Rect,
        painter: Option<&dyn PlaceholderPainter>,
    ) -> Option<TextureId> {
        let texture = self.get_animated(path, options).texture();
        self.show(texture, rect, painter)
    }

    /// Requests a network image and draws the indicator unless it is ready.
    pub fn show_network_image(
        &mut self,
        request: &NetworkRequest,
        options: &LoadOptions,
        rect: Rect,
        painter: Option<&dyn PlaceholderPainter>,
    ) -> Option<TextureId> {
        let texture = self.get_network_image(request, options).texture();
        self.show(texture, rect, painter)
    }

    /// Requests an animated network image and draws the indicator unless it is ready.
    pub fn show_network_animated(
        &mut self,
        request: &NetworkRequest,
        options: &LoadOptions,
        rect: Rect,
        painter: Option<&dyn PlaceholderPainter>,
    ) -> Option<TextureId> {
        let texture = self.get_network_animated(request, options).texture();
        self.show(texture, rect, painter)
    }

    fn show(
        &self,
        texture: Option<TextureId>,
        rect: Rect,
        painter: Option<&dyn PlaceholderPainter>,
    ) -> Option<TextureId> {
        if texture.is_none() {
            self.draw_placeholder(rect, painter);
        }
        texture
    }

    fn lifetime(&self, options: &LoadOptions) -> f32 {
        options.lifetime.unwrap_or(self.config.default_lifetime_secs)
    }

    fn speed(&self, options: &LoadOptions) -> f32 {
        options.speed.unwrap_or(self.config.animation_speed)
    }

    fn ready<'a, E: CacheEntry>(store: &'a ResourceStore<E>, key: &ResourceKey) -> ImageState<'a> {
        match store.lookup(key) {
            Some(entry) => ImageState::Ready(entry.core().image()),
            None => ImageState::Failed(CacheError::Runtime(format!(
                "entry {key} missing right after install"
            ))),
        }
    }

    fn get_still(
        &mut self,
        kind: StoreKind,
        key: &ResourceKey,
        options: &LoadOptions,
        decode: impl FnOnce() -> CacheResult<DecodedImage>,
    ) -> ImageState<'_> {
        let lifetime = self.lifetime(options);
        if let Some(entry) = self.images.lookup_mut(key) {
            entry.refresh(lifetime);
            trace!(key = %key, "Image cache hit");
        } else {
            trace!(key = %key, "Image cache miss, decoding");
            match decode() {
                Ok(image) => self.install_still(kind, key.clone(), image, lifetime, options),
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to decode image");
                    return ImageState::Failed(e);
                }
            }
        }
        Self::ready(&self.images, key)
    }

    fn get_animation<J, F>(
        &mut self,
        kind: StoreKind,
        key: &ResourceKey,
        options: &LoadOptions,
        job: J,
    ) -> ImageState<'_>
    where
        J: FnOnce(&mut Self) -> F,
        F: Future<Output = CacheResult<Payload>> + Send + 'static,
    {
        let lifetime = self.lifetime(options);
        let speed = self.speed(options);
        let default = Arc::clone(&self.backend);

        if let Some(entry) = self.animated_store_mut(kind).lookup_mut(key) {
            entry.core_mut().refresh(lifetime);
            animation::advance(entry, speed, default.as_ref());
            trace!(kind = ?kind, key = %key, "Animated image cache hit");
        } else {
            match self.fetches.poll(kind, key) {
                FetchPoll::Completed(Ok(payload)) => {
                    if let Err(e) = self.install_animated(
                        kind,
                        key.clone(),
                        payload.into_animated(),
                        lifetime,
                        options,
                    ) {
                        return ImageState::Failed(e);
                    }
                }
                FetchPoll::Completed(Err(e)) | FetchPoll::CoolingDown(e) => {
                    return ImageState::Failed(e);
                }
                FetchPoll::Pending => return ImageState::Loading,
                FetchPoll::Idle => {
                    debug!(kind = ?kind, key = %key, "Spawning background decode");
                    let job = job(self);
                    self.fetches.spawn(kind, key.clone(), job);
                    return ImageState::Loading;
                }
            }
        }

        match kind {
            StoreKind::AnimatedNetwork => Self::ready(&self.animated_network, key),
            _ => Self::ready(&self.animated, key),
        }
    }

    fn still_store_mut(&mut self, kind: StoreKind) -> &mut ResourceStore<ResourceEntry> {
        match kind {
            StoreKind::Network => &mut self.network_images,
            _ => &mut self.images,
        }
    }

    fn animated_store_mut(&mut self, kind: StoreKind) -> &mut ResourceStore<AnimatedResourceEntry> {
        match kind {
            StoreKind::AnimatedNetwork => &mut self.animated_network,
            _ => &mut self.animated,
        }
    }

    fn install_still(
        &mut self,
        kind: StoreKind,
        key: ResourceKey,
        image: DecodedImage,
        lifetime: f32,
        options: &LoadOptions,
    ) {
        let default = Arc::clone(&self.backend);
        let owner = options.backend.as_ref().unwrap_or(&default);
        let texture = owner.create_texture(image.upload());
        let entry = ResourceEntry::new(
            CachedImage {
                meta: image.meta,
                texture,
            },
            lifetime,
            options.backend.clone(),
        );
        self.still_store_mut(kind).insert(key, entry, default.as_ref());
    }

    fn install_animated(
        &mut self,
        kind: StoreKind,
        key: ResourceKey,
        image: AnimatedImage,
        lifetime: f32,
        options: &LoadOptions,
    ) -> CacheResult<()> {
        let default = Arc::clone(&self.backend);
        let owner = options.backend.as_ref().unwrap_or(&default);
        let entry = AnimatedResourceEntry::new(image, lifetime, owner.as_ref(), options.backend.clone())
            .inspect_err(|e| warn!(key = %key, error = %e, "Rejected animated image"))?;
        self.animated_store_mut(kind).insert(key, entry, default.as_ref());
        Ok(())
    }

    fn disk(&mut self) -> Option<Arc<DiskImageCache>> {
        if self.disk_cache.is_none() {
            match DiskImageCache::new(
                self.config.effective_cache_dir(),
                self.config.disk_cache_max_age(),
            ) {
                Ok(cache) => self.disk_cache = Some(Arc::new(cache)),
                Err(e) => {
                    warn!(error = %e, "Disk cache unavailable");
                    return None;
                }
            }
        }
        self.disk_cache.clone()
    }

    fn read_disk(&mut self, request: &NetworkRequest) -> Option<Vec<u8>> {
        if !request.cache_file {
            return None;
        }
        let disk = self.disk()?;
        let bytes = disk.load(&request.id)?;
        if let Err(e) = disk.touch(&request.id) {
            warn!(key = %request.id, error = %e, "Failed to refresh disk cache timestamp");
        }
        Some(bytes)
    }

    fn discard_disk_copy(&self, key: &ResourceKey, error: &CacheError) {
        warn!(key = %key, error = %error, "Discarding undecodable disk cache entry");
        if let Some(disk) = &self.disk_cache {
            disk.evict(key);
        }
    }

    fn network_job(
        &mut self,
        request: &NetworkRequest,
        animated: bool,
    ) -> impl Future<Output = CacheResult<Payload>> + Send + use<> {
        let fetcher = Arc::clone(&self.fetcher);
        let decoder = Arc::clone(&self.decoder);
        let disk = if request.cache_file { self.disk() } else { None };
        let url = request.url.clone();
        let path = request.path.clone();
        let key = request.id.clone();

        async move {
            let bytes = fetcher.fetch(&url, &path).await?;

            if let Some(disk) = disk {
                let body = bytes.clone();
                let stored = run_blocking(move || disk.store(&key, &body)).await;
                if let Err(e) = stored {
                    warn!(url = %url, path = %path, error = %e, "Failed to write disk cache");
                }
            }

            run_blocking(move || {
                if animated {
                    decoder.decode_animated(&bytes).map(Payload::Animated)
                } else {
                    decoder.decode(&bytes).map(Payload::Still)
                }
            })
            .await
        }
    }
}

impl std::fmt::Debug for ImageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageManager")
            .field("images", &self.images)
            .field("animated", &self.animated)
            .field("network_images", &self.network_images)
            .field("animated_network", &self.animated_network)
            .field("statics", &self.statics)
            .field("fetches", &self.fetches)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Point;
    use crate::domain::ports::MockPlaceholderPainter;
    use crate::domain::ports::mocks::{CORRUPT, RecordingBackend, StubDecoder, StubFetcher};
    use chrono::{TimeDelta, Utc};
    use mockall::predicate::eq;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    const HOST: &str = "https://cdn.test";

    struct Harness {
        manager: ImageManager,
        backend: Arc<RecordingBackend>,
        decoder: Arc<StubDecoder>,
        fetcher: Arc<StubFetcher>,
        temp: TempDir,
    }

    impl Harness {
        fn file(&self, name: &str, bytes: &[u8]) -> PathBuf {
            let path = self.temp.path().join(name);
            std::fs::write(&path, bytes).unwrap();
            path
        }

        fn disk(&self) -> DiskImageCache {
            DiskImageCache::new(self.temp.path().join("disk"), None).unwrap()
        }

        async fn settle(&mut self, kind: StoreKind, key: &ResourceKey) {
            for _ in 0..500 {
                self.manager.poll_background();
                if self.manager.is_completed(kind, key) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("background job for {key} never finished");
        }
    }

    fn test_config() -> CacheConfig {
        CacheConfig {
            settle_delay_ms: 0,
            max_concurrent_fetches: Some(4),
            ..CacheConfig::default()
        }
    }

    fn harness_with(config: CacheConfig, decoder: StubDecoder, fetcher: StubFetcher) -> Harness {
        let temp = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::new());
        let decoder = Arc::new(decoder);
        let fetcher = Arc::new(fetcher);
        let manager = ImageManager::builder(backend.clone())
            .config(config)
            .decoder(decoder.clone())
            .fetcher(fetcher.clone())
            .disk_cache(DiskImageCache::new(temp.path().join("disk"), None).unwrap())
            .runtime(Handle::current())
            .build()
            .unwrap();
        Harness {
            manager,
            backend,
            decoder,
            fetcher,
            temp,
        }
    }

    fn harness() -> Harness {
        harness_with(test_config(), StubDecoder::new(4, 2), StubFetcher::new())
    }

    #[tokio::test]
    async fn test_image_lives_for_its_lifetime() {
        let mut h = harness();
        let path = h.file("a.png", b"png");
        let options = LoadOptions::new().lifetime(2.0);

        let texture = h.manager.get_image(&path, &options).texture().unwrap();
        let key = ResourceKey::from_path(&path);

        assert_eq!(h.manager.tick(1.0), 0);
        assert!(h.manager.contains(StoreKind::Image, &key));

        assert_eq!(h.manager.tick(1.5), 1);
        assert!(!h.manager.contains(StoreKind::Image, &key));
        assert_eq!(h.backend.destroyed(), vec![texture]);
    }

    #[tokio::test]
    async fn test_request_refreshes_lifetime() {
        let mut h = harness();
        let path = h.file("a.png", b"png");
        let options = LoadOptions::new().lifetime(2.0);

        let first = h.manager.get_image(&path, &options).texture();
        h.manager.tick(1.5);
        let second = h.manager.get_image(&path, &options).texture();
        h.manager.tick(1.5);

        assert_eq!(first, second);
        assert!(h.manager.contains(StoreKind::Image, &ResourceKey::from_path(&path)));
        assert_eq!(h.decoder.calls(), 1);
        assert_eq!(h.backend.created_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_image_reports_meta() {
        let mut h = harness();
        let key = ResourceKey::from_bytes(b"png bytes");

        let state = h
            .manager
            .get_image_from_memory(&key, b"png bytes", &LoadOptions::new());

        let image = state.image().copied().unwrap();
        assert_eq!((image.meta.width, image.meta.height, image.meta.channels), (4, 2, 3));
        assert_eq!(h.backend.uploads()[0].meta, image.meta);
    }

    #[tokio::test]
    async fn test_decode_failure_caches_nothing() {
        let mut h = harness();
        let missing = h.temp.path().join("missing.png");
        let key = ResourceKey::new("bad");

        assert!(matches!(
            h.manager.get_image(&missing, &LoadOptions::new()),
            ImageState::Failed(CacheError::Decode(_))
        ));
        assert!(h.manager.get_image_from_memory(&key, CORRUPT, &LoadOptions::new()).is_failed());
        assert_eq!(h.manager.report().total_entries(), 0);
        assert_eq!(h.backend.created_count(), 0);
    }

    #[tokio::test]
    async fn test_override_backend_owns_texture() {
        let mut h = harness();
        let custom = Arc::new(RecordingBackend::starting_at(500));
        let options = LoadOptions::new().lifetime(0.5).backend(custom.clone());
        let key = ResourceKey::new("custom");

        let texture = h
            .manager
            .get_image_from_memory(&key, b"png", &options)
            .texture()
            .unwrap();
        h.manager.tick(1.0);

        assert_eq!(custom.destroyed(), vec![texture]);
        assert!(h.backend.destroyed().is_empty());
        assert_eq!(h.backend.created_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_network_requests_share_one_fetch() {
        let mut h = harness_with(test_config(), StubDecoder::new(4, 2), StubFetcher::gated());
        h.fetcher.respond("/a.png", b"png");
        let request = NetworkRequest::new(HOST, "/a.png", "avatar-1");
        let options = LoadOptions::new();

        assert!(h.manager.get_network_image(&request, &options).is_loading());
        assert!(h.manager.get_network_image(&request, &options).is_loading());
        assert_eq!(h.manager.report().background_jobs_spawned, 1);

        h.fetcher.release(1);
        h.settle(StoreKind::Network, &request.id).await;
        assert!(h.manager.is_in_flight(StoreKind::Network, &request.id));

        assert!(h.manager.get_network_image(&request, &options).is_ready());
        assert!(!h.manager.is_in_flight(StoreKind::Network, &request.id));
        assert_eq!(h.fetcher.calls(), 1);
        assert_eq!(h.manager.report().background_jobs_spawned, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_network_failure_is_retried_on_next_request() {
        let mut h = harness();
        h.fetcher.fail("/gone.png", "HTTP 404 Not Found");
        let request = NetworkRequest::new(HOST, "/gone.png", "gone");
        let options = LoadOptions::new();

        assert!(h.manager.get_network_image(&request, &options).is_loading());
        h.settle(StoreKind::Network, &request.id).await;

        assert!(matches!(
            h.manager.get_network_image(&request, &options),
            ImageState::Failed(CacheError::Fetch(_))
        ));
        assert!(!h.manager.contains(StoreKind::Network, &request.id));
        assert!(!h.manager.is_in_flight(StoreKind::Network, &request.id));

        assert!(h.manager.get_network_image(&request, &options).is_loading());
        assert_eq!(h.manager.report().background_jobs_spawned, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_cooldown_delays_retry() {
        let config = CacheConfig {
            retry_cooldown_secs: 10.0,
            ..test_config()
        };
        let mut h = harness_with(config, StubDecoder::new(1, 1), StubFetcher::new());
        let request = NetworkRequest::new(HOST, "/unknown.png", "unknown");
        let options = LoadOptions::new();

        h.manager.get_network_image(&request, &options);
        h.settle(StoreKind::Network, &request.id).await;
        assert!(h.manager.get_network_image(&request, &options).is_failed());

        assert!(h.manager.get_network_image(&request, &options).is_failed());
        assert_eq!(h.manager.report().background_jobs_spawned, 1);

        h.manager.tick(10.5);
        assert!(h.manager.get_network_image(&request, &options).is_loading());
        assert_eq!(h.manager.report().background_jobs_spawned, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fetch_timeout_fails_request() {
        let config = CacheConfig {
            max_fetch_duration_secs: 1,
            ..test_config()
        };
        let mut h = harness_with(config, StubDecoder::new(1, 1), StubFetcher::gated());
        let request = NetworkRequest::new(HOST, "/slow.png", "slow");

        h.manager.get_network_image(&request, &LoadOptions::new());
        h.settle(StoreKind::Network, &request.id).await;

        assert!(matches!(
            h.manager.get_network_image(&request, &LoadOptions::new()),
            ImageState::Failed(CacheError::Timeout { secs: 1 })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unclaimed_result_is_dropped_after_handoff_ttl() {
        let config = CacheConfig {
            handoff_ttl_secs: 1.0,
            ..test_config()
        };
        let mut h = harness_with(config, StubDecoder::new(1, 1), StubFetcher::new());
        h.fetcher.respond("/a.png", b"png");
        let request = NetworkRequest::new(HOST, "/a.png", "late");

        h.manager.get_network_image(&request, &LoadOptions::new());
        h.settle(StoreKind::Network, &request.id).await;
        h.manager.tick(1.5);

        assert!(!h.manager.is_in_flight(StoreKind::Network, &request.id));
        assert!(h.manager.get_network_image(&request, &LoadOptions::new()).is_loading());
        assert_eq!(h.manager.report().background_jobs_spawned, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fetched_bytes_are_written_to_disk() {
        let mut h = harness();
        h.fetcher.respond("/a.png", b"png");
        let request = NetworkRequest::new(HOST, "/a.png", "disk-1").cache_file(true);

        h.manager.get_network_image(&request, &LoadOptions::new());
        h.settle(StoreKind::Network, &request.id).await;

        assert!(h.disk().contains(&request.id));
        assert!(h.manager.get_network_image(&request, &LoadOptions::new()).is_ready());
    }

    #[tokio::test]
    async fn test_disk_copy_short_circuits_fetch() {
        let mut h = harness();
        let request = NetworkRequest::new(HOST, "/a.png", "disk-2").cache_file(true);
        let disk = h.disk();
        disk.store(&request.id, b"png").unwrap();
        let old = Utc::now() - TimeDelta::hours(2);
        disk.touch_at(&request.id, old).unwrap();

        assert!(h.manager.get_network_image(&request, &LoadOptions::new()).is_ready());

        assert_eq!(h.fetcher.calls(), 0);
        assert_eq!(h.manager.report().background_jobs_spawned, 0);
        assert!(disk.fetched_at(&request.id).unwrap() > old);
    }

    #[tokio::test]
    async fn test_disk_copy_ignored_without_cache_file() {
        let mut h = harness();
        let request = NetworkRequest::new(HOST, "/a.png", "disk-3");
        h.disk().store(&request.id, b"png").unwrap();

        assert!(h.manager.get_network_image(&request, &LoadOptions::new()).is_loading());
        assert_eq!(h.manager.report().background_jobs_spawned, 1);
    }

    #[tokio::test]
    async fn test_undecodable_disk_copy_is_evicted() {
        let mut h = harness();
        let request = NetworkRequest::new(HOST, "/a.png", "disk-4").cache_file(true);
        h.disk().store(&request.id, CORRUPT).unwrap();

        assert!(h.manager.get_network_image(&request, &LoadOptions::new()).is_loading());
        assert_eq!(h.manager.report().background_jobs_spawned, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disk_copy_left_alone_while_fetch_in_flight() {
        let mut h = harness_with(test_config(), StubDecoder::new(4, 2), StubFetcher::gated());
        h.fetcher.respond("/a.png", b"png");
        let request = NetworkRequest::new(HOST, "/a.png", "disk-5").cache_file(true);
        let options = LoadOptions::new();

        assert!(h.manager.get_network_image(&request, &options).is_loading());
        // The job is about to rewrite the body; a partial copy must not be evicted.
        h.disk().store(&request.id, CORRUPT).unwrap();
        assert!(h.manager.get_network_image(&request, &options).is_loading());
        assert!(h.disk().contains(&request.id));
        assert_eq!(h.decoder.calls(), 0);

        h.fetcher.release(1);
        h.settle(StoreKind::Network, &request.id).await;

        assert!(h.manager.get_network_image(&request, &options).is_ready());
        assert_eq!(h.disk().load(&request.id).as_deref(), Some(&b"png"[..]));
        assert!(h.disk().fetched_at(&request.id).is_some());
        assert_eq!(h.manager.report().background_jobs_spawned, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_animated_frame_index_follows_elapsed_time() {
        let decoder = StubDecoder::new(1, 1).with_delays(vec![1; 5]);
        let mut h = harness_with(test_config(), decoder, StubFetcher::new());
        let options = LoadOptions::new().speed(1.0).lifetime(100.0);

        for ticks in [0_usize, 1, 3, 4, 9] {
            let key = ResourceKey::new(format!("anim-{ticks}"));
            let bytes = Bytes::from_static(b"gif");

            assert!(h.manager.get_animated_from_memory(&key, bytes.clone(), &options).is_loading());
            h.settle(StoreKind::Animated, &key).await;
            assert!(h.manager.get_animated_from_memory(&key, bytes.clone(), &options).is_ready());
            assert_eq!(h.backend.uploads().last().unwrap().first_byte, Some(0));

            for n in 1..=ticks {
                h.manager.tick(1.0);
                h.manager.get_animated_from_memory(&key, bytes.clone(), &options);
                let shown = u8::try_from(1 + (n - 1) % 4).unwrap();
                assert_eq!(h.backend.uploads().last().unwrap().first_byte, Some(shown));
            }

            let entry = h.manager.animated_entry(StoreKind::Animated, &key).unwrap();
            assert_eq!(entry.current_frame(), 1 + ticks % 4, "after {ticks} ticks");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_animated_file_is_decoded_once() {
        let mut h = harness();
        let path = h.file("spin.gif", b"gif");
        let key = ResourceKey::from_path(&path);

        for _ in 0..5 {
            assert!(h.manager.get_animated(&path, &LoadOptions::new()).is_loading());
        }
        h.settle(StoreKind::Animated, &key).await;

        assert!(h.manager.get_animated(&path, &LoadOptions::new()).is_ready());
        assert_eq!(h.decoder.calls(), 1);
        let entry = h.manager.animated_entry(StoreKind::Animated, &key).unwrap();
        assert_eq!(entry.frame_count(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_network_animation_is_fetched_and_evicted() {
        let mut h = harness();
        h.fetcher.respond("/e.gif", b"gif");
        let request = NetworkRequest::new(HOST, "/e.gif", "emoji");
        let options = LoadOptions::new().lifetime(1.0);

        assert!(h.manager.get_network_animated(&request, &options).is_loading());
        h.settle(StoreKind::AnimatedNetwork, &request.id).await;
        assert!(h.manager.get_network_animated(&request, &options).is_ready());
        assert!(!h.manager.contains(StoreKind::Animated, &request.id));

        assert_eq!(h.manager.tick(1.5), 1);
        assert!(h.backend.live().is_empty());
    }

    #[tokio::test]
    async fn test_static_image_round_trip() {
        let mut h = harness();
        let path = h.file("logo.png", b"png");

        let texture = h.manager.load_static(&path, None).unwrap();
        assert_eq!(h.manager.report().static_textures, vec![texture]);
        h.manager.tick(1000.0);

        assert!(h.manager.delete_static(texture));
        assert!(!h.manager.delete_static(texture));
        assert_eq!(h.backend.destroyed(), vec![texture]);
        assert!(h.manager.load_static(h.temp.path().join("none.png"), None).is_err());
    }

    #[tokio::test]
    async fn test_static_textures_are_destroyed_by_their_owner() {
        let mut h = harness();
        let path = h.file("logo.png", b"png");
        let custom = Arc::new(RecordingBackend::starting_at(500));
        let custom_dyn: Arc<dyn TextureBackend> = custom.clone();

        let owned = h.manager.load_static(&path, Some(&custom_dyn)).unwrap();
        let deleted = h.manager.load_static(&path, Some(&custom_dyn)).unwrap();
        let plain = h.manager.load_static(&path, None).unwrap();
        assert!(h.manager.delete_static(deleted));
        h.manager.clear();

        assert_eq!(custom.destroyed(), vec![deleted, owned]);
        assert_eq!(h.backend.destroyed(), vec![plain]);
        assert!(custom.live().is_empty());
    }

    #[tokio::test]
    async fn test_clear_destroys_everything() {
        let mut h = harness();
        let path = h.file("a.png", b"png");
        h.manager.get_image(&path, &LoadOptions::new());
        h.manager.load_static(&path, None).unwrap();

        h.manager.clear();

        assert!(h.backend.live().is_empty());
        assert_eq!(h.manager.report().total_entries(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_placeholder_drawn_until_ready() {
        let mut h = harness();
        h.fetcher.respond("/a.png", b"png");
        let request = NetworkRequest::new(HOST, "/a.png", "avatar");
        let rect = Rect::new(Point::new(0.0, 0.0), Point::new(100.0, 40.0));

        let mut painter = MockPlaceholderPainter::new();
        painter
            .expect_draw_placeholder()
            .with(eq(Point::new(50.0, 20.0)), eq(10.0))
            .times(1)
            .return_const(());

        let shown = h
            .manager
            .show_network_image(&request, &LoadOptions::new(), rect, Some(&painter));
        assert_eq!(shown, None);

        h.settle(StoreKind::Network, &request.id).await;
        let shown = h
            .manager
            .show_network_image(&request, &LoadOptions::new(), rect, Some(&painter));
        assert!(shown.is_some());
    }

    #[tokio::test]
    async fn test_report_lists_entries() {
        let mut h = harness();
        let key = ResourceKey::new("icon");
        h.manager.get_image_from_memory(&key, b"png", &LoadOptions::new());

        let report = h.manager.report();

        assert_eq!(report.store(StoreKind::Image).unwrap().entries[0].key, key);
        assert!(report.to_string().contains("images (1):"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropping_manager_aborts_pending_fetch() {
        let h = harness_with(test_config(), StubDecoder::new(4, 2), StubFetcher::gated());
        h.fetcher.respond("/a.png", b"png");
        let Harness {
            mut manager,
            fetcher,
            temp,
            ..
        } = h;
        let request = NetworkRequest::new(HOST, "/a.png", "teardown").cache_file(true);

        assert!(manager.get_network_image(&request, &LoadOptions::new()).is_loading());
        for _ in 0..100 {
            if fetcher.calls() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(manager);
        fetcher.release(1);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(fetcher.finished(), 0);
        let disk = DiskImageCache::new(temp.path().join("disk"), None).unwrap();
        assert!(!disk.contains(&request.id));
    }

    #[test]
    fn test_dropping_manager_shuts_down_private_runtime() {
        let fetcher = Arc::new(StubFetcher::gated());
        fetcher.respond("/a.png", b"png");
        let mut manager = ImageManager::builder(Arc::new(RecordingBackend::new()))
            .config(test_config())
            .decoder(Arc::new(StubDecoder::new(1, 1)))
            .fetcher(fetcher.clone())
            .build()
            .unwrap();
        let request = NetworkRequest::new(HOST, "/a.png", "private-teardown");

        assert!(manager.get_network_image(&request, &LoadOptions::new()).is_loading());
        for _ in 0..100 {
            if fetcher.calls() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        drop(manager);
        fetcher.release(1);
        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(fetcher.finished(), 0);
    }

    #[test]
    fn test_private_runtime_outside_async_context() {
        let backend = Arc::new(RecordingBackend::new());
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.respond("/a.png", b"png");
        let mut manager = ImageManager::builder(backend)
            .config(test_config())
            .decoder(Arc::new(StubDecoder::new(1, 1)))
            .fetcher(fetcher)
            .build()
            .unwrap();
        let request = NetworkRequest::new(HOST, "/a.png", "sync");

        assert!(manager.get_network_image(&request, &LoadOptions::new()).is_loading());
        for _ in 0..500 {
            if manager.get_network_image(&request, &LoadOptions::new()).is_ready() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("private runtime never finished the fetch");
    }
}
