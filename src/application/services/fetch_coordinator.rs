//! Background fetch and decode jobs and the handoff of their results.
//!
//! The foreground owns the in-flight set and the completed table outright;
//! background jobs only ever talk to it through the completion channel, which
//! is drained at the start of every request and tick.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{Id, JoinSet};
use tracing::{debug, trace, warn};

use crate::domain::entities::{AnimatedImage, DecodedImage, ResourceKey, StoreKind};
use crate::domain::errors::{CacheError, CacheResult};
use crate::infrastructure::config::CacheConfig;

/// Identity of a background job.
pub type FetchKey = (StoreKind, ResourceKey);

/// Decoded output of a background job.
#[derive(Debug)]
pub enum Payload {
    /// A still image.
    Still(DecodedImage),
    /// Every frame of an animated image.
    Animated(AnimatedImage),
}

impl Payload {
    /// Converts to a still image, keeping the first frame of an animation.
    #[must_use]
    pub fn into_still(self) -> DecodedImage {
        match self {
            Self::Still(image) => image,
            Self::Animated(mut image) => {
                image.frames.truncate(image.meta.frame_len());
                DecodedImage {
                    meta: image.meta,
                    pixels: image.frames,
                }
            }
        }
    }

    /// Converts to an animation, wrapping a still image as a single frame.
    #[must_use]
    pub fn into_animated(self) -> AnimatedImage {
        match self {
            Self::Still(image) => AnimatedImage::single(image),
            Self::Animated(image) => image,
        }
    }
}

/// What the coordinator knows about a key.
#[derive(Debug)]
pub enum FetchPoll {
    /// No job is running and nothing is waiting to be claimed.
    Idle,
    /// A job is running.
    Pending,
    /// A job finished. The key has left the in-flight set.
    Completed(CacheResult<Payload>),
    /// A recent failure is still cooling down.
    CoolingDown(CacheError),
}

/// Timing and concurrency limits of background jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    /// Upper bound on one job.
    pub max_duration: Duration,
    /// Jobs allowed to run at once.
    pub max_concurrent: usize,
    /// How long a finished job keeps its slot.
    pub settle_delay: Duration,
    /// Tick time after which an unclaimed result is dropped.
    pub handoff_ttl: f32,
    /// Tick time during which a failed key is not retried.
    pub retry_cooldown: f32,
}

impl From<&CacheConfig> for FetchSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            max_duration: config.max_fetch_duration(),
            max_concurrent: config.max_concurrent_fetches(),
            settle_delay: config.settle_delay(),
            handoff_ttl: config.handoff_ttl_secs,
            retry_cooldown: config.retry_cooldown_secs,
        }
    }
}

/// Runtime that executes background jobs.
pub enum RuntimeHandle {
    /// A runtime owned by the host application.
    Borrowed(Handle),
    /// A runtime created for this cache and shut down with it.
    Owned {
        /// Kept so the runtime lives as long as the coordinator.
        runtime: Option<Runtime>,
        /// Handle of `runtime`.
        handle: Handle,
    },
}

impl RuntimeHandle {
    /// Uses the runtime the caller is running in, or starts a private one.
    ///
    /// # Errors
    /// Returns `CacheError::Runtime` if no runtime is running and one cannot be built.
    pub fn current_or_owned(worker_threads: usize) -> CacheResult<Self> {
        if let Ok(handle) = Handle::try_current() {
            return Ok(Self::Borrowed(handle));
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("texcache-worker")
            .enable_all()
            .build()
            .map_err(|e| CacheError::Runtime(format!("failed to start runtime: {e}")))?;
        debug!(worker_threads, "Started private runtime");
        let handle = runtime.handle().clone();
        Ok(Self::Owned {
            runtime: Some(runtime),
            handle,
        })
    }

    /// Handle for spawning.
    #[must_use]
    pub const fn handle(&self) -> &Handle {
        match self {
            Self::Borrowed(handle) | Self::Owned { handle, .. } => handle,
        }
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        if let Self::Owned { runtime, .. } = self
            && let Some(runtime) = runtime.take()
        {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Borrowed(_) => f.write_str("RuntimeHandle::Borrowed"),
            Self::Owned { .. } => f.write_str("RuntimeHandle::Owned"),
        }
    }
}

struct Completion {
    key: FetchKey,
    result: CacheResult<Payload>,
}

struct Finished {
    result: CacheResult<Payload>,
    age: f32,
}

struct Cooldown {
    error: CacheError,
    remaining: f32,
}

/// Runs at most one background job per key and hands results to the foreground.
pub struct FetchCoordinator {
    settings: FetchSettings,
    in_flight: HashSet<FetchKey>,
    completed: HashMap<FetchKey, Finished>,
    cooldowns: HashMap<FetchKey, Cooldown>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<()>,
    task_keys: HashMap<Id, FetchKey>,
    spawned: u64,
    // Dropped last so aborted tasks are released before a private runtime shuts down.
    runtime: RuntimeHandle,
}

impl FetchCoordinator {
    /// Creates a coordinator spawning onto `runtime`.
    #[must_use]
    pub fn new(settings: FetchSettings, runtime: RuntimeHandle) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            settings,
            in_flight: HashSet::new(),
            completed: HashMap::new(),
            cooldowns: HashMap::new(),
            completion_tx,
            completion_rx,
            semaphore,
            tasks: JoinSet::new(),
            task_keys: HashMap::new(),
            spawned: 0,
            runtime,
        }
    }

    /// Current limits.
    #[must_use]
    pub const fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Returns the state of `key`, claiming its result if one is waiting.
    ///
    /// A claimed result removes the key from the in-flight set whether it
    /// succeeded or failed.
    pub fn poll(&mut self, kind: StoreKind, key: &ResourceKey) -> FetchPoll {
        self.drain();
        let fetch_key = (kind, key.clone());

        if let Some(finished) = self.completed.remove(&fetch_key) {
            self.in_flight.remove(&fetch_key);
            if let Err(error) = &finished.result
                && self.settings.retry_cooldown > 0.0
            {
                self.cooldowns.insert(
                    fetch_key,
                    Cooldown {
                        error: error.clone(),
                        remaining: self.settings.retry_cooldown,
                    },
                );
            }
            return FetchPoll::Completed(finished.result);
        }

        if self.in_flight.contains(&fetch_key) {
            return FetchPoll::Pending;
        }

        match self.cooldowns.get(&fetch_key) {
            Some(cooldown) => FetchPoll::CoolingDown(cooldown.error.clone()),
            None => FetchPoll::Idle,
        }
    }

    /// Spawns `job` for `key` unless one is already in flight.
    ///
    /// Returns true if a job was spawned.
    pub fn spawn<F>(&mut self, kind: StoreKind, key: ResourceKey, job: F) -> bool
    where
        F: Future<Output = CacheResult<Payload>> + Send + 'static,
    {
        let fetch_key = (kind, key);
        if self.in_flight.contains(&fetch_key) || self.completed.contains_key(&fetch_key) {
            return false;
        }
        self.in_flight.insert(fetch_key.clone());

        let tx = self.completion_tx.clone();
        let semaphore = Arc::clone(&self.semaphore);
        let max_duration = self.settings.max_duration;
        let settle_delay = self.settings.settle_delay;
        let job_key = fetch_key.clone();

        let abort = self.tasks.spawn_on(
            async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let (kind, key) = &job_key;
                trace!(kind = ?kind, key = %key, "Background job started");

                let result = match tokio::time::timeout(max_duration, job).await {
                    Ok(result) => result,
                    Err(_) => Err(CacheError::Timeout {
                        secs: max_duration.as_secs(),
                    }),
                };
                match &result {
                    Ok(_) => debug!(kind = ?kind, key = %key, "Background job finished"),
                    Err(e) => warn!(kind = ?kind, key = %key, error = %e, "Background job failed"),
                }

                if tx.send(Completion { key: job_key, result }).is_err() {
                    trace!("Completion channel closed");
                    return;
                }
                tokio::time::sleep(settle_delay).await;
            },
            self.runtime.handle(),
        );

        self.task_keys.insert(abort.id(), fetch_key);
        self.spawned += 1;
        true
    }

    /// Moves finished results into the completed table and reaps exited tasks.
    ///
    /// A job that panicked is recorded as a failure so its key does not stay
    /// in flight forever. Returns the number of results received.
    pub fn drain(&mut self) -> usize {
        let mut received = 0;
        while let Ok(Completion { key, result }) = self.completion_rx.try_recv() {
            if !self.in_flight.contains(&key) {
                trace!(key = %key.1, "Dropping result of a cancelled job");
                continue;
            }
            self.completed.insert(key, Finished { result, age: 0.0 });
            received += 1;
        }

        while let Some(joined) = self.tasks.try_join_next_with_id() {
            match joined {
                Ok((id, ())) => {
                    self.task_keys.remove(&id);
                }
                Err(e) => {
                    let key = self.task_keys.remove(&e.id());
                    if e.is_panic()
                        && let Some(key) = key
                        && self.in_flight.contains(&key)
                        && !self.completed.contains_key(&key)
                    {
                        warn!(kind = ?key.0, key = %key.1, "Background job panicked");
                        self.completed.insert(
                            key,
                            Finished {
                                result: Err(CacheError::Runtime(
                                    "background job panicked".to_string(),
                                )),
                                age: 0.0,
                            },
                        );
                        received += 1;
                    }
                }
            }
        }
        received
    }

    /// Ages unclaimed results and cooldowns by `dt` seconds.
    ///
    /// Results nobody claimed within the handoff TTL are dropped and their keys
    /// leave the in-flight set. Returns the number of dropped results.
    pub fn age(&mut self, dt: f32) -> usize {
        let ttl = self.settings.handoff_ttl;
        let mut expired = Vec::new();
        for (key, finished) in &mut self.completed {
            finished.age += dt;
            if finished.age > ttl {
                expired.push(key.clone());
            }
        }
        for key in &expired {
            self.completed.remove(key);
            self.in_flight.remove(key);
            debug!(kind = ?key.0, key = %key.1, "Dropped unclaimed result");
        }

        self.cooldowns.retain(|_, cooldown| {
            cooldown.remaining -= dt;
            cooldown.remaining > 0.0
        });
        expired.len()
    }

    /// Aborts every job and forgets all keys and results.
    pub fn cancel_all(&mut self) {
        self.tasks.abort_all();
        self.in_flight.clear();
        self.completed.clear();
        self.cooldowns.clear();
        debug!("Cancelled background jobs");
    }

    /// Returns true if a job for `key` has been spawned and its result not yet claimed.
    #[must_use]
    pub fn is_in_flight(&self, kind: StoreKind, key: &ResourceKey) -> bool {
        self.in_flight.contains(&(kind, key.clone()))
    }

    /// Returns true if a result for `key` is waiting to be claimed.
    #[must_use]
    pub fn is_completed(&self, kind: StoreKind, key: &ResourceKey) -> bool {
        self.completed.contains_key(&(kind, key.clone()))
    }

    /// Keys in flight, sorted.
    #[must_use]
    pub fn in_flight_keys(&self) -> Vec<FetchKey> {
        let mut keys: Vec<_> = self.in_flight.iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys with a result waiting to be claimed, sorted.
    #[must_use]
    pub fn completed_keys(&self) -> Vec<FetchKey> {
        let mut keys: Vec<_> = self.completed.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Jobs spawned since creation.
    #[must_use]
    pub const fn spawned_total(&self) -> u64 {
        self.spawned
    }

    /// Tasks not yet reaped, including ones holding their slot after finishing.
    #[must_use]
    pub fn running_tasks(&self) -> usize {
        self.tasks.len()
    }
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("settings", &self.settings)
            .field("in_flight", &self.in_flight.len())
            .field("completed", &self.completed.len())
            .field("running", &self.tasks.len())
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

/// Runs blocking work (decoding, file IO) off the async workers.
///
/// # Errors
/// Returns the closure's error, or `CacheError::Runtime` if it panicked.
pub async fn run_blocking<T, F>(work: F) -> CacheResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> CacheResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CacheError::Runtime(format!("blocking task failed: {e}")))?
}
