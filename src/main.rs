use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use texcache::domain::entities::TextureUpload;
use texcache::infrastructure::{CacheConfig, CliArgs, Command, DiskImageCache};
use texcache::{ImageManager, ImageState, LoadOptions, NetworkRequest, TextureBackend, TextureId};

const FETCH_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn init_logging(config: &CacheConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry().with(filter).init();
    }

    Ok(())
}

/// Texture backend for running the cache without a renderer.
#[derive(Debug, Default)]
struct HeadlessBackend {
    next_id: AtomicU64,
}

impl TextureBackend for HeadlessBackend {
    fn create_texture(&self, _upload: TextureUpload<'_>) -> TextureId {
        TextureId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn destroy_texture(&self, _texture: TextureId) {}
}

fn open_disk_cache(config: &CacheConfig) -> Result<DiskImageCache> {
    Ok(DiskImageCache::new(config.effective_cache_dir(), None)?)
}

fn purge(config: &CacheConfig, hours: u64, minutes: u64, seconds: u64) -> Result<()> {
    let cache = open_disk_cache(config)?;
    let report = cache.purge_older_than_hms(hours, minutes, seconds)?;
    println!("{report}");
    Ok(())
}

fn list(config: &CacheConfig, json: bool) -> Result<()> {
    let cache = open_disk_cache(config)?;
    let entries = cache.entries()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        let fetched = entry
            .fetched_at
            .map_or_else(|| "unknown".to_string(), |at| at.to_rfc3339());
        println!("{:>10}  {fetched}  {}", entry.size, entry.path.display());
    }
    println!("{} cached images in {}", entries.len(), cache.cache_dir().display());
    Ok(())
}

async fn fetch(config: CacheConfig, url: String, path: String, id: String) -> Result<()> {
    let mut manager = ImageManager::builder(Arc::new(HeadlessBackend::default()))
        .config(config)
        .build()?;
    let request = NetworkRequest::new(url, path, id).cache_file(true);
    let options = LoadOptions::new().lifetime(60.0);

    loop {
        match manager.get_network_image(&request, &options) {
            ImageState::Ready(image) => {
                println!(
                    "{} {}x{} ({} channels)",
                    request.id, image.meta.width, image.meta.height, image.meta.channels
                );
                return Ok(());
            }
            ImageState::Failed(e) => return Err(e.into()),
            ImageState::Loading => {}
        }
        tokio::time::sleep(FETCH_POLL_INTERVAL).await;
        manager.tick(FETCH_POLL_INTERVAL.as_secs_f32());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let mut config = CacheConfig::load(args.config.as_deref())?;
    config.merge_with_args(&args);

    init_logging(&config)?;

    info!(version = texcache::VERSION, "Starting texcache");

    match args.command {
        Command::Purge {
            hours,
            minutes,
            seconds,
        } => purge(&config, hours, minutes, seconds),
        Command::List { json } => list(&config, json),
        Command::Fetch { url, path, id } => fetch(config, url, path, id).await,
    }
}
