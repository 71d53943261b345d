pub mod animation;
pub mod diagnostics;
pub mod fetch_coordinator;
pub mod image_manager;
pub mod resource_store;
pub mod static_registry;

pub use diagnostics::{AnimationReport, EntryReport, JobReport, ResourceReport, StoreReport};
pub use fetch_coordinator::{FetchCoordinator, FetchPoll, FetchSettings, Payload, RuntimeHandle};
pub use image_manager::{ImageManager, ImageManagerBuilder, LoadOptions, NetworkRequest};
pub use resource_store::ResourceStore;
pub use static_registry::{StaticImageRegistry, StaticTexture};
