//! Thumbnail pipeline and cache manager for ThumbGrid
//!
//! Given a collection root and its items, the pipeline produces or retrieves a
//! bounded-size thumbnail for every item, keeps encoded thumbnails in a flat
//! disk cache and decoded bitmaps in a capacity-bounded LRU, and stays
//! responsive while the user switches collections.
//!
//! # Features
//!
//! - **Stable cache keys**: derived from the source location, valid across runs
//! - **Dual caching**: in-memory LRU of decoded images + persistent disk cache
//! - **Bounded parallelism**: batch-then-wait scheduling on a sized rayon pool
//! - **Generation-based cancellation**: superseded loads never publish results
//! - **Embedded previews**: EXIF thumbnails and JPEG streams inside RAW files
//!   are used before falling back to a full decode

pub mod config;
pub mod error;
pub mod generate;
pub mod item;
pub mod key;
pub mod lru;
pub mod pipeline;
pub mod scheduler;
pub mod store;

pub use config::PipelineConfig;
pub use error::{CodecError, PipelineError, StoreError};
pub use generate::{decode_thumbnail, DecodedImage, ImageCodec, ThumbnailSource};
pub use item::{visible_view, Item, ItemId, Progress};
pub use key::{cache_key, cache_key_for_item, cache_key_for_path};
pub use lru::LruCache;
pub use pipeline::{LoadSummary, PipelineEvent, PipelineStats, ThumbnailPipeline};
pub use scheduler::{concurrency_ceiling, resolve_concurrency, BatchScheduler};
pub use store::DiskThumbnailStore;
