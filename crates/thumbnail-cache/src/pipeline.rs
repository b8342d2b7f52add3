//! Thumbnail pipeline: coordinates keys, disk cache, codec, scheduler and the
//! in-memory LRU
//!
//! `load_thumbnails` returns immediately and resolves items on a background
//! thread, batch by batch. Each call bumps a generation counter; results that
//! arrive for an older generation are dropped without being published, and a
//! superseded run stops at its next batch boundary. There is no thread abort.

use crate::config::PipelineConfig;
use crate::error::{CodecError, PipelineError, StoreError};
use crate::generate::{decode_thumbnail, DecodedImage, ImageCodec, ThumbnailSource};
use crate::item::{visible_view, Item, ItemId, Progress};
use crate::key::{cache_key_for_item, cache_key_for_path};
use crate::lru::LruCache;
use crate::scheduler::{resolve_concurrency, BatchScheduler};
use crate::store::DiskThumbnailStore;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Notifications sent to a listener from the loading thread
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Started {
        generation: u64,
        total: usize,
    },
    /// An item's thumbnail is now available through `get`
    Resolved {
        generation: u64,
        id: ItemId,
    },
    Progress {
        generation: u64,
        progress: Progress,
    },
    Finished {
        generation: u64,
        summary: LoadSummary,
    },
}

/// Outcome counts for one completed load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub total: usize,
    pub cached: usize,
    pub generated: usize,
    pub failed: usize,
}

pub type EventListener = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Snapshot of pipeline state for diagnostics
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub generation: u64,
    pub memory_entries: usize,
    pub memory_capacity: usize,
    pub concurrency_limit: usize,
    pub cache_root: PathBuf,
    pub cache_error: Option<String>,
    pub tracked_items: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Cached,
    Generated,
    Failed,
    Stale,
}

struct Job {
    id: ItemId,
    source: PathBuf,
    key: String,
}

struct Resolved {
    image: DecodedImage,
    from_disk: bool,
}

#[derive(Default)]
struct LoadState {
    generation: u64,
    progress: Option<Progress>,
    collection_root: Option<PathBuf>,
    items: Vec<Item>,
    deleted: HashSet<ItemId>,
}

struct Shared {
    // Lock order: `state` before `memory`
    state: Mutex<LoadState>,
    memory: LruCache<ItemId, DecodedImage>,
    store: DiskThumbnailStore,
    source: Arc<dyn ThumbnailSource>,
    scheduler: Mutex<Arc<BatchScheduler>>,
    max_dimension: u32,
    cache_error: Mutex<Option<String>>,
    listener: RwLock<Option<EventListener>>,
    // Held across publish and notify so listeners see progress in order
    delivery: Mutex<()>,
}

/// Thumbnail loader for one application. Create one and share it by reference
/// (or `Arc`) with whatever needs thumbnails.
pub struct ThumbnailPipeline {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThumbnailPipeline {
    /// Create a pipeline using the production [`ImageCodec`]
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let codec = ImageCodec::new(config.preview_max_dimension, config.jpeg_quality);
        Self::with_source(config, Arc::new(codec))
    }

    /// Create a pipeline that generates thumbnails with `source`.
    ///
    /// Fails if the cache root cannot be created; that error is reported here
    /// once rather than on every item.
    pub fn with_source(
        config: PipelineConfig,
        source: Arc<dyn ThumbnailSource>,
    ) -> Result<Self, PipelineError> {
        config
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let store = DiskThumbnailStore::new(&config.cache_root);
        store.ensure_ready().map_err(|e| {
            log::error!("Thumbnail cache root unavailable: {}", e);
            PipelineError::CacheRoot(e)
        })?;

        let scheduler = BatchScheduler::new(resolve_concurrency(config.concurrency_limit))?;
        log::debug!(
            "Thumbnail pipeline ready: root={}, capacity={}, concurrency={}",
            config.cache_root.display(),
            config.memory_capacity,
            scheduler.max_concurrency()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LoadState::default()),
                memory: LruCache::new(config.memory_capacity),
                store,
                source,
                scheduler: Mutex::new(Arc::new(scheduler)),
                max_dimension: config.max_dimension,
                cache_error: Mutex::new(None),
                listener: RwLock::new(None),
                delivery: Mutex::new(()),
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Start resolving thumbnails for `items` under `collection_root`.
    ///
    /// Supersedes any load in flight: its remaining results are discarded. The
    /// memory cache is cleared, progress restarts at `0/N`, and the call returns
    /// the new generation without waiting for any work.
    pub fn load_thumbnails(&self, collection_root: impl Into<PathBuf>, items: Vec<Item>) -> u64 {
        let collection_root = collection_root.into();
        let total = items.len();

        let jobs: Vec<Job> = items
            .iter()
            .map(|item| {
                let source = item.source_path(&collection_root);
                let key = cache_key_for_path(&source);
                Job {
                    id: item.id,
                    source,
                    key,
                }
            })
            .collect();

        let generation = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.progress = Some(Progress { current: 0, total });
            state.collection_root = Some(collection_root.clone());
            state.items = items;
            state.deleted.clear();
            self.shared.memory.clear();
            state.generation
        };

        log::info!(
            "Loading {} thumbnails from {} (generation {})",
            total,
            collection_root.display(),
            generation
        );
        self.shared.emit(PipelineEvent::Started { generation, total });
        self.shared.emit(PipelineEvent::Progress {
            generation,
            progress: Progress { current: 0, total },
        });

        let shared = Arc::clone(&self.shared);
        let scheduler = self.shared.scheduler.lock().clone();
        let handle = thread::spawn(move || shared.run_load(generation, jobs, &scheduler));

        let mut workers = self.workers.lock();
        workers.retain(|h| !h.is_finished());
        workers.push(handle);

        generation
    }

    /// Decoded thumbnail for `id`, if resolved and still in memory
    pub fn get(&self, id: ItemId) -> Option<DecodedImage> {
        self.shared.memory.get(&id)
    }

    /// Progress of the current load, or `None` when nothing is loading
    pub fn progress(&self) -> Option<Progress> {
        self.shared.state.lock().progress
    }

    pub fn is_loading(&self) -> bool {
        self.progress().is_some()
    }

    /// Generation of the most recent load or cancel
    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }

    /// Make the current load inert: nothing more is published and progress
    /// returns to "not loading". Images already in memory stay.
    pub fn cancel(&self) {
        let generation = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.progress = None;
            state.generation
        };
        log::debug!("Cancelled thumbnail load (now generation {})", generation);
    }

    /// Drop decoded images from memory only; disk thumbnails are kept
    pub fn invalidate(&self, ids: &[ItemId]) -> usize {
        self.shared.memory.remove_all(ids)
    }

    /// Forget items deleted by the user: memory entries, disk thumbnails and
    /// their place in the tracked item list. Returns how many were tracked.
    pub fn delete_items(&self, ids: &[ItemId]) -> usize {
        let ids: HashSet<ItemId> = ids.iter().copied().collect();

        let keys: Vec<String> = {
            let mut state = self.shared.state.lock();
            let Some(root) = state.collection_root.clone() else {
                return 0;
            };
            let keys = state
                .items
                .iter()
                .filter(|item| ids.contains(&item.id))
                .map(|item| cache_key_for_item(&root, item))
                .collect();
            state.items.retain(|item| !ids.contains(&item.id));
            state.deleted.extend(ids.iter().copied());
            self.shared.memory.remove_all(ids.iter());
            keys
        };

        for key in &keys {
            if let Err(e) = self.shared.store.remove(key) {
                log::warn!("Failed to delete cached thumbnail {}: {}", key, e);
            }
        }
        keys.len()
    }

    /// Wipe the disk cache and the memory cache, leaving an empty cache root.
    ///
    /// Does not cancel a load in flight; items it resolves afterwards are
    /// published and cached again.
    pub fn clear_disk_cache(&self) -> Result<(), StoreError> {
        self.shared.memory.clear();
        match self.shared.store.clear() {
            Ok(()) => {
                *self.shared.cache_error.lock() = None;
                log::info!(
                    "Cleared thumbnail cache at {}",
                    self.shared.store.root().display()
                );
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to clear thumbnail cache: {}", e);
                // A failed clear only disables the disk cache if the root is gone
                if let Err(root_err) = self.shared.store.ensure_ready() {
                    *self.shared.cache_error.lock() = Some(root_err.to_string());
                }
                Err(e)
            }
        }
    }

    /// Use a different cache root from now on. Existing files are not moved.
    ///
    /// If the directory cannot be created the pipeline keeps working from
    /// memory only and reports the problem through [`cache_error`](Self::cache_error).
    pub fn set_cache_root(&self, root: impl Into<PathBuf>) -> Result<(), StoreError> {
        let root = root.into();
        self.shared.store.set_root(&root);
        match self.shared.store.ensure_ready() {
            Ok(()) => {
                *self.shared.cache_error.lock() = None;
                log::info!("Thumbnail cache root set to {}", root.display());
                Ok(())
            }
            Err(e) => {
                log::error!("Thumbnail cache root unavailable: {}", e);
                *self.shared.cache_error.lock() = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn cache_root(&self) -> PathBuf {
        self.shared.store.root()
    }

    /// Why the disk cache is unavailable, if it is
    pub fn cache_error(&self) -> Option<String> {
        self.shared.cache_error.lock().clone()
    }

    /// Resize the memory cache, evicting immediately when shrinking
    pub fn set_memory_capacity(&self, capacity: usize) {
        let evicted = self.shared.memory.set_capacity(capacity);
        if !evicted.is_empty() {
            log::debug!("Memory capacity now {}, evicted {} thumbnails", capacity, evicted.len());
        }
    }

    /// Change parallelism for subsequent loads. The value is clamped to the
    /// derived ceiling; the effective limit is returned.
    pub fn set_concurrency_limit(&self, limit: usize) -> Result<usize, PipelineError> {
        let effective = resolve_concurrency(Some(limit));
        let scheduler = BatchScheduler::new(effective)?;
        *self.shared.scheduler.lock() = Arc::new(scheduler);
        Ok(effective)
    }

    pub fn concurrency_limit(&self) -> usize {
        self.shared.scheduler.lock().max_concurrency()
    }

    /// Mirror an order change made in the external store
    pub fn update_order(&self, id: ItemId, order: i64) -> bool {
        self.update_item(id, |item| item.order = order)
    }

    /// Mirror a visibility change made in the external store
    pub fn update_visibility(&self, id: ItemId, visible: bool) -> bool {
        self.update_item(id, |item| item.visible = visible)
    }

    fn update_item(&self, id: ItemId, apply: impl FnOnce(&mut Item)) -> bool {
        let mut state = self.shared.state.lock();
        match state.items.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                apply(item);
                true
            }
            None => false,
        }
    }

    /// Every tracked item of the current load, in request order
    pub fn items(&self) -> Vec<Item> {
        self.shared.state.lock().items.clone()
    }

    /// Visible items, highest `order` first
    pub fn visible_items(&self) -> Vec<Item> {
        visible_view(&self.shared.state.lock().items)
    }

    /// Tracked items still showing a placeholder
    pub fn pending_ids(&self) -> Vec<ItemId> {
        let state = self.shared.state.lock();
        state
            .items
            .iter()
            .map(|item| item.id)
            .filter(|id| !self.shared.memory.contains(id))
            .collect()
    }

    /// Register a listener for load events, replacing any previous one
    pub fn set_listener<F>(&self, listener: F)
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        *self.shared.listener.write() = Some(Arc::new(listener));
    }

    pub fn clear_listener(&self) {
        *self.shared.listener.write() = None;
    }

    pub fn stats(&self) -> PipelineStats {
        let (generation, tracked_items) = {
            let state = self.shared.state.lock();
            (state.generation, state.items.len())
        };
        PipelineStats {
            generation,
            memory_entries: self.shared.memory.len(),
            memory_capacity: self.shared.memory.capacity(),
            concurrency_limit: self.concurrency_limit(),
            cache_root: self.shared.store.root(),
            cache_error: self.cache_error(),
            tracked_items,
        }
    }

    /// Block until every load thread started so far has exited
    pub fn wait_idle(&self) {
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                log::error!("Thumbnail load thread panicked");
            }
        }
    }
}

impl Drop for ThumbnailPipeline {
    fn drop(&mut self) {
        // Loading threads hold their own `Arc<Shared>`; make them stop at the
        // next batch boundary instead of joining them here.
        self.cancel();
    }
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    fn disk_available(&self) -> bool {
        self.cache_error.lock().is_none()
    }

    fn emit(&self, event: PipelineEvent) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener(&event);
        }
    }

    fn run_load(&self, generation: u64, jobs: Vec<Job>, scheduler: &BatchScheduler) {
        let started = Instant::now();
        let mut summary = LoadSummary {
            total: jobs.len(),
            ..LoadSummary::default()
        };

        let run = scheduler.run(
            &jobs,
            |job| self.process(generation, job),
            |outcome| {
                for result in &outcome.results {
                    match result {
                        ItemOutcome::Cached => summary.cached += 1,
                        ItemOutcome::Generated => summary.generated += 1,
                        ItemOutcome::Failed => summary.failed += 1,
                        ItemOutcome::Stale => {}
                    }
                }
                if self.is_current(generation) {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            },
        );

        let finished = {
            let mut state = self.state.lock();
            if state.generation == generation {
                state.progress = None;
                true
            } else {
                false
            }
        };

        if finished {
            log::info!(
                "Thumbnail load {} finished in {:?}: {} cached, {} generated, {} failed",
                generation,
                started.elapsed(),
                summary.cached,
                summary.generated,
                summary.failed
            );
            self.emit(PipelineEvent::Finished {
                generation,
                summary,
            });
        } else {
            log::debug!(
                "Thumbnail load {} superseded after {} of {} items",
                generation,
                run.processed,
                summary.total
            );
        }
    }

    fn process(&self, generation: u64, job: &Job) -> ItemOutcome {
        if !self.is_current(generation) {
            return ItemOutcome::Stale;
        }

        let resolved = match self.resolve_one(generation, job) {
            Ok(resolved) => Some(resolved),
            Err(e) => {
                log::debug!("No thumbnail for item {}: {}", job.id, e);
                None
            }
        };

        let outcome = match &resolved {
            Some(r) if r.from_disk => ItemOutcome::Cached,
            Some(_) => ItemOutcome::Generated,
            None => ItemOutcome::Failed,
        };

        let _delivery = self.delivery.lock();
        match self.publish(generation, job, resolved.map(|r| r.image)) {
            Some(progress) => {
                if outcome != ItemOutcome::Failed {
                    self.emit(PipelineEvent::Resolved {
                        generation,
                        id: job.id,
                    });
                }
                self.emit(PipelineEvent::Progress {
                    generation,
                    progress,
                });
                outcome
            }
            None => ItemOutcome::Stale,
        }
    }

    /// Disk hit, or regenerate and write back. The decoded image is returned
    /// even when the write fails.
    fn resolve_one(&self, generation: u64, job: &Job) -> Result<Resolved, CodecError> {
        let (source, key) = (job.source.as_path(), job.key.as_str());
        match self.store.read(key) {
            Ok(bytes) => match decode_thumbnail(&bytes) {
                Ok(image) => {
                    return Ok(Resolved {
                        image,
                        from_disk: true,
                    })
                }
                Err(e) => log::warn!("Discarding undecodable cached thumbnail {}: {}", key, e),
            },
            Err(e) if e.is_not_found() => {}
            Err(e) => log::debug!("Treating unreadable cache entry as a miss: {}", e),
        }

        let bytes = self.source.produce(source, self.max_dimension)?;

        if self.disk_available() && !self.is_deleted(generation, job.id) {
            if let Err(e) = self.store.write(key, &bytes) {
                log::warn!("Failed to cache thumbnail for {}: {}", source.display(), e);
            }
        }

        let image = decode_thumbnail(&bytes)?;
        Ok(Resolved {
            image,
            from_disk: false,
        })
    }

    fn is_deleted(&self, generation: u64, id: ItemId) -> bool {
        let state = self.state.lock();
        state.generation == generation && state.deleted.contains(&id)
    }

    /// Publish one finished item if its generation is still current. Returns
    /// the updated progress, or `None` when the result was stale.
    ///
    /// An item deleted while it was being resolved is not published, and a
    /// thumbnail written for it in the meantime is removed again.
    fn publish(&self, generation: u64, job: &Job, image: Option<DecodedImage>) -> Option<Progress> {
        let mut state = self.state.lock();
        if state.generation != generation {
            return None;
        }

        if state.deleted.contains(&job.id) {
            if let Err(e) = self.store.remove(&job.key) {
                log::warn!("Failed to delete cached thumbnail {}: {}", job.key, e);
            }
        } else if let Some(image) = image {
            self.memory.put(job.id, image);
        }

        let progress = state.progress.as_mut()?;
        progress.current = (progress.current + 1).min(progress.total);
        Some(*progress)
    }
}

impl std::fmt::Debug for ThumbnailPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailPipeline")
            .field("stats", &self.stats())
            .finish()
    }
}
