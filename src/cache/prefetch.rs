//! Page cache with windowed background prefetch

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::archive::PageSource;
use crate::images::{DecodedImage, Decoder};
use crate::settings::SettingsStore;

use super::error::{LoadCause, PageLoadError};
use super::in_flight::{InFlightLoad, LoadResult, LoadState};
use super::pool::{WorkerPool, panic_message};
use super::stats::{CacheStats, StatCounters};
use super::window::CacheWindow;

#[derive(Default)]
struct CacheState {
    entries: HashMap<usize, Arc<DecodedImage>>,
    in_flight: HashMap<usize, Arc<InFlightLoad>>,
    pending_updates: usize,
    closed: bool,
}

impl CacheState {
    fn is_idle(&self) -> bool {
        self.pending_updates == 0 && self.in_flight.is_empty()
    }

    /// Drop the registry slot for `load`, unless a newer load took it over
    fn unregister(&mut self, load: &Arc<InFlightLoad>) {
        let index = load.index();
        if self
            .in_flight
            .get(&index)
            .is_some_and(|current| Arc::ptr_eq(current, load))
        {
            self.in_flight.remove(&index);
        }
    }
}

enum Lookup {
    Cached(Arc<DecodedImage>),
    /// Freshly registered by this thread, already claimed
    Owned(Arc<InFlightLoad>),
    Registered(Arc<InFlightLoad>),
}

struct Shared {
    source: Arc<dyn PageSource>,
    decoder: Arc<dyn Decoder>,
    settings: SettingsStore,
    pool: WorkerPool,
    state: Mutex<CacheState>,
    idle: Condvar,
    stats: StatCounters,
}

/// Decoded page images for one open archive.
///
/// Requested pages are resolved on the calling thread; afterwards the cache
/// evicts pages outside the keep window and queues background loads for the
/// rest of the load window on the shared [`WorkerPool`]. At most one load per
/// page index exists at any time.
pub struct PrefetchCache {
    shared: Arc<Shared>,
}

impl PrefetchCache {
    #[must_use]
    pub fn new(
        source: Arc<dyn PageSource>,
        decoder: Arc<dyn Decoder>,
        settings: SettingsStore,
        pool: WorkerPool,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                decoder,
                settings,
                pool,
                state: Mutex::new(CacheState::default()),
                idle: Condvar::new(),
                stats: StatCounters::default(),
            }),
        }
    }

    /// Resolve `indices` in order, then refresh the cache window in the
    /// background. Indices must lie within `0..=max_index()`.
    pub fn retrieve_images(
        &self,
        indices: &[usize],
    ) -> Result<Vec<Arc<DecodedImage>>, PageLoadError> {
        let images = indices
            .iter()
            .map(|&index| self.get_image(index))
            .collect::<Result<Vec<_>, _>>()?;
        self.request_update(indices);
        Ok(images)
    }

    /// Resolve one page: cached entry, someone else's running load, or a
    /// load performed right here.
    pub fn get_image(&self, index: usize) -> Result<Arc<DecodedImage>, PageLoadError> {
        let shared = &self.shared;
        let lookup = {
            let mut state = shared.lock();
            if state.closed {
                return Err(PageLoadError::new(index, LoadCause::Closed));
            }
            if let Some(image) = state.entries.get(&index) {
                shared.stats.record_hit();
                Lookup::Cached(Arc::clone(image))
            } else if let Some(load) = state.in_flight.get(&index) {
                Lookup::Registered(Arc::clone(load))
            } else {
                shared.stats.record_miss();
                let load = Arc::new(InFlightLoad::running(index));
                state.in_flight.insert(index, Arc::clone(&load));
                Lookup::Owned(load)
            }
        };

        match lookup {
            Lookup::Cached(image) => Ok(image),
            Lookup::Owned(load) => {
                debug!("Index {index} not in cache, loading");
                shared.run_load(&load)
            }
            Lookup::Registered(load) => {
                if load.claim() {
                    // The queued prefetch never started; it will see the
                    // claim and skip.
                    shared.stats.record_preemption();
                    debug!("Took over queued load of index {index}, loading on caller thread");
                    shared.run_load(&load)
                } else {
                    shared.stats.record_wait();
                    let start = Instant::now();
                    let result = load.wait();
                    debug!(
                        "Index {index} not in cache, but it's already being loaded, waited {:.1}ms",
                        start.elapsed().as_secs_f64() * 1000.0
                    );
                    result
                }
            }
        }
    }

    /// Evict entries outside the keep window of `indices` and queue loads for
    /// the missing pages of the load window. Settings are read at call time.
    ///
    /// Returns once the work is queued; the loads themselves run on the pool.
    pub fn update_cache(&self, indices: &[usize]) {
        self.shared.update_cache(indices);
    }

    /// Whether the page at `index` is wider than tall. Loads the page if needed.
    pub fn is_image_two_page_spread(&self, index: usize) -> Result<bool, PageLoadError> {
        Ok(self.get_image(index)?.is_two_page_spread())
    }

    fn request_update(&self, indices: &[usize]) {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.pending_updates += 1;
        }

        let shared = Arc::clone(&self.shared);
        let requested = indices.to_vec();
        let submitted = self.shared.pool.submit(move || {
            let _done = UpdateGuard(&shared);
            shared.update_cache(&requested);
        });
        if !submitted {
            warn!("No worker available for cache update, updating on caller thread");
            let _done = UpdateGuard(&self.shared);
            self.shared.update_cache(indices);
        }
    }

    /// Block until no update or load is queued or running, up to `timeout`.
    /// Returns `false` on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while !state.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .idle
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        true
    }

    /// Cancel queued loads, discard running ones and drop every entry.
    ///
    /// Waiters on a cancelled load receive [`LoadCause::Closed`]. Idempotent;
    /// also runs on drop.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Indices with a completed entry, ascending
    #[must_use]
    pub fn cached_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.shared.lock().entries.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    #[must_use]
    pub fn is_cached(&self, index: usize) -> bool {
        self.shared.lock().entries.contains_key(&index)
    }

    /// Whether a load for `index` is registered (queued or running)
    #[must_use]
    pub fn is_loading(&self, index: usize) -> bool {
        self.shared.lock().in_flight.contains_key(&index)
    }

    #[must_use]
    pub fn max_index(&self) -> usize {
        self.shared.source.max_index()
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.shared.source.page_count()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.shared.stats.snapshot()
    }

    #[must_use]
    pub fn settings(&self) -> &SettingsStore {
        &self.shared.settings
    }
}

impl Drop for PrefetchCache {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_cache(self: &Arc<Self>, indices: &[usize]) {
        let start = Instant::now();
        let settings = self.settings.cache_settings();
        let Some(window) = CacheWindow::compute(indices, &settings, self.source.max_index()) else {
            return;
        };

        let scheduled = {
            let mut state = self.lock();
            if state.closed {
                return;
            }

            // Evict before scheduling so nothing queued below is dropped again
            let before = state.entries.len();
            state.entries.retain(|&index, _| window.keeps(index));
            let evicted = before - state.entries.len();
            if evicted > 0 {
                self.stats.record_evictions(evicted);
                debug!(
                    "Uncached {evicted} pages outside {}..={}",
                    window.keep.start(),
                    window.keep.end()
                );
            }

            let mut scheduled = Vec::new();
            for index in window.load.clone() {
                if state.entries.contains_key(&index) || state.in_flight.contains_key(&index) {
                    continue;
                }
                let load = Arc::new(InFlightLoad::pending(index));
                state.in_flight.insert(index, Arc::clone(&load));
                scheduled.push(load);
            }
            scheduled
        };

        let count = scheduled.len();
        for load in scheduled {
            self.schedule(load);
        }

        debug!(
            "Updating cache for {indices:?} (load {}..={}, {count} queued) took {:.2}ms",
            window.load.start(),
            window.load.end(),
            start.elapsed().as_secs_f64() * 1000.0
        );
    }

    fn schedule(self: &Arc<Self>, load: Arc<InFlightLoad>) {
        let shared = Arc::clone(self);
        let job_load = Arc::clone(&load);
        if self.pool.submit(move || shared.run_prefetch(&job_load)) {
            self.stats.record_prefetch_scheduled();
            return;
        }

        warn!("No worker available to prefetch index {}", load.index());
        if load.cancel() {
            let mut state = self.lock();
            state.unregister(&load);
            self.notify_if_idle(&state);
            drop(state);
            load.finish(Err(PageLoadError::new(load.index(), LoadCause::Closed)));
        }
    }

    fn run_prefetch(&self, load: &Arc<InFlightLoad>) {
        if !load.claim() {
            trace!(
                "Skipping prefetch of index {}: {:?}",
                load.index(),
                load.state()
            );
            return;
        }
        if let Err(e) = self.run_load(load) {
            self.stats.record_prefetch_failure();
            warn!("Prefetch failed: {e}");
        }
    }

    /// Execute a load this thread has claimed and publish the outcome
    fn run_load(&self, load: &Arc<InFlightLoad>) -> LoadResult {
        debug_assert_eq!(load.state(), LoadState::Running);
        let index = load.index();
        let start = Instant::now();
        let result = self.load_page(index);

        {
            let mut state = self.lock();
            if let Ok(image) = &result {
                if state.closed {
                    debug!("Discarding index {index}, cache closed while loading");
                } else {
                    state
                        .entries
                        .entry(index)
                        .or_insert_with(|| Arc::clone(image));
                }
            }
            state.unregister(load);
            self.notify_if_idle(&state);
        }
        load.finish(result.clone());

        trace!(
            "Loading and storing index {index} took {:.1}ms",
            start.elapsed().as_secs_f64() * 1000.0
        );
        result
    }

    fn load_page(&self, index: usize) -> LoadResult {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<DecodedImage, LoadCause> {
            self.stats.record_fetch();
            let bytes = self.source.fetch_bytes(index)?;
            Ok(self.decoder.decode(&bytes)?)
        }));
        match outcome {
            Ok(Ok(image)) => Ok(Arc::new(image)),
            Ok(Err(cause)) => Err(PageLoadError::new(index, cause)),
            Err(payload) => Err(PageLoadError::new(
                index,
                LoadCause::Panicked(panic_message(payload.as_ref())),
            )),
        }
    }

    fn finish_update(&self) {
        let mut state = self.lock();
        state.pending_updates = state.pending_updates.saturating_sub(1);
        self.notify_if_idle(&state);
    }

    fn notify_if_idle(&self, state: &CacheState) {
        if state.is_idle() {
            self.idle.notify_all();
        }
    }

    fn close(&self) {
        let (dropped, cancelled) = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let dropped = state.entries.len();
            state.entries.clear();

            let cancelled: Vec<Arc<InFlightLoad>> = state
                .in_flight
                .values()
                .filter(|load| load.cancel())
                .cloned()
                .collect();
            for load in &cancelled {
                state.unregister(load);
            }
            self.notify_if_idle(&state);
            (dropped, cancelled)
        };

        for load in &cancelled {
            load.finish(Err(PageLoadError::new(load.index(), LoadCause::Closed)));
        }
        info!(
            "Closed page cache: dropped {dropped} entries, cancelled {} queued loads",
            cancelled.len()
        );
    }
}

/// Marks a queued cache update as finished, even if it unwinds
struct UpdateGuard<'a>(&'a Shared);

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.0.finish_update();
    }
}
