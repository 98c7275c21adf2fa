//! Page turning on top of a [`PrefetchCache`]

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info};

use crate::archive::{self, ArchiveError, ComicInfo};
use crate::cache::{PageLoadError, PrefetchCache, WorkerPool};
use crate::images::{self, DecodedImage, RasterDecoder};
use crate::settings::SettingsStore;

/// Tracks which page(s) of one book are on screen and moves between them.
///
/// Every successful move resolves the displayed images through the cache,
/// which in turn prefetches around the new position.
pub struct BookNavigator {
    cache: PrefetchCache,
    comic_info: Option<ComicInfo>,
    settings: SettingsStore,
    current_index: Option<usize>,
    showing_two_pages: bool,
    displayed: Vec<Arc<DecodedImage>>,
}

impl BookNavigator {
    pub fn new(cache: PrefetchCache, comic_info: Option<ComicInfo>, settings: SettingsStore) -> Self {
        Self {
            cache,
            comic_info,
            settings,
            current_index: None,
            showing_two_pages: false,
            displayed: Vec::new(),
        }
    }

    /// Open the archive at `path` and wire a cache for it onto `pool`.
    /// Nothing is displayed until the first move.
    pub fn open(path: &Path, settings: SettingsStore, pool: WorkerPool) -> Result<Self, ArchiveError> {
        let start = Instant::now();
        let source = archive::open_archive(path)?;
        let comic_info = source
            .comic_info_bytes()
            .and_then(|bytes| ComicInfo::parse(&bytes));
        let cache = PrefetchCache::new(source, Arc::new(RasterDecoder::new()), settings.clone(), pool);
        info!(
            "Opened {path:?} with {} pages in {:.1}ms",
            cache.page_count(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(Self::new(cache, comic_info, settings))
    }

    pub fn go_to_page(&mut self, index: usize) -> Result<bool, PageLoadError> {
        self.show_index(index, false)
    }

    /// Show the current page(s) again, re-deciding the pairing
    pub fn redisplay(&mut self) -> Result<bool, PageLoadError> {
        match self.current_index {
            Some(index) => self.show_index(index, true),
            None => Ok(false),
        }
    }

    fn show_index(&mut self, index: usize, force: bool) -> Result<bool, PageLoadError> {
        if !force && self.current_index == Some(index) {
            return Ok(false);
        }
        let max_index = self.cache.max_index();
        if index > max_index {
            return Ok(false);
        }

        let start = Instant::now();
        let two_pages = self.wants_two_pages(index, max_index)?;
        debug!(
            "Determined pairing for index {index} in {:.1}ms, two_pages={two_pages}",
            start.elapsed().as_secs_f64() * 1000.0
        );

        let indices = if two_pages {
            vec![index, index + 1]
        } else {
            vec![index]
        };
        let images = self.cache.retrieve_images(&indices).map_err(|e| {
            error!("Failed to load page index {index}: {e}");
            e
        })?;

        self.current_index = Some(index);
        self.showing_two_pages = two_pages;
        self.displayed = images;
        debug!(
            "Changing page to index {index} took {:.1}ms",
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(true)
    }

    fn wants_two_pages(&self, index: usize, max_index: usize) -> Result<bool, PageLoadError> {
        if index >= max_index || !self.settings.show_two_pages() {
            return Ok(false);
        }
        if let Some(known) = self
            .comic_info
            .as_ref()
            .and_then(|info| info.can_be_double_page(index))
        {
            return Ok(known);
        }
        // The first page is a cover
        Ok(index != 0 && !self.cache.is_image_two_page_spread(index)?)
    }

    pub fn next_page(&mut self) -> Result<bool, PageLoadError> {
        let next = match self.current_index {
            None => 0,
            Some(index) if self.showing_two_pages => index + 2,
            Some(index) => index + 1,
        };
        self.go_to_page(next)
    }

    pub fn previous_page(&mut self) -> Result<bool, PageLoadError> {
        let current = match self.current_index {
            None | Some(0) => return Ok(false),
            Some(index) => index,
        };
        let target = if !self.is_last_page()
            && self.settings.show_two_pages()
            && !self.cache.is_image_two_page_spread(current - 1)?
        {
            current.saturating_sub(2)
        } else {
            current - 1
        };
        self.go_to_page(target)
    }

    pub fn first_page(&mut self) -> Result<bool, PageLoadError> {
        self.go_to_page(0)
    }

    /// Jump to the end, pairing the last page with the one before it when
    /// the metadata allows and it is not a spread
    pub fn last_page(&mut self) -> Result<bool, PageLoadError> {
        let max_index = self.cache.max_index();
        let pairable = self
            .comic_info
            .as_ref()
            .and_then(|info| info.can_be_double_page(max_index))
            .unwrap_or(false);
        let target = if pairable && max_index > 0 && !self.cache.is_image_two_page_spread(max_index)? {
            max_index - 1
        } else {
            max_index
        };
        self.go_to_page(target)
    }

    /// Shift the view one page back, pairing differently
    pub fn show_with_previous_page(&mut self) -> Result<bool, PageLoadError> {
        match self.current_index {
            Some(index) if index > 0 => self.go_to_page(index - 1),
            _ => Ok(false),
        }
    }

    /// Shift the view one page forward, pairing differently
    pub fn show_with_next_page(&mut self) -> Result<bool, PageLoadError> {
        match self.current_index {
            Some(index) => self.go_to_page(index + 1),
            None => Ok(false),
        }
    }

    /// Queue prefetching around the current position again, e.g. after the
    /// cache settings changed
    pub fn refresh_cache(&self) {
        let Some(index) = self.current_index else {
            return;
        };
        if self.showing_two_pages {
            self.cache.update_cache(&[index, index + 1]);
        } else {
            self.cache.update_cache(&[index]);
        }
    }

    /// One-based page numbers on screen
    pub fn displayed_pages(&self) -> Vec<usize> {
        match self.current_index {
            None => Vec::new(),
            Some(index) if self.showing_two_pages => vec![index + 1, index + 2],
            Some(index) => vec![index + 1],
        }
    }

    pub fn displayed_images(&self) -> &[Arc<DecodedImage>] {
        &self.displayed
    }

    /// Size of the displayed images laid out side by side
    pub fn display_size(&self) -> (u32, u32) {
        images::spread_size(self.displayed.iter().map(|image| &**image), self.settings.gap_between_pages())
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn is_showing_two_pages(&self) -> bool {
        self.showing_two_pages
    }

    pub fn is_first_page(&self) -> bool {
        self.current_index == Some(0)
    }

    pub fn is_last_page(&self) -> bool {
        self.current_index == Some(self.cache.max_index())
    }

    pub fn page_count(&self) -> usize {
        self.cache.page_count()
    }

    pub fn comic_info(&self) -> Option<&ComicInfo> {
        self.comic_info.as_ref()
    }

    pub fn has_book_info(&self) -> bool {
        self.comic_info.as_ref().is_some_and(ComicInfo::has_info)
    }

    pub fn cache(&self) -> &PrefetchCache {
        &self.cache
    }
}
