//! Keep / load window arithmetic around the pages being read

use std::ops::RangeInclusive;

use crate::settings::CacheSettings;

/// Index ranges derived from a set of requested pages.
///
/// `keep` bounds what may stay cached, `load` is what gets prefetched.
/// `load` is always contained in `keep`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheWindow {
    pub keep: RangeInclusive<usize>,
    pub load: RangeInclusive<usize>,
}

impl CacheWindow {
    /// `None` when no indices were requested.
    #[must_use]
    pub fn compute(indices: &[usize], settings: &CacheSettings, max_index: usize) -> Option<Self> {
        let lowest = *indices.iter().min()?;
        let highest = *indices.iter().max()?;

        let keep_low = lowest
            .saturating_sub(settings.cache_behind_count)
            .saturating_sub(settings.uncache_extra_range);
        let keep_high = highest
            .saturating_add(settings.cache_ahead_count)
            .saturating_add(settings.uncache_extra_range)
            .min(max_index);

        let load_low = lowest.saturating_sub(settings.cache_behind_count);
        let load_high = highest
            .saturating_add(settings.cache_ahead_count)
            .min(max_index);

        Some(Self {
            keep: keep_low..=keep_high,
            load: load_low..=load_high,
        })
    }

    #[must_use]
    pub fn keeps(&self, index: usize) -> bool {
        self.keep.contains(&index)
    }
}
