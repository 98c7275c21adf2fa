use std::sync::Arc;
use std::thread;
use std::time::Duration;

use panelcache::archive::{PageSource, SourceError};
use panelcache::cache::{LoadCause, PrefetchCache, WorkerPool};
use panelcache::images::RasterDecoder;
use panelcache::settings::SettingsStore;
use panelcache::test_utils::test_helpers::{MockPageSource, settings_with_window};

const IDLE: Duration = Duration::from_secs(10);

fn cache_for(source: &Arc<MockPageSource>, settings: SettingsStore, pool: WorkerPool) -> PrefetchCache {
    let source: Arc<dyn PageSource> = Arc::clone(source) as Arc<dyn PageSource>;
    PrefetchCache::new(source, Arc::new(RasterDecoder::new()), settings, pool)
}

/// Occupy one worker until the returned sender is used or dropped
fn block_worker(pool: &WorkerPool) -> flume::Sender<()> {
    let (release_tx, release_rx) = flume::bounded::<()>(1);
    let (started_tx, started_rx) = flume::bounded::<()>(1);
    assert!(pool.submit(move || {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
    }));
    started_rx.recv_timeout(IDLE).unwrap();
    release_tx
}

/// Wait until every job queued on a single-worker pool so far has run
fn drain(pool: &WorkerPool) {
    let (tx, rx) = flume::bounded::<()>(1);
    assert!(pool.submit(move || {
        let _ = tx.send(());
    }));
    rx.recv_timeout(IDLE).unwrap();
}

#[test]
fn first_request_prefetches_load_window() {
    let source = Arc::new(MockPageSource::new(10));
    let cache = cache_for(&source, settings_with_window(2, 1, 1), WorkerPool::new(2).unwrap());

    let images = cache.retrieve_images(&[4]).unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!((images[0].width, images[0].height), (6, 8));

    assert!(cache.wait_until_idle(IDLE));
    assert_eq!(cache.cached_indices(), vec![3, 4, 5, 6]);
}

#[test]
fn moving_forward_evicts_outside_keep_range() {
    let source = Arc::new(MockPageSource::new(10));
    let cache = cache_for(&source, settings_with_window(2, 1, 1), WorkerPool::new(2).unwrap());

    cache.retrieve_images(&[4]).unwrap();
    assert!(cache.wait_until_idle(IDLE));
    cache.retrieve_images(&[7]).unwrap();
    assert!(cache.wait_until_idle(IDLE));

    // keep [5, 9], load [6, 9]; 5 survives from the first window
    assert_eq!(cache.cached_indices(), vec![5, 6, 7, 8, 9]);
    assert!(source.refetched().is_empty());
    assert_eq!(source.fetch_count(3), 1);
    assert_eq!(source.fetch_count(2), 0);
    assert_eq!(cache.stats().evictions, 2);
}

#[test]
fn failing_page_is_not_cached_and_is_retried() {
    let source = Arc::new(MockPageSource::new(10));
    source.fail_index(5);
    let cache = cache_for(&source, settings_with_window(2, 1, 1), WorkerPool::new(2).unwrap());

    let err = cache.retrieve_images(&[5]).unwrap_err();
    assert_eq!(err.index, 5);
    assert!(matches!(err.cause, LoadCause::Source(SourceError::Io(_))));
    assert!(!cache.is_cached(5));
    assert!(!cache.is_loading(5));

    assert!(cache.retrieve_images(&[5]).is_err());
    assert_eq!(source.fetch_count(5), 2);

    source.clear_failure(5);
    assert!(cache.retrieve_images(&[5]).is_ok());
    assert_eq!(source.fetch_count(5), 3);
}

#[test]
fn failed_prefetch_is_dropped_and_retried_on_demand() {
    let source = Arc::new(MockPageSource::new(10));
    source.fail_index(6);
    let cache = cache_for(&source, settings_with_window(2, 0, 0), WorkerPool::new(2).unwrap());

    cache.retrieve_images(&[4]).unwrap();
    assert!(cache.wait_until_idle(IDLE));
    assert_eq!(cache.cached_indices(), vec![4, 5]);
    assert_eq!(cache.stats().prefetch_failures, 1);

    source.clear_failure(6);
    assert!(cache.get_image(6).is_ok());
    assert_eq!(source.fetch_count(6), 2);
}

#[test]
fn concurrent_requests_share_one_load() {
    let source = Arc::new(MockPageSource::new(10));
    let gate = source.gate(3);
    let cache = Arc::new(cache_for(&source, settings_with_window(0, 0, 0), WorkerPool::new(2).unwrap()));

    let first = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.get_image(3))
    };
    assert!(gate.wait_entered(IDLE));
    assert!(cache.is_loading(3));

    let others: Vec<_> = (0..3)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get_image(3))
        })
        .collect();
    thread::sleep(Duration::from_millis(50));
    gate.release();

    let expected = first.join().unwrap().unwrap();
    for other in others {
        let image = other.join().unwrap().unwrap();
        assert!(Arc::ptr_eq(&image, &expected));
    }
    assert_eq!(source.fetch_count(3), 1);
    assert!(cache.is_cached(3));
    assert!(!cache.is_loading(3));
}

#[test]
fn request_takes_over_queued_prefetch() {
    let source = Arc::new(MockPageSource::new(10));
    let pool = WorkerPool::new(1).unwrap();
    let cache = cache_for(&source, settings_with_window(2, 0, 0), pool.clone());

    let blocker = block_worker(&pool);
    cache.update_cache(&[0]);
    for index in 0..=2 {
        assert!(cache.is_loading(index));
    }
    assert_eq!(source.total_fetches(), 0);

    // Runs on this thread even though the only worker is busy
    let image = cache.get_image(2).unwrap();
    assert_eq!(image.height, 8);
    assert_eq!(cache.stats().preemptions, 1);
    assert!(cache.is_cached(2));

    drop(blocker);
    assert!(cache.wait_until_idle(IDLE));
    assert_eq!(cache.cached_indices(), vec![0, 1, 2]);
    assert!(source.refetched().is_empty());
}

#[test]
fn request_waits_for_running_prefetch() {
    let source = Arc::new(MockPageSource::new(10));
    let gate = source.gate(1);
    let cache = Arc::new(cache_for(&source, settings_with_window(2, 0, 0), WorkerPool::new(2).unwrap()));

    cache.update_cache(&[0]);
    assert!(gate.wait_entered(IDLE));

    let waiter = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.get_image(1))
    };
    thread::sleep(Duration::from_millis(50));
    gate.release();

    assert!(waiter.join().unwrap().is_ok());
    assert!(cache.wait_until_idle(IDLE));
    assert_eq!(source.fetch_count(1), 1);
    assert_eq!(cache.stats().preemptions, 0);
}

#[test]
fn waiter_receives_error_from_running_prefetch() {
    let source = Arc::new(MockPageSource::new(10));
    source.fail_index(1);
    let gate = source.gate(1);
    let cache = Arc::new(cache_for(&source, settings_with_window(2, 0, 0), WorkerPool::new(2).unwrap()));

    cache.update_cache(&[0]);
    assert!(gate.wait_entered(IDLE));

    let waiter = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.get_image(1))
    };
    thread::sleep(Duration::from_millis(50));
    gate.release();

    let err = waiter.join().unwrap().unwrap_err();
    assert_eq!(err.index, 1);
    assert!(matches!(err.cause, LoadCause::Source(SourceError::Io(_))));
    assert!(cache.wait_until_idle(IDLE));
    // The waiter shared the failed load instead of starting its own
    assert_eq!(source.fetch_count(1), 1);
    assert!(!cache.is_cached(1));
    assert!(!cache.is_loading(1));

    source.clear_failure(1);
    assert!(cache.get_image(1).is_ok());
    assert_eq!(source.fetch_count(1), 2);
}

#[test]
fn eviction_keeps_cache_within_window() {
    let source = Arc::new(MockPageSource::new(40));
    let (ahead, behind, extra) = (3, 2, 1);
    let cache = cache_for(&source, settings_with_window(ahead, behind, extra), WorkerPool::new(3).unwrap());

    for index in (0..40).chain((0..40).rev()).step_by(3) {
        cache.retrieve_images(&[index]).unwrap();
        assert!(cache.wait_until_idle(IDLE));

        let low = index.saturating_sub(behind + extra);
        let high = (index + ahead + extra).min(39);
        let cached = cache.cached_indices();
        assert!(cached.iter().all(|&i| (low..=high).contains(&i)), "{index}: {cached:?}");
        assert!(cached.len() <= ahead + behind + 2 * extra + 1);
        for i in index.saturating_sub(behind)..=(index + ahead).min(39) {
            assert!(cache.is_cached(i), "page {i} missing around {index}");
        }
    }
}

#[test]
fn two_page_request_uses_both_ends() {
    let source = Arc::new(MockPageSource::new(20));
    let cache = cache_for(&source, settings_with_window(1, 1, 0), WorkerPool::new(2).unwrap());

    let images = cache.retrieve_images(&[8, 9]).unwrap();
    assert_eq!(images.len(), 2);
    assert!(cache.wait_until_idle(IDLE));
    assert_eq!(cache.cached_indices(), vec![7, 8, 9, 10]);
}

#[test]
fn settings_are_read_at_each_update() {
    let source = Arc::new(MockPageSource::new(20));
    let settings = settings_with_window(1, 0, 0);
    let cache = cache_for(&source, settings.clone(), WorkerPool::new(2).unwrap());

    cache.retrieve_images(&[5]).unwrap();
    assert!(cache.wait_until_idle(IDLE));
    assert_eq!(cache.cached_indices(), vec![5, 6]);

    settings.set_cache_ahead_count(4);
    cache.update_cache(&[5]);
    assert!(cache.wait_until_idle(IDLE));
    assert_eq!(cache.cached_indices(), vec![5, 6, 7, 8, 9]);
}

#[test]
fn spread_check_loads_the_page() {
    let source = Arc::new(MockPageSource::new(5).with_spreads(&[2]));
    let cache = cache_for(&source, settings_with_window(0, 0, 0), WorkerPool::new(1).unwrap());

    assert!(cache.is_image_two_page_spread(2).unwrap());
    assert!(!cache.is_image_two_page_spread(3).unwrap());
    assert!(cache.is_cached(2));
    assert_eq!(cache.max_index(), 4);
}

#[test]
fn out_of_range_index_reports_not_found() {
    let source = Arc::new(MockPageSource::new(3));
    let cache = cache_for(&source, settings_with_window(1, 1, 1), WorkerPool::new(1).unwrap());

    let err = cache.get_image(3).unwrap_err();
    assert!(matches!(err.cause, LoadCause::Source(SourceError::NotFound { index: 3 })));
}

#[test]
fn panicking_source_becomes_load_error() {
    let source = Arc::new(MockPageSource::new(5));
    source.panic_on(2);
    let cache = cache_for(&source, settings_with_window(0, 0, 0), WorkerPool::new(1).unwrap());

    let err = cache.get_image(2).unwrap_err();
    assert!(matches!(err.cause, LoadCause::Panicked(ref msg) if msg.contains("page 2")));
    assert!(!cache.is_loading(2));
    assert!(cache.get_image(3).is_ok());
}

#[test]
fn close_cancels_queued_loads() {
    let source = Arc::new(MockPageSource::new(10));
    let pool = WorkerPool::new(1).unwrap();
    let cache = cache_for(&source, settings_with_window(3, 0, 0), pool.clone());

    cache.get_image(0).unwrap();
    let blocker = block_worker(&pool);
    cache.update_cache(&[0]);
    assert!(cache.is_loading(1));

    cache.close();
    cache.close();
    assert!(cache.cached_indices().is_empty());
    assert!(!cache.is_loading(1));
    assert!(cache.wait_until_idle(IDLE));
    let err = cache.get_image(0).unwrap_err();
    assert!(matches!(err.cause, LoadCause::Closed));

    drop(blocker);
    drain(&pool);
    assert_eq!(source.total_fetches(), 1);
}

#[test]
fn load_running_during_close_is_not_stored() {
    let source = Arc::new(MockPageSource::new(10));
    let gate = source.gate(4);
    let cache = Arc::new(cache_for(&source, settings_with_window(0, 0, 0), WorkerPool::new(1).unwrap()));

    let loader = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.get_image(4))
    };
    assert!(gate.wait_entered(IDLE));
    cache.close();
    gate.release();

    assert!(loader.join().unwrap().is_ok());
    assert!(!cache.is_cached(4));
    assert!(cache.wait_until_idle(IDLE));
}

#[test]
fn dropping_cache_abandons_queued_prefetch() {
    let source = Arc::new(MockPageSource::new(10));
    let pool = WorkerPool::new(1).unwrap();
    let cache = cache_for(&source, settings_with_window(4, 0, 0), pool.clone());

    let blocker = block_worker(&pool);
    cache.update_cache(&[0]);
    drop(cache);

    drop(blocker);
    drain(&pool);
    assert_eq!(source.total_fetches(), 0);
}

#[test]
fn pool_is_shared_between_caches() {
    let pool = WorkerPool::new(2).unwrap();
    let first_source = Arc::new(MockPageSource::new(6));
    let second_source = Arc::new(MockPageSource::new(6));
    let first = cache_for(&first_source, settings_with_window(2, 0, 0), pool.clone());
    let second = cache_for(&second_source, settings_with_window(2, 0, 0), pool);

    first.retrieve_images(&[0]).unwrap();
    second.retrieve_images(&[3]).unwrap();
    assert!(first.wait_until_idle(IDLE));
    assert!(second.wait_until_idle(IDLE));

    assert_eq!(first.cached_indices(), vec![0, 1, 2]);
    assert_eq!(second.cached_indices(), vec![3, 4, 5]);
}
