pub mod test_helpers {
    use std::collections::{HashMap, HashSet};
    use std::fs::File;
    use std::io::{self, Cursor, Write};
    use std::path::Path;
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    use flume::{Receiver, Sender};
    use image::{ImageFormat, Rgba, RgbaImage};
    use zip::ZipWriter;
    use zip::write::FileOptions;

    use crate::archive::{PageSource, SourceError};
    use crate::settings::{Settings, SettingsStore};

    /// Encode a solid `width` x `height` PNG
    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let shade = ((width * 7 + height * 13) % 256) as u8;
        let image = RgbaImage::from_pixel(width, height, Rgba([shade, 128, 255 - shade, 255]));
        let mut bytes = Cursor::new(Vec::new());
        image
            .write_to(&mut bytes, ImageFormat::Png)
            .expect("encode test png");
        bytes.into_inner()
    }

    /// Write a zip archive at `path` holding `entries` in the given order
    pub fn write_cbz(path: &Path, entries: &[(&str, Vec<u8>)]) {
        let file = File::create(path).expect("create test archive");
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, bytes) in entries {
            zip.start_file(*name, options).expect("start zip entry");
            zip.write_all(bytes).expect("write zip entry");
        }
        zip.finish().expect("finish test archive");
    }

    /// A comic with `pages` portrait pages named `page_000.png`, ...
    pub fn write_comic(path: &Path, pages: usize) {
        let entries: Vec<(String, Vec<u8>)> = (0..pages)
            .map(|i| (format!("page_{i:03}.png"), png_bytes(6, 8)))
            .collect();
        let borrowed: Vec<(&str, Vec<u8>)> = entries
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.clone()))
            .collect();
        write_cbz(path, &borrowed);
    }

    /// Settings with the given window sizes and everything else default
    pub fn settings_with_window(ahead: usize, behind: usize, extra: usize) -> SettingsStore {
        SettingsStore::new(Settings {
            cache_ahead_count: ahead,
            cache_behind_count: behind,
            uncache_extra_range: extra,
            ..Settings::default()
        })
    }

    /// Holds a page fetch inside the source until released or dropped
    pub struct PageGate {
        entered: Receiver<()>,
        release: Sender<()>,
    }

    impl PageGate {
        /// Block until a fetch of the gated page has started
        pub fn wait_entered(&self, timeout: Duration) -> bool {
            self.entered.recv_timeout(timeout).is_ok()
        }

        pub fn release(&self) {
            let _ = self.release.send(());
        }
    }

    struct GateSlot {
        entered: Sender<()>,
        release: Receiver<()>,
    }

    /// In-memory [`PageSource`] that records every fetch and can be told to
    /// fail, panic, or block on individual pages.
    pub struct MockPageSource {
        pages: Vec<Vec<u8>>,
        comic_info: Option<Vec<u8>>,
        fetches: Mutex<HashMap<usize, usize>>,
        failing: Mutex<HashSet<usize>>,
        panicking: Mutex<HashSet<usize>>,
        gates: Mutex<HashMap<usize, GateSlot>>,
        delay: Option<Duration>,
    }

    impl MockPageSource {
        /// `count` portrait pages
        pub fn new(count: usize) -> Self {
            Self::from_pages((0..count).map(|_| png_bytes(6, 8)).collect())
        }

        pub fn from_pages(pages: Vec<Vec<u8>>) -> Self {
            Self {
                pages,
                comic_info: None,
                fetches: Mutex::new(HashMap::new()),
                failing: Mutex::new(HashSet::new()),
                panicking: Mutex::new(HashSet::new()),
                gates: Mutex::new(HashMap::new()),
                delay: None,
            }
        }

        /// Make the listed pages landscape
        pub fn with_spreads(mut self, indices: &[usize]) -> Self {
            for &index in indices {
                if let Some(page) = self.pages.get_mut(index) {
                    *page = png_bytes(12, 8);
                }
            }
            self
        }

        pub fn with_comic_info(mut self, xml: &str) -> Self {
            self.comic_info = Some(xml.as_bytes().to_vec());
            self
        }

        /// Sleep this long inside every fetch
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn fail_index(&self, index: usize) {
            lock(&self.failing).insert(index);
        }

        pub fn clear_failure(&self, index: usize) {
            lock(&self.failing).remove(&index);
        }

        pub fn panic_on(&self, index: usize) {
            lock(&self.panicking).insert(index);
        }

        /// Gate the next fetch of `index`
        pub fn gate(&self, index: usize) -> PageGate {
            let (entered_tx, entered_rx) = flume::unbounded();
            let (release_tx, release_rx) = flume::unbounded();
            lock(&self.gates).insert(
                index,
                GateSlot {
                    entered: entered_tx,
                    release: release_rx,
                },
            );
            PageGate {
                entered: entered_rx,
                release: release_tx,
            }
        }

        pub fn fetch_count(&self, index: usize) -> usize {
            lock(&self.fetches).get(&index).copied().unwrap_or(0)
        }

        pub fn total_fetches(&self) -> usize {
            lock(&self.fetches).values().sum()
        }

        /// Indices fetched more than once
        pub fn refetched(&self) -> Vec<usize> {
            let mut indices: Vec<usize> = lock(&self.fetches)
                .iter()
                .filter(|&(_, &count)| count > 1)
                .map(|(&index, _)| index)
                .collect();
            indices.sort_unstable();
            indices
        }
    }

    impl PageSource for MockPageSource {
        fn page_count(&self) -> usize {
            self.pages.len()
        }

        fn fetch_bytes(&self, index: usize) -> Result<Vec<u8>, SourceError> {
            *lock(&self.fetches).entry(index).or_insert(0) += 1;

            let gate = lock(&self.gates).remove(&index);
            if let Some(gate) = gate {
                let _ = gate.entered.send(());
                // A dropped PageGate releases the fetch as well
                let _ = gate.release.recv();
            }
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if lock(&self.panicking).contains(&index) {
                panic!("mock source panicked on page {index}");
            }
            if lock(&self.failing).contains(&index) {
                return Err(io::Error::other(format!("mock failure on page {index}")).into());
            }
            self.pages
                .get(index)
                .cloned()
                .ok_or(SourceError::NotFound { index })
        }

        fn comic_info_bytes(&self) -> Option<Vec<u8>> {
            self.comic_info.clone()
        }
    }

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
