//! Zip / cbz page source

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use log::{debug, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use super::{ArchiveError, EntryListing, PageSource, SourceError};

/// Upper bound on the buffer reserved from an entry's declared size. The
/// declared size comes from the archive and is not trusted.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Pages of a zip-based comic book, sorted by entry name
pub struct ZipPageSource {
    path: PathBuf,
    archive: Mutex<ZipArchive<BufReader<File>>>,
    page_names: Vec<String>,
    comic_info_name: Option<String>,
}

impl ZipPageSource {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let start = Instant::now();
        let file = File::open(path)?;
        let archive = ZipArchive::new(BufReader::new(file)).map_err(|e| match e {
            ZipError::Io(io) => ArchiveError::Io(io),
            other => ArchiveError::Malformed(other.to_string()),
        })?;

        let EntryListing {
            page_names,
            comic_info_name,
        } = EntryListing::from_names(archive.file_names());
        if page_names.is_empty() {
            return Err(ArchiveError::NoPages(path.display().to_string()));
        }

        debug!(
            "Opened {:?}: {} pages, comic info: {} ({:.1}ms)",
            path,
            page_names.len(),
            comic_info_name.is_some(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Self {
            path: path.to_path_buf(),
            archive: Mutex::new(archive),
            page_names,
            comic_info_name,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry names in page order
    #[must_use]
    pub fn page_names(&self) -> &[String] {
        &self.page_names
    }

    fn read_entry(&self, name: &str) -> Result<Vec<u8>, SourceError> {
        let mut archive = self
            .archive
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut entry = archive.by_name(name).map_err(|e| match e {
            ZipError::Io(io) => SourceError::from(io),
            other => SourceError::Archive(format!("{name}: {other}")),
        })?;
        let mut bytes = Vec::with_capacity(capacity_hint(entry.size()));
        entry.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

fn capacity_hint(declared_size: u64) -> usize {
    usize::try_from(declared_size.min(MAX_PREALLOCATION)).unwrap_or(0)
}

impl PageSource for ZipPageSource {
    fn page_count(&self) -> usize {
        self.page_names.len()
    }

    fn fetch_bytes(&self, index: usize) -> Result<Vec<u8>, SourceError> {
        let name = self
            .page_names
            .get(index)
            .ok_or(SourceError::NotFound { index })?;
        self.read_entry(name)
    }

    fn comic_info_bytes(&self) -> Option<Vec<u8>> {
        let name = self.comic_info_name.as_deref()?;
        match self.read_entry(name) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Failed to read {name} from {:?}: {e}", self.path);
                None
            }
        }
    }
}
