//! Rar / cbr page source

use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, warn};
use unrar::Archive;
use unrar::error::UnrarError;

use super::{ArchiveError, EntryListing, PageSource, SourceError};

/// Pages of a rar-based comic book, sorted by entry name.
///
/// unrar only reads forward, so every fetch reopens the archive and skips
/// headers up to the wanted entry.
pub struct RarPageSource {
    path: PathBuf,
    page_names: Vec<String>,
    comic_info_name: Option<String>,
}

impl RarPageSource {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let start = Instant::now();
        // unrar reports a missing file as a generic open failure
        std::fs::metadata(path)?;

        let listing = Archive::new(path)
            .open_for_listing()
            .map_err(|e| malformed(path, &e))?;
        let mut names = Vec::new();
        for header in listing {
            let header = header.map_err(|e| malformed(path, &e))?;
            if !header.is_directory() {
                names.push(entry_name(&header.filename));
            }
        }

        let EntryListing {
            page_names,
            comic_info_name,
        } = EntryListing::from_names(names);
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
        let archive_error = |e: UnrarError| SourceError::Archive(format!("{name}: {e}"));

        let mut archive = Archive::new(&self.path)
            .open_for_processing()
            .map_err(archive_error)?;
        while let Some(header) = archive.read_header().map_err(archive_error)? {
            archive = if entry_name(&header.entry().filename) == name {
                let (bytes, _rest) = header.read().map_err(archive_error)?;
                return Ok(bytes);
            } else {
                header.skip().map_err(archive_error)?
            };
        }
        Err(SourceError::Archive(format!("{name}: entry vanished from {:?}", self.path)))
    }
}

impl PageSource for RarPageSource {
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

/// Rar archives made on Windows store `\` separators
fn entry_name(filename: &Path) -> String {
    filename.to_string_lossy().replace('\\', "/")
}

fn malformed(path: &Path, err: &UnrarError) -> ArchiveError {
    ArchiveError::Malformed(format!("{}: {err}", path.display()))
}
