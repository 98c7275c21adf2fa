//! Comic book archives as page-indexed byte sources

mod comic_info;
#[cfg(feature = "rar")]
mod rar_source;
mod zip_source;

use std::io;
use std::path::Path;
use std::sync::Arc;

pub use comic_info::ComicInfo;
#[cfg(feature = "rar")]
pub use rar_source::RarPageSource;
pub use zip_source::ZipPageSource;

/// Errors from fetching raw page bytes
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("no page at index {index}")]
    NotFound { index: usize },

    #[error("I/O: {0}")]
    Io(#[from] Arc<io::Error>),

    #[error("archive: {0}")]
    Archive(String),
}

impl From<io::Error> for SourceError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Errors from opening an archive
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("unsupported comic book file type: {0}")]
    Unsupported(String),

    #[error("archive contains no readable pages: {0}")]
    NoPages(String),

    #[error("I/O: {0}")]
    Io(#[from] io::Error),

    #[error("malformed archive: {0}")]
    Malformed(String),
}

/// Random access to the encoded page images of one opened archive.
///
/// Indices are zero-based and follow reading order.
pub trait PageSource: Send + Sync {
    /// Number of pages in the archive
    fn page_count(&self) -> usize;

    /// Highest index accepted by [`PageSource::fetch_bytes`]
    fn max_index(&self) -> usize {
        self.page_count().saturating_sub(1)
    }

    /// Raw encoded bytes of the page at `index`
    fn fetch_bytes(&self, index: usize) -> Result<Vec<u8>, SourceError>;

    /// Contents of the archive's ComicInfo.xml, if it has one
    fn comic_info_bytes(&self) -> Option<Vec<u8>> {
        None
    }
}

const ZIP_EXTENSIONS: &[&str] = &["zip", "cbz"];
#[cfg(feature = "rar")]
const RAR_EXTENSIONS: &[&str] = &["rar", "cbr"];
#[cfg(not(feature = "rar"))]
const RAR_EXTENSIONS: &[&str] = &[];

const COMIC_INFO_NAME: &str = "ComicInfo.xml";

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

/// Whether `path` has an extension one of the openers handles
pub fn is_supported_archive(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| {
        ZIP_EXTENSIONS.contains(&ext.as_str()) || RAR_EXTENSIONS.contains(&ext.as_str())
    })
}

/// Open the archive at `path` with the opener matching its extension
pub fn open_archive(path: &Path) -> Result<Arc<dyn PageSource>, ArchiveError> {
    match extension_of(path).as_deref() {
        Some(ext) if ZIP_EXTENSIONS.contains(&ext) => Ok(Arc::new(ZipPageSource::open(path)?)),
        #[cfg(feature = "rar")]
        Some(ext) if RAR_EXTENSIONS.contains(&ext) => Ok(Arc::new(RarPageSource::open(path)?)),
        _ => Err(ArchiveError::Unsupported(path.display().to_string())),
    }
}

/// Page and ComicInfo entries picked out of an archive's file names
pub(crate) struct EntryListing {
    pub page_names: Vec<String>,
    pub comic_info_name: Option<String>,
}

impl EntryListing {
    /// Pages come back sorted by full name, since entry order inside an
    /// archive is not reading order.
    pub fn from_names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        let mut page_names = Vec::new();
        let mut comic_info_name = None;
        for name in names {
            let name = name.into();
            if name.ends_with(COMIC_INFO_NAME) {
                comic_info_name = Some(name);
            } else if !name.ends_with('/') && is_page_image(&name) {
                page_names.push(name);
            }
        }
        page_names.sort();
        Self {
            page_names,
            comic_info_name,
        }
    }
}

/// Whether an entry name looks like a page image we can decode
pub(crate) fn is_page_image(name: &str) -> bool {
    let Some(ext) = Path::new(name).extension() else {
        return false;
    };
    crate::images::SUPPORTED_EXTENSIONS.contains(&ext.to_string_lossy().to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_archive_extensions() {
        assert!(is_supported_archive(Path::new("book.cbz")));
        assert!(is_supported_archive(Path::new("Book.ZIP")));
        assert_eq!(is_supported_archive(Path::new("book.cbr")), cfg!(feature = "rar"));
        assert_eq!(is_supported_archive(Path::new("Book.RAR")), cfg!(feature = "rar"));
        assert!(!is_supported_archive(Path::new("book.cb7")));
        assert!(!is_supported_archive(Path::new("book")));
    }

    #[test]
    fn open_rejects_unknown_extension() {
        let err = open_archive(Path::new("volume1.cb7")).err().unwrap();
        assert!(matches!(err, ArchiveError::Unsupported(_)));
    }

    #[cfg(feature = "rar")]
    #[test]
    fn open_dispatches_rar_by_extension() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/sample.cbr");
        let source = open_archive(&path).unwrap();
        assert_eq!(source.page_count(), 3);
        assert!(source.comic_info_bytes().is_some());
    }

    #[test]
    fn entry_listing_sorts_pages_and_finds_comic_info() {
        let listing = EntryListing::from_names([
            "b/02.png",
            "scans/",
            "a/ComicInfo.xml",
            "b/01.jpg",
            "readme.txt",
            "a/09.webp",
        ]);
        assert_eq!(listing.page_names, ["a/09.webp", "b/01.jpg", "b/02.png"]);
        assert_eq!(listing.comic_info_name.as_deref(), Some("a/ComicInfo.xml"));
    }

    #[test]
    fn page_image_filter() {
        assert!(is_page_image("pages/001.png"));
        assert!(is_page_image("002.JPG"));
        assert!(is_page_image("003.jpeg"));
        assert!(!is_page_image("ComicInfo.xml"));
        assert!(!is_page_image("pages/"));
        assert!(!is_page_image("notes.txt"));
        assert_eq!(is_page_image("scan.TIFF"), cfg!(feature = "image-tiff"));
        assert_eq!(is_page_image("scan.tif"), cfg!(feature = "image-tiff"));
        assert_eq!(is_page_image("scan.bmp"), cfg!(feature = "image-bmp"));
    }

    #[test]
    fn io_errors_convert_into_source_errors() {
        let err: SourceError = io::Error::new(io::ErrorKind::UnexpectedEof, "truncated").into();
        assert!(matches!(err, SourceError::Io(_)));
        assert!(err.to_string().contains("truncated"));
    }
}
