pub mod archive;
pub mod cache;
pub mod images;
pub mod navigation;
pub mod panic_handler;
pub mod settings;

pub mod test_utils;

pub use archive::{ArchiveError, ComicInfo, PageSource, SourceError, ZipPageSource, open_archive};
#[cfg(feature = "rar")]
pub use archive::RarPageSource;
pub use cache::{CacheStats, LoadCause, PageLoadError, PrefetchCache, WorkerPool};
pub use images::{DecodeError, DecodedImage, Decoder, RasterDecoder};
pub use navigation::BookNavigator;
pub use settings::{Settings, SettingsStore};
