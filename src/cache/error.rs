use crate::archive::SourceError;
use crate::images::DecodeError;

/// Why a page could not be produced
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadCause {
    #[error("page source: {0}")]
    Source(#[from] SourceError),

    #[error("decoder: {0}")]
    Decode(#[from] DecodeError),

    #[error("cache was closed before the load ran")]
    Closed,

    #[error("loader panicked: {0}")]
    Panicked(String),
}

/// A page failed to load. Delivered to every caller waiting on that page.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to load page {index}: {cause}")]
pub struct PageLoadError {
    pub index: usize,
    #[source]
    pub cause: LoadCause,
}

impl PageLoadError {
    pub fn new(index: usize, cause: impl Into<LoadCause>) -> Self {
        Self {
            index,
            cause: cause.into(),
        }
    }
}
