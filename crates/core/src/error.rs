use std::io;
use std::path::PathBuf;

use looseleaf_pdf::PdfError;

use crate::model::{PageId, StackId};

/// Errors from stack membership operations
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("page {0} not found")]
    PageNotFound(PageId),

    #[error("stack {0} not found")]
    StackNotFound(StackId),

    /// The page already belongs to a stack
    #[error("page {0} is already in a stack")]
    DuplicatePage(PageId),

    #[error("position {index} out of range (stack has {len} pages)")]
    PositionOutOfRange { index: usize, len: usize },
}

/// Errors reading a page archive
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid page manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("unsupported archive version {0}")]
    UnsupportedVersion(u32),

    /// The manifest names an entry the archive does not contain
    #[error("archive is missing entry {0}")]
    MissingEntry(String),

    /// An asset id that cannot be used as a file name
    #[error("invalid asset id {0:?}")]
    InvalidAssetId(String),
    /// A page id that cannot name the page's storage directory
    #[error("invalid page id {0:?}")]
    InvalidPageId(String),
}

/// Errors importing a document into a stack
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("unsupported document format: {0:?}")]
    UnsupportedFormat(PathBuf),

    #[error(transparent)]
    Pdf(#[from] PdfError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Stack(#[from] StackError),
}

/// Errors from a page export
///
/// Apart from `AlreadyExporting`, `PageNotFound` and `Spawn`, which are
/// returned by `begin_export`, these reach the caller only through the
/// failure notification.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("page {0} is already being exported")]
    AlreadyExporting(PageId),

    #[error("page {0} not found")]
    PageNotFound(PageId),

    #[error("destination {path:?} is not writable: {source}")]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read asset {path:?}: {source}")]
    AssetRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize page: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to write archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("export was cancelled")]
    Cancelled,

    #[error("failed to start export worker: {0}")]
    Spawn(#[source] io::Error),
}

/// Errors loading [`StackConfig`](crate::StackConfig)
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}
