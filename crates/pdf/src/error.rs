use std::path::PathBuf;

/// Errors returned by [`PdfDocument`](crate::PdfDocument)
#[derive(Debug, Clone, thiserror::Error)]
pub enum PdfError {
    /// The file is missing, unreadable, encrypted or not a PDF
    #[error("failed to load PDF {path:?}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// Page index outside `0..page_count`
    #[error("page {index} out of range (page_count={page_count})")]
    Index { index: u32, page_count: u32 },

    /// The page could not be rasterized
    #[error("failed to render page {index}: {reason}")]
    Render { index: u32, reason: String },

    /// A render was requested with a zero maximum dimension
    #[error("max dimension must be greater than zero")]
    InvalidDimension,
}

impl PdfError {
    pub(crate) fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PdfError::Load { path: path.into(), reason: reason.to_string() }
    }

    pub(crate) fn render(index: u32, reason: impl ToString) -> Self {
        PdfError::Render { index, reason: reason.to_string() }
    }
}

/// Result type for PDF operations
pub type PdfResult<T> = Result<T, PdfError>;
