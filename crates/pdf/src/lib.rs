//! Looseleaf PDF Library
//!
//! Opens imported PDF documents, answers page-count and page-size queries
//! and rasterizes pages into bitmaps bounded by a maximum dimension. Rendered
//! bitmaps are memoized per document and released on memory pressure.
//!
//! # Example
//!
//! ```no_run
//! use looseleaf_pdf::PdfDocument;
//!
//! let document = PdfDocument::open("imported.pdf")?;
//! let thumbnail = document.render_page(0, 200)?;
//! assert_eq!(thumbnail.width().max(thumbnail.height()), 200);
//! # Ok::<(), looseleaf_pdf::PdfError>(())
//! ```

mod document;
mod error;
mod raster;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use document::{fit_within, PageSize, PdfDocument, RenderKey, RenderTicket};
pub use error::{PdfError, PdfResult};
pub use raster::{Bitmap, ContentRasterizer, PageSource, Rasterizer};
