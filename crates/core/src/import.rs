//! Turning external files into pages
//!
//! Three kinds of file can be imported, told apart by their leading bytes:
//! PDFs (one page per PDF page, with the rendered page as background), single
//! images (one page with the image as background) and page archives written
//! by an export.
//!
//! Imports are staged: every asset directory created along the way is removed
//! again unless the caller commits the import.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use image::{ImageFormat, ImageReader};
use log::{debug, warn};
use looseleaf_pdf::PdfDocument;

use crate::archive;
use crate::config::StackConfig;
use crate::error::ImportError;
use crate::model::{Asset, AssetKind, Page, PageContent, PageId, PageOrigin};

/// PDF magic bytes: %PDF-
const PDF_MAGIC: &[u8] = b"%PDF-";
/// Local file header of a zip archive
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const HEADER_LEN: u64 = 16;

/// Kind of file handed to an import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Image(ImageFormat),
    PageArchive,
}

/// Detect the format of a file from its first bytes
pub fn detect_format<P: AsRef<Path>>(path: P) -> Result<SourceFormat, ImportError> {
    let path = path.as_ref();
    let mut header = Vec::with_capacity(HEADER_LEN as usize);
    File::open(path)?.take(HEADER_LEN).read_to_end(&mut header)?;
    detect_format_from_bytes(&header).ok_or_else(|| ImportError::UnsupportedFormat(path.to_path_buf()))
}

/// Detect the format of data from its first bytes
pub fn detect_format_from_bytes(data: &[u8]) -> Option<SourceFormat> {
    if data.starts_with(PDF_MAGIC) {
        return Some(SourceFormat::Pdf);
    }
    if data.starts_with(ZIP_MAGIC) {
        return Some(SourceFormat::PageArchive);
    }
    match image::guess_format(data) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg)) => Some(SourceFormat::Image(format)),
        _ => None,
    }
}

/// Pages produced by an import that has not been committed yet
#[derive(Debug, Default)]
pub(crate) struct StagedImport {
    pages: Vec<Page>,
    dirs: Vec<PathBuf>,
}

impl StagedImport {
    /// Create the asset directory for a page, to be removed on rollback
    fn page_dir(&mut self, config: &StackConfig, page_id: &PageId) -> io::Result<PathBuf> {
        let dir = config.page_dir(page_id);
        fs::create_dir_all(&dir)?;
        self.dirs.push(dir.clone());
        Ok(dir)
    }

    pub(crate) fn take_pages(&mut self) -> Vec<Page> {
        std::mem::take(&mut self.pages)
    }

    /// Keep everything written so far
    pub(crate) fn commit(mut self) {
        self.dirs.clear();
    }
}

impl Drop for StagedImport {
    fn drop(&mut self) {
        for dir in &self.dirs {
            if let Err(err) = fs::remove_dir_all(dir) {
                warn!("Failed to roll back import directory {:?}: {}", dir, err);
            }
        }
    }
}

/// One page per PDF page, each with its rendered background
pub(crate) fn stage_pdf(
    staged: &mut StagedImport,
    document: &PdfDocument,
    config: &StackConfig,
    source_application: Option<&str>,
) -> Result<(), ImportError> {
    for index in 0..document.page_count() {
        let size = document.page_size(index)?;
        let bitmap = document.render_page(index, config.thumbnail_max_dimension)?;

        let mut page = Page::new(PageContent::sized(size.width, size.height));
        let dir = staged.page_dir(config, page.id())?;
        let background = dir.join("background.png");
        bitmap.save_with_format(&background, ImageFormat::Png)?;

        page.assets.push(Asset::new(AssetKind::Background, background));
        page.origin = PageOrigin {
            source_application: source_application.map(str::to_string),
            file: Some(document.path().to_path_buf()),
            pdf_page_index: Some(index),
        };
        debug!("Staged page {} from {:?} page {}", page.id(), document.path(), index);
        staged.pages.push(page);
    }
    Ok(())
}

/// One page with the image as its background
pub(crate) fn stage_image(
    staged: &mut StagedImport,
    path: &Path,
    format: ImageFormat,
    config: &StackConfig,
    source_application: Option<&str>,
) -> Result<(), ImportError> {
    let image = ImageReader::with_format(BufReader::new(File::open(path)?), format).decode()?;

    let mut page = Page::new(PageContent::sized(image.width() as f32, image.height() as f32));
    let dir = staged.page_dir(config, page.id())?;
    let extension = format.extensions_str().first().copied().unwrap_or("img");
    let background = dir.join(format!("background.{extension}"));
    fs::copy(path, &background)?;

    page.assets.push(Asset::new(AssetKind::Background, background));
    page.origin = PageOrigin {
        source_application: source_application.map(str::to_string),
        file: Some(path.to_path_buf()),
        pdf_page_index: None,
    };
    staged.pages.push(page);
    Ok(())
}

/// The page stored in an exported archive
///
/// The archived page id is kept unless `is_taken` reports it already in use.
pub(crate) fn stage_archive(
    staged: &mut StagedImport,
    path: &Path,
    config: &StackConfig,
    is_taken: &dyn Fn(&PageId) -> bool,
    source_application: Option<&str>,
) -> Result<(), ImportError> {
    let manifest = archive::read_manifest(path)?;
    let page_id = if is_taken(&manifest.page_id) {
        let fresh = PageId::generate();
        debug!("Archived page {} already present, importing as {}", manifest.page_id, fresh);
        fresh
    } else {
        manifest.page_id
    };

    let dir = staged.page_dir(config, &page_id)?;
    let mut page = archive::read_page_archive(path, &dir)?;
    page.set_id(page_id);
    page.origin.file = Some(path.to_path_buf());
    if page.origin.source_application.is_none() {
        page.origin.source_application = source_application.map(str::to_string);
    }
    staged.pages.push(page);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use looseleaf_pdf::fixtures;

    fn config(dir: &Path) -> StackConfig {
        StackConfig::default()
            .with_storage_dir(dir.join("storage"))
            .with_thumbnail_max_dimension(200)
    }

    #[test]
    fn test_detect_from_bytes() {
        assert_eq!(detect_format_from_bytes(b"%PDF-1.7\n%abc"), Some(SourceFormat::Pdf));
        assert_eq!(detect_format_from_bytes(b"PK\x03\x04rest"), Some(SourceFormat::PageArchive));
        assert_eq!(
            detect_format_from_bytes(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"),
            Some(SourceFormat::Image(ImageFormat::Png))
        );
        assert_eq!(detect_format_from_bytes(b"hello world"), None);
        assert_eq!(detect_format_from_bytes(b""), None);
    }

    #[test]
    fn test_detect_unsupported_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "just text").unwrap();

        assert!(matches!(detect_format(&path), Err(ImportError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_stage_pdf_renders_backgrounds() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("doc.pdf");
        fixtures::write_sized_pdf(&pdf, &[(300.0, 600.0), (612.0, 792.0)]).unwrap();
        let document = PdfDocument::open(&pdf).unwrap();
        let config = config(dir.path());

        let mut staged = StagedImport::default();
        stage_pdf(&mut staged, &document, &config, Some("com.example.files")).unwrap();
        let pages = staged.take_pages();
        staged.commit();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].content.width, 300.0);
        assert_eq!(pages[1].origin.pdf_page_index, Some(1));
        assert_eq!(pages[0].origin.source_application.as_deref(), Some("com.example.files"));

        let background = pages[0].background().unwrap();
        let (w, h) = image::image_dimensions(&background.path).unwrap();
        assert_eq!((w, h), (100, 200));
    }

    #[test]
    fn test_uncommitted_import_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("doc.pdf");
        fixtures::write_sized_pdf(&pdf, &[(100.0, 100.0)]).unwrap();
        let document = PdfDocument::open(&pdf).unwrap();
        let config = config(dir.path());

        let mut staged = StagedImport::default();
        stage_pdf(&mut staged, &document, &config, None).unwrap();
        let pages = staged.take_pages();
        drop(staged);

        assert!(!config.page_dir(pages[0].id()).exists());
    }

    #[test]
    fn test_stage_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        RgbaImage::from_pixel(40, 30, Rgba([10, 20, 30, 255])).save(&path).unwrap();
        let config = config(dir.path());

        let mut staged = StagedImport::default();
        stage_image(&mut staged, &path, ImageFormat::Png, &config, None).unwrap();
        let pages = staged.take_pages();
        staged.commit();

        assert_eq!(pages.len(), 1);
        assert_eq!((pages[0].content.width, pages[0].content.height), (40.0, 30.0));
        let background = pages[0].background().unwrap();
        assert_eq!(fs::read(&background.path).unwrap(), fs::read(&path).unwrap());
    }

    #[test]
    fn test_corrupt_image_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        fs::write(&path, b"\x89PNG\r\n\x1a\ntruncated").unwrap();
        let config = config(dir.path());

        let mut staged = StagedImport::default();
        let err = stage_image(&mut staged, &path, ImageFormat::Png, &config, None).unwrap_err();

        assert!(matches!(err, ImportError::Image(_)));
    }
}
