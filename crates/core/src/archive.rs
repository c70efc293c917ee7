//! Page archive format
//!
//! An exported page is a zip file:
//!
//! ```text
//! page.json            manifest: version, page id, content, asset list
//! assets/<id>.<ext>    one entry per asset, stored uncompressed
//! ```
//!
//! Archives are written to a temporary file next to the destination and
//! renamed into place, so a reader never sees a partial archive.

use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{ArchiveError, ExportError};
use crate::model::{extension_of, Asset, AssetKind, Page, PageContent, PageId, PageOrigin};

pub const MANIFEST_NAME: &str = "page.json";
pub const ASSETS_DIR: &str = "assets";
pub const ARCHIVE_VERSION: u32 = 1;

/// Contents of `page.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageManifest {
    pub version: u32,
    pub page_id: PageId,
    pub content: PageContent,
    #[serde(default)]
    pub assets: Vec<ManifestAsset>,
    #[serde(default)]
    pub source_application: Option<String>,
}

/// Manifest record for one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestAsset {
    pub id: String,
    pub kind: AssetKind,
    /// Entry name inside the archive
    pub file: String,
}

impl PageManifest {
    pub fn for_page(page: &Page) -> Self {
        Self {
            version: ARCHIVE_VERSION,
            page_id: page.id().clone(),
            content: page.content.clone(),
            assets: page
                .assets
                .iter()
                .map(|asset| ManifestAsset {
                    id: asset.id.clone(),
                    kind: asset.kind,
                    file: asset_entry_name(asset),
                })
                .collect(),
            source_application: page.origin.source_application.clone(),
        }
    }
}

/// Archive entry name for an asset
pub fn asset_entry_name(asset: &Asset) -> String {
    format!("{ASSETS_DIR}/{}.{}", asset.id, asset.extension())
}

/// Read only the manifest of an archive
pub fn read_manifest(path: &Path) -> Result<PageManifest, ArchiveError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    manifest_from(&mut archive)
}

/// Rebuild the page stored in an archive, extracting its assets into `asset_dir`
pub fn read_page_archive(path: &Path, asset_dir: &Path) -> Result<Page, ArchiveError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let manifest = manifest_from(&mut archive)?;
    extract_page(&mut archive, manifest, asset_dir)
}

fn manifest_from<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<PageManifest, ArchiveError> {
    let entry = archive
        .by_name(MANIFEST_NAME)
        .map_err(|err| entry_error(err, MANIFEST_NAME))?;
    let manifest: PageManifest = serde_json::from_reader(entry)?;
    if manifest.version != ARCHIVE_VERSION {
        return Err(ArchiveError::UnsupportedVersion(manifest.version));
    }
    // The page id names a directory under the storage root
    if !is_plain_file_name(manifest.page_id.as_str()) {
        return Err(ArchiveError::InvalidPageId(manifest.page_id.to_string()));
    }
    Ok(manifest)
}

fn extract_page<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    manifest: PageManifest,
    asset_dir: &Path,
) -> Result<Page, ArchiveError> {
    fs::create_dir_all(asset_dir)?;

    let mut assets = Vec::with_capacity(manifest.assets.len());
    for record in &manifest.assets {
        if !is_plain_file_name(&record.id) {
            return Err(ArchiveError::InvalidAssetId(record.id.clone()));
        }
        let mut source = archive
            .by_name(&record.file)
            .map_err(|err| entry_error(err, &record.file))?;

        let target = asset_dir.join(format!(
            "{}.{}",
            record.id,
            extension_of(Path::new(&record.file))
        ));
        let mut out = File::create(&target)?;
        io::copy(&mut source, &mut out)?;

        assets.push(Asset { id: record.id.clone(), kind: record.kind, path: target });
    }

    let mut page = Page::with_id(manifest.page_id, manifest.content);
    page.assets = assets;
    page.origin = PageOrigin { source_application: manifest.source_application, ..PageOrigin::default() };
    Ok(page)
}

fn entry_error(err: ZipError, name: &str) -> ArchiveError {
    match err {
        ZipError::FileNotFound => ArchiveError::MissingEntry(name.to_string()),
        other => ArchiveError::Zip(other),
    }
}

fn is_plain_file_name(id: &str) -> bool {
    !matches!(id, "" | "." | "..")
        && Path::new(id).file_name().and_then(|name| name.to_str()) == Some(id)
}

/// Streams one page into a temporary archive beside its destination
pub(crate) struct ArchiveWriter {
    zip: ZipWriter<NamedTempFile>,
    destination: PathBuf,
}

impl ArchiveWriter {
    /// Fails with `DestinationUnwritable` if the destination directory
    /// cannot hold a temporary file
    pub(crate) fn create(destination: &Path) -> Result<Self, ExportError> {
        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let temp = tempfile::Builder::new()
            .prefix(".looseleaf-export-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|source| ExportError::DestinationUnwritable {
                path: destination.to_path_buf(),
                source,
            })?;

        Ok(Self { zip: ZipWriter::new(temp), destination: destination.to_path_buf() })
    }

    pub(crate) fn write_manifest(&mut self, manifest: &PageManifest) -> Result<(), ExportError> {
        let json = serde_json::to_vec_pretty(manifest)?;
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        self.zip.start_file(MANIFEST_NAME, options)?;
        self.zip.write_all(&json).map_err(ZipError::from)?;
        Ok(())
    }

    pub(crate) fn write_asset(&mut self, asset: &Asset) -> Result<(), ExportError> {
        let bytes = fs::read(&asset.path).map_err(|source| ExportError::AssetRead {
            path: asset.path.clone(),
            source,
        })?;
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        self.zip.start_file(asset_entry_name(asset), options)?;
        self.zip.write_all(&bytes).map_err(ZipError::from)?;
        Ok(())
    }

    /// Write the central directory and rename the archive onto the destination
    pub(crate) fn finish(self) -> Result<PathBuf, ExportError> {
        let Self { zip, destination } = self;
        let temp = zip.finish()?;
        temp.persist(&destination).map_err(|err| ExportError::DestinationUnwritable {
            path: destination.clone(),
            source: err.error,
        })?;
        Ok(destination)
    }
}
