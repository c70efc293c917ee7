//! Page data model
//!
//! A page is vector ink on a fixed-size canvas plus the assets it references
//! (background scans, pasted images). Pages are identified by a uuid string
//! that never changes for the page's lifetime, even when it moves between
//! stacks.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canvas size of a page created without a source document (points)
pub const DEFAULT_PAGE_WIDTH: f32 = 768.0;
pub const DEFAULT_PAGE_HEIGHT: f32 = 1024.0;

/// Unique identifier for a page
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    /// Create a fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a stack
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackId(String);

impl StackId {
    /// Create a fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StackId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A point on the page canvas (points, origin top-left)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// One pen stroke
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    /// RGBA
    pub color: [u8; 4],
    pub width: f32,
    pub points: Vec<Point>,
}

/// Drawable content of a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub strokes: Vec<Stroke>,
}

impl PageContent {
    /// Empty canvas of the given size
    pub fn sized(width: f32, height: f32) -> Self {
        Self { width, height, strokes: Vec::new() }
    }
}

impl Default for PageContent {
    fn default() -> Self {
        Self::sized(DEFAULT_PAGE_WIDTH, DEFAULT_PAGE_HEIGHT)
    }
}

/// What an asset is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Full-page background, drawn beneath the ink
    Background,
    /// Image placed on the page
    Image,
}

/// A file a page depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: String,
    pub kind: AssetKind,
    /// Location on disk
    pub path: PathBuf,
}

impl Asset {
    /// Asset with a fresh id
    pub fn new(kind: AssetKind, path: impl Into<PathBuf>) -> Self {
        Self { id: Uuid::new_v4().to_string(), kind, path: path.into() }
    }

    /// File extension used when the asset is stored, `bin` if the path has none
    pub fn extension(&self) -> &str {
        extension_of(&self.path)
    }
}

pub(crate) fn extension_of(path: &Path) -> &str {
    path.extension().and_then(|ext| ext.to_str()).unwrap_or("bin")
}

/// Where an imported page came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageOrigin {
    /// Application that handed the file over, if any
    pub source_application: Option<String>,
    /// File the page was imported from
    pub file: Option<PathBuf>,
    /// Zero-based page index within a PDF source
    pub pdf_page_index: Option<u32>,
}

/// A single notebook page
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    id: PageId,
    pub content: PageContent,
    pub assets: Vec<Asset>,
    pub origin: PageOrigin,
}

impl Page {
    /// New page with a fresh id
    pub fn new(content: PageContent) -> Self {
        Self::with_id(PageId::generate(), content)
    }

    /// Empty page with the default canvas size
    pub fn blank() -> Self {
        Self::new(PageContent::default())
    }

    pub fn with_id(id: PageId, content: PageContent) -> Self {
        Self { id, content, assets: Vec::new(), origin: PageOrigin::default() }
    }

    pub fn id(&self) -> &PageId {
        &self.id
    }

    pub(crate) fn set_id(&mut self, id: PageId) {
        self.id = id;
    }

    /// First background asset, if any
    pub fn background(&self) -> Option<&Asset> {
        self.assets.iter().find(|asset| asset.kind == AssetKind::Background)
    }
}
