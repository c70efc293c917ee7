//! Imported PDF documents
//!
//! A [`PdfDocument`] parses its file once at open time. Page sizes are
//! resolved on first access and kept for the document's lifetime; rendered
//! bitmaps are memoized per `(page, max dimension)` and dropped wholesale when
//! the process signals memory pressure.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use looseleaf_cache::{CacheStats, MemoryPressureListener, ReleaseError, RenderCache};
use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::error::{PdfError, PdfResult};
use crate::raster::{as_number, Bitmap, ContentRasterizer, PageSource, Rasterizer};

/// PDF magic bytes: %PDF-
const PDF_MAGIC: &[u8] = b"%PDF-";

/// US Letter, used when a page has no usable MediaBox
const FALLBACK_SIZE: PageSize = PageSize { width: 612.0, height: 792.0 };

/// Parent links followed when looking for an inherited MediaBox
const MAX_TREE_DEPTH: usize = 32;

/// Intrinsic page size in points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy)]
struct MediaBox {
    origin: (f32, f32),
    size: PageSize,
}

/// Cache key for a rendered page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub page_index: u32,
    pub max_dimension: u32,
}

/// Pixel size of a page scaled so its longer side is exactly `max_dimension`
///
/// The shorter side is scaled proportionally and rounded to the nearest
/// pixel, never below one.
pub fn fit_within(size: PageSize, max_dimension: u32) -> (u32, u32) {
    let width = f64::from(size.width);
    let height = f64::from(size.height);
    let max = f64::from(max_dimension);

    if width >= height {
        let scaled = (height * max / width).round().max(1.0) as u32;
        (max_dimension, scaled)
    } else {
        let scaled = (width * max / height).round().max(1.0) as u32;
        (scaled, max_dimension)
    }
}

/// Result of an asynchronous render request
#[derive(Debug)]
pub enum RenderTicket {
    /// Served from the cache on the calling thread
    Ready(Arc<Bitmap>),
    /// Rendering on the background pool
    Pending { page_index: u32, receiver: Receiver<PdfResult<Arc<Bitmap>>> },
}

impl RenderTicket {
    /// Whether the bitmap was available without a thread handoff
    pub fn is_ready(&self) -> bool {
        matches!(self, RenderTicket::Ready(_))
    }

    /// Block until the bitmap is available
    pub fn wait(self) -> PdfResult<Arc<Bitmap>> {
        match self {
            RenderTicket::Ready(bitmap) => Ok(bitmap),
            RenderTicket::Pending { page_index, receiver } => receiver
                .recv()
                .map_err(|_| PdfError::render(page_index, "render worker went away"))?,
        }
    }
}

type RenderResult = PdfResult<Arc<Bitmap>>;

/// How a render request is served
enum Flight {
    Cached(Arc<Bitmap>),
    /// No render of this key is running; the caller performs it
    Lead,
    /// Another caller is rendering this key
    Wait(Receiver<RenderResult>),
}

/// A PDF opened for import and thumbnailing
pub struct PdfDocument {
    path: PathBuf,
    document: Document,
    page_ids: Vec<ObjectId>,
    media_boxes: Vec<OnceLock<MediaBox>>,
    rasterizer: Box<dyn Rasterizer>,
    cache: RenderCache<RenderKey, Bitmap>,
    /// Callers waiting on a render that is already running
    in_flight: Mutex<HashMap<RenderKey, Vec<Sender<RenderResult>>>>,
    render_count: AtomicU64,
}

impl PdfDocument {
    /// Open a PDF with the default rasterizer
    pub fn open(path: impl AsRef<Path>) -> PdfResult<Self> {
        Self::open_with_rasterizer(path, Box::new(ContentRasterizer))
    }

    /// Open a PDF that renders through `rasterizer`
    pub fn open_with_rasterizer(
        path: impl AsRef<Path>,
        rasterizer: Box<dyn Rasterizer>,
    ) -> PdfResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| PdfError::load(path, e))?;

        if !bytes.starts_with(PDF_MAGIC) {
            return Err(PdfError::load(path, "not a PDF file"));
        }

        let document = Document::load_mem(&bytes).map_err(|e| PdfError::load(path, e))?;
        if document.trailer.get(b"Encrypt").is_ok() {
            return Err(PdfError::load(path, "encrypted PDFs are not supported"));
        }

        let page_ids: Vec<ObjectId> = document.get_pages().into_values().collect();
        if page_ids.is_empty() {
            return Err(PdfError::load(path, "document has no pages"));
        }

        log::debug!("opened {:?} with {} pages", path, page_ids.len());

        let media_boxes = page_ids.iter().map(|_| OnceLock::new()).collect();
        Ok(Self {
            path: path.to_path_buf(),
            document,
            page_ids,
            media_boxes,
            rasterizer,
            cache: RenderCache::new(),
            in_flight: Mutex::new(HashMap::new()),
            render_count: AtomicU64::new(0),
        })
    }

    /// File the document was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of pages; fixed for the document's lifetime
    pub fn page_count(&self) -> u32 {
        self.page_ids.len() as u32
    }

    /// Intrinsic size of a page in points
    pub fn page_size(&self, index: u32) -> PdfResult<PageSize> {
        Ok(self.media_box(index)?.size)
    }

    /// Render a page so its longer side is exactly `max_dimension` pixels
    ///
    /// Repeated calls with the same arguments return the cached bitmap, and
    /// concurrent calls share a single render.
    pub fn render_page(&self, index: u32, max_dimension: u32) -> PdfResult<Arc<Bitmap>> {
        let key = self.validate(index, max_dimension)?;

        match self.claim(key) {
            Flight::Cached(bitmap) => {
                log::debug!("render cache hit for page {} at {}px", index, max_dimension);
                Ok(bitmap)
            }
            Flight::Lead => self.lead(key),
            Flight::Wait(receiver) => receiver
                .recv()
                .map_err(|_| PdfError::render(index, "render worker went away"))?,
        }
    }

    /// Render a page without blocking on a cache miss
    ///
    /// A cached bitmap is returned immediately on the calling thread;
    /// otherwise the render runs on the background pool and the ticket
    /// resolves when it lands.
    pub fn render_page_async(
        self: &Arc<Self>,
        index: u32,
        max_dimension: u32,
    ) -> PdfResult<RenderTicket> {
        let key = self.validate(index, max_dimension)?;

        let receiver = match self.claim(key) {
            Flight::Cached(bitmap) => return Ok(RenderTicket::Ready(bitmap)),
            Flight::Wait(receiver) => receiver,
            Flight::Lead => {
                let (sender, receiver) = crossbeam_channel::bounded(1);
                let document = Arc::clone(self);
                rayon::spawn(move || {
                    // The ticket may have been dropped; the bitmap is cached either way.
                    let _ = sender.send(document.lead(key));
                });
                receiver
            }
        };

        Ok(RenderTicket::Pending { page_index: index, receiver })
    }

    /// Number of renders actually performed (cache misses that rendered)
    pub fn render_count(&self) -> u64 {
        self.render_count.load(Ordering::Relaxed)
    }

    /// Cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached bitmap, keeping page metadata
    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.clear();
        log::debug!("cleared {} cached renders for {:?}", removed, self.path);
        removed
    }

    fn validate(&self, index: u32, max_dimension: u32) -> PdfResult<RenderKey> {
        self.check_index(index)?;
        if max_dimension == 0 {
            return Err(PdfError::InvalidDimension);
        }
        Ok(RenderKey { page_index: index, max_dimension })
    }

    fn check_index(&self, index: u32) -> PdfResult<()> {
        if index >= self.page_count() {
            return Err(PdfError::Index { index, page_count: self.page_count() });
        }
        Ok(())
    }

    /// Serve from the cache, join a running render or become its leader
    fn claim(&self, key: RenderKey) -> Flight {
        let mut in_flight = self.in_flight.lock();
        if let Some(bitmap) = self.cache.get(&key) {
            return Flight::Cached(bitmap);
        }
        match in_flight.entry(key) {
            Entry::Occupied(mut waiting) => {
                let (sender, receiver) = crossbeam_channel::bounded(1);
                waiting.get_mut().push(sender);
                Flight::Wait(receiver)
            }
            Entry::Vacant(slot) => {
                slot.insert(Vec::new());
                Flight::Lead
            }
        }
    }

    /// Render a claimed key, store it and hand the result to every waiter
    fn lead(&self, key: RenderKey) -> RenderResult {
        let generation = self.cache.generation();
        let result = self.rasterize_page(key).map(Arc::new);

        // Stored and released under one lock so a late caller either hits
        // the cache or finds the render still in flight.
        let waiters = {
            let mut in_flight = self.in_flight.lock();
            if let Ok(bitmap) = &result {
                if !self.cache.insert_if_current(key, Arc::clone(bitmap), generation) {
                    log::debug!(
                        "discarding render of page {} that raced a cache clear",
                        key.page_index
                    );
                }
            }
            in_flight.remove(&key).unwrap_or_default()
        };

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    fn rasterize_page(&self, key: RenderKey) -> PdfResult<Bitmap> {
        let media_box = self.media_box(key.page_index)?;
        let (width, height) = fit_within(media_box.size, key.max_dimension);

        let source = PageSource {
            document: &self.document,
            page_id: self.page_ids[key.page_index as usize],
            index: key.page_index,
            origin: media_box.origin,
            size: media_box.size,
        };

        self.render_count.fetch_add(1, Ordering::Relaxed);
        let bitmap = self.rasterizer.rasterize(&source, width, height)?;
        if bitmap.dimensions() != (width, height) {
            return Err(PdfError::render(
                key.page_index,
                format!(
                    "rasterizer produced {}x{}, expected {}x{}",
                    bitmap.width(),
                    bitmap.height(),
                    width,
                    height
                ),
            ));
        }

        Ok(bitmap)
    }

    fn media_box(&self, index: u32) -> PdfResult<MediaBox> {
        self.check_index(index)?;
        let slot = &self.media_boxes[index as usize];
        Ok(*slot.get_or_init(|| self.resolve_media_box(self.page_ids[index as usize])))
    }

    /// Find the page's MediaBox, walking up the page tree for inherited boxes
    fn resolve_media_box(&self, page_id: ObjectId) -> MediaBox {
        let mut current = self.document.get_dictionary(page_id).ok();

        for _ in 0..MAX_TREE_DEPTH {
            let Some(dict) = current else { break };
            if let Some(media_box) = self.parse_media_box(dict) {
                return media_box;
            }
            current = dict
                .get(b"Parent")
                .and_then(Object::as_reference)
                .and_then(|id| self.document.get_dictionary(id))
                .ok();
        }

        log::warn!("page {:?} of {:?} has no MediaBox, assuming Letter", page_id, self.path);
        MediaBox { origin: (0.0, 0.0), size: FALLBACK_SIZE }
    }

    fn parse_media_box(&self, dict: &Dictionary) -> Option<MediaBox> {
        let object = dict.get(b"MediaBox").ok()?;
        let object = match object.as_reference() {
            Ok(id) => self.document.get_object(id).ok()?,
            Err(_) => object,
        };

        let array = object.as_array().ok()?;
        if array.len() != 4 {
            return None;
        }
        let x0 = as_number(&array[0])?;
        let y0 = as_number(&array[1])?;
        let x1 = as_number(&array[2])?;
        let y1 = as_number(&array[3])?;

        let size = PageSize { width: (x1 - x0).abs(), height: (y1 - y0).abs() };
        if size.width <= 0.0 || size.height <= 0.0 {
            return None;
        }
        Some(MediaBox { origin: (x0.min(x1), y0.min(y1)), size })
    }
}

impl MemoryPressureListener for PdfDocument {
    fn did_receive_memory_warning(&self) -> Result<(), ReleaseError> {
        self.clear_cache();
        Ok(())
    }
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("path", &self.path)
            .field("page_count", &self.page_count())
            .field("render_count", &self.render_count())
            .finish()
    }
}
