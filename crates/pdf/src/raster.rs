//! Page rasterization
//!
//! [`Rasterizer`] is the seam between the document (which owns sizing,
//! caching and bookkeeping) and whatever turns a page into pixels. The
//! built-in [`ContentRasterizer`] interprets the subset of the content stream
//! that imported scans and simple generated documents use: filled rectangles
//! in gray, RGB or CMYK.

use image::{ImageBuffer, Rgba};
use lopdf::content::Operation;
use lopdf::{Document, Object, ObjectId};

use crate::document::PageSize;
use crate::error::{PdfError, PdfResult};

/// RGBA bitmap produced by a render
pub type Bitmap = ImageBuffer<Rgba<u8>, Vec<u8>>;

const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);
const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Everything a rasterizer needs to know about one page
#[derive(Clone, Copy)]
pub struct PageSource<'a> {
    /// Parsed document the page belongs to
    pub document: &'a Document,
    /// Object id of the page dictionary
    pub page_id: ObjectId,
    /// Zero-based page index
    pub index: u32,
    /// Lower-left corner of the media box, in points
    pub origin: (f32, f32),
    /// Intrinsic size in points
    pub size: PageSize,
}

/// Turns a page into a bitmap of an exact pixel size
pub trait Rasterizer: Send + Sync {
    /// Render `page` into a `width` x `height` bitmap.
    ///
    /// Implementations must be deterministic for a given page and size.
    fn rasterize(&self, page: &PageSource<'_>, width: u32, height: u32) -> PdfResult<Bitmap>;
}

/// Default rasterizer built on lopdf's content stream decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentRasterizer;

#[derive(Debug, Clone, Copy)]
struct GraphicsState {
    fill: Rgba<u8>,
}

#[derive(Debug, Clone, Copy)]
struct PathRect {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

impl Rasterizer for ContentRasterizer {
    fn rasterize(&self, page: &PageSource<'_>, width: u32, height: u32) -> PdfResult<Bitmap> {
        let content = page
            .document
            .get_and_decode_page_content(page.page_id)
            .map_err(|e| PdfError::render(page.index, format!("undecodable content: {e}")))?;

        let mut canvas = Canvas::new(page, width, height);
        let mut state = GraphicsState { fill: INK };
        let mut saved: Vec<GraphicsState> = Vec::new();
        let mut path: Vec<PathRect> = Vec::new();

        for op in &content.operations {
            match op.operator.as_str() {
                "q" => saved.push(state),
                "Q" => {
                    if let Some(previous) = saved.pop() {
                        state = previous;
                    }
                }
                "g" => {
                    let gray = channel(number(page.index, op, 0)?);
                    state.fill = Rgba([gray, gray, gray, 255]);
                }
                "rg" => {
                    state.fill = Rgba([
                        channel(number(page.index, op, 0)?),
                        channel(number(page.index, op, 1)?),
                        channel(number(page.index, op, 2)?),
                        255,
                    ]);
                }
                "k" => {
                    let c = number(page.index, op, 0)?;
                    let m = number(page.index, op, 1)?;
                    let y = number(page.index, op, 2)?;
                    let k = number(page.index, op, 3)?;
                    state.fill = Rgba([
                        channel((1.0 - c) * (1.0 - k)),
                        channel((1.0 - m) * (1.0 - k)),
                        channel((1.0 - y) * (1.0 - k)),
                        255,
                    ]);
                }
                "re" => path.push(PathRect {
                    x: number(page.index, op, 0)?,
                    y: number(page.index, op, 1)?,
                    width: number(page.index, op, 2)?,
                    height: number(page.index, op, 3)?,
                }),
                "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => {
                    for rect in path.drain(..) {
                        canvas.fill(rect, state.fill);
                    }
                }
                "n" | "S" | "s" => path.clear(),
                _ => {}
            }
        }

        Ok(canvas.into_bitmap())
    }
}

/// Read operand `slot` of `op` as a number
fn number(index: u32, op: &Operation, slot: usize) -> PdfResult<f32> {
    let operand = op.operands.get(slot).ok_or_else(|| {
        PdfError::render(index, format!("operator '{}' is missing operand {}", op.operator, slot))
    })?;
    as_number(operand).ok_or_else(|| {
        PdfError::render(index, format!("operator '{}' has a non-numeric operand", op.operator))
    })
}

/// Numeric value of an integer or real object
pub(crate) fn as_number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

fn channel(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Bitmap plus the point-to-pixel mapping for one page
struct Canvas {
    bitmap: Bitmap,
    origin: (f32, f32),
    scale_x: f32,
    scale_y: f32,
}

impl Canvas {
    fn new(page: &PageSource<'_>, width: u32, height: u32) -> Self {
        Self {
            bitmap: Bitmap::from_pixel(width, height, PAPER),
            origin: page.origin,
            scale_x: width as f32 / page.size.width,
            scale_y: height as f32 / page.size.height,
        }
    }

    /// Fill a rectangle given in PDF user space (origin bottom-left)
    fn fill(&mut self, rect: PathRect, color: Rgba<u8>) {
        let (width, height) = self.bitmap.dimensions();

        let x0 = (rect.x - self.origin.0) * self.scale_x;
        let x1 = (rect.x + rect.width - self.origin.0) * self.scale_x;
        let y0 = height as f32 - (rect.y - self.origin.1) * self.scale_y;
        let y1 = height as f32 - (rect.y + rect.height - self.origin.1) * self.scale_y;

        let left = x0.min(x1).round().clamp(0.0, width as f32) as u32;
        let right = x0.max(x1).round().clamp(0.0, width as f32) as u32;
        let top = y0.min(y1).round().clamp(0.0, height as f32) as u32;
        let bottom = y0.max(y1).round().clamp(0.0, height as f32) as u32;

        for y in top..bottom {
            for x in left..right {
                self.bitmap.put_pixel(x, y, color);
            }
        }
    }

    fn into_bitmap(self) -> Bitmap {
        self.bitmap
    }
}
