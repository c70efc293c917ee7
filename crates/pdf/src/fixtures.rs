//! Small generated PDFs for tests
//!
//! Enabled for this crate's own tests and, through the `fixtures` feature,
//! for dependent crates' tests.

use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

/// One page of a generated document
#[derive(Debug, Clone)]
pub struct FixturePage {
    pub width: f32,
    pub height: f32,
    pub operations: Vec<Operation>,
}

impl FixturePage {
    /// A page with an empty content stream
    pub fn blank(width: f32, height: f32) -> Self {
        Self { width, height, operations: Vec::new() }
    }

    /// A page with a black square in its lower-left quarter
    pub fn marked(width: f32, height: f32) -> Self {
        Self::blank(width, height).with_operations(vec![
            Operation::new("g", vec![Object::Integer(0)]),
            Operation::new(
                "re",
                vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(width / 2.0),
                    Object::Real(height / 2.0),
                ],
            ),
            Operation::new("f", vec![]),
        ])
    }

    /// Replace the content stream
    pub fn with_operations(mut self, operations: Vec<Operation>) -> Self {
        self.operations = operations;
        self
    }
}

/// Serialize a document with the given pages
pub fn pdf_bytes(pages: &[FixturePage]) -> Vec<u8> {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();

    let mut kids = Vec::with_capacity(pages.len());
    for page in pages {
        let content = Content { operations: page.operations.clone() };
        let encoded = content.encode().unwrap_or_default();
        let content_id = document.add_object(Stream::new(dictionary! {}, encoded));

        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "Contents" => Object::Reference(content_id),
            "MediaBox" => Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(page.width),
                Object::Real(page.height),
            ]),
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => Object::Array(kids),
            "Count" => Object::Integer(count),
        }),
    );

    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    document.trailer.set("Root", Object::Reference(catalog_id));

    let mut bytes = Vec::new();
    document.save_to(&mut bytes).expect("in-memory PDF write cannot fail");
    bytes
}

/// Write a document with the given pages to `path`
pub fn write_pdf(path: &Path, pages: &[FixturePage]) -> std::io::Result<()> {
    std::fs::write(path, pdf_bytes(pages))
}

/// Write a document whose pages have the given sizes, each marked
pub fn write_sized_pdf(path: &Path, sizes: &[(f32, f32)]) -> std::io::Result<()> {
    let pages: Vec<FixturePage> = sizes.iter().map(|&(w, h)| FixturePage::marked(w, h)).collect();
    write_pdf(path, &pages)
}
