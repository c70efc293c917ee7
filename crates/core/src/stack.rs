//! Ordered collection of pages
//!
//! A page's position in `pages` is its membership index, so the indices are
//! always contiguous. A page id appears at most once per stack; keeping it
//! unique across stacks is the owner's job.

use crate::error::StackError;
use crate::model::{Page, PageId, StackId};

#[derive(Debug, Clone)]
pub struct Stack {
    id: StackId,
    name: String,
    pages: Vec<Page>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: StackId::generate(), name: name.into(), pages: Vec::new() }
    }

    pub fn id(&self) -> &StackId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn contains(&self, page_id: &PageId) -> bool {
        self.index_of(page_id).is_some()
    }

    /// Membership index of a page
    pub fn index_of(&self, page_id: &PageId) -> Option<usize> {
        self.pages.iter().position(|page| page.id() == page_id)
    }

    pub fn page(&self, page_id: &PageId) -> Option<&Page> {
        self.pages.iter().find(|page| page.id() == page_id)
    }

    /// Append a page
    pub fn push(&mut self, page: Page) -> Result<(), StackError> {
        let len = self.pages.len();
        self.insert(len, page)
    }

    /// Insert a page at `index`, shifting later pages back
    pub fn insert(&mut self, index: usize, page: Page) -> Result<(), StackError> {
        if self.contains(page.id()) {
            return Err(StackError::DuplicatePage(page.id().clone()));
        }
        if index > self.pages.len() {
            return Err(StackError::PositionOutOfRange { index, len: self.pages.len() });
        }
        self.pages.insert(index, page);
        Ok(())
    }

    /// Append several pages, or none of them
    pub fn extend(&mut self, pages: Vec<Page>) -> Result<(), StackError> {
        for (i, page) in pages.iter().enumerate() {
            let repeated = pages[..i].iter().any(|earlier| earlier.id() == page.id());
            if repeated || self.contains(page.id()) {
                return Err(StackError::DuplicatePage(page.id().clone()));
            }
        }
        self.pages.extend(pages);
        Ok(())
    }

    /// Remove a page, closing the gap it leaves
    pub fn remove(&mut self, page_id: &PageId) -> Option<Page> {
        let index = self.index_of(page_id)?;
        Some(self.pages.remove(index))
    }

    /// Move a page so that it ends up at `to_index`
    pub fn move_page(&mut self, page_id: &PageId, to_index: usize) -> Result<(), StackError> {
        let from = self
            .index_of(page_id)
            .ok_or_else(|| StackError::PageNotFound(page_id.clone()))?;
        if to_index >= self.pages.len() {
            return Err(StackError::PositionOutOfRange { index: to_index, len: self.pages.len() });
        }
        let page = self.pages.remove(from);
        self.pages.insert(to_index, page);
        Ok(())
    }
}
