//! Stack coordinator
//!
//! [`PaperStack`] owns the notebook's stacks and the navigation state between
//! the stack overview and a single open page. It routes imports into the
//! current stack, runs page exports in the background and relays everything
//! the shell needs to know through its [`StackCollaborator`].
//!
//! While the collaborator reports a tutorial on screen, navigation still
//! happens but the stack-change notifications are withheld.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info, warn};
use looseleaf_cache::{MemoryPressureBroadcaster, PressureReport, Subscription};
use looseleaf_pdf::{PdfDocument, PdfError};

use crate::collaborator::{BezelContainers, StackCollaborator};
use crate::config::StackConfig;
use crate::error::{ExportError, ImportError, StackError};
use crate::export::{ExportEvent, ExportJobHandle, PageExportPipeline};
use crate::import::{self, SourceFormat, StagedImport};
use crate::model::{Page, PageId, StackId};
use crate::stack::Stack;

/// What the stack is currently showing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewMode {
    /// Overview of every page in the current stack
    StackView,
    /// A single page, full screen
    PageView(PageId),
}

/// Report of one navigation change
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: ViewMode,
    pub to: ViewMode,
    pub stack_id: StackId,
    /// Bezel containers the shell reported while the transition ran
    pub containers: BezelContainers,
    /// Stack-change notification withheld because the tutorial is showing
    pub notifications_suppressed: bool,
}

/// A PDF kept open after import so later imports and memory warnings reach it
struct RetainedDocument {
    document: Arc<PdfDocument>,
    _subscription: Subscription,
}

pub struct PaperStack<C: StackCollaborator> {
    collaborator: C,
    config: StackConfig,
    stacks: Vec<Stack>,
    current: usize,
    view: ViewMode,
    broadcaster: MemoryPressureBroadcaster,
    documents: HashMap<PathBuf, RetainedDocument>,
    exporter: PageExportPipeline,
    export_events: Receiver<ExportEvent>,
}

impl<C: StackCollaborator> PaperStack<C> {
    /// Stack attached to the process-wide memory pressure broadcaster
    pub fn new(collaborator: C, config: StackConfig) -> Self {
        let broadcaster = MemoryPressureBroadcaster::init_global().clone();
        Self::with_broadcaster(collaborator, config, broadcaster)
    }

    pub fn with_broadcaster(
        collaborator: C,
        config: StackConfig,
        broadcaster: MemoryPressureBroadcaster,
    ) -> Self {
        let (exporter, export_events) = PageExportPipeline::with_channel();
        let first = Stack::new(config.default_stack_name.clone());

        Self {
            collaborator,
            config,
            stacks: vec![first],
            current: 0,
            view: ViewMode::StackView,
            broadcaster,
            documents: HashMap::new(),
            exporter,
            export_events,
        }
    }

    pub fn collaborator(&self) -> &C {
        &self.collaborator
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn view(&self) -> &ViewMode {
        &self.view
    }

    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    pub fn stack(&self, stack_id: &StackId) -> Option<&Stack> {
        self.stacks.iter().find(|stack| stack.id() == stack_id)
    }

    pub fn current_stack(&self) -> &Stack {
        &self.stacks[self.current]
    }

    /// Page open in page view, if any
    pub fn active_page(&self) -> Option<&Page> {
        match &self.view {
            ViewMode::PageView(page_id) => self.page(page_id),
            ViewMode::StackView => None,
        }
    }

    /// Look a page up in any stack
    pub fn page(&self, page_id: &PageId) -> Option<&Page> {
        self.stacks.iter().find_map(|stack| stack.page(page_id))
    }

    fn contains_page(&self, page_id: &PageId) -> bool {
        self.stacks.iter().any(|stack| stack.contains(page_id))
    }

    fn stack_index(&self, stack_id: &StackId) -> Result<usize, StackError> {
        self.stacks
            .iter()
            .position(|stack| stack.id() == stack_id)
            .ok_or_else(|| StackError::StackNotFound(stack_id.clone()))
    }

    fn stack_index_of_page(&self, page_id: &PageId) -> Result<usize, StackError> {
        self.stacks
            .iter()
            .position(|stack| stack.contains(page_id))
            .ok_or_else(|| StackError::PageNotFound(page_id.clone()))
    }

    // Navigation

    /// Open a page of the current stack
    ///
    /// Returns `None` if the page is already open. Moving from one open page
    /// to another sends no notifications.
    pub fn show_page_view(&mut self, page_id: &PageId) -> Result<Option<Transition>, StackError> {
        if !self.current_stack().contains(page_id) {
            return Err(StackError::PageNotFound(page_id.clone()));
        }

        let target = ViewMode::PageView(page_id.clone());
        match &self.view {
            ViewMode::PageView(active) if active == page_id => return Ok(None),
            ViewMode::PageView(_) => return Ok(Some(self.transition_to(target, false))),
            ViewMode::StackView => {}
        }

        let suppressed = self.collaborator.is_showing_tutorial();
        self.collaborator.animating_to_page_view();
        if suppressed {
            debug!("Tutorial showing, not announcing page view");
        } else {
            let stack_id = self.current_stack().id().clone();
            self.collaborator.will_change_to_page_view(&stack_id);
        }
        Ok(Some(self.transition_to(target, suppressed)))
    }

    /// Return to the stack overview; `None` if already there
    pub fn show_stack_view(&mut self) -> Option<Transition> {
        if self.view == ViewMode::StackView {
            return None;
        }

        let suppressed = self.collaborator.is_showing_tutorial();
        let transition = self.transition_to(ViewMode::StackView, suppressed);
        if suppressed {
            debug!("Tutorial showing, not announcing list view");
        } else {
            self.collaborator.did_change_to_list_view(&transition.stack_id);
        }
        Some(transition)
    }

    fn transition_to(&mut self, to: ViewMode, suppressed: bool) -> Transition {
        let containers = BezelContainers::query(&self.collaborator);
        let from = std::mem::replace(&mut self.view, to.clone());
        debug!("View {:?} -> {:?}", from, to);

        Transition {
            from,
            to,
            stack_id: self.current_stack().id().clone(),
            containers,
            notifications_suppressed: suppressed,
        }
    }

    // Stacks and pages

    pub fn create_stack(&mut self, name: impl Into<String>) -> StackId {
        let stack = Stack::new(name);
        let id = stack.id().clone();
        self.stacks.push(stack);
        id
    }

    /// Make another stack current, closing any open page first
    pub fn switch_to_stack(&mut self, stack_id: &StackId) -> Result<(), StackError> {
        let index = self.stack_index(stack_id)?;
        if index == self.current {
            return Ok(());
        }
        self.show_stack_view();
        self.current = index;
        Ok(())
    }

    /// Append a page to the current stack
    pub fn add_page(&mut self, page: Page) -> Result<(), StackError> {
        if self.contains_page(page.id()) {
            return Err(StackError::DuplicatePage(page.id().clone()));
        }
        self.stacks[self.current].push(page)
    }

    pub fn add_blank_page(&mut self) -> Result<PageId, StackError> {
        let page = Page::blank();
        let id = page.id().clone();
        self.add_page(page)?;
        Ok(id)
    }

    /// Remove a page and its stored assets
    ///
    /// Deleting the open page returns to the stack view first. Any export of
    /// the page is cancelled.
    pub fn delete_page(&mut self, page_id: &PageId) -> Result<Page, StackError> {
        let index = self.stack_index_of_page(page_id)?;
        if self.view == ViewMode::PageView(page_id.clone()) {
            self.show_stack_view();
        }
        self.exporter.cancel_page(page_id);

        let page = self.stacks[index]
            .remove(page_id)
            .ok_or_else(|| StackError::PageNotFound(page_id.clone()))?;

        let dir = self.config.page_dir(page_id);
        if dir.exists() {
            if let Err(err) = fs::remove_dir_all(&dir) {
                warn!("Failed to remove assets of page {}: {}", page_id, err);
            }
        }
        Ok(page)
    }

    /// Reorder a page within its stack
    pub fn move_page(&mut self, page_id: &PageId, to_index: usize) -> Result<(), StackError> {
        let index = self.stack_index_of_page(page_id)?;
        self.stacks[index].move_page(page_id, to_index)
    }

    /// Move a page to the end of another stack
    pub fn move_page_to_stack(&mut self, page_id: &PageId, target: &StackId) -> Result<(), StackError> {
        let to = self.stack_index(target)?;
        let from = self.stack_index_of_page(page_id)?;
        if from == to {
            return Ok(());
        }
        if self.view == ViewMode::PageView(page_id.clone()) {
            self.show_stack_view();
        }

        let page = self.stacks[from]
            .remove(page_id)
            .ok_or_else(|| StackError::PageNotFound(page_id.clone()))?;
        self.stacks[to].push(page)
    }

    // Import

    /// Import a PDF, image or page archive into the current stack
    ///
    /// Either every page of the document is added or none is.
    pub fn import_document(
        &mut self,
        path: impl AsRef<Path>,
        source_application: Option<&str>,
    ) -> Result<Vec<PageId>, ImportError> {
        let path = path.as_ref();
        let format = import::detect_format(path)?;
        let mut staged = StagedImport::default();

        match format {
            SourceFormat::Pdf => {
                let document = self.open_document(path)?;
                import::stage_pdf(&mut staged, &document, &self.config, source_application)?;
            }
            SourceFormat::Image(image_format) => {
                import::stage_image(&mut staged, path, image_format, &self.config, source_application)?;
            }
            SourceFormat::PageArchive => {
                let is_taken = |page_id: &PageId| self.contains_page(page_id);
                import::stage_archive(&mut staged, path, &self.config, &is_taken, source_application)?;
            }
        }

        let pages = staged.take_pages();
        let ids: Vec<PageId> = pages.iter().map(|page| page.id().clone()).collect();
        self.stacks[self.current].extend(pages)?;
        staged.commit();

        info!("Imported {} pages from {:?}", ids.len(), path);
        Ok(ids)
    }

    fn open_document(&mut self, path: &Path) -> Result<Arc<PdfDocument>, PdfError> {
        let key = document_key(path);
        if let Some(retained) = self.documents.get(&key) {
            debug!("Reusing open document {:?}", key);
            return Ok(retained.document.clone());
        }

        let document = Arc::new(PdfDocument::open(path)?);
        let subscription = self.broadcaster.subscribe(&document);
        self.documents.insert(
            key,
            RetainedDocument { document: document.clone(), _subscription: subscription },
        );
        Ok(document)
    }

    /// Number of PDFs kept open by earlier imports
    pub fn open_documents(&self) -> usize {
        self.documents.len()
    }

    pub fn retained_document(&self, path: &Path) -> Option<Arc<PdfDocument>> {
        self.documents.get(&document_key(path)).map(|retained| retained.document.clone())
    }

    /// Stop retaining the PDF opened from `path`; `false` if it was not open
    ///
    /// Pages imported from it keep their rendered backgrounds.
    pub fn close_document(&mut self, path: &Path) -> bool {
        let closed = self.documents.remove(&document_key(path)).is_some();
        if closed {
            debug!("Closed document {:?}", path);
        }
        closed
    }

    /// Drop retained PDFs that no page in any stack was imported from
    fn release_unreferenced_documents(&mut self) -> usize {
        if self.documents.is_empty() {
            return 0;
        }
        let referenced: HashSet<PathBuf> = self
            .stacks
            .iter()
            .flat_map(|stack| stack.pages())
            .filter_map(|page| page.origin.file.as_deref())
            .map(document_key)
            .collect();

        let before = self.documents.len();
        self.documents.retain(|key, _| referenced.contains(key));
        before - self.documents.len()
    }

    // Export

    /// Start exporting a page to an archive at `destination`
    pub fn begin_export(
        &self,
        page_id: &PageId,
        destination: impl Into<PathBuf>,
    ) -> Result<ExportJobHandle, ExportError> {
        let page = self
            .page(page_id)
            .ok_or_else(|| ExportError::PageNotFound(page_id.clone()))?;
        self.exporter.begin_export(page, destination)
    }

    pub fn cancel_export(&self, handle: &ExportJobHandle) -> bool {
        self.exporter.cancel(handle)
    }

    pub fn is_exporting(&self, page_id: &PageId) -> bool {
        self.exporter.is_exporting(page_id)
    }

    pub fn active_exports(&self) -> usize {
        self.exporter.active_exports()
    }

    /// Deliver pending export notifications to the collaborator
    ///
    /// Returns the number of notifications delivered.
    pub fn process_export_events(&self) -> usize {
        let mut delivered = 0;
        for event in self.export_events.try_iter() {
            self.dispatch(event);
            delivered += 1;
        }
        delivered
    }

    /// Like [`process_export_events`](Self::process_export_events), waiting up
    /// to `timeout` for the first notification
    pub fn process_export_events_timeout(&self, timeout: Duration) -> usize {
        match self.export_events.recv_timeout(timeout) {
            Ok(event) => {
                self.dispatch(event);
                1 + self.process_export_events()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn dispatch(&self, event: ExportEvent) {
        match event {
            ExportEvent::Progress { page_id, fraction, archive_path, .. } => {
                self.collaborator.is_exporting_page(&page_id, fraction, &archive_path);
            }
            ExportEvent::Succeeded { page_id, archive_path, .. } => {
                self.collaborator.did_export_page(&page_id, &archive_path);
            }
            ExportEvent::Failed { page_id, error, .. } => {
                self.collaborator.did_fail_to_export_page(&page_id, &error);
            }
        }
    }

    // Memory

    /// Ask every memory pressure listener to release what it can, then close
    /// documents whose pages are all gone
    pub fn handle_memory_warning(&mut self) -> PressureReport {
        let report = self.broadcaster.notify_pressure();
        let closed = self.release_unreferenced_documents();
        info!(
            "Memory warning: {} listeners released, {} failed, {} documents closed",
            report.notified, report.failed, closed
        );
        report
    }

    /// Bring the shell up to date before the app stops receiving events
    ///
    /// Returns the number of export notifications delivered.
    pub fn will_resign_active(&self) -> usize {
        let delivered = self.process_export_events();
        debug!(
            "Resigning active with {} exports running, {} notifications delivered",
            self.active_exports(),
            delivered
        );
        delivered
    }

    /// Release render caches when the app leaves the foreground
    pub fn did_enter_background(&mut self) -> PressureReport {
        debug!("Entered background, releasing caches");
        self.handle_memory_warning()
    }
}

fn document_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
