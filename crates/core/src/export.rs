//! Background page export
//!
//! Each export runs on its own named worker thread and moves through
//! `2 + asset_count` steps: write the manifest, copy each asset, then finalize
//! the archive. Progress is reported after every step as `done / total`, so it
//! never decreases and reaches exactly 1.0 before the success notification.
//!
//! Cancellation is cooperative. The worker checks its token before every step
//! and before the final rename; once the archive is in place, cancelling has
//! no effect.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use looseleaf_scheduler::{CancellationToken, JobId, JobRegistry};

use crate::archive::{ArchiveWriter, PageManifest};
use crate::error::ExportError;
use crate::model::{Page, PageId};

/// Receives the notifications of every export job
///
/// Per job: zero or more `export_progress` calls, then exactly one of
/// `export_succeeded` or `export_failed`. Calls arrive on the worker thread.
pub trait ExportDelegate: Send + Sync {
    fn export_progress(&self, job: JobId, page_id: &PageId, fraction: f64, archive_path: &Path);
    fn export_succeeded(&self, job: JobId, page_id: &PageId, archive_path: &Path);
    fn export_failed(&self, job: JobId, page_id: &PageId, error: ExportError);
}

/// Export notification as a value, for delivery over a channel
#[derive(Debug)]
pub enum ExportEvent {
    Progress { job: JobId, page_id: PageId, fraction: f64, archive_path: PathBuf },
    Succeeded { job: JobId, page_id: PageId, archive_path: PathBuf },
    Failed { job: JobId, page_id: PageId, error: ExportError },
}

impl ExportEvent {
    pub fn job(&self) -> JobId {
        match self {
            ExportEvent::Progress { job, .. }
            | ExportEvent::Succeeded { job, .. }
            | ExportEvent::Failed { job, .. } => *job,
        }
    }

    pub fn page_id(&self) -> &PageId {
        match self {
            ExportEvent::Progress { page_id, .. }
            | ExportEvent::Succeeded { page_id, .. }
            | ExportEvent::Failed { page_id, .. } => page_id,
        }
    }

    /// Whether this is the last event of its job
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExportEvent::Progress { .. })
    }
}

/// Forwards notifications into a channel; a closed receiver drops them
impl ExportDelegate for Sender<ExportEvent> {
    fn export_progress(&self, job: JobId, page_id: &PageId, fraction: f64, archive_path: &Path) {
        let _ = self.send(ExportEvent::Progress {
            job,
            page_id: page_id.clone(),
            fraction,
            archive_path: archive_path.to_path_buf(),
        });
    }

    fn export_succeeded(&self, job: JobId, page_id: &PageId, archive_path: &Path) {
        let _ = self.send(ExportEvent::Succeeded {
            job,
            page_id: page_id.clone(),
            archive_path: archive_path.to_path_buf(),
        });
    }

    fn export_failed(&self, job: JobId, page_id: &PageId, error: ExportError) {
        let _ = self.send(ExportEvent::Failed { job, page_id: page_id.clone(), error });
    }
}

/// Identifies a started export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJobHandle {
    id: JobId,
    page_id: PageId,
    destination: PathBuf,
}

impl ExportJobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn page_id(&self) -> &PageId {
        &self.page_id
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

/// Runs page exports in the background, at most one per page
///
/// Dropping the pipeline cancels every job still in flight.
pub struct PageExportPipeline {
    registry: Arc<JobRegistry<PageId>>,
    delegate: Arc<dyn ExportDelegate>,
}

impl PageExportPipeline {
    pub fn new(delegate: Arc<dyn ExportDelegate>) -> Self {
        Self { registry: Arc::new(JobRegistry::new()), delegate }
    }

    /// Pipeline whose notifications are delivered as [`ExportEvent`]s
    pub fn with_channel() -> (Self, Receiver<ExportEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self::new(Arc::new(sender)), receiver)
    }

    /// Start exporting a snapshot of `page` to `destination`
    ///
    /// Returns as soon as the worker is running.
    pub fn begin_export(
        &self,
        page: &Page,
        destination: impl Into<PathBuf>,
    ) -> Result<ExportJobHandle, ExportError> {
        let destination = destination.into();
        let ticket = self
            .registry
            .try_register(page.id().clone())
            .map_err(|_| ExportError::AlreadyExporting(page.id().clone()))?;

        let handle = ExportJobHandle {
            id: ticket.id,
            page_id: ticket.key.clone(),
            destination: destination.clone(),
        };
        let job = ExportJob {
            id: ticket.id,
            page: page.clone(),
            destination,
            token: ticket.token,
            registry: self.registry.clone(),
            delegate: self.delegate.clone(),
        };

        thread::Builder::new()
            .name(format!("page-export-{}", handle.id))
            .spawn(move || job.run())
            .map_err(|err| {
                self.registry.finish(handle.id);
                ExportError::Spawn(err)
            })?;

        debug!("Started export {} of page {}", handle.id, handle.page_id);
        Ok(handle)
    }

    /// Request cancellation
    ///
    /// `true` means the job will end with [`ExportError::Cancelled`]. `false`
    /// means it already finished or is past its last cancellation point and
    /// will report its own outcome.
    pub fn cancel(&self, handle: &ExportJobHandle) -> bool {
        self.registry.cancel(handle.id)
    }

    /// Request cancellation of whatever export is running for `page_id`
    pub fn cancel_page(&self, page_id: &PageId) -> bool {
        self.registry.cancel_key(page_id)
    }

    pub fn is_exporting(&self, page_id: &PageId) -> bool {
        self.registry.is_busy(page_id)
    }

    /// Number of jobs that have not yet delivered their terminal notification
    pub fn active_exports(&self) -> usize {
        self.registry.len()
    }
}

impl Drop for PageExportPipeline {
    fn drop(&mut self) {
        let cancelled = self.registry.cancel_all();
        if cancelled > 0 {
            debug!("Cancelled {} in-flight exports", cancelled);
        }
    }
}

struct ExportJob {
    id: JobId,
    page: Page,
    destination: PathBuf,
    token: CancellationToken,
    registry: Arc<JobRegistry<PageId>>,
    delegate: Arc<dyn ExportDelegate>,
}

impl ExportJob {
    fn run(self) {
        let outcome = self.execute();

        // The page is free again before anyone hears the job is over
        self.registry.finish(self.id);

        match outcome {
            Ok(path) => {
                info!("Exported page {} to {:?}", self.page.id(), path);
                self.delegate.export_succeeded(self.id, self.page.id(), &path);
            }
            Err(err) => {
                warn!("Export of page {} failed: {}", self.page.id(), err);
                self.delegate.export_failed(self.id, self.page.id(), err);
            }
        }
    }

    fn execute(&self) -> Result<PathBuf, ExportError> {
        let total = self.page.assets.len() + 2;
        let mut done = 0;

        self.checkpoint()?;
        let mut writer = ArchiveWriter::create(&self.destination)?;
        writer.write_manifest(&PageManifest::for_page(&self.page))?;
        done += 1;
        self.report(done, total);

        for asset in &self.page.assets {
            self.checkpoint()?;
            writer.write_asset(asset)?;
            done += 1;
            self.report(done, total);
        }

        if !self.registry.commit(self.id) {
            return Err(ExportError::Cancelled);
        }
        let path = writer.finish()?;
        self.report(total, total);
        Ok(path)
    }

    fn checkpoint(&self) -> Result<(), ExportError> {
        if self.token.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        Ok(())
    }

    fn report(&self, done: usize, total: usize) {
        let fraction = done as f64 / total as f64;
        debug!("Export {} of page {}: step {}/{}", self.id, self.page.id(), done, total);
        self.delegate.export_progress(self.id, self.page.id(), fraction, &self.destination);
    }
}
