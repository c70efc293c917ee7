//! Interface to the UI shell that hosts a [`PaperStack`](crate::PaperStack)

use std::path::Path;

use crate::error::ExportError;
use crate::model::{PageId, StackId};

/// Opaque reference to a view container owned by the shell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerHandle(pub u64);

/// The bezel containers present at the time of a transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BezelContainers {
    pub scraps: Option<ContainerHandle>,
    pub pages: Option<ContainerHandle>,
    pub image_import: Option<ContainerHandle>,
    pub share: Option<ContainerHandle>,
}

impl BezelContainers {
    pub fn query<C: StackCollaborator + ?Sized>(collaborator: &C) -> Self {
        Self {
            scraps: collaborator.bezel_scrap_container(),
            pages: collaborator.bezel_pages_container(),
            image_import: collaborator.import_image_sidebar(),
            share: collaborator.share_page_sidebar(),
        }
    }
}

/// Callbacks and queries a [`PaperStack`](crate::PaperStack) needs from its host
///
/// All methods are called on the thread that drives the stack.
pub trait StackCollaborator {
    fn bezel_scrap_container(&self) -> Option<ContainerHandle>;
    fn bezel_pages_container(&self) -> Option<ContainerHandle>;
    fn import_image_sidebar(&self) -> Option<ContainerHandle>;
    fn share_page_sidebar(&self) -> Option<ContainerHandle>;

    /// While true, stack-change notifications are withheld
    fn is_showing_tutorial(&self) -> bool;

    fn animating_to_page_view(&self);
    fn will_change_to_page_view(&self, stack_id: &StackId);
    fn did_change_to_list_view(&self, stack_id: &StackId);

    fn is_exporting_page(&self, page_id: &PageId, fraction: f64, archive_path: &Path);
    fn did_export_page(&self, page_id: &PageId, archive_path: &Path);
    fn did_fail_to_export_page(&self, page_id: &PageId, error: &ExportError);
}
