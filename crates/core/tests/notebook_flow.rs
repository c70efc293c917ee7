use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::{Rgba, RgbaImage};
use looseleaf_cache::MemoryPressureBroadcaster;
use looseleaf_core::{
    AssetKind, ContainerHandle, ExportError, PageId, PaperStack, StackCollaborator, StackConfig,
    StackId,
};
use looseleaf_pdf::fixtures;

/// Shell that only remembers how exports ended
#[derive(Default)]
struct Shell {
    finished: RefCell<Vec<(PageId, Result<PathBuf, String>)>>,
}

impl StackCollaborator for Shell {
    fn bezel_scrap_container(&self) -> Option<ContainerHandle> {
        None
    }

    fn bezel_pages_container(&self) -> Option<ContainerHandle> {
        None
    }

    fn import_image_sidebar(&self) -> Option<ContainerHandle> {
        None
    }

    fn share_page_sidebar(&self) -> Option<ContainerHandle> {
        None
    }

    fn is_showing_tutorial(&self) -> bool {
        false
    }

    fn animating_to_page_view(&self) {}

    fn will_change_to_page_view(&self, _stack_id: &StackId) {}

    fn did_change_to_list_view(&self, _stack_id: &StackId) {}

    fn is_exporting_page(&self, _page_id: &PageId, _fraction: f64, _archive_path: &Path) {}

    fn did_export_page(&self, page_id: &PageId, archive_path: &Path) {
        self.finished.borrow_mut().push((page_id.clone(), Ok(archive_path.to_path_buf())));
    }

    fn did_fail_to_export_page(&self, page_id: &PageId, error: &ExportError) {
        self.finished.borrow_mut().push((page_id.clone(), Err(error.to_string())));
    }
}

fn notebook(storage: &Path) -> PaperStack<Shell> {
    let config = StackConfig::default()
        .with_storage_dir(storage)
        .with_thumbnail_max_dimension(300);
    PaperStack::with_broadcaster(Shell::default(), config, MemoryPressureBroadcaster::new())
}

fn export_and_wait(stack: &PaperStack<Shell>, page_id: &PageId, destination: &Path) -> PathBuf {
    stack.begin_export(page_id, destination).unwrap();
    for _ in 0..100 {
        stack.process_export_events_timeout(Duration::from_millis(100));
        if let Some((id, outcome)) = stack.collaborator().finished.borrow_mut().pop() {
            assert_eq!(&id, page_id);
            return outcome.unwrap();
        }
    }
    panic!("export did not finish");
}

#[test]
fn pdf_page_survives_export_and_reimport() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("lecture.pdf");
    fixtures::write_sized_pdf(&pdf, &[(300.0, 600.0), (612.0, 792.0)]).unwrap();

    let mut source = notebook(&dir.path().join("source"));
    let ids = source.import_document(&pdf, Some("com.example.browser")).unwrap();
    let original = source.page(&ids[0]).unwrap().clone();

    let background = original.background().unwrap();
    assert_eq!(image::image_dimensions(&background.path).unwrap(), (150, 300));

    let archive = export_and_wait(&source, &ids[0], &dir.path().join("page.zip"));

    let mut target = notebook(&dir.path().join("target"));
    let imported = target.import_document(&archive, None).unwrap();
    assert_eq!(imported, vec![original.id().clone()]);

    let restored = target.page(&imported[0]).unwrap();
    assert_eq!(restored.content, original.content);
    assert_eq!(restored.origin.source_application.as_deref(), Some("com.example.browser"));
    assert_eq!(restored.assets.len(), 1);
    assert_eq!(restored.assets[0].kind, AssetKind::Background);
    assert_eq!(
        fs::read(&restored.assets[0].path).unwrap(),
        fs::read(&background.path).unwrap()
    );
}

#[test]
fn image_import_becomes_single_page() {
    let dir = tempfile::tempdir().unwrap();
    let photo = dir.path().join("whiteboard.png");
    RgbaImage::from_pixel(64, 48, Rgba([200, 200, 200, 255])).save(&photo).unwrap();

    let mut stack = notebook(&dir.path().join("storage"));
    let ids = stack.import_document(&photo, None).unwrap();

    assert_eq!(ids.len(), 1);
    let page = stack.page(&ids[0]).unwrap();
    assert_eq!((page.content.width, page.content.height), (64.0, 48.0));
    assert!(page.background().unwrap().path.starts_with(dir.path().join("storage")));
}

#[test]
fn deleted_page_assets_are_removed() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("doc.pdf");
    fixtures::write_sized_pdf(&pdf, &[(100.0, 100.0)]).unwrap();

    let mut stack = notebook(&dir.path().join("storage"));
    let ids = stack.import_document(&pdf, None).unwrap();
    let background = stack.page(&ids[0]).unwrap().background().unwrap().path.clone();
    assert!(background.exists());

    stack.delete_page(&ids[0]).unwrap();

    assert!(!background.exists());
    assert!(stack.current_stack().is_empty());
}
