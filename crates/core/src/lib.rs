//! Notebook core: pages, stacks, import and export
//!
//! [`PaperStack`] is the coordinator a UI shell talks to. It owns the page
//! stacks, imports PDFs, images and page archives, drives background page
//! exports through [`PageExportPipeline`] and reports navigation and export
//! progress back through a [`StackCollaborator`] supplied by the shell.

pub mod archive;
pub mod collaborator;
pub mod config;
pub mod error;
pub mod export;
pub mod import;
pub mod model;
pub mod paper_stack;
pub mod stack;

pub use archive::{read_page_archive, PageManifest};
pub use collaborator::{BezelContainers, ContainerHandle, StackCollaborator};
pub use config::StackConfig;
pub use error::{ArchiveError, ConfigError, ExportError, ImportError, StackError};
pub use export::{ExportDelegate, ExportEvent, ExportJobHandle, PageExportPipeline};
pub use import::{detect_format, SourceFormat};
pub use model::{Asset, AssetKind, Page, PageContent, PageId, PageOrigin, Point, StackId, Stroke};
pub use paper_stack::{PaperStack, Transition, ViewMode};
pub use stack::Stack;
