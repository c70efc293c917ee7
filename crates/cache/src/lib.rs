//! Looseleaf Cache Library
//!
//! In-memory render caches and the process-wide memory pressure signal that
//! tells them to let go.

pub mod pressure;
pub mod render_cache;

pub use pressure::{
    ListenerId, MemoryPressureBroadcaster, MemoryPressureListener, PressureReport, ReleaseError,
    Subscription,
};
pub use render_cache::{CacheStats, RenderCache};
