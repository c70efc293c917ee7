//! Looseleaf Scheduler Library
//!
//! Cooperative cancellation and keyed job tracking for background work.
//!
//! Long-running jobs (page exports, document imports) are registered under a
//! key so that at most one job per key is in flight. Each job receives a
//! [`CancellationToken`] that it checks at its own checkpoints.
//!
//! # Example
//!
//! ```
//! use looseleaf_scheduler::JobRegistry;
//!
//! let registry: JobRegistry<String> = JobRegistry::new();
//!
//! let job = registry.try_register("page-1".to_string()).unwrap();
//! assert!(registry.try_register("page-1".to_string()).is_err());
//!
//! // Another thread asks the job to stop; the worker notices at its next checkpoint.
//! registry.cancel(job.id);
//! assert!(job.token.is_cancelled());
//!
//! registry.finish(job.id);
//! assert!(registry.try_register("page-1".to_string()).is_ok());
//! ```

mod cancel;
mod registry;

pub use cancel::CancellationToken;
pub use registry::{JobId, JobRegistry, JobTicket, KeyBusy};
