//! Keyed job registry
//!
//! Associates a key (for example a page id) with at most one active job and
//! the job's cancellation token. Registration for a busy key fails instead of
//! queueing.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use parking_lot::Mutex;

use crate::CancellationToken;

/// Unique job identifier
pub type JobId = u64;

/// Handed to the caller that successfully registered a job
#[derive(Debug, Clone)]
pub struct JobTicket<K> {
    /// Id allocated for the job
    pub id: JobId,
    /// Key the job is registered under
    pub key: K,
    /// Token the worker should poll at its checkpoints
    pub token: CancellationToken,
}

/// Returned when a key already has a job in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBusy(pub JobId);

impl fmt::Display for KeyBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {} is already active for this key", self.0)
    }
}

impl std::error::Error for KeyBusy {}

struct ActiveJob<K> {
    key: K,
    token: CancellationToken,
    /// Past the point where a cancel can still take effect
    committed: bool,
}

struct RegistryState<K> {
    next_id: JobId,
    by_key: HashMap<K, JobId>,
    jobs: HashMap<JobId, ActiveJob<K>>,
}

/// Registry of active jobs, at most one per key
pub struct JobRegistry<K> {
    state: Mutex<RegistryState<K>>,
}

impl<K> JobRegistry<K>
where
    K: Hash + Eq + Clone,
{
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                next_id: 1,
                by_key: HashMap::new(),
                jobs: HashMap::new(),
            }),
        }
    }

    /// Register a job for `key`
    ///
    /// Fails with the id of the active job when `key` is already busy.
    pub fn try_register(&self, key: K) -> Result<JobTicket<K>, KeyBusy> {
        let mut state = self.state.lock();
        if let Some(&existing) = state.by_key.get(&key) {
            return Err(KeyBusy(existing));
        }

        let id = state.next_id;
        state.next_id += 1;

        let token = CancellationToken::new();
        state.by_key.insert(key.clone(), id);
        state.jobs.insert(
            id,
            ActiveJob { key: key.clone(), token: token.clone(), committed: false },
        );

        Ok(JobTicket { id, key, token })
    }

    /// Cancel a job by id
    ///
    /// Returns `false` when the job is unknown, already finished or
    /// committed. A `true` return means the job will observe the cancel.
    pub fn cancel(&self, id: JobId) -> bool {
        let state = self.state.lock();
        state.jobs.get(&id).is_some_and(signal)
    }

    /// Cancel whatever job is active for `key`
    pub fn cancel_key(&self, key: &K) -> bool {
        let state = self.state.lock();
        let Some(id) = state.by_key.get(key) else {
            return false;
        };
        state.jobs.get(id).is_some_and(signal)
    }

    /// Cancel every active job, returning how many were signalled
    pub fn cancel_all(&self) -> usize {
        let state = self.state.lock();
        state.jobs.values().filter(|&job| signal(job)).count()
    }

    /// Mark a job as past its last cancellation point
    ///
    /// Returns `false` if the job was cancelled first (or is unknown), in
    /// which case the worker must abandon its work. Once this returns `true`
    /// every later cancel request for the job returns `false`.
    pub fn commit(&self, id: JobId) -> bool {
        let mut state = self.state.lock();
        match state.jobs.get_mut(&id) {
            Some(job) if !job.token.is_cancelled() => {
                job.committed = true;
                true
            }
            _ => false,
        }
    }

    /// Remove a finished job, freeing its key
    pub fn finish(&self, id: JobId) -> bool {
        let mut state = self.state.lock();
        match state.jobs.remove(&id) {
            Some(job) => {
                state.by_key.remove(&job.key);
                true
            }
            None => false,
        }
    }

    /// Whether `key` has a job in flight
    pub fn is_busy(&self, key: &K) -> bool {
        self.state.lock().by_key.contains_key(key)
    }

    /// Number of active jobs
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Whether no job is active
    pub fn is_empty(&self) -> bool {
        self.state.lock().jobs.is_empty()
    }
}

fn signal<K>(job: &ActiveJob<K>) -> bool {
    if job.committed {
        return false;
    }
    job.token.cancel();
    true
}

impl<K> Default for JobRegistry<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
