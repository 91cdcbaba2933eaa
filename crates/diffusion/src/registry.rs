//! Pending-job table: job id to one-shot completion callback.
//!
//! Owned by a single [`EventStream`](crate::EventStream); every mutation goes
//! through `&mut self`, so no locking is needed.

use std::collections::HashMap;
use std::fmt;

use easel_ipc::JobId;
use tracing::debug;

/// Final result of a watched job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub success: bool,
    /// Diagnostic text, empty on plain success
    pub detail: String,
}

impl JobOutcome {
    pub fn succeeded(job_id: JobId) -> Self {
        Self {
            job_id,
            success: true,
            detail: String::new(),
        }
    }

    pub fn failed(job_id: JobId, detail: impl Into<String>) -> Self {
        Self {
            job_id,
            success: false,
            detail: detail.into(),
        }
    }
}

/// One-shot completion callback
pub type CompletionCallback = Box<dyn FnOnce(JobOutcome) + Send>;

/// Which frames count as job completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionPolicy {
    /// A `status` frame with an empty queue completes every pending job,
    /// in addition to per-job frames
    #[default]
    QueueDrain,
    /// Only per-job frames complete a job
    JobEventsOnly,
}

impl From<easel_config::CompletionMode> for CompletionPolicy {
    fn from(mode: easel_config::CompletionMode) -> Self {
        match mode {
            easel_config::CompletionMode::QueueDrain => Self::QueueDrain,
            easel_config::CompletionMode::JobEvents => Self::JobEventsOnly,
        }
    }
}

/// Map of job id to pending completion callback.
#[derive(Default)]
pub struct CompletionRegistry {
    pending: HashMap<JobId, CompletionCallback>,
}

impl fmt::Debug for CompletionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionRegistry")
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback, replacing any earlier one for the same job.
    ///
    /// Returns `true` if an earlier registration was replaced.
    pub fn watch(&mut self, job_id: JobId, callback: CompletionCallback) -> bool {
        let replaced = self.pending.insert(job_id.clone(), callback).is_some();
        if replaced {
            debug!("Replaced completion callback for job {}", job_id);
        }
        replaced
    }

    /// Remove a registration without invoking it.
    pub fn unwatch(&mut self, job_id: &JobId) -> bool {
        self.pending.remove(job_id).is_some()
    }

    /// Invoke and remove the callback for one job.
    ///
    /// Returns `false` if the job was not registered.
    pub fn complete(&mut self, outcome: JobOutcome) -> bool {
        match self.pending.remove(&outcome.job_id) {
            Some(callback) => {
                callback(outcome);
                true
            }
            None => false,
        }
    }

    /// Invoke and remove every pending callback with success.
    ///
    /// Returns the number of callbacks invoked.
    pub fn complete_all(&mut self) -> usize {
        let drained: Vec<_> = self.pending.drain().collect();
        let count = drained.len();
        for (job_id, callback) in drained {
            callback(JobOutcome::succeeded(job_id));
        }
        count
    }

    /// Drop every pending callback without invoking it.
    ///
    /// Returns the number of registrations discarded.
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.pending.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
