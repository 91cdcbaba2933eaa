//! Event-channel handler.
//!
//! [`EventStream`] owns one socket to the server's `/ws` endpoint and the
//! [`CompletionRegistry`] of jobs waiting on it. Frames are dispatched by
//! their `type` field:
//!
//! | frame | effect |
//! |-------|--------|
//! | `status` with `queue_remaining == 0` | complete every pending job (`QueueDrain` only) |
//! | `executed`, `execution_cached` | complete that job with success |
//! | `execution_error` | complete that job with failure |
//! | anything else, or unparsable | ignored |
//!
//! The socket task forwards frames through a channel; nothing is dispatched
//! until the owner calls [`EventStream::poll`] (frame-driven hosts) or
//! [`EventStream::next_edge`] (async hosts). A job registered with
//! [`EventStream::watch`] before the owner pumps again can therefore never
//! miss its own completion frame.
//!
//! There is no reconnect: after an error or close the state is
//! `Disconnected` and the caller has to `connect` again. Pending watches
//! survive a drop but are discarded silently by [`EventStream::disconnect`].

use easel_ipc::{JobId, ServerMessage};
use tracing::{debug, error, info, warn};

use crate::DiffusionError;
use crate::connection::{Connection, StreamEdge};
use crate::registry::{CompletionPolicy, CompletionRegistry, JobOutcome};

/// Lifecycle of the event-channel socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Event-channel connection plus the jobs waiting on it.
#[derive(Default)]
pub struct EventStream {
    state: ConnectionState,
    policy: CompletionPolicy,
    registry: CompletionRegistry,
    connection: Option<Connection>,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("state", &self.state)
            .field("policy", &self.policy)
            .field("registry", &self.registry)
            .finish()
    }
}

impl EventStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: CompletionPolicy) -> Self {
        let mut stream = Self::default();
        stream.policy = policy;
        stream
    }

    pub fn policy(&self) -> CompletionPolicy {
        self.policy
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Open the socket unless one is already open or opening.
    ///
    /// Returns immediately; the `Opened` edge arrives through `poll` /
    /// `next_edge`. Must be called from within a tokio runtime.
    pub fn connect(&mut self, url: &str) -> Result<(), DiffusionError> {
        if self.state != ConnectionState::Disconnected {
            debug!("Event channel already {:?}, ignoring connect", self.state);
            return Ok(());
        }

        info!("Connecting to event channel {}", url);
        self.connection = Some(Connection::open(url)?);
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    /// Register a completion callback for a job, replacing any earlier one.
    pub fn watch<F>(&mut self, job_id: impl Into<JobId>, callback: F)
    where
        F: FnOnce(JobOutcome) + Send + 'static,
    {
        let job_id = job_id.into();
        info!("Watching job {}", job_id);
        self.registry.watch(job_id, Box::new(callback));
    }

    /// Stop watching a job without notifying it.
    pub fn unwatch(&mut self, job_id: &JobId) -> bool {
        self.registry.unwatch(job_id)
    }

    pub fn is_watching(&self, job_id: &JobId) -> bool {
        self.registry.contains(job_id)
    }

    /// Number of jobs still waiting for completion
    pub fn pending(&self) -> usize {
        self.registry.len()
    }

    /// Handle every edge already buffered by the socket task.
    ///
    /// Returns the number of edges handled. Never waits.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(edge) = self.connection.as_mut().and_then(Connection::try_next) {
            self.handle_edge(edge);
            handled += 1;
        }
        handled
    }

    /// Wait for the next edge and handle it.
    ///
    /// Returns `false` when there is no socket to wait on.
    pub async fn next_edge(&mut self) -> bool {
        let Some(connection) = self.connection.as_mut() else {
            return false;
        };

        match connection.next().await {
            Some(edge) => {
                self.handle_edge(edge);
                true
            }
            None => {
                self.mark_disconnected();
                false
            }
        }
    }

    /// Apply one socket edge.
    ///
    /// Hosts that own their own socket can feed edges here directly.
    /// Returns the number of completion callbacks invoked.
    pub fn handle_edge(&mut self, edge: StreamEdge) -> usize {
        match edge {
            StreamEdge::Opened => {
                info!("Event channel connected");
                self.state = ConnectionState::Connected;
                0
            }
            StreamEdge::Message(text) => self.dispatch(&text),
            StreamEdge::Error(err) => {
                error!("Event channel error: {}", err);
                self.mark_disconnected();
                0
            }
            StreamEdge::Closed { code, reason } => {
                warn!("Event channel closed (code: {:?}, reason: '{}')", code, reason);
                self.mark_disconnected();
                0
            }
        }
    }

    /// Dispatch one text frame.
    ///
    /// Returns the number of completion callbacks invoked.
    pub fn dispatch(&mut self, text: &str) -> usize {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring event frame: {}", e);
                return 0;
            }
        };

        match message {
            ServerMessage::Status { queue_remaining } => {
                debug!("Queue remaining: {}", queue_remaining);
                if self.policy == CompletionPolicy::QueueDrain
                    && queue_remaining == 0
                    && !self.registry.is_empty()
                {
                    info!("Queue drained, completing {} pending jobs", self.registry.len());
                    self.registry.complete_all()
                } else {
                    0
                }
            }
            ServerMessage::Executed { prompt_id } | ServerMessage::ExecutionCached { prompt_id } => {
                self.complete(JobOutcome::succeeded(prompt_id))
            }
            ServerMessage::ExecutionError {
                prompt_id,
                message,
                node_type,
            } => {
                let detail = match (node_type, message) {
                    (Some(node), Some(message)) => format!("{node}: {message}"),
                    (None, Some(message)) => message,
                    (Some(node), None) => format!("{node} failed"),
                    (None, None) => "execution error".to_string(),
                };
                self.complete(JobOutcome::failed(prompt_id, detail))
            }
            ServerMessage::Other(kind) => {
                debug!("Ignoring '{}' frame", kind);
                0
            }
        }
    }

    fn complete(&mut self, outcome: JobOutcome) -> usize {
        let job_id = outcome.job_id.clone();
        let success = outcome.success;
        if self.registry.complete(outcome) {
            info!("Job {} finished (success: {})", job_id, success);
            1
        } else {
            0
        }
    }

    fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.connection = None;
    }

    /// Close the socket and drop every pending watch without notifying it.
    pub fn disconnect(&mut self) {
        if self.connection.is_some() {
            info!("Disconnecting event channel");
        }
        self.mark_disconnected();

        let dropped = self.registry.clear();
        if dropped > 0 {
            warn!("Dropped {} pending watches on disconnect", dropped);
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.disconnect();
    }
}
