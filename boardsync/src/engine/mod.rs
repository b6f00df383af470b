//! Optimistic mutation engine.
//!
//! Every user mutation runs the same pipeline against one board key:
//!
//! 1. Snapshot the cached board.
//! 2. Install the optimistically mutated board synchronously, under the
//!    same cache write guard that read the snapshot.
//! 3. Dispatch the remote call.
//! 4. On success, swap a created entity's temporary id for the server id.
//! 5. On failure, install the snapshot verbatim.
//! 6. Always mark the key stale so the refresher refetches it.
//!
//! Rollback restores the whole board, never individual fields. When two
//! pipelines overlap on one key, a failure in the earlier one also wipes
//! the later one's optimistic change until the refetch lands.

pub mod remap;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use boardsync_proto::board::{Board, Section, Task};
use boardsync_proto::ids::{BoardId, ContainerRef, SectionId, TaskId};
use boardsync_proto::intent::{MoveIntent, SectionMoveIntent, TaskPatch};

use crate::cache::{ReplicaCache, Update};
use crate::patch::{self, ValidationError};
use crate::position;
use crate::remote::{BoardRemote, FailureKind, RemoteError};

pub use remap::IdRemap;

/// Retry policy for transient remote failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Number of retries after the first failed attempt.
    pub retries: u32,
    /// Fixed wait between attempts.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Identifier of one pipeline run, unique per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(u64);

impl MutationId {
    /// The raw counter value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// A user mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Move a task, addressed by neighbors.
    MoveTask(MoveIntent),
    /// Move a section, addressed by neighbors.
    MoveSection(SectionMoveIntent),
    /// Change one field of a task or subtask.
    PatchTask {
        /// Target task.
        task: TaskId,
        /// The field change.
        patch: TaskPatch,
    },
    /// Rename a section.
    RenameSection {
        /// Target section.
        section: SectionId,
        /// New name, trimmed before use.
        name: String,
    },
    /// Create a task at the end of a container.
    CreateTask {
        /// Locally minted id the task lives under until confirmed.
        temp_id: TaskId,
        /// Destination section, `None` for the unassigned bucket.
        section: Option<SectionId>,
        /// Task name.
        name: String,
    },
    /// Create a section at the end of the board.
    CreateSection {
        /// Locally minted id the section lives under until confirmed.
        temp_id: SectionId,
        /// Section name.
        name: String,
    },
    /// Delete a task with its subtasks.
    DeleteTask(TaskId),
}

impl Mutation {
    /// A task create with a fresh temporary id.
    pub fn create_task(section: Option<SectionId>, name: impl Into<String>) -> Self {
        Self::CreateTask {
            temp_id: TaskId::temporary(),
            section,
            name: name.into(),
        }
    }

    /// A section create with a fresh temporary id.
    pub fn create_section(name: impl Into<String>) -> Self {
        Self::CreateSection {
            temp_id: SectionId::temporary(),
            name: name.into(),
        }
    }

    /// Short label for logs and events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MoveTask(_) => "move_task",
            Self::MoveSection(_) => "move_section",
            Self::PatchTask { .. } => "patch_task",
            Self::RenameSection { .. } => "rename_section",
            Self::CreateTask { .. } => "create_task",
            Self::CreateSection { .. } => "create_section",
            Self::DeleteTask(_) => "delete_task",
        }
    }

    /// Local checks run before anything is applied.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for empty or oversized names.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::PatchTask {
                patch: TaskPatch::Rename(name),
                ..
            }
            | Self::RenameSection { name, .. }
            | Self::CreateTask { name, .. }
            | Self::CreateSection { name, .. } => patch::validate_name(name),
            _ => Ok(()),
        }
    }

    /// Applies the mutation to a board. Returns `true` if it changed.
    pub fn apply(&self, board: &mut Board) -> bool {
        match self {
            Self::MoveTask(intent) => position::apply_task_move(board, intent),
            Self::MoveSection(intent) => position::apply_section_move(board, intent),
            Self::PatchTask { task, patch } => board
                .find_task_mut(task)
                .is_some_and(|t| patch::apply(t, patch)),
            Self::RenameSection { section, name } => {
                let name = name.trim();
                match board.sections.iter_mut().find(|s| s.id == *section) {
                    Some(s) if s.name != name => {
                        name.clone_into(&mut s.name);
                        true
                    }
                    _ => false,
                }
            }
            Self::CreateTask {
                temp_id,
                section,
                name,
            } => {
                let container = ContainerRef::from_section(section.clone());
                if !board.has_container(&container) {
                    return false;
                }
                board
                    .tasks
                    .push(Task::new(temp_id.clone(), name.trim(), container));
                true
            }
            Self::CreateSection { temp_id, name } => {
                board
                    .sections
                    .push(Section::new(temp_id.clone(), name.trim()));
                true
            }
            Self::DeleteTask(task) => board.remove_task(task).is_some(),
        }
    }

    /// Field edits that change nothing locally are not sent.
    ///
    /// Moves, creates and deletes are always sent: a drag has usually
    /// applied the move to the cache before the pipeline starts.
    #[must_use]
    pub const fn skips_when_unchanged(&self) -> bool {
        matches!(self, Self::PatchTask { .. } | Self::RenameSection { .. })
    }
}

/// How a pipeline run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The key was never fetched; nothing happened.
    NotFetched,
    /// The mutation changed nothing; nothing was sent.
    Unchanged,
    /// The authority accepted the mutation.
    Applied,
    /// A task was created and its temporary id replaced.
    CreatedTask {
        /// The id it was created under locally.
        temp_id: TaskId,
        /// The server-issued id.
        id: TaskId,
    },
    /// A section was created and its temporary id replaced.
    CreatedSection {
        /// The id it was created under locally.
        temp_id: SectionId,
        /// The server-issued id.
        id: SectionId,
    },
}

/// Errors surfaced by [`MutationEngine::execute`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    /// Rejected locally; nothing was applied or sent.
    #[error("invalid mutation: {0}")]
    Validation(#[from] ValidationError),

    /// The authority refused the mutation; it has been rolled back.
    #[error("{kind}: {source}")]
    Remote {
        /// Classification that decided the reaction.
        kind: FailureKind,
        /// The remote error.
        #[source]
        source: RemoteError,
    },

    /// Every attempt failed transiently; the mutation stays rolled back.
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// The last remote error.
        #[source]
        source: RemoteError,
    },
}

impl MutationError {
    /// Remote failure classification, `None` for local validation.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Validation(_) => None,
            Self::Remote { kind, .. } => Some(*kind),
            Self::RetriesExhausted { .. } => Some(FailureKind::Transient),
        }
    }
}

/// Notifications for the hosting shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A mutation was applied locally and is waiting on the authority.
    Pending {
        /// The pipeline run.
        id: MutationId,
        /// Board key.
        board: BoardId,
        /// Mutation label.
        kind: &'static str,
    },
    /// The board was restored to the mutation's snapshot.
    RolledBack {
        /// The pipeline run.
        id: MutationId,
        /// Board key.
        board: BoardId,
        /// What caused the rollback.
        cause: FailureKind,
    },
    /// A transient failure is being retried.
    Retrying {
        /// The pipeline run.
        id: MutationId,
        /// Retry number, starting at 1.
        attempt: u32,
    },
    /// The authority accepted the mutation.
    Settled {
        /// The pipeline run.
        id: MutationId,
        /// Board key.
        board: BoardId,
    },
    /// The mutation failed for good.
    Failed {
        /// The pipeline run.
        id: MutationId,
        /// Board key.
        board: BoardId,
        /// The surfaced error.
        error: MutationError,
    },
    /// The user lost access to the board.
    AccessRevoked {
        /// Board key.
        board: BoardId,
    },
    /// Something the mutation referred to no longer exists.
    ResourceMissing {
        /// Board key.
        board: BoardId,
        /// The authority's description of what is missing.
        detail: String,
    },
}

enum Created {
    Task(TaskId),
    Section(SectionId),
}

/// Runs mutation pipelines against a shared [`ReplicaCache`].
pub struct MutationEngine<R: BoardRemote> {
    cache: Arc<ReplicaCache>,
    remote: Arc<R>,
    retry: RetryConfig,
    remap: Mutex<IdRemap>,
    pending: Mutex<HashMap<MutationId, BoardId>>,
    next_id: AtomicU64,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl<R: BoardRemote> MutationEngine<R> {
    /// Creates an engine and the receiver for its events.
    ///
    /// Events are dropped when the channel is full.
    #[must_use]
    pub fn new(
        cache: Arc<ReplicaCache>,
        remote: Arc<R>,
        retry: RetryConfig,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (event_tx, event_rx) = mpsc::channel(event_buffer.max(1));
        let engine = Self {
            cache,
            remote,
            retry,
            remap: Mutex::new(IdRemap::new()),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            event_tx,
        };
        (engine, event_rx)
    }

    /// The cache this engine writes to.
    #[must_use]
    pub const fn cache(&self) -> &Arc<ReplicaCache> {
        &self.cache
    }

    /// The remote this engine dispatches to.
    #[must_use]
    pub const fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// The retry policy in use.
    #[must_use]
    pub const fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Returns `true` while the run is waiting on the authority.
    #[must_use]
    pub fn is_pending(&self, id: MutationId) -> bool {
        self.pending.lock().contains_key(&id)
    }

    /// Number of runs waiting on the authority.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if any run against `board` is waiting on the
    /// authority.
    #[must_use]
    pub fn has_pending(&self, board: &BoardId) -> bool {
        self.pending.lock().values().any(|b| b == board)
    }

    /// Server id recorded for a temporary task id.
    #[must_use]
    pub fn resolved_task(&self, temp: &TaskId) -> Option<TaskId> {
        self.remap.lock().task(temp).cloned()
    }

    /// Server id recorded for a temporary section id.
    #[must_use]
    pub fn resolved_section(&self, temp: &SectionId) -> Option<SectionId> {
        self.remap.lock().section(temp).cloned()
    }

    /// Runs the full pipeline for one mutation.
    ///
    /// The optimistic board is visible in the cache before this future
    /// first yields.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError`] if the mutation is invalid or the
    /// authority refuses it. In the latter case the board has already
    /// been rolled back when this returns.
    pub async fn execute(
        &self,
        board: &BoardId,
        mutation: Mutation,
    ) -> Result<Outcome, MutationError> {
        self.run(board, mutation, None).await
    }

    /// Like [`execute`](Self::execute), but rolls back to `snapshot`
    /// instead of the board found at the start of the run.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub async fn execute_from(
        &self,
        board: &BoardId,
        mutation: Mutation,
        snapshot: Arc<Board>,
    ) -> Result<Outcome, MutationError> {
        self.run(board, mutation, Some(snapshot)).await
    }

    async fn run(
        &self,
        key: &BoardId,
        mutation: Mutation,
        snapshot: Option<Arc<Board>>,
    ) -> Result<Outcome, MutationError> {
        let mutation = self.remap.lock().resolve(mutation);
        mutation.validate()?;

        // A board placed with `set` alone has never been confirmed.
        let update = if self.cache.is_fetched(key) {
            self.cache.update(key, |board| {
                let mut next = board.clone();
                mutation.apply(&mut next).then_some(next)
            })
        } else {
            Update::Missing
        };
        let (previous, changed) = match update {
            Update::Missing => {
                tracing::debug!(board = %key, kind = mutation.kind(), "board not fetched, ignoring mutation");
                return Ok(Outcome::NotFetched);
            }
            Update::Unchanged(previous) => (previous, false),
            Update::Replaced { previous, .. } => (previous, true),
        };
        if !changed && mutation.skips_when_unchanged() {
            tracing::debug!(board = %key, kind = mutation.kind(), "mutation changes nothing, not sending");
            return Ok(Outcome::Unchanged);
        }
        let snapshot = snapshot.unwrap_or(previous);

        let id = MutationId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.pending.lock().insert(id, key.clone());
        tracing::debug!(board = %key, mutation = %id, kind = mutation.kind(), "applied optimistically");
        let _ = self.event_tx.try_send(EngineEvent::Pending {
            id,
            board: key.clone(),
            kind: mutation.kind(),
        });

        let result = self.dispatch_with_retry(id, key, &mutation, &snapshot).await;
        self.pending.lock().remove(&id);

        let result = match result {
            Ok(created) => {
                let outcome = self.settle(key, &mutation, created);
                tracing::info!(board = %key, mutation = %id, kind = mutation.kind(), "mutation settled");
                let _ = self.event_tx.try_send(EngineEvent::Settled {
                    id,
                    board: key.clone(),
                });
                Ok(outcome)
            }
            Err(e) => {
                let _ = self.event_tx.try_send(EngineEvent::Failed {
                    id,
                    board: key.clone(),
                    error: e.clone(),
                });
                Err(e)
            }
        };

        self.cache.invalidate(key);
        result
    }

    /// Sends the mutation, rolling back on the first failure and retrying
    /// transient ones. A retry that succeeds re-applies the mutation to
    /// the current board.
    async fn dispatch_with_retry(
        &self,
        id: MutationId,
        key: &BoardId,
        mutation: &Mutation,
        snapshot: &Arc<Board>,
    ) -> Result<Option<Created>, MutationError> {
        let mut attempt = 0;
        loop {
            match self.dispatch(key, mutation).await {
                Ok(created) => {
                    if attempt > 0 {
                        self.cache.update(key, |board| {
                            let mut next = board.clone();
                            mutation.apply(&mut next).then_some(next)
                        });
                    }
                    return Ok(created);
                }
                Err(e) => {
                    let kind = e.kind();
                    if attempt == 0 {
                        self.rollback(id, key, snapshot, kind);
                    }
                    if kind.is_retryable() && attempt < self.retry.retries {
                        attempt += 1;
                        tracing::debug!(
                            board = %key,
                            mutation = %id,
                            attempt,
                            max_retries = self.retry.retries,
                            error = %e,
                            "dispatch failed, will retry"
                        );
                        let _ = self.event_tx.try_send(EngineEvent::Retrying { id, attempt });
                        tokio::time::sleep(self.retry.backoff).await;
                        continue;
                    }
                    match kind {
                        FailureKind::Transient => {
                            tracing::warn!(board = %key, mutation = %id, error = %e, "retries exhausted");
                            return Err(MutationError::RetriesExhausted {
                                attempts: attempt + 1,
                                source: e,
                            });
                        }
                        FailureKind::PermissionDenied => {
                            self.signal(EngineEvent::AccessRevoked { board: key.clone() });
                            return Err(MutationError::Remote { kind, source: e });
                        }
                        FailureKind::NotFound => {
                            self.signal(EngineEvent::ResourceMissing {
                                board: key.clone(),
                                detail: e.to_string(),
                            });
                            return Err(MutationError::Remote { kind, source: e });
                        }
                        FailureKind::Rejected => {
                            return Err(MutationError::Remote { kind, source: e });
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(
        &self,
        key: &BoardId,
        mutation: &Mutation,
    ) -> Result<Option<Created>, RemoteError> {
        let remote = &self.remote;
        match mutation {
            Mutation::MoveTask(intent) => remote.move_task(key, intent).await.map(|()| None),
            Mutation::MoveSection(intent) => remote.move_section(key, intent).await.map(|()| None),
            Mutation::PatchTask { task, patch } => {
                remote.patch_task(key, task, patch).await.map(|()| None)
            }
            Mutation::RenameSection { section, name } => remote
                .rename_section(key, section, name.trim())
                .await
                .map(|()| None),
            Mutation::CreateTask { section, name, .. } => remote
                .create_task(key, section.as_ref(), name.trim())
                .await
                .map(|id| Some(Created::Task(id))),
            Mutation::CreateSection { name, .. } => remote
                .create_section(key, name.trim())
                .await
                .map(|id| Some(Created::Section(id))),
            Mutation::DeleteTask(task) => remote.delete_task(key, task).await.map(|()| None),
        }
    }

    fn rollback(&self, id: MutationId, key: &BoardId, snapshot: &Arc<Board>, cause: FailureKind) {
        self.cache.set(key, Arc::clone(snapshot));
        tracing::warn!(board = %key, mutation = %id, %cause, "rolled back to snapshot");
        let _ = self.event_tx.try_send(EngineEvent::RolledBack {
            id,
            board: key.clone(),
            cause,
        });
    }

    /// Sends an event the host must not miss. If the channel is full the
    /// event is delivered from a background task once there is room.
    fn signal(&self, event: EngineEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(?event, "event channel full, delivering signal in background");
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(event).await;
                });
            }
        }
    }

    /// The explicit remap step for creates.
    fn settle(&self, key: &BoardId, mutation: &Mutation, created: Option<Created>) -> Outcome {
        match (mutation, created) {
            (Mutation::CreateTask { temp_id, .. }, Some(Created::Task(id))) => {
                let remapped = {
                    let mut remap = self.remap.lock();
                    remap.record_task(temp_id.clone(), id.clone());
                    remap.len()
                };
                self.cache.update(key, |board| {
                    let mut next = board.clone();
                    remap::swap_task_id(&mut next, temp_id, &id).then_some(next)
                });
                tracing::debug!(board = %key, %temp_id, %id, remapped, "task id remapped");
                Outcome::CreatedTask {
                    temp_id: temp_id.clone(),
                    id,
                }
            }
            (Mutation::CreateSection { temp_id, .. }, Some(Created::Section(id))) => {
                let remapped = {
                    let mut remap = self.remap.lock();
                    remap.record_section(temp_id.clone(), id.clone());
                    remap.len()
                };
                self.cache.update(key, |board| {
                    let mut next = board.clone();
                    remap::swap_section_id(&mut next, temp_id, &id).then_some(next)
                });
                tracing::debug!(board = %key, %temp_id, %id, remapped, "section id remapped");
                Outcome::CreatedSection {
                    temp_id: temp_id.clone(),
                    id,
                }
            }
            _ => Outcome::Applied,
        }
    }
}

impl<R: BoardRemote> fmt::Debug for MutationEngine<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationEngine")
            .field("retry", &self.retry)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}
