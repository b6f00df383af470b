//! In-process remote authority.
//!
//! [`InMemoryRemote`] keeps the authoritative boards in memory and applies
//! every call with the same position and patch rules the client uses. It
//! records each call it receives and can be scripted to fail the next
//! calls or to answer after a delay, which is what the tests and the demo
//! binary need from a remote.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use boardsync_proto::board::{Board, Section, Task};
use boardsync_proto::ids::{
    BoardId, ContainerRef, SECTION_PREFIX, SectionId, TASK_PREFIX, TaskId, UserId,
};
use boardsync_proto::intent::{MoveIntent, SectionMoveIntent, TaskPatch};

use super::{BoardRemote, RemoteError};
use crate::{patch, position};

/// A call received by an [`InMemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// A board fetch.
    FetchBoard(BoardId),
    /// A task move.
    MoveTask {
        /// Board the task lives on.
        board: BoardId,
        /// The move as sent.
        intent: MoveIntent,
    },
    /// A section reorder.
    MoveSection {
        /// Board the section lives on.
        board: BoardId,
        /// The reorder as sent.
        intent: SectionMoveIntent,
    },
    /// A partial task update.
    PatchTask {
        /// Board the task lives on.
        board: BoardId,
        /// Patched task.
        task: TaskId,
        /// The patch as sent.
        patch: TaskPatch,
    },
    /// A section rename.
    RenameSection {
        /// Board the section lives on.
        board: BoardId,
        /// Renamed section.
        section: SectionId,
        /// Name as received.
        name: String,
    },
    /// A task creation. `section` is `None` for the unassigned container.
    CreateTask {
        /// Board receiving the task.
        board: BoardId,
        /// Target section.
        section: Option<SectionId>,
        /// Name as received.
        name: String,
    },
    /// A section creation.
    CreateSection {
        /// Board receiving the section.
        board: BoardId,
        /// Name as received.
        name: String,
    },
    /// A task deletion.
    DeleteTask {
        /// Board the task lives on.
        board: BoardId,
        /// Deleted task.
        task: TaskId,
    },
}

impl RemoteCall {
    /// Returns `true` for every call except fetches.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        !matches!(self, Self::FetchBoard(_))
    }
}

#[derive(Default)]
struct State {
    boards: HashMap<BoardId, Board>,
    calls: Vec<RemoteCall>,
    failures: VecDeque<RemoteError>,
    fetch_failures: VecDeque<RemoteError>,
    users: HashMap<UserId, String>,
    latency: Option<Duration>,
}

/// Remote authority backed by in-memory boards.
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl InMemoryRemote {
    /// Creates a remote with no boards.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a remote serving one board.
    #[must_use]
    pub fn with_board(board: Board) -> Self {
        let remote = Self::new();
        remote.insert_board(board);
        remote
    }

    /// Adds or replaces a board.
    pub fn insert_board(&self, board: Board) {
        self.state.lock().boards.insert(board.id.clone(), board);
    }

    /// The authoritative copy of a board.
    #[must_use]
    pub fn board(&self, id: &BoardId) -> Option<Board> {
        self.state.lock().boards.get(id).cloned()
    }

    /// Every call received so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Calls received so far, excluding fetches.
    #[must_use]
    pub fn mutation_calls(&self) -> Vec<RemoteCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// Forgets the recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Makes the next mutation call fail with `error`. Queued errors are
    /// consumed in order, one per call.
    pub fn fail_next(&self, error: RemoteError) {
        self.state.lock().failures.push_back(error);
    }

    /// Makes the next fetch fail with `error`.
    pub fn fail_next_fetch(&self, error: RemoteError) {
        self.state.lock().fetch_failures.push_back(error);
    }

    /// Delays every answer by `latency`, or answers immediately for `None`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Registers the display name reported for a user.
    pub fn set_user_name(&self, id: impl Into<UserId>, name: impl Into<String>) {
        self.state.lock().users.insert(id.into(), name.into());
    }

    fn mint<T: From<String>>(&self, prefix: &str) -> T {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        T::from(format!("{prefix}{n}"))
    }

    /// Records the call, then waits out the latency and pops a scripted
    /// failure if one is queued.
    async fn begin(&self, call: RemoteCall) -> Result<(), RemoteError> {
        let (failure, latency) = {
            let mut state = self.state.lock();
            let failure = if call.is_mutation() {
                state.failures.pop_front()
            } else {
                state.fetch_failures.pop_front()
            };
            tracing::debug!(?call, scripted_failure = failure.is_some(), "remote call");
            state.calls.push(call);
            (failure, state.latency)
        };
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn with_state<R>(
        &self,
        board: &BoardId,
        f: impl FnOnce(&mut Board, &HashMap<UserId, String>) -> Result<R, RemoteError>,
    ) -> Result<R, RemoteError> {
        let mut state = self.state.lock();
        let State { boards, users, .. } = &mut *state;
        let board = boards
            .get_mut(board)
            .ok_or_else(|| RemoteError::NotFound(format!("board {board}")))?;
        f(board, users)
    }
}

fn reject_invalid_name(name: &str) -> Result<(), RemoteError> {
    patch::validate_name(name).map_err(|e| RemoteError::from_status(422, e.to_string()))
}

fn resolve_names(task: &mut Task, users: &HashMap<UserId, String>) {
    for assignee in &mut task.assignees {
        if let Some(name) = users.get(&assignee.id) {
            assignee.display_name.clone_from(name);
        }
    }
}

impl BoardRemote for InMemoryRemote {
    async fn fetch_board(&self, board: &BoardId) -> Result<Board, RemoteError> {
        self.begin(RemoteCall::FetchBoard(board.clone())).await?;
        self.with_state(board, |b, _| Ok(b.clone()))
    }

    async fn move_task(&self, board: &BoardId, intent: &MoveIntent) -> Result<(), RemoteError> {
        self.begin(RemoteCall::MoveTask {
            board: board.clone(),
            intent: intent.clone(),
        })
        .await?;
        self.with_state(board, |b, _| {
            if b.task_index(&intent.subject_id).is_none() {
                return Err(RemoteError::NotFound(format!("task {}", intent.subject_id)));
            }
            if !position::apply_task_move(b, intent) {
                return Err(RemoteError::NotFound(format!(
                    "container {}",
                    intent.target()
                )));
            }
            Ok(())
        })
    }

    async fn move_section(
        &self,
        board: &BoardId,
        intent: &SectionMoveIntent,
    ) -> Result<(), RemoteError> {
        self.begin(RemoteCall::MoveSection {
            board: board.clone(),
            intent: intent.clone(),
        })
        .await?;
        self.with_state(board, |b, _| {
            if position::apply_section_move(b, intent) {
                Ok(())
            } else {
                Err(RemoteError::NotFound(format!("section {}", intent.subject_id)))
            }
        })
    }

    async fn patch_task(
        &self,
        board: &BoardId,
        task: &TaskId,
        patch: &TaskPatch,
    ) -> Result<(), RemoteError> {
        self.begin(RemoteCall::PatchTask {
            board: board.clone(),
            task: task.clone(),
            patch: patch.clone(),
        })
        .await?;
        if let TaskPatch::Rename(name) = patch {
            reject_invalid_name(name)?;
        }
        self.with_state(board, |b, users| {
            let target = b
                .find_task_mut(task)
                .ok_or_else(|| RemoteError::NotFound(format!("task {task}")))?;
            patch::apply(target, patch);
            resolve_names(target, users);
            Ok(())
        })
    }

    async fn rename_section(
        &self,
        board: &BoardId,
        section: &SectionId,
        name: &str,
    ) -> Result<(), RemoteError> {
        self.begin(RemoteCall::RenameSection {
            board: board.clone(),
            section: section.clone(),
            name: name.to_string(),
        })
        .await?;
        reject_invalid_name(name)?;
        self.with_state(board, |b, _| {
            let target = b
                .sections
                .iter_mut()
                .find(|s| s.id == *section)
                .ok_or_else(|| RemoteError::NotFound(format!("section {section}")))?;
            name.trim().clone_into(&mut target.name);
            Ok(())
        })
    }

    async fn create_task(
        &self,
        board: &BoardId,
        section: Option<&SectionId>,
        name: &str,
    ) -> Result<TaskId, RemoteError> {
        self.begin(RemoteCall::CreateTask {
            board: board.clone(),
            section: section.cloned(),
            name: name.to_string(),
        })
        .await?;
        reject_invalid_name(name)?;
        let container = ContainerRef::from_section(section.cloned());
        let id: TaskId = self.mint(TASK_PREFIX);
        self.with_state(board, |b, _| {
            if !b.has_container(&container) {
                return Err(RemoteError::NotFound(format!("container {container}")));
            }
            b.tasks.push(Task::new(id.clone(), name.trim(), container));
            Ok(id)
        })
    }

    async fn create_section(&self, board: &BoardId, name: &str) -> Result<SectionId, RemoteError> {
        self.begin(RemoteCall::CreateSection {
            board: board.clone(),
            name: name.to_string(),
        })
        .await?;
        reject_invalid_name(name)?;
        let id: SectionId = self.mint(SECTION_PREFIX);
        self.with_state(board, |b, _| {
            b.sections.push(Section::new(id.clone(), name.trim()));
            Ok(id)
        })
    }

    async fn delete_task(&self, board: &BoardId, task: &TaskId) -> Result<(), RemoteError> {
        self.begin(RemoteCall::DeleteTask {
            board: board.clone(),
            task: task.clone(),
        })
        .await?;
        self.with_state(board, |b, _| {
            b.remove_task(task)
                .map(|_| ())
                .ok_or_else(|| RemoteError::NotFound(format!("task {task}")))
        })
    }
}

impl std::fmt::Debug for InMemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryRemote")
            .field("boards", &state.boards.len())
            .field("calls", &state.calls.len())
            .finish_non_exhaustive()
    }
}
