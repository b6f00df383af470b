//! Debounced editing of free-text names.
//!
//! A [`NameEditor`] sits between keystrokes and the engine. Every
//! [`input`](NameEditor::input) updates the displayed draft at once and
//! restarts a quiescence timer; only when the timer runs out is a rename
//! sent. [`commit`](NameEditor::commit) sends right away and
//! [`cancel`](NameEditor::cancel) drops the draft. A timer that fires has
//! already handed its rename to a separate task, so cancelling the editor
//! afterwards never interrupts a call in flight.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use boardsync_proto::board::Board;
use boardsync_proto::ids::{BoardId, SectionId, TaskId};
use boardsync_proto::intent::TaskPatch;

use crate::engine::{Mutation, MutationEngine, MutationError, Outcome};
use crate::patch::{self, ValidationError};
use crate::remote::BoardRemote;

/// The entity whose name is edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditTarget {
    /// A task or subtask.
    Task(TaskId),
    /// A section.
    Section(SectionId),
}

impl EditTarget {
    fn current_name(&self, board: &Board) -> Option<String> {
        match self {
            Self::Task(id) => board.find_task(id).map(|t| t.name.clone()),
            Self::Section(id) => board.section(id).map(|s| s.name.clone()),
        }
    }

    fn rename(&self, name: String) -> Mutation {
        match self {
            Self::Task(id) => Mutation::PatchTask {
                task: id.clone(),
                patch: TaskPatch::Rename(name),
            },
            Self::Section(id) => Mutation::RenameSection {
                section: id.clone(),
                name,
            },
        }
    }
}

/// Errors from [`NameEditor`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    /// The board has never been fetched.
    #[error("board {0} is not loaded")]
    NotFetched(BoardId),

    /// The edited entity is not on the board.
    #[error("nothing to edit: {0:?}")]
    UnknownTarget(EditTarget),

    /// The committed name was invalid; the draft has been reverted.
    #[error("name rejected: {0}")]
    Rejected(#[from] ValidationError),

    /// The rename was sent and failed.
    #[error(transparent)]
    Mutation(#[from] MutationError),
}

#[derive(Debug)]
struct EditState {
    draft: String,
    confirmed: String,
    in_flight: Option<String>,
    scheduled: Option<JoinHandle<()>>,
    /// Bumped whenever the scheduled timer is replaced or dropped.
    generation: u64,
}

impl EditState {
    fn cancel_scheduled(&mut self) {
        self.generation += 1;
        if let Some(handle) = self.scheduled.take() {
            handle.abort();
        }
    }

    /// Claims the draft for sending when the timer of `generation` runs
    /// out. A timer that was superseded after it woke claims nothing and
    /// leaves the newer schedule alone.
    fn claim_due(&mut self, generation: u64) -> Option<String> {
        if generation != self.generation {
            return None;
        }
        self.scheduled = None;
        let name = self.draft.trim().to_string();
        if patch::validate_name(&name).is_err() || !self.needs_send(&name) {
            return None;
        }
        self.in_flight = Some(name.clone());
        Some(name)
    }

    fn needs_send(&self, name: &str) -> bool {
        name != self.confirmed && self.in_flight.as_deref() != Some(name)
    }
}

/// Debounced editor for one task or section name.
///
/// Must be used from within a Tokio runtime.
pub struct NameEditor<R: BoardRemote + 'static> {
    engine: Arc<MutationEngine<R>>,
    board: BoardId,
    target: EditTarget,
    window: Duration,
    state: Arc<Mutex<EditState>>,
}

impl<R: BoardRemote + 'static> NameEditor<R> {
    /// Opens an editor on the current name of `target`.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::NotFetched`] or [`EditError::UnknownTarget`]
    /// when there is no name to start from.
    pub fn open(
        engine: Arc<MutationEngine<R>>,
        board: BoardId,
        target: EditTarget,
        window: Duration,
    ) -> Result<Self, EditError> {
        let cache = engine.cache();
        let snapshot = cache
            .get(&board)
            .filter(|_| cache.is_fetched(&board))
            .ok_or_else(|| EditError::NotFetched(board.clone()))?;
        let name = target
            .current_name(&snapshot)
            .ok_or_else(|| EditError::UnknownTarget(target.clone()))?;
        Ok(Self {
            engine,
            board,
            target,
            window,
            state: Arc::new(Mutex::new(EditState {
                draft: name.clone(),
                confirmed: name,
                in_flight: None,
                scheduled: None,
                generation: 0,
            })),
        })
    }

    /// The value to display: the draft, including unsent keystrokes.
    #[must_use]
    pub fn display(&self) -> String {
        self.state.lock().draft.clone()
    }

    /// The last value the authority accepted.
    #[must_use]
    pub fn confirmed(&self) -> String {
        self.state.lock().confirmed.clone()
    }

    /// Returns `true` while a debounced send is scheduled.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.state
            .lock()
            .scheduled
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Records a keystroke and restarts the quiescence timer.
    pub fn input(&self, text: impl Into<String>) {
        let mut state = self.state.lock();
        state.draft = text.into();
        state.cancel_scheduled();

        let engine = Arc::clone(&self.engine);
        let board = self.board.clone();
        let target = self.target.clone();
        let shared = Arc::clone(&self.state);
        let window = self.window;
        let generation = state.generation;
        state.scheduled = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let Some(name) = shared.lock().claim_due(generation) else {
                return;
            };
            tracing::debug!(board = %board, ?target, "quiescence reached, sending rename");
            tokio::spawn(send(engine, board, target, shared, name));
        }));
    }

    /// Sends the draft now, cancelling any scheduled send.
    ///
    /// Returns `Ok(None)` when the draft already matches what was
    /// confirmed or is being sent.
    ///
    /// # Errors
    ///
    /// An invalid draft is reverted to the confirmed value and reported as
    /// [`EditError::Rejected`]. A failed send is reported as
    /// [`EditError::Mutation`].
    pub async fn commit(&self) -> Result<Option<Outcome>, EditError> {
        let name = {
            let mut state = self.state.lock();
            state.cancel_scheduled();
            let name = state.draft.trim().to_string();
            if let Err(e) = patch::validate_name(&name) {
                state.draft = state.confirmed.clone();
                tracing::debug!(board = %self.board, error = %e, "commit rejected, draft reverted");
                return Err(e.into());
            }
            if !state.needs_send(&name) {
                return Ok(None);
            }
            state.in_flight = Some(name.clone());
            name
        };
        let result = self
            .engine
            .execute(&self.board, self.target.rename(name.clone()))
            .await;
        finish(&self.state, &name, result.is_ok());
        Ok(Some(result?))
    }

    /// Drops the draft and any scheduled send, restoring the confirmed
    /// value.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancel_scheduled();
        state.draft = state.confirmed.clone();
    }
}

impl<R: BoardRemote + 'static> Drop for NameEditor<R> {
    fn drop(&mut self) {
        self.state.lock().cancel_scheduled();
    }
}

impl<R: BoardRemote + 'static> std::fmt::Debug for NameEditor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameEditor")
            .field("board", &self.board)
            .field("target", &self.target)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

async fn send<R: BoardRemote>(
    engine: Arc<MutationEngine<R>>,
    board: BoardId,
    target: EditTarget,
    state: Arc<Mutex<EditState>>,
    name: String,
) {
    let result = engine.execute(&board, target.rename(name.clone())).await;
    if let Err(e) = &result {
        tracing::warn!(board = %board, ?target, error = %e, "debounced rename failed");
    }
    finish(&state, &name, result.is_ok());
}

/// Records the end of a send. On failure a draft still showing the sent
/// value falls back to the confirmed one.
fn finish(state: &Mutex<EditState>, name: &str, ok: bool) {
    let mut state = state.lock();
    if state.in_flight.as_deref() == Some(name) {
        state.in_flight = None;
    }
    if ok {
        name.clone_into(&mut state.confirmed);
    } else if state.draft.trim() == name {
        state.draft = state.confirmed.clone();
    }
}
