//! Drag-and-drop state machine.
//!
//! A drag moves through two states, [`DragState::Idle`] and
//! [`DragState::Dragging`]. Hovering a task over other targets reflows the
//! cached board live, without talking to the remote, so the user sees the
//! final position before letting go. Only [`release`](DragController::release)
//! dispatches, and only when the subject actually ended up somewhere new.
//! Anything that does not resolve to a valid drop target restores the
//! board captured at [`start`](DragController::start).

use std::mem;
use std::sync::Arc;

use boardsync_proto::board::Board;
use boardsync_proto::ids::{BoardId, ContainerRef, IdKind, SectionId, TaskId};
use boardsync_proto::intent::{MoveIntent, SectionMoveIntent};

use crate::cache::Update;
use crate::engine::{Mutation, MutationEngine, MutationError, Outcome};
use crate::position::{self, array_move, compute_neighbors};
use crate::remote::BoardRemote;

/// What is being dragged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DragKind {
    /// A top-level task.
    Task,
    /// A section.
    Section,
}

/// The dragged entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragSubject {
    /// A top-level task.
    Task(TaskId),
    /// A section.
    Section(SectionId),
}

impl DragSubject {
    /// The subject's kind.
    #[must_use]
    pub const fn kind(&self) -> DragKind {
        match self {
            Self::Task(_) => DragKind::Task,
            Self::Section(_) => DragKind::Section,
        }
    }

    /// The subject's raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Task(id) => id.as_str(),
            Self::Section(id) => id.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Origin {
    Task { container: ContainerRef, index: usize },
    Section,
}

/// An active drag.
#[derive(Debug, Clone)]
pub struct DragSession {
    board: BoardId,
    subject: DragSubject,
    snapshot: Arc<Board>,
    origin: Origin,
    over: Option<String>,
}

impl DragSession {
    /// Board key the drag runs against.
    #[must_use]
    pub const fn board(&self) -> &BoardId {
        &self.board
    }

    /// The dragged entity.
    #[must_use]
    pub const fn subject(&self) -> &DragSubject {
        &self.subject
    }

    /// The board as it was when the drag started.
    #[must_use]
    pub const fn snapshot(&self) -> &Arc<Board> {
        &self.snapshot
    }

    /// The last hovered target.
    #[must_use]
    pub fn over(&self) -> Option<&str> {
        self.over.as_deref()
    }
}

/// State of a [`DragController`].
#[derive(Debug, Clone, Default)]
pub enum DragState {
    /// No drag in progress.
    #[default]
    Idle,
    /// A drag is in progress.
    Dragging(DragSession),
}

/// Render-facing summary of the active drag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragPreview {
    /// What is being dragged.
    pub kind: DragKind,
    /// The dragged id.
    pub subject: String,
    /// The target currently hovered.
    pub over: Option<String>,
}

/// How a drop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropOutcome {
    /// A move was sent and accepted.
    Dispatched(Outcome),
    /// The subject ended where it started; nothing was sent.
    NoOp,
    /// No valid target; the start-of-drag board was restored.
    Restored,
}

/// Errors from [`DragController`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DragError {
    /// The board has never been fetched.
    #[error("board {0} is not loaded")]
    NotFetched(BoardId),

    /// The subject id is unknown or does not follow the id convention.
    #[error("unknown drag subject: {0}")]
    UnknownSubject(String),

    /// The subject exists but cannot be dragged (unassigned bucket,
    /// subtask).
    #[error("{0} cannot be dragged")]
    NotDraggable(String),

    /// `start` was called during a drag.
    #[error("a drag is already in progress")]
    AlreadyDragging,

    /// `release` was called without a drag.
    #[error("no drag in progress")]
    NotDragging,

    /// The move was sent and failed; the board is back at its
    /// start-of-drag state.
    #[error(transparent)]
    Mutation(#[from] MutationError),
}

/// Drives drags against the engine's cache.
pub struct DragController<R: BoardRemote> {
    engine: Arc<MutationEngine<R>>,
    state: DragState,
}

impl<R: BoardRemote> DragController<R> {
    /// Creates an idle controller.
    #[must_use]
    pub const fn new(engine: Arc<MutationEngine<R>>) -> Self {
        Self {
            engine,
            state: DragState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &DragState {
        &self.state
    }

    /// The active session, if any.
    #[must_use]
    pub const fn session(&self) -> Option<&DragSession> {
        match &self.state {
            DragState::Dragging(session) => Some(session),
            DragState::Idle => None,
        }
    }

    /// Returns `true` while a drag is in progress.
    #[must_use]
    pub const fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging(_))
    }

    /// Kind, subject and hovered target of the active drag.
    #[must_use]
    pub fn preview(&self) -> Option<DragPreview> {
        self.session().map(|s| DragPreview {
            kind: s.subject.kind(),
            subject: s.subject.as_str().to_string(),
            over: s.over.clone(),
        })
    }

    /// Starts dragging `subject_id`, classified by its id prefix.
    ///
    /// # Errors
    ///
    /// Fails if a drag is already running, the board is not loaded, or the
    /// subject is unknown or not draggable.
    pub fn start(&mut self, board: &BoardId, subject_id: &str) -> Result<DragKind, DragError> {
        if self.is_dragging() {
            return Err(DragError::AlreadyDragging);
        }
        let cache = self.engine.cache();
        let snapshot = cache
            .get(board)
            .filter(|_| cache.is_fetched(board))
            .ok_or_else(|| DragError::NotFetched(board.clone()))?;

        let (subject, origin) = match IdKind::classify(subject_id) {
            Some(IdKind::Task) => {
                let id = TaskId::new(subject_id);
                let Some(task) = snapshot.task(&id) else {
                    return Err(if snapshot.find_task(&id).is_some() {
                        DragError::NotDraggable(subject_id.to_string())
                    } else {
                        DragError::UnknownSubject(subject_id.to_string())
                    });
                };
                let container = task.container.clone();
                let index = index_in_container(&snapshot, &container, &id)
                    .ok_or_else(|| DragError::UnknownSubject(subject_id.to_string()))?;
                (DragSubject::Task(id), Origin::Task { container, index })
            }
            Some(IdKind::Section) => {
                let id = SectionId::new(subject_id);
                if snapshot.section_index(&id).is_none() {
                    return Err(DragError::UnknownSubject(subject_id.to_string()));
                }
                (DragSubject::Section(id), Origin::Section)
            }
            Some(IdKind::Unassigned) => {
                return Err(DragError::NotDraggable(subject_id.to_string()));
            }
            None => return Err(DragError::UnknownSubject(subject_id.to_string())),
        };

        let kind = subject.kind();
        tracing::debug!(board = %board, subject = subject_id, ?kind, "drag started");
        self.state = DragState::Dragging(DragSession {
            board: board.clone(),
            subject,
            snapshot,
            origin,
            over: None,
        });
        Ok(kind)
    }

    /// Hovers the drag over `over_id`.
    ///
    /// For task drags the cached board is reflowed so the subject sits
    /// where it would land. Repeating the last target does nothing. Never
    /// talks to the remote. Returns `true` if the cached board changed.
    pub fn hover(&mut self, over_id: &str) -> bool {
        let DragState::Dragging(session) = &mut self.state else {
            return false;
        };
        if session.over.as_deref() == Some(over_id) {
            return false;
        }
        session.over = Some(over_id.to_string());

        let DragSubject::Task(subject) = &session.subject else {
            return false;
        };
        let changed = matches!(
            self.engine
                .cache()
                .update(&session.board, |board| reflow(board, subject, over_id)),
            Update::Replaced { .. }
        );
        if changed {
            tracing::trace!(subject = %subject, over = over_id, "live reflow");
        }
        changed
    }

    /// Drops the subject on `over_id`, or on nothing.
    ///
    /// Without a resolvable target the start-of-drag board is restored.
    /// If the subject ends where it started the board is restored and
    /// nothing is sent. Otherwise the move is dispatched with neighbor
    /// references read from the live board; a failed dispatch rolls back
    /// to the start-of-drag board.
    ///
    /// # Errors
    ///
    /// Returns [`DragError::NotDragging`] without an active drag and
    /// [`DragError::Mutation`] if the dispatched move failed.
    pub async fn release(&mut self, over_id: Option<&str>) -> Result<DropOutcome, DragError> {
        if let Some(over) = over_id {
            self.hover(over);
        }
        let DragState::Dragging(session) = mem::take(&mut self.state) else {
            return Err(DragError::NotDragging);
        };
        let cache = self.engine.cache();
        let live = cache.get(&session.board);

        let resolution = match (over_id, live) {
            (Some(over), Some(live)) => match (&session.subject, &session.origin) {
                (DragSubject::Task(subject), Origin::Task { container, index }) => {
                    task_drop(&live, subject, over, container, *index)
                }
                (DragSubject::Section(subject), Origin::Section) => {
                    section_drop(&live, subject, over)
                }
                _ => Resolution::Invalid,
            },
            _ => Resolution::Invalid,
        };

        match resolution {
            Resolution::Invalid => {
                cache.set(&session.board, Arc::clone(&session.snapshot));
                tracing::debug!(board = %session.board, subject = session.subject.as_str(), "no drop target, restored");
                Ok(DropOutcome::Restored)
            }
            Resolution::Unchanged => {
                cache.set(&session.board, Arc::clone(&session.snapshot));
                tracing::debug!(board = %session.board, subject = session.subject.as_str(), "dropped in place");
                Ok(DropOutcome::NoOp)
            }
            Resolution::Move(mutation) => {
                let outcome = self
                    .engine
                    .execute_from(&session.board, mutation, session.snapshot)
                    .await?;
                Ok(DropOutcome::Dispatched(outcome))
            }
        }
    }

    /// Abandons the drag and restores the start-of-drag board. Returns
    /// `false` if no drag was running.
    pub fn cancel(&mut self) -> bool {
        let DragState::Dragging(session) = mem::take(&mut self.state) else {
            return false;
        };
        self.engine.cache().set(&session.board, session.snapshot);
        tracing::debug!(board = %session.board, subject = session.subject.as_str(), "drag cancelled");
        true
    }
}

impl<R: BoardRemote> std::fmt::Debug for DragController<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DragController")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

enum Resolution {
    Invalid,
    Unchanged,
    Move(Mutation),
}

fn index_in_container(board: &Board, container: &ContainerRef, id: &TaskId) -> Option<usize> {
    board.tasks_in(container).position(|t| t.id == *id)
}

/// The container a hover or drop target stands for on this board.
fn target_container(board: &Board, subject: &TaskId, over: &str) -> Option<ContainerRef> {
    match IdKind::classify(over)? {
        IdKind::Task => {
            let over = TaskId::new(over);
            if over == *subject {
                return board.container_of(subject).cloned();
            }
            board.container_of(&over).cloned()
        }
        IdKind::Section | IdKind::Unassigned => {
            ContainerRef::from_drop_zone(over).filter(|c| board.has_container(c))
        }
    }
}

/// Live reflow of a hovered task. Returns the new board, or `None` if
/// nothing moves.
fn reflow(board: &Board, subject: &TaskId, over: &str) -> Option<Board> {
    let current = board.container_of(subject)?.clone();
    let target = target_container(board, subject, over)?;
    let mut next = board.clone();

    match IdKind::classify(over)? {
        IdKind::Task => {
            let over = TaskId::new(over);
            if over == *subject {
                return None;
            }
            let (before, after) = if target == current {
                let order = position::container_order(board, &target);
                let from = order.iter().position(|id| id == subject)?;
                let to = order.iter().position(|id| *id == over)?;
                if from < to {
                    (None, Some(&over))
                } else {
                    (Some(&over), None)
                }
            } else {
                (Some(&over), None)
            };
            position::place_task(&mut next, subject, &target, before, after);
        }
        IdKind::Section | IdKind::Unassigned => {
            if target == current {
                return None;
            }
            position::place_task(&mut next, subject, &target, None, None);
        }
    }

    (next != *board).then_some(next)
}

fn task_drop(
    live: &Board,
    subject: &TaskId,
    over: &str,
    origin: &ContainerRef,
    origin_index: usize,
) -> Resolution {
    let Some(target) = target_container(live, subject, over) else {
        return Resolution::Invalid;
    };
    if live.container_of(subject) != Some(&target) {
        return Resolution::Invalid;
    }
    let order = position::container_order(live, &target);
    let Some(index) = order.iter().position(|id| id == subject) else {
        return Resolution::Invalid;
    };
    if target == *origin && index == origin_index {
        return Resolution::Unchanged;
    }
    let neighbors = compute_neighbors(&order, index);
    Resolution::Move(Mutation::MoveTask(MoveIntent {
        subject_id: subject.clone(),
        target_container: target.section_id().cloned(),
        before_id: neighbors.before,
        after_id: neighbors.after,
    }))
}

fn section_drop(live: &Board, subject: &SectionId, over: &str) -> Resolution {
    if IdKind::classify(over) != Some(IdKind::Section) {
        return Resolution::Invalid;
    }
    let mut order = position::section_order(live);
    let (Some(from), Some(to)) = (
        order.iter().position(|id| id == subject),
        order.iter().position(|id| id.as_str() == over),
    ) else {
        return Resolution::Invalid;
    };
    if from == to {
        return Resolution::Unchanged;
    }
    array_move(&mut order, from, to);
    let neighbors = compute_neighbors(&order, to);
    Resolution::Move(Mutation::MoveSection(SectionMoveIntent {
        subject_id: subject.clone(),
        before_id: neighbors.before,
        after_id: neighbors.after,
    }))
}
