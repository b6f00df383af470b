//! Conversion between ordered-list indices and neighbor references.
//!
//! The remote authority never sees absolute indices. A position is
//! described by the item right after it (`before`) and the item right
//! before it (`after`). [`compute_neighbors`] produces that pair for an
//! index and [`compute_insert_index`] turns it back into an index,
//! tolerating references to items that have since disappeared.
//!
//! The board-level helpers ([`place_task`], [`apply_task_move`],
//! [`apply_section_move`]) apply those addresses to a [`Board`], where a
//! container's order is the relative order of its tasks in the flat list.

use std::borrow::Borrow;

use boardsync_proto::board::Board;
use boardsync_proto::ids::{ContainerRef, SectionId, TaskId};
use boardsync_proto::intent::{MoveIntent, SectionMoveIntent};

/// Neighbor references of a position in an ordered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbors<T> {
    /// The element right after the position, `None` at the end.
    pub before: Option<T>,
    /// The element right before the position, `None` at the start.
    pub after: Option<T>,
}

/// Resolves neighbor references to an insertion index.
///
/// `before` wins when it resolves; otherwise the slot right after `after`;
/// otherwise the end of the list.
#[must_use]
pub fn compute_insert_index<T, Q>(ordered: &[T], before: Option<&Q>, after: Option<&Q>) -> usize
where
    T: Borrow<Q>,
    Q: PartialEq + ?Sized,
{
    if let Some(idx) = before.and_then(|b| ordered.iter().position(|x| x.borrow() == b)) {
        return idx;
    }
    if let Some(idx) = after.and_then(|a| ordered.iter().position(|x| x.borrow() == a)) {
        return idx + 1;
    }
    ordered.len()
}

/// Computes the neighbor references of the element at `subject_index`.
#[must_use]
pub fn compute_neighbors<T: Clone>(ordered: &[T], subject_index: usize) -> Neighbors<T> {
    let after = subject_index
        .checked_sub(1)
        .and_then(|i| ordered.get(i))
        .cloned();
    let before = ordered.get(subject_index + 1).cloned();
    Neighbors { before, after }
}

/// Moves the element at `from` to `to` (remove, then reinsert).
///
/// `to` is clamped to the list length; an out-of-range `from` is ignored.
pub fn array_move<T>(list: &mut Vec<T>, from: usize, to: usize) {
    if from >= list.len() {
        return;
    }
    let item = list.remove(from);
    let to = to.min(list.len());
    list.insert(to, item);
}

/// Ordered ids of the top-level tasks in one container.
#[must_use]
pub fn container_order(board: &Board, container: &ContainerRef) -> Vec<TaskId> {
    board.tasks_in(container).map(|t| t.id.clone()).collect()
}

/// Ordered section ids.
#[must_use]
pub fn section_order(board: &Board) -> Vec<SectionId> {
    board.sections.iter().map(|s| s.id.clone()).collect()
}

/// Moves a top-level task into `target`, positioned by neighbor refs.
///
/// Stale or missing refs append to the end of the target container.
/// Returns `false`, leaving the board untouched, if the subject is not a
/// top-level task or the target container does not exist.
pub fn place_task(
    board: &mut Board,
    subject: &TaskId,
    target: &ContainerRef,
    before: Option<&TaskId>,
    after: Option<&TaskId>,
) -> bool {
    if !board.has_container(target) {
        return false;
    }
    let Some(from) = board.task_index(subject) else {
        return false;
    };
    let mut task = board.tasks.remove(from);
    task.set_container(target);

    let slots: Vec<usize> = board
        .tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.container == *target)
        .map(|(i, _)| i)
        .collect();
    let ids: Vec<&TaskId> = slots.iter().map(|&i| &board.tasks[i].id).collect();
    let idx = compute_insert_index(&ids, before, after);

    let flat = match slots.get(idx) {
        Some(&pos) => pos,
        None => slots.last().map_or(board.tasks.len(), |&pos| pos + 1),
    };
    board.tasks.insert(flat, task);
    true
}

/// Applies a task move intent to the board.
pub fn apply_task_move(board: &mut Board, intent: &MoveIntent) -> bool {
    place_task(
        board,
        &intent.subject_id,
        &intent.target(),
        intent.before_id.as_ref(),
        intent.after_id.as_ref(),
    )
}

/// Applies a section move intent to the board.
///
/// Returns `false` if the subject section does not exist.
pub fn apply_section_move(board: &mut Board, intent: &SectionMoveIntent) -> bool {
    let Some(from) = board.section_index(&intent.subject_id) else {
        return false;
    };
    let section = board.sections.remove(from);
    let ids: Vec<&SectionId> = board.sections.iter().map(|s| &s.id).collect();
    let idx = compute_insert_index(&ids, intent.before_id.as_ref(), intent.after_id.as_ref());
    board.sections.insert(idx, section);
    true
}
