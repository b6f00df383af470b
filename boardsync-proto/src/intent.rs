//! Payloads sent to the remote authority.
//!
//! Moves are addressed relative to neighbors rather than by absolute
//! index: `after_id` names the item the subject should follow and
//! `before_id` the item it should precede. Both are sent together so the
//! authority can break ties on its own.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ContainerRef, SectionId, TaskId, UserId};

/// Neighbor-relative task move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveIntent {
    /// The task being moved.
    pub subject_id: TaskId,
    /// Destination section, or `None` for the unassigned bucket.
    pub target_container: Option<SectionId>,
    /// The task that should come right after the subject.
    pub before_id: Option<TaskId>,
    /// The task that should come right before the subject.
    pub after_id: Option<TaskId>,
}

impl MoveIntent {
    /// Returns the destination as a [`ContainerRef`].
    #[must_use]
    pub fn target(&self) -> ContainerRef {
        ContainerRef::from_section(self.target_container.clone())
    }
}

/// Neighbor-relative section move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionMoveIntent {
    /// The section being moved.
    pub subject_id: SectionId,
    /// The section that should come right after the subject.
    pub before_id: Option<SectionId>,
    /// The section that should come right before the subject.
    pub after_id: Option<SectionId>,
}

/// A single-field task update.
///
/// Every variant is a partial update of exactly one field; the remote
/// `patch_task` call carries it as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPatch {
    /// Replace the name (trimmed before applying).
    Rename(String),
    /// Replace or clear the description.
    SetDescription(Option<String>),
    /// Replace or clear the due date.
    SetDueDate(Option<DateTime<Utc>>),
    /// Set the done flag.
    SetStatus(bool),
    /// Replace the assignee set by id.
    SetAssignees(Vec<UserId>),
}

impl TaskPatch {
    /// Name of the field this patch touches.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::Rename(_) => "name",
            Self::SetDescription(_) => "description",
            Self::SetDueDate(_) => "due_date",
            Self::SetStatus(_) => "status",
            Self::SetAssignees(_) => "assignees",
        }
    }
}

impl fmt::Display for TaskPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "set {}", self.field())
    }
}
