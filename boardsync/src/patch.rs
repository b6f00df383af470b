//! Field-patch appliers.
//!
//! Each applier is a pure `Task -> Task` step that leaves the task
//! untouched (and reports `false`) when the new value equals the current
//! one. [`apply`] dispatches a [`TaskPatch`] to the matching applier.

use chrono::{DateTime, Utc};

use boardsync_proto::board::{Assignee, MAX_NAME_LENGTH, Task};
use boardsync_proto::ids::UserId;
use boardsync_proto::intent::TaskPatch;

/// Local validation failures, raised before anything is applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Name is empty after trimming.
    #[error("name cannot be empty")]
    EmptyName,
    /// Name exceeds [`MAX_NAME_LENGTH`] characters.
    #[error("name too long (max {max} characters)")]
    NameTooLong {
        /// Maximum allowed length.
        max: usize,
    },
}

/// Validates a task or section name as it would be stored.
///
/// # Errors
///
/// Returns [`ValidationError::EmptyName`] for empty or whitespace-only
/// input and [`ValidationError::NameTooLong`] past [`MAX_NAME_LENGTH`].
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::NameTooLong {
            max: MAX_NAME_LENGTH,
        });
    }
    Ok(())
}

/// Applies a patch to a task. Returns `true` if the task changed.
pub fn apply(task: &mut Task, patch: &TaskPatch) -> bool {
    match patch {
        TaskPatch::Rename(name) => rename(task, name),
        TaskPatch::SetDescription(description) => set_description(task, description.as_deref()),
        TaskPatch::SetDueDate(due) => set_due_date(task, *due),
        TaskPatch::SetStatus(done) => set_status(task, *done),
        TaskPatch::SetAssignees(ids) => set_assignees(task, ids),
    }
}

/// Renames the task to the trimmed input.
pub fn rename(task: &mut Task, name: &str) -> bool {
    let name = name.trim();
    if task.name == name {
        return false;
    }
    task.name = name.to_string();
    true
}

/// Replaces or clears the description.
pub fn set_description(task: &mut Task, description: Option<&str>) -> bool {
    if task.description.as_deref() == description {
        return false;
    }
    task.description = description.map(str::to_string);
    true
}

/// Replaces or clears the due date.
pub fn set_due_date(task: &mut Task, due: Option<DateTime<Utc>>) -> bool {
    if task.due_date == due {
        return false;
    }
    task.due_date = due;
    true
}

/// Sets the done flag.
pub fn set_status(task: &mut Task, done: bool) -> bool {
    if task.done == done {
        return false;
    }
    task.done = done;
    true
}

/// Replaces the assignee set, in the given order.
///
/// Ids already present keep their existing record, so a display name
/// known locally survives. Unknown ids get a placeholder record whose name
/// is corrected by the next authoritative refetch. Duplicate ids in the
/// input are collapsed to their first occurrence.
pub fn set_assignees(task: &mut Task, ids: &[UserId]) -> bool {
    let mut merged: Vec<Assignee> = Vec::with_capacity(ids.len());
    for id in ids {
        if merged.iter().any(|a| a.id == *id) {
            continue;
        }
        let record = task
            .assignees
            .iter()
            .find(|a| a.id == *id)
            .cloned()
            .unwrap_or_else(|| Assignee::placeholder(id.clone()));
        merged.push(record);
    }
    if merged == task.assignees {
        return false;
    }
    task.assignees = merged;
    true
}
