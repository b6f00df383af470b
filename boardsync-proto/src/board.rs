//! The board aggregate: sections, tasks and their containment.
//!
//! Task membership is not stored on sections. Each task carries a
//! [`ContainerRef`], and the order of a container's tasks is the relative
//! order in which they appear in [`Board::tasks`]. The unassigned bucket is
//! simply the subsequence whose container is [`ContainerRef::Unassigned`].

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BoardId, ContainerRef, SectionId, TaskId, UserId};

/// Maximum allowed task or section name length in characters.
pub const MAX_NAME_LENGTH: usize = 256;

/// Provisional display name given to assignees whose record has not been
/// fetched yet. The next authoritative refetch replaces it.
pub const PENDING_NAME: &str = "\u{2026}";

/// A user assigned to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    /// User identifier.
    pub id: UserId,
    /// Name shown next to the avatar.
    pub display_name: String,
}

impl Assignee {
    /// Creates an assignee record.
    pub fn new(id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// Creates a placeholder record carrying [`PENDING_NAME`].
    #[must_use]
    pub fn placeholder(id: UserId) -> Self {
        Self {
            id,
            display_name: PENDING_NAME.to_string(),
        }
    }

    /// Returns `true` if the display name is still the provisional sentinel.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.display_name == PENDING_NAME
    }
}

/// A unit of work on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier.
    pub id: TaskId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional due date.
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    /// Completion flag.
    #[serde(default)]
    pub done: bool,
    /// Assigned users, in display order.
    #[serde(default)]
    pub assignees: Vec<Assignee>,
    /// Owning container.
    pub container: ContainerRef,
    /// Ordered subtasks. Subtasks inherit the parent's container.
    #[serde(default)]
    pub subtasks: Vec<Task>,
}

impl Task {
    /// Creates a task with only the required fields set.
    pub fn new(id: impl Into<TaskId>, name: impl Into<String>, container: ContainerRef) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            due_date: None,
            done: false,
            assignees: Vec::new(),
            container,
            subtasks: Vec::new(),
        }
    }

    /// Finds this task or one of its descendants by id.
    #[must_use]
    pub fn find(&self, id: &TaskId) -> Option<&Self> {
        if self.id == *id {
            return Some(self);
        }
        self.subtasks.iter().find_map(|sub| sub.find(id))
    }

    /// Mutable variant of [`find`](Self::find).
    pub fn find_mut(&mut self, id: &TaskId) -> Option<&mut Self> {
        if self.id == *id {
            return Some(self);
        }
        self.subtasks.iter_mut().find_map(|sub| sub.find_mut(id))
    }

    /// Moves this task, and every subtask with it, to another container.
    pub fn set_container(&mut self, container: &ContainerRef) {
        self.container = container.clone();
        for sub in &mut self.subtasks {
            sub.set_container(container);
        }
    }

    /// Removes a descendant by id, returning it.
    fn remove_descendant(&mut self, id: &TaskId) -> Option<Self> {
        if let Some(pos) = self.subtasks.iter().position(|sub| sub.id == *id) {
            return Some(self.subtasks.remove(pos));
        }
        self.subtasks
            .iter_mut()
            .find_map(|sub| sub.remove_descendant(id))
    }

    fn collect_ids<'a>(&'a self, out: &mut Vec<&'a TaskId>) {
        out.push(&self.id);
        for sub in &self.subtasks {
            sub.collect_ids(out);
        }
    }
}

/// A named column of the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Stable identifier.
    pub id: SectionId,
    /// Display name.
    pub name: String,
}

impl Section {
    /// Creates a section.
    pub fn new(id: impl Into<SectionId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Structural problems detected by [`Board::check_integrity`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    /// The same task id appears more than once.
    #[error("task {0} appears more than once")]
    DuplicateTask(TaskId),
    /// The same section id appears more than once.
    #[error("section {0} appears more than once")]
    DuplicateSection(SectionId),
    /// A task references a section that does not exist.
    #[error("task {task} references missing section {section}")]
    OrphanedTask {
        /// The orphaned task.
        task: TaskId,
        /// The missing section.
        section: SectionId,
    },
}

/// The full in-memory snapshot of one board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    /// Board identifier (the cache key).
    pub id: BoardId,
    /// Sections in display order.
    #[serde(default)]
    pub sections: Vec<Section>,
    /// Top-level tasks of every container, in display order.
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Board {
    /// Creates an empty board.
    pub fn new(id: impl Into<BoardId>) -> Self {
        Self {
            id: id.into(),
            sections: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Returns the section with the given id.
    #[must_use]
    pub fn section(&self, id: &SectionId) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == *id)
    }

    /// Returns the position of a section in display order.
    #[must_use]
    pub fn section_index(&self, id: &SectionId) -> Option<usize> {
        self.sections.iter().position(|s| s.id == *id)
    }

    /// Returns the position of a top-level task in [`tasks`](Self::tasks).
    #[must_use]
    pub fn task_index(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == *id)
    }

    /// Returns a top-level task.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == *id)
    }

    /// Finds a task or subtask anywhere on the board.
    #[must_use]
    pub fn find_task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find_map(|t| t.find(id))
    }

    /// Mutable variant of [`find_task`](Self::find_task).
    pub fn find_task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find_map(|t| t.find_mut(id))
    }

    /// Removes a task or subtask anywhere on the board, returning it.
    pub fn remove_task(&mut self, id: &TaskId) -> Option<Task> {
        if let Some(pos) = self.task_index(id) {
            return Some(self.tasks.remove(pos));
        }
        self.tasks
            .iter_mut()
            .find_map(|t| t.remove_descendant(id))
    }

    /// Returns the container of a top-level task.
    #[must_use]
    pub fn container_of(&self, id: &TaskId) -> Option<&ContainerRef> {
        self.task(id).map(|t| &t.container)
    }

    /// Returns `true` if the container exists on this board.
    ///
    /// The unassigned bucket always exists.
    #[must_use]
    pub fn has_container(&self, container: &ContainerRef) -> bool {
        match container {
            ContainerRef::Section(id) => self.section(id).is_some(),
            ContainerRef::Unassigned => true,
        }
    }

    /// Iterates the top-level tasks of one container, in order.
    pub fn tasks_in<'a>(&'a self, container: &'a ContainerRef) -> impl Iterator<Item = &'a Task> {
        self.tasks.iter().filter(move |t| t.container == *container)
    }

    /// Returns the unassigned bucket, in order.
    #[must_use]
    pub fn unassigned(&self) -> Vec<&Task> {
        self.tasks_in(&ContainerRef::Unassigned).collect()
    }

    /// Verifies the containment invariants: no duplicated task or section,
    /// and no task referencing a section that does not exist.
    ///
    /// # Errors
    ///
    /// Returns the first [`IntegrityError`] found.
    pub fn check_integrity(&self) -> Result<(), IntegrityError> {
        let mut sections = HashSet::with_capacity(self.sections.len());
        for section in &self.sections {
            if !sections.insert(&section.id) {
                return Err(IntegrityError::DuplicateSection(section.id.clone()));
            }
        }

        let mut ids = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            if let ContainerRef::Section(section) = &task.container
                && !sections.contains(section)
            {
                return Err(IntegrityError::OrphanedTask {
                    task: task.id.clone(),
                    section: section.clone(),
                });
            }
            task.collect_ids(&mut ids);
        }

        let mut seen = HashSet::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(id) {
                return Err(IntegrityError::DuplicateTask(id.clone()));
            }
        }
        Ok(())
    }
}
