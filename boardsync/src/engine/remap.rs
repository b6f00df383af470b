//! Temporary-to-server id table for optimistic creates.
//!
//! A create installs its entity under a locally minted temporary id. When
//! the authority answers with the real id, the engine records the pair
//! here and swaps the id inside the cached board. Mutations issued later
//! that still carry the temporary id are rewritten through
//! [`IdRemap::resolve`] before they are applied or dispatched.

use std::collections::HashMap;

use boardsync_proto::board::Board;
use boardsync_proto::ids::{ContainerRef, SectionId, TaskId};

use super::Mutation;

/// Confirmed temporary ids and their server-issued replacements.
#[derive(Debug, Default, Clone)]
pub struct IdRemap {
    tasks: HashMap<TaskId, TaskId>,
    sections: HashMap<SectionId, SectionId>,
}

impl IdRemap {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the server id for a temporary task id.
    pub fn record_task(&mut self, temp: TaskId, real: TaskId) {
        self.tasks.insert(temp, real);
    }

    /// Records the server id for a temporary section id.
    pub fn record_section(&mut self, temp: SectionId, real: SectionId) {
        self.sections.insert(temp, real);
    }

    /// Server id recorded for a temporary task id.
    #[must_use]
    pub fn task(&self, temp: &TaskId) -> Option<&TaskId> {
        self.tasks.get(temp)
    }

    /// Server id recorded for a temporary section id.
    #[must_use]
    pub fn section(&self, temp: &SectionId) -> Option<&SectionId> {
        self.sections.get(temp)
    }

    /// Number of recorded pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len() + self.sections.len()
    }

    /// Returns `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.sections.is_empty()
    }

    fn task_id(&self, id: TaskId) -> TaskId {
        self.tasks.get(&id).cloned().unwrap_or(id)
    }

    fn section_id(&self, id: SectionId) -> SectionId {
        self.sections.get(&id).cloned().unwrap_or(id)
    }

    /// Rewrites every confirmed temporary id the mutation refers to.
    #[must_use]
    pub fn resolve(&self, mutation: Mutation) -> Mutation {
        if self.is_empty() {
            return mutation;
        }
        match mutation {
            Mutation::MoveTask(mut intent) => {
                intent.subject_id = self.task_id(intent.subject_id);
                intent.target_container = intent.target_container.map(|s| self.section_id(s));
                intent.before_id = intent.before_id.map(|t| self.task_id(t));
                intent.after_id = intent.after_id.map(|t| self.task_id(t));
                Mutation::MoveTask(intent)
            }
            Mutation::MoveSection(mut intent) => {
                intent.subject_id = self.section_id(intent.subject_id);
                intent.before_id = intent.before_id.map(|s| self.section_id(s));
                intent.after_id = intent.after_id.map(|s| self.section_id(s));
                Mutation::MoveSection(intent)
            }
            Mutation::PatchTask { task, patch } => Mutation::PatchTask {
                task: self.task_id(task),
                patch,
            },
            Mutation::RenameSection { section, name } => Mutation::RenameSection {
                section: self.section_id(section),
                name,
            },
            Mutation::CreateTask {
                temp_id,
                section,
                name,
            } => Mutation::CreateTask {
                temp_id,
                section: section.map(|s| self.section_id(s)),
                name,
            },
            Mutation::CreateSection { temp_id, name } => Mutation::CreateSection { temp_id, name },
            Mutation::DeleteTask(task) => Mutation::DeleteTask(self.task_id(task)),
        }
    }
}

/// Replaces a task id in the board. Returns `false` if `temp` is absent.
pub fn swap_task_id(board: &mut Board, temp: &TaskId, real: &TaskId) -> bool {
    match board.find_task_mut(temp) {
        Some(task) => {
            task.id = real.clone();
            true
        }
        None => false,
    }
}

/// Replaces a section id in the board, repointing every task that lives
/// in it. Returns `false` if `temp` is absent.
pub fn swap_section_id(board: &mut Board, temp: &SectionId, real: &SectionId) -> bool {
    let Some(section) = board.sections.iter_mut().find(|s| s.id == *temp) else {
        return false;
    };
    section.id = real.clone();

    let old = ContainerRef::Section(temp.clone());
    let new = ContainerRef::Section(real.clone());
    for task in board.tasks.iter_mut().filter(|t| t.container == old) {
        task.set_container(&new);
    }
    true
}
