//! Identifier types and the id naming convention.
//!
//! Ids are opaque strings issued by the remote authority, but every id
//! carries a kind prefix so a drag subject or drop target can be classified
//! from the id alone:
//!
//! | kind       | form                       |
//! |------------|----------------------------|
//! | section    | `section-<anything>`       |
//! | task       | `task-<anything>`          |
//! | unassigned | `unassigned` (literal)     |
//!
//! Ids minted locally for optimistic creates keep the kind prefix and add a
//! `tmp-` marker (`task-tmp-<uuid v7>`), so they classify like real ids.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix carried by every section id.
pub const SECTION_PREFIX: &str = "section-";

/// Prefix carried by every task id.
pub const TASK_PREFIX: &str = "task-";

/// Drop-zone id of the synthetic unassigned bucket.
pub const UNASSIGNED_ID: &str = "unassigned";

/// Marker placed after the kind prefix of locally minted ids.
const TEMP_MARKER: &str = "tmp-";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an id string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a board aggregate; the replica cache key.
    BoardId
);

string_id!(
    /// Identifier of a section (`section-...`).
    SectionId
);

string_id!(
    /// Identifier of a task or subtask (`task-...`).
    TaskId
);

string_id!(
    /// Identifier of a user that can be assigned to tasks.
    UserId
);

impl SectionId {
    /// Mints a temporary id for an optimistic section create.
    #[must_use]
    pub fn temporary() -> Self {
        Self(format!("{SECTION_PREFIX}{TEMP_MARKER}{}", Uuid::now_v7()))
    }

    /// Returns `true` if this id was minted locally and not yet confirmed.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.0
            .strip_prefix(SECTION_PREFIX)
            .is_some_and(|rest| rest.starts_with(TEMP_MARKER))
    }
}

impl TaskId {
    /// Mints a temporary id for an optimistic task create.
    #[must_use]
    pub fn temporary() -> Self {
        Self(format!("{TASK_PREFIX}{TEMP_MARKER}{}", Uuid::now_v7()))
    }

    /// Returns `true` if this id was minted locally and not yet confirmed.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.0
            .strip_prefix(TASK_PREFIX)
            .is_some_and(|rest| rest.starts_with(TEMP_MARKER))
    }
}

/// The kind of entity an id names, derived from its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    /// A section (also a task drop-zone).
    Section,
    /// A task.
    Task,
    /// The unassigned bucket drop-zone.
    Unassigned,
}

impl IdKind {
    /// Classifies a raw id by the naming convention.
    ///
    /// Returns `None` for ids that follow no known convention.
    #[must_use]
    pub fn classify(raw: &str) -> Option<Self> {
        if raw == UNASSIGNED_ID {
            Some(Self::Unassigned)
        } else if raw.len() > SECTION_PREFIX.len() && raw.starts_with(SECTION_PREFIX) {
            Some(Self::Section)
        } else if raw.len() > TASK_PREFIX.len() && raw.starts_with(TASK_PREFIX) {
            Some(Self::Task)
        } else {
            None
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Section => write!(f, "section"),
            Self::Task => write!(f, "task"),
            Self::Unassigned => write!(f, "unassigned"),
        }
    }
}

/// The container owning a task: a section or the unassigned bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerRef {
    /// A regular section.
    Section(SectionId),
    /// The synthetic unassigned bucket.
    Unassigned,
}

impl ContainerRef {
    /// Builds a container ref from an optional section id, where `None`
    /// means the unassigned bucket (the remote authority's encoding).
    #[must_use]
    pub fn from_section(section: Option<SectionId>) -> Self {
        section.map_or(Self::Unassigned, Self::Section)
    }

    /// Parses a drop-zone id: a section id or the unassigned literal.
    #[must_use]
    pub fn from_drop_zone(raw: &str) -> Option<Self> {
        match IdKind::classify(raw)? {
            IdKind::Section => Some(Self::Section(SectionId::new(raw))),
            IdKind::Unassigned => Some(Self::Unassigned),
            IdKind::Task => None,
        }
    }

    /// Returns the section id, or `None` for the unassigned bucket.
    #[must_use]
    pub const fn section_id(&self) -> Option<&SectionId> {
        match self {
            Self::Section(id) => Some(id),
            Self::Unassigned => None,
        }
    }

    /// Returns the drop-zone id of this container.
    #[must_use]
    pub fn drop_zone_id(&self) -> &str {
        match self {
            Self::Section(id) => id.as_str(),
            Self::Unassigned => UNASSIGNED_ID,
        }
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.drop_zone_id())
    }
}
