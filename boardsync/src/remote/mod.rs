//! Remote authority abstraction.
//!
//! Defines the [`BoardRemote`] trait the engine dispatches to and the
//! [`RemoteError`] classification the engine acts on. Concrete
//! implementations:
//! - [`memory::InMemoryRemote`]: in-process authority for tests and the
//!   demo binary
//!
//! The transport behind a real implementation (HTTP, RPC, ...) is not this
//! crate's concern; implementations only have to map their failures onto
//! [`RemoteError`], for example with [`RemoteError::from_status`].

pub mod memory;

use std::fmt;
use std::future::Future;

use boardsync_proto::board::Board;
use boardsync_proto::ids::{BoardId, SectionId, TaskId};
use boardsync_proto::intent::{MoveIntent, SectionMoveIntent, TaskPatch};

/// How the engine reacts to a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The user lost access; raise "access revoked".
    PermissionDenied,
    /// The target no longer exists; raise "resource missing".
    NotFound,
    /// Any other client-side rejection.
    Rejected,
    /// Network or server trouble; worth retrying.
    Transient,
}

impl FailureKind {
    /// Returns `true` if the failed call may be retried.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::NotFound => write!(f, "not found"),
            Self::Rejected => write!(f, "rejected"),
            Self::Transient => write!(f, "transient"),
        }
    }
}

/// Errors reported by the remote authority.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The caller is not allowed to perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The addressed entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was refused for another client-side reason.
    #[error("rejected with status {status}: {message}")]
    Rejected {
        /// Status code reported by the authority.
        status: u16,
        /// Human-readable reason.
        message: String,
    },

    /// The request could not be completed right now.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl RemoteError {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::PermissionDenied(_) => FailureKind::PermissionDenied,
            Self::NotFound(_) => FailureKind::NotFound,
            Self::Rejected { .. } => FailureKind::Rejected,
            Self::Transient(_) => FailureKind::Transient,
        }
    }

    /// Maps an HTTP-style status code onto the taxonomy.
    ///
    /// 401/403 deny access, 404 and 410 mean missing, 408 and 429 are
    /// treated as transient, any other 4xx is a rejection, and everything
    /// else (5xx, unknown codes) is transient.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::PermissionDenied(message),
            404 | 410 => Self::NotFound(message),
            408 | 429 => Self::Transient(message),
            400..=499 => Self::Rejected { status, message },
            _ => Self::Transient(message),
        }
    }
}

/// Async interface of the remote authority.
///
/// Every call is scoped to a board. Ordering is always expressed through
/// neighbor references; how the authority turns them into a durable order
/// is its own business.
pub trait BoardRemote: Send + Sync {
    /// Fetch the authoritative board aggregate.
    fn fetch_board(
        &self,
        board: &BoardId,
    ) -> impl Future<Output = Result<Board, RemoteError>> + Send;

    /// Persist a task move.
    fn move_task(
        &self,
        board: &BoardId,
        intent: &MoveIntent,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Persist a section move.
    fn move_section(
        &self,
        board: &BoardId,
        intent: &SectionMoveIntent,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Persist a single-field task update.
    fn patch_task(
        &self,
        board: &BoardId,
        task: &TaskId,
        patch: &TaskPatch,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Rename a section.
    fn rename_section(
        &self,
        board: &BoardId,
        section: &SectionId,
        name: &str,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Create a task at the end of a section (or the unassigned bucket for
    /// `None`), returning the server-issued id.
    fn create_task(
        &self,
        board: &BoardId,
        section: Option<&SectionId>,
        name: &str,
    ) -> impl Future<Output = Result<TaskId, RemoteError>> + Send;

    /// Create a section at the end of the board, returning its id.
    fn create_section(
        &self,
        board: &BoardId,
        name: &str,
    ) -> impl Future<Output = Result<SectionId, RemoteError>> + Send;

    /// Delete a task and its subtasks.
    fn delete_task(
        &self,
        board: &BoardId,
        task: &TaskId,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
