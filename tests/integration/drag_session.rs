//! Integration tests for drag-and-drop sessions.
//!
//! Exercises the full path from `start` through live hover reflow to the
//! dispatched move, including restores on cancelled and failed drops.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::similar_names,
    clippy::redundant_clone
)]

use std::sync::Arc;

use tokio::sync::mpsc;

use boardsync::cache::ReplicaCache;
use boardsync::drag::{DragController, DragError, DragKind, DragPreview, DropOutcome};
use boardsync::engine::{EngineEvent, MutationEngine, Outcome, RetryConfig};
use boardsync::position::{container_order, section_order};
use boardsync::poll::Refresher;
use boardsync::remote::RemoteError;
use boardsync::remote::memory::{InMemoryRemote, RemoteCall};
use boardsync_proto::board::{Board, Section, Task};
use boardsync_proto::ids::{BoardId, ContainerRef, SectionId, TaskId};
use boardsync_proto::intent::{MoveIntent, SectionMoveIntent};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

struct Harness {
    drag: DragController<InMemoryRemote>,
    cache: Arc<ReplicaCache>,
    remote: Arc<InMemoryRemote>,
    _events: mpsc::Receiver<EngineEvent>,
    _refetch_rx: mpsc::Receiver<BoardId>,
}

fn key() -> BoardId {
    BoardId::new("board-1")
}

fn section(id: &str) -> ContainerRef {
    ContainerRef::Section(SectionId::new(id))
}

/// Backlog holds `backlog_tasks` tasks, Done is empty.
fn board_with(backlog_tasks: usize) -> Board {
    let mut board = Board::new("board-1");
    board.sections = vec![
        Section::new("section-backlog", "Backlog"),
        Section::new("section-done", "Done"),
    ];
    board.tasks = (1..=backlog_tasks)
        .map(|n| Task::new(format!("task-{n}"), format!("Task {n}"), section("section-backlog")))
        .collect();
    board
}

async fn harness(board: Board) -> Harness {
    let remote = Arc::new(InMemoryRemote::with_board(board));
    let (cache, refetch_rx) = ReplicaCache::new(16);
    let cache = Arc::new(cache);
    let (engine, events) = MutationEngine::new(
        Arc::clone(&cache),
        Arc::clone(&remote),
        RetryConfig {
            retries: 0,
            ..RetryConfig::default()
        },
        64,
    );
    Refresher::new(Arc::clone(&cache), Arc::clone(&remote))
        .refresh(&key())
        .await
        .unwrap();
    remote.clear_calls();
    Harness {
        drag: DragController::new(Arc::new(engine)),
        cache,
        remote,
        _events: events,
        _refetch_rx: refetch_rx,
    }
}

fn order(cache: &ReplicaCache, container: &ContainerRef) -> Vec<String> {
    container_order(&cache.get(&key()).unwrap(), container)
        .into_iter()
        .map(|id| id.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Task drops
// ---------------------------------------------------------------------------

#[tokio::test]
async fn drop_on_empty_section_sends_bare_move() {
    let mut h = harness(board_with(3)).await;

    assert_eq!(h.drag.start(&key(), "task-2").unwrap(), DragKind::Task);
    let outcome = h.drag.release(Some("section-done")).await.unwrap();
    assert_eq!(outcome, DropOutcome::Dispatched(Outcome::Applied));

    assert_eq!(
        h.remote.mutation_calls(),
        vec![RemoteCall::MoveTask {
            board: key(),
            intent: MoveIntent {
                subject_id: TaskId::new("task-2"),
                target_container: Some(SectionId::new("section-done")),
                before_id: None,
                after_id: None,
            },
        }]
    );
    assert_eq!(order(&h.cache, &section("section-backlog")), ["task-1", "task-3"]);
    assert_eq!(order(&h.cache, &section("section-done")), ["task-2"]);
    assert!(!h.drag.is_dragging());
}

#[tokio::test]
async fn first_of_five_dropped_on_last_goes_to_end() {
    let mut h = harness(board_with(5)).await;

    h.drag.start(&key(), "task-1").unwrap();
    h.drag.release(Some("task-5")).await.unwrap();

    let calls = h.remote.mutation_calls();
    let [RemoteCall::MoveTask { intent, .. }] = calls.as_slice() else {
        panic!("expected one move, got {calls:?}");
    };
    assert_eq!(intent.target_container, Some(SectionId::new("section-backlog")));
    assert_eq!(intent.after_id, Some(TaskId::new("task-5")));
    assert_eq!(intent.before_id, None);
    assert_eq!(
        order(&h.cache, &section("section-backlog")),
        ["task-2", "task-3", "task-4", "task-5", "task-1"]
    );
}

#[tokio::test]
async fn drop_on_unassigned_moves_without_duplicating() {
    let mut board = board_with(2);
    board
        .tasks
        .push(Task::new("task-9", "Loose", ContainerRef::Unassigned));
    let mut h = harness(board).await;

    h.drag.start(&key(), "task-1").unwrap();
    h.drag.release(Some("unassigned")).await.unwrap();

    let calls = h.remote.mutation_calls();
    let [RemoteCall::MoveTask { intent, .. }] = calls.as_slice() else {
        panic!("expected one move, got {calls:?}");
    };
    assert_eq!(intent.target_container, None);
    assert_eq!(intent.after_id, Some(TaskId::new("task-9")));

    let board = h.cache.get(&key()).unwrap();
    assert_eq!(board.tasks.len(), 3);
    assert_eq!(
        board
            .tasks
            .iter()
            .filter(|t| t.id == TaskId::new("task-1"))
            .count(),
        1
    );
    assert_eq!(order(&h.cache, &ContainerRef::Unassigned), ["task-9", "task-1"]);
}

#[tokio::test]
async fn drop_in_place_sends_nothing() {
    let mut h = harness(board_with(3)).await;

    h.drag.start(&key(), "task-2").unwrap();
    assert_eq!(h.drag.release(Some("task-2")).await.unwrap(), DropOutcome::NoOp);
    assert!(h.remote.mutation_calls().is_empty());
}

#[tokio::test]
async fn hover_away_and_back_then_drop_sends_nothing() {
    let mut h = harness(board_with(3)).await;
    let snapshot = h.cache.get(&key()).unwrap();

    h.drag.start(&key(), "task-2").unwrap();
    assert!(h.drag.hover("section-done"));
    assert!(h.drag.hover("section-backlog"));
    // Appended at the end of Backlog, not back at index 1.
    assert_eq!(
        order(&h.cache, &section("section-backlog")),
        ["task-1", "task-3", "task-2"]
    );
    assert!(h.drag.hover("task-3"));
    assert_eq!(
        order(&h.cache, &section("section-backlog")),
        ["task-1", "task-2", "task-3"]
    );

    assert_eq!(h.drag.release(Some("task-3")).await.unwrap(), DropOutcome::NoOp);
    assert_eq!(*h.cache.get(&key()).unwrap(), *snapshot);
    assert!(h.remote.mutation_calls().is_empty());
}

// ---------------------------------------------------------------------------
// Restores
// ---------------------------------------------------------------------------

#[tokio::test]
async fn release_without_target_restores_snapshot() {
    let mut h = harness(board_with(3)).await;
    let snapshot = h.cache.get(&key()).unwrap();

    h.drag.start(&key(), "task-1").unwrap();
    assert!(h.drag.hover("task-3"));
    assert_ne!(*h.cache.get(&key()).unwrap(), *snapshot);

    assert_eq!(h.drag.release(None).await.unwrap(), DropOutcome::Restored);
    assert_eq!(*h.cache.get(&key()).unwrap(), *snapshot);
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn failed_move_restores_pre_drag_board() {
    let mut h = harness(board_with(3)).await;
    let snapshot = h.cache.get(&key()).unwrap();

    h.remote.fail_next(RemoteError::from_status(409, "conflict"));
    h.drag.start(&key(), "task-3").unwrap();
    h.drag.hover("task-1");
    h.drag.hover("section-done");
    let err = h.drag.release(Some("section-done")).await.unwrap_err();

    assert!(matches!(err, DragError::Mutation(_)));
    assert_eq!(*h.cache.get(&key()).unwrap(), *snapshot);
}

#[tokio::test]
async fn cancel_restores_snapshot() {
    let mut h = harness(board_with(3)).await;
    let snapshot = h.cache.get(&key()).unwrap();

    h.drag.start(&key(), "task-1").unwrap();
    h.drag.hover("section-done");
    assert!(h.drag.cancel());
    assert!(!h.drag.cancel());
    assert_eq!(*h.cache.get(&key()).unwrap(), *snapshot);
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn section_drop_reorders_sections() {
    let mut h = harness(board_with(1)).await;

    assert_eq!(
        h.drag.start(&key(), "section-done").unwrap(),
        DragKind::Section
    );
    // Section drags have no live reflow.
    assert!(!h.drag.hover("section-backlog"));
    h.drag.release(Some("section-backlog")).await.unwrap();

    assert_eq!(
        h.remote.mutation_calls(),
        vec![RemoteCall::MoveSection {
            board: key(),
            intent: SectionMoveIntent {
                subject_id: SectionId::new("section-done"),
                before_id: Some(SectionId::new("section-backlog")),
                after_id: None,
            },
        }]
    );
    assert_eq!(
        section_order(&h.cache.get(&key()).unwrap()),
        vec![
            SectionId::new("section-done"),
            SectionId::new("section-backlog")
        ]
    );
}

#[tokio::test]
async fn section_dropped_on_task_is_restored() {
    let mut h = harness(board_with(1)).await;

    h.drag.start(&key(), "section-backlog").unwrap();
    assert_eq!(
        h.drag.release(Some("task-1")).await.unwrap(),
        DropOutcome::Restored
    );
    assert!(h.remote.mutation_calls().is_empty());
}

// ---------------------------------------------------------------------------
// Session rules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn session_rules() {
    let mut board = board_with(1);
    board.tasks[0]
        .subtasks
        .push(Task::new("task-1-1", "Child", section("section-backlog")));
    let mut h = harness(board).await;

    assert_eq!(
        h.drag.start(&key(), "unassigned"),
        Err(DragError::NotDraggable("unassigned".into()))
    );
    assert_eq!(
        h.drag.start(&key(), "task-1-1"),
        Err(DragError::NotDraggable("task-1-1".into()))
    );
    assert_eq!(
        h.drag.start(&key(), "task-404"),
        Err(DragError::UnknownSubject("task-404".into()))
    );
    assert_eq!(
        h.drag.start(&BoardId::new("board-2"), "task-1"),
        Err(DragError::NotFetched(BoardId::new("board-2")))
    );
    assert_eq!(
        h.drag.release(None).await,
        Err(DragError::NotDragging)
    );

    h.drag.start(&key(), "task-1").unwrap();
    assert_eq!(
        h.drag.start(&key(), "task-1"),
        Err(DragError::AlreadyDragging)
    );
    h.drag.hover("section-done");
    assert_eq!(
        h.drag.preview(),
        Some(DragPreview {
            kind: DragKind::Task,
            subject: "task-1".into(),
            over: Some("section-done".into()),
        })
    );
    // Hovering never talks to the authority.
    assert!(h.remote.calls().is_empty());
}
