//! Integration tests for debounced name editing.
//!
//! Runs on a paused clock so quiescence windows are exact.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use boardsync::cache::ReplicaCache;
use boardsync::coalesce::{EditTarget, NameEditor};
use boardsync::engine::{EngineEvent, MutationEngine, RetryConfig};
use boardsync::poll::Refresher;
use boardsync::remote::RemoteError;
use boardsync::remote::memory::{InMemoryRemote, RemoteCall};
use boardsync_proto::board::{Board, Section, Task};
use boardsync_proto::ids::{BoardId, ContainerRef, SectionId, TaskId};
use boardsync_proto::intent::TaskPatch;

const WINDOW: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

struct Harness {
    engine: Arc<MutationEngine<InMemoryRemote>>,
    cache: Arc<ReplicaCache>,
    remote: Arc<InMemoryRemote>,
    _events: mpsc::Receiver<EngineEvent>,
    _refetch_rx: mpsc::Receiver<BoardId>,
}

fn key() -> BoardId {
    BoardId::new("board-1")
}

async fn harness() -> Harness {
    let mut board = Board::new("board-1");
    board.sections = vec![Section::new("section-a", "Todo")];
    board.tasks = vec![Task::new(
        "task-1",
        "Fo",
        ContainerRef::Section(SectionId::new("section-a")),
    )];
    let remote = Arc::new(InMemoryRemote::with_board(board));
    let (cache, refetch_rx) = ReplicaCache::new(16);
    let cache = Arc::new(cache);
    let (engine, events) = MutationEngine::new(
        Arc::clone(&cache),
        Arc::clone(&remote),
        RetryConfig {
            retries: 0,
            backoff: Duration::ZERO,
        },
        64,
    );
    Refresher::new(Arc::clone(&cache), Arc::clone(&remote))
        .refresh(&key())
        .await
        .unwrap();
    remote.clear_calls();
    Harness {
        engine: Arc::new(engine),
        cache,
        remote,
        _events: events,
        _refetch_rx: refetch_rx,
    }
}

fn task_editor(h: &Harness) -> NameEditor<InMemoryRemote> {
    NameEditor::open(
        Arc::clone(&h.engine),
        key(),
        EditTarget::Task(TaskId::new("task-1")),
        WINDOW,
    )
    .unwrap()
}

fn renames(remote: &InMemoryRemote) -> Vec<String> {
    remote
        .mutation_calls()
        .into_iter()
        .filter_map(|call| match call {
            RemoteCall::PatchTask {
                patch: TaskPatch::Rename(name),
                ..
            } => Some(name),
            RemoteCall::RenameSection { name, .. } => Some(name),
            _ => None,
        })
        .collect()
}

fn cached_name(cache: &ReplicaCache) -> String {
    cache
        .get(&key())
        .and_then(|b| b.find_task(&TaskId::new("task-1")).map(|t| t.name.clone()))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Coalescing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn two_keystrokes_send_one_patch_with_final_value() {
    let h = harness().await;
    let editor = task_editor(&h);

    editor.input("Foo");
    tokio::time::sleep(Duration::from_millis(100)).await;
    editor.input("Foobar");
    assert_eq!(editor.display(), "Foobar");
    assert!(renames(&h.remote).is_empty());

    tokio::time::sleep(WINDOW + Duration::from_millis(10)).await;

    assert_eq!(renames(&h.remote), ["Foobar"]);
    assert_eq!(editor.confirmed(), "Foobar");
    assert_eq!(cached_name(&h.cache), "Foobar");
    let server = h.remote.board(&key()).unwrap();
    assert_eq!(server.tasks[0].name, "Foobar");
}

#[tokio::test(start_paused = true)]
async fn steady_typing_keeps_postponing_the_send() {
    let h = harness().await;
    let editor = task_editor(&h);

    for text in ["F", "Fi", "Fin", "Fina", "Final"] {
        editor.input(text);
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    assert!(renames(&h.remote).is_empty());
    assert!(editor.is_scheduled());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(renames(&h.remote), ["Final"]);
    assert!(!editor.is_scheduled());
}

#[tokio::test(start_paused = true)]
async fn typing_back_to_confirmed_value_sends_nothing() {
    let h = harness().await;
    let editor = task_editor(&h);

    editor.input("Foo");
    editor.input("Fo");
    tokio::time::sleep(WINDOW * 2).await;
    assert!(renames(&h.remote).is_empty());
}

#[tokio::test(start_paused = true)]
async fn send_in_flight_survives_dropping_the_editor() {
    let h = harness().await;
    h.remote.set_latency(Some(Duration::from_millis(300)));
    let editor = task_editor(&h);

    editor.input("Foobar");
    tokio::time::sleep(WINDOW + Duration::from_millis(10)).await;
    assert_eq!(renames(&h.remote), ["Foobar"]);
    drop(editor);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.remote.board(&key()).unwrap().tasks[0].name, "Foobar");
    assert_eq!(cached_name(&h.cache), "Foobar");
}

#[tokio::test(start_paused = true)]
async fn dropping_the_editor_before_quiescence_sends_nothing() {
    let h = harness().await;
    let editor = task_editor(&h);

    editor.input("Foobar");
    drop(editor);
    tokio::time::sleep(WINDOW * 2).await;
    assert!(renames(&h.remote).is_empty());
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failed_debounced_send_reverts_draft_and_board() {
    let h = harness().await;
    h.remote.fail_next(RemoteError::from_status(422, "nope"));
    let editor = task_editor(&h);

    editor.input("Foobar");
    tokio::time::sleep(WINDOW + Duration::from_millis(10)).await;

    assert_eq!(renames(&h.remote), ["Foobar"]);
    assert_eq!(editor.display(), "Fo");
    assert_eq!(editor.confirmed(), "Fo");
    assert_eq!(cached_name(&h.cache), "Fo");
}

#[tokio::test(start_paused = true)]
async fn section_and_task_editors_are_independent() {
    let h = harness().await;
    let task = task_editor(&h);
    let section = NameEditor::open(
        Arc::clone(&h.engine),
        key(),
        EditTarget::Section(SectionId::new("section-a")),
        WINDOW,
    )
    .unwrap();

    task.input("Foobar");
    section.input("Doing");
    tokio::time::sleep(WINDOW + Duration::from_millis(10)).await;

    let mut sent = renames(&h.remote);
    sent.sort();
    assert_eq!(sent, ["Doing", "Foobar"]);
    assert_eq!(h.cache.get(&key()).unwrap().sections[0].name, "Doing");
}
