//! Integration tests for authoritative refreshes.
//!
//! Invalidations queued by mutations are drained by a running
//! `Refresher`, and a `Poller` picks up changes made elsewhere.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::redundant_clone)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use boardsync::cache::ReplicaCache;
use boardsync::engine::{EngineEvent, Mutation, MutationEngine, RetryConfig};
use boardsync::poll::{Poller, Refresher};
use boardsync::remote::RemoteError;
use boardsync::remote::memory::{InMemoryRemote, RemoteCall};
use boardsync_proto::board::{Board, Section, Task};
use boardsync_proto::ids::{BoardId, ContainerRef, SectionId, TaskId};
use boardsync_proto::intent::TaskPatch;

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

struct Harness {
    engine: Arc<MutationEngine<InMemoryRemote>>,
    cache: Arc<ReplicaCache>,
    remote: Arc<InMemoryRemote>,
    refresher: Arc<Refresher<InMemoryRemote>>,
    refetch_rx: Option<mpsc::Receiver<BoardId>>,
    _events: mpsc::Receiver<EngineEvent>,
}

fn key() -> BoardId {
    BoardId::new("board-1")
}

fn seed_board() -> Board {
    let mut board = Board::new("board-1");
    board.sections = vec![Section::new("section-a", "Todo")];
    board.tasks = vec![
        Task::new(
            "task-1",
            "One",
            ContainerRef::Section(SectionId::new("section-a")),
        ),
        Task::new("task-2", "Two", ContainerRef::Unassigned),
    ];
    board
}

async fn harness() -> Harness {
    let remote = Arc::new(InMemoryRemote::with_board(seed_board()));
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
    let refresher = Arc::new(Refresher::new(Arc::clone(&cache), Arc::clone(&remote)));
    refresher.refresh(&key()).await.unwrap();
    remote.clear_calls();
    Harness {
        engine: Arc::new(engine),
        cache,
        remote,
        refresher,
        refetch_rx: Some(refetch_rx),
        _events: events,
    }
}

/// Spawns the refetch loop on the harness's queue.
fn spawn_refetch_loop(h: &mut Harness) -> tokio::task::JoinHandle<()> {
    let refresher = Arc::clone(&h.refresher);
    let rx = h.refetch_rx.take().unwrap();
    tokio::spawn(async move { refresher.run(rx).await })
}

fn fetch_count(remote: &InMemoryRemote) -> usize {
    remote
        .calls()
        .iter()
        .filter(|c| matches!(c, RemoteCall::FetchBoard(_)))
        .count()
}

/// Changes a task name on the authority only, as another client would.
fn rename_elsewhere(remote: &InMemoryRemote, name: &str) {
    let mut board = remote.board(&key()).unwrap();
    board.tasks[0].name = name.to_string();
    remote.insert_board(board);
}

fn cached_name(cache: &ReplicaCache) -> String {
    cache.get(&key()).unwrap().tasks[0].name.clone()
}

// ---------------------------------------------------------------------------
// Invalidation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn settled_mutation_triggers_refetch() {
    let mut h = harness().await;
    let refetch = spawn_refetch_loop(&mut h);

    // Another client's change lands on the authority meanwhile.
    rename_elsewhere(&h.remote, "Renamed elsewhere");
    h.engine
        .execute(
            &key(),
            Mutation::PatchTask {
                task: TaskId::new("task-2"),
                patch: TaskPatch::SetStatus(true),
            },
        )
        .await
        .unwrap();
    assert!(h.cache.is_stale(&key()));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!h.cache.is_stale(&key()));
    assert_eq!(fetch_count(&h.remote), 1);
    assert_eq!(*h.cache.get(&key()).unwrap(), h.remote.board(&key()).unwrap());
    assert_eq!(cached_name(&h.cache), "Renamed elsewhere");
    refetch.abort();
}

#[tokio::test(start_paused = true)]
async fn rolled_back_pipelines_converge_after_refetch() {
    let mut h = harness().await;
    h.remote.set_latency(Some(Duration::from_millis(50)));
    h.remote.fail_next(RemoteError::from_status(422, "refused"));

    let done = |task: &str| Mutation::PatchTask {
        task: TaskId::new(task),
        patch: TaskPatch::SetStatus(true),
    };
    let board_key = key();
    let (first, second) = tokio::join!(
        h.engine.execute(&board_key, done("task-1")),
        h.engine.execute(&board_key, done("task-2")),
    );
    assert!(first.is_err());
    assert!(second.is_ok());
    assert!(!h.cache.get(&key()).unwrap().tasks[1].done);

    let refetch = spawn_refetch_loop(&mut h);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let board = h.cache.get(&key()).unwrap();
    assert!(!board.tasks[0].done);
    assert!(board.tasks[1].done);
    refetch.abort();
}

#[tokio::test(start_paused = true)]
async fn repeated_invalidation_queues_one_fetch() {
    let mut h = harness().await;
    h.cache.invalidate(&key());
    h.cache.invalidate(&key());
    h.cache.invalidate(&key());

    let refetch = spawn_refetch_loop(&mut h);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(fetch_count(&h.remote), 1);
    refetch.abort();
}

#[tokio::test(start_paused = true)]
async fn failed_refetch_is_retried_on_next_invalidation() {
    let mut h = harness().await;
    let refetch = spawn_refetch_loop(&mut h);
    rename_elsewhere(&h.remote, "Later");

    h.remote.fail_next_fetch(RemoteError::Transient("offline".into()));
    h.cache.invalidate(&key());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(cached_name(&h.cache), "One");
    assert!(h.cache.is_stale(&key()));

    h.cache.invalidate(&key());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(cached_name(&h.cache), "Later");
    assert_eq!(fetch_count(&h.remote), 2);
    refetch.abort();
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn poller_picks_up_remote_changes() {
    let h = harness().await;
    let poller = Poller::spawn(Arc::clone(&h.refresher), key(), Duration::from_secs(30));

    rename_elsewhere(&h.remote, "Polled");
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(cached_name(&h.cache), "One");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(cached_name(&h.cache), "Polled");
    poller.stop();
}

#[tokio::test(start_paused = true)]
async fn paused_poller_stays_quiet_until_resumed() {
    let h = harness().await;
    let poller = Poller::spawn(Arc::clone(&h.refresher), key(), Duration::from_secs(10));

    poller.pause();
    assert!(poller.is_paused());
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(fetch_count(&h.remote), 0);

    poller.resume();
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(fetch_count(&h.remote), 1);
    assert!(!poller.is_paused());
}

#[tokio::test(start_paused = true)]
async fn stopped_poller_no_longer_fetches() {
    let h = harness().await;
    let poller = Poller::spawn(Arc::clone(&h.refresher), key(), Duration::from_secs(10));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(fetch_count(&h.remote), 1);

    poller.stop();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(fetch_count(&h.remote), 1);
}
