//! Local replica cache of board aggregates.
//!
//! The cache is the single shared mutable resource of the client. Every
//! write happens under one `RwLock` write guard, so readers never observe
//! a half-applied change. Each write recomputes the grouped per-container
//! [`BoardView`] in a single pass and publishes it to subscribers through
//! a `tokio::sync::watch` channel, which is the only coupling to whatever
//! renders the board.
//!
//! [`invalidate`](ReplicaCache::invalidate) does not fetch anything itself;
//! it queues the key on the refetch channel returned by
//! [`ReplicaCache::new`], which a [`Refresher`](crate::poll::Refresher)
//! drains.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};

use boardsync_proto::board::{Board, Task};
use boardsync_proto::ids::{BoardId, ContainerRef, SectionId, TaskId};

/// Tasks of one container, as indices into the view's board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerGroup {
    /// The container.
    pub container: ContainerRef,
    /// Section name, or `None` for the unassigned bucket.
    pub name: Option<String>,
    /// Indices into [`Board::tasks`], in display order.
    pub task_indices: Vec<usize>,
}

/// Grouped-by-container view of a board.
///
/// Section groups come in section order, followed by the unassigned group.
#[derive(Debug, Clone)]
pub struct BoardView {
    board: Arc<Board>,
    groups: Vec<ContainerGroup>,
}

impl BoardView {
    /// Groups the board's tasks by container in one pass.
    #[must_use]
    pub fn build(board: Arc<Board>) -> Self {
        let mut index: HashMap<&SectionId, usize> = HashMap::with_capacity(board.sections.len());
        let mut groups: Vec<ContainerGroup> = Vec::with_capacity(board.sections.len() + 1);
        for section in &board.sections {
            index.insert(&section.id, groups.len());
            groups.push(ContainerGroup {
                container: ContainerRef::Section(section.id.clone()),
                name: Some(section.name.clone()),
                task_indices: Vec::new(),
            });
        }
        let unassigned = groups.len();
        groups.push(ContainerGroup {
            container: ContainerRef::Unassigned,
            name: None,
            task_indices: Vec::new(),
        });

        for (i, task) in board.tasks.iter().enumerate() {
            let slot = match &task.container {
                ContainerRef::Section(id) => index.get(id).copied().unwrap_or_else(|| {
                    tracing::warn!(
                        task = %task.id,
                        section = %id,
                        "task references unknown section, showing as unassigned"
                    );
                    unassigned
                }),
                ContainerRef::Unassigned => unassigned,
            };
            groups[slot].task_indices.push(i);
        }

        Self { board, groups }
    }

    /// The board this view was built from.
    #[must_use]
    pub fn board(&self) -> &Arc<Board> {
        &self.board
    }

    /// All groups, sections first, unassigned last.
    #[must_use]
    pub fn groups(&self) -> &[ContainerGroup] {
        &self.groups
    }

    /// The group for one container.
    #[must_use]
    pub fn group(&self, container: &ContainerRef) -> Option<&ContainerGroup> {
        self.groups.iter().find(|g| g.container == *container)
    }

    /// Tasks of a group, in order.
    pub fn tasks<'a>(&'a self, group: &'a ContainerGroup) -> impl Iterator<Item = &'a Task> {
        group.task_indices.iter().map(|&i| &self.board.tasks[i])
    }

    /// Ordered task ids of a container (empty for unknown containers).
    #[must_use]
    pub fn task_ids(&self, container: &ContainerRef) -> Vec<&TaskId> {
        self.group(container)
            .map(|g| self.tasks(g).map(|t| &t.id).collect())
            .unwrap_or_default()
    }
}

/// Result of [`ReplicaCache::update`].
#[derive(Debug, Clone)]
pub enum Update {
    /// Nothing is cached for the key.
    Missing,
    /// The closure declined to change the board.
    Unchanged(Arc<Board>),
    /// A new board was installed.
    Replaced {
        /// The board before the write.
        previous: Arc<Board>,
        /// The board after the write.
        current: Arc<Board>,
    },
}

struct Entry {
    board: Option<Arc<Board>>,
    view: Option<Arc<BoardView>>,
    stale: bool,
    queued: bool,
    fetched: bool,
    version: u64,
    publisher: watch::Sender<Option<Arc<BoardView>>>,
}

impl Entry {
    fn empty() -> Self {
        let (publisher, _) = watch::channel(None);
        Self {
            board: None,
            view: None,
            stale: false,
            queued: false,
            fetched: false,
            version: 0,
            publisher,
        }
    }

    fn install(&mut self, board: Arc<Board>) {
        let view = Arc::new(BoardView::build(Arc::clone(&board)));
        self.board = Some(board);
        self.view = Some(Arc::clone(&view));
        self.version += 1;
        self.publisher.send_replace(Some(view));
    }
}

/// In-memory replica of board aggregates, keyed by board id.
pub struct ReplicaCache {
    entries: RwLock<HashMap<BoardId, Entry>>,
    refetch_tx: mpsc::Sender<BoardId>,
}

impl ReplicaCache {
    /// Creates an empty cache.
    ///
    /// Returns the cache and the receiving end of the refetch queue; hand
    /// the receiver to [`Refresher::run`](crate::poll::Refresher::run).
    #[must_use]
    pub fn new(refetch_buffer: usize) -> (Self, mpsc::Receiver<BoardId>) {
        let (refetch_tx, refetch_rx) = mpsc::channel(refetch_buffer.max(1));
        let cache = Self {
            entries: RwLock::new(HashMap::new()),
            refetch_tx,
        };
        (cache, refetch_rx)
    }

    /// Returns the cached board, or `None` if nothing was ever stored.
    #[must_use]
    pub fn get(&self, key: &BoardId) -> Option<Arc<Board>> {
        self.entries.read().get(key).and_then(|e| e.board.clone())
    }

    /// Returns the grouped view of the cached board.
    #[must_use]
    pub fn view(&self, key: &BoardId) -> Option<Arc<BoardView>> {
        self.entries.read().get(key).and_then(|e| e.view.clone())
    }

    /// Number of writes applied to a key so far.
    #[must_use]
    pub fn version(&self, key: &BoardId) -> u64 {
        self.entries.read().get(key).map_or(0, |e| e.version)
    }

    /// Installs a board, replacing whatever was cached.
    ///
    /// Staleness is left as-is: an optimistic write does not count as an
    /// authoritative refresh.
    pub fn set(&self, key: &BoardId, board: Arc<Board>) {
        self.entries
            .write()
            .entry(key.clone())
            .or_insert_with(Entry::empty)
            .install(board);
    }

    /// Installs a board fetched from the remote authority and clears the
    /// stale mark, unless another refetch was queued while this one ran.
    pub fn store_fetched(&self, key: &BoardId, board: Board) {
        let mut entries = self.entries.write();
        let entry = entries.entry(key.clone()).or_insert_with(Entry::empty);
        entry.stale = entry.queued;
        entry.fetched = true;
        entry.install(Arc::new(board));
        tracing::debug!(board = %key, version = entry.version, "stored authoritative board");
    }

    /// Read-modify-write under a single write guard.
    ///
    /// The closure sees the current board and returns the replacement, or
    /// `None` to leave it untouched. It is never called for missing keys.
    pub fn update<F>(&self, key: &BoardId, f: F) -> Update
    where
        F: FnOnce(&Board) -> Option<Board>,
    {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(key) else {
            return Update::Missing;
        };
        let Some(previous) = entry.board.clone() else {
            return Update::Missing;
        };
        match f(&previous) {
            Some(next) => {
                let current = Arc::new(next);
                entry.install(Arc::clone(&current));
                Update::Replaced { previous, current }
            }
            None => Update::Unchanged(previous),
        }
    }

    /// Marks a key stale and queues it for an authoritative refetch.
    ///
    /// A key already waiting in the queue is not queued twice. If the queue
    /// is full the key stays stale but unqueued, so the next call tries
    /// again. Keys with nothing cached are ignored.
    pub fn invalidate(&self, key: &BoardId) {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if entry.board.is_none() {
            return;
        }
        entry.stale = true;
        if entry.queued {
            return;
        }
        match self.refetch_tx.try_send(key.clone()) {
            Ok(()) => entry.queued = true,
            Err(e) => tracing::warn!(board = %key, error = %e, "could not queue refetch"),
        }
    }

    /// Takes the key off the refetch queue before a fetch starts, so an
    /// invalidation that arrives while the fetch is in flight queues
    /// another one. The key stays stale until a fetch is stored.
    ///
    /// Returns whether the key was queued.
    pub fn begin_refresh(&self, key: &BoardId) -> bool {
        self.entries
            .write()
            .get_mut(key)
            .is_some_and(|e| std::mem::take(&mut e.queued))
    }

    /// Returns `true` once an authoritative fetch has been stored for the
    /// key. Boards installed only through [`set`](Self::set) do not count.
    #[must_use]
    pub fn is_fetched(&self, key: &BoardId) -> bool {
        self.entries.read().get(key).is_some_and(|e| e.fetched)
    }

    /// Returns `true` while the cached board is unconfirmed: from an
    /// invalidation until a fetched board is stored.
    #[must_use]
    pub fn is_stale(&self, key: &BoardId) -> bool {
        self.entries.read().get(key).is_some_and(|e| e.stale)
    }

    /// All keys with unconfirmed boards.
    #[must_use]
    pub fn stale_keys(&self) -> Vec<BoardId> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| e.stale)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Subscribes to view updates for a key.
    ///
    /// The receiver holds the latest view (or `None` before the first
    /// write) and is notified after every write.
    pub fn subscribe(&self, key: &BoardId) -> watch::Receiver<Option<Arc<BoardView>>> {
        self.entries
            .write()
            .entry(key.clone())
            .or_insert_with(Entry::empty)
            .publisher
            .subscribe()
    }
}

impl std::fmt::Debug for ReplicaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaCache")
            .field("keys", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}
