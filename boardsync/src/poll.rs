//! Authoritative refreshes.
//!
//! [`Refresher`] fetches boards from the remote and installs them in the
//! cache, either on demand, for every key the cache queues through
//! [`ReplicaCache::invalidate`], or on a fixed interval through a
//! [`Poller`]. A poller stops polling after a failed fetch and waits for
//! [`PollHandle::resume`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use boardsync_proto::ids::BoardId;

use crate::cache::ReplicaCache;
use crate::remote::{BoardRemote, RemoteError};

/// Fetches boards and stores them in the cache.
pub struct Refresher<R: BoardRemote> {
    cache: Arc<ReplicaCache>,
    remote: Arc<R>,
}

impl<R: BoardRemote> Refresher<R> {
    /// Creates a refresher.
    #[must_use]
    pub const fn new(cache: Arc<ReplicaCache>, remote: Arc<R>) -> Self {
        Self { cache, remote }
    }

    /// Fetches one board and installs it.
    ///
    /// # Errors
    ///
    /// Returns the remote error; the cached board is left as it was and
    /// stays stale.
    pub async fn refresh(&self, board: &BoardId) -> Result<(), RemoteError> {
        self.cache.begin_refresh(board);
        match self.remote.fetch_board(board).await {
            Ok(fetched) => {
                self.cache.store_fetched(board, fetched);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(board = %board, error = %e, "refresh failed");
                Err(e)
            }
        }
    }

    /// Refreshes every key received until the channel closes.
    ///
    /// Pass the receiver returned by [`ReplicaCache::new`].
    pub async fn run(&self, mut refetch_rx: mpsc::Receiver<BoardId>) {
        while let Some(board) = refetch_rx.recv().await {
            tracing::debug!(board = %board, "refetching invalidated board");
            // Failures are logged by `refresh`; the next invalidation retries.
            let _ = self.refresh(&board).await;
        }
        tracing::debug!("refetch queue closed");
    }
}

impl<R: BoardRemote> std::fmt::Debug for Refresher<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Refresher").finish_non_exhaustive()
    }
}

/// Fixed-interval polling of one board.
#[derive(Debug)]
pub struct Poller;

impl Poller {
    /// Starts polling `board` every `interval` on the current runtime.
    ///
    /// The first refresh happens one interval after the call.
    pub fn spawn<R: BoardRemote + 'static>(
        refresher: Arc<Refresher<R>>,
        board: BoardId,
        interval: Duration,
    ) -> PollHandle {
        let paused = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let task = tokio::spawn(poll_loop(
            refresher,
            board,
            interval,
            Arc::clone(&paused),
            Arc::clone(&wake),
        ));
        PollHandle { paused, wake, task }
    }
}

async fn poll_loop<R: BoardRemote>(
    refresher: Arc<Refresher<R>>,
    board: BoardId,
    interval: Duration,
    paused: Arc<AtomicBool>,
    wake: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        while paused.load(Ordering::Acquire) {
            wake.notified().await;
            ticker.reset();
        }
        ticker.tick().await;
        if paused.load(Ordering::Acquire) {
            continue;
        }
        if refresher.refresh(&board).await.is_err() {
            paused.store(true, Ordering::Release);
            tracing::warn!(board = %board, "polling paused after fetch error");
        }
    }
}

/// Control handle of a running [`Poller`]. Dropping it stops the poller.
#[derive(Debug)]
pub struct PollHandle {
    paused: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Returns `true` while polling is paused, by a fetch error or by
    /// [`pause`](Self::pause).
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Stops polling until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Restarts polling; the next refresh happens one interval later.
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            tracing::debug!("polling resumed");
        }
        self.wake.notify_one();
    }

    /// Stops the poller.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
