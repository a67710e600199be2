//! The exported façade over a peer's board replica.

use std::sync::Arc;

use mosaic_board::{Board, Position, Tile};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::Result;

/// Presentation layer notified of replica changes.
pub trait BoardObserver: Send + Sync {
    /// The replica changed; `tiles` is its new arrangement.
    fn display_tiles(&self, tiles: &[Tile]);

    /// The replica reached the solved arrangement.
    fn display_solution(&self);
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl BoardObserver for NoopObserver {
    fn display_tiles(&self, _tiles: &[Tile]) {}

    fn display_solution(&self) {}
}

/// One peer's board replica, as seen by the rest of the session.
///
/// The puzzle performs no locking of its own: callers are expected to hold
/// the session-wide locks before calling [`swap`](Self::swap).
pub struct RemotePuzzle {
    board: RwLock<Board>,
    observer: Arc<dyn BoardObserver>,
}

impl RemotePuzzle {
    /// Wrap a replica.
    pub fn new(board: Board, observer: Arc<dyn BoardObserver>) -> Self {
        Self {
            board: RwLock::new(board),
            observer,
        }
    }

    /// Apply a swap to the replica and refresh the presentation layer.
    pub async fn swap(&self, first: Position, second: Position) -> Result<()> {
        let (tiles, solved) = {
            let mut board = self.board.write().await;
            board.swap(first, second)?;
            (board.tiles(), board.is_solved())
        };
        debug!(%first, %second, "replica swapped");

        self.observer.display_tiles(&tiles);
        if solved {
            info!("puzzle solved");
            self.observer.display_solution();
        }
        Ok(())
    }

    /// Snapshot of the current arrangement.
    pub async fn tiles(&self) -> Vec<Tile> {
        self.board.read().await.tiles()
    }

    /// Whether the replica is solved.
    pub async fn is_solved(&self) -> bool {
        self.board.read().await.is_solved()
    }

    /// Copy of the whole replica.
    pub async fn board(&self) -> Board {
        self.board.read().await.clone()
    }

    /// Push the current arrangement to the presentation layer.
    pub async fn refresh(&self) {
        let tiles = self.tiles().await;
        self.observer.display_tiles(&tiles);
    }
}

impl std::fmt::Debug for RemotePuzzle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePuzzle").finish_non_exhaustive()
    }
}
