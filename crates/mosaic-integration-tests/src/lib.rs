//! Helpers for multi-peer scenario tests.
//!
//! Every peer runs in the test process on `127.0.0.1` with an ephemeral port.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mosaic_board::{Board, Tile};
use mosaic_peer::{BoardObserver, Controller, NoopObserver, PeerConfig, PeerId};

/// Config for a local test peer.
pub fn local_config() -> PeerConfig {
    PeerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        connect_timeout: Duration::from_secs(1),
        ..PeerConfig::default()
    }
}

/// Observer that remembers what it was shown.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    last: Mutex<Option<Vec<Tile>>>,
    refreshes: AtomicUsize,
    solved: AtomicBool,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Tiles from the most recent refresh.
    pub fn last_tiles(&self) -> Option<Vec<Tile>> {
        self.last.lock().ok().and_then(|last| last.clone())
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn saw_solution(&self) -> bool {
        self.solved.load(Ordering::SeqCst)
    }
}

impl BoardObserver for RecordingObserver {
    fn display_tiles(&self, tiles: &[Tile]) {
        if let Ok(mut last) = self.last.lock() {
            *last = Some(tiles.to_vec());
        }
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }

    fn display_solution(&self) {
        self.solved.store(true, Ordering::SeqCst);
    }
}

/// Found a session on a solved board of the given size.
pub async fn founder(rows: u32, columns: u32) -> Controller {
    let board = Board::solved(rows, columns).expect("valid dimensions");
    Controller::found_with(&local_config(), board, Arc::new(NoopObserver))
        .await
        .expect("founder starts")
}

/// Join the session of `buddy`.
pub async fn joiner(buddy: &PeerId) -> Controller {
    Controller::join(&local_config(), buddy, Arc::new(NoopObserver))
        .await
        .expect("peer joins")
}

/// Join the session of `buddy`, reporting to `observer`.
pub async fn observed_joiner(buddy: &PeerId, observer: Arc<RecordingObserver>) -> Controller {
    Controller::join(&local_config(), buddy, observer)
        .await
        .expect("peer joins")
}

/// Sorted identities of `peers`.
pub fn ids(peers: &[&Controller]) -> Vec<PeerId> {
    let mut ids: Vec<PeerId> = peers.iter().map(|p| p.id().clone()).collect();
    ids.sort();
    ids
}
