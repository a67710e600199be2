//! The join, swap and leave protocols.
//!
//! Each protocol takes the locks of every known peer in ascending
//! [`PeerId`] order before touching shared state, and gives them back
//! before returning, whatever happened in between. A peer that fails a call
//! while a protocol runs is "gone": it is dropped from the working set and
//! pruned from every surviving directory.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use mosaic_board::{Board, Position};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::gatekeeper::{Gatekeeper, RemoteView};
use crate::handle::{GatekeeperHandle, PuzzleHandle, SemaphoreHandle};
use crate::peer::{acquisition_order, PeerId};
use crate::puzzle::{BoardObserver, RemotePuzzle};
use crate::registry::{Registry, Service};
use crate::rpc::{RpcClient, ServiceRef, GATEKEEPER};
use crate::semaphore::RemoteSemaphore;

/// Locks taken by one protocol run.
#[derive(Debug)]
struct Held {
    requester: PeerId,
    locks: Vec<(PeerId, SemaphoreHandle)>,
}

impl Held {
    /// Take every lock in `locks` for `requester`, lowest peer first.
    ///
    /// Peers whose lock cannot be reached are added to `gone` and skipped.
    async fn acquire_all(
        requester: &PeerId,
        locks: &HashMap<PeerId, SemaphoreHandle>,
        gone: &mut BTreeSet<PeerId>,
    ) -> Self {
        let mut held = Vec::with_capacity(locks.len());
        for (peer, lock) in acquisition_order(locks) {
            if gone.contains(&peer) {
                continue;
            }
            debug!(%peer, "acquiring lock");
            match lock.acquire(requester).await {
                Ok(()) => held.push((peer, lock)),
                Err(e) => {
                    warn!(%peer, error = %e, "lock unavailable, marking peer gone");
                    gone.insert(peer);
                }
            }
        }
        Self {
            requester: requester.clone(),
            locks: held,
        }
    }

    /// Give every lock back. Failures are logged and otherwise ignored.
    async fn release_all(self) {
        for (peer, lock) in self.locks {
            if let Err(e) = lock.release(&self.requester).await {
                warn!(%peer, error = %e, "could not release lock");
            }
        }
    }
}

/// Tell every peer in `targets` to forget the peers in `gone`.
async fn broadcast_unregister(
    gatekeeper: &Arc<Gatekeeper>,
    client: RpcClient,
    targets: &[PeerId],
    gone: &BTreeSet<PeerId>,
) {
    if gone.is_empty() {
        return;
    }
    let peers: Vec<PeerId> = gone.iter().cloned().collect();
    for target in targets.iter().filter(|t| !gone.contains(t)) {
        let handle = GatekeeperHandle::of(target, gatekeeper, client);
        if let Err(e) = handle.unregister_peers(&peers).await {
            warn!(peer = %target, error = %e, "could not propagate unregistration");
        }
    }
}

/// Result of a propagated swap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapReport {
    /// Replicas that applied the swap, this peer's included.
    pub replicas: usize,
    /// Peers pruned because they failed a call.
    pub gone: Vec<PeerId>,
}

/// What a successful join hands to the controller.
#[derive(Debug)]
pub(crate) struct Joined {
    pub gatekeeper: Arc<Gatekeeper>,
    pub puzzle: Arc<RemotePuzzle>,
}

/// Start a new session with `board` as the only replica.
pub(crate) async fn found(
    id: &PeerId,
    board: Board,
    observer: Arc<dyn BoardObserver>,
    registry: &Registry,
    client: RpcClient,
) -> Joined {
    let puzzle = Arc::new(RemotePuzzle::new(board, observer));
    let gatekeeper = Arc::new(
        Gatekeeper::founder(
            id.clone(),
            Arc::clone(&puzzle),
            Arc::new(RemoteSemaphore::new()),
            registry,
            client,
        )
        .await,
    );
    registry
        .bind(GATEKEEPER, Service::Gatekeeper(Arc::clone(&gatekeeper)))
        .await;
    info!(peer = %id, "founded session");
    Joined { gatekeeper, puzzle }
}

/// Join the session `buddy` belongs to.
///
/// Fails with [`Error::JoinAborted`] if the buddy's directory or every
/// candidate replica is unreachable. Locks taken before the failure are
/// released first.
pub(crate) async fn join(
    id: &PeerId,
    buddy: &PeerId,
    observer: Arc<dyn BoardObserver>,
    registry: &Registry,
    client: RpcClient,
) -> Result<Joined> {
    let aborted = |reason: Error| Error::JoinAborted {
        buddy: buddy.clone(),
        reason: Box::new(reason),
    };
    let directory = GatekeeperHandle::Remote {
        target: ServiceRef::gatekeeper(buddy.clone()),
        client,
    };

    debug!(%buddy, "fetching lock map");
    let mut lock_refs = directory.remote_semaphores().await.map_err(aborted)?;
    // A previous incarnation at the same address may still be listed. The
    // board map is intersected with this one, so dropping it here is enough.
    if lock_refs.remove(id).is_some() {
        info!(peer = %id, "replacing stale entry for this address");
    }
    let locks: HashMap<PeerId, SemaphoreHandle> = lock_refs
        .iter()
        .map(|(peer, lock)| (peer.clone(), SemaphoreHandle::remote(lock.clone(), client)))
        .collect();

    let mut gone = BTreeSet::new();
    let held = Held::acquire_all(id, &locks, &mut gone).await;

    match join_locked(id, buddy, observer, registry, client, &directory, lock_refs, &mut gone).await {
        Ok(joined) => {
            held.release_all().await;
            info!(peer = %id, %buddy, members = joined.gatekeeper.peers().await.len(), "joined session");
            Ok(joined)
        }
        Err(e) => {
            held.release_all().await;
            registry.clear().await;
            Err(aborted(e))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn join_locked(
    id: &PeerId,
    buddy: &PeerId,
    observer: Arc<dyn BoardObserver>,
    registry: &Registry,
    client: RpcClient,
    directory: &GatekeeperHandle,
    lock_refs: HashMap<PeerId, ServiceRef>,
    gone: &mut BTreeSet<PeerId>,
) -> Result<Joined> {
    debug!(%buddy, "re-fetching board map");
    let board_refs = directory.remote_puzzles().await?;
    let known = RemoteView::from_maps(lock_refs, board_refs).without(gone);

    let board = fetch_replica(buddy, &known, client, gone).await?;
    let known = known.without(gone);

    let puzzle = Arc::new(RemotePuzzle::new(board, observer));
    let gatekeeper = Arc::new(
        Gatekeeper::join(
            id.clone(),
            Arc::clone(&puzzle),
            Arc::new(RemoteSemaphore::new()),
            registry,
            client,
            known,
        )
        .await,
    );
    registry
        .bind(GATEKEEPER, Service::Gatekeeper(Arc::clone(&gatekeeper)))
        .await;

    let own = gatekeeper.remote_view().await;
    let (puzzle_ref, semaphore_ref) = match (own.boards().get(id), own.locks().get(id)) {
        (Some(puzzle), Some(semaphore)) => (puzzle.clone(), semaphore.clone()),
        _ => return Err(Error::Protocol(format!("{id} missing from its own directory"))),
    };

    let members: Vec<PeerId> = own.peers().into_iter().filter(|p| p != id).collect();
    for peer in &members {
        debug!(%peer, "registering with peer");
        let handle = GatekeeperHandle::of(peer, &gatekeeper, client);
        if let Err(e) = handle.register_peer(id, &puzzle_ref, &semaphore_ref).await {
            warn!(%peer, error = %e, "registration failed, marking peer gone");
            gone.insert(peer.clone());
        }
    }

    if !gone.is_empty() {
        let pruned: Vec<PeerId> = gone.iter().cloned().collect();
        gatekeeper.unregister_peers(&pruned).await;
        broadcast_unregister(&gatekeeper, client, &members, gone).await;
    }

    puzzle.refresh().await;
    Ok(Joined { gatekeeper, puzzle })
}

/// Copy a replica from `known`, preferring the buddy's and then the lowest peer's.
async fn fetch_replica(
    buddy: &PeerId,
    known: &RemoteView,
    client: RpcClient,
    gone: &mut BTreeSet<PeerId>,
) -> Result<Board> {
    let mut candidates = known.peers();
    if let Some(i) = candidates.iter().position(|p| p == buddy) {
        let preferred = candidates.remove(i);
        candidates.insert(0, preferred);
    }

    let mut last = None;
    for peer in candidates {
        let Some(target) = known.boards().get(&peer) else {
            continue;
        };
        debug!(%peer, "copying replica");
        match PuzzleHandle::remote(target.clone(), client).tiles().await {
            Ok(tiles) => return Ok(Board::from_tiles(tiles)?),
            Err(e) => {
                warn!(%peer, error = %e, "replica unavailable, marking peer gone");
                gone.insert(peer);
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| Error::Protocol("no replica left to copy".to_string())))
}

/// Apply a swap to every reachable replica.
///
/// Positions are checked against the local replica before any lock is
/// taken. A failure of the local replica itself aborts the run.
pub(crate) async fn swap(
    gatekeeper: &Arc<Gatekeeper>,
    puzzle: &RemotePuzzle,
    client: RpcClient,
    first: Position,
    second: Position,
) -> Result<SwapReport> {
    {
        let board = puzzle.board().await;
        board.check(first)?;
        board.check(second)?;
    }

    let id = gatekeeper.id();
    let view = gatekeeper.local_view().await;
    let mut gone = BTreeSet::new();
    let held = Held::acquire_all(id, view.locks(), &mut gone).await;

    let mut replicas = 0;
    for (peer, board) in acquisition_order(view.boards()) {
        if gone.contains(&peer) {
            continue;
        }
        match board.swap(first, second).await {
            Ok(()) => replicas += 1,
            Err(e) if board.is_local() => {
                held.release_all().await;
                return Err(e);
            }
            Err(e) => {
                warn!(%peer, error = %e, "swap failed, marking peer gone");
                gone.insert(peer);
            }
        }
    }

    if !gone.is_empty() {
        let pruned: Vec<PeerId> = gone.iter().cloned().collect();
        gatekeeper.unregister_peers(&pruned).await;
        let survivors: Vec<PeerId> = view.peers().into_iter().filter(|p| p != id).collect();
        broadcast_unregister(gatekeeper, client, &survivors, &gone).await;
    }

    held.release_all().await;
    debug!(%first, %second, replicas, gone = gone.len(), "swap propagated");
    Ok(SwapReport {
        replicas,
        gone: gone.into_iter().collect(),
    })
}

/// Remove this peer from every reachable directory.
pub(crate) async fn leave(gatekeeper: &Arc<Gatekeeper>, client: RpcClient) {
    let id = gatekeeper.id();
    let view = gatekeeper.local_view().await;
    let mut gone = BTreeSet::new();
    let held = Held::acquire_all(id, view.locks(), &mut gone).await;

    gone.insert(id.clone());
    broadcast_unregister(gatekeeper, client, &view.peers(), &gone).await;

    held.release_all().await;
    info!(peer = %id, "left session");
}
