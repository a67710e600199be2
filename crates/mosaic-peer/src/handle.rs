//! Handles to services that may live in this process or in another peer.
//!
//! A handle hides the calling convention: `Local` handles call straight into
//! the object, `Remote` handles go through an [`RpcClient`]. Protocols only
//! ever talk to other peers through handles obtained from the gatekeeper.

use std::collections::HashMap;
use std::sync::Arc;

use mosaic_board::{Position, Tile};

use crate::error::Result;
use crate::gatekeeper::Gatekeeper;
use crate::peer::PeerId;
use crate::puzzle::RemotePuzzle;
use crate::rpc::{Call, RpcClient, ServiceRef};
use crate::semaphore::RemoteSemaphore;

/// Handle to a peer's semaphore.
#[derive(Clone)]
pub enum SemaphoreHandle {
    Local(Arc<RemoteSemaphore>),
    Remote { target: ServiceRef, client: RpcClient },
}

impl SemaphoreHandle {
    /// Wrap a remote reference.
    pub fn remote(target: ServiceRef, client: RpcClient) -> Self {
        Self::Remote { target, client }
    }

    /// Take the permit on behalf of `requester`. May block indefinitely.
    pub async fn acquire(&self, requester: &PeerId) -> Result<()> {
        match self {
            Self::Local(semaphore) => {
                semaphore.acquire(requester).await;
                Ok(())
            }
            Self::Remote { target, client } => {
                client
                    .call_done(
                        target,
                        Call::Acquire {
                            requester: requester.clone(),
                        },
                    )
                    .await
            }
        }
    }

    /// Give the permit back on behalf of `requester`.
    pub async fn release(&self, requester: &PeerId) -> Result<()> {
        match self {
            Self::Local(semaphore) => semaphore.release(requester).await,
            Self::Remote { target, client } => {
                client
                    .call_done(
                        target,
                        Call::Release {
                            requester: requester.clone(),
                        },
                    )
                    .await
            }
        }
    }
}

impl std::fmt::Debug for SemaphoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(_) => write!(f, "SemaphoreHandle::Local"),
            Self::Remote { target, .. } => write!(f, "SemaphoreHandle::Remote({target})"),
        }
    }
}

/// Handle to a peer's board proxy.
#[derive(Clone)]
pub enum PuzzleHandle {
    Local(Arc<RemotePuzzle>),
    Remote { target: ServiceRef, client: RpcClient },
}

impl PuzzleHandle {
    /// Wrap a remote reference.
    pub fn remote(target: ServiceRef, client: RpcClient) -> Self {
        Self::Remote { target, client }
    }

    /// Apply a swap to that peer's replica.
    pub async fn swap(&self, first: Position, second: Position) -> Result<()> {
        match self {
            Self::Local(puzzle) => puzzle.swap(first, second).await,
            Self::Remote { target, client } => {
                client.call_done(target, Call::Swap { first, second }).await
            }
        }
    }

    /// Snapshot of that peer's replica.
    pub async fn tiles(&self) -> Result<Vec<Tile>> {
        match self {
            Self::Local(puzzle) => Ok(puzzle.tiles().await),
            Self::Remote { target, client } => client.call_tiles(target, Call::GetTiles).await,
        }
    }

    /// Whether calls through this handle stay in-process.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl std::fmt::Debug for PuzzleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(_) => write!(f, "PuzzleHandle::Local"),
            Self::Remote { target, .. } => write!(f, "PuzzleHandle::Remote({target})"),
        }
    }
}

/// Handle to a peer's gatekeeper.
#[derive(Clone)]
pub enum GatekeeperHandle {
    Local(Arc<Gatekeeper>),
    Remote { target: ServiceRef, client: RpcClient },
}

impl GatekeeperHandle {
    /// The gatekeeper of `peer`: `local` if that is this process, otherwise
    /// the well-known remote service.
    pub fn of(peer: &PeerId, local: &Arc<Gatekeeper>, client: RpcClient) -> Self {
        if peer == local.id() {
            Self::Local(Arc::clone(local))
        } else {
            Self::Remote {
                target: ServiceRef::gatekeeper(peer.clone()),
                client,
            }
        }
    }

    /// Remote view of that peer's board proxies.
    pub async fn remote_puzzles(&self) -> Result<HashMap<PeerId, ServiceRef>> {
        match self {
            Self::Local(gatekeeper) => Ok(gatekeeper.remote_view().await.boards().clone()),
            Self::Remote { target, client } => {
                client.call_refs(target, Call::GetRemotePuzzles).await
            }
        }
    }

    /// Remote view of that peer's semaphores.
    pub async fn remote_semaphores(&self) -> Result<HashMap<PeerId, ServiceRef>> {
        match self {
            Self::Local(gatekeeper) => Ok(gatekeeper.remote_view().await.locks().clone()),
            Self::Remote { target, client } => {
                client.call_refs(target, Call::GetRemoteSemaphores).await
            }
        }
    }

    /// Record a peer in that gatekeeper.
    pub async fn register_peer(
        &self,
        peer: &PeerId,
        puzzle: &ServiceRef,
        semaphore: &ServiceRef,
    ) -> Result<()> {
        match self {
            Self::Local(gatekeeper) => {
                gatekeeper
                    .register_peer(peer.clone(), puzzle.clone(), semaphore.clone())
                    .await;
                Ok(())
            }
            Self::Remote { target, client } => {
                client
                    .call_done(
                        target,
                        Call::RegisterPeer {
                            peer: peer.clone(),
                            puzzle: puzzle.clone(),
                            semaphore: semaphore.clone(),
                        },
                    )
                    .await
            }
        }
    }

    /// Forget the given peers in that gatekeeper.
    pub async fn unregister_peers(&self, peers: &[PeerId]) -> Result<()> {
        match self {
            Self::Local(gatekeeper) => {
                gatekeeper.unregister_peers(peers).await;
                Ok(())
            }
            Self::Remote { target, client } => {
                client
                    .call_done(
                        target,
                        Call::UnregisterPeers {
                            peers: peers.to_vec(),
                        },
                    )
                    .await
            }
        }
    }
}

impl std::fmt::Debug for GatekeeperHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(_) => write!(f, "GatekeeperHandle::Local"),
            Self::Remote { target, .. } => write!(f, "GatekeeperHandle::Remote({target})"),
        }
    }
}
