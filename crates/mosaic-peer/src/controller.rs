//! Per-peer session orchestration.
//!
//! A [`Controller`] owns the RPC server and a single worker task. Swap and
//! leave requests are queued to the worker, so protocols started on the same
//! peer never overlap.

use std::sync::Arc;

use mosaic_board::{Board, Position, Tile};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info};

use crate::config::PeerConfig;
use crate::error::{Error, Result};
use crate::gatekeeper::Gatekeeper;
use crate::peer::PeerId;
use crate::protocol::{self, Joined, SwapReport};
use crate::puzzle::{BoardObserver, RemotePuzzle};
use crate::registry::Registry;
use crate::rpc::RpcClient;
use crate::server::RpcServer;

/// Lifecycle of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Bound, but not yet part of a session.
    Unjoined,
    /// Member of a session.
    Active,
    /// Left the session or stopped.
    Exited,
}

enum Command {
    Swap {
        first: Position,
        second: Position,
        reply: oneshot::Sender<Result<SwapReport>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running peer.
#[derive(Debug)]
pub struct Controller {
    id: PeerId,
    gatekeeper: Arc<Gatekeeper>,
    puzzle: Arc<RemotePuzzle>,
    commands: mpsc::Sender<Command>,
    state: Arc<watch::Sender<SessionState>>,
    server: AbortHandle,
    worker: JoinHandle<()>,
}

impl Controller {
    /// Found a session, or join `config.buddy` if one is set.
    pub async fn start(config: &PeerConfig, observer: Arc<dyn BoardObserver>) -> Result<Self> {
        match &config.buddy {
            Some(buddy) => Self::join(config, buddy, observer).await,
            None => Self::found(config, observer).await,
        }
    }

    /// Start a new session with a freshly scrambled board.
    pub async fn found(config: &PeerConfig, observer: Arc<dyn BoardObserver>) -> Result<Self> {
        let board = Board::shuffled(config.rows, config.columns, &mut rand::thread_rng())?;
        Self::found_with(config, board, observer).await
    }

    /// Start a new session with `board` as the initial arrangement.
    pub async fn found_with(
        config: &PeerConfig,
        board: Board,
        observer: Arc<dyn BoardObserver>,
    ) -> Result<Self> {
        let (server, registry, state) = bind(config).await?;
        let client = config.client();
        let joined = protocol::found(server.id(), board, observer, &registry, client).await;
        joined.puzzle.refresh().await;
        Ok(Self::activate(server, registry, client, joined, state))
    }

    /// Join the session `buddy` belongs to.
    pub async fn join(
        config: &PeerConfig,
        buddy: &PeerId,
        observer: Arc<dyn BoardObserver>,
    ) -> Result<Self> {
        let (server, registry, state) = bind(config).await?;
        let client = config.client();
        let id = server.id().clone();

        // Serve from the start: other peers may call in before the join ends.
        let server = server.spawn(Arc::clone(&registry));
        match protocol::join(&id, buddy, observer, &registry, client).await {
            Ok(joined) => Ok(Self::spawn_worker(id, server, registry, client, joined, state)),
            Err(e) => {
                server.abort();
                info!(peer = %id, %buddy, error = %e, "join failed");
                Err(e)
            }
        }
    }

    fn activate(
        server: RpcServer,
        registry: Arc<Registry>,
        client: RpcClient,
        joined: Joined,
        state: watch::Sender<SessionState>,
    ) -> Self {
        let id = server.id().clone();
        let server = server.spawn(Arc::clone(&registry));
        Self::spawn_worker(id, server, registry, client, joined, state)
    }

    fn spawn_worker(
        id: PeerId,
        server: JoinHandle<()>,
        registry: Arc<Registry>,
        client: RpcClient,
        joined: Joined,
        state: watch::Sender<SessionState>,
    ) -> Self {
        let server = server.abort_handle();
        let (commands, queue) = mpsc::channel(32);
        state.send_replace(SessionState::Active);
        let state = Arc::new(state);

        let worker = Worker {
            gatekeeper: Arc::clone(&joined.gatekeeper),
            puzzle: Arc::clone(&joined.puzzle),
            registry,
            client,
            server: server.clone(),
            state: Arc::clone(&state),
        };
        let worker = tokio::spawn(worker.run(queue));
        info!(peer = %id, "peer active");

        Self {
            id,
            gatekeeper: joined.gatekeeper,
            puzzle: joined.puzzle,
            commands,
            state,
            server,
            worker,
        }
    }

    /// This peer's identity.
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes lifecycle changes, including the final `Exited`.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// This peer's membership directory.
    pub fn gatekeeper(&self) -> &Arc<Gatekeeper> {
        &self.gatekeeper
    }

    /// Known members, in ascending order.
    pub async fn peers(&self) -> Vec<PeerId> {
        self.gatekeeper.peers().await
    }

    /// Snapshot of the local replica.
    pub async fn tiles(&self) -> Vec<Tile> {
        self.puzzle.tiles().await
    }

    /// Copy of the local replica.
    pub async fn board(&self) -> Board {
        self.puzzle.board().await
    }

    /// Swap two positions on every reachable replica.
    pub async fn swap(&self, first: Position, second: Position) -> Result<SwapReport> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Swap {
                first,
                second,
                reply,
            })
            .await
            .map_err(|_| Error::Exited)?;
        response.await.map_err(|_| Error::Exited)?
    }

    /// Leave the session and stop serving.
    pub async fn leave(self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Leave { reply })
            .await
            .map_err(|_| Error::Exited)?;
        response.await.map_err(|_| Error::Exited)
    }

    /// Stop immediately without telling anyone, as if the process died.
    pub fn abort(self) {
        info!(peer = %self.id, "aborting peer");
        // Drop does the rest.
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.worker.abort();
        self.server.abort();
        self.state.send_replace(SessionState::Exited);
    }
}

struct Worker {
    gatekeeper: Arc<Gatekeeper>,
    puzzle: Arc<RemotePuzzle>,
    registry: Arc<Registry>,
    client: RpcClient,
    server: AbortHandle,
    state: Arc<watch::Sender<SessionState>>,
}

impl Worker {
    async fn run(self, mut queue: mpsc::Receiver<Command>) {
        while let Some(command) = queue.recv().await {
            match command {
                Command::Swap {
                    first,
                    second,
                    reply,
                } => {
                    debug!(%first, %second, "running swap");
                    let result =
                        protocol::swap(&self.gatekeeper, &self.puzzle, self.client, first, second)
                            .await;
                    let _ = reply.send(result);
                }
                Command::Leave { reply } => {
                    protocol::leave(&self.gatekeeper, self.client).await;
                    self.registry.clear().await;
                    self.server.abort();
                    self.state.send_replace(SessionState::Exited);
                    let _ = reply.send(());
                    return;
                }
            }
        }
    }
}

async fn bind(
    config: &PeerConfig,
) -> Result<(RpcServer, Arc<Registry>, watch::Sender<SessionState>)> {
    let server = RpcServer::bind(&config.host, config.port).await?;
    let registry = Arc::new(Registry::new(server.id().clone()));
    let (state, _) = watch::channel(SessionState::Unjoined);
    Ok((server, registry, state))
}
