//! RPC server: accepts connections and dispatches calls to exported services.
//!
//! Every inbound connection gets its own task, so a caller blocked on a
//! semaphore never holds up anyone else.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::peer::PeerId;
use crate::registry::{Registry, Service};
use crate::rpc::{Call, RemoteError, Request, Response};

/// A bound listener, not yet serving.
#[derive(Debug)]
pub struct RpcServer {
    id: PeerId,
    listener: TcpListener,
}

impl RpcServer {
    /// Bind to `host:port`.
    ///
    /// With port `0` the OS picks a free port; the returned server's
    /// [`id`](Self::id) carries the port actually bound.
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let bound = listener.local_addr()?.port();
        let id = PeerId::new(host, bound);
        info!(peer = %id, "RPC server bound");
        Ok(Self { id, listener })
    }

    /// Identity of the peer this server answers for.
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Local socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve `registry` on a background task until the task is aborted.
    pub fn spawn(self, registry: Arc<Registry>) -> JoinHandle<()> {
        tokio::spawn(self.run(registry))
    }

    /// Accept connections forever.
    ///
    /// Connection tasks are owned by this future: dropping it closes every
    /// open connection, including callers blocked in `acquire`.
    pub async fn run(self, registry: Arc<Registry>) {
        info!(peer = %self.id, "RPC server listening");
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let registry = Arc::clone(&registry);
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, registry).await {
                                debug!(%addr, error = %e, "RPC connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept RPC connection: {}", e);
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, registry: Arc<Registry>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let parsed = serde_json::from_str::<Request>(&line);
        line.clear();

        match parsed {
            Ok(Request {
                service,
                call: Call::Acquire { requester },
            }) => {
                serve_acquire(&registry, &service, requester, &mut reader, &mut writer).await?;
            }
            Ok(request) => {
                let response = dispatch(&registry, request).await;
                send(&mut writer, &response).await?;
            }
            Err(e) => {
                let response = Response::Error {
                    error: RemoteError::InvalidRequest {
                        message: format!("Invalid request: {}", e),
                    },
                };
                send(&mut writer, &response).await?;
            }
        }
    }

    Ok(())
}

/// Execute every call except `acquire`.
async fn dispatch(registry: &Registry, request: Request) -> Response {
    let service = match registry.lookup(&request.service).await {
        Ok(service) => service,
        Err(e) => return failure(&e),
    };

    match (service, request.call) {
        (Service::Gatekeeper(gatekeeper), Call::GetRemotePuzzles) => Response::Refs {
            entries: gatekeeper.remote_view().await.boards().clone().into_iter().collect(),
        },
        (Service::Gatekeeper(gatekeeper), Call::GetRemoteSemaphores) => Response::Refs {
            entries: gatekeeper.remote_view().await.locks().clone().into_iter().collect(),
        },
        (
            Service::Gatekeeper(gatekeeper),
            Call::RegisterPeer {
                peer,
                puzzle,
                semaphore,
            },
        ) => {
            gatekeeper.register_peer(peer, puzzle, semaphore).await;
            Response::Done
        }
        (Service::Gatekeeper(gatekeeper), Call::UnregisterPeers { peers }) => {
            gatekeeper.unregister_peers(&peers).await;
            Response::Done
        }
        (Service::Puzzle(puzzle), Call::Swap { first, second }) => {
            match puzzle.swap(first, second).await {
                Ok(()) => Response::Done,
                Err(e) => failure(&e),
            }
        }
        (Service::Puzzle(puzzle), Call::GetTiles) => Response::Tiles {
            tiles: puzzle.tiles().await,
        },
        (Service::Semaphore(semaphore), Call::Release { requester }) => {
            match semaphore.release(&requester).await {
                Ok(()) => Response::Done,
                Err(e) => {
                    warn!(%requester, error = %e, "rejected semaphore release");
                    failure(&e)
                }
            }
        }
        (service, call) => Response::Error {
            error: RemoteError::InvalidRequest {
                message: format!("{} does not support {}", service.kind(), call.method()),
            },
        },
    }
}

/// Grant the semaphore to `requester`, or give up if the caller hangs up first.
///
/// A permit granted to a caller that can no longer be told about it is
/// released again, so a vanished peer never ends up owning a lock.
async fn serve_acquire(
    registry: &Registry,
    service: &str,
    requester: crate::peer::PeerId,
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
) -> Result<()> {
    let semaphore = match registry.lookup(service).await {
        Ok(Service::Semaphore(semaphore)) => semaphore,
        Ok(other) => {
            let response = Response::Error {
                error: RemoteError::InvalidRequest {
                    message: format!("{} does not support acquire", other.kind()),
                },
            };
            return send(writer, &response).await;
        }
        Err(e) => return send(writer, &failure(&e)).await,
    };

    tokio::select! {
        () = semaphore.acquire(&requester) => {}
        () = hang_up(reader) => {
            debug!(%requester, "caller hung up while waiting for the semaphore");
            return Ok(());
        }
    }

    if let Err(e) = send(writer, &Response::Done).await {
        warn!(%requester, error = %e, "could not deliver semaphore grant, releasing it");
        if let Err(e) = semaphore.release(&requester).await {
            error!(%requester, error = %e, "failed to release undelivered grant");
        }
        return Err(e);
    }
    Ok(())
}

/// Completes once the other end closes the connection.
async fn hang_up(reader: &mut BufReader<OwnedReadHalf>) {
    match reader.fill_buf().await {
        // A well-behaved caller sends nothing while waiting.
        Ok(buf) if !buf.is_empty() => std::future::pending().await,
        _ => {}
    }
}

async fn send(writer: &mut OwnedWriteHalf, response: &Response) -> Result<()> {
    let json = serde_json::to_string(response)? + "\n";
    writer.write_all(json.as_bytes()).await?;
    Ok(())
}

fn failure(e: &Error) -> Response {
    Response::Error { error: e.into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatekeeper::Gatekeeper;
    use crate::puzzle::{NoopObserver, RemotePuzzle};
    use crate::rpc::{RpcClient, ServiceRef, GATEKEEPER};
    use crate::semaphore::{LockState, RemoteSemaphore};
    use mosaic_board::{Board, Position};
    use std::time::Duration;

    struct Fixture {
        id: PeerId,
        registry: Arc<Registry>,
        server: JoinHandle<()>,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.server.abort();
        }
    }

    async fn serve() -> Fixture {
        let server = RpcServer::bind("127.0.0.1", 0).await.unwrap();
        let id = server.id().clone();
        let registry = Arc::new(Registry::new(id.clone()));
        let server = server.spawn(Arc::clone(&registry));
        Fixture {
            id,
            registry,
            server,
        }
    }

    #[tokio::test]
    async fn bind_reports_ephemeral_port() {
        let server = RpcServer::bind("127.0.0.1", 0).await.unwrap();
        assert_ne!(server.id().port(), 0);
        assert_eq!(server.id().port(), server.local_addr().unwrap().port());
    }

    #[tokio::test]
    async fn serves_semaphore_calls() {
        let fx = serve().await;
        let semaphore = Arc::new(RemoteSemaphore::new());
        let target = fx
            .registry
            .export(Service::Semaphore(Arc::clone(&semaphore)))
            .await;
        let client = RpcClient::default();
        let alice = PeerId::new("alice", 1);
        let bob = PeerId::new("bob", 1);

        client
            .call_done(&target, Call::Acquire { requester: alice.clone() })
            .await
            .unwrap();
        assert_eq!(semaphore.owner().await, Some(alice.clone()));

        let err = client
            .call_done(&target, Call::Release { requester: bob })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OwnershipViolation { .. }), "got {err:?}");

        client
            .call_done(&target, Call::Release { requester: alice })
            .await
            .unwrap();
        assert_eq!(semaphore.state().await, LockState::Free);
    }

    #[tokio::test]
    async fn serves_puzzle_calls() {
        let fx = serve().await;
        let puzzle = Arc::new(RemotePuzzle::new(Board::solved(3, 5).unwrap(), Arc::new(NoopObserver)));
        let target = fx.registry.export(Service::Puzzle(Arc::clone(&puzzle))).await;
        let client = RpcClient::default();

        let first = Position::new(0, 0);
        let second = Position::new(1, 0);
        client
            .call_done(&target, Call::Swap { first, second })
            .await
            .unwrap();

        let tiles = client.call_tiles(&target, Call::GetTiles).await.unwrap();
        assert_eq!(tiles, puzzle.tiles().await);
        assert!(!puzzle.is_solved().await);

        let err = client
            .call_done(
                &target,
                Call::Swap {
                    first,
                    second: Position::new(7, 7),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteBoard { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn serves_gatekeeper_calls() {
        let fx = serve().await;
        let puzzle = Arc::new(RemotePuzzle::new(Board::solved(2, 2).unwrap(), Arc::new(NoopObserver)));
        let gatekeeper = Arc::new(
            Gatekeeper::founder(
                fx.id.clone(),
                puzzle,
                Arc::new(RemoteSemaphore::new()),
                &fx.registry,
                RpcClient::default(),
            )
            .await,
        );
        fx.registry
            .bind(GATEKEEPER, Service::Gatekeeper(Arc::clone(&gatekeeper)))
            .await;

        let client = RpcClient::default();
        let target = ServiceRef::gatekeeper(fx.id.clone());
        let other = PeerId::new("other", 7);
        client
            .call_done(
                &target,
                Call::RegisterPeer {
                    peer: other.clone(),
                    puzzle: ServiceRef::new(other.clone(), "puzzle-0"),
                    semaphore: ServiceRef::new(other.clone(), "semaphore-1"),
                },
            )
            .await
            .unwrap();

        let boards = client.call_refs(&target, Call::GetRemotePuzzles).await.unwrap();
        let locks = client.call_refs(&target, Call::GetRemoteSemaphores).await.unwrap();
        assert_eq!(boards.len(), 2);
        assert_eq!(locks[&other].name, "semaphore-1");

        client
            .call_done(&target, Call::UnregisterPeers { peers: vec![other.clone()] })
            .await
            .unwrap();
        assert_eq!(gatekeeper.peers().await, vec![fx.id.clone()]);
    }

    #[tokio::test]
    async fn unknown_service_is_not_bound() {
        let fx = serve().await;
        let client = RpcClient::default();
        let err = client
            .call_done(&ServiceRef::new(fx.id.clone(), "missing"), Call::GetTiles)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotBound { .. }), "got {err:?}");
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn wrong_method_for_service_is_rejected() {
        let fx = serve().await;
        let target = fx
            .registry
            .export(Service::Semaphore(Arc::new(RemoteSemaphore::new())))
            .await;
        let err = RpcClient::default()
            .call_tiles(&target, Call::GetTiles)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn abandoned_acquire_is_not_granted() {
        let fx = serve().await;
        let semaphore = Arc::new(RemoteSemaphore::new());
        let target = fx
            .registry
            .export(Service::Semaphore(Arc::clone(&semaphore)))
            .await;
        let owner = PeerId::new("owner", 1);
        semaphore.acquire(&owner).await;

        // A caller that gives up while waiting.
        let client = RpcClient::default();
        let waiting = client.call_done(
            &target,
            Call::Acquire {
                requester: PeerId::new("quitter", 2),
            },
        );
        assert!(tokio::time::timeout(Duration::from_millis(100), waiting)
            .await
            .is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        semaphore.release(&owner).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(semaphore.state().await, LockState::Free);
    }
}
