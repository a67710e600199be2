//! Wire protocol and client for peer-to-peer calls.
//!
//! Every call is one request line and one reply line of JSON on a fresh TCP
//! connection. The request names the exported service it is meant for:
//!
//! ```text
//! → {"service":"semaphore-1","call":{"method":"acquire","requester":{"host":"a","port":9000}}}
//! ← {"status":"done"}
//! ```
//!
//! A connection stays open for as long as the call takes, so a blocked
//! `acquire` simply holds its connection until the permit is granted.

use std::collections::HashMap;
use std::time::Duration;

use mosaic_board::{Position, Tile};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::error::{Error, Result};
use crate::peer::PeerId;

/// Well-known name every peer exports its gatekeeper under.
pub const GATEKEEPER: &str = "Gatekeeper";

/// Default time allowed for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Address of one exported service: which peer, and under which name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceRef {
    pub peer: PeerId,
    pub name: String,
}

impl ServiceRef {
    /// Create a new reference.
    pub fn new(peer: PeerId, name: impl Into<String>) -> Self {
        Self {
            peer,
            name: name.into(),
        }
    }

    /// The gatekeeper of `peer`.
    pub fn gatekeeper(peer: PeerId) -> Self {
        Self::new(peer, GATEKEEPER)
    }
}

impl std::fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.peer, self.name)
    }
}

/// A call addressed to a named service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub service: String,
    pub call: Call,
}

/// Remotely invocable methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Call {
    // Gatekeeper
    GetRemotePuzzles,
    GetRemoteSemaphores,
    RegisterPeer {
        peer: PeerId,
        puzzle: ServiceRef,
        semaphore: ServiceRef,
    },
    UnregisterPeers {
        peers: Vec<PeerId>,
    },

    // Board proxy
    Swap {
        first: Position,
        second: Position,
    },
    GetTiles,

    // Semaphore
    Acquire {
        requester: PeerId,
    },
    Release {
        requester: PeerId,
    },
}

impl Call {
    /// Method name, for logs and error messages.
    pub fn method(&self) -> &'static str {
        match self {
            Call::GetRemotePuzzles => "get_remote_puzzles",
            Call::GetRemoteSemaphores => "get_remote_semaphores",
            Call::RegisterPeer { .. } => "register_peer",
            Call::UnregisterPeers { .. } => "unregister_peers",
            Call::Swap { .. } => "swap",
            Call::GetTiles => "get_tiles",
            Call::Acquire { .. } => "acquire",
            Call::Release { .. } => "release",
        }
    }
}

/// Reply to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// The call completed and has no result.
    Done,
    /// Peer → service map, sent as a list of entries.
    Refs { entries: Vec<(PeerId, ServiceRef)> },
    /// Board snapshot.
    Tiles { tiles: Vec<Tile> },
    /// The call failed on the remote side.
    Error { error: RemoteError },
}

/// Failures reported by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteError {
    OwnershipViolation { owner: PeerId, requester: PeerId },
    NotBound { name: String },
    InvalidRequest { message: String },
    Board { message: String },
}

impl RemoteError {
    /// Turn a reply from `peer` back into a local error.
    pub fn into_error(self, peer: &PeerId) -> Error {
        match self {
            RemoteError::OwnershipViolation { owner, requester } => {
                Error::OwnershipViolation { owner, requester }
            }
            RemoteError::NotBound { name } => Error::NotBound {
                peer: peer.clone(),
                name,
            },
            RemoteError::InvalidRequest { message } => {
                Error::Protocol(format!("{peer} rejected the request: {message}"))
            }
            RemoteError::Board { message } => Error::RemoteBoard {
                peer: peer.clone(),
                message,
            },
        }
    }
}

impl From<&Error> for RemoteError {
    fn from(e: &Error) -> Self {
        match e {
            Error::OwnershipViolation { owner, requester } => RemoteError::OwnershipViolation {
                owner: owner.clone(),
                requester: requester.clone(),
            },
            Error::NotBound { name, .. } => RemoteError::NotBound { name: name.clone() },
            Error::Board(e) => RemoteError::Board {
                message: e.to_string(),
            },
            other => RemoteError::InvalidRequest {
                message: other.to_string(),
            },
        }
    }
}

/// Issues calls to other peers.
#[derive(Debug, Clone, Copy)]
pub struct RpcClient {
    connect_timeout: Duration,
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl RpcClient {
    /// Create a client with the given connect timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Send `call` to `target` and wait for the reply.
    ///
    /// Remote failures come back as the matching [`Error`]; transport failures
    /// as [`Error::Unreachable`].
    pub async fn call(&self, target: &ServiceRef, call: Call) -> Result<Response> {
        let peer = &target.peer;
        let method = call.method();
        trace!(%target, method, "calling");

        let stream = match timeout(
            self.connect_timeout,
            TcpStream::connect((peer.host(), peer.port())),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::unreachable(peer, e)),
            Err(_) => {
                return Err(Error::unreachable(
                    peer,
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
                ))
            }
        };

        let (reader, mut writer) = stream.into_split();
        let request = Request {
            service: target.name.clone(),
            call,
        };
        let line = serde_json::to_string(&request)? + "\n";
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::unreachable(peer, e))?;

        // The write half stays open until the reply arrives: the server reads
        // a hang-up as the caller giving up.
        let mut reader = BufReader::new(reader);
        let mut reply = String::new();
        let read = reader
            .read_line(&mut reply)
            .await
            .map_err(|e| Error::unreachable(peer, e))?;
        drop(writer);
        if read == 0 {
            return Err(Error::unreachable(
                peer,
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before reply",
                ),
            ));
        }

        let response: Response = serde_json::from_str(&reply)
            .map_err(|e| Error::Protocol(format!("malformed reply from {peer} to {method}: {e}")))?;
        match response {
            Response::Error { error } => Err(error.into_error(peer)),
            other => Ok(other),
        }
    }

    /// Call a method that returns nothing.
    pub async fn call_done(&self, target: &ServiceRef, call: Call) -> Result<()> {
        match self.call(target, call).await? {
            Response::Done => Ok(()),
            other => Err(unexpected(target, &other)),
        }
    }

    /// Call a method that returns a peer → service map.
    pub async fn call_refs(
        &self,
        target: &ServiceRef,
        call: Call,
    ) -> Result<HashMap<PeerId, ServiceRef>> {
        match self.call(target, call).await? {
            Response::Refs { entries } => Ok(entries.into_iter().collect()),
            other => Err(unexpected(target, &other)),
        }
    }

    /// Call a method that returns a board snapshot.
    pub async fn call_tiles(&self, target: &ServiceRef, call: Call) -> Result<Vec<Tile>> {
        match self.call(target, call).await? {
            Response::Tiles { tiles } => Ok(tiles),
            other => Err(unexpected(target, &other)),
        }
    }
}

fn unexpected(target: &ServiceRef, response: &Response) -> Error {
    Error::Protocol(format!("unexpected reply from {target}: {response:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn request_wire_format() {
        let request = Request {
            service: "semaphore-1".into(),
            call: Call::Acquire {
                requester: PeerId::new("a", 9000),
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "service": "semaphore-1",
                "call": {"method": "acquire", "requester": {"host": "a", "port": 9000}}
            })
        );
    }

    #[test]
    fn error_reply_wire_format() {
        let response = Response::Error {
            error: RemoteError::NotBound {
                name: "puzzle-7".into(),
            },
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(
            json,
            r#"{"status":"error","error":{"kind":"not_bound","name":"puzzle-7"}}"#
        );
        assert_eq!(serde_json::from_str::<Response>(&json).unwrap(), response);
    }

    #[test]
    fn remote_errors_map_back_to_local_errors() {
        let peer = PeerId::new("b", 1);
        let violation = RemoteError::OwnershipViolation {
            owner: PeerId::new("a", 1),
            requester: peer.clone(),
        };
        assert!(matches!(
            violation.into_error(&peer),
            Error::OwnershipViolation { .. }
        ));

        let unbound = RemoteError::NotBound { name: "x".into() }.into_error(&peer);
        assert!(unbound.is_unreachable());
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = RpcClient::new(Duration::from_millis(500));
        let target = ServiceRef::gatekeeper(PeerId::new("127.0.0.1", port));
        let err = client.call(&target, Call::GetRemotePuzzles).await.unwrap_err();
        assert!(err.is_unreachable(), "got {err:?}");
    }

    #[tokio::test]
    async fn hang_up_before_reply_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            // Drop without replying.
        });

        let client = RpcClient::default();
        let target = ServiceRef::gatekeeper(PeerId::new("127.0.0.1", port));
        let err = client.call(&target, Call::GetTiles).await.unwrap_err();
        assert!(err.is_unreachable(), "got {err:?}");
    }

    #[tokio::test]
    async fn garbage_reply_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            writer.write_all(b"not json\n").await.unwrap();
        });

        let client = RpcClient::default();
        let target = ServiceRef::gatekeeper(PeerId::new("127.0.0.1", port));
        let err = client.call(&target, Call::GetTiles).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got {err:?}");
    }
}
