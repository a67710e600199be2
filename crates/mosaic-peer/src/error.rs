//! Error types for mosaic-peer.

use thiserror::Error;

use crate::peer::PeerId;

/// Result type for peer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a peer.
#[derive(Debug, Error)]
pub enum Error {
    /// A remote call could not be completed: the connection was refused,
    /// timed out, or dropped before the reply arrived.
    #[error("peer {peer} is unreachable: {source}")]
    Unreachable {
        peer: PeerId,
        #[source]
        source: std::io::Error,
    },

    /// The peer answered, but nothing is exported under that name.
    #[error("no service named {name:?} at {peer}")]
    NotBound { peer: PeerId, name: String },

    /// A lock was released by a peer that does not hold it.
    #[error("lock held by {owner} cannot be released by {requester}")]
    OwnershipViolation { owner: PeerId, requester: PeerId },

    /// Joining a session failed at a required step.
    #[error("could not join via {buddy}: {reason}")]
    JoinAborted {
        buddy: PeerId,
        #[source]
        reason: Box<Error>,
    },

    /// Board rejected a local operation.
    #[error("board error: {0}")]
    Board(#[from] mosaic_board::BoardError),

    /// A remote board rejected an operation.
    #[error("board at {peer} rejected the call: {message}")]
    RemoteBoard { peer: PeerId, message: String },

    /// Malformed or unexpected wire message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session has already been left.
    #[error("peer has left the session")]
    Exited,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error means the target peer should be treated as gone.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Error::Unreachable { .. } | Error::NotBound { .. })
    }

    pub(crate) fn unreachable(peer: &PeerId, source: std::io::Error) -> Self {
        Error::Unreachable {
            peer: peer.clone(),
            source,
        }
    }
}
