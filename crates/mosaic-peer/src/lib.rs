//! Mosaic Peer
//!
//! One participant in a shared sliding-tile session. Every peer keeps a full
//! replica of the board and applies each swap only after holding the lock of
//! every known peer, taken in ascending [`PeerId`] order.
//!
//! # Architecture
//!
//! ```text
//!   Controller ──(mpsc)──► worker: join / swap / leave
//!        │                     │
//!        ▼                     ▼
//!   Gatekeeper ──handles──► SemaphoreHandle / PuzzleHandle
//!        ▲                     │ Local: direct call
//!        │                     │ Remote: RpcClient ──TCP──► RpcServer ─► Registry
//!   RpcServer (one task per connection)
//! ```
//!
//! Peers that fail a call during a protocol are pruned from every surviving
//! directory. Nothing is retried.

pub mod config;
pub mod console;
pub mod controller;
pub mod error;
pub mod gatekeeper;
pub mod handle;
pub mod peer;
pub mod protocol;
pub mod puzzle;
pub mod registry;
pub mod rpc;
pub mod selection;
pub mod semaphore;
pub mod server;

pub use config::PeerConfig;
pub use console::{ConsoleCommand, ConsoleView};
pub use controller::{Controller, SessionState};
pub use error::{Error, Result};
pub use gatekeeper::{Gatekeeper, LocalView, MembershipView, RemoteView};
pub use handle::{GatekeeperHandle, PuzzleHandle, SemaphoreHandle};
pub use peer::{acquisition_order, PeerId};
pub use protocol::SwapReport;
pub use puzzle::{BoardObserver, NoopObserver, RemotePuzzle};
pub use registry::{Registry, Service};
pub use rpc::{RpcClient, ServiceRef, GATEKEEPER};
pub use selection::Selection;
pub use semaphore::{LockState, RemoteSemaphore};
pub use server::RpcServer;
