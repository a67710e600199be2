//! Mosaic Board
//!
//! The tile board that every Mosaic peer keeps a full replica of.
//!
//! A board is a `rows × columns` grid of tiles. Each tile remembers the cell it
//! belongs in (its *home*) and the cell it currently occupies. The board is
//! solved once every tile is back home.
//!
//! The board knows nothing about peers, locks or the network: replicas stay
//! identical only because every peer applies the same swaps in the same order.

mod board;
mod error;
mod position;

pub use board::{Board, Tile};
pub use error::{BoardError, Result};
pub use position::Position;

/// Default number of board rows.
pub const DEFAULT_ROWS: u32 = 3;

/// Default number of board columns.
pub const DEFAULT_COLUMNS: u32 = 5;
