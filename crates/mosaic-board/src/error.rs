//! Error types for mosaic-board.

use thiserror::Error;

use crate::Position;

/// Result type for board operations.
pub type Result<T> = std::result::Result<T, BoardError>;

/// Errors raised by the board model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    /// A board needs at least one row and one column.
    #[error("board dimensions must be non-zero, got {rows}x{columns}")]
    EmptyBoard { rows: u32, columns: u32 },

    /// The position does not lie on the board.
    #[error("position {position} is outside a {rows}x{columns} board")]
    OutOfBounds {
        position: Position,
        rows: u32,
        columns: u32,
    },

    /// Two tiles claim the same cell.
    #[error("more than one tile occupies {0}")]
    DuplicateTile(Position),

    /// The grid has more cells than can be addressed.
    #[error("a {rows}x{columns} board is too large")]
    TooLarge { rows: u64, columns: u64 },

    /// The tile list does not cover the whole grid.
    #[error("expected {expected} tiles, got {actual}")]
    IncompleteBoard { expected: usize, actual: usize },
}
