//! Grid positions.

use serde::{Deserialize, Serialize};

/// A cell on the board.
///
/// `x` is the column and `y` the row, both zero-based. Positions order by
/// column first, then by row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    /// Column index
    pub x: u32,
    /// Row index
    pub y: u32,
}

impl Position {
    /// Create a new position.
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Row-major index of this position on a board with `columns` columns.
    pub const fn index(&self, columns: u32) -> usize {
        (self.y as usize) * (columns as usize) + self.x as usize
    }

    /// Inverse of [`index`](Self::index).
    pub const fn from_index(index: usize, columns: u32) -> Self {
        let columns = columns as usize;
        Self {
            x: (index % columns) as u32,
            y: (index / columns) as u32,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}
