//! Tiles and the board replica.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{BoardError, Result};
use crate::Position;

/// One piece of the picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tile {
    /// The cell this tile belongs in.
    pub home: Position,
    /// The cell this tile currently occupies.
    pub current: Position,
}

impl Tile {
    /// Create a new tile.
    pub const fn new(home: Position, current: Position) -> Self {
        Self { home, current }
    }

    /// Whether the tile sits in its home cell.
    pub fn is_in_place(&self) -> bool {
        self.home == self.current
    }
}

/// A full replica of the puzzle board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    rows: u32,
    columns: u32,
    tiles: Vec<Tile>,
}

impl Board {
    /// A board with every tile already home.
    pub fn solved(rows: u32, columns: u32) -> Result<Self> {
        let cells = cell_count(rows, columns)?;
        let tiles = (0..cells)
            .map(|i| {
                let p = Position::from_index(i, columns);
                Tile::new(p, p)
            })
            .collect();
        Ok(Self {
            rows,
            columns,
            tiles,
        })
    }

    /// A board whose tiles are placed in random cells.
    ///
    /// Tiles are laid out in row-major order of their current cell; the home
    /// cells are a random permutation of the grid.
    pub fn shuffled<R: Rng + ?Sized>(rows: u32, columns: u32, rng: &mut R) -> Result<Self> {
        let cells = cell_count(rows, columns)?;
        let mut homes: Vec<Position> = (0..cells).map(|i| Position::from_index(i, columns)).collect();
        homes.shuffle(rng);
        let tiles = homes
            .into_iter()
            .enumerate()
            .map(|(i, home)| Tile::new(home, Position::from_index(i, columns)))
            .collect();
        Ok(Self {
            rows,
            columns,
            tiles,
        })
    }

    /// Rebuild a replica from a snapshot taken from another peer.
    ///
    /// The dimensions are inferred from the furthest occupied cell. Every cell
    /// of the inferred grid must be occupied by exactly one tile.
    pub fn from_tiles(tiles: Vec<Tile>) -> Result<Self> {
        let columns = tiles.iter().map(|t| u64::from(t.current.x) + 1).max().unwrap_or(0);
        let rows = tiles.iter().map(|t| u64::from(t.current.y) + 1).max().unwrap_or(0);
        let (rows, columns) = match (u32::try_from(rows), u32::try_from(columns)) {
            (Ok(r), Ok(c)) => (r, c),
            _ => return Err(BoardError::TooLarge { rows, columns }),
        };

        let expected = cell_count(rows, columns)?;
        if tiles.len() != expected {
            return Err(BoardError::IncompleteBoard {
                expected,
                actual: tiles.len(),
            });
        }

        let mut occupied = vec![false; expected];
        for tile in &tiles {
            let idx = tile.current.index(columns);
            if occupied[idx] {
                return Err(BoardError::DuplicateTile(tile.current));
            }
            occupied[idx] = true;
        }

        Ok(Self {
            rows,
            columns,
            tiles,
        })
    }

    /// Number of rows.
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Number of columns.
    pub fn columns(&self) -> u32 {
        self.columns
    }

    /// Snapshot of the tiles, in replica order.
    pub fn tiles(&self) -> Vec<Tile> {
        self.tiles.clone()
    }

    /// Whether `position` lies on this board.
    pub fn contains(&self, position: Position) -> bool {
        position.x < self.columns && position.y < self.rows
    }

    /// Fail with [`BoardError::OutOfBounds`] unless `position` lies on the board.
    pub fn check(&self, position: Position) -> Result<()> {
        if self.contains(position) {
            Ok(())
        } else {
            Err(BoardError::OutOfBounds {
                position,
                rows: self.rows,
                columns: self.columns,
            })
        }
    }

    /// Exchange the tiles currently at `first` and `second`.
    ///
    /// Swapping a cell with itself leaves the board untouched.
    pub fn swap(&mut self, first: Position, second: Position) -> Result<()> {
        self.check(first)?;
        self.check(second)?;
        if first == second {
            return Ok(());
        }

        let a = self.tile_at(first)?;
        let b = self.tile_at(second)?;
        self.tiles[a].current = second;
        self.tiles[b].current = first;
        Ok(())
    }

    /// Whether every tile is home.
    pub fn is_solved(&self) -> bool {
        self.tiles.iter().all(Tile::is_in_place)
    }

    /// The tile occupying `position`, if any.
    pub fn get(&self, position: Position) -> Option<&Tile> {
        self.tiles.iter().find(|t| t.current == position)
    }

    fn tile_at(&self, position: Position) -> Result<usize> {
        // An in-bounds cell is always occupied: construction checks coverage.
        self.tiles
            .iter()
            .position(|t| t.current == position)
            .ok_or(BoardError::OutOfBounds {
                position,
                rows: self.rows,
                columns: self.columns,
            })
    }
}

/// Renders the grid as the home index of each tile, row by row.
impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = self.rows.saturating_mul(self.columns).saturating_sub(1).to_string().len();
        for y in 0..self.rows {
            for x in 0..self.columns {
                if x > 0 {
                    write!(f, " ")?;
                }
                match self.get(Position::new(x, y)) {
                    Some(tile) => write!(f, "{:>width$}", tile.home.index(self.columns))?,
                    None => write!(f, "{:>width$}", "?")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Number of cells of a `rows × columns` grid.
fn cell_count(rows: u32, columns: u32) -> Result<usize> {
    if rows == 0 || columns == 0 {
        return Err(BoardError::EmptyBoard { rows, columns });
    }
    rows.checked_mul(columns)
        .map(|cells| cells as usize)
        .ok_or(BoardError::TooLarge {
            rows: rows.into(),
            columns: columns.into(),
        })
}
