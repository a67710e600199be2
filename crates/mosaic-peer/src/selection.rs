//! Two-click tile selection.

use mosaic_board::Position;

/// Pending first click of a swap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    first: Option<Position>,
}

impl Selection {
    /// Create an empty selection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently selected position, if any.
    pub fn current(&self) -> Option<Position> {
        self.first
    }

    /// Register a click on `position`.
    ///
    /// The first click only selects. A second click on a different position
    /// returns the pair to swap and clears the selection; a second click on
    /// the same position keeps it selected.
    pub fn select(&mut self, position: Position) -> Option<(Position, Position)> {
        match self.first {
            Some(first) if first != position => {
                self.first = None;
                Some((first, position))
            }
            Some(_) => None,
            None => {
                self.first = Some(position);
                None
            }
        }
    }

    /// Drop any pending selection.
    pub fn clear(&mut self) {
        self.first = None;
    }
}
