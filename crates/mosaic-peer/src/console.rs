//! Text front end for the `puzzle-peer` binary.

use std::str::FromStr;

use mosaic_board::{Board, Position, Tile};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::puzzle::BoardObserver;
use crate::selection::Selection;

/// Prints the replica to stdout whenever it changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleView;

impl BoardObserver for ConsoleView {
    fn display_tiles(&self, tiles: &[Tile]) {
        match Board::from_tiles(tiles.to_vec()) {
            Ok(board) => println!("\n{board}"),
            Err(e) => warn!(error = %e, "cannot render board"),
        }
    }

    fn display_solution(&self) {
        println!("*** Puzzle solved! ***");
    }
}

/// One line of console input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Click a tile.
    Select(Position),
    /// Swap two tiles directly.
    Swap(Position, Position),
    /// Print the board.
    Show,
    /// Print the known members.
    Peers,
    /// Leave the session.
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default();
        let numbers = words
            .map(|w| {
                w.parse::<u32>()
                    .map_err(|e| Error::InvalidConfig(format!("bad coordinate {w:?}: {e}")))
            })
            .collect::<Result<Vec<u32>>>()?;

        match (command, numbers.as_slice()) {
            ("select" | "s", [x, y]) => Ok(Self::Select(Position::new(*x, *y))),
            ("swap", [x1, y1, x2, y2]) => Ok(Self::Swap(
                Position::new(*x1, *y1),
                Position::new(*x2, *y2),
            )),
            ("show", []) => Ok(Self::Show),
            ("peers", []) => Ok(Self::Peers),
            ("quit" | "exit", []) => Ok(Self::Quit),
            _ => Err(Error::InvalidConfig(format!("unrecognised command {line:?}"))),
        }
    }
}

/// Commands the console accepts.
pub const HELP: &str = "commands: select x y | swap x1 y1 x2 y2 | show | peers | quit";

/// Read commands from `input` until `quit` or end of input.
pub async fn run<R: AsyncBufRead + Unpin>(controller: &Controller, input: R) -> Result<()> {
    let mut lines = input.lines();
    let mut selection = Selection::new();
    println!("{HELP}");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(e) => {
                println!("{e}\n{HELP}");
                continue;
            }
        };

        let pair = match command {
            ConsoleCommand::Select(position) => {
                let pair = selection.select(position);
                if pair.is_none() {
                    println!("selected {position}");
                }
                pair
            }
            ConsoleCommand::Swap(first, second) => {
                selection.clear();
                Some((first, second))
            }
            ConsoleCommand::Show => {
                println!("\n{}", controller.board().await);
                None
            }
            ConsoleCommand::Peers => {
                for peer in controller.peers().await {
                    let marker = if &peer == controller.id() { " (this peer)" } else { "" };
                    println!("{peer}{marker}");
                }
                None
            }
            ConsoleCommand::Quit => return Ok(()),
        };

        if let Some((first, second)) = pair {
            match controller.swap(first, second).await {
                Ok(report) if !report.gone.is_empty() => {
                    println!("swapped; dropped unreachable peers: {:?}", report.gone);
                }
                Ok(_) => {}
                Err(Error::Exited) => return Err(Error::Exited),
                Err(e) => println!("swap failed: {e}"),
            }
        }
    }
    Ok(())
}
