//! The tic-tac-toe example aggregate.
//!
//! `StartGame` creates an empty board. `TakeTurn` marks a free space until
//! somebody has three in a row.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tidewater_core::{
    AggregateBuilder, AggregateDefinition, Command, ConfigurationError, DomainError, Event, emit,
};

/// Aggregate type name.
pub const TIC_TAC_TOE: &str = "TicTacToe";

/// A player's mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Player {
    /// Noughts.
    O,
    /// Crosses.
    X,
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::O => f.write_str("O"),
            Self::X => f.write_str("X"),
        }
    }
}

/// A 3x3 board. `spaces[i][j]` is row `i`, column `j`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    spaces: [[Option<Player>; 3]; 3],
}

const LINES: [[(usize, usize); 3]; 8] = [
    [(0, 0), (0, 1), (0, 2)],
    [(1, 0), (1, 1), (1, 2)],
    [(2, 0), (2, 1), (2, 2)],
    [(0, 0), (1, 0), (2, 0)],
    [(0, 1), (1, 1), (2, 1)],
    [(0, 2), (1, 2), (2, 2)],
    [(0, 0), (1, 1), (2, 2)],
    [(0, 2), (1, 1), (2, 0)],
];

impl Board {
    /// Mark at row `i`, column `j`, or `None` if free or off the board.
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> Option<Player> {
        self.spaces.get(i).and_then(|row| row.get(j)).copied().flatten()
    }

    /// The player holding a full row, column or diagonal.
    #[must_use]
    pub fn winner(&self) -> Option<Player> {
        LINES.iter().find_map(|line| {
            let [a, b, c] = line.map(|(i, j)| self.spaces[i][j]);
            match (a, b, c) {
                (Some(a), Some(b), Some(c)) if a == b && b == c => Some(a),
                _ => None,
            }
        })
    }

    fn place(mut self, player: Player, i: usize, j: usize) -> Self {
        if let Some(space) = self.spaces.get_mut(i).and_then(|row| row.get_mut(j)) {
            *space = Some(player);
        }
        self
    }

    fn free_space(&self, i: i32, j: i32) -> Result<(usize, usize), DomainError> {
        let (Ok(row), Ok(column)) = (usize::try_from(i), usize::try_from(j)) else {
            return Err(DomainError::rejected(format!("Space ({i},{j}) does not exist")));
        };
        if row > 2 || column > 2 {
            return Err(DomainError::rejected(format!("Space ({i},{j}) does not exist")));
        }
        if self.spaces[row][column].is_some() {
            return Err(DomainError::rejected(format!("Space ({i},{j}) is occupied")));
        }
        Ok((row, column))
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.spaces.iter().enumerate() {
            if i > 0 {
                writeln!(f, "---+---+---")?;
            }
            let cells: Vec<String> = row
                .iter()
                .map(|space| space.map_or_else(|| " ".to_owned(), |p| p.to_string()))
                .collect();
            writeln!(f, " {} | {} | {}", cells[0], cells[1], cells[2])?;
        }
        writeln!(f)?;
        match self.winner() {
            Some(player) => write!(f, "Winner: {player}"),
            None => write!(f, "Winner: -"),
        }
    }
}

/// Creates a game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartGame;
impl Command for StartGame {}

/// Marks a space for `player`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeTurn {
    /// Who is moving.
    pub player: Player,
    /// Row, 0 to 2.
    pub i: i32,
    /// Column, 0 to 2.
    pub j: i32,
}
impl Command for TakeTurn {}

/// A game was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStarted;
impl Event for GameStarted {}

/// A space was marked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnTaken {
    /// Who moved.
    pub player: Player,
    /// Row.
    pub i: usize,
    /// Column.
    pub j: usize,
}
impl Event for TurnTaken {}

/// Builds the tic-tac-toe transition table.
///
/// # Errors
///
/// Returns `ConfigurationError` if the registrations are inconsistent.
pub fn definition() -> Result<Arc<AggregateDefinition<Board>>, ConfigurationError> {
    let definition = AggregateBuilder::<Board>::new(TIC_TAC_TOE)
        .initializing_command(|_: &StartGame| Ok(emit(GameStarted)))
        .command(|board, c: &TakeTurn| {
            if let Some(winner) = board.winner() {
                return Err(DomainError::rejected(format!(
                    "Game is over, {winner} has won"
                )));
            }
            let (i, j) = board.free_space(c.i, c.j)?;
            Ok(emit(TurnTaken {
                player: c.player,
                i,
                j,
            }))
        })
        .initializing_event(|_: &GameStarted| Board::default())
        .event(|board, e: &TurnTaken| board.place(e.player, e.i, e.j))
        .build()?;
    Ok(Arc::new(definition))
}

#[cfg(test)]
mod tests {
    use tidewater_core::Aggregate;

    use super::*;

    fn started() -> Aggregate<Board> {
        let mut game = Aggregate::new(definition().unwrap(), "g-1");
        game.apply(&GameStarted);
        game
    }

    fn take(game: &mut Aggregate<Board>, player: Player, i: i32, j: i32) -> Result<(), DomainError> {
        let events = game.handle(&TakeTurn { player, i, j })?;
        for event in &events {
            game.apply(event.as_ref());
        }
        Ok(())
    }

    #[test]
    fn test_start_game_creates_empty_board() {
        let game = Aggregate::new(definition().unwrap(), "g-1");

        let events = game.handle(&StartGame).unwrap();

        assert_eq!(events.len(), 1);
        assert!(events[0].downcast_ref::<GameStarted>().is_some());
    }

    #[test]
    fn test_turn_marks_space() {
        let mut game = started();

        take(&mut game, Player::X, 2, 0).unwrap();

        assert_eq!(game.data().unwrap().get(2, 0), Some(Player::X));
        assert_eq!(game.version(), 2);
    }

    #[test]
    fn test_space_off_the_board_is_rejected() {
        let mut game = started();

        let result = take(&mut game, Player::X, 3, -1);

        assert!(matches!(result, Err(DomainError::RejectedCommand(ref m)) if m == "Space (3,-1) does not exist"));
    }

    #[test]
    fn test_occupied_space_is_rejected() {
        let mut game = started();
        take(&mut game, Player::X, 1, 1).unwrap();

        let result = take(&mut game, Player::O, 1, 1);

        assert!(matches!(result, Err(DomainError::RejectedCommand(ref m)) if m == "Space (1,1) is occupied"));
    }

    #[test]
    fn test_diagonal_wins_and_ends_the_game() {
        // Arrange
        let mut game = started();
        take(&mut game, Player::X, 2, 0).unwrap();
        take(&mut game, Player::O, 1, 0).unwrap();
        take(&mut game, Player::X, 1, 1).unwrap();

        // Act
        take(&mut game, Player::X, 0, 2).unwrap();
        let after_win = take(&mut game, Player::O, 0, 0);

        // Assert
        assert_eq!(game.data().unwrap().winner(), Some(Player::X));
        assert!(matches!(after_win, Err(DomainError::RejectedCommand(_))));
    }

    #[test]
    fn test_board_renders_marks_and_winner() {
        let board = Board::default()
            .place(Player::X, 2, 0)
            .place(Player::O, 1, 0)
            .place(Player::X, 1, 1)
            .place(Player::X, 0, 2);

        assert_eq!(
            board.to_string(),
            "   |   | X\n---+---+---\n O | X |  \n---+---+---\n X |   |  \n\nWinner: X"
        );
    }
}
