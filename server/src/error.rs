//! Error taxonomy for boards, games and the lobby

use shared::{GameId, GameStatus, NoticeLevel, TileId};

/// Rejections from a single player's board. A failed call leaves the board untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    #[error("grid must be at least {min}x{min}, got {rows}x{cols}")]
    GridTooSmall { rows: usize, cols: usize, min: usize },

    #[error("tile {0} is already on this board")]
    AlreadyOwned(TileId),

    #[error("tile {0} is not on this board")]
    NotOwned(TileId),

    #[error("tile {0} is moved more than once")]
    DuplicateTile(TileId),

    #[error("two tiles are moved to ({x}, {y})")]
    DuplicatePosition { x: i32, y: i32 },

    #[error("position ({x}, {y}) is already taken")]
    PositionTaken { x: i32, y: i32 },

    #[error("position ({x}, {y}) is off the board")]
    OutOfBounds { x: i32, y: i32 },
}

/// Why a finish attempt was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FinishFailure {
    #[error("the draw pile still has {0} tiles")]
    PileNotEmpty(usize),

    #[error("{0} tiles are not placed yet")]
    UnplacedTiles(usize),

    #[error("placed tiles do not form a single group")]
    NotSingleGroup,

    #[error("invalid words: {}", .0.join(", "))]
    InvalidWords(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("game is full ({0} players)")]
    GameFull(usize),

    #[error("not enough tiles left to seat a player ({available} < {needed})")]
    InsufficientTiles { available: usize, needed: usize },

    #[error("game is not in progress")]
    NotInProgress,

    #[error("the draw pile is empty")]
    EmptyPile,

    #[error("swap exactly one tile that you own")]
    InvalidSwapRequest,

    #[error("cannot change status from {from} to {to}")]
    InvalidTransition { from: GameStatus, to: GameStatus },

    #[error("you are not playing in this game")]
    NotAPlayer,

    #[error("game has already started")]
    NotJoinable,

    #[error("cannot finish: {0}")]
    FinishRejected(#[from] FinishFailure),

    #[error(transparent)]
    Board(#[from] BoardError),
}

impl GameError {
    /// Soft warnings are retryable or penalized; errors mean the request itself was wrong
    pub fn level(&self) -> NoticeLevel {
        match self {
            GameError::EmptyPile | GameError::FinishRejected(_) | GameError::Board(_) => {
                NoticeLevel::Warning
            }
            _ => NoticeLevel::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    #[error("lobby is full ({0} connections)")]
    LobbyFull(usize),

    #[error("too many games ({0})")]
    TooManyGames(usize),

    #[error("no game with id {0}")]
    NoSuchGame(GameId),

    #[error("lobby is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Game(#[from] GameError),
}

impl LobbyError {
    pub fn level(&self) -> NoticeLevel {
        match self {
            LobbyError::LobbyFull(_) | LobbyError::TooManyGames(_) => NoticeLevel::Warning,
            LobbyError::Game(e) => e.level(),
            _ => NoticeLevel::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = GameError::InvalidTransition {
            from: GameStatus::Finished,
            to: GameStatus::InProgress,
        };
        assert_eq!(
            err.to_string(),
            "cannot change status from finished to in progress"
        );

        let err = GameError::from(FinishFailure::InvalidWords(vec![
            "QZ".to_string(),
            "XX".to_string(),
        ]));
        assert_eq!(err.to_string(), "cannot finish: invalid words: QZ, XX");

        let err = GameError::from(BoardError::OutOfBounds { x: -1, y: 3 });
        assert_eq!(err.to_string(), "position (-1, 3) is off the board");
    }

    #[test]
    fn test_notice_levels() {
        assert_eq!(GameError::EmptyPile.level(), NoticeLevel::Warning);
        assert_eq!(
            GameError::FinishRejected(FinishFailure::NotSingleGroup).level(),
            NoticeLevel::Warning
        );
        assert_eq!(GameError::NotAPlayer.level(), NoticeLevel::Error);
        assert_eq!(GameError::InvalidSwapRequest.level(), NoticeLevel::Error);
        assert_eq!(LobbyError::TooManyGames(4).level(), NoticeLevel::Warning);
        assert_eq!(LobbyError::NoSuchGame(4).level(), NoticeLevel::Error);
        assert_eq!(
            LobbyError::from(GameError::EmptyPile).level(),
            NoticeLevel::Warning
        );
    }

    #[test]
    fn test_errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GameError>();
        assert_send_sync::<LobbyError>();
    }
}
