use serde::{Deserialize, Serialize};
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;

pub const MIN_GRID_SIZE: usize = 10;
pub const DEFAULT_NUM_ROWS: usize = 32;
pub const DEFAULT_NUM_COLS: usize = 32;
pub const DEFAULT_MAX_PLAYERS: usize = 8;
pub const DEFAULT_STARTING_TILES: usize = 21;

pub const INITIAL_WIN_POINTS: u32 = 10;
pub const MIN_WIN_POINTS: u32 = 2;
pub const LOSER_POINTS: u32 = 1;
pub const SWAP_DRAW_COUNT: usize = 3;

/// Upper bound on a single encoded frame, in bytes
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Standard 144 tile letter distribution
pub const STANDARD_LETTERS: [(char, usize); 26] = [
    ('A', 13),
    ('B', 3),
    ('C', 3),
    ('D', 6),
    ('E', 18),
    ('F', 3),
    ('G', 4),
    ('H', 3),
    ('I', 12),
    ('J', 2),
    ('K', 2),
    ('L', 5),
    ('M', 3),
    ('N', 8),
    ('O', 11),
    ('P', 3),
    ('Q', 2),
    ('R', 9),
    ('S', 6),
    ('T', 9),
    ('U', 6),
    ('V', 3),
    ('W', 3),
    ('X', 2),
    ('Y', 3),
    ('Z', 2),
];

pub type GameId = u32;
pub type TileId = u32;

/// Expands the standard distribution into one letter per tile
pub fn standard_letters() -> String {
    STANDARD_LETTERS
        .iter()
        .flat_map(|&(letter, count)| std::iter::repeat(letter).take(count))
        .collect()
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    pub id: TileId,
    pub letter: char,
}

impl Tile {
    pub fn new(id: TileId, letter: char) -> Self {
        Self {
            id,
            letter: letter.to_ascii_uppercase(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct TilePosition {
    pub tile: Tile,
    pub x: i32,
    pub y: i32,
}

impl TilePosition {
    pub fn new(tile: Tile, x: i32, y: i32) -> Self {
        Self { tile, x, y }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameStatus {
    NotStarted,
    InProgress,
    Finished,
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameStatus::NotStarted => "not started",
            GameStatus::InProgress => "in progress",
            GameStatus::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Severity of a notice sent to a single player
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Retryable or penalized, the request was well formed
    Warning,
    /// Malformed request or unknown target
    Error,
}

/// Public description of a game, as shown in the lobby list
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GameInfo {
    pub id: GameId,
    pub status: GameStatus,
    pub players: Vec<String>,
    /// Milliseconds since the unix epoch
    pub created_at: u64,
    pub can_join: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct BoardSnapshot {
    /// Unplaced tiles in the order they were received
    pub unplaced: Vec<Tile>,
    pub placed: Vec<TilePosition>,
}

/// Packets sent from a player to the server
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum ClientPacket {
    Hello {
        username: String,
        client_version: u32,
    },
    CreateGame,
    ListGames,
    Join {
        game_id: GameId,
    },
    Leave {
        game_id: GameId,
    },
    DeleteGame {
        game_id: GameId,
    },
    Snag {
        game_id: GameId,
    },
    Swap {
        game_id: GameId,
        tiles: Vec<Tile>,
    },
    MoveTiles {
        game_id: GameId,
        positions: Vec<TilePosition>,
    },
    SetStatus {
        game_id: GameId,
        status: GameStatus,
    },
    Chat {
        game_id: GameId,
        message: String,
    },
}

/// Packets sent from the server to a player
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum ServerPacket {
    Connected {
        username: String,
    },
    GameList {
        games: Vec<GameInfo>,
    },
    GameJoined {
        game_id: GameId,
        status: GameStatus,
        board: BoardSnapshot,
        players: Vec<String>,
        tiles_left: usize,
    },
    PlayerJoined {
        game_id: GameId,
        player: String,
        players: Vec<String>,
        tiles_left: usize,
    },
    PlayerLeft {
        game_id: GameId,
        player: String,
        players: Vec<String>,
        tiles_left: usize,
    },
    Snagged {
        game_id: GameId,
        snagger: String,
        tile: Option<Tile>,
        tiles_left: usize,
    },
    Swapped {
        game_id: GameId,
        swapper: String,
        tiles: Vec<Tile>,
        tiles_left: usize,
    },
    StatusChanged {
        game_id: GameId,
        status: GameStatus,
        changed_by: String,
    },
    Winner {
        game_id: GameId,
        winner: String,
        word_count: usize,
        points: u32,
    },
    Chat {
        game_id: GameId,
        line: String,
    },
    Notice {
        game_id: Option<GameId>,
        level: NoticeLevel,
        message: String,
    },
    GameDeleted {
        game_id: GameId,
        reason: String,
    },
    Disconnected {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_letters_count() {
        let letters = standard_letters();
        assert_eq!(letters.chars().count(), 144);
        assert_eq!(letters.chars().filter(|c| *c == 'E').count(), 18);
        assert!(letters.chars().all(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn test_tile_is_upper_case() {
        let tile = Tile::new(7, 'q');
        assert_eq!(tile.id, 7);
        assert_eq!(tile.letter, 'Q');
    }

    #[test]
    fn test_packet_serialization_move_tiles() {
        let packet = ClientPacket::MoveTiles {
            game_id: 3,
            positions: vec![
                TilePosition::new(Tile::new(1, 'A'), 4, 5),
                TilePosition::new(Tile::new(2, 'B'), 5, 5),
            ],
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: ClientPacket = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            ClientPacket::MoveTiles { game_id, positions } => {
                assert_eq!(game_id, 3);
                assert_eq!(positions.len(), 2);
                assert_eq!(positions[1].tile.letter, 'B');
                assert_eq!((positions[1].x, positions[1].y), (5, 5));
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_game_list() {
        let packet = ServerPacket::GameList {
            games: vec![GameInfo {
                id: 1,
                status: GameStatus::InProgress,
                players: vec!["a".to_string(), "b".to_string()],
                created_at: 1234567890,
                can_join: false,
            }],
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: ServerPacket = bincode::deserialize(&serialized).unwrap();
        assert_eq!(deserialized, packet);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(GameStatus::NotStarted.to_string(), "not started");
        assert_eq!(GameStatus::Finished.to_string(), "finished");
    }
}
