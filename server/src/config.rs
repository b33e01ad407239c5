//! Lobby and game limits

use shared::{
    standard_letters, DEFAULT_MAX_PLAYERS, DEFAULT_NUM_COLS, DEFAULT_NUM_ROWS,
    DEFAULT_STARTING_TILES,
};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GameConfig {
    /// One tile per letter, shuffled at game creation
    pub tile_letters: String,
    pub max_players: usize,
    /// Tiles dealt to each player on joining
    pub starting_tiles: usize,
    pub num_rows: usize,
    pub num_cols: usize,
    /// A game with no activity for a whole period is deleted
    pub idle_timeout: Duration,
    /// Bound of each game's inbound queue
    pub inbox_capacity: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tile_letters: standard_letters(),
            max_players: DEFAULT_MAX_PLAYERS,
            starting_tiles: DEFAULT_STARTING_TILES,
            num_rows: DEFAULT_NUM_ROWS,
            num_cols: DEFAULT_NUM_COLS,
            idle_timeout: Duration::from_secs(15 * 60),
            inbox_capacity: 64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LobbyConfig {
    pub max_games: usize,
    pub max_sockets: usize,
    /// Bound of the lobby's inbound queue
    pub inbox_capacity: usize,
    /// Packets held for a connection whose client is not reading; overflowing it drops the client
    pub connection_queue: usize,
    pub game: GameConfig,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            max_games: 64,
            max_sockets: 256,
            inbox_capacity: 1024,
            connection_queue: 256,
            game: GameConfig::default(),
        }
    }
}
