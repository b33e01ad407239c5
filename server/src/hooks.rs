//! Collaborators injected into every game: word validation, the points
//! ledger and the two shuffles. Tests swap the shuffles for fixed orders.

use crate::ledger::PointsLedger;
use crate::words::WordList;
use rand::seq::SliceRandom;
use shared::Tile;
use std::sync::Arc;

pub type WordCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;
pub type TileShuffle = Arc<dyn Fn(&mut [Tile]) + Send + Sync>;
pub type PlayerShuffle = Arc<dyn Fn(&mut [String]) + Send + Sync>;

#[derive(Clone)]
pub struct GameHooks {
    /// Receives lower case words
    pub is_valid_word: WordCheck,
    pub ledger: Arc<dyn PointsLedger>,
    pub shuffle_tiles: TileShuffle,
    pub shuffle_players: PlayerShuffle,
}

impl GameHooks {
    /// Hooks backed by a word list and the thread-local RNG
    pub fn new(words: WordList, ledger: Arc<dyn PointsLedger>) -> Self {
        let words = Arc::new(words);
        Self::with_word_check(Arc::new(move |word: &str| words.contains(word)), ledger)
    }

    pub fn with_word_check(is_valid_word: WordCheck, ledger: Arc<dyn PointsLedger>) -> Self {
        Self {
            is_valid_word,
            ledger,
            shuffle_tiles: Arc::new(|tiles: &mut [Tile]| random_shuffle(tiles)),
            shuffle_players: Arc::new(|players: &mut [String]| random_shuffle(players)),
        }
    }

    pub fn with_shuffles(
        mut self,
        shuffle_tiles: TileShuffle,
        shuffle_players: PlayerShuffle,
    ) -> Self {
        self.shuffle_tiles = shuffle_tiles;
        self.shuffle_players = shuffle_players;
        self
    }

    /// Keeps every sequence in its given order
    pub fn without_shuffling(self) -> Self {
        self.with_shuffles(Arc::new(|_: &mut [Tile]| {}), Arc::new(|_: &mut [String]| {}))
    }
}

fn random_shuffle<T>(items: &mut [T]) {
    items.shuffle(&mut rand::thread_rng());
}
