//! Per-player tile board: the unplaced pile and the sparse grid of placed tiles
//!
//! A board is owned by exactly one game and only ever touched from that
//! game's message loop. Every mutating operation either applies fully or
//! returns an error without changing anything, so the game never has to
//! roll back a half-applied move.

use crate::error::BoardError;
use shared::{BoardSnapshot, Tile, TileId, TilePosition, MIN_GRID_SIZE};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct Board {
    /// Tiles held but not on the grid
    unplaced: HashMap<TileId, Tile>,
    /// Receive order of unplaced tiles, kept for stable client rendering
    unplaced_order: Vec<TileId>,
    /// Placed tiles by id
    placed: HashMap<TileId, TilePosition>,
    /// x -> y -> tile
    by_location: HashMap<i32, HashMap<i32, Tile>>,
    num_rows: usize,
    num_cols: usize,
}

impl Board {
    /// Creates an empty board with the given grid bounds
    ///
    /// Both dimensions must be at least `MIN_GRID_SIZE`.
    pub fn new(num_rows: usize, num_cols: usize) -> Result<Self, BoardError> {
        if num_rows < MIN_GRID_SIZE || num_cols < MIN_GRID_SIZE {
            return Err(BoardError::GridTooSmall {
                rows: num_rows,
                cols: num_cols,
                min: MIN_GRID_SIZE,
            });
        }

        Ok(Self {
            unplaced: HashMap::new(),
            unplaced_order: Vec::new(),
            placed: HashMap::new(),
            by_location: HashMap::new(),
            num_rows,
            num_cols,
        })
    }

    pub fn owns(&self, id: TileId) -> bool {
        self.unplaced.contains_key(&id) || self.placed.contains_key(&id)
    }

    pub fn unplaced_count(&self) -> usize {
        self.unplaced.len()
    }

    pub fn placed_count(&self) -> usize {
        self.placed.len()
    }

    pub fn tile_count(&self) -> usize {
        self.unplaced.len() + self.placed.len()
    }

    /// Adds a tile to the unplaced pile
    pub fn add_tile(&mut self, tile: Tile) -> Result<(), BoardError> {
        if self.owns(tile.id) {
            return Err(BoardError::AlreadyOwned(tile.id));
        }
        self.unplaced.insert(tile.id, tile);
        self.unplaced_order.push(tile.id);
        Ok(())
    }

    /// Removes a tile from wherever the board currently holds it
    pub fn remove_tile(&mut self, id: TileId) -> Result<Tile, BoardError> {
        if let Some(tile) = self.unplaced.remove(&id) {
            self.unplaced_order.retain(|other| *other != id);
            return Ok(tile);
        }

        match self.placed.remove(&id) {
            Some(position) => {
                self.clear_location(position.x, position.y);
                Ok(position.tile)
            }
            None => Err(BoardError::NotOwned(id)),
        }
    }

    /// Removes every tile, returning them in receive order followed by placed tiles
    pub fn drain_tiles(&mut self) -> Vec<Tile> {
        let mut tiles: Vec<Tile> = self
            .unplaced_order
            .drain(..)
            .filter_map(|id| self.unplaced.remove(&id))
            .collect();
        let mut placed: Vec<TilePosition> = self.placed.drain().map(|(_, p)| p).collect();
        placed.sort_by_key(|p| p.tile.id);
        tiles.extend(placed.into_iter().map(|p| p.tile));
        self.by_location.clear();
        tiles
    }

    /// Moves tiles onto (or around) the grid in one step
    ///
    /// Each position names a tile the board owns and its target cell. The
    /// whole batch is validated before anything changes: every tile must be
    /// owned and appear once, targets must be distinct, inside the grid, and
    /// not occupied by a placed tile that is not itself being moved. Tiles not
    /// mentioned keep their current positions.
    pub fn move_tiles(&mut self, positions: &[TilePosition]) -> Result<(), BoardError> {
        let mut moved_ids = HashSet::with_capacity(positions.len());
        let mut targets = HashSet::with_capacity(positions.len());

        for position in positions {
            let id = position.tile.id;
            if !self.owns(id) {
                return Err(BoardError::NotOwned(id));
            }
            if !moved_ids.insert(id) {
                return Err(BoardError::DuplicateTile(id));
            }
            if !self.in_bounds(position.x, position.y) {
                return Err(BoardError::OutOfBounds {
                    x: position.x,
                    y: position.y,
                });
            }
            if !targets.insert((position.x, position.y)) {
                return Err(BoardError::DuplicatePosition {
                    x: position.x,
                    y: position.y,
                });
            }
        }

        for position in positions {
            if let Some(occupant) = self.tile_at(position.x, position.y) {
                if !moved_ids.contains(&occupant.id) {
                    return Err(BoardError::PositionTaken {
                        x: position.x,
                        y: position.y,
                    });
                }
            }
        }

        // Validated; lift every moved tile first so swaps between moved tiles work
        let mut lifted = Vec::with_capacity(positions.len());
        for position in positions {
            let id = position.tile.id;
            let tile = match self.unplaced.remove(&id) {
                Some(tile) => {
                    self.unplaced_order.retain(|other| *other != id);
                    tile
                }
                None => match self.placed.remove(&id) {
                    Some(old) => {
                        self.clear_location(old.x, old.y);
                        old.tile
                    }
                    None => return Err(BoardError::NotOwned(id)),
                },
            };
            lifted.push(TilePosition::new(tile, position.x, position.y));
        }

        for position in lifted {
            self.by_location
                .entry(position.x)
                .or_default()
                .insert(position.y, position.tile);
            self.placed.insert(position.tile.id, position);
        }

        Ok(())
    }

    /// True iff placed tiles exist and form one horizontally/vertically connected group
    pub fn has_single_used_group(&self) -> bool {
        let start = match self.placed.values().next() {
            Some(position) => (position.x, position.y),
            None => return false,
        };

        let mut seen = HashSet::with_capacity(self.placed.len());
        let mut queue = VecDeque::new();
        seen.insert(start);
        queue.push_back(start);

        while let Some((x, y)) = queue.pop_front() {
            for neighbour in [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)] {
                if self.tile_at(neighbour.0, neighbour.1).is_some() && seen.insert(neighbour) {
                    queue.push_back(neighbour);
                }
            }
        }

        seen.len() == self.placed.len()
    }

    /// Every horizontal and vertical run of two or more adjacent tiles
    ///
    /// Rows are read left to right and columns top to bottom (increasing
    /// coordinates). Rows come first, ordered by y, then columns ordered by x.
    pub fn used_tile_words(&self) -> Vec<String> {
        let mut rows: BTreeMap<i32, BTreeMap<i32, char>> = BTreeMap::new();
        let mut cols: BTreeMap<i32, BTreeMap<i32, char>> = BTreeMap::new();
        for position in self.placed.values() {
            rows.entry(position.y)
                .or_default()
                .insert(position.x, position.tile.letter);
            cols.entry(position.x)
                .or_default()
                .insert(position.y, position.tile.letter);
        }

        let mut words = Vec::new();
        for line in rows.values().chain(cols.values()) {
            collect_runs(line, &mut words);
        }
        words
    }

    /// Copy of the board for sending to its owner
    pub fn snapshot(&self) -> BoardSnapshot {
        let unplaced = self
            .unplaced_order
            .iter()
            .filter_map(|id| self.unplaced.get(id).copied())
            .collect();
        let mut placed: Vec<TilePosition> = self.placed.values().copied().collect();
        placed.sort_by_key(|p| (p.y, p.x));
        BoardSnapshot { unplaced, placed }
    }

    fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.num_cols && (y as usize) < self.num_rows
    }

    fn tile_at(&self, x: i32, y: i32) -> Option<&Tile> {
        self.by_location.get(&x).and_then(|column| column.get(&y))
    }

    fn clear_location(&mut self, x: i32, y: i32) {
        if let Some(column) = self.by_location.get_mut(&x) {
            column.remove(&y);
            if column.is_empty() {
                self.by_location.remove(&x);
            }
        }
    }
}

/// Splits one sorted line of letters into gap-free runs, keeping runs of length >= 2
fn collect_runs(line: &BTreeMap<i32, char>, words: &mut Vec<String>) {
    let mut current = String::new();
    let mut last: Option<i32> = None;

    for (&coord, &letter) in line {
        if last.map_or(false, |prev| prev + 1 != coord) {
            if current.chars().count() >= 2 {
                words.push(std::mem::take(&mut current));
            }
            current.clear();
        }
        current.push(letter);
        last = Some(coord);
    }

    if current.chars().count() >= 2 {
        words.push(current);
    }
}
