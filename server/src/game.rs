//! Game actor: one task per match, owning the draw pile and every player's board
//!
//! All state changes happen inside `Game::run`, one command at a time. The
//! lobby talks to a game only through its `GameHandle`, and the game answers
//! only through `GameOutput` messages sent back to the lobby.

use crate::board::Board;
use crate::config::GameConfig;
use crate::error::{FinishFailure, GameError};
use crate::hooks::{GameHooks, WordCheck};
use crate::utils::get_timestamp;
use log::{debug, error, info, warn};
use shared::{
    ClientPacket, GameId, GameInfo, GameStatus, ServerPacket, Tile, TilePosition,
    INITIAL_WIN_POINTS, LOSER_POINTS, MIN_WIN_POINTS, SWAP_DRAW_COUNT,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Things a player can ask a game to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameAction {
    /// Takes a seat, or re-sends the full state to a seated player
    Join,
    Leave,
    Delete,
    Snag,
    Swap { tiles: Vec<Tile> },
    MoveTiles { positions: Vec<TilePosition> },
    SetStatus { status: GameStatus },
    Chat { message: String },
}

impl GameAction {
    /// Splits a game-addressed client packet into its target and action
    pub fn from_packet(packet: ClientPacket) -> Option<(GameId, GameAction)> {
        let routed = match packet {
            ClientPacket::Join { game_id } => (game_id, GameAction::Join),
            ClientPacket::Leave { game_id } => (game_id, GameAction::Leave),
            ClientPacket::DeleteGame { game_id } => (game_id, GameAction::Delete),
            ClientPacket::Snag { game_id } => (game_id, GameAction::Snag),
            ClientPacket::Swap { game_id, tiles } => (game_id, GameAction::Swap { tiles }),
            ClientPacket::MoveTiles { game_id, positions } => {
                (game_id, GameAction::MoveTiles { positions })
            }
            ClientPacket::SetStatus { game_id, status } => {
                (game_id, GameAction::SetStatus { status })
            }
            ClientPacket::Chat { game_id, message } => (game_id, GameAction::Chat { message }),
            ClientPacket::Hello { .. } | ClientPacket::CreateGame | ClientPacket::ListGames => {
                return None
            }
        };
        Some(routed)
    }
}

/// Messages from the lobby into a game's inbox
#[derive(Debug)]
pub enum GameCommand {
    Action {
        player: String,
        action: GameAction,
    },
    /// Read-only query used to build the lobby's game list
    Infos {
        player: String,
        reply: oneshot::Sender<GameInfo>,
    },
}

/// Messages from a game back to the lobby
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameOutput {
    Send { player: String, packet: ServerPacket },
    Deleted { game_id: GameId, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Flow {
    Continue,
    Delete(String),
}

#[derive(Debug)]
struct PlayerState {
    board: Board,
    win_points: u32,
}

pub struct Game {
    id: GameId,
    config: GameConfig,
    hooks: GameHooks,
    status: GameStatus,
    draw_pile: VecDeque<Tile>,
    players: BTreeMap<String, PlayerState>,
    created_at: u64,
    total_tiles: usize,
    /// Set by any player action, cleared by each idle tick
    active: bool,
    output: mpsc::UnboundedSender<GameOutput>,
}

impl Game {
    /// Builds a game with a freshly shuffled draw pile
    ///
    /// Fails if the configured grid is too small for a board.
    pub fn new(
        id: GameId,
        config: GameConfig,
        hooks: GameHooks,
        output: mpsc::UnboundedSender<GameOutput>,
    ) -> Result<Self, GameError> {
        Board::new(config.num_rows, config.num_cols)?;

        let mut tiles: Vec<Tile> = config
            .tile_letters
            .chars()
            .filter(|c| !c.is_whitespace())
            .enumerate()
            .map(|(i, letter)| Tile::new(i as u32 + 1, letter))
            .collect();
        (hooks.shuffle_tiles)(tiles.as_mut_slice());
        let total_tiles = tiles.len();

        Ok(Self {
            id,
            config,
            hooks,
            status: GameStatus::NotStarted,
            draw_pile: tiles.into(),
            players: BTreeMap::new(),
            created_at: get_timestamp(),
            total_tiles,
            active: false,
            output,
        })
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn tiles_left(&self) -> usize {
        self.draw_pile.len()
    }

    /// Tiles fixed at construction
    pub fn total_tiles(&self) -> usize {
        self.total_tiles
    }

    /// Tiles currently in the pile plus on every board
    pub fn tiles_in_play(&self) -> usize {
        self.draw_pile.len()
            + self
                .players
                .values()
                .map(|state| state.board.tile_count())
                .sum::<usize>()
    }

    pub fn win_points(&self, player: &str) -> Option<u32> {
        self.players.get(player).map(|state| state.win_points)
    }

    /// Runs the actor until it deletes itself, its inbox closes or it is cancelled
    pub async fn run(mut self, mut inbound: mpsc::Receiver<GameCommand>, cancel: CancellationToken) {
        let period = self.config.idle_timeout;
        let mut idle = interval_at(Instant::now() + period, period);
        idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Game {} started", self.id);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.close("server shutting down");
                    break;
                }

                command = inbound.recv() => match command {
                    Some(command) => {
                        if let Flow::Delete(reason) = self.handle_command(command) {
                            self.close(&reason);
                            break;
                        }
                    }
                    None => {
                        debug!("Game {} inbox closed", self.id);
                        break;
                    }
                },

                _ = idle.tick() => {
                    if !self.active {
                        info!("Game {} idle for {:?}", self.id, period);
                        self.close("idle timeout");
                        break;
                    }
                    self.active = false;
                }
            }
        }
    }

    fn handle_command(&mut self, command: GameCommand) -> Flow {
        match command {
            GameCommand::Infos { player, reply } => {
                if reply.send(self.info_for(&player)).is_err() {
                    debug!("Game {} infos requester went away", self.id);
                }
                Flow::Continue
            }
            GameCommand::Action { player, action } => {
                let refresh = action == GameAction::Join && self.players.contains_key(&player);
                if !refresh {
                    self.active = true;
                }

                match self.apply(&player, action) {
                    Ok(flow) => flow,
                    Err(e) => {
                        self.notify_error(&player, &e);
                        // The pile can no longer seat anyone, so the game is over
                        if matches!(e, GameError::InsufficientTiles { .. }) {
                            Flow::Delete(e.to_string())
                        } else {
                            Flow::Continue
                        }
                    }
                }
            }
        }
    }

    fn apply(&mut self, player: &str, action: GameAction) -> Result<Flow, GameError> {
        if action != GameAction::Join && !self.players.contains_key(player) {
            return Err(GameError::NotAPlayer);
        }

        match action {
            GameAction::Join => self.join(player).map(|_| Flow::Continue),
            GameAction::Leave => self.leave(player),
            GameAction::Delete => Ok(Flow::Delete(format!("deleted by {}", player))),
            GameAction::Snag => self.snag(player).map(|_| Flow::Continue),
            GameAction::Swap { tiles } => self.swap(player, &tiles).map(|_| Flow::Continue),
            GameAction::MoveTiles { positions } => {
                self.move_tiles(player, &positions).map(|_| Flow::Continue)
            }
            GameAction::SetStatus { status } => {
                self.set_status(player, status).map(|_| Flow::Continue)
            }
            GameAction::Chat { message } => {
                self.broadcast(ServerPacket::Chat {
                    game_id: self.id,
                    line: format!("{}: {}", player, message),
                });
                Ok(Flow::Continue)
            }
        }
    }

    fn join(&mut self, player: &str) -> Result<(), GameError> {
        if self.players.contains_key(player) {
            self.send_state(player);
            return Ok(());
        }
        if self.status != GameStatus::NotStarted {
            return Err(GameError::NotJoinable);
        }
        if self.players.len() >= self.config.max_players {
            return Err(GameError::GameFull(self.config.max_players));
        }
        let needed = self.config.starting_tiles;
        if self.draw_pile.len() < needed {
            return Err(GameError::InsufficientTiles {
                available: self.draw_pile.len(),
                needed,
            });
        }

        let mut board = Board::new(self.config.num_rows, self.config.num_cols)?;
        for tile in self.draw_pile.iter().take(needed) {
            board.add_tile(*tile)?;
        }
        self.draw_pile.drain(..needed);

        self.players.insert(
            player.to_string(),
            PlayerState {
                board,
                win_points: INITIAL_WIN_POINTS,
            },
        );
        info!("Player {} joined game {}", player, self.id);

        self.send_state(player);
        self.broadcast_except(
            player,
            ServerPacket::PlayerJoined {
                game_id: self.id,
                player: player.to_string(),
                players: self.player_names(),
                tiles_left: self.draw_pile.len(),
            },
        );
        Ok(())
    }

    /// Returns the player's tiles to the pile; the last player out deletes the game
    fn leave(&mut self, player: &str) -> Result<Flow, GameError> {
        let mut state = self.players.remove(player).ok_or(GameError::NotAPlayer)?;

        let returned = state.board.drain_tiles();
        if !returned.is_empty() {
            self.draw_pile.extend(returned);
            (self.hooks.shuffle_tiles)(self.draw_pile.make_contiguous());
        }
        info!("Player {} left game {}", player, self.id);

        let notice = ServerPacket::PlayerLeft {
            game_id: self.id,
            player: player.to_string(),
            players: self.player_names(),
            tiles_left: self.draw_pile.len(),
        };
        self.send(player, notice.clone());

        if self.players.is_empty() {
            return Ok(Flow::Delete("last player left".to_string()));
        }
        self.broadcast(notice);
        Ok(Flow::Continue)
    }

    /// The snagger draws first, then everyone else in a fresh random order while tiles last
    fn snag(&mut self, player: &str) -> Result<(), GameError> {
        self.require_in_progress()?;
        if self.draw_pile.is_empty() {
            return Err(GameError::EmptyPile);
        }

        let own = self.deal_to(player)?;

        let mut others: Vec<String> = self
            .players
            .keys()
            .filter(|name| name.as_str() != player)
            .cloned()
            .collect();
        (self.hooks.shuffle_players)(others.as_mut_slice());

        let mut received = HashMap::new();
        for other in &others {
            match self.deal_to(other)? {
                Some(tile) => {
                    received.insert(other.clone(), tile);
                }
                None => break,
            }
        }

        let tiles_left = self.draw_pile.len();
        self.send(
            player,
            ServerPacket::Snagged {
                game_id: self.id,
                snagger: player.to_string(),
                tile: own,
                tiles_left,
            },
        );
        for other in others {
            let tile = received.get(&other).copied();
            self.send(
                &other,
                ServerPacket::Snagged {
                    game_id: self.id,
                    snagger: player.to_string(),
                    tile,
                    tiles_left,
                },
            );
        }
        Ok(())
    }

    /// Trades one held tile for up to `SWAP_DRAW_COUNT` tiles from the reshuffled pile
    fn swap(&mut self, player: &str, tiles: &[Tile]) -> Result<(), GameError> {
        self.require_in_progress()?;
        if self.draw_pile.is_empty() {
            return Err(GameError::EmptyPile);
        }
        let [tile] = tiles else {
            return Err(GameError::InvalidSwapRequest);
        };
        let state = self.players.get_mut(player).ok_or(GameError::NotAPlayer)?;
        if !state.board.owns(tile.id) {
            return Err(GameError::InvalidSwapRequest);
        }

        let returned = state.board.remove_tile(tile.id)?;
        self.draw_pile.push_back(returned);
        (self.hooks.shuffle_tiles)(self.draw_pile.make_contiguous());

        let mut drawn = Vec::with_capacity(SWAP_DRAW_COUNT);
        for _ in 0..SWAP_DRAW_COUNT {
            match self.deal_to(player)? {
                Some(tile) => drawn.push(tile),
                None => break,
            }
        }

        let tiles_left = self.draw_pile.len();
        self.send(
            player,
            ServerPacket::Swapped {
                game_id: self.id,
                swapper: player.to_string(),
                tiles: drawn,
                tiles_left,
            },
        );
        self.broadcast_except(
            player,
            ServerPacket::Swapped {
                game_id: self.id,
                swapper: player.to_string(),
                tiles: Vec::new(),
                tiles_left,
            },
        );
        Ok(())
    }

    /// Other players are not told; they see the board on refresh or at the finish
    fn move_tiles(&mut self, player: &str, positions: &[TilePosition]) -> Result<(), GameError> {
        self.require_in_progress()?;
        let state = self.players.get_mut(player).ok_or(GameError::NotAPlayer)?;
        state.board.move_tiles(positions)?;
        Ok(())
    }

    fn set_status(&mut self, player: &str, status: GameStatus) -> Result<(), GameError> {
        match (self.status, status) {
            (GameStatus::NotStarted, GameStatus::InProgress) => {
                self.status = GameStatus::InProgress;
                info!("Game {} started by {}", self.id, player);
                self.broadcast(ServerPacket::StatusChanged {
                    game_id: self.id,
                    status,
                    changed_by: player.to_string(),
                });
                Ok(())
            }
            (GameStatus::InProgress, GameStatus::Finished) => self.finish(player),
            (from, to) => Err(GameError::InvalidTransition { from, to }),
        }
    }

    /// Validates a finish attempt; every refusal costs the player one win point, down to the floor
    fn finish(&mut self, player: &str) -> Result<(), GameError> {
        let board = &self.players.get(player).ok_or(GameError::NotAPlayer)?.board;
        let outcome = check_finish(board, self.draw_pile.len(), &self.hooks.is_valid_word);

        let word_count = match outcome {
            Ok(word_count) => word_count,
            Err(failure) => {
                if let Some(state) = self.players.get_mut(player) {
                    state.win_points = state.win_points.saturating_sub(1).max(MIN_WIN_POINTS);
                }
                debug!("Game {} finish by {} refused: {}", self.id, player, failure);
                return Err(failure.into());
            }
        };

        self.status = GameStatus::Finished;
        let points = self.win_points(player).unwrap_or(MIN_WIN_POINTS);
        let deltas: HashMap<String, i64> = self
            .players
            .keys()
            .map(|name| {
                let delta = if name == player { points } else { LOSER_POINTS };
                (name.clone(), i64::from(delta))
            })
            .collect();
        if let Err(e) = self.hooks.ledger.increment_points(&deltas) {
            error!("Game {} failed to record points: {}", self.id, e);
        }
        info!(
            "Game {} won by {} with {} words for {} points",
            self.id, player, word_count, points
        );

        self.broadcast(ServerPacket::StatusChanged {
            game_id: self.id,
            status: GameStatus::Finished,
            changed_by: player.to_string(),
        });
        self.broadcast(ServerPacket::Winner {
            game_id: self.id,
            winner: player.to_string(),
            word_count,
            points,
        });
        Ok(())
    }

    fn require_in_progress(&self) -> Result<(), GameError> {
        if self.status == GameStatus::InProgress {
            Ok(())
        } else {
            Err(GameError::NotInProgress)
        }
    }

    /// Moves the front of the pile onto the player's board, `None` if the pile is empty
    fn deal_to(&mut self, player: &str) -> Result<Option<Tile>, GameError> {
        let state = self.players.get_mut(player).ok_or(GameError::NotAPlayer)?;
        let Some(tile) = self.draw_pile.pop_front() else {
            return Ok(None);
        };
        if let Err(e) = state.board.add_tile(tile) {
            self.draw_pile.push_front(tile);
            return Err(e.into());
        }
        Ok(Some(tile))
    }

    fn info_for(&self, player: &str) -> GameInfo {
        GameInfo {
            id: self.id,
            status: self.status,
            players: self.player_names(),
            created_at: self.created_at,
            can_join: self.status == GameStatus::NotStarted || self.players.contains_key(player),
        }
    }

    /// Sorted roster
    fn player_names(&self) -> Vec<String> {
        self.players.keys().cloned().collect()
    }

    fn send_state(&self, player: &str) {
        let Some(state) = self.players.get(player) else {
            return;
        };
        self.send(
            player,
            ServerPacket::GameJoined {
                game_id: self.id,
                status: self.status,
                board: state.board.snapshot(),
                players: self.player_names(),
                tiles_left: self.draw_pile.len(),
            },
        );
    }

    fn notify_error(&self, player: &str, e: &GameError) {
        self.send(
            player,
            ServerPacket::Notice {
                game_id: Some(self.id),
                level: e.level(),
                message: e.to_string(),
            },
        );
    }

    fn send(&self, player: &str, packet: ServerPacket) {
        let output = GameOutput::Send {
            player: player.to_string(),
            packet,
        };
        if self.output.send(output).is_err() {
            debug!("Game {} output closed, dropping packet for {}", self.id, player);
        }
    }

    fn broadcast(&self, packet: ServerPacket) {
        for player in self.players.keys() {
            self.send(player, packet.clone());
        }
    }

    fn broadcast_except(&self, except: &str, packet: ServerPacket) {
        for player in self.players.keys().filter(|name| name.as_str() != except) {
            self.send(player, packet.clone());
        }
    }

    /// Tells every player the game is gone, then the lobby
    fn close(&mut self, reason: &str) {
        info!("Game {} deleted: {}", self.id, reason);
        self.broadcast(ServerPacket::GameDeleted {
            game_id: self.id,
            reason: reason.to_string(),
        });
        let deleted = GameOutput::Deleted {
            game_id: self.id,
            reason: reason.to_string(),
        };
        if self.output.send(deleted).is_err() {
            warn!("Game {} could not report its deletion", self.id);
        }
    }
}

/// Finish checks in order: empty pile, nothing unplaced, one group, only valid words
fn check_finish(
    board: &Board,
    tiles_left: usize,
    is_valid_word: &WordCheck,
) -> Result<usize, FinishFailure> {
    if tiles_left > 0 {
        return Err(FinishFailure::PileNotEmpty(tiles_left));
    }
    if board.unplaced_count() > 0 {
        return Err(FinishFailure::UnplacedTiles(board.unplaced_count()));
    }
    if !board.has_single_used_group() {
        return Err(FinishFailure::NotSingleGroup);
    }

    let words = board.used_tile_words();
    let invalid: Vec<String> = words
        .iter()
        .filter(|word| !is_valid_word(&word.to_lowercase()))
        .cloned()
        .collect();
    if !invalid.is_empty() {
        return Err(FinishFailure::InvalidWords(invalid));
    }
    Ok(words.len())
}

/// Lobby-side handle owning a running game's inbox and cancellation
pub struct GameHandle {
    id: GameId,
    sender: mpsc::Sender<GameCommand>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl GameHandle {
    /// Starts the game's actor on the tokio runtime
    pub fn spawn(game: Game, cancel: CancellationToken) -> Self {
        let id = game.id;
        let (sender, inbound) = mpsc::channel(game.config.inbox_capacity.max(1));
        let task = tokio::spawn(game.run(inbound, cancel.clone()));
        Self {
            id,
            sender,
            cancel,
            task,
        }
    }

    /// Queues a command, waiting if the inbox is full. Gives the command back if the game has stopped.
    pub async fn send(&self, command: GameCommand) -> Result<(), GameCommand> {
        self.sender.send(command).await.map_err(|e| e.0)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stops the actor and waits for it to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Game {} task failed: {}", self.id, e);
        }
    }
}
