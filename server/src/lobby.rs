//! Lobby router: admission control and routing between connections and games
//!
//! The lobby is the only component that knows which players are connected and
//! which games exist. Connections feed it through `LobbyMessage`s, games answer
//! through `GameOutput`s, and everything it owns is mutated inside `Lobby::run`.

use crate::config::LobbyConfig;
use crate::connection::{ConnectionHandle, PlayerChannel};
use crate::error::LobbyError;
use crate::game::{Game, GameAction, GameCommand, GameHandle, GameOutput};
use crate::hooks::GameHooks;
use log::{debug, info, warn};
use shared::{ClientPacket, GameId, GameInfo, NoticeLevel, ServerPacket};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Messages into the lobby's inbox
#[derive(Debug)]
pub enum LobbyMessage {
    /// Admission request from a transport
    Connect {
        player: String,
        channel: PlayerChannel,
        reply: oneshot::Sender<Result<(), LobbyError>>,
    },
    /// Transport-initiated removal
    Disconnect { player: String },
    /// A packet read from a live connection
    Inbound {
        player: String,
        connection_id: u64,
        packet: ClientPacket,
    },
    /// The connection's transport went away
    Disconnected { player: String, connection_id: u64 },
}

pub struct Lobby {
    config: LobbyConfig,
    hooks: GameHooks,
    games: BTreeMap<GameId, GameHandle>,
    connections: HashMap<String, ConnectionHandle>,
    next_connection_id: u64,
    /// Parent of every game's cancellation token
    games_cancel: CancellationToken,
    inbox_tx: mpsc::Sender<LobbyMessage>,
    inbox: mpsc::Receiver<LobbyMessage>,
    game_tx: mpsc::UnboundedSender<GameOutput>,
    game_rx: mpsc::UnboundedReceiver<GameOutput>,
}

impl Lobby {
    pub fn new(config: LobbyConfig, hooks: GameHooks) -> (Self, LobbyHandle) {
        let (inbox_tx, inbox) = mpsc::channel(config.inbox_capacity.max(1));
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let handle = LobbyHandle {
            sender: inbox_tx.clone(),
        };
        let lobby = Self {
            config,
            hooks,
            games: BTreeMap::new(),
            connections: HashMap::new(),
            next_connection_id: 0,
            games_cancel: CancellationToken::new(),
            inbox_tx,
            inbox,
            game_tx,
            game_rx,
        };
        (lobby, handle)
    }

    /// Runs the router until `cancel` fires, then shuts everything down
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Lobby running (max {} games, {} connections)",
            self.config.max_games, self.config.max_sockets
        );

        loop {
            // Game output first, so a deleted game is gone before the next request
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(output) = self.game_rx.recv() => self.handle_game_output(output),

                message = self.inbox.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => break,
                },
            }
        }

        self.shutdown().await;
    }

    async fn handle_message(&mut self, message: LobbyMessage) {
        match message {
            LobbyMessage::Connect {
                player,
                channel,
                reply,
            } => {
                let result = self.add_connection(player, channel);
                if reply.send(result).is_err() {
                    debug!("Connect requester went away");
                }
            }
            LobbyMessage::Disconnect { player } => self.remove_connection(&player),
            LobbyMessage::Inbound {
                player,
                connection_id,
                packet,
            } => {
                if self.is_current(&player, connection_id) {
                    self.route(&player, packet).await;
                } else {
                    debug!("Ignoring packet from stale connection {} of {}", connection_id, player);
                }
            }
            LobbyMessage::Disconnected {
                player,
                connection_id,
            } => {
                if self.is_current(&player, connection_id) {
                    self.remove_connection(&player);
                }
            }
        }
    }

    fn is_current(&self, player: &str, connection_id: u64) -> bool {
        self.connections
            .get(player)
            .map_or(false, |connection| connection.id() == connection_id)
    }

    fn add_connection(&mut self, player: String, channel: PlayerChannel) -> Result<(), LobbyError> {
        let replacing = self.connections.contains_key(&player);
        if !replacing && self.connections.len() >= self.config.max_sockets {
            warn!("Rejecting {}: lobby is full", player);
            return Err(LobbyError::LobbyFull(self.config.max_sockets));
        }

        self.next_connection_id += 1;
        let connection = ConnectionHandle::spawn(
            player.clone(),
            self.next_connection_id,
            channel,
            self.config.connection_queue,
            self.inbox_tx.clone(),
            CancellationToken::new(),
        );
        connection.send(ServerPacket::Connected {
            username: player.clone(),
        });

        if let Some(previous) = self.connections.insert(player.clone(), connection) {
            info!("Player {} reconnected, closing previous connection", player);
            previous.close(Some("replaced by a new connection"));
        } else {
            info!(
                "Player {} connected ({}/{})",
                player,
                self.connections.len(),
                self.config.max_sockets
            );
        }
        Ok(())
    }

    /// Idempotent
    fn remove_connection(&mut self, player: &str) {
        if let Some(connection) = self.connections.remove(player) {
            info!("Player {} disconnected", player);
            connection.close(None);
        }
    }

    async fn route(&mut self, player: &str, packet: ClientPacket) {
        match packet {
            ClientPacket::Hello { .. } => self.send(
                player,
                ServerPacket::Notice {
                    game_id: None,
                    level: NoticeLevel::Error,
                    message: "already connected".to_string(),
                },
            ),
            ClientPacket::CreateGame => {
                if let Err(e) = self.create_game(player).await {
                    self.notify(player, None, &e);
                }
            }
            ClientPacket::ListGames => {
                let games = self.game_infos(player).await;
                self.send(player, ServerPacket::GameList { games });
            }
            packet => {
                if let Some((game_id, action)) = GameAction::from_packet(packet) {
                    self.forward(player, game_id, action).await;
                }
            }
        }
    }

    async fn create_game(&mut self, player: &str) -> Result<(), LobbyError> {
        if self.games.len() >= self.config.max_games {
            return Err(LobbyError::TooManyGames(self.config.max_games));
        }
        let id = (1..=GameId::MAX)
            .find(|id| !self.games.contains_key(id))
            .ok_or(LobbyError::TooManyGames(self.config.max_games))?;

        let game = Game::new(
            id,
            self.config.game.clone(),
            self.hooks.clone(),
            self.game_tx.clone(),
        )?;
        let handle = GameHandle::spawn(game, self.games_cancel.child_token());
        self.games.insert(id, handle);
        info!("Game {} created by {} ({} games)", id, player, self.games.len());

        self.forward(player, id, GameAction::Join).await;
        Ok(())
    }

    async fn forward(&mut self, player: &str, game_id: GameId, action: GameAction) {
        let Some(game) = self.games.get(&game_id) else {
            self.notify(player, Some(game_id), &LobbyError::NoSuchGame(game_id));
            return;
        };

        let command = GameCommand::Action {
            player: player.to_string(),
            action,
        };
        if game.send(command).await.is_err() {
            // Stopped but its deletion is still queued
            self.notify(player, Some(game_id), &LobbyError::NoSuchGame(game_id));
        }
    }

    /// One entry per live game, oldest first
    async fn game_infos(&self, player: &str) -> Vec<GameInfo> {
        let mut replies = Vec::with_capacity(self.games.len());
        for game in self.games.values() {
            let (reply, response) = oneshot::channel();
            let query = GameCommand::Infos {
                player: player.to_string(),
                reply,
            };
            if game.send(query).await.is_ok() {
                replies.push(response);
            }
        }

        let mut infos = Vec::with_capacity(replies.len());
        for response in replies {
            // A game that stopped meanwhile drops its reply
            if let Ok(info) = response.await {
                infos.push(info);
            }
        }
        infos.sort_by_key(|info| (info.created_at, info.id));
        infos
    }

    fn handle_game_output(&mut self, output: GameOutput) {
        match output {
            GameOutput::Send { player, packet } => self.send(&player, packet),
            GameOutput::Deleted { game_id, reason } => {
                if let Some(game) = self.games.remove(&game_id) {
                    game.stop();
                    info!("Game {} removed from lobby: {}", game_id, reason);
                }
            }
        }
    }

    /// Drops the player's connection when it cannot take the packet
    fn send(&mut self, player: &str, packet: ServerPacket) {
        let delivered = match self.connections.get(player) {
            Some(connection) => connection.send(packet),
            None => {
                debug!("No connection for {}, packet dropped", player);
                return;
            }
        };
        if !delivered {
            debug!("Connection of {} cannot take more packets", player);
            self.remove_connection(player);
        }
    }

    fn notify(&mut self, player: &str, game_id: Option<GameId>, e: &LobbyError) {
        self.send(
            player,
            ServerPacket::Notice {
                game_id,
                level: e.level(),
                message: e.to_string(),
            },
        );
    }

    async fn shutdown(&mut self) {
        info!("Lobby shutting down ({} games)", self.games.len());

        self.games_cancel.cancel();
        let games = std::mem::take(&mut self.games);
        for (_, game) in games {
            game.shutdown().await;
        }

        // Farewell notices from the games
        while let Ok(output) = self.game_rx.try_recv() {
            self.handle_game_output(output);
        }

        self.inbox.close();
        while let Ok(message) = self.inbox.try_recv() {
            if let LobbyMessage::Connect { reply, .. } = message {
                let _ = reply.send(Err(LobbyError::ShuttingDown));
            }
        }

        for (_, connection) in self.connections.drain() {
            connection.close(Some("server shutting down"));
        }
        info!("Lobby stopped");
    }
}

/// Transport-facing handle to a running lobby
#[derive(Clone)]
pub struct LobbyHandle {
    sender: mpsc::Sender<LobbyMessage>,
}

impl LobbyHandle {
    /// Registers a connection for `player`, replacing any previous one
    pub async fn add_connection(
        &self,
        player: impl Into<String>,
        channel: PlayerChannel,
    ) -> Result<(), LobbyError> {
        let (reply, response) = oneshot::channel();
        let message = LobbyMessage::Connect {
            player: player.into(),
            channel,
            reply,
        };
        self.sender
            .send(message)
            .await
            .map_err(|_| LobbyError::ShuttingDown)?;
        response.await.map_err(|_| LobbyError::ShuttingDown)?
    }

    /// Tears down the player's connection, if there is one
    pub async fn remove_connection(&self, player: impl Into<String>) {
        let message = LobbyMessage::Disconnect {
            player: player.into(),
        };
        if self.sender.send(message).await.is_err() {
            debug!("Lobby already stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::connection::RemotePlayer;
    use crate::ledger::MemoryLedger;
    use shared::GameStatus;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    struct TestLobby {
        handle: LobbyHandle,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    }

    fn config(max_games: usize, max_sockets: usize) -> LobbyConfig {
        LobbyConfig {
            max_games,
            max_sockets,
            inbox_capacity: 32,
            connection_queue: 32,
            game: GameConfig {
                tile_letters: "ABCDEFGHIJKLMNOP".to_string(),
                max_players: 4,
                starting_tiles: 2,
                num_rows: 10,
                num_cols: 10,
                idle_timeout: Duration::from_secs(600),
                inbox_capacity: 16,
            },
        }
    }

    fn start(config: LobbyConfig) -> TestLobby {
        let hooks = GameHooks::with_word_check(Arc::new(|_: &str| true), Arc::new(MemoryLedger::new()))
            .without_shuffling();
        let (lobby, handle) = Lobby::new(config, hooks);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(lobby.run(cancel.clone()));
        TestLobby {
            handle,
            cancel,
            task,
        }
    }

    async fn recv(remote: &mut RemotePlayer) -> ServerPacket {
        timeout(Duration::from_secs(2), remote.receiver.recv())
            .await
            .expect("timed out waiting for a packet")
            .expect("connection closed")
    }

    async fn send(remote: &RemotePlayer, packet: ClientPacket) {
        remote.sender.send(packet).await.unwrap();
    }

    async fn connect(lobby: &TestLobby, name: &str) -> RemotePlayer {
        let (channel, mut remote) = PlayerChannel::pair(32);
        lobby.handle.add_connection(name, channel).await.unwrap();
        assert_eq!(
            recv(&mut remote).await,
            ServerPacket::Connected {
                username: name.to_string()
            }
        );
        remote
    }

    async fn create_game(remote: &mut RemotePlayer) -> GameId {
        send(remote, ClientPacket::CreateGame).await;
        match recv(remote).await {
            ServerPacket::GameJoined {
                game_id, status, ..
            } => {
                assert_eq!(status, GameStatus::NotStarted);
                game_id
            }
            other => panic!("Expected GameJoined, got {:?}", other),
        }
    }

    async fn list_games(remote: &mut RemotePlayer) -> Vec<GameInfo> {
        send(remote, ClientPacket::ListGames).await;
        match recv(remote).await {
            ServerPacket::GameList { games } => games,
            other => panic!("Expected GameList, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_capacity() {
        let lobby = start(config(4, 1));
        let _ada = connect(&lobby, "ada").await;

        let (channel, _remote) = PlayerChannel::pair(4);
        let result = lobby.handle.add_connection("bob", channel).await;
        assert_eq!(result, Err(LobbyError::LobbyFull(1)));

        // Replacing an existing identity does not need a free slot
        let _ada_again = connect(&lobby, "ada").await;
    }

    #[tokio::test]
    async fn test_replacement_closes_previous_connection() {
        let lobby = start(config(4, 4));
        let mut first = connect(&lobby, "ada").await;
        let mut second = connect(&lobby, "ada").await;

        assert_eq!(
            recv(&mut first).await,
            ServerPacket::Disconnected {
                reason: "replaced by a new connection".to_string()
            }
        );
        let end = timeout(Duration::from_secs(1), first.receiver.recv()).await.unwrap();
        assert!(end.is_none());

        // Only the new connection is routed
        let game_id = create_game(&mut second).await;
        assert_eq!(game_id, 1);
    }

    #[tokio::test]
    async fn test_remove_connection_is_idempotent() {
        let lobby = start(config(4, 4));
        let mut ada = connect(&lobby, "ada").await;

        lobby.handle.remove_connection("ada").await;
        lobby.handle.remove_connection("ada").await;
        lobby.handle.remove_connection("nobody").await;

        let end = timeout(Duration::from_secs(1), ada.receiver.recv()).await.unwrap();
        assert!(end.is_none());

        let _ada = connect(&lobby, "ada").await;
    }

    #[tokio::test]
    async fn test_create_and_join_game() {
        let lobby = start(config(4, 4));
        let mut ada = connect(&lobby, "ada").await;
        let mut bob = connect(&lobby, "bob").await;

        let game_id = create_game(&mut ada).await;
        assert_eq!(game_id, 1);

        send(&bob, ClientPacket::Join { game_id }).await;
        match recv(&mut bob).await {
            ServerPacket::GameJoined {
                players,
                board,
                tiles_left,
                ..
            } => {
                assert_eq!(players, vec!["ada", "bob"]);
                assert_eq!(board.unplaced.len(), 2);
                assert_eq!(tiles_left, 12);
            }
            other => panic!("Expected GameJoined, got {:?}", other),
        }
        assert_eq!(
            recv(&mut ada).await,
            ServerPacket::PlayerJoined {
                game_id,
                player: "bob".to_string(),
                players: vec!["ada".to_string(), "bob".to_string()],
                tiles_left: 12,
            }
        );
    }

    #[tokio::test]
    async fn test_game_capacity() {
        let lobby = start(config(2, 4));
        let mut ada = connect(&lobby, "ada").await;

        assert_eq!(create_game(&mut ada).await, 1);
        assert_eq!(create_game(&mut ada).await, 2);

        send(&ada, ClientPacket::CreateGame).await;
        assert_eq!(
            recv(&mut ada).await,
            ServerPacket::Notice {
                game_id: None,
                level: NoticeLevel::Warning,
                message: "too many games (2)".to_string(),
            }
        );
        assert_eq!(list_games(&mut ada).await.len(), 2);
    }

    #[tokio::test]
    async fn test_lowest_free_id_is_reused() {
        let lobby = start(config(4, 4));
        let mut ada = connect(&lobby, "ada").await;
        let mut bob = connect(&lobby, "bob").await;

        assert_eq!(create_game(&mut ada).await, 1);
        assert_eq!(create_game(&mut bob).await, 2);
        assert_eq!(create_game(&mut ada).await, 3);

        send(&bob, ClientPacket::DeleteGame { game_id: 2 }).await;
        assert_eq!(
            recv(&mut bob).await,
            ServerPacket::GameDeleted {
                game_id: 2,
                reason: "deleted by bob".to_string(),
            }
        );

        assert_eq!(create_game(&mut ada).await, 2);
        let games = list_games(&mut ada).await;
        assert!(games.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        let mut ids: Vec<GameId> = games.iter().map(|g| g.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unknown_game_and_repeated_hello() {
        let lobby = start(config(4, 4));
        let mut ada = connect(&lobby, "ada").await;

        send(&ada, ClientPacket::Snag { game_id: 42 }).await;
        assert_eq!(
            recv(&mut ada).await,
            ServerPacket::Notice {
                game_id: Some(42),
                level: NoticeLevel::Error,
                message: "no game with id 42".to_string(),
            }
        );

        send(
            &ada,
            ClientPacket::Hello {
                username: "ada".to_string(),
                client_version: 1,
            },
        )
        .await;
        match recv(&mut ada).await {
            ServerPacket::Notice { level, .. } => assert_eq!(level, NoticeLevel::Error),
            other => panic!("Expected Notice, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_game_list_is_per_requester() {
        let lobby = start(config(4, 4));
        let mut ada = connect(&lobby, "ada").await;
        let mut bob = connect(&lobby, "bob").await;

        assert_eq!(create_game(&mut ada).await, 1);
        assert_eq!(create_game(&mut bob).await, 2);
        send(&ada, ClientPacket::SetStatus { game_id: 1, status: GameStatus::InProgress }).await;
        match recv(&mut ada).await {
            ServerPacket::StatusChanged { status, .. } => assert_eq!(status, GameStatus::InProgress),
            other => panic!("Expected StatusChanged, got {:?}", other),
        }

        let games = list_games(&mut bob).await;
        assert_eq!(games.len(), 2);
        assert_eq!((games[0].id, games[0].can_join), (1, false));
        assert_eq!((games[1].id, games[1].can_join), (2, true));
        assert!(games[0].created_at <= games[1].created_at);

        // Seated players can always come back
        let games = list_games(&mut ada).await;
        assert!(games[0].can_join);
    }

    #[tokio::test]
    async fn test_output_for_disconnected_player_is_dropped() {
        let lobby = start(config(4, 4));
        let mut ada = connect(&lobby, "ada").await;
        let mut bob = connect(&lobby, "bob").await;

        let game_id = create_game(&mut ada).await;
        send(&bob, ClientPacket::Join { game_id }).await;
        assert!(matches!(recv(&mut bob).await, ServerPacket::GameJoined { .. }));
        assert!(matches!(recv(&mut ada).await, ServerPacket::PlayerJoined { .. }));

        drop(bob);

        send(
            &ada,
            ClientPacket::Chat {
                game_id,
                message: "still there?".to_string(),
            },
        )
        .await;
        assert_eq!(
            recv(&mut ada).await,
            ServerPacket::Chat {
                game_id,
                line: "ada: still there?".to_string(),
            }
        );

        // The seat survives the disconnect
        let games = list_games(&mut ada).await;
        assert_eq!(games[0].players, vec!["ada", "bob"]);
    }

    #[tokio::test]
    async fn test_shutdown_notifies_and_closes() {
        let lobby = start(config(4, 4));
        let mut ada = connect(&lobby, "ada").await;
        let game_id = create_game(&mut ada).await;

        lobby.cancel.cancel();
        timeout(Duration::from_secs(2), lobby.task).await.unwrap().unwrap();

        assert_eq!(
            recv(&mut ada).await,
            ServerPacket::GameDeleted {
                game_id,
                reason: "server shutting down".to_string(),
            }
        );
        assert_eq!(
            recv(&mut ada).await,
            ServerPacket::Disconnected {
                reason: "server shutting down".to_string()
            }
        );

        let (channel, _remote) = PlayerChannel::pair(4);
        assert_eq!(
            lobby.handle.add_connection("bob", channel).await,
            Err(LobbyError::ShuttingDown)
        );
    }

    #[tokio::test]
    async fn test_game_that_cannot_seat_a_joiner_is_deleted() {
        let mut config = config(4, 4);
        // Two seats' worth plus one
        config.game.tile_letters = "ABCDE".to_string();
        let lobby = start(config);
        let mut ada = connect(&lobby, "ada").await;
        let mut bob = connect(&lobby, "bob").await;
        let mut carl = connect(&lobby, "carl").await;

        let game_id = create_game(&mut ada).await;
        send(&bob, ClientPacket::Join { game_id }).await;
        assert!(matches!(recv(&mut bob).await, ServerPacket::GameJoined { .. }));
        assert!(matches!(recv(&mut ada).await, ServerPacket::PlayerJoined { .. }));

        send(&carl, ClientPacket::Join { game_id }).await;
        assert_eq!(
            recv(&mut carl).await,
            ServerPacket::Notice {
                game_id: Some(game_id),
                level: NoticeLevel::Error,
                message: "not enough tiles left to seat a player (1 < 2)".to_string(),
            }
        );
        for remote in [&mut ada, &mut bob] {
            assert_eq!(
                recv(remote).await,
                ServerPacket::GameDeleted {
                    game_id,
                    reason: "not enough tiles left to seat a player (1 < 2)".to_string(),
                }
            );
        }

        assert!(list_games(&mut carl).await.is_empty());
        send(&bob, ClientPacket::Snag { game_id }).await;
        assert_eq!(
            recv(&mut bob).await,
            ServerPacket::Notice {
                game_id: Some(game_id),
                level: NoticeLevel::Error,
                message: format!("no game with id {}", game_id),
            }
        );
    }

    #[tokio::test]
    async fn test_client_that_never_reads_is_dropped() {
        let lobby = start(config(4, 1));
        let (channel, ada) = PlayerChannel::pair(1);
        lobby.handle.add_connection("ada", channel).await.unwrap();

        // Every request gets a reply that ada never collects
        let flooded = timeout(Duration::from_secs(5), async {
            for _ in 0..10_000 {
                if ada.sender.send(ClientPacket::ListGames).await.is_err() {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(flooded, "connection was never cut off");

        // The slot is free again
        let _bob = connect(&lobby, "bob").await;
    }
}
