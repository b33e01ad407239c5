//! # Word Tile Game Server Library
//!
//! Server side of a multiplayer word-tile game. Players race to build a
//! single connected crossword from their own tiles, drawing from a shared
//! pile, and the first to finish with only valid words wins points.
//!
//! ## Architecture
//!
//! Everything runs as actors on tokio, talking only through channels:
//!
//! - **Lobby** (`lobby`): owns the table of connections and games, admits
//!   players, creates games and routes every message between them.
//! - **Game** (`game`): one task per match, owning the draw pile and each
//!   player's `Board`. Commands are applied one at a time, so no locking is
//!   needed inside game logic.
//! - **Connections** (`connection`): a reader and a writer task per player,
//!   so a slow client only ever stalls its own writer.
//!
//! The TCP transport in `network` frames `shared::ClientPacket` and
//! `shared::ServerPacket` with a length prefix and bincode, but the lobby
//! accepts any transport that can provide a `connection::PlayerChannel`.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::LobbyConfig;
//! use server::hooks::GameHooks;
//! use server::ledger::MemoryLedger;
//! use server::lobby::Lobby;
//! use server::network::NetworkServer;
//! use server::words::WordList;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let words = WordList::load("words.txt")?;
//!     let hooks = GameHooks::new(words, Arc::new(MemoryLedger::new()));
//!     let (lobby, handle) = Lobby::new(LobbyConfig::default(), hooks);
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(lobby.run(cancel.clone()));
//!
//!     let server = NetworkServer::bind("127.0.0.1:8080", handle, 64).await?;
//!     server.run(cancel).await;
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod config;
pub mod connection;
pub mod error;
pub mod game;
pub mod hooks;
pub mod ledger;
pub mod lobby;
pub mod network;
pub mod utils;
pub mod words;
