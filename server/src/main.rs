use clap::Parser;
use log::{error, info, warn};
use server::config::{GameConfig, LobbyConfig};
use server::hooks::GameHooks;
use server::ledger::MemoryLedger;
use server::lobby::Lobby;
use server::network::NetworkServer;
use server::words::WordList;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-connection channel bound between the socket and the lobby
const CHANNEL_CAPACITY: usize = 64;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Maximum number of concurrent games
    #[clap(long, default_value = "64")]
    max_games: usize,
    /// Maximum number of connected players
    #[clap(long, default_value = "256")]
    max_sockets: usize,
    /// Maximum players per game
    #[clap(long, default_value = "8")]
    max_players: usize,
    /// Tiles dealt to each player on joining
    #[clap(long, default_value = "21")]
    starting_tiles: usize,
    /// Seconds without activity before a game is deleted
    #[clap(long, default_value = "900")]
    idle_timeout_secs: u64,
    /// Word list, one word per line; without it every word is accepted
    #[clap(short, long)]
    words: Option<PathBuf>,
}

impl Args {
    fn lobby_config(&self) -> LobbyConfig {
        LobbyConfig {
            max_games: self.max_games,
            max_sockets: self.max_sockets,
            game: GameConfig {
                max_players: self.max_players,
                starting_tiles: self.starting_tiles,
                idle_timeout: Duration::from_secs(self.idle_timeout_secs),
                ..GameConfig::default()
            },
            ..LobbyConfig::default()
        }
    }
}

/// Main-method of the application.
/// Parses command-line arguments, then starts the lobby and the TCP listener.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let ledger = Arc::new(MemoryLedger::new());
    let hooks = match &args.words {
        Some(path) => GameHooks::new(WordList::load(path)?, ledger),
        None => {
            warn!("No word list given, every word will be accepted");
            GameHooks::with_word_check(Arc::new(|_: &str| true), ledger)
        }
    };

    let cancel = CancellationToken::new();
    let (lobby, handle) = Lobby::new(args.lobby_config(), hooks);
    let lobby_task = tokio::spawn(lobby.run(cancel.clone()));

    let address = format!("{}:{}", args.host, args.port);
    let server = NetworkServer::bind(&address, handle, CHANNEL_CAPACITY).await?;
    let server_task = tokio::spawn(server.run(cancel.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");
    cancel.cancel();

    if let Err(e) = server_task.await {
        error!("Network task panicked: {}", e);
    }
    if let Err(e) = lobby_task.await {
        error!("Lobby task panicked: {}", e);
    }
    Ok(())
}
