use clap::Parser;
use server::network::{read_packet, write_packet};
use shared::{ClientPacket, GameStatus, ServerPacket, PROTOCOL_VERSION};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: String,
    /// Name to play as
    #[clap(short, long, default_value = "tester")]
    username: String,
}

async fn send(stream: &mut TcpStream, packet: ClientPacket) -> Result<(), Box<dyn std::error::Error>> {
    println!("Sending: {:?}", packet);
    write_packet(stream, &packet).await?;
    Ok(())
}

/// Prints packets until the server goes quiet for a moment
async fn drain(stream: &mut TcpStream) -> Result<Vec<ServerPacket>, Box<dyn std::error::Error>> {
    let mut received = Vec::new();
    while let Ok(packet) = timeout(Duration::from_millis(500), read_packet::<_, ServerPacket>(stream)).await {
        match packet? {
            Some(packet) => {
                println!("Received: {:?}", packet);
                received.push(packet);
            }
            None => {
                println!("Server closed the connection");
                break;
            }
        }
    }
    Ok(received)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut stream = TcpStream::connect(&args.server).await?;
    println!("Connected to {}", args.server);

    send(
        &mut stream,
        ClientPacket::Hello {
            username: args.username.clone(),
            client_version: PROTOCOL_VERSION,
        },
    )
    .await?;
    drain(&mut stream).await?;

    send(&mut stream, ClientPacket::CreateGame).await?;
    let game_id = drain(&mut stream).await?.iter().find_map(|packet| match packet {
        ServerPacket::GameJoined { game_id, .. } => Some(*game_id),
        _ => None,
    });
    let Some(game_id) = game_id else {
        println!("No game was created, stopping");
        return Ok(());
    };

    send(&mut stream, ClientPacket::ListGames).await?;
    drain(&mut stream).await?;

    send(
        &mut stream,
        ClientPacket::SetStatus {
            game_id,
            status: GameStatus::InProgress,
        },
    )
    .await?;
    drain(&mut stream).await?;

    for _ in 0..3 {
        send(&mut stream, ClientPacket::Snag { game_id }).await?;
        drain(&mut stream).await?;
    }

    send(
        &mut stream,
        ClientPacket::Chat {
            game_id,
            message: "test client done".to_string(),
        },
    )
    .await?;
    drain(&mut stream).await?;

    send(&mut stream, ClientPacket::Leave { game_id }).await?;
    drain(&mut stream).await?;

    println!("Test client finished");
    Ok(())
}
