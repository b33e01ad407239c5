//! TCP transport: length-prefixed bincode frames in front of the lobby
//!
//! Each frame is a big-endian `u32` byte count followed by one bincode encoded
//! packet. A client must open with `ClientPacket::Hello`; after that its socket
//! is bridged to a `PlayerChannel` registered with the lobby.

use crate::connection::{PlayerChannel, RemotePlayer};
use crate::lobby::LobbyHandle;
use crate::utils::normalize_username;
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::{ClientPacket, ServerPacket, MAX_FRAME_LEN, PROTOCOL_VERSION};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed packet: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame of {0} bytes is larger than the {max} byte limit", max = MAX_FRAME_LEN)]
    FrameTooLarge(usize),

    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Reads one frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_packet<R, T>(reader: &mut R) -> Result<Option<T>, NetworkError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(NetworkError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(bincode::deserialize(&body)?))
}

pub async fn write_packet<W, T>(writer: &mut W, packet: &T) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(packet)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(NetworkError::FrameTooLarge(body.len()));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Accepts TCP clients and hands each one to the lobby
pub struct NetworkServer {
    listener: TcpListener,
    lobby: LobbyHandle,
    channel_capacity: usize,
}

impl NetworkServer {
    pub async fn bind(
        addr: &str,
        lobby: LobbyHandle,
        channel_capacity: usize,
    ) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            lobby,
            channel_capacity,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop; every socket task stops with `cancel`
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted connection from {}", addr);
                        tokio::spawn(handle_socket(
                            stream,
                            addr,
                            self.lobby.clone(),
                            self.channel_capacity,
                            cancel.child_token(),
                        ));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }
        info!("Stopped accepting connections");
    }
}

async fn handle_socket(
    stream: TcpStream,
    addr: SocketAddr,
    lobby: LobbyHandle,
    channel_capacity: usize,
    cancel: CancellationToken,
) {
    if let Err(e) = serve(stream, addr, lobby, channel_capacity, cancel).await {
        warn!("Connection from {} ended: {}", addr, e);
    }
}

async fn serve(
    stream: TcpStream,
    addr: SocketAddr,
    lobby: LobbyHandle,
    channel_capacity: usize,
    cancel: CancellationToken,
) -> Result<(), NetworkError> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    let hello = timeout(HANDSHAKE_TIMEOUT, read_packet::<_, ClientPacket>(&mut reader))
        .await
        .map_err(|_| NetworkError::Handshake("timed out waiting for hello".to_string()))??;
    let username = match hello {
        Some(ClientPacket::Hello {
            username,
            client_version,
        }) => {
            if client_version != PROTOCOL_VERSION {
                let reason = format!("unsupported client version {}", client_version);
                return reject(&mut writer, reason).await;
            }
            match normalize_username(&username) {
                Some(username) => username,
                None => return reject(&mut writer, "invalid username".to_string()).await,
            }
        }
        Some(_) => return reject(&mut writer, "expected hello".to_string()).await,
        None => return Ok(()),
    };

    let (channel, remote) = PlayerChannel::pair(channel_capacity);
    if let Err(e) = lobby.add_connection(username.clone(), channel).await {
        info!("Rejected {} from {}: {}", username, addr, e);
        write_packet(&mut writer, &ServerPacket::Disconnected { reason: e.to_string() }).await?;
        return Ok(());
    }
    info!("{} connected as {}", addr, username);

    let RemotePlayer {
        sender,
        mut receiver,
    } = remote;
    let writer_task = tokio::spawn(async move {
        while let Some(packet) = receiver.recv().await {
            if let Err(e) = write_packet(&mut writer, &packet).await {
                debug!("Write to socket failed: {}", e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let result = loop {
        let packet = tokio::select! {
            // The lobby dropped this connection
            _ = sender.closed() => break Ok(()),
            _ = cancel.cancelled() => break Ok(()),
            packet = read_packet::<_, ClientPacket>(&mut reader) => packet,
        };

        match packet {
            Ok(Some(packet)) => {
                if sender.send(packet).await.is_err() {
                    break Ok(());
                }
            }
            Ok(None) => break Ok(()),
            // The frame was consumed whole, so the stream is still in sync
            Err(NetworkError::Codec(e)) => warn!("Malformed packet from {}: {}", username, e),
            Err(e) => break Err(e),
        }
    };

    drop(sender);
    if let Err(e) = writer_task.await {
        error!("Writer task for {} failed: {}", username, e);
    }
    debug!("Socket for {} closed", username);
    result
}

async fn reject(writer: &mut OwnedWriteHalf, reason: String) -> Result<(), NetworkError> {
    write_packet(writer, &ServerPacket::Disconnected {
        reason: reason.clone(),
    })
    .await?;
    Err(NetworkError::Handshake(reason))
}
