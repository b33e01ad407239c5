//! Per-connection actors sitting between a transport and the lobby
//!
//! A transport (TCP in `network`, plain channels in tests) hands the lobby a
//! `PlayerChannel`. The lobby then runs two small tasks per connection: a
//! reader that forwards the player's packets into the lobby inbox, and a
//! writer that drains a bounded queue into the transport. The writer is the
//! only place that waits on a slow client, so the lobby loop never does. A
//! client that lets the queue fill up is cut off.

use crate::lobby::LobbyMessage;
use log::{debug, warn};
use shared::{ClientPacket, ServerPacket};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Lobby side of a player's transport
#[derive(Debug)]
pub struct PlayerChannel {
    pub inbound: mpsc::Receiver<ClientPacket>,
    pub outbound: mpsc::Sender<ServerPacket>,
}

/// Transport side of a player's transport
#[derive(Debug)]
pub struct RemotePlayer {
    pub sender: mpsc::Sender<ClientPacket>,
    pub receiver: mpsc::Receiver<ServerPacket>,
}

impl PlayerChannel {
    /// Creates both ends, each direction bounded by `capacity`
    pub fn pair(capacity: usize) -> (PlayerChannel, RemotePlayer) {
        let (client_tx, client_rx) = mpsc::channel(capacity.max(1));
        let (server_tx, server_rx) = mpsc::channel(capacity.max(1));
        (
            PlayerChannel {
                inbound: client_rx,
                outbound: server_tx,
            },
            RemotePlayer {
                sender: client_tx,
                receiver: server_rx,
            },
        )
    }
}

/// Lobby-owned handle to a live connection
pub struct ConnectionHandle {
    id: u64,
    queue: mpsc::Sender<ServerPacket>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Starts the reader and writer tasks for one connection, holding at most `queue_capacity` unsent packets
    pub fn spawn(
        player: String,
        id: u64,
        channel: PlayerChannel,
        queue_capacity: usize,
        lobby: mpsc::Sender<LobbyMessage>,
        cancel: CancellationToken,
    ) -> Self {
        let (queue, pending) = mpsc::channel(queue_capacity.max(1));
        tokio::spawn(read_loop(
            player,
            id,
            channel.inbound,
            lobby,
            cancel.clone(),
        ));
        tokio::spawn(write_loop(id, pending, channel.outbound, cancel.clone()));
        Self { id, queue, cancel }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queues a packet for the writer without waiting.
    ///
    /// Returns false once the connection is gone. A full queue means the
    /// client stopped reading: the connection is cancelled and the caller
    /// should drop it.
    pub fn send(&self, packet: ServerPacket) -> bool {
        match self.queue.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Connection {} is not reading, closing it", self.id);
                self.cancel.cancel();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Tears the connection down, flushing what is queued when the client keeps up
    pub fn close(self, reason: Option<&str>) {
        if let Some(reason) = reason {
            self.send(ServerPacket::Disconnected {
                reason: reason.to_string(),
            });
        }
        self.cancel.cancel();
    }
}

async fn read_loop(
    player: String,
    id: u64,
    mut inbound: mpsc::Receiver<ClientPacket>,
    lobby: mpsc::Sender<LobbyMessage>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            packet = inbound.recv() => match packet {
                Some(packet) => {
                    let message = LobbyMessage::Inbound {
                        player: player.clone(),
                        connection_id: id,
                        packet,
                    };
                    if lobby.send(message).await.is_err() {
                        return;
                    }
                }
                None => break,
            },
        }
    }

    debug!("Connection {} for {} closed by transport", id, player);
    let _ = lobby
        .send(LobbyMessage::Disconnected {
            player,
            connection_id: id,
        })
        .await;
}

async fn write_loop(
    id: u64,
    mut pending: mpsc::Receiver<ServerPacket>,
    outbound: mpsc::Sender<ServerPacket>,
    cancel: CancellationToken,
) {
    loop {
        // Queued packets win over cancellation so a closing notice still goes out
        let packet = tokio::select! {
            biased;
            packet = pending.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        tokio::select! {
            biased;
            result = outbound.send(packet) => {
                if result.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
    debug!("Connection {} writer stopped", id);
}
