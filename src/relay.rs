//! Reference relay: the room-scoped message router the clients connect to.
//!
//! One websocket connection per client; the request path names the room
//! (`/<roomId>`). The first client in a room becomes white and the second
//! black, each getting a one-time `welcome` with the room's authoritative
//! board. `pieceMovement` frames update the room board (so the board a late
//! joiner receives reflects play so far) and are forwarded to the opposite
//! client. The protocol carries no legality or turn information, so the
//! relay doesn't check any.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tracing::{debug, info, warn};

use crate::board::{make_chess_board, Chessboard, PieceColor, PieceId, Position};
use crate::protocol::{self, RelayMessage};

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

pub struct Relay {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl Relay {
    pub async fn bind(addr: &str) -> Result<Relay> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {}", addr))?;
        info!(addr, "relay listening");

        Ok(Relay {
            listener,
            registry: Arc::new(Registry::new()),
        })
    }

    /// Useful when bound to port 0 in tests.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let registry = self.registry.clone();
            tokio::spawn(async move {
                if let Err(err) = handle_conn(registry, stream, addr).await {
                    debug!(%addr, %err, "connection ended");
                }
            });
        }
    }
}

// Per-room registry, one lock level for the map and one for room data.

struct Registry {
    room_by_id: RwLock<HashMap<String, Arc<RoomCtx>>>,
}

struct RoomCtx {
    id: String,
    data: Mutex<RoomData>,
}

struct RoomData {
    /// The authoritative board, created once per room and updated as
    /// movements pass through.
    board: Chessboard,
    players: [Option<Player>; 2],
}

struct Player {
    to: mpsc::Sender<PeerEvent>,
}

/// What one connection's handler tells the opponent's handler.
#[derive(Debug)]
enum PeerEvent {
    Joined,
    Left,
    Moved { piece_id: PieceId, position: Position },
}

fn slot(color: PieceColor) -> usize {
    match color {
        PieceColor::White => 0,
        PieceColor::Black => 1,
    }
}

impl Registry {
    fn new() -> Registry {
        Registry {
            room_by_id: RwLock::new(HashMap::new()),
        }
    }

    /// Joins (or creates) a room. Returns the assigned color, a snapshot of
    /// the room board for the welcome, and whether the opponent is already
    /// there. First client in gets white.
    async fn join(
        &self,
        room_id: &str,
        to_player: mpsc::Sender<PeerEvent>,
    ) -> Result<(Arc<RoomCtx>, PieceColor, Chessboard, bool)> {
        let mut rooms = self.room_by_id.write().await;

        let room = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                info!(room_id, "creating room");
                Arc::new(RoomCtx {
                    id: room_id.to_string(),
                    data: Mutex::new(RoomData {
                        board: make_chess_board(),
                        players: [None, None],
                    }),
                })
            })
            .clone();
        drop(rooms);

        let mut data = room.data.lock().await;

        let color = if data.players[slot(PieceColor::White)].is_none() {
            PieceColor::White
        } else if data.players[slot(PieceColor::Black)].is_none() {
            PieceColor::Black
        } else {
            return Err(anyhow!("room {} already has both players", room_id));
        };

        data.players[slot(color)] = Some(Player { to: to_player });
        let board = data.board.clone();
        let opponent_to = data.players[slot(color.opposite())]
            .as_ref()
            .map(|p| p.to.clone());
        drop(data);

        // Let the opponent know after dropping the lock; if it is gone, its
        // own connection loop deals with that.
        if let Some(to) = &opponent_to {
            let _ = to.send(PeerEvent::Joined).await;
        }

        info!(room_id, ?color, "player joined");
        Ok((room, color, board, opponent_to.is_some()))
    }

    async fn leave(&self, room: &Arc<RoomCtx>, color: PieceColor) {
        let mut data = room.data.lock().await;
        data.players[slot(color)] = None;
        let opponent_to = data.players[slot(color.opposite())]
            .as_ref()
            .map(|p| p.to.clone());
        drop(data);

        match opponent_to {
            Some(to) => {
                let _ = to.send(PeerEvent::Left).await;
            }
            None => {
                // Possibly the last player. A join can slip in between
                // dropping the data lock and taking the map lock, so
                // emptiness is re-checked under both (same lock order as
                // `join`) before the room is destroyed.
                let mut rooms = self.room_by_id.write().await;
                let still_empty = room.data.lock().await.players.iter().all(|p| p.is_none());
                if still_empty {
                    info!(room_id = %room.id, "last player left, destroying room");
                    rooms.remove(&room.id);
                }
            }
        }
    }
}

async fn handle_conn(registry: Arc<Registry>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
    // The room id rides on the websocket request path.
    let mut path = String::new();
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        path = req.uri().path().to_string();
        Ok(resp)
    })
    .await
    .context("websocket handshake")?;

    let room_id = path.trim_matches('/').to_string();
    if room_id.is_empty() {
        return Err(anyhow!("no room id in request path {:?}", path));
    }

    debug!(%addr, %room_id, "new connection");

    let (mut to_ws, mut from_ws) = ws_stream.split();
    let (to_player_tx, from_opponent) = mpsc::channel::<PeerEvent>(8);

    let (room, color, board, opponent_present) =
        match registry.join(&room_id, to_player_tx).await {
            Ok(v) => v,
            Err(err) => {
                let _ = to_ws.send(tungstenite::Message::Close(None)).await;
                return Err(err);
            }
        };

    let res = serve_player(
        &room,
        color,
        board,
        opponent_present,
        &mut to_ws,
        &mut from_ws,
        from_opponent,
    )
    .await;

    registry.leave(&room, color).await;
    res
}

async fn serve_player(
    room: &Arc<RoomCtx>,
    color: PieceColor,
    board: Chessboard,
    opponent_present: bool,
    to_ws: &mut SplitSink<WsStream, tungstenite::Message>,
    from_ws: &mut SplitStream<WsStream>,
    mut from_opponent: mpsc::Receiver<PeerEvent>,
) -> Result<()> {
    // The one-time authoritative assignment, always the first frame.
    let welcome = protocol::encode(&RelayMessage::Welcome {
        color,
        chessboard: board,
    })?;
    to_ws.send(tungstenite::Message::Text(welcome)).await?;

    if opponent_present {
        let frame = protocol::encode(&RelayMessage::PlayerConnected)?;
        to_ws.send(tungstenite::Message::Text(frame)).await?;
    }

    loop {
        tokio::select! {
            v = from_ws.next() => {
                let msg = match v {
                    None => return Ok(()),
                    Some(Err(err)) => return Err(err.into()),
                    Some(Ok(msg)) => msg,
                };

                let frame = match msg {
                    tungstenite::Message::Text(frame) => frame,
                    tungstenite::Message::Close(_) => return Ok(()),
                    _ => continue,
                };

                match protocol::decode(&frame) {
                    Ok(RelayMessage::PieceMovement { piece_id, position }) => {
                        relay_movement(room, color, piece_id, position).await;
                    }
                    // Clients only originate movements; anything else is
                    // dropped, the connection stays up.
                    Ok(other) => warn!(room_id = %room.id, ?other, "unexpected client message"),
                    Err(err) => warn!(room_id = %room.id, %err, "dropping client frame"),
                }
            }

            Some(event) = from_opponent.recv() => {
                let relay_msg = match event {
                    PeerEvent::Joined => RelayMessage::PlayerConnected,
                    PeerEvent::Left => RelayMessage::PlayerDisconnected,
                    PeerEvent::Moved { piece_id, position } => {
                        RelayMessage::PieceMovement { piece_id, position }
                    }
                };
                let frame = protocol::encode(&relay_msg)?;
                to_ws.send(tungstenite::Message::Text(frame)).await?;
            }
        }
    }
}

/// Applies a movement to the room board and forwards it to the opponent.
async fn relay_movement(
    room: &Arc<RoomCtx>,
    sender_color: PieceColor,
    piece_id: PieceId,
    position: Position,
) {
    let mut data = room.data.lock().await;

    match data.board.get_mut(&piece_id) {
        Some(piece) => piece.position = position,
        // Forward anyway; the receiving session reports the unknown id.
        None => warn!(room_id = %room.id, %piece_id, "movement for unknown piece"),
    }

    let opponent_to = data.players[slot(sender_color.opposite())]
        .as_ref()
        .map(|p| p.to.clone());
    drop(data);

    if let Some(to) = opponent_to {
        let _ = to.send(PeerEvent::Moved { piece_id, position }).await;
    }
}
