//! Websocket client task: owns the socket for one connection attempt and
//! reports every lifecycle transition to the session loop.
//!
//! There is no automatic reconnect in here. `run()` performs exactly one
//! `connecting → connected → disconnected` pass; retrying means the owner
//! calls it again on a fresh client.

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, warn};
use url::Url;

use crate::conn::{ConnectionState, DisconnectReason};
use crate::protocol;
use crate::session::{ClientToSession, SessionToClient};

pub struct RoomClient {
    relay_url: Url,
    room_id: String,
    connect_timeout: Duration,

    from_session: mpsc::Receiver<SessionToClient>,
    to_session: mpsc::Sender<ClientToSession>,
}

impl RoomClient {
    pub fn new(
        relay_url: Url,
        room_id: impl Into<String>,
        connect_timeout: Duration,
        from_session: mpsc::Receiver<SessionToClient>,
        to_session: mpsc::Sender<ClientToSession>,
    ) -> RoomClient {
        RoomClient {
            relay_url,
            room_id: room_id.into(),
            connect_timeout,
            from_session,
            to_session,
        }
    }

    /// The relay scopes a connection to a room via the request path.
    fn room_url(&self) -> String {
        format!(
            "{}/{}",
            self.relay_url.as_str().trim_end_matches('/'),
            self.room_id
        )
    }

    pub async fn run(&mut self) -> Result<()> {
        self.set_state(ConnectionState::Connecting).await?;

        let url = self.room_url();
        debug!(%url, "connecting to relay");

        let connect = timeout(self.connect_timeout, connect_async(url.as_str()));
        tokio::pin!(connect);

        // Session commands are watched while the attempt is pending, so a
        // teardown lands immediately instead of after the connect resolves.
        let ws_stream = loop {
            tokio::select! {
                res = &mut connect => match res {
                    Err(_elapsed) => {
                        self.set_state(ConnectionState::Disconnected(Some(
                            DisconnectReason::Timeout,
                        )))
                        .await?;
                        return Ok(());
                    }
                    Ok(Err(err)) => {
                        self.set_state(ConnectionState::Disconnected(Some(
                            DisconnectReason::Transport(err.to_string()),
                        )))
                        .await?;
                        return Ok(());
                    }
                    Ok(Ok((ws_stream, _response))) => break ws_stream,
                },

                cmd = self.from_session.recv() => match cmd {
                    None | Some(SessionToClient::Disconnect) => {
                        self.set_state(ConnectionState::Disconnected(Some(
                            DisconnectReason::Canceled,
                        )))
                        .await?;
                        return Ok(());
                    }
                    // No link to carry it yet; at-most-once allows the drop.
                    Some(SessionToClient::Send(_)) => {
                        warn!("dropping outbound message while still connecting");
                    }
                },
            }
        };

        self.set_state(ConnectionState::Connected).await?;

        let reason = self.drive(ws_stream).await;
        self.set_state(ConnectionState::Disconnected(Some(reason)))
            .await?;

        Ok(())
    }

    /// Pumps frames both ways until the connection ends, returning why.
    async fn drive(
        &mut self,
        ws_stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> DisconnectReason {
        let (mut to_ws, mut from_ws) = ws_stream.split();

        loop {
            tokio::select! {
                v = from_ws.next() => {
                    let msg = match v {
                        None => return DisconnectReason::RemoteClose("connection closed".to_string()),
                        Some(Err(err)) => return DisconnectReason::Transport(err.to_string()),
                        Some(Ok(msg)) => msg,
                    };

                    match msg {
                        tungstenite::Message::Text(frame) => match protocol::decode(&frame) {
                            Ok(relay_msg) => {
                                if self.to_session.send(ClientToSession::Relay(relay_msg)).await.is_err() {
                                    // Session loop is gone; treat as an owner-side close.
                                    return DisconnectReason::Canceled;
                                }
                            }
                            // A single bad frame never tears down the session.
                            Err(err) => warn!(%err, "dropping inbound frame"),
                        },

                        tungstenite::Message::Close(close_frame) => {
                            let why = match close_frame {
                                Some(f) => format!("{} {}", f.code, f.reason),
                                None => "closed without reason".to_string(),
                            };
                            return DisconnectReason::RemoteClose(why);
                        }

                        // Ping/pong and anything else is transport noise.
                        _ => {}
                    }
                }

                cmd = self.from_session.recv() => {
                    match cmd {
                        // Explicit teardown, or the session dropped its sender.
                        None | Some(SessionToClient::Disconnect) => {
                            let _ = to_ws.send(tungstenite::Message::Close(None)).await;
                            return DisconnectReason::Canceled;
                        }

                        Some(SessionToClient::Send(relay_msg)) => {
                            let frame = match protocol::encode(&relay_msg) {
                                Ok(frame) => frame,
                                Err(err) => {
                                    warn!(%err, "dropping outbound message");
                                    continue;
                                }
                            };

                            // Fire-and-forget: no acknowledgement is tracked.
                            if let Err(err) = to_ws.send(tungstenite::Message::Text(frame)).await {
                                return DisconnectReason::Transport(err.to_string());
                            }
                        }
                    }
                }
            }
        }
    }

    async fn set_state(&mut self, state: ConnectionState) -> Result<()> {
        self.to_session
            .send(ClientToSession::Conn(state))
            .await
            .map_err(|_| anyhow!("session loop is gone"))
    }
}
