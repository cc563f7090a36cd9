//! The session controller: the single owner of the local board, the assigned
//! color, opponent presence and the piece-id → renderable-handle bindings.
//!
//! [`Session`] is plain state with synchronous apply/begin methods;
//! [`SessionLoop`] wraps it in one task that serializes the two input paths
//! (socket frames, local drag intents) through a `tokio::select!`, so an
//! inbound movement and a local move for the same piece can never interleave.

pub mod pool;

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tracing::warn;

use crate::board::{make_chess_board, Chessboard, PieceColor, PieceId, Position};
use crate::conn::ConnectionState;
use crate::protocol::RelayMessage;
use pool::EntityPool;

pub struct Session<H> {
    room_id: String,

    board: Chessboard,
    local_color: Option<PieceColor>,
    opponent_present: bool,
    conn: ConnectionState,

    entities: EntityPool<H>,
    renderable_by_piece: HashMap<PieceId, H>,
}

/// Local, non-fatal session errors: the offending message is dropped and
/// logged, everything else stays as it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("unknown piece {0}")]
    UnknownPiece(PieceId),

    /// Color/board assignment happens exactly once per session; a second
    /// `welcome` is a protocol violation.
    #[error("duplicate welcome")]
    DuplicateWelcome,
}

impl<H: Clone> Session<H> {
    /// A new session starts with a throwaway locally generated board; the
    /// authoritative one arrives in `welcome` and replaces it wholesale.
    pub fn new(room_id: impl Into<String>, entities: EntityPool<H>) -> Session<H> {
        Session {
            room_id: room_id.into(),
            board: make_chess_board(),
            local_color: None,
            opponent_present: false,
            conn: ConnectionState::Connecting,
            entities,
            renderable_by_piece: HashMap::new(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn board(&self) -> &Chessboard {
        &self.board
    }

    pub fn local_color(&self) -> Option<PieceColor> {
        self.local_color
    }

    pub fn opponent_present(&self) -> bool {
        self.opponent_present
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.conn
    }

    /// Applies one decoded relay message, returning the effects the UI
    /// collaborator has to act on.
    pub fn apply_relay_message(
        &mut self,
        msg: RelayMessage,
    ) -> Result<Vec<SessionToUi<H>>, SessionError> {
        match msg {
            RelayMessage::Welcome { color, chessboard } => self.handle_welcome(color, chessboard),
            RelayMessage::PlayerConnected => Ok(self.set_opponent_present(true)),
            RelayMessage::PlayerDisconnected => Ok(self.set_opponent_present(false)),
            RelayMessage::PieceMovement { piece_id, position } => {
                self.handle_piece_movement(piece_id, position)
            }
        }
    }

    fn handle_welcome(
        &mut self,
        color: PieceColor,
        chessboard: Chessboard,
    ) -> Result<Vec<SessionToUi<H>>, SessionError> {
        if self.local_color.is_some() {
            return Err(SessionError::DuplicateWelcome);
        }

        self.local_color = Some(color);
        // Replace the placeholder board wholesale; its piece ids must never
        // appear in protocol traffic.
        self.board = chessboard;

        // Hand out one pre-instantiated handle per authoritative piece.
        for piece in self.board.values() {
            let handle = self.entities.take(piece.color, piece.kind);
            self.renderable_by_piece.insert(piece.id.clone(), handle);
        }

        Ok(vec![SessionToUi::BoardReady {
            board: self.board.clone(),
            local_color: color,
        }])
    }

    fn handle_piece_movement(
        &mut self,
        piece_id: PieceId,
        position: Position,
    ) -> Result<Vec<SessionToUi<H>>, SessionError> {
        // No ownership check here: a movement for a piece of either color is
        // applied. Who may move what is interaction gating in the UI layer.
        //
        // The handle is looked up before mutating so an untracked id leaves
        // the board completely untouched.
        let handle = self
            .renderable_by_piece
            .get(&piece_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownPiece(piece_id.clone()))?;

        let piece = self
            .board
            .get_mut(&piece_id)
            .ok_or_else(|| SessionError::UnknownPiece(piece_id.clone()))?;
        piece.position = position;

        Ok(vec![SessionToUi::PieceMoved {
            piece_id,
            handle,
            position,
        }])
    }

    fn set_opponent_present(&mut self, present: bool) -> Vec<SessionToUi<H>> {
        // Repeated identical notifications are harmless and emit nothing.
        if self.opponent_present == present {
            return Vec::new();
        }
        self.opponent_present = present;
        vec![SessionToUi::PresenceChanged(present)]
    }

    /// Records a connection transition. Opponent presence cannot be trusted
    /// once the local link is down, so entering `Disconnected` also drops it.
    pub fn apply_connection_state(&mut self, state: ConnectionState) -> Vec<SessionToUi<H>> {
        let mut effects = Vec::new();
        if matches!(state, ConnectionState::Disconnected(_)) {
            effects.extend(self.set_opponent_present(false));
        }
        self.conn = state.clone();
        effects.push(SessionToUi::ConnectionChanged(state));
        effects
    }

    /// Called once per completed local drag: applies the position
    /// optimistically and returns the exact wire message to send. On
    /// `UnknownPiece` nothing is produced and the board is untouched.
    pub fn begin_local_move(
        &mut self,
        piece_id: &PieceId,
        position: Position,
    ) -> Result<RelayMessage, SessionError> {
        // Only pieces bound at welcome can move; ids from the placeholder
        // board, or any move before the welcome, never reach the wire.
        if !self.renderable_by_piece.contains_key(piece_id) {
            return Err(SessionError::UnknownPiece(piece_id.clone()));
        }

        let piece = self
            .board
            .get_mut(piece_id)
            .ok_or_else(|| SessionError::UnknownPiece(piece_id.clone()))?;
        piece.position = position;

        Ok(RelayMessage::PieceMovement {
            piece_id: piece_id.clone(),
            position,
        })
    }

    /// Returns every handle to the pool and clears the bindings and the
    /// assigned color, so a reused session screen can take a fresh
    /// `welcome`. Idempotent.
    pub fn reset(&mut self) {
        let bindings: Vec<(PieceId, H)> = self.renderable_by_piece.drain().collect();
        for (piece_id, handle) in bindings {
            match self.board.get(&piece_id) {
                Some(piece) => self.entities.put_back(piece.color, piece.kind, handle),
                None => warn!(%piece_id, "bound handle for a piece the board doesn't know"),
            }
        }
        self.local_color = None;
    }
}

/// One task owning the [`Session`]; everything that mutates it flows through
/// `run()`'s select loop.
pub struct SessionLoop<H> {
    session: Session<H>,

    from_client: mpsc::Receiver<ClientToSession>,
    from_ui: mpsc::Receiver<UiToSession>,

    to_client: mpsc::Sender<SessionToClient>,
    to_ui: mpsc::Sender<SessionToUi<H>>,
}

impl<H: Clone> SessionLoop<H> {
    pub fn new(
        session: Session<H>,
        from_client: mpsc::Receiver<ClientToSession>,
        from_ui: mpsc::Receiver<UiToSession>,
        to_client: mpsc::Sender<SessionToClient>,
        to_ui: mpsc::Sender<SessionToUi<H>>,
    ) -> SessionLoop<H> {
        SessionLoop {
            session,
            from_client,
            from_ui,
            to_client,
            to_ui,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                Some(msg) = self.from_client.recv() => {
                    self.handle_client_msg(msg).await?;
                }

                Some(msg) = self.from_ui.recv() => {
                    self.handle_ui_msg(msg).await?;
                }

                // Both the socket task and the UI are gone; nothing left to
                // serialize.
                else => return Ok(()),
            }
        }
    }

    async fn handle_client_msg(&mut self, msg: ClientToSession) -> Result<()> {
        match msg {
            ClientToSession::Relay(relay_msg) => {
                // A frame decoded just before teardown can still arrive here
                // after the disconnect; it must not touch torn-down state.
                if matches!(self.session.connection(), ConnectionState::Disconnected(_)) {
                    warn!("dropping relay message received after disconnect");
                    return Ok(());
                }

                match self.session.apply_relay_message(relay_msg) {
                    Ok(effects) => self.emit(effects).await?,
                    Err(err) => warn!(%err, "dropping relay message"),
                }
            }

            ClientToSession::Conn(state) => {
                let effects = self.session.apply_connection_state(state);
                self.emit(effects).await?;
            }
        }

        Ok(())
    }

    async fn handle_ui_msg(&mut self, msg: UiToSession) -> Result<()> {
        match msg {
            UiToSession::SubmitMove { piece_id, position } => {
                match self.session.begin_local_move(&piece_id, position) {
                    // Fire-and-forget: if the socket task is gone the move
                    // is simply never delivered (at-most-once).
                    Ok(outbound) => {
                        let _ = self.to_client.send(SessionToClient::Send(outbound)).await;
                    }
                    Err(err) => warn!(%err, "dropping local move"),
                }
            }

            UiToSession::Disconnect => {
                let _ = self.to_client.send(SessionToClient::Disconnect).await;
            }

            UiToSession::Reset => {
                self.session.reset();
            }
        }

        Ok(())
    }

    async fn emit(&mut self, effects: Vec<SessionToUi<H>>) -> Result<()> {
        for effect in effects {
            self.to_ui
                .send(effect)
                .await
                .map_err(|_| anyhow!("UI receiver dropped"))?;
        }
        Ok(())
    }
}

/// Effects the session emits for the UI collaborator.
#[derive(Debug)]
pub enum SessionToUi<H> {
    /// One-time, after the authoritative `welcome`: populate renderables for
    /// this board; each piece id is already bound to a handle.
    BoardReady {
        board: Chessboard,
        local_color: PieceColor,
    },
    /// Move the renderable behind `handle` to `position`.
    PieceMoved {
        piece_id: PieceId,
        handle: H,
        position: Position,
    },
    PresenceChanged(bool),
    ConnectionChanged(ConnectionState),
}

/// Calls from the UI collaborator into the session.
#[derive(Debug)]
pub enum UiToSession {
    /// A completed (or throttled intermediate) drag of a local piece.
    SubmitMove {
        piece_id: PieceId,
        position: Position,
    },
    Disconnect,
    Reset,
}

/// Messages from the socket task to the session.
#[derive(Debug)]
pub enum ClientToSession {
    Relay(RelayMessage),
    Conn(ConnectionState),
}

/// Messages from the session to the socket task.
#[derive(Debug)]
pub enum SessionToClient {
    Send(RelayMessage),
    Disconnect,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{PieceType, PIECE_TYPES};
    use crate::conn::DisconnectReason;

    // Handles in tests are plain numbers.
    fn test_pool() -> EntityPool<u32> {
        let mut next = 0;
        EntityPool::new(|_, _| {
            next += 1;
            next
        })
    }

    fn test_session() -> Session<u32> {
        Session::new("R1", test_pool())
    }

    /// A session that already processed `welcome{white, standard layout}`.
    fn welcomed_session() -> (Session<u32>, Chessboard) {
        let mut session = test_session();
        let board = make_chess_board();
        session
            .apply_relay_message(RelayMessage::Welcome {
                color: PieceColor::White,
                chessboard: board.clone(),
            })
            .unwrap();
        (session, board)
    }

    #[test]
    fn welcome_assigns_color_and_replaces_the_board() {
        let mut session = test_session();
        let placeholder_ids: Vec<PieceId> = session.board().keys().cloned().collect();

        let authoritative = make_chess_board();
        let effects = session
            .apply_relay_message(RelayMessage::Welcome {
                color: PieceColor::Black,
                chessboard: authoritative.clone(),
            })
            .unwrap();

        assert_eq!(session.local_color(), Some(PieceColor::Black));
        assert_eq!(session.board().len(), 32);
        // The placeholder is gone wholesale; none of its ids survive.
        for id in &placeholder_ids {
            assert!(!session.board().contains_key(id));
        }
        assert!(matches!(
            effects.as_slice(),
            [SessionToUi::BoardReady { local_color: PieceColor::Black, .. }]
        ));
    }

    #[test]
    fn welcome_binds_a_handle_to_every_piece() {
        let (session, board) = welcomed_session();
        assert_eq!(session.renderable_by_piece.len(), 32);
        for id in board.keys() {
            assert!(session.renderable_by_piece.contains_key(id));
        }
        // The pool is fully handed out.
        for color in [PieceColor::Black, PieceColor::White] {
            for kind in PIECE_TYPES {
                assert_eq!(session.entities.available(color, kind), 0);
            }
        }
    }

    #[test]
    fn second_welcome_is_rejected_and_changes_nothing() {
        let (mut session, board) = welcomed_session();

        let err = session
            .apply_relay_message(RelayMessage::Welcome {
                color: PieceColor::Black,
                chessboard: make_chess_board(),
            })
            .unwrap_err();

        assert_eq!(err, SessionError::DuplicateWelcome);
        assert_eq!(session.local_color(), Some(PieceColor::White));
        for id in board.keys() {
            assert!(session.board().contains_key(id));
        }
    }

    #[test]
    fn player_connected_is_idempotent() {
        let mut session = test_session();

        let effects = session
            .apply_relay_message(RelayMessage::PlayerConnected)
            .unwrap();
        assert!(session.opponent_present());
        assert!(matches!(
            effects.as_slice(),
            [SessionToUi::PresenceChanged(true)]
        ));

        // Same notification again: still present, no duplicate effect.
        let effects = session
            .apply_relay_message(RelayMessage::PlayerConnected)
            .unwrap();
        assert!(session.opponent_present());
        assert!(effects.is_empty());
    }

    #[test]
    fn movement_for_unknown_piece_leaves_the_board_alone() {
        let (mut session, board) = welcomed_session();

        let err = session
            .apply_relay_message(RelayMessage::PieceMovement {
                piece_id: PieceId::from("no-such-piece"),
                position: [0.0, 0.0, 0.0],
            })
            .unwrap_err();

        assert_eq!(err, SessionError::UnknownPiece(PieceId::from("no-such-piece")));
        for (id, piece) in &board {
            assert_eq!(session.board()[id].position, piece.position);
        }
    }

    #[test]
    fn inbound_movement_updates_the_piece_and_emits_its_handle() {
        let (mut session, board) = welcomed_session();
        let id = board.keys().next().unwrap().clone();
        let bound_handle = session.renderable_by_piece[&id];

        let effects = session
            .apply_relay_message(RelayMessage::PieceMovement {
                piece_id: id.clone(),
                position: [0.1, 0.2, 0.3],
            })
            .unwrap();

        assert_eq!(session.board()[&id].position, [0.1, 0.2, 0.3]);
        match effects.as_slice() {
            [SessionToUi::PieceMoved {
                piece_id,
                handle,
                position,
            }] => {
                assert_eq!(piece_id, &id);
                assert_eq!(*handle, bound_handle);
                assert_eq!(*position, [0.1, 0.2, 0.3]);
            }
            other => panic!("unexpected effects: {:?}", other),
        }
    }

    #[test]
    fn local_move_is_applied_optimistically_and_returned_as_wire_message() {
        // Client A, welcomed as white, pushes a pawn forward.
        let (mut session, board) = welcomed_session();
        let pawn = board
            .values()
            .find(|p| p.color == PieceColor::White && p.kind == PieceType::Pawn)
            .unwrap();
        let [x, y, z] = pawn.position;
        let target = [x, y, z + 0.07];

        let outbound = session.begin_local_move(&pawn.id, target).unwrap();

        assert_eq!(
            outbound,
            RelayMessage::PieceMovement {
                piece_id: pawn.id.clone(),
                position: target,
            }
        );
        assert_eq!(session.board()[&pawn.id].position, target);
    }

    #[test]
    fn local_move_of_unknown_piece_produces_no_message() {
        let (mut session, board) = welcomed_session();

        let err = session
            .begin_local_move(&PieceId::from("ghost"), [0.0, 0.0, 0.0])
            .unwrap_err();

        assert_eq!(err, SessionError::UnknownPiece(PieceId::from("ghost")));
        for (id, piece) in &board {
            assert_eq!(session.board()[id].position, piece.position);
        }
    }

    #[test]
    fn local_move_before_welcome_produces_no_message() {
        let mut session = test_session();
        let id = session.board().keys().next().unwrap().clone();
        let before = session.board()[&id].position;

        let err = session.begin_local_move(&id, [0.0, 0.0, 0.0]).unwrap_err();

        assert_eq!(err, SessionError::UnknownPiece(id.clone()));
        assert_eq!(session.board()[&id].position, before);
    }

    #[test]
    fn placeholder_ids_never_reach_the_wire() {
        let mut session = test_session();
        let placeholder_id = session.board().keys().next().unwrap().clone();

        session
            .apply_relay_message(RelayMessage::Welcome {
                color: PieceColor::White,
                chessboard: make_chess_board(),
            })
            .unwrap();

        // The placeholder piece is not tracked anymore, so no message comes
        // out of a move that references it.
        assert!(session
            .begin_local_move(&placeholder_id, [0.0, 0.0, 0.0])
            .is_err());
    }

    #[test]
    fn disconnect_drops_opponent_presence_and_keeps_the_reason() {
        let (mut session, _) = welcomed_session();
        session
            .apply_relay_message(RelayMessage::PlayerConnected)
            .unwrap();
        assert!(session.opponent_present());

        let effects = session.apply_connection_state(ConnectionState::Disconnected(Some(
            DisconnectReason::Canceled,
        )));

        assert!(!session.opponent_present());
        assert_eq!(
            session.connection().disconnect_reason().map(|r| r.to_string()),
            Some("Canceled".to_string())
        );
        assert!(matches!(
            effects.as_slice(),
            [
                SessionToUi::PresenceChanged(false),
                SessionToUi::ConnectionChanged(ConnectionState::Disconnected(_)),
            ]
        ));
    }

    #[test]
    fn connecting_again_clears_the_old_reason() {
        let mut session = test_session();
        session.apply_connection_state(ConnectionState::Disconnected(Some(
            DisconnectReason::Timeout,
        )));
        session.apply_connection_state(ConnectionState::Connecting);
        session.apply_connection_state(ConnectionState::Connected);
        assert!(session.connection().is_connected());
        assert_eq!(session.connection().disconnect_reason(), None);
    }

    #[test]
    fn reset_returns_handles_and_is_idempotent() {
        let (mut session, _) = welcomed_session();

        session.reset();
        session.reset();

        assert!(session.renderable_by_piece.is_empty());
        assert_eq!(session.local_color(), None);
        for color in [PieceColor::Black, PieceColor::White] {
            for kind in PIECE_TYPES {
                assert_eq!(
                    session.entities.available(color, kind),
                    kind.standard_count()
                );
            }
        }
    }

    #[tokio::test]
    async fn frames_after_teardown_are_discarded() {
        let (to_session_tx, from_client) = mpsc::channel(8);
        let (ui_tx, from_ui) = mpsc::channel::<UiToSession>(8);
        // No UI intents in this test; close the channel so run() can exit.
        drop(ui_tx);
        let (to_client, _client_rx) = mpsc::channel(8);
        let (to_ui, mut ui_rx) = mpsc::channel(8);

        let (session, board) = welcomed_session();
        let id = board.keys().next().unwrap().clone();
        let before = session.board()[&id].position;

        let mut session_loop = SessionLoop::new(session, from_client, from_ui, to_client, to_ui);

        to_session_tx
            .send(ClientToSession::Conn(ConnectionState::Disconnected(Some(
                DisconnectReason::Canceled,
            ))))
            .await
            .unwrap();
        // A frame decoded before the teardown raced in after it.
        to_session_tx
            .send(ClientToSession::Relay(RelayMessage::PieceMovement {
                piece_id: id.clone(),
                position: [9.0, 9.0, 9.0],
            }))
            .await
            .unwrap();
        drop(to_session_tx);

        session_loop.run().await.unwrap();

        assert_eq!(session_loop.session.board()[&id].position, before);

        // Only the connection transition (and the presence drop) made it to
        // the UI; the late movement produced nothing.
        let mut saw_piece_moved = false;
        while let Ok(effect) = ui_rx.try_recv() {
            if matches!(effect, SessionToUi::PieceMoved { .. }) {
                saw_piece_moved = true;
            }
        }
        assert!(!saw_piece_moved);
    }
}
