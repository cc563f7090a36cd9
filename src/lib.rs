//! Session synchronization core for a shared 3D chessboard.
//!
//! Two clients join the same relay room and mirror one authoritative piece
//! layout: the relay assigns each side a color and the starting board in a
//! one-time `welcome`, and every completed drag becomes a `pieceMovement`
//! frame applied on the other side. Rendering, gesture capture and window
//! management live outside this crate; they talk to the core through the
//! channel enums in [`session`] (`UiToSession` in, `SessionToUi` effects
//! out) and treat renderable handles as opaque tokens.
//!
//! Module map:
//! - [`board`] — pure piece/board data and the standard starting layout.
//! - [`protocol`] — the four wire messages and their text-frame codec.
//! - [`conn`] — connection lifecycle states and disconnect reasons.
//! - [`session`] — the session controller and its single-task loop.
//! - [`client`] — the websocket task for one connection attempt.
//! - [`relay`] — the reference relay the `skaakee-relay` binary runs.

pub mod board;
pub mod client;
pub mod conn;
pub mod protocol;
pub mod relay;
pub mod session;

pub use board::{make_chess_board, Chessboard, Piece, PieceColor, PieceId, PieceType, Position};
pub use client::RoomClient;
pub use conn::{ConnectionState, DisconnectReason};
pub use protocol::{ProtocolError, RelayMessage};
pub use session::{Session, SessionError, SessionLoop, SessionToUi, UiToSession};
