//! Wire messages exchanged with the relay, and their text-frame codec.
//!
//! Every frame is a JSON object with a required `type` field. Decoding is
//! two-stage: first only `type` is read, then the full shape for that type.
//! A failure in the second stage is reported as a malformed payload and the
//! frame is dropped by the caller; it never tears down the connection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::board::{Chessboard, Piece, PieceColor, PieceId, PieceType, Position};

/// The message taxonomy of the relay protocol.
///
/// `Welcome` and the two presence notifications only travel relay→client;
/// `PieceMovement` is bidirectional.
#[derive(Clone, Debug, PartialEq)]
pub enum RelayMessage {
    /// One-time authoritative assignment: the local color and the board that
    /// replaces any locally generated placeholder wholesale.
    Welcome {
        color: PieceColor,
        chessboard: Chessboard,
    },
    PlayerConnected,
    PlayerDisconnected,
    PieceMovement {
        piece_id: PieceId,
        position: Position,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// `type` is well-formed but not one of the recognized values. Dropped
    /// and logged, so the relay can grow new message types without breaking
    /// old clients.
    #[error("unknown message type {0:?}")]
    UnknownMessageType(String),

    /// `type` is recognized but required sub-fields are missing or of the
    /// wrong shape. Also used for frames that are not JSON objects at all.
    #[error("malformed {kind} payload: {detail}")]
    MalformedPayload { kind: String, detail: String },

    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

const KNOWN_TYPES: [&str; 4] = [
    "welcome",
    "playerConnected",
    "playerDisconnected",
    "pieceMovement",
];

// Wire-level shapes. `Frame` mirrors `RelayMessage` but carries pieces in
// their serialized form (type and color as small integers).

#[derive(Deserialize)]
struct TypeProbe {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Frame {
    Welcome {
        color: PieceColor,
        chessboard: HashMap<PieceId, WirePiece>,
    },
    PlayerConnected,
    PlayerDisconnected,
    #[serde(rename_all = "camelCase")]
    PieceMovement {
        piece_uuid: PieceId,
        position: Position,
    },
}

/// Serialized piece: `{uuid, type: 0..5, color: 0|1, position: [f32;3]}`.
#[derive(Serialize, Deserialize)]
struct WirePiece {
    uuid: PieceId,
    #[serde(rename = "type")]
    kind: u8,
    color: u8,
    position: Position,
}

impl From<&Piece> for WirePiece {
    fn from(p: &Piece) -> WirePiece {
        WirePiece {
            uuid: p.id.clone(),
            kind: p.kind.index(),
            color: p.color.index(),
            position: p.position,
        }
    }
}

impl WirePiece {
    fn into_piece(self) -> Result<Piece, String> {
        let kind = PieceType::from_index(self.kind)
            .ok_or_else(|| format!("piece type {} out of range", self.kind))?;
        let color = PieceColor::from_index(self.color)
            .ok_or_else(|| format!("piece color {} out of range", self.color))?;
        Ok(Piece {
            id: self.uuid,
            kind,
            color,
            position: self.position,
        })
    }
}

/// Decodes one text frame. See the module docs for the two-stage scheme.
pub fn decode(frame: &str) -> Result<RelayMessage, ProtocolError> {
    let probe: TypeProbe =
        serde_json::from_str(frame).map_err(|err| ProtocolError::MalformedPayload {
            kind: "envelope".to_string(),
            detail: err.to_string(),
        })?;

    if !KNOWN_TYPES.contains(&probe.kind.as_str()) {
        return Err(ProtocolError::UnknownMessageType(probe.kind));
    }

    let malformed = |detail: String| ProtocolError::MalformedPayload {
        kind: probe.kind.clone(),
        detail,
    };

    let parsed: Frame = serde_json::from_str(frame).map_err(|err| malformed(err.to_string()))?;

    Ok(match parsed {
        Frame::Welcome { color, chessboard } => {
            // The map on the wire is keyed by piece id with the id repeated
            // inside each piece; we trust the embedded one.
            let mut board = Chessboard::with_capacity(chessboard.len());
            for (_, wire) in chessboard {
                let piece = wire.into_piece().map_err(&malformed)?;
                board.insert(piece.id.clone(), piece);
            }
            RelayMessage::Welcome {
                color,
                chessboard: board,
            }
        }
        Frame::PlayerConnected => RelayMessage::PlayerConnected,
        Frame::PlayerDisconnected => RelayMessage::PlayerDisconnected,
        Frame::PieceMovement {
            piece_uuid,
            position,
        } => RelayMessage::PieceMovement {
            piece_id: piece_uuid,
            position,
        },
    })
}

/// Encodes a message into the exact wire shape.
pub fn encode(msg: &RelayMessage) -> Result<String, ProtocolError> {
    let frame = match msg {
        RelayMessage::Welcome { color, chessboard } => Frame::Welcome {
            color: *color,
            chessboard: chessboard
                .iter()
                .map(|(id, piece)| (id.clone(), WirePiece::from(piece)))
                .collect(),
        },
        RelayMessage::PlayerConnected => Frame::PlayerConnected,
        RelayMessage::PlayerDisconnected => Frame::PlayerDisconnected,
        RelayMessage::PieceMovement { piece_id, position } => Frame::PieceMovement {
            piece_uuid: piece_id.clone(),
            position: *position,
        },
    };

    Ok(serde_json::to_string(&frame)?)
}
