use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// Board geometry, in meters. The squares match the measured size of the board
// asset, and the board is centered on the origin, so square positions come out
// symmetric around zero. The rendering collaborator consumes these when
// placing the board model and snapping dragged pieces; the half height is the
// vertical offset from the board's center to its top face, where pieces rest.
pub const SQUARE_LENGTH: f32 = 0.069586;
pub const BOARD_SIDE_LENGTH: f32 = SQUARE_LENGTH * 8.0;
pub const BOARD_HALF_HEIGHT: f32 = 0.0285;

/// World position of a piece, `[x, y, z]`. On the wire this is always a
/// 3-element array, never an object.
pub type Position = [f32; 3];

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PieceType {
    Pawn,
    Rook,
    Knight,
    Bishop,
    Queen,
    King,
}

pub const PIECE_TYPES: [PieceType; 6] = [
    PieceType::Pawn,
    PieceType::Rook,
    PieceType::Knight,
    PieceType::Bishop,
    PieceType::Queen,
    PieceType::King,
];

impl PieceType {
    pub fn index(&self) -> u8 {
        match *self {
            PieceType::Pawn => 0,
            PieceType::Rook => 1,
            PieceType::Knight => 2,
            PieceType::Bishop => 3,
            PieceType::Queen => 4,
            PieceType::King => 5,
        }
    }

    pub fn from_index(idx: u8) -> Option<PieceType> {
        PIECE_TYPES.get(idx as usize).copied()
    }

    /// How many pieces of this type one side has in the standard layout.
    pub fn standard_count(&self) -> usize {
        match *self {
            PieceType::Pawn => 8,
            PieceType::Rook | PieceType::Knight | PieceType::Bishop => 2,
            PieceType::Queen | PieceType::King => 1,
        }
    }
}

/// Serializes as `"black"` / `"white"`; that's the form the `welcome` message
/// uses for the color assignment. Inside a serialized piece the color travels
/// as an integer instead, see `protocol`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceColor {
    Black,
    White,
}

impl PieceColor {
    pub fn opposite(&self) -> PieceColor {
        match *self {
            PieceColor::Black => PieceColor::White,
            PieceColor::White => PieceColor::Black,
        }
    }

    pub fn index(&self) -> u8 {
        match *self {
            PieceColor::Black => 0,
            PieceColor::White => 1,
        }
    }

    pub fn from_index(idx: u8) -> Option<PieceColor> {
        match idx {
            0 => Some(PieceColor::Black),
            1 => Some(PieceColor::White),
            _ => None,
        }
    }
}

/// Opaque piece identifier, unique for the piece's lifetime. Generated at
/// piece creation, immutable afterwards, and the key used by both the board
/// map and the wire protocol.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PieceId(String);

impl PieceId {
    pub fn random() -> PieceId {
        PieceId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PieceId {
    fn from(s: &str) -> PieceId {
        PieceId(s.to_string())
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct Piece {
    pub id: PieceId,
    pub kind: PieceType,
    pub color: PieceColor,
    pub position: Position,
}

/// Piece set keyed by piece id. No ordering guarantee; mutation of piece
/// positions is the session controller's job, this module only constructs.
pub type Chessboard = HashMap<PieceId, Piece>;

/// World position of the center of the square at column `x`, row `z`
/// (both 0..8), with the board centered on the origin.
pub fn square_position(x: usize, z: usize) -> Position {
    [
        -BOARD_SIDE_LENGTH / 2.0 + x as f32 * SQUARE_LENGTH + SQUARE_LENGTH / 2.0,
        0.0,
        -BOARD_SIDE_LENGTH / 2.0 + z as f32 * SQUARE_LENGTH + SQUARE_LENGTH / 2.0,
    ]
}

fn new_piece(kind: PieceType, color: PieceColor, x: usize, z: usize) -> Piece {
    Piece {
        id: PieceId::random(),
        kind,
        color,
        position: square_position(x, z),
    }
}

/// Standard starting layout: black back rank at row 0, black pawns at row 1,
/// white pawns at row 6, white back rank at row 7. Pure function; every call
/// yields a fresh set of piece ids.
pub fn make_chess_board() -> Chessboard {
    const BACK_ROW: [PieceType; 8] = [
        PieceType::Rook,
        PieceType::Knight,
        PieceType::Bishop,
        PieceType::Queen,
        PieceType::King,
        PieceType::Bishop,
        PieceType::Knight,
        PieceType::Rook,
    ];

    let mut board = Chessboard::new();

    let mut init_row = |kinds: &[PieceType], color: PieceColor, z: usize| {
        for (x, kind) in kinds.iter().enumerate() {
            let piece = new_piece(*kind, color, x, z);
            board.insert(piece.id.clone(), piece);
        }
    };

    init_row(&BACK_ROW, PieceColor::Black, 0);
    init_row(&[PieceType::Pawn; 8], PieceColor::Black, 1);
    init_row(&[PieceType::Pawn; 8], PieceColor::White, 6);
    init_row(&BACK_ROW, PieceColor::White, 7);

    board
}
