//! Root position setup and the game-history handle.
//!
//! A `chess::Board` snapshot is cheap to copy but does not know how it was
//! reached. `StateInfo` carries what the board cannot: the fifty-move
//! counter, the game ply and the hash of every earlier position, which the
//! search needs for repetition detection.

use std::str::FromStr;

use chess::{Board, ChessMove, MoveGen, Piece};
use thiserror::Error;

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("invalid FEN: {0}")]
    InvalidFen(String),
    #[error("illegal move {mv} in position {fen}")]
    IllegalMove { mv: String, fen: String },
}

/// Per-ply state that cannot be recovered from a board snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateInfo {
    pub key: u64,
    pub rule50: u32,
    pub plies_from_null: u32,
    pub game_ply: u32,
    pub last_move: Option<ChessMove>,
}

impl StateInfo {
    pub fn root(board: &Board, rule50: u32, game_ply: u32) -> Self {
        Self {
            key: board.get_hash(),
            rule50,
            plies_from_null: rule50,
            game_ply,
            last_move: None,
        }
    }

    /// State after playing `mv` on `before`, which produced `after`.
    pub fn advance(&self, before: &Board, mv: ChessMove, after: &Board) -> Self {
        let zeroing = before.piece_on(mv.get_source()) == Some(Piece::Pawn)
            || before.piece_on(mv.get_dest()).is_some();
        Self {
            key: after.get_hash(),
            rule50: if zeroing { 0 } else { self.rule50 + 1 },
            plies_from_null: self.plies_from_null + 1,
            game_ply: self.game_ply + 1,
            last_move: Some(mv),
        }
    }
}

/// Game history from the setup position up to the current root.
/// The last element always describes the root.
pub type StateList = Vec<StateInfo>;

/// Parses a move in coordinate notation (`e2e4`, `e7e8q`) against the
/// legal moves of `board`.
pub fn parse_move(board: &Board, token: &str) -> Option<ChessMove> {
    MoveGen::new_legal(board).find(|m| m.to_string() == token)
}

/// Builds a position from a FEN (or the start position) and a move list.
pub fn setup<S: AsRef<str>>(fen: &str, moves: &[S]) -> Result<(Board, StateList), PositionError> {
    let board =
        Board::from_str(fen).map_err(|_| PositionError::InvalidFen(fen.to_string()))?;

    // The board parser ignores the move counters; pick them up ourselves.
    let fields: Vec<&str> = fen.split_whitespace().collect();
    let rule50 = fields.get(4).and_then(|s| s.parse().ok()).unwrap_or(0);
    let fullmove: u32 = fields.get(5).and_then(|s| s.parse().ok()).unwrap_or(1);
    let black_to_move = board.side_to_move() == chess::Color::Black;
    let game_ply = 2 * fullmove.saturating_sub(1) + u32::from(black_to_move);

    let mut states = vec![StateInfo::root(&board, rule50, game_ply)];
    let mut board = board;
    for token in moves {
        let token = token.as_ref();
        let mv = parse_move(&board, token).ok_or_else(|| PositionError::IllegalMove {
            mv: token.to_string(),
            fen: board.to_string(),
        })?;
        let next = board.make_move_new(mv);
        let st = states[states.len() - 1].advance(&board, mv, &next);
        states.push(st);
        board = next;
    }
    Ok((board, states))
}

pub fn startpos() -> (Board, StateList) {
    let board = Board::default();
    (board, vec![StateInfo::root(&board, 0, 0)])
}
