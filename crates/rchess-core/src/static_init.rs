//! Process-wide tables built once, shared read-only by every session.
//!
//! Sessions call [`init`] at startup. The build runs under a single mutex so
//! that sessions starting at the same moment neither build twice nor observe
//! a half-built table.

use std::sync::atomic::{AtomicUsize, Ordering};

use chess::{Color, Piece, Square};
use parking_lot::Mutex;

/// Material values [Pawn, Knight, Bishop, Rook, Queen, King] (midgame, endgame)
pub const PIECE_VALUE_MG: [i32; 6] = [82, 337, 365, 477, 1025, 0];
pub const PIECE_VALUE_EG: [i32; 6] = [94, 281, 297, 512, 936, 0];

/// Game phase weight per piece type; a full board sums to `TOTAL_PHASE`.
pub const PHASE_WEIGHT: [i32; 6] = [0, 1, 1, 2, 4, 0];
pub const TOTAL_PHASE: i32 = 24;

// Tables are written rank 8 first, from White's point of view.
#[rustfmt::skip]
const PAWN_MG: [i32; 64] = [
      0,   0,   0,   0,   0,   0,   0,   0,
     50,  50,  50,  50,  50,  50,  50,  50,
     10,  10,  20,  30,  30,  20,  10,  10,
      5,   5,  10,  25,  25,  10,   5,   5,
      0,   0,   0,  20,  20,   0,   0,   0,
      5,  -5, -10,   0,   0, -10,  -5,   5,
      5,  10,  10, -20, -20,  10,  10,   5,
      0,   0,   0,   0,   0,   0,   0,   0,
];

#[rustfmt::skip]
const PAWN_EG: [i32; 64] = [
      0,   0,   0,   0,   0,   0,   0,   0,
     80,  80,  80,  80,  80,  80,  80,  80,
     50,  50,  50,  50,  50,  50,  50,  50,
     30,  30,  30,  30,  30,  30,  30,  30,
     20,  20,  20,  20,  20,  20,  20,  20,
     10,  10,  10,  10,  10,  10,  10,  10,
     10,  10,  10,  10,  10,  10,  10,  10,
      0,   0,   0,   0,   0,   0,   0,   0,
];

#[rustfmt::skip]
const KNIGHT: [i32; 64] = [
    -50, -40, -30, -30, -30, -30, -40, -50,
    -40, -20,   0,   0,   0,   0, -20, -40,
    -30,   0,  10,  15,  15,  10,   0, -30,
    -30,   5,  15,  20,  20,  15,   5, -30,
    -30,   0,  15,  20,  20,  15,   0, -30,
    -30,   5,  10,  15,  15,  10,   5, -30,
    -40, -20,   0,   5,   5,   0, -20, -40,
    -50, -40, -30, -30, -30, -30, -40, -50,
];

#[rustfmt::skip]
const BISHOP: [i32; 64] = [
    -20, -10, -10, -10, -10, -10, -10, -20,
    -10,   0,   0,   0,   0,   0,   0, -10,
    -10,   0,   5,  10,  10,   5,   0, -10,
    -10,   5,   5,  10,  10,   5,   5, -10,
    -10,   0,  10,  10,  10,  10,   0, -10,
    -10,  10,  10,  10,  10,  10,  10, -10,
    -10,   5,   0,   0,   0,   0,   5, -10,
    -20, -10, -10, -10, -10, -10, -10, -20,
];

#[rustfmt::skip]
const ROOK: [i32; 64] = [
      0,   0,   0,   0,   0,   0,   0,   0,
      5,  10,  10,  10,  10,  10,  10,   5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
      0,   0,   0,   5,   5,   0,   0,   0,
];

#[rustfmt::skip]
const QUEEN: [i32; 64] = [
    -20, -10, -10,  -5,  -5, -10, -10, -20,
    -10,   0,   0,   0,   0,   0,   0, -10,
    -10,   0,   5,   5,   5,   5,   0, -10,
     -5,   0,   5,   5,   5,   5,   0,  -5,
      0,   0,   5,   5,   5,   5,   0,  -5,
    -10,   5,   5,   5,   5,   5,   0, -10,
    -10,   0,   5,   0,   0,   0,   0, -10,
    -20, -10, -10,  -5,  -5, -10, -10, -20,
];

#[rustfmt::skip]
const KING_MG: [i32; 64] = [
    -30, -40, -40, -50, -50, -40, -40, -30,
    -30, -40, -40, -50, -50, -40, -40, -30,
    -30, -40, -40, -50, -50, -40, -40, -30,
    -30, -40, -40, -50, -50, -40, -40, -30,
    -20, -30, -30, -40, -40, -30, -30, -20,
    -10, -20, -20, -20, -20, -20, -20, -10,
     20,  20,   0,   0,   0,   0,  20,  20,
     20,  30,  10,   0,   0,  10,  30,  20,
];

#[rustfmt::skip]
const KING_EG: [i32; 64] = [
    -50, -40, -30, -20, -20, -30, -40, -50,
    -30, -20, -10,   0,   0, -10, -20, -30,
    -30, -10,  20,  30,  30,  20, -10, -30,
    -30, -10,  30,  40,  40,  30, -10, -30,
    -30, -10,  30,  40,  40,  30, -10, -30,
    -30, -10,  20,  30,  30,  20, -10, -30,
    -30, -30,   0,   0,   0,   0, -30, -30,
    -50, -30, -30, -30, -30, -30, -30, -50,
];

/// Material plus piece-square bonus, indexed `[color][piece][square]`.
pub struct StaticTables {
    psq_mg: [[[i32; 64]; 6]; 2],
    psq_eg: [[[i32; 64]; 6]; 2],
}

impl StaticTables {
    fn build() -> Self {
        let mg_tables = [&PAWN_MG, &KNIGHT, &BISHOP, &ROOK, &QUEEN, &KING_MG];
        let eg_tables = [&PAWN_EG, &KNIGHT, &BISHOP, &ROOK, &QUEEN, &KING_EG];

        let mut psq_mg = [[[0; 64]; 6]; 2];
        let mut psq_eg = [[[0; 64]; 6]; 2];
        for piece in 0..6 {
            for sq in 0..64 {
                // square index 0 is a1; the tables start at a8
                let white = sq ^ 56;
                psq_mg[0][piece][sq] = PIECE_VALUE_MG[piece] + mg_tables[piece][white];
                psq_eg[0][piece][sq] = PIECE_VALUE_EG[piece] + eg_tables[piece][white];
                psq_mg[1][piece][sq] = PIECE_VALUE_MG[piece] + mg_tables[piece][sq];
                psq_eg[1][piece][sq] = PIECE_VALUE_EG[piece] + eg_tables[piece][sq];
            }
        }
        Self { psq_mg, psq_eg }
    }

    #[inline]
    pub fn psq(&self, color: Color, piece: Piece, sq: Square) -> (i32, i32) {
        let (c, p, s) = (color.to_index(), piece.to_index(), sq.to_index());
        (self.psq_mg[c][p][s], self.psq_eg[c][p][s])
    }
}

static TABLES: Mutex<Option<&'static StaticTables>> = parking_lot::const_mutex(None);
static INIT_RUNS: AtomicUsize = AtomicUsize::new(0);

/// Returns the shared tables, building them on first use.
pub fn init() -> &'static StaticTables {
    let mut slot = TABLES.lock();
    if let Some(tables) = *slot {
        return tables;
    }
    let tables: &'static StaticTables = Box::leak(Box::new(StaticTables::build()));
    INIT_RUNS.fetch_add(1, Ordering::SeqCst);
    log::debug!("static tables initialized");
    *slot = Some(tables);
    tables
}

/// How many times the tables have been built in this process.
pub fn init_count() -> usize {
    INIT_RUNS.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let a = init();
        let b = init();
        assert!(std::ptr::eq(a, b));
        assert_eq!(init_count(), 1);
    }

    #[test]
    fn test_tables_are_mirrored_between_colors() {
        let t = init();
        let white = t.psq(Color::White, Piece::Knight, Square::B1);
        let black = t.psq(Color::Black, Piece::Knight, Square::B8);
        assert_eq!(white, black);
        // a pawn about to promote is worth more than one at home
        assert!(t.psq(Color::White, Piece::Pawn, Square::E7).0 > t.psq(Color::White, Piece::Pawn, Square::E2).0);
        assert!(t.psq(Color::Black, Piece::Pawn, Square::E2).1 > t.psq(Color::Black, Piece::Pawn, Square::E7).1);
    }
}
