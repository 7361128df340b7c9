//! History統計
//!
//! 探索中の手の成功/失敗を記録し、手の順序付けに利用する。スレッドごとに
//! 1組ずつ持ち、他のスレッドとは共有しない。
//!
//! - `ButterflyHistory`: [Color][from_to] -> score
//! - `CapturePieceToHistory`: [piece][to][captured] -> score
//! - `ContinuationHistory`: [in_check][capture][prev_piece_to][piece_to] -> score
//! - `CounterMoveHistory`: [piece_to] -> Move

use chess::{ChessMove, Color, Piece, Square};

// =============================================================================
// 定数
// =============================================================================

/// from_to インデックスのサイズ
const FROM_TO_SIZE: usize = 64 * 64;

/// 駒種 × 升 のインデックスサイズ
pub const PIECE_TO_SIZE: usize = 6 * 64;

/// Butterfly/Capture historyの値域
const HISTORY_LIMIT: i32 = 7183;

/// ContinuationHistoryの値域
const CONTINUATION_LIMIT: i32 = 29952;

/// clear()後のContinuationHistoryの初期値
pub const CONTINUATION_BASELINE: i16 = -71;

// =============================================================================
// 更新式
// =============================================================================

/// 範囲 [-D, D] に収まるようにボーナスを加算する。
///
/// 更新式: entry += clamp(bonus) - entry * |clamp(bonus)| / D
#[inline]
fn apply_bonus<const D: i32>(entry: &mut i16, bonus: i32) {
    let clamped = bonus.clamp(-D, D);
    let v = i32::from(*entry);
    *entry = (v + clamped - v * clamped.abs() / D) as i16;
}

#[inline]
pub fn piece_to(piece: Piece, to: Square) -> usize {
    piece.to_index() * 64 + to.to_index()
}

// =============================================================================
// テーブル
// =============================================================================

pub struct ButterflyHistory {
    table: Vec<i16>,
}

impl ButterflyHistory {
    fn new() -> Self {
        Self { table: vec![0; 2 * FROM_TO_SIZE] }
    }

    #[inline]
    fn index(us: Color, mv: ChessMove) -> usize {
        us.to_index() * FROM_TO_SIZE + mv.get_source().to_index() * 64 + mv.get_dest().to_index()
    }

    #[inline]
    pub fn get(&self, us: Color, mv: ChessMove) -> i32 {
        i32::from(self.table[Self::index(us, mv)])
    }

    #[inline]
    pub fn update(&mut self, us: Color, mv: ChessMove, bonus: i32) {
        apply_bonus::<HISTORY_LIMIT>(&mut self.table[Self::index(us, mv)], bonus);
    }

    fn clear(&mut self) {
        self.table.fill(0);
    }
}

pub struct CapturePieceToHistory {
    table: Vec<i16>,
}

impl CapturePieceToHistory {
    fn new() -> Self {
        Self { table: vec![0; PIECE_TO_SIZE * 6] }
    }

    #[inline]
    pub fn get(&self, piece: Piece, to: Square, captured: Piece) -> i32 {
        i32::from(self.table[piece_to(piece, to) * 6 + captured.to_index()])
    }

    #[inline]
    pub fn update(&mut self, piece: Piece, to: Square, captured: Piece, bonus: i32) {
        let idx = piece_to(piece, to) * 6 + captured.to_index();
        apply_bonus::<HISTORY_LIMIT>(&mut self.table[idx], bonus);
    }

    fn clear(&mut self) {
        self.table.fill(0);
    }
}

/// 直前の手（駒・移動先）と今回の手の組み合わせに対する統計
pub struct ContinuationHistory {
    // [in_check][capture][prev piece_to][piece_to]
    table: Vec<i16>,
}

impl ContinuationHistory {
    fn new() -> Self {
        Self {
            table: vec![CONTINUATION_BASELINE; 4 * PIECE_TO_SIZE * PIECE_TO_SIZE],
        }
    }

    #[inline]
    fn index(in_check: bool, capture: bool, prev: usize, cur: usize) -> usize {
        let table = usize::from(in_check) * 2 + usize::from(capture);
        (table * PIECE_TO_SIZE + prev) * PIECE_TO_SIZE + cur
    }

    #[inline]
    pub fn get(&self, in_check: bool, capture: bool, prev: usize, cur: usize) -> i32 {
        i32::from(self.table[Self::index(in_check, capture, prev, cur)])
    }

    #[inline]
    pub fn update(&mut self, in_check: bool, capture: bool, prev: usize, cur: usize, bonus: i32) {
        let idx = Self::index(in_check, capture, prev, cur);
        apply_bonus::<CONTINUATION_LIMIT>(&mut self.table[idx], bonus);
    }

    fn clear(&mut self) {
        self.table.fill(CONTINUATION_BASELINE);
    }
}

pub struct CounterMoveHistory {
    table: Vec<Option<ChessMove>>,
}

impl CounterMoveHistory {
    fn new() -> Self {
        Self { table: vec![None; PIECE_TO_SIZE] }
    }

    #[inline]
    pub fn get(&self, prev: usize) -> Option<ChessMove> {
        self.table[prev]
    }

    #[inline]
    pub fn set(&mut self, prev: usize, mv: ChessMove) {
        self.table[prev] = Some(mv);
    }

    fn clear(&mut self) {
        self.table.fill(None);
    }
}

/// 1スレッド分の学習テーブル一式
pub struct HistoryTables {
    pub main: ButterflyHistory,
    pub capture: CapturePieceToHistory,
    pub continuation: ContinuationHistory,
    pub counter_moves: CounterMoveHistory,
}

impl HistoryTables {
    pub fn new() -> Self {
        Self {
            main: ButterflyHistory::new(),
            capture: CapturePieceToHistory::new(),
            continuation: ContinuationHistory::new(),
            counter_moves: CounterMoveHistory::new(),
        }
    }

    /// 全テーブルを初期値に戻す
    pub fn clear(&mut self) {
        self.main.clear();
        self.capture.clear();
        self.continuation.clear();
        self.counter_moves.clear();
    }
}

impl Default for HistoryTables {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bonus_saturates() {
        let mut h = ButterflyHistory::new();
        let mv = ChessMove::new(Square::E2, Square::E4, None);
        for _ in 0..1000 {
            h.update(Color::White, mv, 5000);
        }
        assert!(h.get(Color::White, mv) <= HISTORY_LIMIT);
        assert!(h.get(Color::White, mv) > HISTORY_LIMIT / 2);
        assert_eq!(h.get(Color::Black, mv), 0);
    }

    #[test]
    fn test_clear_restores_baseline() {
        let mut t = HistoryTables::new();
        let mv = ChessMove::new(Square::G1, Square::F3, None);
        let prev = piece_to(Piece::Pawn, Square::E5);
        let cur = piece_to(Piece::Knight, Square::F3);
        t.main.update(Color::White, mv, 300);
        t.continuation.update(false, false, prev, cur, 300);
        t.counter_moves.set(prev, mv);

        t.clear();
        assert_eq!(t.main.get(Color::White, mv), 0);
        assert_eq!(t.continuation.get(false, false, prev, cur), i32::from(CONTINUATION_BASELINE));
        assert_eq!(t.counter_moves.get(prev), None);
    }
}
