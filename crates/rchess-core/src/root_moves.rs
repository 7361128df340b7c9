//! ルート局面の候補手

use chess::{Board, ChessMove, MoveGen};

use crate::types::Value;

/// ルートの候補手1つ分の探索結果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootMove {
    /// 今回の反復での評価値
    pub score: Value,
    /// 前回の反復での評価値
    pub previous_score: Value,
    /// 反復をまたいだ評価値の移動平均（aspiration windowの中心）
    pub average_score: Value,
    /// 出力用の評価値
    pub uci_score: Value,
    pub score_lowerbound: bool,
    pub score_upperbound: bool,
    pub sel_depth: i32,
    /// 終盤DBによる順位（大きいほど良い）
    pub tb_rank: i32,
    pub tb_score: Value,
    /// 読み筋。先頭が候補手自身。合法手がない局面では空。
    pub pv: Vec<ChessMove>,
}

impl RootMove {
    pub fn new(mv: ChessMove) -> Self {
        Self {
            pv: vec![mv],
            ..Self::none()
        }
    }

    /// 指し手なし（詰み・ステイルメイト局面）のプレースホルダ
    pub fn none() -> Self {
        Self {
            score: -Value::INFINITE,
            previous_score: -Value::INFINITE,
            average_score: -Value::INFINITE,
            uci_score: -Value::INFINITE,
            score_lowerbound: false,
            score_upperbound: false,
            sel_depth: 0,
            tb_rank: 0,
            tb_score: Value::ZERO,
            pv: Vec::new(),
        }
    }

    #[inline]
    pub fn first_move(&self) -> Option<ChessMove> {
        self.pv.first().copied()
    }
}

pub type RootMoves = Vec<RootMove>;

/// 合法手を列挙してルート手リストを作る。
///
/// `searchmoves` が指定されていれば、そこに含まれる手だけを合法手の生成順のまま残す。
/// 指定された手が1つも合法でなければ空リストを返す（全合法手には戻さない）。
pub fn build_root_moves(board: &Board, searchmoves: Option<&[ChessMove]>) -> RootMoves {
    MoveGen::new_legal(board)
        .filter(|m| searchmoves.is_none_or(|allowed| allowed.contains(m)))
        .map(RootMove::new)
        .collect()
}

/// 評価値の降順に安定ソートする（同点は直前の順序を保つ）。
pub fn sort_by_score(moves: &mut [RootMove]) {
    moves.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.previous_score.cmp(&a.previous_score))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{self, START_FEN};
    use chess::Square;

    #[test]
    fn test_build_root_moves_startpos() {
        let (board, _) = position::startpos();
        let moves = build_root_moves(&board, None);
        assert_eq!(moves.len(), 20);
        assert!(moves.iter().all(|rm| rm.pv.len() == 1));
        assert!(moves.iter().all(|rm| rm.score == -Value::INFINITE));
    }

    #[test]
    fn test_searchmoves_filter_keeps_generation_order() {
        let (board, _) = position::setup::<&str>(START_FEN, &[]).unwrap();
        let e4 = ChessMove::new(Square::E2, Square::E4, None);
        let d4 = ChessMove::new(Square::D2, Square::D4, None);
        let all: Vec<_> = build_root_moves(&board, None).iter().filter_map(RootMove::first_move).collect();
        let filtered = build_root_moves(&board, Some(&[e4, d4]));
        assert_eq!(filtered.len(), 2);
        let expected: Vec<_> = all.into_iter().filter(|m| *m == e4 || *m == d4).collect();
        let got: Vec<_> = filtered.iter().filter_map(RootMove::first_move).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_searchmoves_without_legal_match_is_empty() {
        let (board, _) = position::startpos();
        let bogus = ChessMove::new(Square::E2, Square::E5, None);
        assert!(build_root_moves(&board, Some(&[bogus])).is_empty());
        assert!(build_root_moves(&board, Some(&[])).is_empty());
    }

    #[test]
    fn test_sort_is_stable_on_ties() {
        let (board, _) = position::startpos();
        let mut moves = build_root_moves(&board, None);
        let order: Vec<_> = moves.iter().map(|m| m.pv[0]).collect();
        moves[5].score = Value::new(30);
        sort_by_score(&mut moves);
        assert_eq!(moves[0].pv[0], order[5]);
        assert_eq!(moves[1].pv[0], order[0]);
    }
}
