//! 最善スレッドの選択
//!
//! 各スレッドの (評価値, 完了深さ, 読み筋) から、採用するスレッドを決める。
//! 同じ初手を選んだスレッドの票を合算し、深く読んだスレッドほど重く数える。
//! 入力のスナップショットだけで決まる純粋関数で、全スレッドの停止後に呼ぶ。

use std::collections::HashMap;

use chess::ChessMove;

use crate::thread::Worker;
use crate::types::{Depth, Value};

/// 選択に使う1スレッド分の結果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadSnapshot {
    pub score: Value,
    pub completed_depth: Depth,
    pub first_move: Option<ChessMove>,
    pub pv_len: usize,
}

impl ThreadSnapshot {
    pub fn of(worker: &Worker) -> Self {
        match worker.root_moves.first() {
            Some(rm) => Self {
                score: rm.score,
                completed_depth: worker.completed_depth,
                first_move: rm.first_move(),
                pv_len: rm.pv.len(),
            },
            None => Self {
                score: -Value::INFINITE,
                completed_depth: worker.completed_depth,
                first_move: None,
                pv_len: 0,
            },
        }
    }
}

fn move_key(mv: Option<ChessMove>) -> u32 {
    mv.map_or(u32::MAX, |m| {
        let promo = m.get_promotion().map_or(0, |p| p.to_index() as u32 + 1);
        m.get_source().to_index() as u32 | (m.get_dest().to_index() as u32) << 6 | promo << 12
    })
}

/// 採用するスレッドの添字を返す（`snapshots[0]` がメインスレッド）。
///
/// 1. 全スレッドの最低評価値 `min_score` を求める
/// 2. `value(th) = (score - min_score + 14) * completed_depth`
/// 3. 初手ごとに `value` を合算して票とする
/// 4. メインスレッドを初期値とし、スレッド順に比較する
///    - 現在の最善が勝ち負け確定の帯域なら、評価値が厳密に高いときだけ交代
///    - そうでなければ、相手が勝ち帯域にあるか、負け帯域でなく票が多い
///      （同票なら読み筋が2手を超えるときの `value` が大きい）ときに交代
pub fn select_best_thread(snapshots: &[ThreadSnapshot]) -> usize {
    let Some(first) = snapshots.first() else {
        return 0;
    };
    let min_score = snapshots.iter().map(|s| s.score).min().unwrap_or(first.score);

    let thread_value =
        |s: &ThreadSnapshot| i64::from((s.score - min_score + 14).raw()) * i64::from(s.completed_depth);
    // 読み筋が2手以下のスレッドは同票時の比較で0として扱う
    let scaled_value = |s: &ThreadSnapshot| if s.pv_len > 2 { thread_value(s) } else { 0 };

    let mut votes: HashMap<u32, i64> = HashMap::new();
    for s in snapshots {
        *votes.entry(move_key(s.first_move)).or_default() += thread_value(s);
    }
    let votes_for = |s: &ThreadSnapshot| votes.get(&move_key(s.first_move)).copied().unwrap_or(0);

    let mut best = 0;
    for (i, th) in snapshots.iter().enumerate() {
        let b = &snapshots[best];
        if b.score.abs() >= Value::TB_WIN_IN_MAX_PLY {
            // 短い勝ち・長い負けを優先
            if th.score > b.score {
                best = i;
            }
        } else if th.score >= Value::TB_WIN_IN_MAX_PLY
            || (th.score > Value::TB_LOSS_IN_MAX_PLY
                && (votes_for(th) > votes_for(b)
                    || (votes_for(th) == votes_for(b) && scaled_value(th) > scaled_value(b))))
        {
            best = i;
        }
    }
    best
}
