//! 参照実装のαβ探索
//!
//! 反復深化 + aspiration window + PVS。置換表、null move、LMR、静止探索、
//! 駒割り+駒位置評価を備え、セッションを単体で動かせる強さを持つ。

use std::sync::Arc;

use chess::{Board, ChessMove, Color, MoveGen, Piece, Square};
use smallvec::SmallVec;

use super::history::piece_to;
use super::{SearchAlgorithm, SearchContext};
use crate::position::{StateInfo, StateList};
use crate::root_moves::sort_by_score;
use crate::static_init::{PHASE_WEIGHT, PIECE_VALUE_MG, TOTAL_PHASE};
use crate::thread::Worker;
use crate::tt::Bound;
use crate::types::{Depth, MAX_PLY, Value};
use crate::uci;

/// 静止探索で置換表に保存する深さ
const DEPTH_QS: Depth = -1;

/// 手番側のボーナス
const TEMPO: i32 = 14;

const TT_MOVE_SCORE: i32 = 1 << 30;
const CAPTURE_SCORE: i32 = 1 << 24;
const COUNTER_SCORE: i32 = 1 << 20;

/// 途中経過を出し始める経過時間（ミリ秒）
const INFO_DELAY_MS: u64 = 3000;

type MoveList = SmallVec<[(ChessMove, i32); 64]>;

/// 組み込みの探索アルゴリズム
#[derive(Clone, Copy, Debug, Default)]
pub struct AlphaBeta;

impl SearchAlgorithm for AlphaBeta {
    fn search(&self, worker: &mut Worker, ctx: &SearchContext<'_>) {
        if worker.root_moves.is_empty() {
            return;
        }
        let mut searcher = Searcher::new(worker, ctx);
        searcher.iterative_deepening();
    }
}

/// 1手ぶんの探索スタック
#[derive(Clone, Copy)]
struct Frame {
    static_eval: Value,
    /// このノードで指した手（null moveなら None）
    piece_to: Option<usize>,
    in_check: bool,
    capture: bool,
}

impl Frame {
    const EMPTY: Frame = Frame {
        static_eval: Value::NONE,
        piece_to: None,
        in_check: false,
        capture: false,
    };
}

struct Searcher<'a, 'c> {
    w: &'a mut Worker,
    ctx: &'a SearchContext<'c>,
    game_states: Arc<StateList>,
    /// ルートから現在のノードまでの局面履歴。先頭はルート。
    path: Vec<StateInfo>,
    frames: Vec<Frame>,
    pv: Vec<Vec<ChessMove>>,
}

#[inline]
fn value_to_tt(v: Value, ply: i32) -> Value {
    if v == Value::NONE {
        return v;
    }
    let stored = if v.is_win() {
        v + ply
    } else if v.is_loss() {
        v - ply
    } else {
        v
    };
    // mate distance pruning keeps a score at `ply` within mate_in(ply + 1)
    debug_assert!(stored.abs() < Value::INFINITE, "{v:?} at ply {ply}");
    stored
}

#[inline]
fn value_from_tt(v: Value, ply: i32) -> Value {
    if v == Value::NONE {
        v
    } else if v.is_win() {
        v - ply
    } else if v.is_loss() {
        v + ply
    } else {
        v
    }
}

#[inline]
fn stat_bonus(depth: Depth) -> i32 {
    (150 * depth - 100).clamp(0, 1500)
}

/// 取られる駒。アンパッサンも拾う。
fn captured_piece(board: &Board, mv: ChessMove) -> Option<Piece> {
    board.piece_on(mv.get_dest()).or_else(|| {
        (board.piece_on(mv.get_source()) == Some(Piece::Pawn)
            && mv.get_source().get_file() != mv.get_dest().get_file())
        .then_some(Piece::Pawn)
    })
}

/// `start` 以降で最もスコアの高い手を `start` に移して返す
fn pick_next(moves: &mut MoveList, start: usize) -> ChessMove {
    let mut best = start;
    for i in start + 1..moves.len() {
        if moves[i].1 > moves[best].1 {
            best = i;
        }
    }
    moves.swap(start, best);
    moves[start].0
}

impl<'a, 'c> Searcher<'a, 'c> {
    fn new(w: &'a mut Worker, ctx: &'a SearchContext<'c>) -> Self {
        let game_states = Arc::clone(&w.game_states);
        let root = w.root_state;
        Self {
            w,
            ctx,
            game_states,
            path: vec![root],
            frames: vec![Frame::EMPTY; MAX_PLY as usize + 4],
            pv: vec![Vec::new(); MAX_PLY as usize + 2],
        }
    }

    #[inline]
    fn frame(&self, ply: i32) -> &Frame {
        &self.frames[(ply + 2) as usize]
    }

    #[inline]
    fn frame_mut(&mut self, ply: i32) -> &mut Frame {
        &mut self.frames[(ply + 2) as usize]
    }

    // =========================================================================
    // 反復深化
    // =========================================================================

    fn iterative_deepening(&mut self) {
        let ctx = self.ctx;
        let limits = ctx.limits();
        let is_main = self.w.is_main();
        let multi_pv = ctx.multi_pv().min(self.w.root_moves.len());
        let thread_count = ctx.thread_count().max(1) as f64;

        let mut best_value = -Value::INFINITE;
        let mut last_best_move = None;
        let mut last_best_move_depth = 0;
        let mut time_reduction = 1.0;
        let mut tot_best_move_changes = 0.0;
        let mut iter_idx = 0;
        let mut search_again_counter = 0;

        if let Some(main) = self.w.main.as_mut() {
            let seed = if main.best_previous_score == Value::INFINITE {
                Value::ZERO
            } else {
                main.best_previous_score
            };
            main.iter_value = [seed; 4];
        }
        if self.w.tb_config.root_in_tb {
            self.w.add_tb_hits(self.w.root_moves.len() as u64);
        }

        loop {
            self.w.root_depth += 1;
            let root_depth = self.w.root_depth;
            if root_depth >= MAX_PLY
                || ctx.stopped()
                || (is_main && limits.depth > 0 && root_depth > limits.depth)
            {
                break;
            }

            if is_main {
                tot_best_move_changes /= 2.0;
            }
            for rm in self.w.root_moves.iter_mut() {
                rm.previous_score = rm.score;
            }
            if !ctx.increase_depth() {
                search_again_counter += 1;
            }

            for pv_idx in 0..multi_pv {
                if ctx.stopped() {
                    break;
                }
                self.w.pv_idx = pv_idx;
                self.w.sel_depth = 0;

                let avg = self.w.root_moves[pv_idx].average_score;
                let mut delta = if avg == -Value::INFINITE {
                    Value::INFINITE.raw()
                } else {
                    ctx.params().aspiration_delta + avg.raw() * avg.raw() / 15_000
                };
                let mut alpha = (avg - delta).max(-Value::INFINITE);
                let mut beta = (avg + delta).min(Value::INFINITE);
                let mut failed_high_cnt = 0;

                loop {
                    let adjusted =
                        (root_depth - failed_high_cnt - 3 * (search_again_counter + 1) / 4).max(1);
                    best_value = self.root_search(adjusted, alpha, beta);
                    sort_by_score(&mut self.w.root_moves[pv_idx..]);

                    if ctx.stopped() {
                        break;
                    }

                    if is_main
                        && multi_pv == 1
                        && (best_value <= alpha || best_value >= beta)
                        && ctx.time().elapsed() > INFO_DELAY_MS
                    {
                        ctx.io().emit_lines(&uci::pv_info(self.w, ctx, root_depth));
                    }

                    if best_value <= alpha {
                        beta = Value::new((alpha.raw() + beta.raw()) / 2);
                        alpha = (best_value - delta).max(-Value::INFINITE);
                        failed_high_cnt = 0;
                        if is_main {
                            ctx.set_stop_on_ponderhit(false);
                        }
                    } else if best_value >= beta {
                        beta = (best_value + delta).min(Value::INFINITE);
                        failed_high_cnt += 1;
                    } else {
                        break;
                    }
                    delta += delta / 3;
                }

                sort_by_score(&mut self.w.root_moves[..=pv_idx]);

                if is_main
                    && (ctx.stopped() || pv_idx + 1 == multi_pv || ctx.time().elapsed() > INFO_DELAY_MS)
                {
                    ctx.io().emit_lines(&uci::pv_info(self.w, ctx, root_depth));
                }
            }

            if !ctx.stopped() {
                self.w.completed_depth = root_depth;
            }
            let first = self.w.root_moves[0].first_move();
            if first != last_best_move {
                last_best_move = first;
                last_best_move_depth = root_depth;
            }

            // go mate N
            if limits.mate > 0
                && best_value >= Value::MATE_IN_MAX_PLY
                && (Value::MATE - best_value).raw() <= 2 * limits.mate
            {
                ctx.stop();
            }

            let Some(main) = self.w.main.as_ref() else {
                continue;
            };

            if limits.use_time_management() && !ctx.stopped() && !ctx.stop_on_ponderhit() {
                let best = i64::from(best_value.raw());
                let prev_avg = i64::from(main.best_previous_average_score.raw());
                let prev_iter = i64::from(main.iter_value[iter_idx].raw());
                let falling_eval =
                    ((69 + 12 * (prev_avg - best) + 6 * (prev_iter - best)) as f64 / 781.4).clamp(0.5, 1.5);

                // 最善手が長く変わっていなければ時間を節約する
                time_reduction = if last_best_move_depth + 10 < self.w.completed_depth {
                    1.63
                } else {
                    0.73
                };
                let reduction = (1.56 + main.previous_time_reduction) / (2.20 * time_reduction);

                tot_best_move_changes += ctx.take_best_move_changes();
                let instability = 1.073
                    + (2.25 - 9.9 / f64::from(root_depth)).max(1.0) * tot_best_move_changes / thread_count;

                let time = ctx.time();
                let mut total_time = time.optimum() as f64 * falling_eval * reduction * instability;
                if self.w.root_moves.len() == 1 {
                    total_time = total_time.min(500.0);
                }

                let elapsed = time.elapsed() as f64;
                if elapsed > total_time {
                    // ponder中はponderhitを待ってから止める
                    if ctx.ponder() {
                        ctx.set_stop_on_ponderhit(true);
                    } else {
                        ctx.stop();
                    }
                } else {
                    ctx.set_increase_depth(ctx.ponder() || elapsed <= total_time * 0.5);
                }
            }

            if let Some(main) = self.w.main.as_mut() {
                main.iter_value[iter_idx] = best_value;
            }
            iter_idx = (iter_idx + 1) & 3;
        }

        if let Some(main) = self.w.main.as_mut() {
            main.previous_time_reduction = time_reduction;
        }
    }

    // =========================================================================
    // ルート
    // =========================================================================

    fn root_search(&mut self, depth: Depth, mut alpha: Value, beta: Value) -> Value {
        let board = self.w.root_board;
        let pv_idx = self.w.pv_idx;
        *self.frame_mut(0) = Frame {
            in_check: board.checkers().popcnt() > 0,
            ..Frame::EMPTY
        };

        let mut best_value = -Value::INFINITE;
        for i in pv_idx..self.w.root_moves.len() {
            let Some(mv) = self.w.root_moves[i].first_move() else {
                continue;
            };
            let Some(piece) = board.piece_on(mv.get_source()) else {
                continue;
            };
            let move_count = i - pv_idx + 1;

            let child = board.make_move_new(mv);
            {
                let capture = captured_piece(&board, mv).is_some();
                let f = self.frame_mut(0);
                f.piece_to = Some(piece_to(piece, mv.get_dest()));
                f.capture = capture;
            }
            self.push_move(&board, mv, &child);
            self.w.inc_nodes();

            let mut value = -Value::INFINITE;
            if move_count > 1 {
                value = -self.search(&child, 1, -(alpha + 1), -alpha, depth - 1, true);
            }
            if move_count == 1 || (value > alpha && value < beta) {
                value = -self.search(&child, 1, -beta, -alpha, depth - 1, false);
            }
            self.path.pop();

            if self.ctx.stopped() {
                return Value::ZERO;
            }

            let sel_depth = self.w.sel_depth;
            let pv_tail = self.pv[1].clone();
            let rm = &mut self.w.root_moves[i];
            rm.average_score = if rm.average_score == -Value::INFINITE {
                value
            } else {
                Value::new((2 * value.raw() + rm.average_score.raw()) / 3)
            };

            if move_count == 1 || value > alpha {
                rm.score = value;
                rm.uci_score = value;
                rm.sel_depth = sel_depth;
                rm.score_lowerbound = false;
                rm.score_upperbound = false;
                if value >= beta {
                    rm.score_lowerbound = true;
                    rm.uci_score = beta;
                } else if value <= alpha {
                    rm.score_upperbound = true;
                    rm.uci_score = alpha;
                }
                rm.pv.truncate(1);
                rm.pv.extend(pv_tail);

                if move_count > 1 && pv_idx == 0 {
                    self.w.add_best_move_change();
                }
            } else {
                // 最善でない手は -INFINITE にして、前回の順序で後ろに並べる
                rm.score = -Value::INFINITE;
            }

            if value > best_value {
                best_value = value;
                if value > alpha {
                    if value >= beta {
                        break;
                    }
                    alpha = value;
                }
            }
        }
        best_value
    }

    // =========================================================================
    // 通常探索
    // =========================================================================

    fn search(
        &mut self,
        board: &Board,
        ply: i32,
        mut alpha: Value,
        mut beta: Value,
        depth: Depth,
        cut_node: bool,
    ) -> Value {
        if depth <= 0 {
            return self.qsearch(board, ply, alpha, beta);
        }
        let pv_node = beta.raw() - alpha.raw() > 1;
        self.pv[ply as usize].clear();

        self.w.inc_nodes();
        self.w.check_time(self.ctx);
        if self.ctx.stopped() {
            return Value::ZERO;
        }
        if pv_node && self.w.sel_depth < ply + 1 {
            self.w.sel_depth = ply + 1;
        }

        let in_check = board.checkers().popcnt() > 0;
        if ply >= MAX_PLY {
            return if in_check { Value::DRAW } else { self.evaluate(board) };
        }
        if self.is_draw() {
            return Value::DRAW;
        }

        // 詰みまでの距離で窓を狭める
        alpha = alpha.max(Value::mated_in(ply));
        beta = beta.min(Value::mate_in(ply + 1));
        if alpha >= beta {
            return alpha;
        }

        let key = board.get_hash();
        let tt = self.ctx.tt().probe(key);
        let tt_move = tt.and_then(|d| d.mv).filter(|m| board.legal(*m));
        let tt_value = tt.map_or(Value::NONE, |d| value_from_tt(d.value, ply));
        if let Some(data) = tt {
            let usable = if tt_value >= beta {
                data.bound.includes_lower()
            } else {
                data.bound.includes_upper()
            };
            if !pv_node && data.depth >= depth && tt_value != Value::NONE && usable {
                return tt_value;
            }
        }

        let us = board.side_to_move();
        let static_eval = if in_check {
            Value::NONE
        } else {
            tt.map(|d| d.eval)
                .filter(|e| *e != Value::NONE)
                .unwrap_or_else(|| self.evaluate(board))
        };
        {
            let f = self.frame_mut(ply);
            f.in_check = in_check;
            f.static_eval = static_eval;
        }
        let improving = !in_check && {
            let prev = self.frame(ply - 2).static_eval;
            prev == Value::NONE || static_eval > prev
        };

        // null move
        let has_pieces = (*board.color_combined(us)
            & !(*board.pieces(Piece::Pawn) | *board.pieces(Piece::King)))
        .popcnt()
            > 0;
        if !pv_node
            && !in_check
            && depth >= 3
            && has_pieces
            && static_eval >= beta
            && !beta.is_loss()
            && ply >= self.w.nmp_min_ply
            && self.frame(ply - 1).piece_to.is_some()
        {
            if let Some(child) = board.null_move() {
                let r = self.ctx.params().null_move_base + depth / 4;
                {
                    let f = self.frame_mut(ply);
                    f.piece_to = None;
                    f.capture = false;
                }
                self.push_null(&child);
                let value = -self.search(&child, ply + 1, -beta, -(beta - 1), depth - r, !cut_node);
                self.path.pop();

                if self.ctx.stopped() {
                    return Value::ZERO;
                }
                if value >= beta && !value.is_win() {
                    return value;
                }
            }
        }

        let mut moves = self.score_moves(board, tt_move, ply, false);
        let mut best_value = -Value::INFINITE;
        let mut best_move = None;
        let mut move_count = 0usize;
        let mut quiets: SmallVec<[(ChessMove, usize); 32]> = SmallVec::new();
        let mut captures: SmallVec<[(Piece, Square, Piece); 16]> = SmallVec::new();

        for i in 0..moves.len() {
            let mv = pick_next(&mut moves, i);
            let Some(piece) = board.piece_on(mv.get_source()) else {
                continue;
            };
            move_count += 1;
            let captured = captured_piece(board, mv);
            let child = board.make_move_new(mv);
            let gives_check = child.checkers().popcnt() > 0;
            let moved = piece_to(piece, mv.get_dest());
            {
                let f = self.frame_mut(ply);
                f.piece_to = Some(moved);
                f.capture = captured.is_some();
            }
            self.push_move(board, mv, &child);

            let new_depth = depth - 1;
            let mut value = -Value::INFINITE;
            let full_depth_zero_window;
            if depth >= 2 && move_count > 1 && captured.is_none() && !in_check && !gives_check {
                let r = self.ctx.params().reduction(improving, depth, move_count)
                    + i32::from(cut_node)
                    - i32::from(pv_node);
                let reduced = (new_depth - r.max(0)).clamp(1, new_depth);
                value = -self.search(&child, ply + 1, -(alpha + 1), -alpha, reduced, true);
                full_depth_zero_window = value > alpha && reduced < new_depth;
            } else {
                full_depth_zero_window = !pv_node || move_count > 1;
            }
            if full_depth_zero_window {
                value = -self.search(&child, ply + 1, -(alpha + 1), -alpha, new_depth, !cut_node);
            }
            if pv_node && (move_count == 1 || (value > alpha && value < beta)) {
                value = -self.search(&child, ply + 1, -beta, -alpha, new_depth, false);
            }
            self.path.pop();

            if self.ctx.stopped() {
                return Value::ZERO;
            }

            if value > best_value {
                best_value = value;
                if value > alpha {
                    best_move = Some(mv);
                    if pv_node {
                        self.update_pv(ply, mv);
                    }
                    if value >= beta {
                        break;
                    }
                    alpha = value;
                }
            }

            if best_move != Some(mv) {
                match captured {
                    Some(c) => captures.push((piece, mv.get_dest(), c)),
                    None => quiets.push((mv, moved)),
                }
            }
        }

        if move_count == 0 {
            return if in_check { Value::mated_in(ply) } else { Value::DRAW };
        }

        if let Some(best) = best_move {
            if best_value >= beta {
                self.update_stats(board, ply, best, depth, &quiets, &captures);
            }
        }

        let bound = if best_value >= beta {
            Bound::Lower
        } else if pv_node && best_move.is_some() {
            Bound::Exact
        } else {
            Bound::Upper
        };
        self.ctx
            .tt()
            .save(key, value_to_tt(best_value, ply), static_eval, bound, depth, best_move);
        best_value
    }

    // =========================================================================
    // 静止探索
    // =========================================================================

    fn qsearch(&mut self, board: &Board, ply: i32, mut alpha: Value, beta: Value) -> Value {
        let pv_node = beta.raw() - alpha.raw() > 1;
        self.pv[ply as usize].clear();

        self.w.inc_nodes();
        self.w.check_time(self.ctx);
        if self.ctx.stopped() {
            return Value::ZERO;
        }
        if pv_node && self.w.sel_depth < ply + 1 {
            self.w.sel_depth = ply + 1;
        }

        let in_check = board.checkers().popcnt() > 0;
        if ply >= MAX_PLY {
            return if in_check { Value::DRAW } else { self.evaluate(board) };
        }
        if self.is_draw() {
            return Value::DRAW;
        }

        let key = board.get_hash();
        let tt = self.ctx.tt().probe(key);
        let tt_move = tt.and_then(|d| d.mv).filter(|m| board.legal(*m));
        if let Some(data) = tt {
            let tt_value = value_from_tt(data.value, ply);
            let usable = if tt_value >= beta {
                data.bound.includes_lower()
            } else {
                data.bound.includes_upper()
            };
            if !pv_node && data.depth >= DEPTH_QS && tt_value != Value::NONE && usable {
                return tt_value;
            }
        }

        let static_eval;
        let mut best_value;
        if in_check {
            static_eval = Value::NONE;
            best_value = -Value::INFINITE;
        } else {
            static_eval = self.evaluate(board);
            best_value = static_eval;
            if best_value >= beta {
                return best_value;
            }
            alpha = alpha.max(best_value);
        }
        {
            let f = self.frame_mut(ply);
            f.in_check = in_check;
            f.static_eval = static_eval;
        }

        // 王手されていれば全ての応手、そうでなければ駒取りだけ
        let mut moves = self.score_moves(board, tt_move, ply, !in_check);
        let mut best_move = None;
        let mut move_count = 0;

        for i in 0..moves.len() {
            let mv = pick_next(&mut moves, i);
            let Some(piece) = board.piece_on(mv.get_source()) else {
                continue;
            };
            move_count += 1;
            let captured = captured_piece(board, mv);
            let child = board.make_move_new(mv);
            {
                let f = self.frame_mut(ply);
                f.piece_to = Some(piece_to(piece, mv.get_dest()));
                f.capture = captured.is_some();
            }
            self.push_move(board, mv, &child);
            let value = -self.qsearch(&child, ply + 1, -beta, -alpha);
            self.path.pop();

            if self.ctx.stopped() {
                return Value::ZERO;
            }

            if value > best_value {
                best_value = value;
                if value > alpha {
                    best_move = Some(mv);
                    if pv_node {
                        self.update_pv(ply, mv);
                    }
                    if value >= beta {
                        break;
                    }
                    alpha = value;
                }
            }
        }

        if in_check && move_count == 0 {
            return Value::mated_in(ply);
        }

        let bound = if best_value >= beta { Bound::Lower } else { Bound::Upper };
        self.ctx
            .tt()
            .save(key, value_to_tt(best_value, ply), static_eval, bound, DEPTH_QS, best_move);
        best_value
    }

    // =========================================================================
    // 補助
    // =========================================================================

    /// 合法手を生成してオーダリング用のスコアを付ける
    fn score_moves(&self, board: &Board, tt_move: Option<ChessMove>, ply: i32, captures_only: bool) -> MoveList {
        let mut generator = MoveGen::new_legal(board);
        if captures_only {
            generator.set_iterator_mask(*board.color_combined(!board.side_to_move()));
        }

        let us = board.side_to_move();
        let prev = self.frame(ply - 1).piece_to;
        let prev_capture = self.frame(ply - 1).capture;
        let in_check = self.frame(ply).in_check;
        let history = &self.w.history;
        let counter = prev.and_then(|p| history.counter_moves.get(p));

        generator
            .filter_map(|mv| {
                let piece = board.piece_on(mv.get_source())?;
                let score = if Some(mv) == tt_move {
                    TT_MOVE_SCORE
                } else if let Some(captured) = captured_piece(board, mv) {
                    CAPTURE_SCORE
                        + PIECE_VALUE_MG[captured.to_index()] * 16
                        + history.capture.get(piece, mv.get_dest(), captured)
                } else if mv.get_promotion() == Some(Piece::Queen) {
                    CAPTURE_SCORE
                } else if Some(mv) == counter {
                    COUNTER_SCORE
                } else {
                    history.main.get(us, mv)
                        + prev.map_or(0, |p| {
                            history
                                .continuation
                                .get(in_check, prev_capture, p, piece_to(piece, mv.get_dest()))
                        })
                };
                Some((mv, score))
            })
            .collect()
    }

    /// βカットを起こした手に報酬、それ以前に試した手に罰を与える
    fn update_stats(
        &mut self,
        board: &Board,
        ply: i32,
        best: ChessMove,
        depth: Depth,
        quiets: &[(ChessMove, usize)],
        captures: &[(Piece, Square, Piece)],
    ) {
        let Some(piece) = board.piece_on(best.get_source()) else {
            return;
        };
        let bonus = stat_bonus(depth);
        let us = board.side_to_move();
        let prev = self.frame(ply - 1).piece_to;
        let prev_capture = self.frame(ply - 1).capture;
        let in_check = self.frame(ply).in_check;
        let history = &mut self.w.history;

        match captured_piece(board, best) {
            Some(captured) => history.capture.update(piece, best.get_dest(), captured, bonus),
            None => {
                history.main.update(us, best, bonus);
                if let Some(p) = prev {
                    let cur = piece_to(piece, best.get_dest());
                    history.continuation.update(in_check, prev_capture, p, cur, bonus);
                    history.counter_moves.set(p, best);
                }
                for &(mv, cur) in quiets {
                    history.main.update(us, mv, -bonus);
                    if let Some(p) = prev {
                        history.continuation.update(in_check, prev_capture, p, cur, -bonus);
                    }
                }
            }
        }
        for &(p, to, captured) in captures {
            history.capture.update(p, to, captured, -bonus);
        }
    }

    fn update_pv(&mut self, ply: i32, mv: ChessMove) {
        let (head, tail) = self.pv.split_at_mut(ply as usize + 1);
        let pv = &mut head[ply as usize];
        pv.clear();
        pv.push(mv);
        pv.extend_from_slice(&tail[0]);
    }

    fn push_move(&mut self, before: &Board, mv: ChessMove, after: &Board) {
        let next = match self.path.last() {
            Some(st) => st.advance(before, mv, after),
            None => StateInfo::root(after, 0, 0),
        };
        self.path.push(next);
    }

    fn push_null(&mut self, after: &Board) {
        let (rule50, game_ply) = self.path.last().map_or((0, 0), |st| (st.rule50, st.game_ply));
        self.path.push(StateInfo {
            key: after.get_hash(),
            rule50: rule50 + 1,
            plies_from_null: 0,
            game_ply: game_ply + 1,
            last_move: None,
        });
    }

    /// 50手ルール、または対局履歴を含めた同一局面の再出現
    fn is_draw(&self) -> bool {
        let Some(cur) = self.path.last() else {
            return false;
        };
        if cur.rule50 >= 100 {
            return true;
        }

        let end = cur.rule50.min(cur.plies_from_null) as usize;
        let n = self.path.len();
        let mut i = 4;
        while i <= end {
            let key = if i < n {
                self.path[n - 1 - i].key
            } else {
                // path[0] と game_states の末尾は同じルート局面
                let back = i - (n - 1);
                match self.game_states.len().checked_sub(1 + back) {
                    Some(idx) => self.game_states[idx].key,
                    None => break,
                }
            };
            if key == cur.key {
                return true;
            }
            i += 2;
        }
        false
    }

    /// 手番側から見た駒割り+駒位置評価（序盤・終盤を進行度で補間）
    fn evaluate(&self, board: &Board) -> Value {
        let tables = self.ctx.tables();
        let (mut mg, mut eg, mut phase) = (0, 0, 0);
        for sq in *board.combined() {
            let (Some(piece), Some(color)) = (board.piece_on(sq), board.color_on(sq)) else {
                continue;
            };
            let (m, e) = tables.psq(color, piece, sq);
            let sign = if color == Color::White { 1 } else { -1 };
            mg += sign * m;
            eg += sign * e;
            phase += PHASE_WEIGHT[piece.to_index()];
        }
        let phase = phase.min(TOTAL_PHASE);
        let v = (mg * phase + eg * (TOTAL_PHASE - phase)) / TOTAL_PHASE;
        let v = if board.side_to_move() == Color::White { v } else { -v };
        Value::new((v + TEMPO).clamp(
            Value::TB_LOSS_IN_MAX_PLY.raw() + 1,
            Value::TB_WIN_IN_MAX_PLY.raw() - 1,
        ))
    }
}
