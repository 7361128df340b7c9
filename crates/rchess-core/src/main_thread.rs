//! メインスレッド固有の処理
//!
//! プール内のslot 0だけが持つ状態と、探索全体の開始・停止・結果出力を担う。

use std::sync::atomic::Ordering;
use std::time::Duration;

use chess::{Board, ChessMove};

use crate::root_moves::RootMove;
use crate::search::{SearchContext, Skill};
use crate::thread::Worker;
use crate::thread_pool::PoolShared;
use crate::time::TimePoint;
use crate::tt::TranspositionTable;
use crate::types::Value;
use crate::uci;

/// check_time() を実際に評価する間隔（ノード数）
const CHECK_TIME_INTERVAL: i32 = 512;

/// 反復をまたいで保持するメインスレッドの状態
#[derive(Clone, Debug)]
pub struct MainThreadState {
    pub previous_time_reduction: f64,
    pub best_previous_score: Value,
    pub best_previous_average_score: Value,
    pub iter_value: [Value; 4],
    pub calls_cnt: i32,
    last_info_time: TimePoint,
}

impl MainThreadState {
    pub fn new() -> Self {
        Self {
            previous_time_reduction: 1.0,
            best_previous_score: Value::INFINITE,
            best_previous_average_score: Value::INFINITE,
            iter_value: [Value::ZERO; 4],
            calls_cnt: 0,
            last_info_time: 0,
        }
    }

    /// 新しい対局の開始時に呼ばれる
    pub(crate) fn reset(&mut self) {
        self.calls_cnt = 0;
        self.best_previous_score = Value::INFINITE;
        self.best_previous_average_score = Value::INFINITE;
        self.previous_time_reduction = 1.0;
    }

    /// 停止条件を調べ、満たしていればプール全体の停止フラグを立てる。
    ///
    /// 毎ノード呼ばれるが、実際の判定は `calls_cnt` が尽きたときだけ行う。
    pub fn check_time(&mut self, ctx: &SearchContext<'_>) {
        self.calls_cnt -= 1;
        if self.calls_cnt > 0 {
            return;
        }

        let limits = ctx.limits();
        // ノード数制限があるときは行き過ぎないよう間隔を詰める
        self.calls_cnt = if limits.nodes > 0 {
            (CHECK_TIME_INTERVAL as u64).min(limits.nodes / 1024).max(1) as i32
        } else {
            CHECK_TIME_INTERVAL
        };

        let time = ctx.time();
        let elapsed = time.elapsed();

        if elapsed.saturating_sub(self.last_info_time) >= 1000 {
            self.last_info_time = elapsed;
            log::debug!(
                "[{}] {} ms, {} nodes",
                ctx.io().name(),
                elapsed,
                ctx.nodes_searched()
            );
        }

        // ponder中はponderhitまで止めない
        if ctx.ponder() {
            return;
        }

        if (limits.use_time_management()
            && (elapsed > time.maximum() || ctx.stop_on_ponderhit()))
            || (limits.movetime > 0 && elapsed >= limits.movetime)
            || (limits.nodes > 0 && ctx.nodes_searched() >= limits.nodes)
        {
            ctx.stop();
        }
    }
}

impl Default for MainThreadState {
    fn default() -> Self {
        Self::new()
    }
}

/// メインスレッドの探索本体
///
/// ヘルパーを起こして自らも探索し、終了後は全スレッドの停止を待ってから
/// 最善スレッドを選んで `bestmove` を出力する。
pub(crate) fn search(worker: &mut Worker, pool: &PoolShared) {
    let session = &pool.session;
    {
        let limits = pool.limits.read();
        let options = session.options().read();
        session.time().write().init(
            &limits,
            worker.root_board.side_to_move(),
            worker.root_state.game_ply,
            &options,
        );
    }
    session.tt().new_search();

    let ctx = SearchContext::new(pool);
    let io = session.io();

    if worker.root_moves.is_empty() {
        worker.root_moves.push(RootMove::none());
        let score = if worker.root_board.checkers().popcnt() > 0 {
            -Value::MATE
        } else {
            Value::DRAW
        };
        io.emit(format_args!("info depth 0 score {}", score.to_uci()));
    } else {
        pool.start_helpers();
        session.algorithm().search(worker, &ctx);
    }

    // 探索が先に終わっても、ponder / infinite の間は stop か ponderhit を待つ
    while !pool.stop.load(Ordering::Relaxed)
        && (pool.ponder.load(Ordering::Relaxed) || ctx.limits().infinite)
    {
        std::thread::sleep(Duration::from_millis(1));
    }

    pool.stop.store(true, Ordering::Relaxed);
    pool.wait_helpers();

    let (multi_pv, mut skill, limit_strength) = {
        let options = ctx.options();
        (
            options.int("MultiPV"),
            Skill::from_options(&options),
            options.check("UCI_LimitStrength"),
        )
    };

    if skill.enabled() && worker.root_moves[0].first_move().is_some() {
        let pick = skill.pick_best(&worker.root_moves, ctx.multi_pv(), &mut *pool.skills_rng.lock());
        if let Some(i) = worker.root_moves.iter().position(|rm| rm.first_move() == pick) {
            worker.root_moves.swap(0, i);
        }
    }

    let best_id = if multi_pv == 1
        && ctx.limits().depth == 0
        && !(skill.enabled() || limit_strength)
        && worker.root_moves[0].first_move().is_some()
    {
        pool.best_thread_id(Some(worker))
    } else {
        0
    };

    let mut lines = Vec::new();
    let best = if best_id == 0 {
        worker.root_moves[0].clone()
    } else {
        // 自スレッド以外が選ばれたときは、そのスレッドの読み筋を出し直す
        pool.with_worker(best_id, |w| {
            lines.extend(uci::pv_info(w, &ctx, w.completed_depth));
            w.root_moves[0].clone()
        })
        .unwrap_or_else(|| worker.root_moves[0].clone())
    };

    if let Some(main) = worker.main.as_mut() {
        main.best_previous_score = best.score;
        main.best_previous_average_score = best.average_score;
    }

    let ponder = best
        .pv
        .get(1)
        .copied()
        .or_else(|| ponder_from_tt(&worker.root_board, &best, session.tt()));
    lines.push(uci::bestmove(best.first_move(), ponder));
    io.emit_lines(&lines);
}

/// 読み筋が1手しかないとき、置換表から予想手を補う
fn ponder_from_tt(board: &Board, best: &RootMove, tt: &TranspositionTable) -> Option<ChessMove> {
    let mv = best.first_move()?;
    let child = board.make_move_new(mv);
    let data = tt.probe(child.get_hash())?;
    data.mv.filter(|m| child.legal(*m))
}
