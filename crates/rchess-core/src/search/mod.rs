//! The boundary between the thread pool and a search algorithm.
//!
//! Each worker calls [`SearchAlgorithm::search`] with its own [`Worker`] and
//! a [`SearchContext`] that exposes the session-wide shared state: stop
//! signalling, limits, the transposition table and static tables.

mod alpha_beta;
pub mod history;
mod skill;

use std::sync::atomic::Ordering;

use parking_lot::RwLockReadGuard;

pub use alpha_beta::AlphaBeta;
pub use skill::Skill;

use crate::limits::LimitsType;
use crate::options::{OptionsMap, UciOption};
use crate::session_io::SessionIo;
use crate::static_init::StaticTables;
use crate::thread::Worker;
use crate::thread_pool::PoolShared;
use crate::time::TimeManagement;
use crate::tt::TranspositionTable;
use crate::types::Depth;

/// A search run by every worker of a pool.
///
/// Results are reported only through side effects on `worker`: its root
/// moves (sorted best first), `completed_depth` and counters.
pub trait SearchAlgorithm: Send + Sync {
    fn search(&self, worker: &mut Worker, ctx: &SearchContext<'_>);
}

// =============================================================================
// SearchParams
// =============================================================================

/// 探索係数のUCI定義（名前, デフォルト, 最小, 最大）
const TUNABLES: [(&str, i32, i32, i32); 3] = [
    ("LmrBase", 2037, 1000, 3000),
    ("AspirationDelta", 10, 1, 100),
    ("NullMoveBase", 3, 1, 6),
];

/// スレッド数に依存する探索パラメータと、チューニング可能な係数
#[derive(Clone, Debug)]
pub struct SearchParams {
    /// LMR係数（100倍値）
    pub lmr_base: i32,
    /// aspiration window の初期幅
    pub aspiration_delta: i32,
    /// null move の基本削減量
    pub null_move_base: i32,
    threads: usize,
    reductions: Vec<i32>,
}

impl Default for SearchParams {
    fn default() -> Self {
        let mut params = Self {
            lmr_base: TUNABLES[0].1,
            aspiration_delta: TUNABLES[1].1,
            null_move_base: TUNABLES[2].1,
            threads: 1,
            reductions: vec![0; 256],
        };
        params.init(1);
        params
    }
}

impl SearchParams {
    /// 削減量テーブルをスレッド数に合わせて作り直す。
    ///
    /// スレッドが多いほど各スレッドは深く削減して探索木を分散させる。
    pub fn init(&mut self, threads: usize) {
        self.threads = threads.max(1);
        let scale = f64::from(self.lmr_base) / 100.0 + (self.threads as f64).ln() / 2.0;
        for (i, r) in self.reductions.iter_mut().enumerate().skip(1) {
            *r = (scale * (i as f64).ln()) as i32;
        }
    }

    /// 後半手の削減量
    #[inline]
    pub fn reduction(&self, improving: bool, depth: Depth, move_count: usize) -> Depth {
        let d = (depth.max(0) as usize).min(self.reductions.len() - 1);
        let mc = move_count.min(self.reductions.len() - 1);
        let r = self.reductions[d] * self.reductions[mc];
        (r + 512) / 1024 + i32::from(!improving && r > 936)
    }

    pub fn thread_count(&self) -> usize {
        self.threads
    }

    pub fn is_tunable(name: &str) -> bool {
        TUNABLES.iter().any(|(n, ..)| n.eq_ignore_ascii_case(name))
    }

    /// 係数をUCIオプションとして登録する
    pub fn register_options(&self, options: &mut OptionsMap) {
        for (name, default, min, max) in TUNABLES {
            options.add(name, UciOption::spin(i64::from(default), i64::from(min), i64::from(max)));
        }
    }

    /// オプションから係数を読み直し、削減量テーブルを再計算する
    pub fn read_options(&mut self, options: &OptionsMap) {
        let read = |name: &str, current: i32| {
            if options.contains(name) { options.int(name) as i32 } else { current }
        };
        self.lmr_base = read(TUNABLES[0].0, self.lmr_base);
        self.aspiration_delta = read(TUNABLES[1].0, self.aspiration_delta);
        self.null_move_base = read(TUNABLES[2].0, self.null_move_base);
        self.init(self.threads);
        log::debug!("search params updated: {self:?}");
    }
}

// =============================================================================
// SearchContext
// =============================================================================

/// Session state visible to a running search.
pub struct SearchContext<'a> {
    pool: &'a PoolShared,
    limits: LimitsType,
    params: SearchParams,
    multi_pv: usize,
}

impl<'a> SearchContext<'a> {
    pub(crate) fn new(pool: &'a PoolShared) -> Self {
        let limits = pool.limits.read().clone();
        let params = pool.session.params().read().clone();
        let multi_pv = {
            let options = pool.session.options().read();
            let skill = Skill::from_options(&options);
            let requested = options.int("MultiPV").max(1) as usize;
            if skill.enabled() { requested.max(4) } else { requested }
        };
        Self {
            pool,
            limits,
            params,
            multi_pv,
        }
    }

    #[inline]
    pub fn limits(&self) -> &LimitsType {
        &self.limits
    }

    #[inline]
    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Number of principal variations to report (raised to 4 when skill is limited).
    #[inline]
    pub fn multi_pv(&self) -> usize {
        self.multi_pv
    }

    #[inline]
    pub fn stopped(&self) -> bool {
        self.pool.stop.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stop(&self) {
        self.pool.stop.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn increase_depth(&self) -> bool {
        self.pool.increase_depth.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_increase_depth(&self, v: bool) {
        self.pool.increase_depth.store(v, Ordering::Relaxed);
    }

    #[inline]
    pub fn ponder(&self) -> bool {
        self.pool.ponder.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stop_on_ponderhit(&self) -> bool {
        self.pool.stop_on_ponderhit.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_stop_on_ponderhit(&self, v: bool) {
        self.pool.stop_on_ponderhit.store(v, Ordering::Relaxed);
    }

    pub fn options(&self) -> RwLockReadGuard<'_, OptionsMap> {
        self.pool.session.options().read()
    }

    #[inline]
    pub fn tt(&self) -> &TranspositionTable {
        self.pool.session.tt()
    }

    pub fn time(&self) -> TimeManagement {
        self.pool.session.time().read().clone()
    }

    #[inline]
    pub fn tables(&self) -> &'static StaticTables {
        self.pool.session.tables()
    }

    #[inline]
    pub fn io(&self) -> &SessionIo {
        self.pool.session.io()
    }

    pub fn nodes_searched(&self) -> u64 {
        self.pool.nodes_searched()
    }

    pub fn tb_hits(&self) -> u64 {
        self.pool.tb_hits()
    }

    pub fn thread_count(&self) -> usize {
        self.pool.thread_count()
    }

    /// Sums every worker's best-move-change counter and resets them.
    pub fn take_best_move_changes(&self) -> f64 {
        self.pool.take_best_move_changes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_more_threads_reduce_more() {
        let mut params = SearchParams::default();
        params.init(1);
        let single = params.reduction(true, 20, 30);
        params.init(64);
        let many = params.reduction(true, 20, 30);
        assert!(many > single, "{many} <= {single}");
        assert_eq!(params.reduction(true, 1, 1), 0);
    }

    #[test]
    fn test_tunables_round_trip_through_options() {
        let mut params = SearchParams::default();
        let mut options = OptionsMap::with_defaults();
        params.register_options(&mut options);
        assert!(SearchParams::is_tunable("lmrbase"));
        options.set("LmrBase", "1500").unwrap();
        params.read_options(&options);
        assert_eq!(params.lmr_base, 1500);
        assert!(options.to_string().contains("option name AspirationDelta type spin default 10 min 1 max 100"));
    }
}
