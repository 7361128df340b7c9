//! 時間管理

use std::time::Instant;

use chess::Color;

use crate::limits::LimitsType;
use crate::options::OptionsMap;

/// ミリ秒単位の時刻
pub type TimePoint = u64;

/// 1手あたりの思考時間を決める
#[derive(Clone, Debug)]
pub struct TimeManagement {
    start_time: Instant,
    optimum_time: TimePoint,
    maximum_time: TimePoint,
}

impl Default for TimeManagement {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            optimum_time: 0,
            maximum_time: 0,
        }
    }
}

impl TimeManagement {
    pub fn new() -> Self {
        Self::default()
    }

    /// `go` の制限から目標時間と最大時間を計算する。
    ///
    /// 持ち時間の指定がない場合は何もしない（movetime / nodes / infinite は
    /// `check_time` 側で直接判定する）。
    pub fn init(&mut self, limits: &LimitsType, us: Color, ply: u32, options: &OptionsMap) {
        self.start_time = limits.start_time;
        self.optimum_time = 0;
        self.maximum_time = 0;

        let time = limits.time_for(us);
        if time == 0 {
            return;
        }

        let inc = limits.inc_for(us) as f64;
        let move_overhead = options.int("Move Overhead").max(0) as f64;
        let slow_mover = options.int("Slow Mover").max(1) as f64;
        let ply = f64::from(ply);
        let time_f = time as f64;

        // 残り手数の見積もり（最大50手先まで）
        let mtg = if limits.movestogo > 0 {
            f64::from(limits.movestogo.min(50))
        } else {
            50.0
        };

        let time_left = (time_f + inc * (mtg - 1.0) - move_overhead * (2.0 + mtg)).max(1.0);
        let time_left = slow_mover * time_left / 100.0;

        let (opt_scale, max_scale) = if limits.movestogo == 0 {
            (
                (0.0120 + (ply + 3.0).powf(0.45) * 0.0039).min(0.2 * time_f / time_left),
                (4.0 + ply / 12.0).min(7.0),
            )
        } else {
            (
                ((0.88 + ply / 116.4) / mtg).min(0.88 * time_f / time_left),
                (1.5 + 0.11 * mtg).min(6.3),
            )
        };

        let optimum = opt_scale * time_left;
        let maximum = (0.8 * time_f - move_overhead).min(max_scale * optimum) - 10.0;

        self.optimum_time = optimum.max(1.0) as TimePoint;
        self.maximum_time = maximum.max(1.0) as TimePoint;

        if options.check("Ponder") {
            self.optimum_time += self.optimum_time / 4;
        }
    }

    #[inline]
    pub fn optimum(&self) -> TimePoint {
        self.optimum_time
    }

    #[inline]
    pub fn maximum(&self) -> TimePoint {
        self.maximum_time
    }

    /// `go` を受け取ってからの経過時間
    #[inline]
    pub fn elapsed(&self) -> TimePoint {
        self.start_time.elapsed().as_millis() as TimePoint
    }
}
