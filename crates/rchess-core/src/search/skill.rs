//! 手加減（Skill Level / UCI_Elo）

use chess::ChessMove;
use rand::RngCore;

use crate::options::OptionsMap;
use crate::root_moves::RootMove;
use crate::static_init::PIECE_VALUE_MG;
use crate::types::Value;

/// Eloの下限と上限（UCI_Elo の範囲）
const ELO_MIN: f64 = 1320.0;
const ELO_MAX: f64 = 3190.0;

#[derive(Clone, Debug)]
pub struct Skill {
    level: f64,
    pub best: Option<ChessMove>,
}

impl Skill {
    /// `uci_elo` が0でなければEloからレベルを推定する
    pub fn new(skill_level: i64, uci_elo: i64) -> Self {
        let level = if uci_elo != 0 {
            let e = (uci_elo as f64 - ELO_MIN) / (ELO_MAX - ELO_MIN);
            (((37.2473 * e - 40.8525) * e + 22.2943) * e - 0.311438).clamp(0.0, 19.0)
        } else {
            skill_level as f64
        };
        Self { level, best: None }
    }

    pub fn from_options(options: &OptionsMap) -> Self {
        let elo = if options.check("UCI_LimitStrength") {
            options.int("UCI_Elo")
        } else {
            0
        };
        Self::new(options.int("Skill Level"), elo)
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.level < 20.0
    }

    #[inline]
    pub fn level(&self) -> f64 {
        self.level
    }

    /// 上位 `multi_pv` 手から、レベルに応じた乱数つきで1手選ぶ。
    ///
    /// `root_moves` は評価値の降順に並んでいること。
    pub fn pick_best<R: RngCore>(
        &mut self,
        root_moves: &[RootMove],
        multi_pv: usize,
        rng: &mut R,
    ) -> Option<ChessMove> {
        let multi_pv = multi_pv.min(root_moves.len());
        if multi_pv == 0 {
            return None;
        }
        let top_score = root_moves[0].score;
        let delta = (top_score - root_moves[multi_pv - 1].score)
            .raw()
            .min(PIECE_VALUE_MG[0]);
        let weakness = (120.0 - 2.0 * self.level) as i32;
        let mut max_score = -Value::INFINITE;

        // 弱いほど、評価値の低い手にも大きなボーナスが乗る
        for rm in &root_moves[..multi_pv] {
            let push = (weakness * (top_score - rm.score).raw()
                + delta * (rng.next_u32() % weakness as u32) as i32)
                / 128;
            if rm.score + push >= max_score {
                max_score = rm.score + push;
                self.best = rm.first_move();
            }
        }
        self.best
    }
}
