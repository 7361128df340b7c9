//! Search limits captured from a `go` command.

use std::time::Instant;

use chess::{ChessMove, Color};

use crate::types::Depth;

/// 探索の制限条件
#[derive(Clone, Debug)]
pub struct LimitsType {
    /// 残り時間 [White, Black]（ミリ秒）
    pub time: [u64; 2],
    /// 1手ごとの加算時間 [White, Black]（ミリ秒）
    pub inc: [u64; 2],
    pub movestogo: u32,
    pub depth: Depth,
    pub nodes: u64,
    pub mate: i32,
    pub movetime: u64,
    pub infinite: bool,
    pub ponder: bool,
    /// 探索対象をこの手に限定する（`None` なら全合法手）
    pub searchmoves: Option<Vec<ChessMove>>,
    /// `go` を受け取った時刻
    pub start_time: Instant,
}

impl Default for LimitsType {
    fn default() -> Self {
        Self {
            time: [0; 2],
            inc: [0; 2],
            movestogo: 0,
            depth: 0,
            nodes: 0,
            mate: 0,
            movetime: 0,
            infinite: false,
            ponder: false,
            searchmoves: None,
            start_time: Instant::now(),
        }
    }
}

impl LimitsType {
    pub fn new() -> Self {
        Self::default()
    }

    /// 持ち時間が指定されていれば時間管理を行う
    pub fn use_time_management(&self) -> bool {
        self.time[0] != 0 || self.time[1] != 0
    }

    #[inline]
    pub fn time_for(&self, us: Color) -> u64 {
        self.time[us.to_index()]
    }

    #[inline]
    pub fn inc_for(&self, us: Color) -> u64 {
        self.inc[us.to_index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_management_requires_clock() {
        let mut limits = LimitsType::new();
        assert!(!limits.use_time_management());
        limits.movetime = 1000;
        assert!(!limits.use_time_management());
        limits.time[Color::Black.to_index()] = 5000;
        assert!(limits.use_time_management());
        assert_eq!(limits.time_for(Color::Black), 5000);
        assert_eq!(limits.time_for(Color::White), 0);
    }
}
