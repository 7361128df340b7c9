//! 評価値と探索深さの基本型

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// 探索の最大ply
pub const MAX_PLY: i32 = 246;

/// 探索深さ（ply単位）
pub type Depth = i32;

/// 評価値
///
/// センチポーン単位の整数。詰みは `MATE - ply` で表現する。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Value(i32);

impl Value {
    /// ゼロ
    pub const ZERO: Value = Value(0);
    /// 引き分け
    pub const DRAW: Value = Value(0);
    /// 詰み（手数0）
    pub const MATE: Value = Value(32000);
    /// 無限大（探索窓の端）
    pub const INFINITE: Value = Value(32001);
    /// 無効値
    pub const NONE: Value = Value(32002);

    /// MAX_PLY以内で詰ませる
    pub const MATE_IN_MAX_PLY: Value = Value(Self::MATE.0 - MAX_PLY);
    /// MAX_PLY以内で詰まされる
    pub const MATED_IN_MAX_PLY: Value = Value(-Self::MATE_IN_MAX_PLY.0);
    /// 終盤データベース上の勝ち（詰みより一段下の帯域）
    pub const TB_WIN_IN_MAX_PLY: Value = Value(Self::MATE.0 - 2 * MAX_PLY);
    /// 終盤データベース上の負け
    pub const TB_LOSS_IN_MAX_PLY: Value = Value(-Self::TB_WIN_IN_MAX_PLY.0);

    #[inline]
    pub const fn new(v: i32) -> Self {
        Self(v)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    #[inline]
    pub const fn abs(self) -> Self {
        Self(self.0.abs())
    }

    /// plyで詰ませる値
    #[inline]
    pub const fn mate_in(ply: i32) -> Self {
        Self(Self::MATE.0 - ply)
    }

    /// plyで詰まされる値
    #[inline]
    pub const fn mated_in(ply: i32) -> Self {
        Self(-Self::MATE.0 + ply)
    }

    /// 詰み・終盤DBを含む勝ち帯域か
    #[inline]
    pub const fn is_win(self) -> bool {
        self.0 >= Self::TB_WIN_IN_MAX_PLY.0
    }

    /// 詰み・終盤DBを含む負け帯域か
    #[inline]
    pub const fn is_loss(self) -> bool {
        self.0 <= Self::TB_LOSS_IN_MAX_PLY.0
    }

    /// 勝ち負けが確定した帯域か
    #[inline]
    pub const fn is_decisive(self) -> bool {
        self.is_win() || self.is_loss()
    }

    /// 詰みまでの手数（full move単位、負なら詰まされる）
    ///
    /// 詰み帯域でなければ `None`。
    pub fn mate_moves(self) -> Option<i32> {
        if self.0.abs() < Self::MATE_IN_MAX_PLY.0 {
            return None;
        }
        Some(if self.0 > 0 {
            (Self::MATE.0 - self.0 + 1) / 2
        } else {
            (-Self::MATE.0 - self.0) / 2
        })
    }

    /// スコアのUCI表記（`cp N` または `mate N`）
    pub fn to_uci(self) -> String {
        match self.mate_moves() {
            Some(moves) => format!("mate {moves}"),
            None => format!("cp {}", self.0),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Neg for Value {
    type Output = Value;
    #[inline]
    fn neg(self) -> Value {
        Value(-self.0)
    }
}

impl Add for Value {
    type Output = Value;
    #[inline]
    fn add(self, rhs: Value) -> Value {
        Value(self.0 + rhs.0)
    }
}

impl Add<i32> for Value {
    type Output = Value;
    #[inline]
    fn add(self, rhs: i32) -> Value {
        Value(self.0 + rhs)
    }
}

impl Sub for Value {
    type Output = Value;
    #[inline]
    fn sub(self, rhs: Value) -> Value {
        Value(self.0 - rhs.0)
    }
}

impl Sub<i32> for Value {
    type Output = Value;
    #[inline]
    fn sub(self, rhs: i32) -> Value {
        Value(self.0 - rhs)
    }
}

impl AddAssign for Value {
    #[inline]
    fn add_assign(&mut self, rhs: Value) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Value {
    #[inline]
    fn sub_assign(&mut self, rhs: Value) {
        self.0 -= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_ordering() {
        assert!(Value::MATE_IN_MAX_PLY > Value::TB_WIN_IN_MAX_PLY);
        assert!(Value::TB_WIN_IN_MAX_PLY > Value::new(20000));
        assert_eq!(Value::TB_LOSS_IN_MAX_PLY, -Value::TB_WIN_IN_MAX_PLY);
        assert!(Value::INFINITE > Value::MATE);
    }

    #[test]
    fn test_mate_formatting() {
        assert_eq!(Value::mate_in(1).to_uci(), "mate 1");
        assert_eq!(Value::mate_in(3).to_uci(), "mate 2");
        assert_eq!(Value::mated_in(2).to_uci(), "mate -1");
        assert_eq!(Value::new(37).to_uci(), "cp 37");
        assert_eq!(Value::new(-37).to_uci(), "cp -37");
    }

    #[test]
    fn test_decisive() {
        assert!(Value::mate_in(10).is_win());
        assert!(Value::mated_in(10).is_loss());
        assert!(!Value::new(900).is_decisive());
    }
}
