//! 置換表
//!
//! 1セッションの全スレッドで共有する。各エントリは `key ^ data` と `data` の
//! 2つの `AtomicU64` からなり、ロックなしで読み書きする。書き込みが競合して
//! 2語が食い違った場合は key が一致しなくなるので、単にミスとして扱われる。
//!
//! サイズ変更とクリアは探索停止中にのみ呼ばれる前提。

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use chess::{ALL_PIECES, ALL_SQUARES, ChessMove};
use parking_lot::RwLock;

use crate::types::{Depth, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Bound {
    #[default]
    None = 0,
    Upper = 1,
    Lower = 2,
    Exact = 3,
}

impl Bound {
    fn from_bits(bits: u64) -> Self {
        match bits & 3 {
            1 => Bound::Upper,
            2 => Bound::Lower,
            3 => Bound::Exact,
            _ => Bound::None,
        }
    }

    #[inline]
    pub fn includes_lower(self) -> bool {
        matches!(self, Bound::Lower | Bound::Exact)
    }

    #[inline]
    pub fn includes_upper(self) -> bool {
        matches!(self, Bound::Upper | Bound::Exact)
    }
}

/// 置換表から読み出した1エントリ分の情報
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtData {
    pub mv: Option<ChessMove>,
    pub value: Value,
    pub eval: Value,
    pub depth: Depth,
    pub bound: Bound,
}

// data のビット配置
// [0..16) move, [16..32) value, [32..48) eval, [48..56) depth, [56..58) bound, [58..64) generation
const GENERATION_SHIFT: u32 = 58;
const GENERATION_MASK: u8 = 0x3F;

fn encode_move(mv: Option<ChessMove>) -> u64 {
    let Some(mv) = mv else { return 0 };
    let promo = mv.get_promotion().map_or(0, |p| p.to_index() as u64 + 1);
    // from == to never happens for a real move, so 0 stays "no move"
    (mv.get_source().to_index() as u64) | (mv.get_dest().to_index() as u64) << 6 | promo << 12
}

fn decode_move(bits: u64) -> Option<ChessMove> {
    let bits = bits & 0xFFFF;
    if bits == 0 {
        return None;
    }
    let from = ALL_SQUARES[(bits & 63) as usize];
    let to = ALL_SQUARES[((bits >> 6) & 63) as usize];
    let promo = match (bits >> 12) & 7 {
        0 => None,
        p => ALL_PIECES.get(p as usize - 1).copied(),
    };
    Some(ChessMove::new(from, to, promo))
}

#[derive(Default)]
struct TtEntry {
    key_xor_data: AtomicU64,
    data: AtomicU64,
}

pub struct TranspositionTable {
    table: RwLock<Box<[TtEntry]>>,
    generation: AtomicU8,
}

fn allocate(mb: usize) -> Box<[TtEntry]> {
    let count = (mb * 1024 * 1024 / std::mem::size_of::<TtEntry>()).max(1024);
    (0..count).map(|_| TtEntry::default()).collect()
}

impl TranspositionTable {
    pub fn new(mb: usize) -> Self {
        Self {
            table: RwLock::new(allocate(mb)),
            generation: AtomicU8::new(0),
        }
    }

    /// サイズを変更して全エントリを消去する
    pub fn resize(&self, mb: usize, threads: usize) {
        {
            let mut table = self.table.write();
            let wanted = (mb * 1024 * 1024 / std::mem::size_of::<TtEntry>()).max(1024);
            if table.len() != wanted {
                *table = allocate(mb);
                log::debug!("transposition table resized to {mb} MiB ({wanted} entries)");
            }
        }
        self.clear(threads);
    }

    /// スレッド数ぶんに分割して並列にゼロクリアする
    pub fn clear(&self, threads: usize) {
        self.generation.store(0, Ordering::Relaxed);
        let table = self.table.read();
        let len = table.len();
        let threads = threads.max(1);

        if threads == 1 || len < threads * 1024 {
            table.iter().for_each(TtEntry::reset);
            return;
        }

        let chunk = len.div_ceil(threads);
        std::thread::scope(|scope| {
            for part in table.chunks(chunk) {
                scope.spawn(move || part.iter().for_each(TtEntry::reset));
            }
        });
    }

    /// 新しい探索を開始（世代を進める）
    pub fn new_search(&self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn generation(&self) -> u8 {
        self.generation.load(Ordering::Relaxed) & GENERATION_MASK
    }

    #[inline]
    fn index(key: u64, len: usize) -> usize {
        ((u128::from(key) * len as u128) >> 64) as usize
    }

    pub fn probe(&self, key: u64) -> Option<TtData> {
        let table = self.table.read();
        let entry = &table[Self::index(key, table.len())];
        let data = entry.data.load(Ordering::Relaxed);
        let key_xor = entry.key_xor_data.load(Ordering::Relaxed);
        if key_xor ^ data != key || Bound::from_bits(data >> 56) == Bound::None {
            return None;
        }
        Some(TtData {
            mv: decode_move(data),
            value: Value::new(i32::from((data >> 16) as u16 as i16)),
            eval: Value::new(i32::from((data >> 32) as u16 as i16)),
            depth: i32::from((data >> 48) as u8 as i8),
            bound: Bound::from_bits(data >> 56),
        })
    }

    pub fn save(
        &self,
        key: u64,
        value: Value,
        eval: Value,
        bound: Bound,
        depth: Depth,
        mv: Option<ChessMove>,
    ) {
        let table = self.table.read();
        let entry = &table[Self::index(key, table.len())];
        let gen8 = self.generation();

        let old = entry.data.load(Ordering::Relaxed);
        let old_key = entry.key_xor_data.load(Ordering::Relaxed) ^ old;
        let same_key = old_key == key;
        let old_depth = i32::from((old >> 48) as u8 as i8);
        let old_gen = (old >> GENERATION_SHIFT) as u8;

        // 別局面・浅い既存エントリ・古い世代・Exactは上書きする
        let replace = !same_key || bound == Bound::Exact || depth + 4 > old_depth || old_gen != gen8;
        if !replace {
            return;
        }
        // 同一局面で手がなければ既存の手を残す
        let mv_bits = if mv.is_none() && same_key {
            old & 0xFFFF
        } else {
            encode_move(mv)
        };

        let data = mv_bits
            | u64::from(value.raw() as i16 as u16) << 16
            | u64::from(eval.raw() as i16 as u16) << 32
            | u64::from(depth.clamp(-128, 127) as i8 as u8) << 48
            | (bound as u64) << 56
            | u64::from(gen8) << GENERATION_SHIFT;
        entry.data.store(data, Ordering::Relaxed);
        entry.key_xor_data.store(key ^ data, Ordering::Relaxed);
    }

    /// 現世代のエントリが占める割合（1000分率、先頭1000エントリからの標本）
    pub fn hashfull(&self) -> u32 {
        let table = self.table.read();
        let gen8 = self.generation();
        let sample = table.len().min(1000);
        let used = table[..sample]
            .iter()
            .filter(|e| {
                let data = e.data.load(Ordering::Relaxed);
                Bound::from_bits(data >> 56) != Bound::None && (data >> GENERATION_SHIFT) as u8 == gen8
            })
            .count();
        (used * 1000 / sample) as u32
    }

    pub fn entry_count(&self) -> usize {
        self.table.read().len()
    }
}

impl TtEntry {
    fn reset(&self) {
        self.key_xor_data.store(0, Ordering::Relaxed);
        self.data.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess::{Piece, Square};

    #[test]
    fn test_save_then_probe() {
        let tt = TranspositionTable::new(1);
        let mv = ChessMove::new(Square::E7, Square::E8, Some(Piece::Queen));
        tt.save(0xDEAD_BEEF, Value::new(-123), Value::new(45), Bound::Lower, 7, Some(mv));
        let data = tt.probe(0xDEAD_BEEF).expect("entry stored");
        assert_eq!(data.mv, Some(mv));
        assert_eq!(data.value, Value::new(-123));
        assert_eq!(data.eval, Value::new(45));
        assert_eq!(data.depth, 7);
        assert_eq!(data.bound, Bound::Lower);
        assert!(tt.probe(0xDEAD_BEEF ^ 1).is_none());
    }

    #[test]
    fn test_mate_values_survive_packing() {
        let tt = TranspositionTable::new(1);
        tt.save(42, Value::mated_in(3), Value::ZERO, Bound::Exact, 0, None);
        assert_eq!(tt.probe(42).unwrap().value, Value::mated_in(3));
    }

    #[test]
    fn test_parallel_clear_and_resize() {
        let tt = TranspositionTable::new(2);
        for key in 0..5000u64 {
            tt.save(key.wrapping_mul(0x9E37_79B9_7F4A_7C15), Value::new(1), Value::ZERO, Bound::Exact, 1, None);
        }
        assert!(tt.hashfull() > 0);
        tt.clear(4);
        assert_eq!(tt.hashfull(), 0);

        tt.resize(1, 2);
        assert_eq!(tt.entry_count(), 1024 * 1024 / 16);
    }

    #[test]
    fn test_new_search_ages_entries() {
        let tt = TranspositionTable::new(1);
        tt.save(7, Value::new(1), Value::ZERO, Bound::Exact, 1, None);
        let full = tt.hashfull();
        tt.new_search();
        assert!(tt.hashfull() <= full);
        // aged entries are still readable
        assert!(tt.probe(7).is_some());
    }
}
