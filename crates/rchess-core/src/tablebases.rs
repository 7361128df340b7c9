//! Endgame tablebase registry and root move ranking.
//!
//! Probing itself is done by an `EndgameTables` implementation; this module
//! decides whether the root is worth probing and what the search should do
//! with tablebases afterwards.

use std::path::Path;

use anyhow::Context;
use chess::{Board, CastleRights, Color};
use parking_lot::RwLock;

use crate::options::OptionsMap;
use crate::root_moves::RootMoves;
use crate::types::{Depth, Value};

/// Result of probing the root position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootProbe {
    Failed,
    /// Ranked by distance to zeroing; exact even across the fifty-move rule.
    Dtz,
    /// Ranked by win/draw/loss only.
    Wdl,
}

/// Tablebase settings the search uses for one `go`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TbConfig {
    pub cardinality: u32,
    pub root_in_tb: bool,
    pub use_rule50: bool,
    pub probe_depth: Depth,
}

pub trait EndgameTables: Send + Sync {
    /// Loads tables from a path list. `<empty>` or an empty string unloads.
    fn init(&self, paths: &str);

    /// Largest piece count covered by the loaded tables.
    fn max_cardinality(&self) -> u32;

    /// Fills `tb_rank`/`tb_score` of every root move.
    fn root_probe(
        &self,
        _board: &Board,
        _rule50: u32,
        _root_moves: &mut RootMoves,
        _use_rule50: bool,
    ) -> RootProbe {
        RootProbe::Failed
    }
}

/// Ranks and reorders the root moves when the root is covered by tables.
pub fn rank_root_moves(
    tables: &dyn EndgameTables,
    options: &OptionsMap,
    board: &Board,
    rule50: u32,
    root_moves: &mut RootMoves,
) -> TbConfig {
    let mut config = TbConfig {
        cardinality: options.int("SyzygyProbeLimit").max(0) as u32,
        root_in_tb: false,
        use_rule50: options.check("Syzygy50MoveRule"),
        probe_depth: options.int("SyzygyProbeDepth") as Depth,
    };

    let max = tables.max_cardinality();
    if config.cardinality > max {
        config.cardinality = max;
        config.probe_depth = 0;
    }

    let castling = board.castle_rights(Color::White) != CastleRights::NoRights
        || board.castle_rights(Color::Black) != CastleRights::NoRights;
    let mut probe = RootProbe::Failed;
    if config.cardinality >= board.combined().popcnt() && !castling {
        probe = tables.root_probe(board, rule50, root_moves, config.use_rule50);
        config.root_in_tb = probe != RootProbe::Failed;
    }

    if config.root_in_tb {
        root_moves.sort_by(|a, b| b.tb_rank.cmp(&a.tb_rank));
        // With exact DTZ ranking, or when not winning, further probes only slow the search down.
        if probe == RootProbe::Dtz || root_moves.first().is_some_and(|rm| rm.tb_score <= Value::DRAW) {
            config.cardinality = 0;
        }
    } else {
        for rm in root_moves.iter_mut() {
            rm.tb_rank = 0;
        }
    }
    config
}

#[derive(Debug, Default)]
struct TableFiles {
    count: usize,
    max_cardinality: u32,
}

/// Session-private registry of Syzygy files found under `SyzygyPath`.
///
/// It records which tables exist; it does not decode them.
#[derive(Debug, Default)]
pub struct Tablebases {
    files: RwLock<TableFiles>,
}

impl Tablebases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_count(&self) -> usize {
        self.files.read().count
    }

    fn scan_dir(dir: &Path, files: &mut TableFiles) -> anyhow::Result<()> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("cannot read tablebase directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "rtbw") {
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                // "KRPvKR" -> 5 pieces
                let pieces = stem.chars().filter(|c| c.is_ascii_uppercase()).count() as u32;
                files.count += 1;
                files.max_cardinality = files.max_cardinality.max(pieces);
            }
        }
        Ok(())
    }
}

impl EndgameTables for Tablebases {
    fn init(&self, paths: &str) {
        let mut files = TableFiles::default();
        if !paths.is_empty() && paths != "<empty>" {
            let separator = if cfg!(windows) { ';' } else { ':' };
            for dir in paths.split(separator).filter(|s| !s.is_empty()) {
                if let Err(e) = Self::scan_dir(Path::new(dir), &mut files) {
                    log::warn!("{e:#}");
                }
            }
            log::info!(
                "found {} tablebases, max cardinality {}",
                files.count,
                files.max_cardinality
            );
        }
        *self.files.write() = files;
    }

    fn max_cardinality(&self) -> u32 {
        self.files.read().max_cardinality
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position;
    use crate::root_moves::build_root_moves;
    use std::str::FromStr;

    /// Pretends every position is in the tables and ranks the last move best.
    struct LastMoveWins;

    impl EndgameTables for LastMoveWins {
        fn init(&self, _paths: &str) {}
        fn max_cardinality(&self) -> u32 {
            5
        }
        fn root_probe(&self, _: &Board, _: u32, root_moves: &mut RootMoves, _: bool) -> RootProbe {
            let n = root_moves.len() as i32;
            for (i, rm) in root_moves.iter_mut().enumerate() {
                rm.tb_rank = i as i32 - n;
                rm.tb_score = Value::DRAW;
            }
            if let Some(rm) = root_moves.last_mut() {
                rm.tb_rank = 1000;
                rm.tb_score = Value::TB_WIN_IN_MAX_PLY;
            }
            RootProbe::Wdl
        }
    }

    #[test]
    fn test_rank_reorders_when_root_is_covered() {
        let board = Board::from_str("8/8/8/4k3/8/8/3P4/4K2R w - - 0 1").unwrap();
        let mut moves = build_root_moves(&board, None);
        let last = moves.last().unwrap().pv[0];
        let config = rank_root_moves(&LastMoveWins, &OptionsMap::with_defaults(), &board, 0, &mut moves);
        assert!(config.root_in_tb);
        assert_eq!(config.cardinality, 5);
        // clamped to the tables, so probing during search is limited to the root
        assert_eq!(config.probe_depth, 0);
        assert_eq!(moves[0].pv[0], last);
    }

    #[test]
    fn test_rank_skips_positions_with_too_many_pieces() {
        let (board, _) = position::startpos();
        let mut moves = build_root_moves(&board, None);
        let before: Vec<_> = moves.iter().map(|m| m.pv[0]).collect();
        let config = rank_root_moves(&LastMoveWins, &OptionsMap::with_defaults(), &board, 0, &mut moves);
        assert!(!config.root_in_tb);
        assert!(moves.iter().all(|m| m.tb_rank == 0));
        assert_eq!(moves.iter().map(|m| m.pv[0]).collect::<Vec<_>>(), before);
    }

    #[test]
    fn test_registry_scans_rtbw_files() {
        let dir = std::env::temp_dir().join(format!("rchess-tb-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["KQvK.rtbw", "KRPvKR.rtbw", "KQvK.rtbz", "notes.txt"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }
        let tb = Tablebases::new();
        tb.init(dir.to_str().unwrap());
        assert_eq!(tb.table_count(), 2);
        assert_eq!(tb.max_cardinality(), 5);

        tb.init("<empty>");
        assert_eq!(tb.max_cardinality(), 0);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
